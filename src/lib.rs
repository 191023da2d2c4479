//! Library crate for devport-scan exposing reusable modules.
pub mod config;
pub mod error;
pub mod fetch;
pub mod identify;
pub mod logging;
pub mod ports;
pub mod probe;
pub mod scanner;
pub mod server;
pub mod signatures;
pub mod types;
