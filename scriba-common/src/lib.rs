//! # scriba common library
//!
//! Shared code for the scriba crates:
//! - Error type used across crates
//! - TOML configuration model and loading
//! - Tracing subscriber initialisation

pub mod config;
pub mod error;
pub mod logging;

pub use config::ScribaConfig;
pub use error::{Error, Result};
