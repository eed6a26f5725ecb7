//! `selfverify` Core Library
//!
//! Shared functionality for `selfverify` components:
//! - Configuration resolution and hierarchy
//! - Tracing subscriber setup
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{Config, LoggingConfig, VerificationConfig};
pub use error::{Error, Result};
