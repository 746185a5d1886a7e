//! # Courier Core
//! Shared configuration and error types for the Courier workspace.

pub mod config;
pub mod error;

pub use config::CourierConfig;
pub use error::{CourierError, Result};
