//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `txannounce` crate.
//!
//! It centralizes the crate-wide error type and the tracing setup so every
//! other module reports failures and log lines the same way.

pub mod error;
pub mod logging;

pub use error::{RelayError, Result};
