//! # Error Types
//!
//! Base error type for the foundational primitives. Higher crates define
//! their own `thiserror` enums (`TransitionError`, `StoreError`,
//! `ConductorError`) and wrap this one where needed.

use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error type for `fleet-core`.
#[derive(Error, Debug)]
pub enum FleetError {
    /// An identifier failed validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A timestamp could not be parsed or constructed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Configuration could not be built.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
