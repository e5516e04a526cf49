//! Error taxonomy shared by every panel component.
//!
//! Each variant maps to one recovery policy:
//! - `Validation`: input rejected before any state change.
//! - `Conflict`: an equivalent background operation is already running.
//! - `Connection`: a driver failure or timeout; the state machine moved to `Error`.
//! - `Persistence`: storage failed; the in-memory document was restored when
//!   `rolled_back` is set.
//! - `Dispatch`: registry lookup, argument coercion or target failure.
//! - `Unavailable`: the configuration document could not be loaded.

use thiserror::Error;

/// Result alias used throughout the panel crates.
pub type PanelResult<T> = Result<T, PanelError>;

/// Top-level error for panel operations.
#[derive(Debug, Error)]
pub enum PanelError {
    /// Malformed user input.
    #[error("invalid input: {0}")]
    Validation(String),

    /// An operation of the same kind is already in progress.
    #[error("{0}")]
    Conflict(String),

    /// Connect or scan failed at the driver level.
    #[error("connection error: {0}")]
    Connection(String),

    /// Writing the configuration document failed.
    #[error("{}", persistence_message(.reason, .rolled_back))]
    Persistence { reason: String, rolled_back: bool },

    /// Function dispatch failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The configuration document is not available.
    #[error("configuration unavailable: {0}")]
    Unavailable(String),
}

fn persistence_message(reason: &str, rolled_back: &bool) -> String {
    if *rolled_back {
        format!("failed to save configuration: {}; changes rolled back", reason)
    } else {
        format!("failed to save configuration: {}", reason)
    }
}

impl PanelError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PanelError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        PanelError::Conflict(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        PanelError::Connection(msg.into())
    }
}

/// Errors raised while resolving or invoking a registered function.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No function with this id is registered or declared.
    #[error("function not found: {0}")]
    NotFound(String),

    /// The function is protected from this operation.
    #[error("function '{0}' is protected and cannot be removed")]
    Protected(String),

    /// The function is declared but has no callable target.
    #[error("function '{0}' has no registered implementation")]
    Unresolved(String),

    /// A raw argument could not be coerced to the declared type.
    #[error("parameter '{param}': cannot convert {value:?} to {expected}")]
    Coercion {
        param: String,
        value: String,
        expected: &'static str,
    },

    /// The target itself reported a failure.
    #[error("execution error: {0}")]
    Target(String),
}
