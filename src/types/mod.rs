//! Shared error and result types.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised while building or running a pipeline.
///
/// The type is `Clone` so a single upstream fault can be handed to every
/// consumer waiting on a shared source.
#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    /// An operation was registered without the setup it requires.
    #[error("configuration error in {operation}: {reason}")]
    Config {
        /// Operation that was misconfigured.
        operation: String,
        /// What is missing.
        reason: String,
    },
    /// A non-source operation was executed without an input stream.
    #[error("{operation} requires an input stream; is it the first operation in the process?")]
    MissingInput {
        /// Operation that expected input.
        operation: String,
    },
    /// An operation was driven through an unsupported lifecycle transition.
    #[error("{operation} cannot move from {from} to {to}")]
    InvalidState {
        /// Operation name.
        operation: String,
        /// Current state.
        from: &'static str,
        /// Requested state.
        to: &'static str,
    },
    /// The cancellation token fired.
    #[error("execution cancelled")]
    Cancelled,
    /// A row-level failure raised by operation code.
    #[error("{0}")]
    Execution(String),
    /// A fault attributed to the operation whose output raised it.
    #[error("Failed to execute operation {operation}: {source}")]
    Stage {
        /// Faulting operation.
        operation: String,
        /// Underlying fault.
        #[source]
        source: Arc<PipelineError>,
    },
    /// Committing or rolling back an external unit of work failed.
    #[error("transaction error in {operation}: {reason}")]
    Transaction {
        /// Operation owning the transaction.
        operation: String,
        /// Failure description.
        reason: String,
    },
}

impl PipelineError {
    /// Builds an [`PipelineError::Execution`] from any displayable message.
    pub fn execution(message: impl fmt::Display) -> Self {
        PipelineError::Execution(message.to_string())
    }

    /// Builds an [`PipelineError::Execution`] from a caught panic payload.
    pub fn panicked(what: &str, payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        PipelineError::Execution(format!("{what} panicked: {message}"))
    }

    /// Builds a [`PipelineError::Config`] for `operation`.
    pub fn config(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Config {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Wraps `self` as a fault of `operation` unless it is already attributed.
    pub fn attribute(self, operation: &str) -> Self {
        match self {
            PipelineError::Stage { .. } => self,
            other => PipelineError::Stage {
                operation: operation.to_owned(),
                source: Arc::new(other),
            },
        }
    }

    /// Returns true when the fault has already been attributed to an operation.
    pub fn is_attributed(&self) -> bool {
        matches!(self, PipelineError::Stage { .. })
    }

    /// Returns the innermost non-attribution error.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Config { .. } => "Config",
            PipelineError::MissingInput { .. } => "MissingInput",
            PipelineError::InvalidState { .. } => "InvalidState",
            PipelineError::Cancelled => "Cancelled",
            PipelineError::Execution(_) => "Execution",
            PipelineError::Stage { .. } => "Stage",
            PipelineError::Transaction { .. } => "Transaction",
        }
    }
}
