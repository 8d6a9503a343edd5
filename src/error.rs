//! Error types for challenge reconciliation.
//!
//! Two layers:
//! - [`ApiError`] for individual calls against the CTFd API
//! - [`ReconcileError`] for a whole convergence procedure, which wraps remote
//!   failures with the name of the operation that failed

use thiserror::Error;

use crate::diagnostics::{Diagnostic, Diagnostics, Severity};

/// Errors returned by a [`crate::ctfd::ChallengeApi`] implementation.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse CTFd response: {0}")]
    ParseError(String),

    #[error("API error ({code}): {message}")]
    Status { code: u16, message: String },

    #[error("CTFd rejected the request: {0}")]
    Rejected(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }
}

/// Errors that abort a reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The desired model violates the field policy. Nothing was sent remotely.
    #[error("Configuration error: {0}")]
    Configuration(Diagnostics),

    /// A remote call failed. Earlier calls of the same procedure stay applied.
    #[error("Unable to {operation}, got error: {source}")]
    Remote {
        operation: String,
        #[source]
        source: ApiError,
    },

    /// The remote returned a state that cannot exist for a healthy CTFd.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Creation failed after the challenge itself was created.
    #[error("Challenge {id} was created but not fully converged: {source}")]
    PartialCreate {
        id: String,
        #[source]
        source: Box<ReconcileError>,
    },

    #[error("Invalid challenge id '{0}'")]
    InvalidId(String),

    #[error("Challenge {0} does not exist")]
    Missing(String),

    #[error("Reconciliation cancelled")]
    Cancelled,
}

impl ReconcileError {
    pub fn remote(operation: impl Into<String>, source: ApiError) -> Self {
        ReconcileError::Remote {
            operation: operation.into(),
            source,
        }
    }

    /// Whether this signals a defect rather than a user or transport problem.
    pub fn is_fatal(&self) -> bool {
        match self {
            ReconcileError::InvariantViolation(_) | ReconcileError::InvalidId(_) => true,
            ReconcileError::PartialCreate { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Id of a challenge that exists remotely despite the failure, if any.
    pub fn created_id(&self) -> Option<&str> {
        match self {
            ReconcileError::PartialCreate { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Severity-tagged diagnostics for the caller.
    pub fn to_diagnostics(&self) -> Diagnostics {
        match self {
            ReconcileError::Configuration(diags) => diags.clone(),
            ReconcileError::Remote { .. } => {
                Diagnostics::from(Diagnostic::error("Client Error", self.to_string()))
            }
            ReconcileError::InvariantViolation(_) | ReconcileError::InvalidId(_) => {
                Diagnostics::from(Diagnostic::fatal("Invariant Violation", self.to_string()))
            }
            ReconcileError::PartialCreate { id, source } => {
                let mut diags = source.to_diagnostics();
                diags.push(Diagnostic::warning(
                    "Partially Created",
                    format!("challenge {id} exists remotely; re-run apply to converge it"),
                ));
                diags
            }
            ReconcileError::Missing(_) => {
                Diagnostics::from(Diagnostic::error("Not Found", self.to_string()))
            }
            ReconcileError::Cancelled => {
                Diagnostics::from(Diagnostic::error("Cancelled", self.to_string()))
            }
        }
    }
}

impl From<&ReconcileError> for Severity {
    fn from(err: &ReconcileError) -> Self {
        if err.is_fatal() {
            Severity::Fatal
        } else {
            Severity::Error
        }
    }
}
