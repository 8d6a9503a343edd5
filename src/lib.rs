//! ctfd-challenge-sync: declarative reconciliation of CTFd challenges.
//!
//! A [`Challenge`] describes the desired state of one CTFd challenge. The
//! [`Reconciler`] normalizes it through a [`FieldPolicy`], translates it into
//! CTFd API calls through the [`ChallengeApi`] seam and reads the result back,
//! so that repeated applies of the same model converge.

pub mod cli;
pub mod config;
pub mod ctfd;
pub mod diagnostics;
pub mod drift;
pub mod error;
pub mod mapper;
pub mod model;
pub mod policy;
pub mod reconciler;
pub mod state;

pub use config::{ClientConfig, ConfigError};
pub use ctfd::{ChallengeApi, CtfdClient};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{ApiError, ReconcileError};
pub use model::{Behavior, Challenge, ChallengeState, ChallengeType, DecayFunction, Requirements};
pub use policy::FieldPolicy;
pub use reconciler::{ReadOutcome, Reconciler};
pub use state::{StateFile, StateSnapshot};
