//! Field policy for the scoring discriminant.
//!
//! Which scoring fields are required, defaulted or discarded depends on the
//! challenge type. The policy runs before any remote call and is re-applied on
//! every update since nothing guarantees the type is the same as last time.

use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::model::{Behavior, Challenge, ChallengeType, DecayFunction};

const CONFIGURATION_ERROR: &str = "Configuration error";
const IGNORED_FIELD: &str = "Ignored field";

/// Type-conditional validation and default injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPolicy {
    /// Decay function given to dynamic challenges that do not name one.
    pub default_function: DecayFunction,
    /// Locked-state behavior given to requirements that do not name one.
    pub default_behavior: Behavior,
}

impl Default for FieldPolicy {
    fn default() -> Self {
        Self {
            default_function: DecayFunction::Logarithmic,
            default_behavior: Behavior::Hidden,
        }
    }
}

impl FieldPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_function(mut self, function: DecayFunction) -> Self {
        self.default_function = function;
        self
    }

    pub fn with_default_behavior(mut self, behavior: Behavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Normalize `model` and report what is wrong with it.
    ///
    /// The returned model is only meaningful when the diagnostics hold no error.
    pub fn validate(&self, mut model: Challenge) -> (Challenge, Diagnostics) {
        let mut diags = Diagnostics::new();

        match model.challenge_type {
            ChallengeType::Dynamic => {
                if model.decay.is_none() {
                    diags.add_error(CONFIGURATION_ERROR, "decay must be set for dynamic challenges");
                }
                if model.minimum.is_none() {
                    diags.add_error(
                        CONFIGURATION_ERROR,
                        "minimum must be set for dynamic challenges",
                    );
                }
                if model.function.is_none() {
                    debug!(function = %self.default_function, "defaulting decay function");
                    model.function = Some(self.default_function);
                }
            }
            ChallengeType::Standard => {
                // Discarded, never rejected.
                for (field, set) in [
                    ("function", model.function.is_some()),
                    ("decay", model.decay.is_some()),
                    ("minimum", model.minimum.is_some()),
                ] {
                    if set {
                        diags.add_warning(
                            IGNORED_FIELD,
                            format!("{field} is not used by standard challenges and was discarded"),
                        );
                    }
                }
                model.function = None;
                model.decay = None;
                model.minimum = None;
            }
        }

        if let Some(reqs) = model.requirements.as_mut() {
            if reqs.behavior.is_none() {
                reqs.behavior = Some(self.default_behavior);
            }
        }
        // Hidden with no prerequisites is what CTFd reports for "no requirements".
        if model.requirements.as_ref().is_some_and(|reqs| {
            reqs.prerequisites.is_empty() && reqs.behavior == Some(Behavior::Hidden)
        }) {
            debug!("dropping empty hidden requirements");
            model.requirements = None;
        }

        (model, diags)
    }
}
