//! Drift between a desired challenge and what CTFd holds.
//!
//! Sets (tags, topics, prerequisites) are compared without regard to order.
//! The desired side should be normalized by the field policy first, otherwise
//! defaulted fields show up as drift.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::model::{Challenge, Requirements};

/// One field whose remote value differs from the desired one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drift {
    pub field: &'static str,
    pub desired: String,
    pub observed: String,
    /// Converging this field needs the challenge to be destroyed and recreated.
    pub requires_replace: bool,
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.observed, self.desired)?;
        if self.requires_replace {
            f.write_str(" (forces replacement)")?;
        }
        Ok(())
    }
}

fn show_opt<T: fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "null".to_string(),
    }
}

fn show_set(values: &BTreeSet<&str>) -> String {
    let items: Vec<&str> = values.iter().copied().collect();
    format!("[{}]", items.join(", "))
}

fn as_set(values: &[String]) -> BTreeSet<&str> {
    values.iter().map(String::as_str).collect()
}

fn show_requirements(reqs: &Option<Requirements>) -> String {
    match reqs {
        None => "null".to_string(),
        Some(r) => format!(
            "{{behavior: {}, prerequisites: {}}}",
            show_opt(&r.behavior),
            show_set(&as_set(&r.prerequisites))
        ),
    }
}

fn same_requirements(a: &Option<Requirements>, b: &Option<Requirements>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.behavior == b.behavior && as_set(&a.prerequisites) == as_set(&b.prerequisites)
        }
        _ => false,
    }
}

/// Every field of `observed` that differs from `desired`.
pub fn detect(desired: &Challenge, observed: &Challenge) -> Vec<Drift> {
    let mut drifts = Vec::new();
    let mut push = |field: &'static str, desired: String, observed: String, requires_replace| {
        drifts.push(Drift {
            field,
            desired,
            observed,
            requires_replace,
        })
    };

    macro_rules! scalar {
        ($field:ident, $name:literal) => {
            if desired.$field != observed.$field {
                push($name, desired.$field.to_string(), observed.$field.to_string(), false);
            }
        };
    }
    macro_rules! optional {
        ($field:ident, $name:literal) => {
            if desired.$field != observed.$field {
                push($name, show_opt(&desired.$field), show_opt(&observed.$field), false);
            }
        };
    }

    scalar!(name, "name");
    scalar!(category, "category");
    scalar!(description, "description");
    scalar!(connection_info, "connection_info");
    optional!(max_attempts, "max_attempts");
    optional!(function, "function");
    scalar!(value, "value");
    optional!(decay, "decay");
    optional!(minimum, "minimum");
    scalar!(state, "state");
    optional!(next, "next");

    if desired.challenge_type != observed.challenge_type {
        push(
            "type",
            desired.challenge_type.to_string(),
            observed.challenge_type.to_string(),
            true,
        );
    }

    if !same_requirements(&desired.requirements, &observed.requirements) {
        push(
            "requirements",
            show_requirements(&desired.requirements),
            show_requirements(&observed.requirements),
            false,
        );
    }

    let (want, have) = (as_set(&desired.tags), as_set(&observed.tags));
    if want != have {
        push("tags", show_set(&want), show_set(&have), false);
    }
    let (want, have) = (as_set(&desired.topics), as_set(&observed.topics));
    if want != have {
        push("topics", show_set(&want), show_set(&have), false);
    }

    drifts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper;
    use crate::model::{Behavior, ChallengeType, DecayFunction};
    use crate::policy::FieldPolicy;

    fn base() -> Challenge {
        Challenge::new("Warmup", "misc", "hi", ChallengeType::Standard, 100)
    }

    #[test]
    fn test_identical_has_no_drift() {
        assert!(detect(&base(), &base()).is_empty());
    }

    #[test]
    fn test_set_order_is_ignored() {
        let desired = base().with_tags(["web", "easy"]).with_requirements(Requirements {
            behavior: Some(Behavior::Hidden),
            prerequisites: vec!["3".into(), "5".into()],
        });
        let observed = base().with_tags(["easy", "web"]).with_requirements(Requirements {
            behavior: Some(Behavior::Hidden),
            prerequisites: vec!["5".into(), "3".into()],
        });
        assert!(detect(&desired, &observed).is_empty());
    }

    #[test]
    fn test_scalar_and_set_drift_reported() {
        let desired = base().with_tags(["web", "pwn"]);
        let mut observed = base().with_tags(["web", "easy"]);
        observed.value = 50;
        observed.function = Some(DecayFunction::Linear);

        let drifts = detect(&desired, &observed);
        let fields: Vec<&str> = drifts.iter().map(|d| d.field).collect();
        assert_eq!(fields, vec!["function", "value", "tags"]);

        let tags = drifts.iter().find(|d| d.field == "tags").expect("tags drift");
        assert_eq!(tags.desired, "[pwn, web]");
        assert_eq!(tags.observed, "[easy, web]");
        assert_eq!(drifts[0].to_string(), "function: linear -> null");
    }

    #[test]
    fn test_empty_hidden_requirements_do_not_drift() {
        let manifest = base().with_requirements(Requirements {
            behavior: Some(Behavior::Hidden),
            prerequisites: vec![],
        });
        let (desired, _) = FieldPolicy::default().validate(manifest.clone());

        let sent = mapper::encode_requirements(
            manifest.requirements.as_ref().expect("requirements set"),
        )
        .expect("encode");
        let mut observed = base();
        observed.requirements = mapper::decode_requirements(Some(sent)).expect("decode");

        assert!(detect(&desired, &observed).is_empty());
    }

    #[test]
    fn test_type_change_requires_replace() {
        let desired = base();
        let mut observed = base();
        observed.challenge_type = ChallengeType::Dynamic;

        let drifts = detect(&desired, &observed);
        assert_eq!(drifts.len(), 1);
        assert!(drifts[0].requires_replace);
        assert!(drifts[0].to_string().ends_with("(forces replacement)"));
    }
}
