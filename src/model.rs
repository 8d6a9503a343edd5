//! Desired-state model of a CTFd challenge.
//!
//! This is the shape a manifest decodes into and the shape every reconciliation
//! returns. Static schema defaults (type, state, connection info, attempts, empty
//! tag/topic sets) are applied while decoding; the scoring-dependent defaults are
//! left unset here and filled in by [`crate::policy::FieldPolicy`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A string did not name a member of one of the model's enumerations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} '{value}': expected one of {expected}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Scoring discriminant of a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeType {
    /// Fixed value.
    Standard,
    /// Value decays with the number of solves until it reaches `minimum`.
    #[default]
    Dynamic,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Standard => "standard",
            ChallengeType::Dynamic => "dynamic",
        }
    }
}

/// Visibility of a challenge for players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeState {
    #[default]
    Hidden,
    Visible,
}

impl ChallengeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeState::Hidden => "hidden",
            ChallengeState::Visible => "visible",
        }
    }
}

/// Decay function of a dynamic challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayFunction {
    Linear,
    Logarithmic,
}

impl DecayFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecayFunction::Linear => "linear",
            DecayFunction::Logarithmic => "logarithmic",
        }
    }
}

/// How a locked challenge is shown to players who miss a prerequisite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    Hidden,
    Anonymized,
}

impl Behavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::Hidden => "hidden",
            Behavior::Anonymized => "anonymized",
        }
    }
}

macro_rules! string_enum {
    ($ty:ty, $kind:literal, $expected:literal, [$($name:literal => $variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                        expected: $expected,
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(ChallengeType, "challenge type", "standard, dynamic", [
    "standard" => ChallengeType::Standard,
    "dynamic" => ChallengeType::Dynamic,
]);
string_enum!(ChallengeState, "state", "hidden, visible", [
    "hidden" => ChallengeState::Hidden,
    "visible" => ChallengeState::Visible,
]);
string_enum!(DecayFunction, "decay function", "linear, logarithmic", [
    "linear" => DecayFunction::Linear,
    "logarithmic" => DecayFunction::Logarithmic,
]);
string_enum!(Behavior, "behavior", "hidden, anonymized", [
    "hidden" => Behavior::Hidden,
    "anonymized" => Behavior::Anonymized,
]);

/// Prerequisites gating access to a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Requirements {
    /// Unset until the field policy applies its default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<Behavior>,
    /// Ids of the challenges to solve first. Order is not significant.
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

fn default_max_attempts() -> Option<i64> {
    Some(0)
}

/// A challenge as the user wants it to be (or as it was last observed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Remote id in decimal form, empty until the challenge exists remotely.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub connection_info: String,
    /// Attempts before a player is locked out, 0 means unlimited.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<DecayFunction>,
    /// Points for a solve. For dynamic challenges this is the initial value.
    pub value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    #[serde(default)]
    pub state: ChallengeState,
    #[serde(rename = "type", default)]
    pub challenge_type: ChallengeType,
    /// Suggested next challenge, advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl Challenge {
    /// Minimal standard challenge, mostly useful to build fixtures.
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
        challenge_type: ChallengeType,
        value: i64,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            category: category.into(),
            description: description.into(),
            connection_info: String::new(),
            max_attempts: default_max_attempts(),
            function: None,
            value,
            decay: None,
            minimum: None,
            state: ChallengeState::default(),
            challenge_type,
            next: None,
            requirements: None,
            tags: Vec::new(),
            topics: Vec::new(),
        }
    }

    /// Whether the challenge has ever been created remotely.
    pub fn is_created(&self) -> bool {
        !self.id.is_empty()
    }

    /// Decode a manifest (YAML, which also accepts JSON).
    pub fn from_manifest(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn with_dynamic_scoring(mut self, decay: i64, minimum: i64) -> Self {
        self.challenge_type = ChallengeType::Dynamic;
        self.decay = Some(decay);
        self.minimum = Some(minimum);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = Some(requirements);
        self
    }
}
