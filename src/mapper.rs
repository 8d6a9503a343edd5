//! Conversions between the desired-state model and CTFd's representation.
//!
//! All functions are pure. The one field with two remote homes is `value`: a
//! standard challenge keeps it in `value`, a dynamic one in `initial` (CTFd's
//! `value` being the current, decayed score). The branch is taken on every
//! conversion, keyed on the challenge type.

use crate::ctfd::{
    ChallengePatch, NewChallenge, RemoteChallenge, RemoteRequirements, RemoteTag, RemoteTopic,
};
use crate::diagnostics::Diagnostic;
use crate::error::ReconcileError;
use crate::model::{Behavior, Challenge, ChallengeState, ChallengeType, DecayFunction, Requirements};

/// Parse a controller-produced challenge id.
pub fn parse_id(id: &str) -> Result<i64, ReconcileError> {
    id.parse::<i64>()
        .map_err(|_| ReconcileError::InvalidId(id.to_string()))
}

pub fn format_id(id: i64) -> String {
    id.to_string()
}

/// Keep `value` only for dynamic challenges.
pub fn on_dynamic(value: Option<i64>, challenge_type: ChallengeType) -> Option<i64> {
    match challenge_type {
        ChallengeType::Dynamic => value,
        ChallengeType::Standard => None,
    }
}

/// Hidden travels as an absent flag, anonymized as `true`.
pub fn encode_anonymize(behavior: Option<Behavior>) -> Option<bool> {
    match behavior {
        None | Some(Behavior::Hidden) => None,
        Some(Behavior::Anonymized) => Some(true),
    }
}

/// Inverse of [`encode_anonymize`]. CTFd never stores `false`, so seeing one is
/// an invariant violation rather than a synonym for hidden.
pub fn decode_anonymize(flag: Option<bool>) -> Result<Behavior, ReconcileError> {
    match flag {
        None => Ok(Behavior::Hidden),
        Some(true) => Ok(Behavior::Anonymized),
        Some(false) => Err(ReconcileError::InvariantViolation(
            "invalid anonymization value, got boolean false".to_string(),
        )),
    }
}

pub fn encode_requirements(reqs: &Requirements) -> Result<RemoteRequirements, ReconcileError> {
    let prerequisites = reqs
        .prerequisites
        .iter()
        .map(|preq| {
            preq.parse::<i64>().map_err(|_| {
                ReconcileError::Configuration(
                    Diagnostic::error(
                        "Configuration error",
                        format!("prerequisite '{}' is not a challenge id", preq),
                    )
                    .into(),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RemoteRequirements {
        prerequisites,
        anonymize: encode_anonymize(reqs.behavior),
    })
}

/// `None` when CTFd holds no requirements, or only an empty cleared set.
pub fn decode_requirements(
    remote: Option<RemoteRequirements>,
) -> Result<Option<Requirements>, ReconcileError> {
    let Some(remote) = remote else {
        return Ok(None);
    };
    if remote.prerequisites.is_empty() && remote.anonymize.is_none() {
        return Ok(None);
    }

    Ok(Some(Requirements {
        behavior: Some(decode_anonymize(remote.anonymize)?),
        prerequisites: remote.prerequisites.into_iter().map(format_id).collect(),
    }))
}

/// Payload creating `model`. Expects a model normalized by the field policy.
pub fn new_challenge(model: &Challenge) -> Result<NewChallenge, ReconcileError> {
    let challenge_type = model.challenge_type;
    Ok(NewChallenge {
        name: model.name.clone(),
        category: model.category.clone(),
        description: model.description.clone(),
        connection_info: model.connection_info.clone(),
        max_attempts: model.max_attempts,
        function: model.function.map(|f| f.as_str().to_string()),
        value: model.value,
        initial: on_dynamic(Some(model.value), challenge_type),
        decay: on_dynamic(model.decay, challenge_type),
        minimum: on_dynamic(model.minimum, challenge_type),
        state: model.state.as_str().to_string(),
        challenge_type: challenge_type.as_str().to_string(),
        next_id: model.next,
        requirements: model
            .requirements
            .as_ref()
            .map(encode_requirements)
            .transpose()?,
    })
}

/// Payload overwriting every field of an existing challenge with `model`.
///
/// Requirements are always sent; an absent set clears them remotely.
pub fn challenge_patch(model: &Challenge) -> Result<ChallengePatch, ReconcileError> {
    let challenge_type = model.challenge_type;
    let requirements = match &model.requirements {
        Some(reqs) => encode_requirements(reqs)?,
        None => RemoteRequirements::default(),
    };

    Ok(ChallengePatch {
        name: model.name.clone(),
        category: model.category.clone(),
        description: model.description.clone(),
        connection_info: model.connection_info.clone(),
        max_attempts: model.max_attempts,
        function: model.function.map(|f| f.as_str().to_string()),
        value: model.value,
        initial: on_dynamic(Some(model.value), challenge_type),
        decay: on_dynamic(model.decay, challenge_type),
        minimum: on_dynamic(model.minimum, challenge_type),
        state: model.state.as_str().to_string(),
        next_id: model.next,
        requirements,
    })
}

pub fn decode_type(raw: &str) -> Result<ChallengeType, ReconcileError> {
    raw.parse().map_err(|_| {
        ReconcileError::InvariantViolation(format!("unsupported challenge type '{}'", raw))
    })
}

/// The score the user configured, wherever CTFd keeps it for this type.
pub fn effective_value(
    challenge_type: ChallengeType,
    remote: &RemoteChallenge,
) -> Result<i64, ReconcileError> {
    match challenge_type {
        ChallengeType::Standard => Ok(remote.value),
        ChallengeType::Dynamic => remote.initial.ok_or_else(|| {
            ReconcileError::InvariantViolation(format!(
                "dynamic challenge {} has no initial value",
                remote.id
            ))
        }),
    }
}

/// Overwrite the scalar fields of `model` with what CTFd holds.
///
/// Requirements, tags and topics are left untouched.
pub fn decode_challenge(
    remote: &RemoteChallenge,
    model: &mut Challenge,
) -> Result<(), ReconcileError> {
    let challenge_type = decode_type(&remote.challenge_type)?;
    let state: ChallengeState = remote.state.parse().map_err(|_| {
        ReconcileError::InvariantViolation(format!("unsupported state '{}'", remote.state))
    })?;

    let function = match challenge_type {
        ChallengeType::Standard => None,
        ChallengeType::Dynamic => remote
            .function
            .as_deref()
            .map(|raw| {
                raw.parse::<DecayFunction>().map_err(|_| {
                    ReconcileError::InvariantViolation(format!(
                        "unsupported decay function '{}'",
                        raw
                    ))
                })
            })
            .transpose()?,
    };

    model.id = format_id(remote.id);
    model.name = remote.name.clone();
    model.category = remote.category.clone();
    model.description = remote.description.clone();
    model.connection_info = remote.connection_info.clone().unwrap_or_default();
    model.max_attempts = remote.max_attempts;
    model.function = function;
    model.value = effective_value(challenge_type, remote)?;
    model.decay = on_dynamic(remote.decay, challenge_type);
    model.minimum = on_dynamic(remote.minimum, challenge_type);
    model.state = state;
    model.challenge_type = challenge_type;
    model.next = remote.next_id;
    Ok(())
}

pub fn decode_tags(tags: &[RemoteTag]) -> Vec<String> {
    tags.iter().map(|t| t.value.clone()).collect()
}

pub fn decode_topics(topics: &[RemoteTopic]) -> Vec<String> {
    topics.iter().map(|t| t.value.clone()).collect()
}
