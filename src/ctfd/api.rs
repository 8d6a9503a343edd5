//! The remote boundary: the operations the reconciler needs from CTFd and the
//! payloads they exchange.
//!
//! Payloads mirror CTFd's JSON field names. Enumerations travel as plain strings
//! so that unexpected remote values surface in the mapper instead of failing
//! deserialization.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Owner kind CTFd expects on topics attached to a challenge.
pub const TOPIC_OWNER_CHALLENGE: &str = "challenge";

/// Access requirements as CTFd stores them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRequirements {
    #[serde(default)]
    pub prerequisites: Vec<i64>,
    /// Absent means hidden, `true` means anonymized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymize: Option<bool>,
}

/// Body of `POST /challenges`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewChallenge {
    pub name: String,
    pub category: String,
    pub description: String,
    pub connection_info: String,
    pub max_attempts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub value: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    pub state: String,
    #[serde(rename = "type")]
    pub challenge_type: String,
    pub next_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<RemoteRequirements>,
}

/// Body of `PATCH /challenges/{id}`. Every field is sent on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengePatch {
    pub name: String,
    pub category: String,
    pub description: String,
    pub connection_info: String,
    pub max_attempts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub value: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    pub state: String,
    pub next_id: Option<i64>,
    pub requirements: RemoteRequirements,
}

/// A challenge as CTFd returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChallenge {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub connection_info: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<i64>,
    #[serde(default)]
    pub function: Option<String>,
    /// Current value. For dynamic challenges this decays with solves.
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub initial: Option<i64>,
    #[serde(default)]
    pub decay: Option<i64>,
    #[serde(default)]
    pub minimum: Option<i64>,
    pub state: String,
    #[serde(rename = "type")]
    pub challenge_type: String,
    #[serde(default)]
    pub next_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTag {
    pub id: i64,
    #[serde(default)]
    pub challenge_id: Option<i64>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTopic {
    /// Id of the challenge/topic association, the key used to delete it.
    pub id: i64,
    #[serde(default)]
    pub challenge_id: Option<i64>,
    #[serde(default)]
    pub topic_id: Option<i64>,
    pub value: String,
}

/// Typed operations against a CTFd instance.
///
/// Implementations must report a missing challenge as [`ApiError::NotFound`].
#[async_trait]
pub trait ChallengeApi: Send + Sync {
    async fn create_challenge(&self, params: &NewChallenge) -> Result<RemoteChallenge, ApiError>;

    async fn get_challenge(&self, id: i64) -> Result<RemoteChallenge, ApiError>;

    async fn update_challenge(
        &self,
        id: i64,
        params: &ChallengePatch,
    ) -> Result<RemoteChallenge, ApiError>;

    async fn delete_challenge(&self, id: i64) -> Result<(), ApiError>;

    /// `None` when the challenge has no requirements configured.
    async fn get_requirements(&self, id: i64) -> Result<Option<RemoteRequirements>, ApiError>;

    async fn list_tags(&self, challenge_id: i64) -> Result<Vec<RemoteTag>, ApiError>;

    async fn create_tag(&self, challenge_id: i64, value: &str) -> Result<RemoteTag, ApiError>;

    async fn delete_tag(&self, tag_id: i64) -> Result<(), ApiError>;

    async fn list_topics(&self, challenge_id: i64) -> Result<Vec<RemoteTopic>, ApiError>;

    async fn create_topic(
        &self,
        challenge_id: i64,
        owner_kind: &str,
        value: &str,
    ) -> Result<RemoteTopic, ApiError>;

    async fn delete_topic(&self, topic_id: i64, owner_kind: &str) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_omit_absent_anonymize() {
        let reqs = RemoteRequirements {
            prerequisites: vec![3, 5],
            anonymize: None,
        };
        let json = serde_json::to_string(&reqs).expect("serialization should succeed");
        assert_eq!(json, r#"{"prerequisites":[3,5]}"#);
    }

    #[test]
    fn test_remote_challenge_tolerates_missing_optionals() {
        let json = r#"{
            "id": 7,
            "name": "Intro",
            "category": "misc",
            "description": "hello",
            "value": 100,
            "state": "visible",
            "type": "standard"
        }"#;
        let remote: RemoteChallenge = serde_json::from_str(json).expect("should deserialize");
        assert_eq!(remote.id, 7);
        assert_eq!(remote.challenge_type, "standard");
        assert_eq!(remote.initial, None);
        assert_eq!(remote.next_id, None);
        assert_eq!(remote.connection_info, None);
    }

    #[test]
    fn test_patch_sends_nullable_fields_explicitly() {
        let patch = ChallengePatch {
            name: "a".into(),
            category: "b".into(),
            description: "c".into(),
            connection_info: String::new(),
            max_attempts: Some(0),
            function: None,
            value: 100,
            initial: None,
            decay: None,
            minimum: None,
            state: "hidden".into(),
            next_id: None,
            requirements: RemoteRequirements::default(),
        };
        let json = serde_json::to_string(&patch).expect("serialization should succeed");
        assert!(json.contains("\"next_id\":null"));
        assert!(json.contains("\"requirements\":{\"prerequisites\":[]}"));
        assert!(!json.contains("decay"));
        assert!(!json.contains("\"type\""));
    }
}
