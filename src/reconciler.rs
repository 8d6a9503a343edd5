//! Convergence of a challenge and its owned sub-collections.
//!
//! Four independent procedures (create, read, update, delete) plus import. Each
//! runs its remote calls strictly one after the other, in input order, and stops
//! at the first failure without rolling anything back. Re-running a procedure is
//! the recovery path.
//!
//! Tags and topics are converged by full replacement: every remote record is
//! deleted and the desired set recreated. Remote ids therefore change on each
//! update, while the value sets converge regardless of prior drift.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::ctfd::{ChallengeApi, TOPIC_OWNER_CHALLENGE};
use crate::diagnostics::Diagnostic;
use crate::error::{ApiError, ReconcileError};
use crate::mapper::{self, format_id, on_dynamic, parse_id};
use crate::model::Challenge;
use crate::policy::FieldPolicy;

/// Result of reading a challenge back from CTFd.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Found(Challenge),
    /// The challenge no longer exists remotely, e.g. deleted out of band.
    Missing,
}

impl ReadOutcome {
    pub fn into_found(self) -> Option<Challenge> {
        match self {
            ReadOutcome::Found(challenge) => Some(challenge),
            ReadOutcome::Missing => None,
        }
    }
}

/// Drives a CTFd instance towards desired challenge states.
pub struct Reconciler {
    api: Arc<dyn ChallengeApi>,
    policy: FieldPolicy,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(api: Arc<dyn ChallengeApi>) -> Self {
        Self {
            api,
            policy: FieldPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: FieldPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Once `token` is cancelled no further remote call is issued.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn policy(&self) -> &FieldPolicy {
        &self.policy
    }

    /// Issue one remote call, racing it against cancellation.
    async fn call<T, F>(&self, operation: impl Into<String>, request: F) -> Result<T, ReconcileError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReconcileError::Cancelled),
            result = request => result.map_err(|e| ReconcileError::remote(operation, e)),
        }
    }

    fn apply_policy(&self, desired: Challenge) -> Result<Challenge, ReconcileError> {
        let (model, diags) = self.policy.validate(desired);
        for warning in diags.warnings() {
            warn!(summary = %warning.summary, "{}", warning.detail);
        }
        if diags.has_error() {
            return Err(ReconcileError::Configuration(diags));
        }
        Ok(model)
    }

    /// Create `desired`, then seed its tags and topics.
    ///
    /// A failure while seeding is reported as [`ReconcileError::PartialCreate`]
    /// carrying the new id; already created tags and topics stay in place.
    #[instrument(level = "info", skip_all, fields(name = %desired.name))]
    pub async fn create(&self, desired: Challenge) -> Result<Challenge, ReconcileError> {
        let mut data = self.apply_policy(desired)?;

        let params = mapper::new_challenge(&data)?;
        let created = self
            .call("create challenge", self.api.create_challenge(&params))
            .await?;
        info!(challenge_id = created.id, "created a challenge");

        data.id = format_id(created.id);
        data.decay = on_dynamic(created.decay.or(data.decay), data.challenge_type);
        data.minimum = on_dynamic(created.minimum.or(data.minimum), data.challenge_type);

        let seeded = async {
            data.tags = self.create_tags(created.id, &data.tags).await?;
            data.topics = self.create_topics(created.id, &data.topics).await?;
            Ok::<_, ReconcileError>(())
        }
        .await;

        match seeded {
            Ok(()) => Ok(data),
            Err(source) => Err(ReconcileError::PartialCreate {
                id: format_id(created.id),
                source: Box::new(source),
            }),
        }
    }

    /// Read the challenge `id` and its sub-collections back from CTFd.
    #[instrument(level = "info", skip(self))]
    pub async fn read(&self, id: &str) -> Result<ReadOutcome, ReconcileError> {
        let remote_id = parse_id(id)?;

        let remote = match self
            .call(
                format!("read challenge {}", remote_id),
                self.api.get_challenge(remote_id),
            )
            .await
        {
            Ok(remote) => remote,
            Err(ReconcileError::Remote {
                source: ApiError::NotFound,
                ..
            }) => {
                warn!(challenge_id = remote_id, "challenge not found remotely");
                return Ok(ReadOutcome::Missing);
            }
            Err(e) => return Err(e),
        };

        let mut data = Challenge::new(
            String::new(),
            String::new(),
            String::new(),
            Default::default(),
            0,
        );
        mapper::decode_challenge(&remote, &mut data)?;

        let requirements = self
            .call(
                format!("read challenge {} requirements", remote_id),
                self.api.get_requirements(remote_id),
            )
            .await?;
        data.requirements = mapper::decode_requirements(requirements)?;

        let tags = self
            .call(
                format!("read challenge {} tags", remote_id),
                self.api.list_tags(remote_id),
            )
            .await?;
        data.tags = mapper::decode_tags(&tags);

        let topics = self
            .call(
                format!("read challenge {} topics", remote_id),
                self.api.list_topics(remote_id),
            )
            .await?;
        data.topics = mapper::decode_topics(&topics);

        debug!(
            challenge_id = remote_id,
            tags = data.tags.len(),
            topics = data.topics.len(),
            "read challenge"
        );
        Ok(ReadOutcome::Found(data))
    }

    /// Overwrite the remote challenge with `desired`.
    ///
    /// `previous` is the last known state; it supplies the id when `desired`
    /// has none and guards against in-place type changes.
    #[instrument(level = "info", skip_all, fields(name = %desired.name))]
    pub async fn update(
        &self,
        desired: Challenge,
        previous: &Challenge,
    ) -> Result<Challenge, ReconcileError> {
        let mut data = self.apply_policy(desired)?;
        if data.id.is_empty() {
            data.id = previous.id.clone();
        }
        let id = parse_id(&data.id)?;

        if previous.is_created() && previous.challenge_type != data.challenge_type {
            return Err(ReconcileError::Configuration(
                Diagnostic::error(
                    "Configuration error",
                    format!(
                        "type cannot change from {} to {} in place, the challenge must be replaced",
                        previous.challenge_type, data.challenge_type
                    ),
                )
                .into(),
            ));
        }

        let patch = mapper::challenge_patch(&data)?;
        self.call("update challenge", self.api.update_challenge(id, &patch))
            .await?;
        info!(challenge_id = id, "updated a challenge");

        // Drop them all, create new ones.
        let current_tags = self
            .call(
                format!("get all tags of challenge {}", id),
                self.api.list_tags(id),
            )
            .await?;
        for tag in &current_tags {
            self.call(
                format!("delete tag {} of challenge {}", tag.id, id),
                self.api.delete_tag(tag.id),
            )
            .await?;
        }
        data.tags = self.create_tags(id, &data.tags).await?;

        let current_topics = self
            .call(
                format!("get all topics of challenge {}", id),
                self.api.list_topics(id),
            )
            .await?;
        for topic in &current_topics {
            self.call(
                format!("delete topic {} of challenge {}", topic.id, id),
                self.api.delete_topic(topic.id, TOPIC_OWNER_CHALLENGE),
            )
            .await?;
        }
        data.topics = self.create_topics(id, &data.topics).await?;

        debug!(
            challenge_id = id,
            removed_tags = current_tags.len(),
            removed_topics = current_topics.len(),
            "replaced challenge tags and topics"
        );
        Ok(data)
    }

    /// Delete the challenge. CTFd cascades to its requirements, tags and topics.
    #[instrument(level = "info", skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), ReconcileError> {
        let remote_id = parse_id(id)?;
        match self
            .call("delete challenge", self.api.delete_challenge(remote_id))
            .await
        {
            Ok(()) => {
                info!(challenge_id = remote_id, "deleted a challenge");
                Ok(())
            }
            Err(ReconcileError::Remote {
                source: ApiError::NotFound,
                ..
            }) => {
                warn!(challenge_id = remote_id, "challenge already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Adopt an existing challenge by id.
    #[instrument(level = "info", skip(self))]
    pub async fn import(&self, id: &str) -> Result<Challenge, ReconcileError> {
        match self.read(id).await? {
            ReadOutcome::Found(challenge) => Ok(challenge),
            ReadOutcome::Missing => Err(ReconcileError::Missing(id.to_string())),
        }
    }

    async fn create_tags(&self, id: i64, values: &[String]) -> Result<Vec<String>, ReconcileError> {
        let mut created = Vec::with_capacity(values.len());
        for value in values {
            self.call(
                format!("create tag of challenge {}", id),
                self.api.create_tag(id, value),
            )
            .await?;
            created.push(value.clone());
        }
        Ok(created)
    }

    async fn create_topics(
        &self,
        id: i64,
        values: &[String],
    ) -> Result<Vec<String>, ReconcileError> {
        let mut created = Vec::with_capacity(values.len());
        for value in values {
            self.call(
                format!("create topic of challenge {}", id),
                self.api.create_topic(id, TOPIC_OWNER_CHALLENGE, value),
            )
            .await?;
            created.push(value.clone());
        }
        Ok(created)
    }
}
