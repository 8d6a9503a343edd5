//! HTTP client for the CTFd v1 REST API.
//!
//! Every response is wrapped in CTFd's envelope (`{"success": .., "data": ..}`).
//! A 404 maps to [`ApiError::NotFound`]; other failures keep the status code and
//! whatever message CTFd put in the body.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::api::{
    ChallengeApi, ChallengePatch, NewChallenge, RemoteChallenge, RemoteRequirements, RemoteTag,
    RemoteTopic,
};
use crate::config::ClientConfig;
use crate::error::ApiError;

/// Client for a single CTFd instance.
pub struct CtfdClient {
    /// API root, e.g. `https://ctf.example.org/api/v1`.
    api_base: String,
    /// Admin token sent as `Authorization: Token <key>`.
    api_key: Option<String>,
    http_client: Client,
}

/// Standard CTFd response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    data: Option<T>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

impl<T> Envelope<T> {
    fn failure_message(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        match &self.errors {
            Some(errors) => errors.to_string(),
            None => "no error details".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct NewTag<'a> {
    challenge: i64,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct NewTopic<'a> {
    challenge: i64,
    #[serde(rename = "type")]
    owner_kind: &'a str,
    value: &'a str,
}

impl CtfdClient {
    /// Create a client from explicit configuration.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            api_base: config.api_base(),
            api_key: config.api_key.clone(),
            http_client: Client::builder()
                .timeout(config.timeout)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_base, path);
        debug!(%method, %url, "CTFd request");

        let mut request = self
            .http_client
            .request(method, &url)
            .header("Content-Type", "application/json");
        if let Some(ref api_key) = self.api_key {
            request = request.header("Authorization", format!("Token {}", api_key));
        }
        request
    }

    /// Send the request and unwrap the envelope. `Ok(None)` means `data` was null.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, ApiError> {
        let http_response = request
            .send()
            .await
            .map_err(|e| ApiError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        let body = http_response
            .text()
            .await
            .map_err(|e| ApiError::RequestFailed(e.to_string()))?;

        if status.as_u16() == 404 {
            return Err(ApiError::NotFound);
        }

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope<serde_json::Value>>(&body)
                .map(|envelope| envelope.failure_message())
                .unwrap_or(body);
            return Err(ApiError::Status {
                code: status.as_u16(),
                message,
            });
        }

        if body.trim().is_empty() {
            return Ok(None);
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| ApiError::ParseError(format!("Failed to parse API response: {}", e)))?;

        if envelope.success == Some(false) {
            return Err(ApiError::Rejected(envelope.failure_message()));
        }

        Ok(envelope.data)
    }

    async fn execute_data<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        self.execute(request)
            .await?
            .ok_or_else(|| ApiError::ParseError("No data in CTFd response".to_string()))
    }
}

#[async_trait]
impl ChallengeApi for CtfdClient {
    async fn create_challenge(&self, params: &NewChallenge) -> Result<RemoteChallenge, ApiError> {
        self.execute_data(self.request(Method::POST, "/challenges").json(params))
            .await
    }

    async fn get_challenge(&self, id: i64) -> Result<RemoteChallenge, ApiError> {
        self.execute_data(self.request(Method::GET, &format!("/challenges/{}", id)))
            .await
    }

    async fn update_challenge(
        &self,
        id: i64,
        params: &ChallengePatch,
    ) -> Result<RemoteChallenge, ApiError> {
        self.execute_data(
            self.request(Method::PATCH, &format!("/challenges/{}", id))
                .json(params),
        )
        .await
    }

    async fn delete_challenge(&self, id: i64) -> Result<(), ApiError> {
        self.execute::<serde_json::Value>(
            self.request(Method::DELETE, &format!("/challenges/{}", id)),
        )
        .await
        .map(|_| ())
    }

    async fn get_requirements(&self, id: i64) -> Result<Option<RemoteRequirements>, ApiError> {
        self.execute(self.request(Method::GET, &format!("/challenges/{}/requirements", id)))
            .await
    }

    async fn list_tags(&self, challenge_id: i64) -> Result<Vec<RemoteTag>, ApiError> {
        let tags = self
            .execute(self.request(Method::GET, &format!("/challenges/{}/tags", challenge_id)))
            .await?;
        Ok(tags.unwrap_or_default())
    }

    async fn create_tag(&self, challenge_id: i64, value: &str) -> Result<RemoteTag, ApiError> {
        let body = NewTag {
            challenge: challenge_id,
            value,
        };
        self.execute_data(self.request(Method::POST, "/tags").json(&body))
            .await
    }

    async fn delete_tag(&self, tag_id: i64) -> Result<(), ApiError> {
        self.execute::<serde_json::Value>(self.request(Method::DELETE, &format!("/tags/{}", tag_id)))
            .await
            .map(|_| ())
    }

    async fn list_topics(&self, challenge_id: i64) -> Result<Vec<RemoteTopic>, ApiError> {
        let topics = self
            .execute(self.request(Method::GET, &format!("/challenges/{}/topics", challenge_id)))
            .await?;
        Ok(topics.unwrap_or_default())
    }

    async fn create_topic(
        &self,
        challenge_id: i64,
        owner_kind: &str,
        value: &str,
    ) -> Result<RemoteTopic, ApiError> {
        let body = NewTopic {
            challenge: challenge_id,
            owner_kind,
            value,
        };
        self.execute_data(self.request(Method::POST, "/topics").json(&body))
            .await
    }

    async fn delete_topic(&self, topic_id: i64, owner_kind: &str) -> Result<(), ApiError> {
        let path = format!("/topics?type={}&target_id={}", owner_kind, topic_id);
        self.execute::<serde_json::Value>(self.request(Method::DELETE, &path))
            .await
            .map(|_| ())
    }
}
