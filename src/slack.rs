//! Slack platform contract: consumed operations, wire types, and the
//! HTTP client.
//!
//! The rest of the crate only sees the [`SlackApi`] trait, so tests run
//! against recording mocks and the transport stays swappable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::blocks::Block;

/// Bounded retry count for rate-limited calls.
const RATE_LIMIT_RETRIES: u32 = 2;

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("slack transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("slack api error: {0}")]
    Api(String),
}

/// An inbound message event — the trigger payload.
///
/// Deserialization fails on a payload missing a required field; the
/// outer handler reports that to the thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub channel: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    pub user: String,
    pub text: String,
    #[serde(default)]
    pub subtype: Option<String>,
}

/// One message out of a thread's history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryMessage {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Metadata envelope on bot posts; carries the raw markdown of a block
/// post and control markers like the thread abort flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub event_type: String,
    pub event_payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepliesPage {
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
    /// Pagination flag; the gate treats a paginated thread as too long.
    #[serde(default)]
    pub has_more: bool,
}

/// Outbound message payload for `chat.postMessage`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PostMessage {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Block>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// The chat-platform operations the bridge consumes.
///
/// Implementations must be safe for concurrent calls against different
/// threads; per-thread ordering is the caller's concern.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn post_message(&self, message: PostMessage) -> Result<(), SlackError>;

    async fn files_upload(
        &self,
        channel: &str,
        thread_ts: &str,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<(), SlackError>;

    async fn conversations_replies(&self, channel: &str, ts: &str)
    -> Result<RepliesPage, SlackError>;

    /// Returns the user's locale, when the platform knows it.
    async fn users_info(&self, user: &str) -> Result<Option<String>, SlackError>;
}

/// Web API client over HTTPS with bearer auth.
pub struct HttpSlackClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, "https://slack.com/api")
    }

    /// Overridable base URL, for tests against a local mock server.
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Sends a request and checks the `ok` envelope, retrying a bounded
    /// number of times when the platform rate-limits.
    async fn send_checked<B>(&self, build: B) -> Result<serde_json::Value, SlackError>
    where
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            let response = build().send().await?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
                && attempt < RATE_LIMIT_RETRIES
            {
                let delay = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(1);
                tokio::time::sleep(Duration::from_secs(delay)).await;
                attempt += 1;
                continue;
            }

            let payload: serde_json::Value = response.json().await?;
            if payload.get("ok").and_then(|value| value.as_bool()).unwrap_or(false) {
                return Ok(payload);
            }
            let error = payload
                .get("error")
                .and_then(|value| value.as_str())
                .unwrap_or("unknown_error")
                .to_string();
            return Err(SlackError::Api(error));
        }
    }
}

#[async_trait]
impl SlackApi for HttpSlackClient {
    async fn post_message(&self, message: PostMessage) -> Result<(), SlackError> {
        self.send_checked(|| {
            self.http
                .post(format!("{}/chat.postMessage", self.base_url))
                .bearer_auth(&self.token)
                .json(&message)
        })
        .await
        .map(|_| ())
    }

    async fn files_upload(
        &self,
        channel: &str,
        thread_ts: &str,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<(), SlackError> {
        self.send_checked(|| {
            let file = reqwest::multipart::Part::bytes(content.clone())
                .file_name(filename.to_string());
            let form = reqwest::multipart::Form::new()
                .text("channels", channel.to_string())
                .text("thread_ts", thread_ts.to_string())
                .text("filename", filename.to_string())
                .part("file", file);
            self.http
                .post(format!("{}/files.upload", self.base_url))
                .bearer_auth(&self.token)
                .multipart(form)
        })
        .await
        .map(|_| ())
    }

    async fn conversations_replies(
        &self,
        channel: &str,
        ts: &str,
    ) -> Result<RepliesPage, SlackError> {
        let payload = self
            .send_checked(|| {
                self.http
                    .get(format!("{}/conversations.replies", self.base_url))
                    .bearer_auth(&self.token)
                    .query(&[("channel", channel), ("ts", ts)])
            })
            .await?;
        serde_json::from_value(payload).map_err(|error| SlackError::Api(error.to_string()))
    }

    async fn users_info(&self, user: &str) -> Result<Option<String>, SlackError> {
        let payload = self
            .send_checked(|| {
                self.http
                    .get(format!("{}/users.info", self.base_url))
                    .bearer_auth(&self.token)
                    .query(&[("user", user), ("include_locale", "true")])
            })
            .await?;
        Ok(payload
            .get("user")
            .and_then(|user| user.get("locale"))
            .and_then(|locale| locale.as_str())
            .map(str::to_string))
    }
}

#[cfg(test)]
#[path = "slack_tests.rs"]
mod tests;
