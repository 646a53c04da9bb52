//! HTTP client for the feedback backend.
//!
//! The poller talks to the backend through the [`FeedbackApi`] trait so it
//! can be driven by [`HttpFeedbackApi`] in production and by an in-memory
//! double in tests.
//!
//! # Endpoints
//!
//! - `GET /api/ai-feedback/status/answer/{answer_id}` - job status
//! - `POST /api/ai-feedback/retry/answer/{answer_id}` - request regeneration
//! - `GET /api/student/modules/{module_id}/feedback-status` - attempt summary
//!
//! No request timeout is applied here; the backend reports a `timeout`
//! status itself when generation takes too long.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use tracing::debug;

use crate::config::Config;
use crate::error::{GradewatchError, Result};
use crate::status::{ErrorBody, ModuleFeedbackStatus, RetryAccepted, StatusReport};

/// Outcome of a status read.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusFetch {
    /// The backend has no job for this answer yet (HTTP 404).
    NotStarted,
    /// The backend reported the job's state.
    Report(StatusReport),
}

/// Backend operations used by the poller and the retry controller.
#[async_trait]
pub trait FeedbackApi: Send + Sync {
    /// Reads the current generation status for an answer.
    async fn fetch_status(&self, answer_id: &str) -> Result<StatusFetch>;

    /// Asks the backend to regenerate feedback for an answer.
    async fn request_retry(&self, answer_id: &str) -> Result<RetryAccepted>;
}

/// [`FeedbackApi`] implementation over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFeedbackApi {
    client: Client,
    base_url: Url,
}

impl HttpFeedbackApi {
    /// Creates a client for the backend at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(base_url, Client::new())
    }

    /// Creates a client from configuration, honouring `userAgent`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        Self::with_client(&config.api_url, builder.build()?)
    }

    /// Creates a client reusing an existing `reqwest::Client`.
    pub fn with_client(base_url: &str, client: Client) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            GradewatchError::config_validation(
                format!("apiUrl '{base_url}' is not a valid URL: {e}"),
                "Use a full URL such as http://localhost:8000",
            )
        })?;
        if base_url.cannot_be_a_base() {
            return Err(GradewatchError::config_validation(
                format!("apiUrl '{base_url}' cannot carry a path"),
                "Use a full URL such as http://localhost:8000",
            ));
        }
        Ok(Self { client, base_url })
    }

    /// Base URL requests are issued against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds `{base}/api/<segments...>`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    /// Reads the attempt-level summary of feedback availability for a module.
    pub async fn module_status(
        &self,
        module_id: &str,
        student_id: &str,
        attempt: u32,
    ) -> Result<ModuleFeedbackStatus> {
        let mut url = self.endpoint(&["student", "modules", module_id, "feedback-status"]);
        url.query_pairs_mut()
            .append_pair("student_id", student_id)
            .append_pair("attempt", &attempt.to_string());

        debug!(%url, "Fetching module feedback status");
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl FeedbackApi for HttpFeedbackApi {
    async fn fetch_status(&self, answer_id: &str) -> Result<StatusFetch> {
        if answer_id.is_empty() {
            return Err(GradewatchError::EmptyAnswerId);
        }
        let url = self.endpoint(&["ai-feedback", "status", "answer", answer_id]);
        debug!(%url, "Fetching feedback status");

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(StatusFetch::NotStarted),
            s if s.is_success() => Ok(StatusFetch::Report(response.json().await?)),
            _ => Err(error_from_response(response).await),
        }
    }

    async fn request_retry(&self, answer_id: &str) -> Result<RetryAccepted> {
        if answer_id.is_empty() {
            return Err(GradewatchError::EmptyAnswerId);
        }
        let url = self.endpoint(&["ai-feedback", "retry", "answer", answer_id]);
        debug!(%url, "Requesting feedback retry");

        let response = self.client.post(url).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        // An empty or non-JSON success body still counts as accepted.
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body).unwrap_or_default())
    }
}

/// Converts a non-success response into `HttpStatus`, keeping `detail`/`code`.
async fn error_from_response(response: Response) -> GradewatchError {
    let status = response.status().as_u16();
    let body: ErrorBody = match response.bytes().await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => ErrorBody::default(),
    };
    GradewatchError::http_status(status, body.detail, body.code)
}
