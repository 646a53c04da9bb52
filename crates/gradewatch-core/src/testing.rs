//! Scripted in-memory `FeedbackApi` used by the unit tests.

#![allow(clippy::unwrap_used, missing_docs)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{FeedbackApi, StatusFetch};
use crate::error::{GradewatchError, Result};
use crate::status::{RetryAccepted, StatusReport};

/// One scripted backend response.
#[derive(Debug, Clone)]
pub enum Step {
    /// HTTP 404.
    NotFound,
    /// HTTP 200 with a status report.
    Report(StatusReport),
    /// HTTP 200 from the retry endpoint.
    Accepted(RetryAccepted),
    /// Non-success status with optional `detail` and `code`.
    Http(u16, Option<String>, Option<String>),
    /// Transport failure.
    Network,
}

impl Step {
    pub fn report(report: StatusReport) -> Self {
        Self::Report(report)
    }

    pub fn rejected(status: u16, detail: &str) -> Self {
        Self::Http(status, Some(detail.to_string()), None)
    }
}

/// Replays scripted responses in order; the last step of each script repeats.
#[derive(Debug, Default)]
pub struct ScriptedApi {
    statuses: Mutex<VecDeque<Step>>,
    retries: Mutex<VecDeque<Step>>,
    status_calls: AtomicUsize,
    retry_calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedApi {
    pub fn new(statuses: Vec<Step>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            ..Default::default()
        }
    }

    pub fn with_retries(self, retries: Vec<Step>) -> Self {
        *self.retries.lock().unwrap() = retries.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replaces the remaining status script.
    pub fn set_statuses(&self, statuses: Vec<Step>) {
        *self.statuses.lock().unwrap() = statuses.into();
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn retry_calls(&self) -> usize {
        self.retry_calls.load(Ordering::SeqCst)
    }

    fn next(queue: &Mutex<VecDeque<Step>>) -> Option<Step> {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn step_error(step: Step) -> GradewatchError {
    match step {
        Step::Http(status, detail, code) => GradewatchError::http_status(status, detail, code),
        Step::Network => GradewatchError::network("connection refused"),
        other => GradewatchError::decode("scripted", format!("unexpected step {other:?}")),
    }
}

#[async_trait]
impl FeedbackApi for ScriptedApi {
    async fn fetch_status(&self, _answer_id: &str) -> Result<StatusFetch> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match Self::next(&self.statuses) {
            Some(Step::NotFound) | None => Ok(StatusFetch::NotStarted),
            Some(Step::Report(report)) => Ok(StatusFetch::Report(report)),
            Some(other) => Err(step_error(other)),
        }
    }

    async fn request_retry(&self, _answer_id: &str) -> Result<RetryAccepted> {
        self.retry_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match Self::next(&self.retries) {
            Some(Step::Accepted(accepted)) => Ok(accepted),
            None => Ok(RetryAccepted::default()),
            Some(Step::NotFound) => Err(GradewatchError::http_status(404, None, None)),
            Some(other) => Err(step_error(other)),
        }
    }
}
