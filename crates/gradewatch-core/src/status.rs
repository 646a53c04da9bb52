//! Job status types for feedback generation tracking.
//!
//! This module defines the local state machine view of one server-side
//! feedback generation job ([`JobSnapshot`]) and the wire types returned by
//! the backend's status, retry and module summary endpoints.
//!
//! The status transitions through these states:
//! - `Unknown` -> `Pending` (first fetch, or 404 "not started yet")
//! - `Pending` -> `Generating` -> `Completed`
//! - `Pending`/`Generating` -> `Failed` or `Timeout`
//! - `Failed`/`Timeout` -> `Pending` (after an accepted retry)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// JobStatus
// ============================================================================

/// Generation status of one feedback job as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is queued (or not registered server-side yet).
    Pending,
    /// The grading model is producing feedback.
    Generating,
    /// Feedback is available.
    Completed,
    /// Generation failed.
    Failed,
    /// Generation exceeded the server-side time limit.
    Timeout,
    /// Nothing known yet, or the server sent a status this client does not know.
    ///
    /// Kept last: serde only accepts `#[serde(other)]` on the final variant.
    #[default]
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Returns `true` for the in-progress states `Pending` and `Generating`.
    #[must_use]
    pub const fn is_generating(&self) -> bool {
        matches!(self, Self::Pending | Self::Generating)
    }

    /// Returns `true` for `Failed` and `Timeout`.
    ///
    /// # Examples
    ///
    /// ```
    /// use gradewatch_core::JobStatus;
    ///
    /// assert!(JobStatus::Failed.is_failed());
    /// assert!(JobStatus::Timeout.is_failed());
    /// assert!(!JobStatus::Completed.is_failed());
    /// ```
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// Body of `GET /api/ai-feedback/status/answer/{answer_id}`.
///
/// Only `status` is required; the backend omits fields it has no value for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Current generation status.
    pub status: JobStatus,

    /// Progress percentage (0-100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,

    /// Error description when generation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Error category (`timeout`, `api_error`, `parse_error`, `network_error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Whether the server will accept a retry request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_retry: Option<bool>,

    /// Generated feedback, present once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Value>,

    /// Number of retries already consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,

    /// Server-enforced retry budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl StatusReport {
    /// Creates a report carrying only a status.
    #[must_use]
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Sets the progress percentage.
    #[must_use]
    pub fn with_progress(mut self, progress: i64) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Sets the error message and category.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self.error_type = Some(error_type.into());
        self
    }

    /// Sets the retry bookkeeping fields.
    #[must_use]
    pub fn with_retries(mut self, can_retry: bool, retry_count: u32, max_retries: u32) -> Self {
        self.can_retry = Some(can_retry);
        self.retry_count = Some(retry_count);
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the feedback payload.
    #[must_use]
    pub fn with_feedback(mut self, feedback: Value) -> Self {
        self.feedback = Some(feedback);
        self
    }
}

/// Body of a successful `POST /api/ai-feedback/retry/answer/{answer_id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAccepted {
    /// Status the job was reset to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    /// Human-readable confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error body returned by the backend on non-success responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Structured error kind, e.g. `max_retries_exceeded` or `invalid_state`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Feedback availability for one question of a module attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionFeedback {
    /// Question identifier.
    pub question_id: String,
    /// Answer identifier (the job key for polling).
    pub answer_id: String,
    /// Whether feedback exists for the answer.
    pub has_feedback: bool,
    /// Feedback identifier, when present.
    #[serde(default)]
    pub feedback_id: Option<String>,
}

/// Body of `GET /api/student/modules/{module_id}/feedback-status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFeedbackStatus {
    /// Number of answered questions in the attempt.
    pub total_questions: u32,
    /// Answers with feedback available.
    pub feedback_ready: u32,
    /// Answers still waiting for feedback.
    #[serde(default)]
    pub feedback_pending: u32,
    /// Ready share in percent (absent for an empty attempt).
    #[serde(default)]
    pub progress_percentage: u32,
    /// Whether every answer has feedback.
    pub all_complete: bool,
    /// Per-question breakdown.
    #[serde(default)]
    pub questions: Vec<QuestionFeedback>,
}

impl ModuleFeedbackStatus {
    /// Answer ids whose feedback is still missing.
    pub fn pending_answers(&self) -> impl Iterator<Item = &str> {
        self.questions
            .iter()
            .filter(|q| !q.has_feedback)
            .map(|q| q.answer_id.as_str())
    }
}

// ============================================================================
// JobSnapshot
// ============================================================================

/// Client-side view of one feedback job, as published by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// The job key being tracked.
    pub answer_id: String,

    /// Last known status.
    pub status: JobStatus,

    /// Last known progress (0-100).
    pub progress: u8,

    /// Most recent error, from the server or from a failed request.
    pub error_message: Option<String>,

    /// Server error category for failed jobs.
    pub error_type: Option<String>,

    /// Server's retry flag, stored as received.
    pub can_retry: bool,

    /// Generated feedback once completed.
    pub feedback: Option<Value>,

    /// Retries already consumed.
    pub retry_count: u32,

    /// Server-enforced retry budget.
    pub max_retries: u32,

    /// A retry request is outstanding.
    pub retry_in_flight: bool,

    /// The recurring status timer is armed.
    pub polling: bool,

    /// Number of status fetches applied so far.
    pub poll_count: u64,

    /// When the last status fetch was applied.
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    /// Creates a snapshot in the `Unknown` status.
    ///
    /// # Examples
    ///
    /// ```
    /// use gradewatch_core::{JobSnapshot, JobStatus};
    ///
    /// let snapshot = JobSnapshot::new("ans-42", 3);
    /// assert_eq!(snapshot.status, JobStatus::Unknown);
    /// assert_eq!(snapshot.progress, 0);
    /// assert!(!snapshot.is_terminal());
    /// ```
    #[must_use]
    pub fn new(answer_id: impl Into<String>, max_retries: u32) -> Self {
        Self {
            answer_id: answer_id.into(),
            status: JobStatus::Unknown,
            progress: 0,
            error_message: None,
            error_type: None,
            can_retry: false,
            feedback: None,
            retry_count: 0,
            max_retries,
            retry_in_flight: false,
            polling: false,
            poll_count: 0,
            last_polled_at: None,
        }
    }

    /// Pending or generating.
    #[must_use]
    pub const fn is_generating(&self) -> bool {
        self.status.is_generating()
    }

    /// Feedback is available.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Failed or timed out.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.status.is_failed()
    }

    /// Returns `true` if a retry request may be sent.
    ///
    /// Requires a failed job, the server's `can_retry` flag and unspent budget.
    ///
    /// # Examples
    ///
    /// ```
    /// use gradewatch_core::{JobSnapshot, JobStatus};
    ///
    /// let mut snapshot = JobSnapshot::new("ans-1", 3);
    /// snapshot.status = JobStatus::Failed;
    /// snapshot.can_retry = true;
    /// snapshot.retry_count = 2;
    /// assert!(snapshot.retry_available());
    ///
    /// snapshot.retry_count = 3;
    /// assert!(!snapshot.retry_available());
    /// ```
    #[must_use]
    pub const fn retry_available(&self) -> bool {
        self.status.is_failed() && self.can_retry && self.retry_count < self.max_retries
    }

    /// Returns `true` once no further automatic polling is useful.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.is_completed() || (self.is_failed() && !self.retry_available())
    }

    /// Overwrites the snapshot with a server report.
    ///
    /// Missing optional fields fall back to the same defaults the backend uses.
    pub fn apply_report(&mut self, report: StatusReport, default_max_retries: u32) {
        self.status = report.status;
        self.progress = clamp_progress(report.progress.unwrap_or(0));
        self.error_message = report.error_message;
        self.error_type = report.error_type;
        self.can_retry = report.can_retry.unwrap_or(false);
        self.feedback = report.feedback;
        self.retry_count = report.retry_count.unwrap_or(0);
        self.max_retries = report.max_retries.unwrap_or(default_max_retries);
        self.record_poll();
    }

    /// Records a 404 from the status endpoint: the job is not registered yet.
    pub fn mark_not_started(&mut self) {
        self.status = JobStatus::Pending;
        self.progress = 0;
        self.record_poll();
    }

    /// Records a failed status fetch; the last known status is kept.
    pub fn record_fetch_error(&mut self, message: String) {
        self.error_message = Some(message);
        self.record_poll();
    }

    /// Resets the snapshot after the server accepted a retry.
    pub fn reset_for_retry(&mut self, status: JobStatus) {
        self.status = status;
        self.progress = 0;
        self.error_message = None;
        self.error_type = None;
        self.feedback = None;
    }

    fn record_poll(&mut self) {
        self.poll_count += 1;
        self.last_polled_at = Some(Utc::now());
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_progress(progress: i64) -> u8 {
    progress.clamp(0, 100) as u8
}

// ============================================================================
// Tests
// ============================================================================
