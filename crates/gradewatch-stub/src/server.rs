//! HTTP routes of the stub backend.
//!
//! # Endpoints
//!
//! - `GET /api/ai-feedback/status/answer/{answer_id}` - next scripted report
//! - `POST /api/ai-feedback/retry/answer/{answer_id}` - retry with backend rules
//! - `GET /api/student/modules/{module_id}/feedback-status` - attempt summary
//!
//! # Example
//!
//! ```no_run
//! use gradewatch_stub::{create_router, StubScript, StubState};
//!
//! # async fn example() -> std::io::Result<()> {
//! let state = StubState::from_script(StubScript::demo());
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! axum::serve(listener, create_router(state)).await
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gradewatch_core::{
    ErrorBody, JobStatus, ModuleFeedbackStatus, QuestionFeedback, RetryAccepted, StatusReport,
    CODE_INVALID_STATE, CODE_MAX_RETRIES_EXCEEDED,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::script::{JobScript, StubScript};

/// Confirmation sent with an accepted retry.
pub const RETRY_ACCEPTED_MESSAGE: &str = "Feedback regeneration started";

// ============================================================================
// Job state
// ============================================================================

/// Runtime state of one scripted job.
#[derive(Debug, Clone)]
struct StubJob {
    script: JobScript,
    queue: VecDeque<StatusReport>,
    /// Last report served to a status read.
    current: Option<StatusReport>,
}

impl StubJob {
    fn new(script: JobScript) -> Self {
        Self {
            queue: script.statuses.iter().cloned().collect(),
            script,
            current: None,
        }
    }

    fn is_registered(&self) -> bool {
        self.current.is_some() || !self.queue.is_empty()
    }

    /// Status as the backend sees it; reads do not have to happen first.
    fn status(&self) -> Option<JobStatus> {
        self.current
            .as_ref()
            .or_else(|| self.queue.front())
            .map(|r| r.status)
    }

    fn has_feedback(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|r| r.status == JobStatus::Completed)
    }

    /// Serves the next report; the last one repeats.
    fn next_report(&mut self) -> Option<StatusReport> {
        let report = if self.queue.len() > 1 {
            self.queue.pop_front()
        } else {
            self.queue.front().cloned()
        }?;
        self.current = Some(report.clone());
        Some(self.with_bookkeeping(report))
    }

    /// Fills in the retry counters the backend always reports.
    fn with_bookkeeping(&self, mut report: StatusReport) -> StatusReport {
        let retry_count = self.script.retry_count;
        let max_retries = self.script.max_retries;
        report.retry_count = Some(retry_count);
        report.max_retries = Some(max_retries);
        if report.can_retry.is_none() {
            report.can_retry = Some(report.status.is_failed() && retry_count < max_retries);
        }
        report
    }

    fn restart(&mut self) {
        self.script.retry_count += 1;
        self.queue = self.script.after_retry.iter().cloned().collect();
        if self.queue.is_empty() {
            self.queue.push_back(StatusReport::new(JobStatus::Pending));
        }
        self.current = None;
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Shared state of the stub server.
///
/// Cloning is cheap; clones share jobs and counters, so a test can keep one
/// clone and inspect it while the router serves another.
#[derive(Debug, Clone, Default)]
pub struct StubState {
    jobs: Arc<Mutex<HashMap<String, StubJob>>>,
    status_reads: Arc<AtomicUsize>,
    retry_requests: Arc<AtomicUsize>,
}

impl StubState {
    /// Creates an empty stub; every answer is unknown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stub serving the jobs of `script`.
    #[must_use]
    pub fn from_script(script: StubScript) -> Self {
        let jobs = script
            .jobs
            .into_iter()
            .map(|(id, job)| (id, StubJob::new(job)))
            .collect();
        Self {
            jobs: Arc::new(Mutex::new(jobs)),
            ..Self::default()
        }
    }

    /// Adds or replaces a job.
    pub async fn insert_job(&self, answer_id: impl Into<String>, job: JobScript) {
        self.jobs
            .lock()
            .await
            .insert(answer_id.into(), StubJob::new(job));
    }

    /// Number of status reads served, including 404s.
    #[must_use]
    pub fn status_reads(&self) -> usize {
        self.status_reads.load(Ordering::SeqCst)
    }

    /// Number of retry requests received, including rejected ones.
    #[must_use]
    pub fn retry_requests(&self) -> usize {
        self.retry_requests.load(Ordering::SeqCst)
    }

    /// Retries consumed by a job, if it exists.
    pub async fn retry_count(&self, answer_id: &str) -> Option<u32> {
        self.jobs
            .lock()
            .await
            .get(answer_id)
            .map(|job| job.script.retry_count)
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for handlers; serialized as the backend's error body.
#[derive(Debug)]
enum ApiError {
    /// Unknown answer.
    NotFound,
    /// Retry requested for a job that is not failed.
    InvalidState(JobStatus),
    /// Retry budget spent.
    RetriesExhausted(u32),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail, code) = match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "Feedback not found".to_string(), None),
            Self::InvalidState(current) => (
                StatusCode::BAD_REQUEST,
                format!("Cannot retry feedback generation. Current status: {current}"),
                Some(CODE_INVALID_STATE),
            ),
            Self::RetriesExhausted(max) => (
                StatusCode::BAD_REQUEST,
                format!("Maximum retries ({max}) exceeded"),
                Some(CODE_MAX_RETRIES_EXCEEDED),
            ),
        };

        let body = Json(ErrorBody {
            detail: Some(detail),
            code: code.map(str::to_string),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the stub router with all endpoints under `/api`.
pub fn create_router(state: StubState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/ai-feedback/status/answer/:answer_id", get(handle_status))
        .route("/ai-feedback/retry/answer/:answer_id", post(handle_retry))
        .route(
            "/student/modules/:module_id/feedback-status",
            get(handle_module_status),
        );

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serves the stub on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: StubState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Stub feedback backend listening");
    }
    axum::serve(listener, create_router(state)).await
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /api/ai-feedback/status/answer/{answer_id}`.
async fn handle_status(
    State(state): State<StubState>,
    Path(answer_id): Path<String>,
) -> Result<Json<StatusReport>, ApiError> {
    state.status_reads.fetch_add(1, Ordering::SeqCst);

    let mut jobs = state.jobs.lock().await;
    let report = jobs
        .get_mut(&answer_id)
        .and_then(StubJob::next_report)
        .ok_or(ApiError::NotFound)?;

    debug!(%answer_id, status = %report.status, progress = ?report.progress, "Serving status");
    Ok(Json(report))
}

/// Handler for `POST /api/ai-feedback/retry/answer/{answer_id}`.
async fn handle_retry(
    State(state): State<StubState>,
    Path(answer_id): Path<String>,
) -> Result<Json<RetryAccepted>, ApiError> {
    state.retry_requests.fetch_add(1, Ordering::SeqCst);

    let mut jobs = state.jobs.lock().await;
    let job = jobs
        .get_mut(&answer_id)
        .filter(|job| job.is_registered())
        .ok_or(ApiError::NotFound)?;

    let status = job.status().unwrap_or_default();
    if !status.is_failed() {
        warn!(%answer_id, %status, "Retry rejected: job not failed");
        return Err(ApiError::InvalidState(status));
    }
    if job.script.retry_count >= job.script.max_retries {
        warn!(%answer_id, max_retries = job.script.max_retries, "Retry rejected: budget spent");
        return Err(ApiError::RetriesExhausted(job.script.max_retries));
    }

    job.restart();
    info!(%answer_id, retry_count = job.script.retry_count, "Retry accepted");

    Ok(Json(RetryAccepted {
        status: Some(JobStatus::Pending),
        message: Some(RETRY_ACCEPTED_MESSAGE.to_string()),
    }))
}

/// Query of the module summary endpoint.
#[derive(Debug, Deserialize)]
struct ModuleStatusQuery {
    student_id: String,
    #[serde(default)]
    attempt: Option<u32>,
}

/// Handler for `GET /api/student/modules/{module_id}/feedback-status`.
async fn handle_module_status(
    State(state): State<StubState>,
    Path(module_id): Path<String>,
    Query(query): Query<ModuleStatusQuery>,
) -> Json<ModuleFeedbackStatus> {
    let attempt = query.attempt.unwrap_or(1);
    let jobs = state.jobs.lock().await;

    let mut questions: Vec<QuestionFeedback> = jobs
        .iter()
        .filter(|(_, job)| {
            job.script.module_id.as_deref() == Some(module_id.as_str())
                && job.script.student_id.as_deref() == Some(query.student_id.as_str())
                && job.script.attempt == attempt
        })
        .map(|(answer_id, job)| {
            let has_feedback = job.has_feedback();
            QuestionFeedback {
                question_id: job.script.question_id.clone().unwrap_or_default(),
                answer_id: answer_id.clone(),
                has_feedback,
                feedback_id: has_feedback.then(|| format!("fb-{answer_id}")),
            }
        })
        .collect();
    questions.sort_by(|a, b| a.answer_id.cmp(&b.answer_id));

    Json(summarize(questions))
}

fn summarize(questions: Vec<QuestionFeedback>) -> ModuleFeedbackStatus {
    let total = u32::try_from(questions.len()).unwrap_or(u32::MAX);
    let ready = u32::try_from(questions.iter().filter(|q| q.has_feedback).count())
        .unwrap_or(u32::MAX);
    let progress_percentage = if total > 0 {
        ready.saturating_mul(100) / total
    } else {
        0
    };

    ModuleFeedbackStatus {
        total_questions: total,
        feedback_ready: ready,
        feedback_pending: total - ready,
        progress_percentage,
        all_complete: ready == total,
        questions,
    }
}

// ============================================================================
// Tests
// ============================================================================
