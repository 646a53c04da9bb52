//! Retry controller for failed feedback generation.
//!
//! [`FeedbackPoller::retry`] asks the backend to regenerate feedback once per
//! call. It only sends the request when the snapshot says a retry is
//! available, and it never returns an error: the outcome is a
//! [`RetryOutcome`] carrying either the server's confirmation or a message
//! suitable for display.

use tracing::{debug, info, warn};

use crate::api::FeedbackApi;
use crate::error::{GradewatchError, NETWORK_ERROR_MESSAGE};
use crate::poller::{FeedbackPoller, FirstTick, PollShared};
use crate::status::JobStatus;

/// Structured error code for an exhausted retry budget.
pub const CODE_MAX_RETRIES_EXCEEDED: &str = "max_retries_exceeded";

/// Structured error code for a job that is not in a failed state.
pub const CODE_INVALID_STATE: &str = "invalid_state";

const DEFAULT_RETRY_FAILURE: &str = "Failed to retry feedback generation";
const DEFAULT_RETRY_SUCCESS: &str = "Feedback generation restarted";

/// Why a retry was not performed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryRejection {
    /// The snapshot does not allow a retry; no request was sent.
    #[error("Retry is not available for this feedback.")]
    Unavailable,

    /// The server's retry budget is spent.
    #[error("Maximum retry attempts ({max_retries}) exceeded. Please contact your instructor for assistance.")]
    BudgetExhausted {
        /// Budget shown to the user.
        max_retries: u32,
    },

    /// The job is not in a failed state server-side.
    #[error("Cannot retry - feedback is not in a failed state.")]
    NotInFailedState,

    /// The server no longer knows the job.
    #[error("Feedback not found. Please refresh the page and try again.")]
    NotFound,

    /// The server failed while handling the retry.
    #[error("Server error occurred. Please try again in a moment.")]
    ServerError,

    /// The request never reached the server.
    #[error("{}", NETWORK_ERROR_MESSAGE)]
    Network,

    /// Any other failure, with the server's detail when provided.
    #[error("{}", .detail.as_deref().unwrap_or(DEFAULT_RETRY_FAILURE))]
    Other {
        /// Server-provided description.
        detail: Option<String>,
    },
}

impl RetryRejection {
    /// Classifies a failed retry request.
    ///
    /// The structured `code` of the error body wins; the free-text `detail`
    /// is only inspected when no code is present.
    #[must_use]
    pub fn classify(err: &GradewatchError, max_retries: u32) -> Self {
        match err {
            GradewatchError::HttpStatus {
                status: 400,
                detail,
                code,
                ..
            } => match code.as_deref() {
                Some(CODE_MAX_RETRIES_EXCEEDED) => Self::BudgetExhausted { max_retries },
                Some(CODE_INVALID_STATE) => Self::NotInFailedState,
                _ => match detail.as_deref() {
                    Some(d) if d.contains("Maximum retries") => {
                        Self::BudgetExhausted { max_retries }
                    }
                    Some(d) if d.contains("Current status") => Self::NotInFailedState,
                    _ => Self::Other {
                        detail: detail.clone(),
                    },
                },
            },
            GradewatchError::HttpStatus { status: 404, .. } => Self::NotFound,
            GradewatchError::HttpStatus { status: 500, .. } => Self::ServerError,
            GradewatchError::HttpStatus { detail, .. } => Self::Other {
                detail: detail.clone(),
            },
            GradewatchError::Network { .. } => Self::Network,
            GradewatchError::EmptyAnswerId => Self::Unavailable,
            other => Self::Other {
                detail: Some(other.to_string()),
            },
        }
    }
}

/// Result of a retry invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The server accepted the retry; polling resumes.
    Success {
        /// Server confirmation.
        message: String,
    },
    /// No retry happened.
    Failure {
        /// Display message (also stored as the snapshot's error).
        error: String,
        /// Classified reason.
        rejection: RetryRejection,
    },
}

impl RetryOutcome {
    fn failure(rejection: RetryRejection) -> Self {
        Self::Failure {
            error: rejection.to_string(),
            rejection,
        }
    }

    /// Whether the retry was accepted.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Clears the snapshot's `retry_in_flight` flag when dropped, so a cancelled
/// retry future does not leave it set.
struct InFlightGuard<'a, A: FeedbackApi> {
    shared: &'a PollShared<A>,
}

impl<A: FeedbackApi> Drop for InFlightGuard<'_, A> {
    fn drop(&mut self) {
        self.shared.clear_retry_in_flight();
    }
}

impl<A: FeedbackApi + 'static> FeedbackPoller<A> {
    /// Requests regeneration of a failed job.
    ///
    /// Sends nothing unless the snapshot reports a retry as available. On
    /// success the snapshot is reset (progress 0, error and feedback cleared)
    /// and the timer is re-armed if it had stopped, with the next fetch one
    /// interval later. On failure only the snapshot's error message changes.
    pub async fn retry(&mut self) -> RetryOutcome {
        let snapshot = self.snapshot();
        if self.answer_id().is_empty() || !snapshot.retry_available() {
            debug!(
                answer_id = %self.answer_id(),
                status = %snapshot.status,
                retry_count = snapshot.retry_count,
                max_retries = snapshot.max_retries,
                "Retry not available"
            );
            return RetryOutcome::failure(RetryRejection::Unavailable);
        }

        let shared = std::sync::Arc::clone(&self.shared);
        shared.publish(|s| s.retry_in_flight = true);
        let _in_flight = InFlightGuard { shared: &shared };
        let result = shared.api.request_retry(&shared.answer_id).await;

        match result {
            Ok(accepted) => {
                let status = accepted.status.unwrap_or(JobStatus::Pending);
                shared.bump_epoch();
                shared.publish(|s| {
                    s.reset_for_retry(status);
                    s.retry_in_flight = false;
                });
                info!(answer_id = %shared.answer_id, %status, "Feedback retry accepted");

                if self.enabled && !self.is_polling() {
                    self.arm(FirstTick::AfterInterval);
                }
                RetryOutcome::Success {
                    message: accepted
                        .message
                        .unwrap_or_else(|| DEFAULT_RETRY_SUCCESS.to_string()),
                }
            }
            Err(err) => {
                let rejection = RetryRejection::classify(&err, snapshot.max_retries);
                warn!(
                    answer_id = %shared.answer_id,
                    error = %err,
                    rejection = %rejection,
                    "Feedback retry rejected"
                );
                let error = rejection.to_string();
                shared.publish(|s| {
                    s.error_message = Some(error.clone());
                    s.retry_in_flight = false;
                });
                RetryOutcome::Failure { error, rejection }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
