//! Gradewatch Core
//!
//! Client-side tracking of AI feedback generation jobs. A job is created by
//! the grading backend when a student submits an answer; this crate follows
//! it from `pending` to `completed` (or `failed`/`timeout`) and lets the
//! caller ask for a regeneration when the backend allows one.
//!
//! # Architecture
//!
//! - **Status model** ([`status`]): wire types and the [`JobSnapshot`] view
//! - **Backend client** ([`api`]): the [`FeedbackApi`] seam and its HTTP implementation
//! - **Poller** ([`poller`]): interval-driven status fetching with stale-response protection
//! - **Retry controller** ([`retry`]): budget-aware regeneration requests
//! - **Configuration** ([`config`]): `gradewatch.json` plus environment overrides

pub mod api;
pub mod config;
pub mod error;
pub mod poller;
pub mod retry;
pub mod status;

#[cfg(test)]
mod testing;

pub use api::{FeedbackApi, HttpFeedbackApi, StatusFetch};
pub use config::{Config, API_URL_ENV};
pub use error::{GradewatchError, Result, NETWORK_ERROR_MESSAGE};
pub use poller::{FeedbackPoller, PollSettings, DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL};
pub use retry::{RetryOutcome, RetryRejection, CODE_INVALID_STATE, CODE_MAX_RETRIES_EXCEEDED};
pub use status::{
    ErrorBody, JobSnapshot, JobStatus, ModuleFeedbackStatus, QuestionFeedback, RetryAccepted,
    StatusReport,
};
