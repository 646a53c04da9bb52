//! Job scripts for the stub backend.
//!
//! A script maps answer ids to the sequence of status reports the stub will
//! serve for them. Scripts are plain JSON so demos can be edited by hand:
//!
//! ```json
//! {
//!   "jobs": {
//!     "ans-1": {
//!       "statuses": [
//!         { "status": "generating", "progress": 40 },
//!         { "status": "failed", "error_message": "Model timeout", "error_type": "timeout" }
//!       ],
//!       "afterRetry": [{ "status": "completed", "progress": 100 }],
//!       "maxRetries": 3
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use gradewatch_core::{JobStatus, StatusReport, DEFAULT_MAX_RETRIES};
use serde::{Deserialize, Serialize};

/// Errors raised while loading a script.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// The script file could not be read.
    #[error("Failed to read stub script '{path}': {source}")]
    Io {
        /// Script path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The script file is not valid JSON for a script.
    #[error("Failed to parse stub script '{path}': {message}")]
    Parse {
        /// Script path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

const fn default_attempt() -> u32 {
    1
}

/// Scripted behaviour of one feedback job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobScript {
    /// Reports served in order, one per status read; the last one repeats.
    /// An empty list means the job is not registered yet (404).
    #[serde(default)]
    pub statuses: Vec<StatusReport>,

    /// Reports served after an accepted retry.
    #[serde(default)]
    pub after_retry: Vec<StatusReport>,

    /// Retries already consumed.
    #[serde(default)]
    pub retry_count: u32,

    /// Retry budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Module the answer belongs to, for the module summary endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,

    /// Student who submitted the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,

    /// Attempt number of the submission.
    #[serde(default = "default_attempt")]
    pub attempt: u32,

    /// Question the answer responds to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
}

impl JobScript {
    /// Creates a job serving `statuses` with the default retry budget.
    #[must_use]
    pub fn new(statuses: Vec<StatusReport>) -> Self {
        Self {
            statuses,
            after_retry: Vec::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            module_id: None,
            student_id: None,
            attempt: 1,
            question_id: None,
        }
    }

    /// Sets the reports served after an accepted retry.
    #[must_use]
    pub fn with_after_retry(mut self, after_retry: Vec<StatusReport>) -> Self {
        self.after_retry = after_retry;
        self
    }

    /// Sets the consumed retries and the budget.
    #[must_use]
    pub fn with_retries(mut self, retry_count: u32, max_retries: u32) -> Self {
        self.retry_count = retry_count;
        self.max_retries = max_retries;
        self
    }

    /// Places the answer in a module attempt.
    #[must_use]
    pub fn in_module(
        mut self,
        module_id: impl Into<String>,
        student_id: impl Into<String>,
        attempt: u32,
        question_id: impl Into<String>,
    ) -> Self {
        self.module_id = Some(module_id.into());
        self.student_id = Some(student_id.into());
        self.attempt = attempt;
        self.question_id = Some(question_id.into());
        self
    }
}

/// A full stub script: answer id to job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StubScript {
    /// Scripted jobs keyed by answer id.
    #[serde(default)]
    pub jobs: BTreeMap<String, JobScript>,
}

impl StubScript {
    /// Loads a script from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self, ScriptError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| ScriptError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Adds or replaces a job.
    #[must_use]
    pub fn with_job(mut self, answer_id: impl Into<String>, job: JobScript) -> Self {
        self.jobs.insert(answer_id.into(), job);
        self
    }

    /// Built-in jobs used when the stub runs without a script file.
    ///
    /// - `demo-complete`: generates and completes
    /// - `demo-failing`: fails once, completes after a retry
    /// - `demo-exhausted`: failed with no retries left
    #[must_use]
    pub fn demo() -> Self {
        let feedback = serde_json::json!({
            "score": 7,
            "strengths": ["Clear structure"],
            "improvements": ["Cite the source for the second claim"]
        });

        Self::default()
            .with_job(
                "demo-complete",
                JobScript::new(vec![
                    StatusReport::new(JobStatus::Pending),
                    StatusReport::new(JobStatus::Generating).with_progress(30),
                    StatusReport::new(JobStatus::Generating).with_progress(70),
                    StatusReport::new(JobStatus::Completed)
                        .with_progress(100)
                        .with_feedback(feedback.clone()),
                ])
                .in_module("demo-module", "demo-student", 1, "q-1"),
            )
            .with_job(
                "demo-failing",
                JobScript::new(vec![
                    StatusReport::new(JobStatus::Generating).with_progress(40),
                    StatusReport::new(JobStatus::Failed)
                        .with_progress(40)
                        .with_error("AI provider returned an error", "api_error"),
                ])
                .with_after_retry(vec![
                    StatusReport::new(JobStatus::Pending),
                    StatusReport::new(JobStatus::Generating).with_progress(60),
                    StatusReport::new(JobStatus::Completed)
                        .with_progress(100)
                        .with_feedback(feedback),
                ])
                .in_module("demo-module", "demo-student", 1, "q-2"),
            )
            .with_job(
                "demo-exhausted",
                JobScript::new(vec![StatusReport::new(JobStatus::Failed)
                    .with_error("Feedback generation timed out", "timeout")])
                .with_retries(3, 3)
                .in_module("demo-module", "demo-student", 1, "q-3"),
            )
    }
}
