//! End-to-end tests driven by the fixture stub script.
//!
//! The fixture models one student's module: an answer that completes, one
//! that times out and completes after a retry, and a second-attempt answer
//! whose retry budget is already spent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gradewatch_core::{
    FeedbackPoller, HttpFeedbackApi, JobSnapshot, JobStatus, PollSettings, RetryOutcome,
};
use gradewatch_stub::{StubScript, StubState};
use tokio::time::timeout;

/// Path to the fixture script.
fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/stub-script.json")
}

async fn spawn_fixture_stub() -> (String, StubState) {
    let script = StubScript::load_from_file(&fixture_path()).expect("Failed to load fixture");
    let state = StubState::from_script(script);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let served = state.clone();
    tokio::spawn(async move {
        gradewatch_stub::serve(listener, served)
            .await
            .expect("Stub server failed");
    });

    (format!("http://{addr}"), state)
}

/// Polls `answer_id` until terminal, retrying whenever a retry is available.
async fn watch_with_retry(api: &Arc<HttpFeedbackApi>, answer_id: &str) -> JobSnapshot {
    let mut poller = FeedbackPoller::new(
        Arc::clone(api),
        answer_id,
        PollSettings::default().with_interval(Duration::from_millis(40)),
    );
    let mut updates = poller.subscribe();
    poller.start();

    let watch = async {
        loop {
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.is_terminal() {
                return snapshot;
            }
            if snapshot.retry_available() && !snapshot.retry_in_flight {
                let outcome = poller.retry().await;
                assert!(outcome.is_success(), "retry failed: {outcome:?}");
            }
            updates.changed().await.expect("Poller dropped");
        }
    };
    timeout(Duration::from_secs(5), watch)
        .await
        .expect("Timed out waiting for feedback")
}

#[test]
fn test_fixture_script_loads() {
    let script = StubScript::load_from_file(&fixture_path()).expect("Failed to load fixture");

    assert_eq!(script.jobs.len(), 3);
    assert_eq!(script.jobs["ans-102"].max_retries, 2);
    assert_eq!(script.jobs["ans-103"].attempt, 2);
    assert_eq!(
        script.jobs["ans-102"].statuses[1].status,
        JobStatus::Timeout
    );
}

#[tokio::test]
async fn test_status_wire_format_is_snake_case() {
    let (base_url, _state) = spawn_fixture_stub().await;

    let body: serde_json::Value = reqwest::get(format!(
        "{base_url}/api/ai-feedback/status/answer/ans-103"
    ))
    .await
    .expect("Request failed")
    .json()
    .await
    .expect("Invalid JSON");

    assert_eq!(body["status"], "failed");
    assert_eq!(body["error_type"], "parse_error");
    assert_eq!(body["retry_count"], 3);
    assert_eq!(body["max_retries"], 3);
    assert_eq!(body["can_retry"], false);
}

#[tokio::test]
async fn test_module_progress_follows_feedback() {
    let (base_url, state) = spawn_fixture_stub().await;
    let api = Arc::new(HttpFeedbackApi::new(&base_url).expect("Invalid base URL"));

    let summary = api
        .module_status("mod-intro", "stu-1", 1)
        .await
        .expect("Module status failed");
    assert_eq!(summary.total_questions, 2);
    assert_eq!(summary.feedback_ready, 0);
    assert!(!summary.all_complete);

    let first = watch_with_retry(&api, "ans-101").await;
    assert_eq!(first.status, JobStatus::Completed);

    let summary = api
        .module_status("mod-intro", "stu-1", 1)
        .await
        .expect("Module status failed");
    assert_eq!(summary.feedback_ready, 1);
    assert_eq!(summary.progress_percentage, 50);
    assert_eq!(summary.pending_answers().collect::<Vec<_>>(), vec!["ans-102"]);

    let second = watch_with_retry(&api, "ans-102").await;
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.retry_count, 1);
    assert_eq!(state.retry_count("ans-102").await, Some(1));

    let summary = api
        .module_status("mod-intro", "stu-1", 1)
        .await
        .expect("Module status failed");
    assert!(summary.all_complete);
    assert_eq!(summary.progress_percentage, 100);
}

#[tokio::test]
async fn test_second_attempt_with_spent_budget() {
    let (base_url, state) = spawn_fixture_stub().await;
    let api = Arc::new(HttpFeedbackApi::new(&base_url).expect("Invalid base URL"));

    let snapshot = watch_with_retry(&api, "ans-103").await;
    assert!(snapshot.is_failed());
    assert!(!snapshot.retry_available());
    assert_eq!(snapshot.error_type.as_deref(), Some("parse_error"));
    assert_eq!(state.retry_requests(), 0);

    let mut poller = FeedbackPoller::new(
        Arc::clone(&api),
        "ans-103",
        PollSettings::default().with_enabled(false),
    );
    poller.poll_once().await;
    assert!(matches!(poller.retry().await, RetryOutcome::Failure { .. }));

    let summary = api
        .module_status("mod-intro", "stu-1", 2)
        .await
        .expect("Module status failed");
    assert_eq!(summary.total_questions, 1);
    assert_eq!(summary.feedback_ready, 0);
    assert_eq!(summary.feedback_pending, 1);
}
