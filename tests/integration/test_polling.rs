//! Integration tests for the poller and retry controller over HTTP.
//!
//! Each test runs the stub backend on an ephemeral port and drives the real
//! `reqwest` client against it, with short intervals in real time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gradewatch_core::{
    FeedbackApi, FeedbackPoller, HttpFeedbackApi, JobSnapshot, JobStatus, PollSettings,
    RetryOutcome, RetryRejection, StatusReport, NETWORK_ERROR_MESSAGE,
};
use gradewatch_stub::{JobScript, StubState, RETRY_ACCEPTED_MESSAGE};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

const INTERVAL: Duration = Duration::from_millis(50);
const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Spawns the stub server and returns its base URL.
async fn spawn_stub(state: StubState) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let handle = tokio::spawn(async move {
        gradewatch_stub::serve(listener, state)
            .await
            .expect("Stub server failed");
    });

    (format!("http://{addr}"), handle)
}

fn poller_for(base_url: &str, answer_id: &str) -> FeedbackPoller<HttpFeedbackApi> {
    let api = Arc::new(HttpFeedbackApi::new(base_url).expect("Invalid base URL"));
    FeedbackPoller::new(
        api,
        answer_id,
        PollSettings::default().with_interval(INTERVAL),
    )
}

/// Waits until a published snapshot satisfies `done`.
async fn wait_for(
    updates: &mut watch::Receiver<JobSnapshot>,
    done: impl Fn(&JobSnapshot) -> bool,
) -> JobSnapshot {
    let wait = async {
        loop {
            let snapshot = updates.borrow_and_update().clone();
            if done(&snapshot) {
                return snapshot;
            }
            updates.changed().await.expect("Poller dropped");
        }
    };
    within_limit(wait).await
}

async fn within_limit<T>(future: impl Future<Output = T>) -> T {
    timeout(WAIT_LIMIT, future)
        .await
        .expect("Timed out waiting for snapshot")
}

fn generation_job() -> JobScript {
    JobScript::new(vec![
        StatusReport::new(JobStatus::Pending),
        StatusReport::new(JobStatus::Generating).with_progress(40),
        StatusReport::new(JobStatus::Completed)
            .with_progress(100)
            .with_feedback(serde_json::json!({"score": 8, "summary": "Solid answer"})),
    ])
}

// ============================================================================
// Polling
// ============================================================================

#[tokio::test]
async fn test_polls_until_completed_then_stops() {
    let state = StubState::new();
    state.insert_job("ans-1", generation_job()).await;
    let (base_url, _server) = spawn_stub(state.clone()).await;

    let mut poller = poller_for(&base_url, "ans-1");
    let mut updates = poller.subscribe();
    poller.start();

    let snapshot = wait_for(&mut updates, JobSnapshot::is_terminal).await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.progress, 100);
    assert_eq!(
        snapshot.feedback,
        Some(serde_json::json!({"score": 8, "summary": "Solid answer"}))
    );
    assert_eq!(snapshot.poll_count, 3);

    sleep(INTERVAL * 4).await;
    assert_eq!(state.status_reads(), 3);
    assert!(!poller.is_polling());
}

#[tokio::test]
async fn test_unregistered_job_is_pending_until_it_appears() {
    let state = StubState::new();
    let (base_url, _server) = spawn_stub(state.clone()).await;

    let mut poller = poller_for(&base_url, "ans-2");
    let mut updates = poller.subscribe();
    poller.start();

    let snapshot = wait_for(&mut updates, |s| s.poll_count >= 1).await;
    assert_eq!(snapshot.status, JobStatus::Pending);
    assert_eq!(snapshot.progress, 0);
    assert!(snapshot.error_message.is_none());

    state
        .insert_job(
            "ans-2",
            JobScript::new(vec![
                StatusReport::new(JobStatus::Generating).with_progress(60),
                StatusReport::new(JobStatus::Completed).with_progress(100),
            ]),
        )
        .await;

    let snapshot = wait_for(&mut updates, JobSnapshot::is_terminal).await;
    assert_eq!(snapshot.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_stop_halts_requests() {
    let state = StubState::new();
    state
        .insert_job(
            "ans-3",
            JobScript::new(vec![
                StatusReport::new(JobStatus::Generating).with_progress(10)
            ]),
        )
        .await;
    let (base_url, _server) = spawn_stub(state.clone()).await;

    let mut poller = poller_for(&base_url, "ans-3");
    let mut updates = poller.subscribe();
    poller.start();
    wait_for(&mut updates, |s| s.poll_count >= 2).await;

    poller.stop();
    // Let a request that was already on the wire land.
    sleep(Duration::from_millis(30)).await;
    let reads = state.status_reads();

    sleep(INTERVAL * 6).await;
    assert_eq!(state.status_reads(), reads);
    assert!(!poller.snapshot().polling);
}

#[tokio::test]
async fn test_unreachable_backend_reports_network_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    drop(listener);

    let mut poller = poller_for(&format!("http://{addr}"), "ans-4");
    let mut updates = poller.subscribe();
    poller.start();

    let snapshot = wait_for(&mut updates, |s| s.error_message.is_some()).await;
    assert_eq!(snapshot.error_message.as_deref(), Some(NETWORK_ERROR_MESSAGE));
    assert_eq!(snapshot.status, JobStatus::Unknown);
    assert!(poller.is_polling());
}

#[tokio::test]
async fn test_concurrent_pollers_are_independent() {
    let state = StubState::new();
    state.insert_job("ans-a", generation_job()).await;
    state
        .insert_job(
            "ans-b",
            JobScript::new(vec![StatusReport::new(JobStatus::Completed).with_progress(100)]),
        )
        .await;
    state
        .insert_job(
            "ans-c",
            JobScript::new(vec![StatusReport::new(JobStatus::Failed)]).with_retries(3, 3),
        )
        .await;
    let (base_url, _server) = spawn_stub(state.clone()).await;

    let watches = ["ans-a", "ans-b", "ans-c"].map(|answer_id| {
        let base_url = base_url.clone();
        async move {
            let mut poller = poller_for(&base_url, answer_id);
            let mut updates = poller.subscribe();
            poller.start();
            wait_for(&mut updates, JobSnapshot::is_terminal).await
        }
    });
    let results = futures::future::join_all(watches).await;

    let statuses: Vec<_> = results.iter().map(|s| (s.answer_id.as_str(), s.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("ans-a", JobStatus::Completed),
            ("ans-b", JobStatus::Completed),
            ("ans-c", JobStatus::Failed),
        ]
    );
    assert_eq!(state.status_reads(), 3 + 1 + 1);
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_retry_restarts_generation() {
    let state = StubState::new();
    state
        .insert_job(
            "ans-5",
            JobScript::new(vec![
                StatusReport::new(JobStatus::Generating).with_progress(30),
                StatusReport::new(JobStatus::Failed)
                    .with_progress(30)
                    .with_error("AI provider returned an error", "api_error"),
            ])
            .with_after_retry(vec![
                StatusReport::new(JobStatus::Generating).with_progress(70),
                StatusReport::new(JobStatus::Completed).with_progress(100),
            ]),
        )
        .await;
    let (base_url, _server) = spawn_stub(state.clone()).await;

    let mut poller = poller_for(&base_url, "ans-5");
    let mut updates = poller.subscribe();
    poller.start();

    let failed = wait_for(&mut updates, JobSnapshot::retry_available).await;
    assert_eq!(failed.error_type.as_deref(), Some("api_error"));
    assert_eq!(failed.retry_count, 0);
    assert_eq!(failed.max_retries, 3);

    let outcome = poller.retry().await;
    assert_eq!(
        outcome,
        RetryOutcome::Success {
            message: RETRY_ACCEPTED_MESSAGE.to_string()
        }
    );
    let reset = poller.snapshot();
    assert_eq!(reset.status, JobStatus::Pending);
    assert_eq!(reset.progress, 0);
    assert!(reset.error_message.is_none());

    let done = wait_for(&mut updates, JobSnapshot::is_terminal).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.retry_count, 1);
    assert_eq!(state.retry_count("ans-5").await, Some(1));
    assert_eq!(state.retry_requests(), 1);
}

#[tokio::test]
async fn test_exhausted_budget_stops_and_skips_retry() {
    let state = StubState::new();
    state
        .insert_job(
            "ans-6",
            JobScript::new(vec![StatusReport::new(JobStatus::Failed)
                .with_error("Feedback generation timed out", "timeout")])
            .with_retries(3, 3),
        )
        .await;
    let (base_url, _server) = spawn_stub(state.clone()).await;

    let mut poller = poller_for(&base_url, "ans-6");
    let mut updates = poller.subscribe();
    poller.start();

    let snapshot = wait_for(&mut updates, JobSnapshot::is_terminal).await;
    assert!(snapshot.is_failed());
    assert!(!snapshot.can_retry);

    let outcome = poller.retry().await;
    assert!(matches!(
        outcome,
        RetryOutcome::Failure {
            rejection: RetryRejection::Unavailable,
            ..
        }
    ));
    assert_eq!(state.retry_requests(), 0);
}

#[tokio::test]
async fn test_server_retry_rejections_classify() {
    let state = StubState::new();
    state
        .insert_job(
            "ans-7",
            JobScript::new(vec![
                StatusReport::new(JobStatus::Generating).with_progress(5)
            ]),
        )
        .await;
    state
        .insert_job(
            "ans-8",
            JobScript::new(vec![StatusReport::new(JobStatus::Failed)]).with_retries(2, 2),
        )
        .await;
    let (base_url, _server) = spawn_stub(state).await;
    let api = HttpFeedbackApi::new(&base_url).expect("Invalid base URL");

    let err = api.request_retry("ans-7").await.unwrap_err();
    assert_eq!(err.status_code(), Some(400));
    assert_eq!(
        RetryRejection::classify(&err, 3),
        RetryRejection::NotInFailedState
    );

    let err = api.request_retry("ans-8").await.unwrap_err();
    assert_eq!(
        RetryRejection::classify(&err, 2),
        RetryRejection::BudgetExhausted { max_retries: 2 }
    );

    let err = api.request_retry("missing").await.unwrap_err();
    assert_eq!(RetryRejection::classify(&err, 3), RetryRejection::NotFound);
}
