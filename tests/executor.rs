mod common;

use std::sync::Arc;

use gitpuller::db::open_store;
use gitpuller::error::PullError;
use gitpuller::executor::{GitPullExecutor, PullRequest};
use gitpuller::run::{PullRun, RunStatus, RunTrigger};
use gitpuller::slack::SlackNotifier;
use gitpuller::state::{AlertStateStore, InMemoryStateStore};

use common::{fake_slack, origin_ahead_of_clone, payloads};

fn executor(url: &str, store: Arc<dyn AlertStateStore>) -> GitPullExecutor {
    GitPullExecutor::new(SlackNotifier::new(Some(url.to_string())).unwrap(), store)
}

fn missing_repo_request(dir: &tempfile::TempDir) -> PullRequest {
    PullRequest::new(
        dir.path().join("does-not-exist"),
        "git@github.com:acme/analytics.git",
    )
    .ssh_key("key")
    .ssh_dir(dir.path().join(".ssh"))
}

#[tokio::test]
async fn failure_sends_exactly_one_alert() {
    let (url, received) = fake_slack().await;
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&url, Arc::new(InMemoryStateStore::new()));

    let err = executor
        .execute_with_alerting(&missing_repo_request(&dir).workspace("DATA"))
        .await
        .unwrap_err();
    assert!(matches!(err, PullError::RepoPathMissing(_)));

    let sent = payloads(&received);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["text"], "Automate Git Pull Pipeline Failed");
    let blocks = sent[0]["blocks"].as_array().unwrap();
    assert_eq!(blocks[2]["text"]["text"], "*Repository:* `analytics`");
    assert_eq!(blocks[3]["text"]["text"], "*Workspace:* `DATA`");
    assert!(
        blocks[4]["text"]["text"]
            .as_str()
            .unwrap()
            .contains("Repo path does not exist")
    );
}

#[tokio::test]
async fn repeated_failure_is_suppressed_inside_window() {
    let (url, received) = fake_slack().await;
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&url, Arc::new(InMemoryStateStore::new()));
    let req = missing_repo_request(&dir).suppression_hours(1);

    for _ in 0..3 {
        assert!(executor.execute_with_alerting(&req).await.is_err());
    }
    assert_eq!(payloads(&received).len(), 1);

    // a different failure on the same pipeline is alerted straight away
    let other = PullRequest::new(dir.path(), "git@github.com:acme/analytics.git")
        .workspace("NOKEY")
        .ssh_dir(dir.path().join(".ssh"));
    let err = executor.execute_with_alerting(&other).await.unwrap_err();
    assert!(matches!(err, PullError::MissingKeyEnv(ref name) if name == "NOKEY_SSHKEY"));
    assert_eq!(payloads(&received).len(), 2);
}

#[tokio::test]
async fn zero_suppression_alerts_every_failure() {
    let (url, received) = fake_slack().await;
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&url, Arc::new(InMemoryStateStore::new()));
    let req = missing_repo_request(&dir).suppression_hours(0);

    for _ in 0..3 {
        assert!(executor.execute_with_alerting(&req).await.is_err());
    }
    assert_eq!(payloads(&received).len(), 3);
}

#[tokio::test]
async fn separate_pipelines_do_not_suppress_each_other() {
    let (url, received) = fake_slack().await;
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&url, Arc::new(InMemoryStateStore::new()));

    let first = missing_repo_request(&dir).pipeline_uuid("first");
    let second = missing_repo_request(&dir).pipeline_uuid("second");
    assert!(executor.execute_with_alerting(&first).await.is_err());
    assert!(executor.execute_with_alerting(&second).await.is_err());
    assert_eq!(payloads(&received).len(), 2);
}

#[tokio::test]
async fn unreachable_slack_does_not_mask_the_pull_error() {
    // Nothing listens on the discard port.
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(
        "http://127.0.0.1:9/hook",
        Arc::new(InMemoryStateStore::new()),
    );

    let err = executor
        .execute_with_alerting(&missing_repo_request(&dir))
        .await
        .unwrap_err();
    assert!(matches!(err, PullError::RepoPathMissing(_)));

    // the alert was still recorded as sent
    let state = executor
        .alerts()
        .store()
        .load_alert_state("auto_git_pull")
        .await
        .unwrap();
    assert_eq!(state.pipeline_status.as_deref(), Some("failed"));
}

#[tokio::test]
async fn successful_pull_reports_and_alerts() {
    let root = tempfile::tempdir().unwrap();
    if !origin_ahead_of_clone(root.path()) {
        eprintln!("git unavailable, skipping");
        return;
    }
    let (url, received) = fake_slack().await;
    let store = Arc::new(InMemoryStateStore::new());
    let executor = executor(&url, store.clone());
    let ssh_dir = root.path().join(".ssh");

    // seed a previous failure so we can see it cleared
    store
        .save_alert_state("auto_git_pull", "old", chrono::Utc::now(), "failed")
        .await
        .unwrap();

    let req = PullRequest::new(
        root.path().join("work"),
        root.path().join("origin").to_string_lossy().to_string(),
    )
    .branch("main")
    .ssh_key("\"dummy\\nkey\"")
    .ssh_dir(&ssh_dir);

    let report = executor.execute_with_alerting(&req).await.unwrap();
    assert_eq!(report.git_pull_status, "success");
    assert_eq!(report.workspace, "N/A");
    assert_eq!(report.key_env_var_used, "N/A");
    assert!(root.path().join("work/CHANGELOG.md").exists());
    assert!(!ssh_dir.join("deploy_key").exists());

    let sent = payloads(&received);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["text"], "Automate Git Pull Pipeline Succeeded");

    let state = store.load_alert_state("auto_git_pull").await.unwrap();
    assert!(state.last_error_message.is_none());
    assert_eq!(state.pipeline_status.as_deref(), Some("success"));
}

#[tokio::test]
async fn success_alerts_can_be_disabled() {
    let root = tempfile::tempdir().unwrap();
    if !origin_ahead_of_clone(root.path()) {
        eprintln!("git unavailable, skipping");
        return;
    }
    let (url, received) = fake_slack().await;
    let executor =
        executor(&url, Arc::new(InMemoryStateStore::new())).notify_on_success(false);

    let req = PullRequest::new(
        root.path().join("work"),
        root.path().join("origin").to_string_lossy().to_string(),
    )
    .branch("main")
    .ssh_key("dummy")
    .ssh_dir(root.path().join(".ssh"));

    executor.execute_with_alerting(&req).await.unwrap();
    assert!(payloads(&received).is_empty());
}

#[tokio::test]
async fn git_failure_alert_carries_git_output() {
    let root = tempfile::tempdir().unwrap();
    if !origin_ahead_of_clone(root.path()) {
        eprintln!("git unavailable, skipping");
        return;
    }
    let (url, received) = fake_slack().await;
    let executor = executor(&url, Arc::new(InMemoryStateStore::new()));

    let req = PullRequest::new(
        root.path().join("work"),
        root.path().join("origin").to_string_lossy().to_string(),
    )
    .branch("no-such-branch")
    .ssh_key("dummy")
    .ssh_dir(root.path().join(".ssh"));

    let err = executor.execute_with_alerting(&req).await.unwrap_err();
    assert!(matches!(err, PullError::GitPullFailed { .. }));
    assert!(!root.path().join(".ssh").join("deploy_key").exists());

    let sent = payloads(&received);
    assert_eq!(sent.len(), 1);
    let error_block = sent[0]["blocks"][3]["text"]["text"].as_str().unwrap();
    assert!(error_block.starts_with("*Error Output:*"));
    assert!(error_block.contains("no-such-branch"));
}

#[tokio::test]
async fn recorded_runs_capture_the_outcome() {
    let (url, _received) = fake_slack().await;
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path().join("gitpuller.db")).await.unwrap();
    let executor = executor(&url, Arc::new(store.clone()));

    let run = PullRun::new("analytics".into(), "master".into(), RunTrigger::Cli);
    let run_id = run.id.clone();
    store.create_run(&run).await.unwrap();

    let result = executor
        .execute_recorded(&store, run, &missing_repo_request(&dir))
        .await;
    assert!(result.is_err());

    let loaded = store.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, RunStatus::Failed);
    assert!(
        loaded
            .error
            .as_deref()
            .unwrap()
            .contains("Repo path does not exist")
    );

    // alert state went to the same SQLite database
    let state = store.load_alert_state("auto_git_pull").await.unwrap();
    assert_eq!(state.pipeline_status.as_deref(), Some("failed"));
}
