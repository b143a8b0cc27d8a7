mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gitpuller::db::open_store;
use gitpuller::executor::GitPullExecutor;
use gitpuller::rate_limit::RateLimiter;
use gitpuller::slack::SlackNotifier;
use gitpuller::{AppState, SharedState, parse_config};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use tokio::sync::Mutex;

use common::{Received, fake_slack, payloads};

struct TestServer {
    base: String,
    client: reqwest::Client,
    received: Received,
    state: SharedState,
    _dir: tempfile::TempDir,
}

async fn start_server() -> TestServer {
    let (slack_url, received) = fake_slack().await;
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");

    let config = parse_config(&format!(
        r#"
[alerting]
suppression_hours = 0
ssh_dir = "{ssh}"

[[repo]]
name = "etl"
repo_path = "{missing}"
git_url = "git@github.com:acme/etl.git"
branch = "main"

[[repo]]
name = "secure"
repo_path = "{missing}"
git_url = "git@github.com:acme/secure.git"
webhook_secret = "s3cret"

[[repo]]
name = "throttled"
repo_path = "{missing}"
git_url = "git@github.com:acme/throttled.git"
rate_limit = 1
rate_limit_window = 3600
"#,
        ssh = dir.path().join(".ssh").display(),
        missing = missing.display(),
    ))
    .unwrap();

    let store = open_store(dir.path().join("gitpuller.db")).await.unwrap();
    let executor = GitPullExecutor::new(
        SlackNotifier::new(Some(slack_url)).unwrap(),
        Arc::new(store.clone()),
    );

    let state = Arc::new(AppState {
        execution_lock: Mutex::new(()),
        rate_limiter: Mutex::new(RateLimiter::new()),
        executor,
        store,
        config,
        start_time: Instant::now(),
        started_at: Utc::now(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = gitpuller::api::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        received,
        state,
        _dir: dir,
    }
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn push_body(repo: &str, branch: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "ref": format!("refs/heads/{}", branch),
        "after": "abc123",
        "repository": { "name": repo }
    }))
    .unwrap()
}

async fn wait_for_completion(server: &TestServer, run_id: &str) -> Value {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let run: Value = server
            .client
            .get(format!("{}/api/runs/{}", server.base, run_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if !run["completed_at"].is_null() {
            return run;
        }
        assert!(Instant::now() < deadline, "run {} never completed", run_id);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn status_reports_configured_repos() {
    let server = start_server().await;
    let body: Value = server
        .client
        .get(format!("{}/status", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["server"]["name"], "gitpuller");
    assert_eq!(body["config"]["total_repos"], 3);
    assert_eq!(body["runs"]["failed"], 0);
}

#[tokio::test]
async fn non_push_and_unknown_repos_are_ignored() {
    let server = start_server().await;

    let resp = server
        .client
        .post(format!("{}/webhook", server.base))
        .header("X-GitHub-Event", "ping")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = server
        .client
        .post(format!("{}/webhook", server.base))
        .header("X-GitHub-Event", "push")
        .body(push_body("etl", "feature"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = server
        .client
        .post(format!("{}/webhook", server.base))
        .header("X-GitHub-Event", "push")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn signed_repos_reject_bad_signatures() {
    let server = start_server().await;
    let body = push_body("secure", "master");

    let resp = server
        .client
        .post(format!("{}/webhook", server.base))
        .header("X-GitHub-Event", "push")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = server
        .client
        .post(format!("{}/webhook", server.base))
        .header("X-GitHub-Event", "push")
        .header("X-Hub-Signature-256", sign("wrong", &body))
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = server
        .client
        .post(format!("{}/webhook", server.base))
        .header("X-GitHub-Event", "push")
        .header("X-Hub-Signature-256", sign("s3cret", &body))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
}

#[tokio::test]
async fn webhook_push_runs_in_background_and_is_recorded() {
    let server = start_server().await;

    let resp = server
        .client
        .post(format!("{}/webhook", server.base))
        .header("X-GitHub-Event", "push")
        .body(push_body("etl", "main"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let run_id = body["run_id"].as_str().unwrap().to_string();

    let run = wait_for_completion(&server, &run_id).await;
    assert_eq!(run["status"], "failed");
    assert_eq!(run["trigger"], "webhook");
    assert_eq!(run["commit_sha"], "abc123");
    assert_eq!(payloads(&server.received).len(), 1);
}

#[tokio::test]
async fn manual_trigger_waits_for_the_result() {
    let server = start_server().await;

    let resp = server
        .client
        .post(format!("{}/api/pull/etl?wait=true", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("Repo path does not exist")
    );

    let runs: Value = server
        .client
        .get(format!("{}/api/runs?repo=etl&status=failed", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(runs["total"], 1);
    assert_eq!(runs["runs"][0]["trigger"], "manual");
    assert_eq!(payloads(&server.received).len(), 1);
}

#[tokio::test]
async fn unknown_routes_and_filters_are_rejected() {
    let server = start_server().await;

    let resp = server
        .client
        .post(format!("{}/api/pull/nope", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = server
        .client
        .get(format!("{}/api/runs/does-not-exist", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = server
        .client
        .get(format!("{}/api/runs?status=bogus", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn webhook_rate_limit_rejects_extra_pushes() {
    let server = start_server().await;

    let push = || {
        server
            .client
            .post(format!("{}/webhook", server.base))
            .header("X-GitHub-Event", "push")
            .body(push_body("throttled", "master"))
            .send()
    };

    let first = push().await.unwrap();
    assert_eq!(first.status(), 202);
    let second = push().await.unwrap();
    assert_eq!(second.status(), 429);
}

#[tokio::test]
async fn waited_trigger_completes_after_client_gives_up() {
    let server = start_server().await;

    // Hold the execution lock so the pull cannot start before the client leaves
    let lock = server.state.execution_lock.lock().await;
    let result = server
        .client
        .post(format!("{}/api/pull/etl?wait=true", server.base))
        .timeout(Duration::from_millis(300))
        .send()
        .await;
    assert!(result.is_err());
    drop(lock);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let runs: Value = server
            .client
            .get(format!("{}/api/runs?repo=etl", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if runs["total"] == 1 && !runs["runs"][0]["completed_at"].is_null() {
            assert_eq!(runs["runs"][0]["status"], "failed");
            break;
        }
        assert!(Instant::now() < deadline, "manual run never completed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(payloads(&server.received).len(), 1);
}
