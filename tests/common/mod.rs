#![allow(dead_code)]

use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};

use axum::{Json, Router, extract::State, routing::post};
use serde_json::Value;

pub type Received = Arc<Mutex<Vec<Value>>>;

/// A local stand-in for a Slack incoming webhook that records every payload.
pub async fn fake_slack() -> (String, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route(
            "/hook",
            post(
                |State(received): State<Received>, Json(payload): Json<Value>| async move {
                    received.lock().unwrap().push(payload);
                    "ok"
                },
            ),
        )
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/hook", addr), received)
}

pub fn payloads(received: &Received) -> Vec<Value> {
    received.lock().unwrap().clone()
}

fn git(dir: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.name=gitpuller tests",
            "-c",
            "user.email=tests@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Creates `origin` with one commit on `main`, clones it into `work`, then adds
/// a second commit to `origin` so that pulling `work` fast-forwards.
/// Returns false when git is unavailable or any step fails.
pub fn origin_ahead_of_clone(root: &Path) -> bool {
    let origin = root.join("origin");
    if std::fs::create_dir_all(&origin).is_err() {
        return false;
    }
    let origin_str = origin.to_string_lossy().to_string();

    git(&origin, &["init", "-q"])
        && std::fs::write(origin.join("README.md"), "one\n").is_ok()
        && git(&origin, &["add", "."])
        && git(&origin, &["commit", "-q", "-m", "init"])
        && git(&origin, &["branch", "-M", "main"])
        && git(root, &["clone", "-q", &origin_str, "work"])
        && std::fs::write(origin.join("CHANGELOG.md"), "two\n").is_ok()
        && git(&origin, &["add", "."])
        && git(&origin, &["commit", "-q", "-m", "second"])
}
