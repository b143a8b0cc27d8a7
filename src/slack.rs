//! Slack incoming-webhook notifier.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{PullError, Result};

/// Env var consulted when no webhook URL is configured.
pub const WEBHOOK_URL_ENV: &str = "CDM_SLACK_WEBHOOK_URL";
/// Longest output excerpt placed in a message.
pub const MAX_OUTPUT_CHARS: usize = 1500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    /// Use `webhook_url`, or fall back to `CDM_SLACK_WEBHOOK_URL`.
    pub fn new(webhook_url: Option<String>) -> Result<Self> {
        let webhook_url = webhook_url
            .filter(|u| !u.is_empty())
            .or_else(|| std::env::var(WEBHOOK_URL_ENV).ok().filter(|u| !u.is_empty()))
            .ok_or(PullError::MissingWebhookUrl)?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            webhook_url,
            client,
        })
    }

    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    /// POST a Block Kit payload to the webhook.
    pub async fn send(&self, payload: &Value) -> Result<()> {
        debug!("Posting Slack payload: {}", payload);
        self.client
            .post(&self.webhook_url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        info!("Alert sent to Slack");
        Ok(())
    }

    pub async fn send_failure(
        &self,
        repo_name: &str,
        workspace_name: Option<&str>,
        error_output: &str,
    ) -> Result<()> {
        self.send(&failure_payload(repo_name, workspace_name, error_output))
            .await
    }

    pub async fn send_success(
        &self,
        repo_name: &str,
        workspace_name: Option<&str>,
        branch: &str,
        output: &str,
    ) -> Result<()> {
        self.send(&success_payload(repo_name, workspace_name, branch, output))
            .await
    }
}

/// First `max` characters of `s`, never splitting a UTF-8 sequence.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn header(text: &str) -> Value {
    json!({
        "type": "header",
        "text": { "type": "plain_text", "text": text }
    })
}

fn section(markdown: String) -> Value {
    json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": markdown }
    })
}

fn summary_blocks(title: &str, repo_name: &str, workspace_name: Option<&str>) -> Vec<Value> {
    let mut blocks = vec![
        header(title),
        json!({ "type": "divider" }),
        section(format!("*Repository:* `{}`", repo_name)),
    ];
    if let Some(workspace) = workspace_name {
        blocks.push(section(format!("*Workspace:* `{}`", workspace)));
    }
    blocks
}

pub fn failure_payload(repo_name: &str, workspace_name: Option<&str>, error_output: &str) -> Value {
    let mut blocks = summary_blocks(
        ":alert: Automate Git Pull Pipeline Failed :alert:",
        repo_name,
        workspace_name,
    );
    if !error_output.is_empty() {
        blocks.push(section(format!(
            "*Error Output:*\n```{}```",
            truncate_chars(error_output, MAX_OUTPUT_CHARS)
        )));
    }

    json!({
        "text": "Automate Git Pull Pipeline Failed",
        "blocks": blocks,
    })
}

pub fn success_payload(
    repo_name: &str,
    workspace_name: Option<&str>,
    branch: &str,
    output: &str,
) -> Value {
    let mut blocks = summary_blocks(
        ":white_check_mark: Automate Git Pull Pipeline Succeeded",
        repo_name,
        workspace_name,
    );
    blocks.push(section(format!("*Branch:* `{}`", branch)));
    let output = output.trim();
    if !output.is_empty() {
        blocks.push(section(format!(
            "*Output:*\n```{}```",
            truncate_chars(output, MAX_OUTPUT_CHARS)
        )));
    }

    json!({
        "text": "Automate Git Pull Pipeline Succeeded",
        "blocks": blocks,
    })
}
