//! Alert suppression state, keyed by pipeline.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub last_error_message: Option<String>,
    pub last_alert_time: Option<DateTime<Utc>>,
    pub pipeline_status: Option<String>,
}

impl AlertState {
    pub fn failed(error_message: &str, alert_time: DateTime<Utc>, pipeline_status: &str) -> Self {
        Self {
            last_error_message: Some(error_message.to_string()),
            last_alert_time: Some(alert_time),
            pipeline_status: Some(pipeline_status.to_string()),
        }
    }

    pub fn cleared() -> Self {
        Self {
            last_error_message: None,
            last_alert_time: None,
            pipeline_status: Some("success".to_string()),
        }
    }
}

/// Backend that remembers the last alert per pipeline.
#[async_trait]
pub trait AlertStateStore: Send + Sync {
    /// Unknown pipelines load as an empty state.
    async fn load_alert_state(&self, pipeline_uuid: &str) -> Result<AlertState>;

    async fn save_alert_state(
        &self,
        pipeline_uuid: &str,
        error_message: &str,
        alert_time: DateTime<Utc>,
        pipeline_status: &str,
    ) -> Result<()>;

    async fn clear_alert_state(&self, pipeline_uuid: &str) -> Result<()>;
}

/// Process-local store. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    state: Mutex<HashMap<String, AlertState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStateStore for InMemoryStateStore {
    async fn load_alert_state(&self, pipeline_uuid: &str) -> Result<AlertState> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.get(pipeline_uuid).cloned().unwrap_or_default())
    }

    async fn save_alert_state(
        &self,
        pipeline_uuid: &str,
        error_message: &str,
        alert_time: DateTime<Utc>,
        pipeline_status: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.insert(
            pipeline_uuid.to_string(),
            AlertState::failed(error_message, alert_time, pipeline_status),
        );
        Ok(())
    }

    async fn clear_alert_state(&self, pipeline_uuid: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = state.get_mut(pipeline_uuid) {
            *entry = AlertState::cleared();
        }
        Ok(())
    }
}
