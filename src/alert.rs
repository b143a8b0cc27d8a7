//! Decides whether a failure is worth a new alert.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::state::{AlertState, AlertStateStore};

#[derive(Debug, Clone, PartialEq)]
pub enum AlertDecision {
    /// Send the alert. `previous` is what was stored before this failure.
    Send { previous: AlertState },
    /// The same error was already alerted `since` ago, inside the window.
    Suppress { since: Duration },
}

impl AlertDecision {
    pub fn should_send(&self) -> bool {
        matches!(self, AlertDecision::Send { .. })
    }
}

#[derive(Clone)]
pub struct AlertManager {
    store: Arc<dyn AlertStateStore>,
}

impl AlertManager {
    pub fn new(store: Arc<dyn AlertStateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AlertStateStore> {
        &self.store
    }

    /// A different error, or the same one once `suppression_hours` have
    /// passed, is alerted. A window of zero never suppresses.
    pub async fn should_send_alert(
        &self,
        pipeline_uuid: &str,
        current_error: &str,
        suppression_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<AlertDecision> {
        let previous = self.store.load_alert_state(pipeline_uuid).await?;
        Ok(decide(previous, current_error, suppression_hours, now))
    }

    pub async fn save_alert_state(
        &self,
        pipeline_uuid: &str,
        error_message: &str,
        alert_time: DateTime<Utc>,
        pipeline_status: &str,
    ) -> Result<()> {
        self.store
            .save_alert_state(pipeline_uuid, error_message, alert_time, pipeline_status)
            .await
    }

    pub async fn clear_alert_state(&self, pipeline_uuid: &str) -> Result<()> {
        self.store.clear_alert_state(pipeline_uuid).await
    }
}

fn decide(
    previous: AlertState,
    current_error: &str,
    suppression_hours: u32,
    now: DateTime<Utc>,
) -> AlertDecision {
    let last_error = previous.last_error_message.clone().unwrap_or_default();
    let Some(last_alert_time) = previous.last_alert_time else {
        return AlertDecision::Send { previous };
    };

    if last_error.is_empty() || last_error != current_error {
        return AlertDecision::Send { previous };
    }

    let since = now - last_alert_time;
    if since >= Duration::hours(i64::from(suppression_hours)) {
        AlertDecision::Send { previous }
    } else {
        AlertDecision::Suppress { since }
    }
}
