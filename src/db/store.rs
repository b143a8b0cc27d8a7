use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::error::PullError;
use crate::run::{PullRun, RunStatus, RunTrigger};
use crate::state::{AlertState, AlertStateStore};

const RUN_COLUMNS: &str = r#"
    id, repo_name, branch, trigger_source, commit_sha, status,
    started_at, completed_at, duration_ms, output, output_truncated, error
"#;

/// Persistent run history and alert state using SQLite
#[derive(Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new run record
    pub async fn create_run(&self, run: &PullRun) -> Result<(), PullError> {
        sqlx::query(
            r#"
            INSERT INTO pull_runs (
                id, repo_name, branch, trigger_source, commit_sha,
                status, started_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.repo_name)
        .bind(&run.branch)
        .bind(run.trigger.as_str())
        .bind(&run.commit_sha)
        .bind(run.status.as_str())
        .bind(run.started_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PullError::DatabaseError(format!("Failed to create run: {}", e)))?;

        Ok(())
    }

    /// Update run status
    pub async fn update_run_status(&self, id: &str, status: RunStatus) -> Result<(), PullError> {
        sqlx::query("UPDATE pull_runs SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| PullError::DatabaseError(format!("Failed to update run status: {}", e)))?;

        Ok(())
    }

    /// Persist the final state of a run (success or failure)
    pub async fn complete_run(&self, run: &PullRun) -> Result<(), PullError> {
        sqlx::query(
            r#"
            UPDATE pull_runs
            SET status = ?,
                output = ?,
                output_truncated = ?,
                error = ?,
                completed_at = ?,
                duration_ms = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(&run.output)
        .bind(run.output_truncated)
        .bind(&run.error)
        .bind(run.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(run.duration_ms)
        .bind(&run.id)
        .execute(&self.pool)
        .await
        .map_err(|e| PullError::DatabaseError(format!("Failed to complete run: {}", e)))?;

        Ok(())
    }

    /// Get a run by ID
    pub async fn get_run(&self, id: &str) -> Result<Option<PullRun>, PullError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM pull_runs WHERE id = ?",
            RUN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PullError::DatabaseError(format!("Failed to fetch run: {}", e)))?;

        Ok(row.map(|r| r.into()))
    }

    /// Most recent runs, optionally filtered by repo and/or status
    pub async fn list_runs(
        &self,
        repo_name: Option<&str>,
        status: Option<RunStatus>,
        limit: i64,
    ) -> Result<Vec<PullRun>, PullError> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT {}
            FROM pull_runs
            WHERE (?1 IS NULL OR repo_name = ?1)
              AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC, id DESC
            LIMIT ?3
            "#,
            RUN_COLUMNS
        ))
        .bind(repo_name)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PullError::DatabaseError(format!("Failed to fetch runs: {}", e)))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Get the currently running run (if any)
    pub async fn get_current_run(&self) -> Result<Option<PullRun>, PullError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM pull_runs WHERE status = 'running' LIMIT 1",
            RUN_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PullError::DatabaseError(format!("Failed to fetch current run: {}", e)))?;

        Ok(row.map(|r| r.into()))
    }

    /// Count runs in a given status
    pub async fn count_runs(&self, status: RunStatus) -> Result<i64, PullError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pull_runs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PullError::DatabaseError(format!("Failed to count runs: {}", e)))?;

        Ok(count.0)
    }
}

#[async_trait]
impl AlertStateStore for SqlStore {
    async fn load_alert_state(&self, pipeline_uuid: &str) -> Result<AlertState, PullError> {
        let row = sqlx::query_as::<_, AlertStateRow>(
            r#"
            SELECT last_error_message, last_alert_time, pipeline_status
            FROM alert_state
            WHERE pipeline_uuid = ?
            "#,
        )
        .bind(pipeline_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PullError::DatabaseError(format!("Failed to load alert state: {}", e)))?;

        Ok(row.map(AlertState::from).unwrap_or_default())
    }

    async fn save_alert_state(
        &self,
        pipeline_uuid: &str,
        error_message: &str,
        alert_time: DateTime<Utc>,
        pipeline_status: &str,
    ) -> Result<(), PullError> {
        sqlx::query(
            r#"
            INSERT INTO alert_state (
                pipeline_uuid, last_error_message, last_alert_time, pipeline_status, updated_at
            )
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(pipeline_uuid) DO UPDATE SET
                last_error_message = excluded.last_error_message,
                last_alert_time = excluded.last_alert_time,
                pipeline_status = excluded.pipeline_status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(pipeline_uuid)
        .bind(error_message)
        .bind(alert_time.to_rfc3339())
        .bind(pipeline_status)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PullError::DatabaseError(format!("Failed to save alert state: {}", e)))?;

        Ok(())
    }

    async fn clear_alert_state(&self, pipeline_uuid: &str) -> Result<(), PullError> {
        sqlx::query(
            r#"
            UPDATE alert_state
            SET last_error_message = NULL,
                last_alert_time = NULL,
                pipeline_status = 'success',
                updated_at = ?
            WHERE pipeline_uuid = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(pipeline_uuid)
        .execute(&self.pool)
        .await
        .map_err(|e| PullError::DatabaseError(format!("Failed to clear alert state: {}", e)))?;

        Ok(())
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

// Helper struct to map DB row to AlertState
#[derive(FromRow)]
struct AlertStateRow {
    last_error_message: Option<String>,
    last_alert_time: Option<String>,
    pipeline_status: Option<String>,
}

impl From<AlertStateRow> for AlertState {
    fn from(row: AlertStateRow) -> Self {
        AlertState {
            last_error_message: row.last_error_message,
            // Unparseable times read as "never alerted"
            last_alert_time: row.last_alert_time.as_deref().and_then(parse_time),
            pipeline_status: row.pipeline_status,
        }
    }
}

// Helper struct to map DB row to PullRun
#[derive(FromRow)]
struct RunRow {
    id: String,
    repo_name: String,
    branch: String,
    trigger_source: String,
    commit_sha: Option<String>,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    output: Option<String>,
    output_truncated: Option<bool>,
    error: Option<String>,
}

impl From<RunRow> for PullRun {
    fn from(row: RunRow) -> Self {
        PullRun {
            id: row.id,
            repo_name: row.repo_name,
            branch: row.branch,
            trigger: RunTrigger::parse(&row.trigger_source),
            commit_sha: row.commit_sha,
            status: RunStatus::parse(&row.status).unwrap_or(RunStatus::Failed),
            started_at: parse_time(&row.started_at).unwrap_or_else(Utc::now),
            completed_at: row.completed_at.as_deref().and_then(parse_time),
            duration_ms: row.duration_ms,
            output: row.output,
            output_truncated: row.output_truncated.unwrap_or(false),
            error: row.error,
        }
    }
}
