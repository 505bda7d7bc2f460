//! SQLite-based build history store

use crate::core::ExecutionStatus;
use crate::persistence::{ArtifactRecord, BuildSummary, PersistenceBackend};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SUMMARY_COLUMNS: &str = "id, workspace, status, started_at, completed_at, total_tasks, \
     completed_tasks, total_components, failed_components, artifact_count";

/// SQLite build store
pub struct SqliteBuildStore {
    pool: SqlitePool,
}

impl SqliteBuildStore {
    /// Open (creating if needed) a store at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open build history at {}", db_path.display()))?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Default database location under the user's local data dir
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("capsule-builder")
            .join("builds.db")
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let db_path = Self::default_path();
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Self::new(&db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS builds (
                id TEXT PRIMARY KEY,
                workspace TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                total_tasks INTEGER NOT NULL DEFAULT 0,
                completed_tasks INTEGER NOT NULL DEFAULT 0,
                total_components INTEGER NOT NULL DEFAULT 0,
                failed_components INTEGER NOT NULL DEFAULT 0,
                artifact_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS artifacts (
                run_id TEXT NOT NULL,
                component TEXT NOT NULL,
                path TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                task TEXT NOT NULL,
                compiler TEXT,
                artifact_name TEXT NOT NULL,
                PRIMARY KEY (run_id, component, path)
            );

            CREATE INDEX IF NOT EXISTS idx_builds_workspace ON builds(workspace);
            CREATE INDEX IF NOT EXISTS idx_builds_started_at ON builds(started_at);
            CREATE INDEX IF NOT EXISTS idx_artifacts_hash ON artifacts(content_hash);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize build history schema")?;

        Ok(())
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn summary_from_row(row: &SqliteRow) -> Result<BuildSummary> {
        let status: String = row.get("status");
        Ok(BuildSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            workspace: row.get("workspace"),
            status: ExecutionStatus::parse(&status)
                .with_context(|| format!("Unknown build status '{}'", status))?,
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            total_tasks: row.get::<i64, _>("total_tasks") as usize,
            completed_tasks: row.get::<i64, _>("completed_tasks") as usize,
            total_components: row.get::<i64, _>("total_components") as usize,
            failed_components: row.get::<i64, _>("failed_components") as usize,
            artifact_count: row.get::<i64, _>("artifact_count") as usize,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteBuildStore {
    async fn save_build(&self, summary: &BuildSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO builds
            (id, workspace, status, started_at, completed_at, total_tasks,
             completed_tasks, total_components, failed_components, artifact_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(summary.run_id.to_string())
        .bind(&summary.workspace)
        .bind(summary.status.as_str())
        .bind(summary.started_at.naive_utc())
        .bind(summary.completed_at.map(|t| t.naive_utc()))
        .bind(summary.total_tasks as i64)
        .bind(summary.completed_tasks as i64)
        .bind(summary.total_components as i64)
        .bind(summary.failed_components as i64)
        .bind(summary.artifact_count as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save build")?;

        Ok(())
    }

    async fn save_artifacts(&self, run_id: Uuid, artifacts: &[ArtifactRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM artifacts WHERE run_id = ?1")
            .bind(run_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to clear artifacts")?;

        for record in artifacts {
            sqlx::query(
                r#"
                INSERT INTO artifacts
                (run_id, component, path, content_hash, task, compiler, artifact_name)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(run_id.to_string())
            .bind(&record.component)
            .bind(&record.path)
            .bind(&record.content_hash)
            .bind(&record.task)
            .bind(&record.compiler)
            .bind(&record.artifact_name)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to save artifact {}", record.path))?;
        }

        tx.commit().await.context("Failed to commit artifacts")?;
        Ok(())
    }

    async fn load_build(&self, run_id: Uuid) -> Result<Option<BuildSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM builds WHERE id = ?1", SUMMARY_COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load build")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_builds(&self, workspace: Option<&str>, limit: usize) -> Result<Vec<BuildSummary>> {
        let rows = match workspace {
            Some(workspace) => {
                sqlx::query(&format!(
                    "SELECT {} FROM builds WHERE workspace = ?1 ORDER BY started_at DESC LIMIT ?2",
                    SUMMARY_COLUMNS
                ))
                .bind(workspace)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM builds ORDER BY started_at DESC LIMIT ?1",
                    SUMMARY_COLUMNS
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list builds")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn load_artifacts(&self, run_id: Uuid) -> Result<Vec<ArtifactRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, component, path, content_hash, task, compiler, artifact_name
            FROM artifacts
            WHERE run_id = ?1
            ORDER BY component ASC, path ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load artifacts")?;

        rows.iter()
            .map(|row| {
                Ok(ArtifactRecord {
                    run_id: Uuid::parse_str(&row.get::<String, _>("run_id"))?,
                    component: row.get("component"),
                    path: row.get("path"),
                    content_hash: row.get("content_hash"),
                    task: row.get("task"),
                    compiler: row.get("compiler"),
                    artifact_name: row.get("artifact_name"),
                })
            })
            .collect()
    }

    async fn list_workspaces(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT workspace FROM builds ORDER BY workspace ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list workspaces")?;

        Ok(rows.iter().map(|row| row.get("workspace")).collect())
    }
}
