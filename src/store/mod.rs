//! Identity store and usage ledger.
//!
//! A thin `sqlx::SqlitePool` wrapper, following the pool-holding
//! repository shape of the teacher's `SessionManager`
//! (`src/ai/session_manager.rs`): one struct holding a pool, one method
//! per operation, schema created with `CREATE TABLE IF NOT EXISTS` at
//! startup rather than a separate migration step.

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    pub name: String,
    pub api_key: String,
    pub leaderboard: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Prompt,
    Completion,
}

impl UsageKind {
    fn as_str(&self) -> &'static str {
        match self {
            UsageKind::Prompt => "prompt",
            UsageKind::Completion => "completion",
        }
    }
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS api_keys (
                name TEXT UNIQUE NOT NULL,
                api_key TEXT UNIQUE NOT NULL,
                leaderboard BOOLEAN NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_api_keys_key ON api_keys (api_key)")
            .execute(&pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS usage (
                name TEXT NOT NULL,
                time REAL NOT NULL,
                tokens INTEGER NOT NULL,
                type TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_usage_name ON usage (name)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_usage_type ON usage (type)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    // -- Identity store --------------------------------------------------

    pub async fn lookup(&self, api_key: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT name, api_key, leaderboard FROM api_keys WHERE api_key = ?",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(name, api_key, leaderboard)| ApiKeyRecord {
            name,
            api_key,
            leaderboard,
        }))
    }

    pub async fn create_key(&self, name: &str, api_key: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO api_keys (name, api_key, leaderboard) VALUES (?, ?, 0)")
            .bind(name)
            .bind(api_key)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::NameExists(name.to_string())
                }
                _ => StoreError::Database(e),
            })?;
        Ok(())
    }

    pub async fn update_key(&self, name: &str, api_key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE api_keys SET api_key = ? WHERE name = ?")
            .bind(api_key)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_key(&self, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_keys(&self) -> Result<Vec<ApiKeyRecord>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT name, api_key, leaderboard FROM api_keys ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, api_key, leaderboard)| ApiKeyRecord {
                name,
                api_key,
                leaderboard,
            })
            .collect())
    }

    // -- Usage ledger ------------------------------------------------------

    pub async fn record_usage(
        &self,
        name: &str,
        tokens: i64,
        kind: UsageKind,
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        sqlx::query("INSERT INTO usage (name, time, tokens, type) VALUES (?, ?, ?, ?)")
            .bind(name)
            .bind(now)
            .bind(tokens)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Per-caller summary: name and most recent usage timestamp, mirroring
    /// the original CLI's flat `usage` dump.
    pub async fn usage_summary(&self) -> Result<Vec<(String, f64)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, f64)>(
            "SELECT name, MAX(time) FROM usage GROUP BY name ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
