//! Persistent storage for arm statistics
//!
//! SQLite-backed persistence so the selector keeps its learning across
//! process restarts. Task records and logs are deliberately not persisted
//! here; retention of those is an external concern.

use std::collections::HashMap;
use std::path::Path;

use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::types::{ArmKey, ArmStatistics};

/// SQL to create the arm statistics table
pub const CREATE_ARM_STATS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS arm_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL,
    model_id TEXT NOT NULL,
    pulls INTEGER NOT NULL DEFAULT 0,
    reward_sum REAL NOT NULL DEFAULT 0.0,
    mean_reward REAL NOT NULL DEFAULT 0.0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(agent_id, model_id)
);

CREATE INDEX IF NOT EXISTS idx_arm_stats_agent ON arm_stats(agent_id);
"#;

/// Store for persisting arm statistics
pub struct SelectorStore {
    pool: SqlitePool,
}

impl SelectorStore {
    /// Create a new store from an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new store and connect to the database
    pub async fn connect(database_path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", database_path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(Error::DatabaseError)?;
        Ok(Self { pool })
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_ARM_STATS_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;
        info!("Arm statistics table initialized");
        Ok(())
    }

    /// Save or update statistics for one arm
    pub async fn save_stats(&self, arm: &ArmKey, stats: &ArmStatistics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO arm_stats (agent_id, model_id, pulls, reward_sum, mean_reward, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(agent_id, model_id) DO UPDATE SET
                pulls = excluded.pulls,
                reward_sum = excluded.reward_sum,
                mean_reward = excluded.mean_reward,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&arm.agent_id)
        .bind(&arm.model_id)
        .bind(stats.pulls as i64)
        .bind(stats.reward_sum)
        .bind(stats.mean_reward)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        debug!(arm = %arm, pulls = stats.pulls, "Saved arm statistics");
        Ok(())
    }

    /// Save every arm's statistics atomically
    pub async fn save_all_stats(&self, stats: &HashMap<ArmKey, ArmStatistics>) -> Result<()> {
        if stats.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(Error::DatabaseError)?;
        for (arm, s) in stats {
            sqlx::query(
                r#"
                INSERT INTO arm_stats (agent_id, model_id, pulls, reward_sum, mean_reward, updated_at)
                VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT(agent_id, model_id) DO UPDATE SET
                    pulls = excluded.pulls,
                    reward_sum = excluded.reward_sum,
                    mean_reward = excluded.mean_reward,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(&arm.agent_id)
            .bind(&arm.model_id)
            .bind(s.pulls as i64)
            .bind(s.reward_sum)
            .bind(s.mean_reward)
            .execute(&mut *tx)
            .await
            .map_err(Error::DatabaseError)?;
        }
        tx.commit().await.map_err(Error::DatabaseError)?;

        info!(count = stats.len(), "Saved arm statistics");
        Ok(())
    }

    /// Load all persisted arm statistics
    pub async fn load_all_stats(&self) -> Result<HashMap<ArmKey, ArmStatistics>> {
        let rows = sqlx::query("SELECT agent_id, model_id, pulls, reward_sum, mean_reward FROM arm_stats")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        let mut stats = HashMap::with_capacity(rows.len());
        for row in rows {
            let arm = ArmKey::new(
                row.get::<String, _>("agent_id"),
                row.get::<String, _>("model_id"),
            );
            stats.insert(
                arm,
                ArmStatistics {
                    pulls: row.get::<i64, _>("pulls") as u64,
                    reward_sum: row.get::<f64, _>("reward_sum"),
                    mean_reward: row.get::<f64, _>("mean_reward"),
                    last_updated: chrono::Utc::now(),
                },
            );
        }

        debug!(count = stats.len(), "Loaded arm statistics");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (SelectorStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SelectorStore::connect(&dir.path().join("stats.db"))
            .await
            .unwrap();
        store.init().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let (store, _dir) = test_store().await;

        let arm = ArmKey::new("knowledge", "llama-3.1-8b-instant");
        let mut stats = ArmStatistics::default();
        stats.record(0.8);
        stats.record(0.6);

        store.save_stats(&arm, &stats).await.unwrap();

        let loaded = store.load_all_stats().await.unwrap();
        let restored = loaded.get(&arm).unwrap();
        assert_eq!(restored.pulls, 2);
        assert!((restored.mean_reward - 0.7).abs() < 1e-9);
        assert!((restored.reward_sum - 1.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_save_is_an_upsert() {
        let (store, _dir) = test_store().await;

        let arm = ArmKey::new("mentor", "default");
        let mut stats = ArmStatistics::default();
        stats.record(0.2);
        store.save_stats(&arm, &stats).await.unwrap();

        stats.record(1.0);
        store.save_stats(&arm, &stats).await.unwrap();

        let loaded = store.load_all_stats().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(&arm).unwrap().pulls, 2);
    }

    #[tokio::test]
    async fn test_save_all_stats_atomic() {
        let (store, _dir) = test_store().await;

        let mut all = HashMap::new();
        for i in 0..5 {
            let mut stats = ArmStatistics::default();
            stats.record(i as f64 / 10.0);
            all.insert(ArmKey::new(format!("agent-{i}"), "m"), stats);
        }

        store.save_all_stats(&all).await.unwrap();
        let loaded = store.load_all_stats().await.unwrap();
        assert_eq!(loaded.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_save_is_noop() {
        let (store, _dir) = test_store().await;
        store.save_all_stats(&HashMap::new()).await.unwrap();
        assert!(store.load_all_stats().await.unwrap().is_empty());
    }
}
