//! Durable per-game report log plus the excluded-games set. Grounded on
//! `report_store_redis.py`.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::errors::{ArenaError, ArenaResult};
use crate::preferences::Report;

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn get(&self, team_id: &str) -> ArenaResult<Vec<Report>>;

    /// Append a report, returning the new length of that game's log.
    async fn append(&self, team_id: &str, report: Report) -> ArenaResult<usize>;

    async fn delete(&self, team_id: &str) -> ArenaResult<()>;

    async fn exclude(&self, team_id: &str) -> ArenaResult<()>;

    async fn include(&self, team_id: &str) -> ArenaResult<()>;

    async fn is_excluded(&self, team_id: &str) -> ArenaResult<bool>;

    async fn excluded_games(&self) -> ArenaResult<HashSet<String>>;
}

#[derive(Default)]
struct Inner {
    reports: std::collections::HashMap<String, Vec<Report>>,
    excluded: HashSet<String>,
}

/// In-memory implementation, used by tests and the `elo_pair` strategy in
/// single-process deployments.
#[derive(Default)]
pub struct InMemoryReportStore {
    inner: Mutex<Inner>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn get(&self, team_id: &str) -> ArenaResult<Vec<Report>> {
        Ok(self.lock().reports.get(team_id).cloned().unwrap_or_default())
    }

    async fn append(&self, team_id: &str, report: Report) -> ArenaResult<usize> {
        let mut inner = self.lock();
        let entry = inner.reports.entry(team_id.to_string()).or_default();
        entry.push(report);
        Ok(entry.len())
    }

    async fn delete(&self, team_id: &str) -> ArenaResult<()> {
        self.lock().reports.remove(team_id);
        Ok(())
    }

    async fn exclude(&self, team_id: &str) -> ArenaResult<()> {
        self.lock().excluded.insert(team_id.to_string());
        Ok(())
    }

    async fn include(&self, team_id: &str) -> ArenaResult<()> {
        self.lock().excluded.remove(team_id);
        Ok(())
    }

    async fn is_excluded(&self, team_id: &str) -> ArenaResult<bool> {
        Ok(self.lock().excluded.contains(team_id))
    }

    async fn excluded_games(&self) -> ArenaResult<HashSet<String>> {
        Ok(self.lock().excluded.clone())
    }
}

/// Redis-backed implementation: one list per team under `report:{team_id}`,
/// one set for exclusions under `excluded_games`.
pub struct RedisReportStore {
    client: redis::Client,
}

impl RedisReportStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn connection(&self) -> ArenaResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))
    }
}

fn report_key(team_id: &str) -> String {
    format!("report:{team_id}")
}

const EXCLUDED_GAMES_KEY: &str = "excluded_games";

#[async_trait]
impl ReportStore for RedisReportStore {
    async fn get(&self, team_id: &str) -> ArenaResult<Vec<Report>> {
        let mut conn = self.connection().await?;
        let raw: Vec<String> = conn
            .lrange(report_key(team_id), 0, -1)
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;
        raw.into_iter()
            .map(|entry| {
                serde_json::from_str(&entry).map_err(|error| ArenaError::InvalidInput(error.to_string()))
            })
            .collect()
    }

    async fn append(&self, team_id: &str, report: Report) -> ArenaResult<usize> {
        let mut conn = self.connection().await?;
        let encoded = serde_json::to_string(&report)
            .map_err(|error| ArenaError::InvalidInput(error.to_string()))?;
        let new_len: usize = conn
            .rpush(report_key(team_id), encoded)
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;
        Ok(new_len)
    }

    async fn delete(&self, team_id: &str) -> ArenaResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(report_key(team_id))
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;
        Ok(())
    }

    async fn exclude(&self, team_id: &str) -> ArenaResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .sadd(EXCLUDED_GAMES_KEY, team_id)
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;
        Ok(())
    }

    async fn include(&self, team_id: &str) -> ArenaResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .srem(EXCLUDED_GAMES_KEY, team_id)
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;
        Ok(())
    }

    async fn is_excluded(&self, team_id: &str) -> ArenaResult<bool> {
        let mut conn = self.connection().await?;
        let excluded: bool = conn
            .sismember(EXCLUDED_GAMES_KEY, team_id)
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;
        Ok(excluded)
    }

    async fn excluded_games(&self) -> ArenaResult<HashSet<String>> {
        let mut conn = self.connection().await?;
        let members: HashSet<String> = conn
            .smembers(EXCLUDED_GAMES_KEY)
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::ShortReason;
    use uuid::Uuid;

    fn report(author: &str) -> Report {
        Report {
            session_id: Uuid::new_v4(),
            short_reason: ShortReason::Buggy,
            reason: "crashes on start".to_string(),
            output: None,
            author_email: author.to_string(),
        }
    }

    #[tokio::test]
    async fn append_returns_new_length() {
        let store = InMemoryReportStore::new();
        assert_eq!(store.append("t1", report("a@x.com")).await.unwrap(), 1);
        assert_eq!(store.append("t1", report("b@x.com")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn exclude_include_roundtrip() {
        let store = InMemoryReportStore::new();
        assert!(!store.is_excluded("t1").await.unwrap());
        store.exclude("t1").await.unwrap();
        assert!(store.is_excluded("t1").await.unwrap());
        assert!(store.excluded_games().await.unwrap().contains("t1"));
        store.include("t1").await.unwrap();
        assert!(!store.is_excluded("t1").await.unwrap());
    }

    #[tokio::test]
    async fn delete_clears_log_but_not_exclusion() {
        let store = InMemoryReportStore::new();
        store.append("t1", report("a@x.com")).await.unwrap();
        store.exclude("t1").await.unwrap();
        store.delete("t1").await.unwrap();
        assert!(store.get("t1").await.unwrap().is_empty());
        assert!(store.is_excluded("t1").await.unwrap());
    }
}
