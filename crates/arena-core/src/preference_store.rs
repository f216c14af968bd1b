//! Durable per-session preference store, the source of truth for ratings.
//! Grounded on `preference_store_redis.py` / the `RAMPreferenceStore`
//! referenced by it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::{ArenaError, ArenaResult};
use crate::preferences::Preference;

/// Subscriber wired via `bind`. `PreferenceStore` emits events one-way;
/// `RatingSystem` never holds a back-pointer, breaking the cyclic
/// reference the original expresses with duck typing.
#[async_trait]
pub trait RatingSystem: Send + Sync {
    async fn register(&self, preference: &Preference);
    /// Full rebuild: clear, then replay every preference in timestamp
    /// order.
    async fn rebuild(&self, preferences: &[Preference]);
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: Uuid) -> ArenaResult<Option<Preference>>;

    /// Edit semantics if the key existed (full rebuild signal to every
    /// bound rating system); insert semantics (single `register` event) if
    /// new.
    async fn set(&self, key: Uuid, value: Preference) -> ArenaResult<()>;

    /// Always triggers a full rebuild.
    async fn delete(&self, key: Uuid) -> ArenaResult<()>;

    /// Ascending by timestamp.
    async fn sorted_preferences(&self) -> ArenaResult<Vec<Preference>>;

    async fn accumulation_by(&self, email: &str) -> ArenaResult<f64>;

    async fn all_accumulations(&self) -> ArenaResult<HashMap<String, f64>>;

    /// Subscribe a rating system and immediately replay the current log
    /// into it.
    async fn bind(&self, rating_system: Arc<dyn RatingSystem>) -> ArenaResult<()>;
}

/// In-memory implementation, for tests and single-process deployments
/// that don't need durability across restarts.
#[derive(Default)]
pub struct InMemoryPreferenceStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    preferences: HashMap<Uuid, Preference>,
    rating_systems: Vec<Arc<dyn RatingSystem>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_locked(inner: &Inner) -> Vec<Preference> {
        let mut prefs: Vec<Preference> = inner.preferences.values().cloned().collect();
        prefs.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        prefs
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn get(&self, key: Uuid) -> ArenaResult<Option<Preference>> {
        Ok(self.inner.read().await.preferences.get(&key).cloned())
    }

    async fn set(&self, key: Uuid, value: Preference) -> ArenaResult<()> {
        let (existed, sorted, systems) = {
            let mut inner = self.inner.write().await;
            let existed = inner.preferences.insert(key, value.clone()).is_some();
            let sorted = Self::sorted_locked(&inner);
            (existed, sorted, inner.rating_systems.clone())
        };

        if existed {
            for system in &systems {
                system.rebuild(&sorted).await;
            }
        } else {
            for system in &systems {
                system.register(&value).await;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: Uuid) -> ArenaResult<()> {
        let (sorted, systems) = {
            let mut inner = self.inner.write().await;
            inner.preferences.remove(&key);
            let sorted = Self::sorted_locked(&inner);
            (sorted, inner.rating_systems.clone())
        };
        for system in &systems {
            system.rebuild(&sorted).await;
        }
        Ok(())
    }

    async fn sorted_preferences(&self) -> ArenaResult<Vec<Preference>> {
        Ok(Self::sorted_locked(&*self.inner.read().await))
    }

    async fn accumulation_by(&self, email: &str) -> ArenaResult<f64> {
        let inner = self.inner.read().await;
        Ok(inner
            .preferences
            .values()
            .filter(|p| p.author_email == email)
            .count() as f64)
    }

    async fn all_accumulations(&self) -> ArenaResult<HashMap<String, f64>> {
        let inner = self.inner.read().await;
        let mut totals: HashMap<String, f64> = HashMap::new();
        for preference in inner.preferences.values() {
            *totals.entry(preference.author_email.clone()).or_insert(0.0) += 1.0;
        }
        Ok(totals)
    }

    async fn bind(&self, rating_system: Arc<dyn RatingSystem>) -> ArenaResult<()> {
        let sorted = {
            let mut inner = self.inner.write().await;
            inner.rating_systems.push(rating_system.clone());
            Self::sorted_locked(&inner)
        };
        rating_system.rebuild(&sorted).await;
        Ok(())
    }
}

/// Redis-backed implementation. Mirrors `RedisPreferenceStore`: one hash
/// per session id under `preference:{uuid}`, a full key scan for
/// iteration.
pub struct RedisPreferenceStore {
    client: redis::Client,
    rating_systems: RwLock<Vec<Arc<dyn RatingSystem>>>,
}

impl RedisPreferenceStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            rating_systems: RwLock::new(Vec::new()),
        }
    }

    async fn connection(&self) -> ArenaResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))
    }
}

fn preference_key(id: Uuid) -> String {
    format!("preference:{id}")
}

#[async_trait]
impl PreferenceStore for RedisPreferenceStore {
    async fn get(&self, key: Uuid) -> ArenaResult<Option<Preference>> {
        let mut conn = self.connection().await?;
        let fields: Vec<Option<String>> = conn
            .hget(
                preference_key(key),
                &["games", "score", "author", "timestamp"],
            )
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;

        let [games, score, author, timestamp] = fields.try_into().unwrap_or([None, None, None, None]);
        let (Some(games), Some(score), Some(author), Some(timestamp)) = (games, score, author, timestamp)
        else {
            return Ok(None);
        };

        let games: (String, String) = serde_json::from_str(&games)
            .map_err(|error| ArenaError::InvalidInput(error.to_string()))?;
        let first_score: f64 = serde_json::from_str(&score)
            .map_err(|error| ArenaError::InvalidInput(error.to_string()))?;
        let timestamp: f64 = serde_json::from_str(&timestamp)
            .map_err(|error| ArenaError::InvalidInput(error.to_string()))?;

        Ok(Some(Preference {
            session_id: key,
            games,
            first_score,
            author_email: author,
            timestamp,
        }))
    }

    async fn set(&self, key: Uuid, value: Preference) -> ArenaResult<()> {
        let mut conn = self.connection().await?;
        let existed: bool = conn
            .exists(preference_key(key))
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;

        let fields = [
            ("games", serde_json::to_string(&value.games).unwrap()),
            ("score", serde_json::to_string(&value.first_score).unwrap()),
            ("author", value.author_email.clone()),
            ("timestamp", serde_json::to_string(&value.timestamp).unwrap()),
        ];
        let _: () = conn
            .hset_multiple(preference_key(key), &fields)
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;

        if existed {
            let sorted = self.sorted_preferences().await?;
            for system in self.rating_systems.read().await.iter() {
                system.rebuild(&sorted).await;
            }
        } else {
            for system in self.rating_systems.read().await.iter() {
                system.register(&value).await;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: Uuid) -> ArenaResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(preference_key(key))
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;
        let sorted = self.sorted_preferences().await?;
        for system in self.rating_systems.read().await.iter() {
            system.rebuild(&sorted).await;
        }
        Ok(())
    }

    async fn sorted_preferences(&self) -> ArenaResult<Vec<Preference>> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn
            .scan_match("preference:*")
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?
            .collect()
            .await;

        let mut preferences = Vec::new();
        for key in keys {
            let Some(uuid_str) = key.strip_prefix("preference:") else {
                continue;
            };
            let Ok(id) = Uuid::parse_str(uuid_str) else {
                continue;
            };
            if let Some(preference) = self.get(id).await? {
                preferences.push(preference);
            }
        }
        preferences.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Ok(preferences)
    }

    async fn accumulation_by(&self, email: &str) -> ArenaResult<f64> {
        Ok(self
            .sorted_preferences()
            .await?
            .iter()
            .filter(|p| p.author_email == email)
            .count() as f64)
    }

    async fn all_accumulations(&self) -> ArenaResult<HashMap<String, f64>> {
        let mut totals: HashMap<String, f64> = HashMap::new();
        for preference in self.sorted_preferences().await? {
            *totals.entry(preference.author_email).or_insert(0.0) += 1.0;
        }
        Ok(totals)
    }

    async fn bind(&self, rating_system: Arc<dyn RatingSystem>) -> ArenaResult<()> {
        let sorted = self.sorted_preferences().await?;
        self.rating_systems.write().await.push(rating_system.clone());
        rating_system.rebuild(&sorted).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRatingSystem {
        registers: AtomicUsize,
        rebuilds: AtomicUsize,
    }

    impl CountingRatingSystem {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                registers: AtomicUsize::new(0),
                rebuilds: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RatingSystem for CountingRatingSystem {
        async fn register(&self, _preference: &Preference) {
            self.registers.fetch_add(1, Ordering::SeqCst);
        }

        async fn rebuild(&self, _preferences: &[Preference]) {
            self.rebuilds.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pref(id: Uuid, a: &str, b: &str) -> Preference {
        Preference {
            session_id: id,
            games: (a.to_string(), b.to_string()),
            first_score: 1.0,
            author_email: "v@x.com".to_string(),
            timestamp: 1.0,
        }
    }

    #[tokio::test]
    async fn new_key_emits_register_not_rebuild() {
        let store = InMemoryPreferenceStore::new();
        let system = CountingRatingSystem::new();
        store.bind(system.clone()).await.unwrap();

        let id = Uuid::new_v4();
        store.set(id, pref(id, "a", "b")).await.unwrap();

        assert_eq!(system.registers.load(Ordering::SeqCst), 1);
        assert_eq!(system.rebuilds.load(Ordering::SeqCst), 1); // the initial bind()
    }

    #[tokio::test]
    async fn editing_existing_key_triggers_rebuild() {
        let store = InMemoryPreferenceStore::new();
        let system = CountingRatingSystem::new();
        store.bind(system.clone()).await.unwrap();

        let id = Uuid::new_v4();
        store.set(id, pref(id, "a", "b")).await.unwrap();
        store.set(id, pref(id, "a", "c")).await.unwrap();

        assert_eq!(system.registers.load(Ordering::SeqCst), 1);
        assert_eq!(system.rebuilds.load(Ordering::SeqCst), 2); // bind + edit
    }

    #[tokio::test]
    async fn delete_always_rebuilds() {
        let store = InMemoryPreferenceStore::new();
        let system = CountingRatingSystem::new();
        store.bind(system.clone()).await.unwrap();

        let id = Uuid::new_v4();
        store.set(id, pref(id, "a", "b")).await.unwrap();
        store.delete(id).await.unwrap();

        assert_eq!(system.rebuilds.load(Ordering::SeqCst), 2); // bind + delete (the set was a new key, so a register)
    }

    #[tokio::test]
    async fn accumulation_counts_by_author() {
        let store = InMemoryPreferenceStore::new();
        store.set(Uuid::new_v4(), pref(Uuid::new_v4(), "a", "b")).await.unwrap();
        store.set(Uuid::new_v4(), pref(Uuid::new_v4(), "c", "d")).await.unwrap();
        assert_eq!(store.accumulation_by("v@x.com").await.unwrap(), 2.0);
        assert_eq!(store.accumulation_by("nobody@x.com").await.unwrap(), 0.0);
    }
}
