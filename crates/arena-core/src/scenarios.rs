//! Scenario tests (spec §8, S1-S6): the same stories exercised per-module
//! elsewhere, but driven end to end through the public API the way a
//! caller would use it, wiring `PreferenceStore` to `EloEngine` and
//! `SessionManager` to `FakeContainerRuntime` rather than poking internals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::container::ContainerRuntime;
use crate::container::fake::FakeContainerRuntime;
use crate::elo::EloEngine;
use crate::game::{ContainerLimits, GameMeta};
use crate::launcher::Catalogue;
use crate::pairing::RandomStrategy;
use crate::preference_store::{InMemoryPreferenceStore, PreferenceStore, RatingSystem};
use crate::preferences::Preference;
use crate::replay_stream::ReplayStream;
use crate::session_manager::{SessionManager, SessionManagerConfig};
use crate::team::Team;

struct BoundElo {
    engine: Arc<EloEngine>,
    owners: HashMap<String, String>,
}

#[async_trait]
impl RatingSystem for BoundElo {
    async fn register(&self, preference: &Preference) {
        self.engine
            .register(preference, self.owns_either(preference))
            .await;
    }

    async fn rebuild(&self, preferences: &[Preference]) {
        self.engine
            .replay(preferences, |p| self.owns_either(p))
            .await;
    }
}

impl BoundElo {
    fn owns_either(&self, preference: &Preference) -> bool {
        self.owners.get(&preference.author_email) == Some(&preference.games.0)
            || self.owners.get(&preference.author_email) == Some(&preference.games.1)
    }
}

fn catalogue_with(team_ids: &[&str]) -> Catalogue {
    let mut catalogue = Catalogue::new();
    for id in team_ids {
        catalogue.upsert_game(GameMeta {
            name: format!("game-{id}"),
            team_id: (*id).to_string(),
            entrypoint_file: "main.py".to_string(),
        });
    }
    catalogue
}

fn pref(games: (&str, &str), score: f64, author: &str, ts: f64) -> Preference {
    Preference {
        session_id: Uuid::new_v4(),
        games: (games.0.to_string(), games.1.to_string()),
        first_score: score,
        author_email: author.to_string(),
        timestamp: ts,
    }
}

/// S1 — three games, three votes, no self-interest: ratings move by the
/// plain Elo update in submission order.
#[tokio::test]
async fn s1_simple_elo_round_through_preference_store() {
    let engine = Arc::new(EloEngine::new());
    let store = InMemoryPreferenceStore::new();
    store
        .bind(Arc::new(BoundElo {
            engine: engine.clone(),
            owners: HashMap::new(),
        }))
        .await
        .unwrap();

    store.set(Uuid::new_v4(), pref(("A", "B"), 1.0, "v@x.com", 1.0)).await.unwrap();
    store.set(Uuid::new_v4(), pref(("B", "C"), 0.0, "v@x.com", 2.0)).await.unwrap();
    store.set(Uuid::new_v4(), pref(("A", "C"), 1.0, "v@x.com", 3.0)).await.unwrap();

    let catalogue = catalogue_with(&["A", "B", "C"]);
    let excluded = Default::default();
    let ranked: HashMap<_, _> = engine.top(&catalogue, &excluded).await.into_iter().collect();
    assert!(ranked["A"] > ranked["B"]);
    assert!(ranked["B"] > ranked["C"]);
}

/// S2 — a voter who owns one of the two games votes for it; the vote is
/// recorded (so later self-votes against games it has now "seen" are also
/// no-ops) but never moves a rating.
#[tokio::test]
async fn s2_self_vote_through_preference_store_is_a_no_op() {
    let engine = Arc::new(EloEngine::new());
    let store = InMemoryPreferenceStore::new();
    let owners = HashMap::from([("v@x.com".to_string(), "A".to_string())]);
    store
        .bind(Arc::new(BoundElo { engine: engine.clone(), owners }))
        .await
        .unwrap();

    let catalogue = catalogue_with(&["A", "B"]);
    let excluded = Default::default();
    let before: HashMap<_, _> = engine.top(&catalogue, &excluded).await.into_iter().collect();

    store.set(Uuid::new_v4(), pref(("A", "B"), 1.0, "v@x.com", 1.0)).await.unwrap();

    let after: HashMap<_, _> = engine.top(&catalogue, &excluded).await.into_iter().collect();
    assert_eq!(before.get("B").copied().unwrap_or(1000.0), after.get("B").copied().unwrap_or(1000.0));
}

/// S3 — editing a stored preference (same key, flipped score) triggers a
/// full rebuild; the resulting ratings equal those of a fresh replay with
/// the edited value substituted in place.
#[tokio::test]
async fn s3_edit_triggers_rebuild_through_preference_store() {
    let engine = Arc::new(EloEngine::new());
    let store = InMemoryPreferenceStore::new();
    store
        .bind(Arc::new(BoundElo { engine: engine.clone(), owners: HashMap::new() }))
        .await
        .unwrap();

    let key = Uuid::new_v4();
    store.set(key, pref(("A", "B"), 1.0, "v@x.com", 1.0)).await.unwrap();
    store.set(Uuid::new_v4(), pref(("B", "C"), 0.0, "v@x.com", 2.0)).await.unwrap();

    store.set(key, pref(("A", "B"), 0.0, "v@x.com", 1.0)).await.unwrap();

    let catalogue = catalogue_with(&["A", "B", "C"]);
    let excluded = Default::default();
    let ranked: HashMap<_, _> = engine.top(&catalogue, &excluded).await.into_iter().collect();
    assert!(ranked["B"] > ranked["A"]);
}

/// S4 — replacing one game in a session must avoid the team_ids of every
/// game remaining in that session.
#[tokio::test]
async fn s4_matchmaking_avoids_teams_already_in_session() {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
    let manager = SessionManager::new(
        SessionManagerConfig {
            max_sessions_per_user: 1,
            session_ttl: Duration::from_secs(3600),
            limits: ContainerLimits::default(),
        },
        runtime,
    );

    let mut catalogue = Catalogue::new();
    for id in ["a", "b", "c"] {
        catalogue.upsert_game(GameMeta {
            name: format!("game-{id}"),
            team_id: id.to_string(),
            entrypoint_file: "main.py".to_string(),
        });
        catalogue.upsert_team(Team::new(id, id, [format!("v{id}@x.com")]));
    }

    let id = manager
        .create("voter@x.com".to_string(), &catalogue, &RandomStrategy, 2)
        .await
        .unwrap();
    let before = manager.game_team_ids("voter@x.com", id).await.unwrap();

    // `replace_game(index=0)` must avoid every *remaining* game's team,
    // i.e. every team_id except the one being replaced.
    let avoid_strategy = AvoidCheckingStrategy {
        expected_avoid: before.iter().skip(1).cloned().collect(),
    };
    manager
        .replace_game("voter@x.com", id, 0, &catalogue, &avoid_strategy)
        .await
        .unwrap();
}

struct AvoidCheckingStrategy {
    expected_avoid: std::collections::HashSet<String>,
}

#[async_trait]
impl crate::pairing::PairingStrategy for AvoidCheckingStrategy {
    async fn select(
        &self,
        catalogue: &Catalogue,
        capacity: usize,
        requester_email: &str,
        avoid: &std::collections::HashSet<String>,
    ) -> crate::errors::ArenaResult<Vec<GameMeta>> {
        assert_eq!(avoid, &self.expected_avoid);
        RandomStrategy.select(catalogue, capacity, requester_email, avoid).await
    }
}

/// S5 — a subscriber that arrives after some bytes were already appended
/// sees the full history, then every subsequent append, then ends at close.
#[tokio::test]
async fn s5_replay_stream_late_subscribe() {
    let stream: ReplayStream<&'static str> = ReplayStream::new();
    stream.append("he").await.unwrap();
    stream.append("ll").await.unwrap();
    stream.append("o").await.unwrap();

    let mut subscription = stream.subscribe().await;
    stream.append("!").await.unwrap();
    stream.close().await;

    let mut received = Vec::new();
    while let Some(item) = subscription.next().await {
        received.push(item);
    }
    assert_eq!(received, vec!["he", "ll", "o", "!"]);
}

/// S6 — a session with no manual stop is reaped once its TTL elapses, and
/// the owner can no longer reach it.
#[tokio::test]
async fn s6_session_ttl_reaps_without_manual_stop() {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
    let manager = SessionManager::new(
        SessionManagerConfig {
            max_sessions_per_user: 1,
            session_ttl: Duration::from_millis(20),
            limits: ContainerLimits::default(),
        },
        runtime,
    );

    let mut catalogue = Catalogue::new();
    for id in ["a", "b"] {
        catalogue.upsert_game(GameMeta {
            name: format!("game-{id}"),
            team_id: id.to_string(),
            entrypoint_file: "main.py".to_string(),
        });
    }

    let id = manager
        .create("owner@x.com".to_string(), &catalogue, &RandomStrategy, 2)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.public_view("owner@x.com", id).await.is_err());
}
