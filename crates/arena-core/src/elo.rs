//! Elo-style rating engine: registration, deterministic replay,
//! leaderboard, and the `elo_pair` matchmaking strategy.
//!
//! Grounded on `EloRatingSystem` in the original Python backend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::ArenaResult;
use crate::game::GameMeta;
use crate::launcher::Catalogue;
use crate::pairing::PairingStrategy;
use crate::preferences::Preference;
use crate::report_store::ReportStore;

pub const K_FACTOR: f64 = 32.0;
pub const INITIAL_RATING: f64 = 1000.0;

#[derive(Default)]
struct State {
    ratings: HashMap<String, f64>,
    runs: HashMap<String, u32>,
    seen_by_voter: HashMap<String, HashSet<String>>,
}

/// Per-`team_id` Elo rating plus play count and voter-idempotence state.
/// The preference log is the source of truth; this is a pure function of
/// it, rebuildable at any time via `replay`.
pub struct EloEngine {
    state: RwLock<State>,
}

impl Default for EloEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EloEngine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Drop all ratings/runs/voter-history, returning to a blank slate.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.ratings.clear();
        state.runs.clear();
        state.seen_by_voter.clear();
    }

    fn expected_score(ratings: &HashMap<String, f64>, game: &str, other: &str) -> f64 {
        let r_game = *ratings.get(game).unwrap_or(&INITIAL_RATING);
        let r_other = *ratings.get(other).unwrap_or(&INITIAL_RATING);
        1.0 / (1.0 + 10f64.powf((r_other - r_game) / 400.0))
    }

    /// Register one preference. Self-votes and repeat votes by the same
    /// voter against a game they've already rated are recorded in
    /// `seen_by_voter` but never change ratings or runs (invariants 2/3).
    pub async fn register(&self, preference: &Preference, author_owns_either_game: bool) {
        let (a, b) = (&preference.games.0, &preference.games.1);
        let mut state = self.state.write().await;

        let already_seen = state
            .seen_by_voter
            .get(&preference.author_email)
            .is_some_and(|seen| seen.contains(a) || seen.contains(b));

        let counted = !author_owns_either_game && !already_seen;

        state
            .seen_by_voter
            .entry(preference.author_email.clone())
            .or_default()
            .extend([a.clone(), b.clone()]);

        if !counted {
            return;
        }

        state.ratings.entry(a.clone()).or_insert(INITIAL_RATING);
        state.ratings.entry(b.clone()).or_insert(INITIAL_RATING);

        let e_a = Self::expected_score(&state.ratings, a, b);
        let e_b = 1.0 - e_a;
        let s = preference.first_score;

        let ratings = &mut state.ratings;
        *ratings.get_mut(a).unwrap() += K_FACTOR * (s - e_a);
        *ratings.get_mut(b).unwrap() += K_FACTOR * ((1.0 - s) - e_b);

        *state.runs.entry(a.clone()).or_insert(0) += 1;
        *state.runs.entry(b.clone()).or_insert(0) += 1;

        // Non-negativity: shift every rating so the minimum becomes 0.
        // This preserves relative differences.
        let min = state
            .ratings
            .values()
            .copied()
            .fold(f64::INFINITY, f64::min);
        if min < 0.0 {
            for value in state.ratings.values_mut() {
                *value -= min;
            }
        }
    }

    /// Recompute ratings from scratch by replaying the log in order. The
    /// only authoritative way to rebuild state after an edit/delete.
    pub async fn replay<F>(&self, preferences_sorted_by_timestamp: &[Preference], owns_either: F)
    where
        F: Fn(&Preference) -> bool,
    {
        self.clear().await;
        for preference in preferences_sorted_by_timestamp {
            self.register(preference, owns_either(preference)).await;
        }
    }

    /// Ratings for catalogue entries not in `excluded`, sorted descending.
    pub async fn top(
        &self,
        catalogue: &Catalogue,
        excluded: &HashSet<String>,
    ) -> Vec<(String, f64)> {
        let state = self.state.read().await;
        let mut entries: Vec<(String, f64)> = catalogue
            .all_games()
            .filter(|g| !excluded.contains(&g.team_id))
            .map(|g| {
                (
                    g.team_id.clone(),
                    *state.ratings.get(&g.team_id).unwrap_or(&INITIAL_RATING),
                )
            })
            .collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        entries
    }

    fn pair_likelihood(ratings: &HashMap<String, f64>, runs: &HashMap<String, u32>, a: &str, b: &str) -> f64 {
        let r_a = *ratings.get(a).unwrap_or(&INITIAL_RATING);
        let r_b = *ratings.get(b).unwrap_or(&INITIAL_RATING);
        let runs_a = *runs.get(a).unwrap_or(&0) as f64;
        let runs_b = *runs.get(b).unwrap_or(&0) as f64;
        (r_a - r_b).abs() / 200.0 - (runs_a + runs_b)
    }

    /// Matchmaking: pick `capacity` games maximizing information gain,
    /// excluding self-matches, the avoid-set, globally excluded games,
    /// games the requester has already voted on, and games reported by the
    /// requester.
    pub async fn pair(
        &self,
        catalogue: &Catalogue,
        capacity: usize,
        requester_email: &str,
        avoid: &HashSet<String>,
        reports: &dyn ReportStore,
    ) -> ArenaResult<Vec<GameMeta>> {
        let excluded = reports.excluded_games().await?;
        let state = self.state.read().await;
        let already_seen = state
            .seen_by_voter
            .get(requester_email)
            .cloned()
            .unwrap_or_default();

        let mut available: Vec<GameMeta> = Vec::new();
        for game in catalogue.all_games() {
            if catalogue.is_member(requester_email, &game.team_id) {
                continue;
            }
            if avoid.contains(&game.team_id) || excluded.contains(&game.team_id) {
                continue;
            }
            if already_seen.contains(&game.team_id) {
                continue;
            }
            let reported_by_requester = reports
                .get(&game.team_id)
                .await?
                .iter()
                .any(|report| report.author_email == requester_email);
            if reported_by_requester {
                continue;
            }
            available.push(game.clone());
        }

        if available.len() < 2 {
            return Ok(Vec::new());
        }

        let mut scored_pairs: Vec<(f64, usize, usize)> = Vec::new();
        for (i, x) in available.iter().enumerate() {
            for (j, y) in available.iter().enumerate() {
                if i == j {
                    continue;
                }
                let score = Self::pair_likelihood(&state.ratings, &state.runs, &x.team_id, &y.team_id);
                scored_pairs.push((score, i, j));
            }
        }
        scored_pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut flattened = Vec::with_capacity(capacity);
        for (_, i, j) in scored_pairs {
            if flattened.len() >= capacity {
                break;
            }
            flattened.push(available[i].clone());
            if flattened.len() < capacity {
                flattened.push(available[j].clone());
            }
        }
        flattened.truncate(capacity);
        Ok(flattened)
    }
}

/// Adapts `EloEngine::pair` to the `PairingStrategy` trait so it can be
/// used anywhere a pairing strategy is accepted (session launch/replace).
pub struct EloPairStrategy {
    pub engine: Arc<EloEngine>,
    pub reports: Arc<dyn ReportStore>,
}

#[async_trait]
impl PairingStrategy for EloPairStrategy {
    async fn select(
        &self,
        catalogue: &Catalogue,
        capacity: usize,
        requester_email: &str,
        avoid: &HashSet<String>,
    ) -> ArenaResult<Vec<GameMeta>> {
        self.engine
            .pair(catalogue, capacity, requester_email, avoid, self.reports.as_ref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pref(a: &str, b: &str, score: f64, author: &str, ts: f64) -> Preference {
        Preference {
            session_id: uuid::Uuid::new_v4(),
            games: (a.to_string(), b.to_string()),
            first_score: score,
            author_email: author.to_string(),
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn s1_simple_elo_round() {
        let engine = EloEngine::new();
        engine.register(&pref("A", "B", 1.0, "v@x.com", 1.0), false).await;
        engine.register(&pref("B", "C", 0.0, "v@x.com", 2.0), false).await;
        engine.register(&pref("A", "C", 1.0, "v@x.com", 3.0), false).await;

        let state = engine.state.read().await;
        let a = (state.ratings["A"] * 10.0).round() / 10.0;
        let b = (state.ratings["B"] * 10.0).round() / 10.0;
        let c = (state.ratings["C"] * 10.0).round() / 10.0;
        assert_eq!(a, 1048.0);
        assert_eq!(b, 1000.0);
        assert_eq!(c, 952.0);
    }

    #[tokio::test]
    async fn s2_self_vote_is_a_no_op_but_still_recorded() {
        let engine = EloEngine::new();
        engine.register(&pref("A", "B", 1.0, "v@x.com", 1.0), true).await;
        {
            let state = engine.state.read().await;
            assert!(!state.ratings.contains_key("A"));
            assert!(state.seen_by_voter["v@x.com"].contains("A"));
            assert!(state.seen_by_voter["v@x.com"].contains("B"));
        }

        // Subsequent vote on (A, C) is also a no-op because A was seen.
        engine.register(&pref("A", "C", 1.0, "v@x.com", 2.0), false).await;
        let state = engine.state.read().await;
        assert!(!state.ratings.contains_key("C"));
        assert!(state.seen_by_voter["v@x.com"].contains("C"));
    }

    #[tokio::test]
    async fn s3_edit_triggers_full_replay_equivalence() {
        let engine = EloEngine::new();
        let p1 = pref("A", "B", 1.0, "v1@x.com", 1.0);
        let p2 = pref("B", "C", 0.0, "v2@x.com", 2.0);
        let p3 = pref("A", "C", 1.0, "v3@x.com", 3.0);

        engine.register(&p1, false).await;
        engine.register(&p2, false).await;
        engine.register(&p3, false).await;

        let p1_edited = pref("A", "B", 0.0, "v1@x.com", 1.0);
        engine.replay(&[p1_edited.clone(), p2.clone(), p3.clone()], |_| false).await;

        let replayed = {
            let state = engine.state.read().await;
            state.ratings.clone()
        };

        let control = EloEngine::new();
        control.register(&p1_edited, false).await;
        control.register(&p2, false).await;
        control.register(&p3, false).await;
        let control_ratings = control.state.read().await.ratings.clone();

        assert_eq!(replayed, control_ratings);
    }

    #[test]
    fn invariant_non_negativity_is_enforced_by_shift() {
        let mut ratings = HashMap::new();
        ratings.insert("A".to_string(), -10.0);
        ratings.insert("B".to_string(), 5.0);
        let min = ratings.values().copied().fold(f64::INFINITY, f64::min);
        for v in ratings.values_mut() {
            *v -= min;
        }
        assert!(ratings.values().all(|v| *v >= 0.0));
    }
}
