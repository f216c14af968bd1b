//! Pairing strategies: pure functions of `(catalogue, capacity, requester,
//! avoid) -> games`. `elo_pair` is the interesting one and lives on
//! `EloEngine` (see `elo.rs`); the others are plain structs here.

use std::collections::HashSet;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::errors::{ArenaError, ArenaResult};
use crate::game::GameMeta;
use crate::launcher::Catalogue;

#[async_trait]
pub trait PairingStrategy: Send + Sync {
    async fn select(
        &self,
        catalogue: &Catalogue,
        capacity: usize,
        requester_email: &str,
        avoid: &HashSet<String>,
    ) -> ArenaResult<Vec<GameMeta>>;
}

/// Uniformly sample `capacity` distinct games such that the requester is
/// not a member of the game's team and `team_id` is not in `avoid`.
pub struct RandomStrategy;

#[async_trait]
impl PairingStrategy for RandomStrategy {
    async fn select(
        &self,
        catalogue: &Catalogue,
        capacity: usize,
        requester_email: &str,
        avoid: &HashSet<String>,
    ) -> ArenaResult<Vec<GameMeta>> {
        let mut candidates: Vec<GameMeta> = catalogue
            .all_games()
            .filter(|g| !catalogue.is_member(requester_email, &g.team_id))
            .filter(|g| !avoid.contains(&g.team_id))
            .cloned()
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(capacity);
        Ok(candidates)
    }
}

/// Return the requester's own team's game. Requires `capacity == 1`.
pub struct OwnStrategy;

#[async_trait]
impl PairingStrategy for OwnStrategy {
    async fn select(
        &self,
        catalogue: &Catalogue,
        capacity: usize,
        requester_email: &str,
        _avoid: &HashSet<String>,
    ) -> ArenaResult<Vec<GameMeta>> {
        if capacity != 1 {
            return Err(ArenaError::GamebattleError(
                "own strategy requires capacity == 1".to_string(),
            ));
        }
        let team_id = catalogue.team_of_email(requester_email).ok_or_else(|| {
            ArenaError::GamebattleError("requester does not belong to a team".to_string())
        })?;
        let meta = catalogue
            .get(&team_id)
            .ok_or_else(|| ArenaError::NotFound(format!("no game for team {team_id}")))?;
        Ok(vec![meta.clone()])
    }
}

/// Return exactly `[catalogue[game_id]]`. Admin use.
pub struct SpecifiedStrategy {
    pub game_id: String,
}

#[async_trait]
impl PairingStrategy for SpecifiedStrategy {
    async fn select(
        &self,
        catalogue: &Catalogue,
        _capacity: usize,
        _requester_email: &str,
        _avoid: &HashSet<String>,
    ) -> ArenaResult<Vec<GameMeta>> {
        let meta = catalogue
            .get(&self.game_id)
            .ok_or_else(|| ArenaError::NotFound(format!("no game {}", self.game_id)))?;
        Ok(vec![meta.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::Team;

    fn catalogue_with(games: &[(&str, &str)]) -> Catalogue {
        let mut catalogue = Catalogue::new();
        for (team_id, member) in games {
            catalogue.upsert_game(GameMeta {
                name: format!("game-{team_id}"),
                team_id: (*team_id).to_string(),
                entrypoint_file: "main.py".to_string(),
            });
            catalogue.upsert_team(Team::new(*team_id, *team_id, [*member]));
        }
        catalogue
    }

    #[tokio::test]
    async fn random_strategy_excludes_own_team_and_avoid_set() {
        let catalogue = catalogue_with(&[("a", "va@x.com"), ("b", "vb@x.com"), ("c", "vc@x.com")]);
        let avoid: HashSet<String> = ["b".to_string()].into_iter().collect();

        for _ in 0..20 {
            let picked = RandomStrategy
                .select(&catalogue, 1, "va@x.com", &avoid)
                .await
                .unwrap();
            assert!(picked.iter().all(|g| g.team_id != "a" && g.team_id != "b"));
        }
    }

    #[tokio::test]
    async fn own_strategy_requires_capacity_one() {
        let catalogue = catalogue_with(&[("a", "va@x.com")]);
        let result = OwnStrategy.select(&catalogue, 2, "va@x.com", &HashSet::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn own_strategy_returns_requesters_game() {
        let catalogue = catalogue_with(&[("a", "va@x.com"), ("b", "vb@x.com")]);
        let result = OwnStrategy
            .select(&catalogue, 1, "va@x.com", &HashSet::new())
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].team_id, "a");
    }
}
