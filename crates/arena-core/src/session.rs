//! A session: a short-lived pair (or singleton) of games bound to one
//! voter. Grounded on `session.py`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use uuid::Uuid;

use crate::container::ContainerRuntime;
use crate::errors::{ArenaError, ArenaResult};
use crate::game::{ContainerLimits, Game, GamePublicView};
use crate::launcher::Catalogue;
use crate::pairing::PairingStrategy;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPublicView {
    pub owner: String,
    pub launch_time: DateTime<Utc>,
    pub games: Vec<GamePublicView>,
}

/// Owns 1 or 2 `Game`s plus the voter they belong to.
pub struct Session {
    pub id: Uuid,
    pub owner_email: String,
    pub launch_time: DateTime<Utc>,
    games: Vec<Game>,
}

impl Session {
    /// Run `strategy` with an empty avoid-set, start each returned game,
    /// then randomly permute presentation order so A/B framing is
    /// unbiased.
    pub async fn launch(
        owner_email: String,
        catalogue: &Catalogue,
        strategy: &dyn PairingStrategy,
        capacity: usize,
        runtime: Arc<dyn ContainerRuntime>,
        limits: ContainerLimits,
    ) -> ArenaResult<Self> {
        let metas = strategy
            .select(catalogue, capacity, &owner_email, &HashSet::new())
            .await?;
        if metas.is_empty() {
            return Err(ArenaError::NoGamesAvailable(
                "pairing strategy returned no games".to_string(),
            ));
        }

        let mut games = Vec::with_capacity(metas.len());
        for meta in metas {
            games.push(Game::start(meta, runtime.clone(), limits).await?);
        }
        games.shuffle(&mut rand::thread_rng());

        Ok(Self {
            id: Uuid::new_v4(),
            owner_email,
            launch_time: Utc::now(),
            games,
        })
    }

    pub fn games(&self) -> &[Game] {
        &self.games
    }

    pub fn game(&self, index: usize) -> Option<&Game> {
        self.games.get(index)
    }

    /// Stop the game at `index`, then ask `strategy` for a replacement with
    /// `avoid` set to every remaining game's team, so the new game can't
    /// accidentally duplicate one already in the session. Presentation
    /// order of the remaining games is preserved.
    pub async fn replace_game(
        &mut self,
        index: usize,
        catalogue: &Catalogue,
        strategy: &dyn PairingStrategy,
        runtime: Arc<dyn ContainerRuntime>,
        limits: ContainerLimits,
    ) -> ArenaResult<()> {
        if index >= self.games.len() {
            return Err(ArenaError::NotFound(format!("no game at index {index}")));
        }

        self.games[index].stop().await;

        let avoid: HashSet<String> = self
            .games
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, game)| game.metadata.team_id.clone())
            .collect();

        let mut replacement = strategy
            .select(catalogue, 1, &self.owner_email, &avoid)
            .await?;
        let meta = replacement
            .pop()
            .ok_or_else(|| ArenaError::NoGamesAvailable("no replacement game available".to_string()))?;

        self.games[index] = Game::start(meta, runtime, limits).await?;
        Ok(())
    }

    /// Stop the game at `index`, then start a fresh container for the same
    /// metadata. No pairing strategy involved.
    pub async fn restart_game(&mut self, index: usize, limits: ContainerLimits) -> ArenaResult<()> {
        let game = self
            .games
            .get_mut(index)
            .ok_or_else(|| ArenaError::NotFound(format!("no game at index {index}")))?;
        game.restart(limits).await
    }

    /// Stop every game, sequentially, best-effort (no partial-success
    /// rollback).
    pub async fn stop(&self) {
        for game in &self.games {
            game.stop().await;
        }
    }

    pub async fn is_over(&self) -> bool {
        for game in &self.games {
            if game.running().await {
                return false;
            }
        }
        true
    }

    pub async fn public_view(&self) -> SessionPublicView {
        let mut games = Vec::with_capacity(self.games.len());
        for game in &self.games {
            games.push(game.public_view().await);
        }
        SessionPublicView {
            owner: self.owner_email.clone(),
            launch_time: self.launch_time,
            games,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::FakeContainerRuntime;
    use crate::game::GameMeta;
    use crate::pairing::RandomStrategy;
    use crate::team::Team;

    fn catalogue() -> Catalogue {
        let mut c = Catalogue::new();
        for (id, email) in [("a", "va@x.com"), ("b", "vb@x.com"), ("c", "vc@x.com")] {
            c.upsert_game(GameMeta {
                name: format!("game-{id}"),
                team_id: id.to_string(),
                entrypoint_file: "main.py".to_string(),
            });
            c.upsert_team(Team::new(id, id, [email]));
        }
        c
    }

    #[tokio::test]
    async fn launch_starts_requested_capacity() {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
        let catalogue = catalogue();
        let session = Session::launch(
            "voter@x.com".to_string(),
            &catalogue,
            &RandomStrategy,
            2,
            runtime,
            ContainerLimits::default(),
        )
        .await
        .unwrap();
        assert_eq!(session.games().len(), 2);
    }

    #[tokio::test]
    async fn replace_game_avoids_remaining_games() {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
        let catalogue = catalogue();
        let mut session = Session::launch(
            "voter@x.com".to_string(),
            &catalogue,
            &RandomStrategy,
            2,
            runtime.clone(),
            ContainerLimits::default(),
        )
        .await
        .unwrap();

        let remaining_team = session.games()[1].metadata.team_id.clone();
        session
            .replace_game(0, &catalogue, &RandomStrategy, runtime, ContainerLimits::default())
            .await
            .unwrap();

        assert_ne!(session.games()[0].metadata.team_id, remaining_team);
        assert_eq!(session.games()[1].metadata.team_id, remaining_team);
    }

    #[tokio::test]
    async fn is_over_once_all_games_stopped() {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
        let catalogue = catalogue();
        let session = Session::launch(
            "voter@x.com".to_string(),
            &catalogue,
            &RandomStrategy,
            1,
            runtime,
            ContainerLimits::default(),
        )
        .await
        .unwrap();
        assert!(!session.is_over().await);
        session.stop().await;
        assert!(session.is_over().await);
    }
}
