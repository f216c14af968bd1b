//! Process-wide registry of live sessions. Grounded on `manager.py`'s
//! `Manager`: a single lock around the map, owner-mismatch folded into
//! `NotFound`, one-shot delayed reaper per session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::container::{ContainerRuntime, Frame};
use crate::errors::{ArenaError, ArenaResult};
use crate::game::{ContainerLimits, GamePublicView};
use crate::launcher::Catalogue;
use crate::pairing::PairingStrategy;
use crate::replay_stream::ReplaySubscription;
use crate::session::{Session, SessionPublicView};

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub max_sessions_per_user: usize,
    pub session_ttl: Duration,
    pub limits: ContainerLimits,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_user: 1,
            session_ttl: Duration::from_secs(60 * 60),
            limits: ContainerLimits::default(),
        }
    }
}

pub struct SessionManager {
    config: SessionManagerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig, runtime: Arc<dyn ContainerRuntime>) -> Arc<Self> {
        Arc::new(Self {
            config,
            runtime,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Preconditions: caller holds fewer than `max_sessions_per_user` live
    /// sessions; the strategy must not return an empty list. On success a
    /// delayed stop is scheduled for `launch_time + ttl`.
    pub async fn create(
        self: &Arc<Self>,
        owner_email: String,
        catalogue: &Catalogue,
        strategy: &dyn PairingStrategy,
        capacity: usize,
    ) -> ArenaResult<Uuid> {
        {
            let sessions = self.sessions.lock().await;
            let count = sessions
                .values()
                .filter(|session| session.owner_email == owner_email)
                .count();
            if count >= self.config.max_sessions_per_user {
                return Err(ArenaError::QuotaExceeded(format!(
                    "{owner_email} already has {count} live session(s)"
                )));
            }
        }

        let session = Session::launch(
            owner_email,
            catalogue,
            strategy,
            capacity,
            self.runtime.clone(),
            self.config.limits,
        )
        .await?;
        let id = session.id;

        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(id, session);
        }

        self.schedule_reap(id);
        Ok(id)
    }

    fn schedule_reap(self: &Arc<Self>, id: Uuid) {
        let manager = self.clone();
        let ttl = self.config.session_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            manager.reap(id).await;
        });
    }

    async fn reap(&self, id: Uuid) {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(&id)
        };
        // Explicit stop already removed the session: a no-op, as required.
        if let Some(session) = session {
            info!(session_id = %id, "reaping expired session");
            session.stop().await;
        }
    }

    /// `NotFound` both when the id doesn't exist and when it belongs to a
    /// different owner, so owner mismatch never leaks which is true.
    fn check_ownership<'a>(
        sessions: &'a HashMap<Uuid, Session>,
        owner_email: &str,
        id: Uuid,
    ) -> ArenaResult<&'a Session> {
        match sessions.get(&id) {
            Some(session) if session.owner_email == owner_email => Ok(session),
            _ => Err(ArenaError::NotFound(format!("session {id}"))),
        }
    }

    pub async fn public_view(&self, owner_email: &str, id: Uuid) -> ArenaResult<SessionPublicView> {
        let sessions = self.sessions.lock().await;
        let session = Self::check_ownership(&sessions, owner_email, id)?;
        Ok(session.public_view().await)
    }

    pub async fn user_sessions(&self, owner_email: &str) -> HashMap<Uuid, SessionPublicView> {
        let sessions = self.sessions.lock().await;
        let mut views = HashMap::new();
        for (id, session) in sessions.iter() {
            if session.owner_email == owner_email {
                views.insert(*id, session.public_view().await);
            }
        }
        views
    }

    pub async fn game_view(
        &self,
        owner_email: &str,
        id: Uuid,
        index: usize,
    ) -> ArenaResult<GamePublicView> {
        let sessions = self.sessions.lock().await;
        let session = Self::check_ownership(&sessions, owner_email, id)?;
        let game = session
            .game(index)
            .ok_or_else(|| ArenaError::NotFound(format!("game {index} in session {id}")))?;
        Ok(game.public_view().await)
    }

    /// `team_id` of the game at `index`, needed by callers (reports,
    /// preference recording) that must name the game without re-deriving it
    /// from `public_view`'s display name.
    pub async fn game_team_id(&self, owner_email: &str, id: Uuid, index: usize) -> ArenaResult<String> {
        let sessions = self.sessions.lock().await;
        let session = Self::check_ownership(&sessions, owner_email, id)?;
        let game = session
            .game(index)
            .ok_or_else(|| ArenaError::NotFound(format!("game {index} in session {id}")))?;
        Ok(game.metadata.team_id.clone())
    }

    /// `team_id`s of every game in the session, in presentation order.
    pub async fn game_team_ids(&self, owner_email: &str, id: Uuid) -> ArenaResult<Vec<String>> {
        let sessions = self.sessions.lock().await;
        let session = Self::check_ownership(&sessions, owner_email, id)?;
        Ok(session.games().iter().map(|g| g.metadata.team_id.clone()).collect())
    }

    pub async fn is_over(&self, owner_email: &str, id: Uuid) -> ArenaResult<bool> {
        let sessions = self.sessions.lock().await;
        let session = Self::check_ownership(&sessions, owner_email, id)?;
        Ok(session.is_over().await)
    }

    pub async fn subscribe_game(
        &self,
        owner_email: &str,
        id: Uuid,
        index: usize,
    ) -> ArenaResult<ReplaySubscription<Frame>> {
        let sessions = self.sessions.lock().await;
        let session = Self::check_ownership(&sessions, owner_email, id)?;
        let game = session
            .game(index)
            .ok_or_else(|| ArenaError::NotFound(format!("game {index} in session {id}")))?;
        Ok(game.receive().await)
    }

    /// Output accumulated so far, for a game that may still be running.
    /// Unlike `subscribe_game`, this returns immediately: it never waits on
    /// more frames from a live container.
    pub async fn game_output_snapshot(
        &self,
        owner_email: &str,
        id: Uuid,
        index: usize,
    ) -> ArenaResult<Vec<Frame>> {
        let sessions = self.sessions.lock().await;
        let session = Self::check_ownership(&sessions, owner_email, id)?;
        let game = session
            .game(index)
            .ok_or_else(|| ArenaError::NotFound(format!("game {index} in session {id}")))?;
        Ok(game.accumulated_output().await)
    }

    pub async fn send_to_game(
        &self,
        owner_email: &str,
        id: Uuid,
        index: usize,
        bytes: &[u8],
    ) -> ArenaResult<()> {
        let sessions = self.sessions.lock().await;
        let session = Self::check_ownership(&sessions, owner_email, id)?;
        let game = session
            .game(index)
            .ok_or_else(|| ArenaError::NotFound(format!("game {index} in session {id}")))?;
        game.send(bytes).await
    }

    pub async fn resize_game(&self, owner_email: &str, id: Uuid, index: usize, cols: u16, rows: u16) {
        let sessions = self.sessions.lock().await;
        let Ok(session) = Self::check_ownership(&sessions, owner_email, id) else {
            return;
        };
        if let Some(game) = session.game(index) {
            game.resize(cols, rows).await;
        }
    }

    pub async fn restart_game(&self, owner_email: &str, id: Uuid, index: usize) -> ArenaResult<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .filter(|session| session.owner_email == owner_email)
            .ok_or_else(|| ArenaError::NotFound(format!("session {id}")))?;
        session.restart_game(index, self.config.limits).await
    }

    pub async fn replace_game(
        &self,
        owner_email: &str,
        id: Uuid,
        index: usize,
        catalogue: &Catalogue,
        strategy: &dyn PairingStrategy,
    ) -> ArenaResult<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .filter(|session| session.owner_email == owner_email)
            .ok_or_else(|| ArenaError::NotFound(format!("session {id}")))?;
        session
            .replace_game(index, catalogue, strategy, self.runtime.clone(), self.config.limits)
            .await
    }

    /// Same owner-check rule as `get`/`get_game`.
    pub async fn stop(&self, owner_email: &str, id: Uuid) -> ArenaResult<()> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&id) {
                Some(session) if session.owner_email == owner_email => sessions.remove(&id),
                _ => return Err(ArenaError::NotFound(format!("session {id}"))),
            }
        };
        if let Some(session) = session {
            session.stop().await;
        }
        Ok(())
    }

    /// Shutdown hook: stops every registered session.
    pub async fn stop_all(&self) {
        let sessions = {
            let mut sessions = self.sessions.lock().await;
            std::mem::take(&mut *sessions)
        };
        for (id, session) in sessions {
            warn!(session_id = %id, "stopping session on shutdown");
            session.stop().await;
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
        for (id, email) in [("a", "va@x.com"), ("b", "vb@x.com")] {
            c.upsert_game(GameMeta {
                name: format!("game-{id}"),
                team_id: id.to_string(),
                entrypoint_file: "main.py".to_string(),
            });
            c.upsert_team(Team::new(id, id, [email]));
        }
        c
    }

    fn manager() -> Arc<SessionManager> {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
        SessionManager::new(
            SessionManagerConfig {
                max_sessions_per_user: 1,
                session_ttl: Duration::from_secs(3600),
                limits: ContainerLimits::default(),
            },
            runtime,
        )
    }

    #[tokio::test]
    async fn create_enforces_quota() {
        let manager = manager();
        let catalogue = catalogue();
        manager
            .create("voter@x.com".to_string(), &catalogue, &RandomStrategy, 1)
            .await
            .unwrap();
        let result = manager
            .create("voter@x.com".to_string(), &catalogue, &RandomStrategy, 1)
            .await;
        assert!(matches!(result, Err(ArenaError::QuotaExceeded(_))));
    }

    #[tokio::test]
    async fn get_hides_owner_mismatch_as_not_found() {
        let manager = manager();
        let catalogue = catalogue();
        let id = manager
            .create("voter@x.com".to_string(), &catalogue, &RandomStrategy, 1)
            .await
            .unwrap();

        let mismatched = manager.public_view("someone-else@x.com", id).await;
        assert!(matches!(mismatched, Err(ArenaError::NotFound(_))));

        let missing = manager.public_view("voter@x.com", Uuid::new_v4()).await;
        assert!(matches!(missing, Err(ArenaError::NotFound(_))));
    }

    #[tokio::test]
    async fn stop_removes_session() {
        let manager = manager();
        let catalogue = catalogue();
        let id = manager
            .create("voter@x.com".to_string(), &catalogue, &RandomStrategy, 1)
            .await
            .unwrap();
        manager.stop("voter@x.com", id).await.unwrap();
        assert!(manager.public_view("voter@x.com", id).await.is_err());
    }

    #[tokio::test]
    async fn reap_after_ttl_removes_session() {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
        let manager = SessionManager::new(
            SessionManagerConfig {
                max_sessions_per_user: 1,
                session_ttl: Duration::from_millis(20),
                limits: ContainerLimits::default(),
            },
            runtime,
        );
        let catalogue = catalogue();
        let id = manager
            .create("voter@x.com".to_string(), &catalogue, &RandomStrategy, 1)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.public_view("voter@x.com", id).await.is_err());
    }
}
