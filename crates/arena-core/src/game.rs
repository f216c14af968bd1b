//! `GameMeta` (catalogue entry) and `Game` (one running container bound to
//! a `GameMeta`), grounded on `common.py`/`game.py` in the original
//! backend.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::container::{Attachment, ContainerRuntime, Frame, Handle};
use crate::errors::ArenaResult;
use crate::replay_stream::ReplaySubscription;

/// Immutable catalogue entry. `team_id` is unique across the catalogue;
/// upserting a game replaces any existing entry with the same `team_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMeta {
    pub name: String,
    pub team_id: String,
    pub entrypoint_file: String,
}

impl GameMeta {
    pub fn image_tag(&self) -> String {
        format!("gamebattle-{}", self.team_id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerLimits {
    pub memory_bytes: Option<i64>,
    pub cpu_nanos: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePublicView {
    pub name: String,
    pub over: bool,
}

/// A running container bound to a `GameMeta`. Owned by exactly one
/// `Session`; destroyed when the session stops or the game is replaced.
pub struct Game {
    pub metadata: GameMeta,
    runtime: Arc<dyn ContainerRuntime>,
    handle: Handle,
    attachment: Attachment,
}

impl Game {
    pub async fn start(
        meta: GameMeta,
        runtime: Arc<dyn ContainerRuntime>,
        limits: ContainerLimits,
    ) -> ArenaResult<Self> {
        let handle = runtime
            .create(&meta.image_tag(), limits.memory_bytes, limits.cpu_nanos)
            .await?;
        runtime.start(&handle).await?;
        let attachment = runtime.attach(&handle).await?;
        Ok(Self {
            metadata: meta,
            runtime,
            handle,
            attachment,
        })
    }

    pub async fn send(&self, bytes: &[u8]) -> ArenaResult<()> {
        self.attachment.send(bytes).await
    }

    pub async fn resize(&self, cols: u16, rows: u16) {
        self.runtime.resize(&self.handle, cols, rows).await;
    }

    /// Subscribe to merged stdout/stderr frames (history then live).
    pub async fn receive(&self) -> ReplaySubscription<Frame> {
        self.attachment.output.subscribe().await
    }

    pub async fn accumulated_output(&self) -> Vec<Frame> {
        self.attachment.output.accumulated().await
    }

    pub async fn running(&self) -> bool {
        !self.attachment.output.is_closed().await
    }

    /// Stop, then start a fresh container for the same metadata. Observers
    /// of the prior `receive()` see closure; a new `subscribe` starts
    /// fresh.
    pub async fn restart(&mut self, limits: ContainerLimits) -> ArenaResult<()> {
        self.runtime.stop(&self.handle).await;
        let handle = self
            .runtime
            .create(
                &self.metadata.image_tag(),
                limits.memory_bytes,
                limits.cpu_nanos,
            )
            .await?;
        self.runtime.start(&handle).await?;
        let attachment = self.runtime.attach(&handle).await?;
        self.handle = handle;
        self.attachment = attachment;
        Ok(())
    }

    pub async fn stop(&self) {
        self.runtime.stop(&self.handle).await;
    }

    pub async fn public_view(&self) -> GamePublicView {
        GamePublicView {
            name: self.metadata.name.clone(),
            over: !self.running().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::FakeContainerRuntime;

    fn meta(team_id: &str) -> GameMeta {
        GameMeta {
            name: format!("game-{team_id}"),
            team_id: team_id.to_string(),
            entrypoint_file: "main.py".to_string(),
        }
    }

    #[test]
    fn image_tag_is_prefixed() {
        assert_eq!(meta("abc").image_tag(), "gamebattle-abc");
    }

    #[tokio::test]
    async fn public_view_reports_over_once_closed() {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
        let game = Game::start(meta("t1"), runtime, ContainerLimits::default())
            .await
            .unwrap();
        assert!(!game.public_view().await.over);

        game.stop().await;
        assert!(game.public_view().await.over);
    }
}
