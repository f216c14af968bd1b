//! Game metadata catalogue, file intake, and delegation to the (external)
//! image builder. Grounded on `launcher.py`.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::{ArenaError, ArenaResult};
use crate::game::GameMeta;
use crate::team::Team;
use crate::validation::validate_path;

const MAX_FILE_BYTES: usize = 128 * 1024;
const MAX_FILES_PER_TEAM: usize = 64;

/// Builds a container image for a `GameMeta`. The actual build process
/// (Dockerfile generation, layer push) is an out-of-scope collaborator;
/// this trait is the seam the core calls through.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, meta: &GameMeta) -> ArenaResult<()>;
}

/// Builder that does nothing, for tests and for deployments that pre-bake
/// images out of band.
#[derive(Default)]
pub struct NoopImageBuilder;

#[async_trait]
impl ImageBuilder for NoopImageBuilder {
    async fn build(&self, _meta: &GameMeta) -> ArenaResult<()> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GameMetaFile {
    name: String,
    team_id: String,
    entrypoint_file: String,
}

/// In-memory catalogue of `GameMeta` plus the team directory needed by
/// pairing strategies to determine self-ownership. `team_id` is unique;
/// upserting replaces any existing entry with the same id.
#[derive(Default)]
pub struct Catalogue {
    games: HashMap<String, GameMeta>,
    teams: HashMap<String, Team>,
    files: HashMap<String, HashMap<String, Vec<u8>>>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_game(&mut self, meta: GameMeta) {
        self.games.insert(meta.team_id.clone(), meta);
    }

    pub fn upsert_team(&mut self, team: Team) {
        self.teams.insert(team.team_id.clone(), team);
    }

    pub fn get(&self, team_id: &str) -> Option<&GameMeta> {
        self.games.get(team_id)
    }

    pub fn contains(&self, team_id: &str) -> bool {
        self.games.contains_key(team_id)
    }

    pub fn all_games(&self) -> impl Iterator<Item = &GameMeta> {
        self.games.values()
    }

    pub fn team_of_email(&self, email: &str) -> Option<String> {
        self.teams
            .values()
            .find(|team| team.has_member(email))
            .map(|team| team.team_id.clone())
    }

    pub fn is_member(&self, email: &str, team_id: &str) -> bool {
        self.teams
            .get(team_id)
            .is_some_and(|team| team.has_member(email))
    }

    fn team_files_len(&self, team_id: &str) -> usize {
        self.files.get(team_id).map_or(0, HashMap::len)
    }
}

/// Holds the catalogue and mediates file intake + the image-build
/// delegate. `start()` performs directory intake; everything else mutates
/// the catalogue in memory.
pub struct Launcher {
    games_path: std::path::PathBuf,
    builder: Box<dyn ImageBuilder>,
    catalogue: tokio::sync::RwLock<Catalogue>,
}

impl Launcher {
    pub fn new(games_path: impl Into<std::path::PathBuf>, builder: Box<dyn ImageBuilder>) -> Self {
        Self {
            games_path: games_path.into(),
            builder,
            catalogue: tokio::sync::RwLock::new(Catalogue::new()),
        }
    }

    /// Scan the configured games directory for `*.yaml` metadata files,
    /// building an image and populating the catalogue for each.
    pub async fn start(&self) -> ArenaResult<()> {
        let entries = match std::fs::read_dir(&self.games_path) {
            Ok(entries) => entries,
            Err(error) => {
                return Err(ArenaError::RuntimeUnavailable(format!(
                    "cannot read games directory {}: {error}",
                    self.games_path.display()
                )));
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("yaml") {
                continue;
            }
            match self.load_meta_file(&path) {
                Ok(meta) => {
                    if let Err(error) = self.build_game(meta.clone()).await {
                        warn!(team_id = %meta.team_id, %error, "failed to build game from catalogue scan");
                    }
                }
                Err(error) => warn!(path = %path.display(), %error, "invalid game metadata file"),
            }
        }
        Ok(())
    }

    fn load_meta_file(&self, path: &Path) -> ArenaResult<GameMeta> {
        let contents = std::fs::read_to_string(path)
            .map_err(|error| ArenaError::InvalidInput(format!("cannot read {}: {error}", path.display())))?;
        let parsed: GameMetaFile = serde_yaml::from_str(&contents)
            .map_err(|error| ArenaError::InvalidInput(format!("cannot parse {}: {error}", path.display())))?;
        Ok(GameMeta {
            name: parsed.name,
            team_id: parsed.team_id,
            entrypoint_file: parsed.entrypoint_file,
        })
    }

    /// Validate `entrypoint_file` against the strict rule, persist the
    /// metadata file so a restart's `start()` scan picks it back up,
    /// delegate the build, then upsert the catalogue entry.
    pub async fn build_game(&self, meta: GameMeta) -> ArenaResult<()> {
        validate_path(&meta.entrypoint_file, true)?;
        self.persist_meta_file(&meta)?;
        self.builder.build(&meta).await?;
        info!(team_id = %meta.team_id, "built game image");
        self.catalogue.write().await.upsert_game(meta);
        Ok(())
    }

    fn persist_meta_file(&self, meta: &GameMeta) -> ArenaResult<()> {
        std::fs::create_dir_all(&self.games_path).map_err(|error| {
            ArenaError::RuntimeUnavailable(format!(
                "cannot create games directory {}: {error}",
                self.games_path.display()
            ))
        })?;
        let path = self.games_path.join(format!("{}.yaml", meta.team_id));
        let contents = serde_yaml::to_string(meta)
            .map_err(|error| ArenaError::InvalidInput(format!("cannot serialize metadata: {error}")))?;
        std::fs::write(&path, contents)
            .map_err(|error| ArenaError::RuntimeUnavailable(format!("cannot write {}: {error}", path.display())))?;
        Ok(())
    }

    pub async fn get(&self, team_id: &str) -> Option<GameMeta> {
        self.catalogue.read().await.get(team_id).cloned()
    }

    pub async fn contains(&self, team_id: &str) -> bool {
        self.catalogue.read().await.contains(team_id)
    }

    pub async fn snapshot(&self) -> Catalogue {
        let guard = self.catalogue.read().await;
        let mut snapshot = Catalogue::new();
        for game in guard.all_games() {
            snapshot.upsert_game(game.clone());
        }
        for team in guard.teams.values() {
            snapshot.upsert_team(team.clone());
        }
        snapshot
    }

    pub async fn upsert_team(&self, team: Team) {
        self.catalogue.write().await.upsert_team(team);
    }

    /// Add a file to a team's workspace. Enforces the file quota and the
    /// non-strict filename rule.
    pub async fn add_file(&self, team_id: &str, path: &str, bytes: Vec<u8>) -> ArenaResult<()> {
        if bytes.len() > MAX_FILE_BYTES {
            return Err(ArenaError::InvalidInput(format!(
                "file exceeds {MAX_FILE_BYTES} bytes"
            )));
        }
        validate_path(path, false)?;

        let mut catalogue = self.catalogue.write().await;
        let is_new = !catalogue
            .files
            .get(team_id)
            .is_some_and(|files| files.contains_key(path));
        if is_new && catalogue.team_files_len(team_id) >= MAX_FILES_PER_TEAM {
            return Err(ArenaError::InvalidInput(format!(
                "team {team_id} already has {MAX_FILES_PER_TEAM} files"
            )));
        }

        catalogue
            .files
            .entry(team_id.to_string())
            .or_default()
            .insert(path.to_string(), bytes);
        Ok(())
    }

    /// Remove a file, then purge any now-empty ancestor directories (there
    /// are none to purge in this flat-map representation beyond the entry
    /// itself, since directories are not separately tracked).
    pub async fn remove_file(&self, team_id: &str, path: &str) -> ArenaResult<()> {
        let mut catalogue = self.catalogue.write().await;
        if let Some(files) = catalogue.files.get_mut(team_id) {
            files.remove(path);
            if files.is_empty() {
                catalogue.files.remove(team_id);
            }
        }
        Ok(())
    }

    pub async fn list_files(&self, team_id: &str) -> HashMap<String, Vec<u8>> {
        self.catalogue
            .read()
            .await
            .files
            .get(team_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher() -> Launcher {
        Launcher::new("/tmp/does-not-matter", Box::new(NoopImageBuilder))
    }

    #[tokio::test]
    async fn build_game_persists_metadata_for_a_later_scan_to_find() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Launcher::new(dir.path(), Box::new(NoopImageBuilder));
        let meta = GameMeta {
            name: "g".to_string(),
            team_id: "t1".to_string(),
            entrypoint_file: "main.py".to_string(),
        };
        launcher.build_game(meta).await.unwrap();

        let restarted = Launcher::new(dir.path(), Box::new(NoopImageBuilder));
        restarted.start().await.unwrap();
        assert_eq!(restarted.get("t1").await.unwrap().name, "g");
    }

    #[tokio::test]
    async fn build_game_rejects_space_in_entrypoint() {
        let launcher = launcher();
        let meta = GameMeta {
            name: "g".to_string(),
            team_id: "t1".to_string(),
            entrypoint_file: "my file.py".to_string(),
        };
        assert!(launcher.build_game(meta).await.is_err());
    }

    #[tokio::test]
    async fn build_game_upserts_by_team_id() {
        let launcher = launcher();
        let meta_v1 = GameMeta {
            name: "v1".to_string(),
            team_id: "t1".to_string(),
            entrypoint_file: "main.py".to_string(),
        };
        let meta_v2 = GameMeta {
            name: "v2".to_string(),
            team_id: "t1".to_string(),
            entrypoint_file: "main.py".to_string(),
        };
        launcher.build_game(meta_v1).await.unwrap();
        launcher.build_game(meta_v2).await.unwrap();
        assert_eq!(launcher.get("t1").await.unwrap().name, "v2");
    }

    #[tokio::test]
    async fn add_file_enforces_size_quota() {
        let launcher = launcher();
        let oversized = vec![0u8; MAX_FILE_BYTES + 1];
        assert!(launcher.add_file("t1", "a.txt", oversized).await.is_err());
    }

    #[tokio::test]
    async fn add_file_enforces_count_quota() {
        let launcher = launcher();
        for i in 0..MAX_FILES_PER_TEAM {
            launcher
                .add_file("t1", &format!("f{i}.txt"), vec![1])
                .await
                .unwrap();
        }
        assert!(launcher.add_file("t1", "overflow.txt", vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn remove_file_purges_empty_team_entry() {
        let launcher = launcher();
        launcher.add_file("t1", "a.txt", vec![1]).await.unwrap();
        launcher.remove_file("t1", "a.txt").await.unwrap();
        assert!(launcher.list_files("t1").await.is_empty());
    }
}
