//! Composition root: wires the core subsystems into one `AppState` shared
//! across axum handlers.

use std::sync::Arc;

use arena_core::container::ContainerRuntime;
use arena_core::elo::EloEngine;
use arena_core::errors::{ArenaError, ArenaResult};
use arena_core::launcher::{Catalogue, ImageBuilder, Launcher};
use arena_core::pairing::{OwnStrategy, RandomStrategy, SpecifiedStrategy};
use arena_core::preference_store::{
    InMemoryPreferenceStore, PreferenceStore, RatingSystem, RedisPreferenceStore,
};
use arena_core::preferences::{Preference, Report};
use arena_core::report_store::{InMemoryReportStore, RedisReportStore, ReportStore};
use arena_core::session_manager::{SessionManager, SessionManagerConfig};
use async_trait::async_trait;

use crate::auth::Authenticator;
use crate::config::ArenaConfig;

/// Posts a notification once a report has been filed. The real delivery
/// (a Discord/Slack webhook call) is an out-of-scope collaborator; this
/// is the seam the adapter calls through.
#[async_trait]
pub trait ReportNotifier: Send + Sync {
    async fn notify(&self, team_id: &str, report: &Report, total_reports: usize);
}

#[derive(Default)]
pub struct NoopReportNotifier;

#[async_trait]
impl ReportNotifier for NoopReportNotifier {
    async fn notify(&self, _team_id: &str, _report: &Report, _total_reports: usize) {}
}

/// Bridges `PreferenceStore`'s transport-agnostic `RatingSystem` callback
/// to `EloEngine`, resolving self-vote ownership against the current
/// catalogue snapshot at register/replay time.
struct EloRatingSystem {
    engine: Arc<EloEngine>,
    launcher: Arc<Launcher>,
}

fn owns_either(catalogue: &Catalogue, preference: &Preference) -> bool {
    catalogue.is_member(&preference.author_email, &preference.games.0)
        || catalogue.is_member(&preference.author_email, &preference.games.1)
}

#[async_trait]
impl RatingSystem for EloRatingSystem {
    async fn register(&self, preference: &Preference) {
        let catalogue = self.launcher.snapshot().await;
        self.engine
            .register(preference, owns_either(&catalogue, preference))
            .await;
    }

    async fn rebuild(&self, preferences: &[Preference]) {
        let catalogue = self.launcher.snapshot().await;
        self.engine
            .replay(preferences, |preference| owns_either(&catalogue, preference))
            .await;
    }
}

pub struct AppState {
    pub session_manager: Arc<SessionManager>,
    pub launcher: Arc<Launcher>,
    pub elo: Arc<EloEngine>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub reports: Arc<dyn ReportStore>,
    pub notifier: Arc<dyn ReportNotifier>,
    pub auth: Arc<Authenticator>,
    pub config: Arc<ArenaConfig>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            session_manager: self.session_manager.clone(),
            launcher: self.launcher.clone(),
            elo: self.elo.clone(),
            preferences: self.preferences.clone(),
            reports: self.reports.clone(),
            notifier: self.notifier.clone(),
            auth: self.auth.clone(),
            config: self.config.clone(),
        }
    }
}

impl AppState {
    pub async fn build(
        config: ArenaConfig,
        runtime: Arc<dyn ContainerRuntime>,
        builder: Box<dyn ImageBuilder>,
        auth: Arc<Authenticator>,
    ) -> ArenaResult<Self> {
        let launcher = Arc::new(Launcher::new(config.games_path.clone(), builder));
        let elo = Arc::new(EloEngine::new());

        let (reports, preferences): (Arc<dyn ReportStore>, Arc<dyn PreferenceStore>) =
            match &config.redis_url {
                Some(url) => {
                    let client = redis::Client::open(url.as_str())
                        .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;
                    (
                        Arc::new(RedisReportStore::new(client.clone())),
                        Arc::new(RedisPreferenceStore::new(client)),
                    )
                }
                None => (
                    Arc::new(InMemoryReportStore::new()),
                    Arc::new(InMemoryPreferenceStore::new()),
                ),
            };

        let rating_system = Arc::new(EloRatingSystem {
            engine: elo.clone(),
            launcher: launcher.clone(),
        });
        preferences.bind(rating_system).await?;

        let session_manager = SessionManager::new(
            SessionManagerConfig {
                max_sessions_per_user: config.max_sessions_per_user,
                session_ttl: config.session_ttl,
                limits: arena_core::game::ContainerLimits {
                    memory_bytes: config.container_memory_bytes,
                    cpu_nanos: config.container_cpu_nanos,
                },
            },
            runtime,
        );

        Ok(Self {
            session_manager,
            launcher,
            elo,
            preferences,
            reports,
            notifier: Arc::new(NoopReportNotifier),
            auth,
            config: Arc::new(config),
        })
    }

    pub fn random_strategy(&self) -> RandomStrategy {
        RandomStrategy
    }

    pub fn own_strategy(&self) -> OwnStrategy {
        OwnStrategy
    }

    pub fn specified_strategy(&self, game_id: String) -> SpecifiedStrategy {
        SpecifiedStrategy { game_id }
    }

    pub fn elo_pair_strategy(&self) -> arena_core::elo::EloPairStrategy {
        arena_core::elo::EloPairStrategy {
            engine: self.elo.clone(),
            reports: self.reports.clone(),
        }
    }
}
