use anyhow::Result;
use arena_api::config::ArenaConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Command-line entrypoint for the game-battle arena API server. Flags
/// override the matching `ARENA_*` environment variable when present;
/// everything else comes from `ArenaConfig::from_env`.
#[derive(Debug, Parser)]
#[command(name = "arena-api-server", about = "Game-battle arena API server")]
struct Cli {
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    games_path: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = ArenaConfig::from_env()?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(games_path) = cli.games_path {
        config.games_path = games_path;
    }
    config.validate()?;

    arena_api::serve(config).await
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arena_api=info,arena_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .compact()
        .init();
}
