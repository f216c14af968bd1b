//! HTTP/WebSocket API adapter: config, auth, the `AppState` composition
//! root, and the axum route table. `main.rs` wires a runtime/builder and
//! serves it; everything testable without Docker lives here.

pub mod auth;
pub mod config;
pub mod errors;
pub mod routes;
pub mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use arena_core::launcher::NoopImageBuilder;
use tokio::net::TcpListener;
use tracing::info;

use crate::auth::{Authenticator, OpaqueTokenVerifier};
use crate::config::ArenaConfig;
use crate::state::AppState;

/// Bind and serve the full router until a shutdown signal arrives,
/// stopping every live session before returning.
pub async fn serve(config: ArenaConfig) -> Result<()> {
    let runtime = Arc::new(
        arena_core::container::DockerContainerRuntime::connect()
            .context("connecting to the container runtime")?,
    );
    let auth = Arc::new(Authenticator::from_config(&config, Arc::new(OpaqueTokenVerifier)));
    let games_path = config.games_path.clone();

    let state = AppState::build(config, runtime, Box::new(NoopImageBuilder), auth)
        .await
        .context("building application state")?;

    if let Err(error) = state.launcher.start().await {
        tracing::warn!(%error, path = %games_path.display(), "initial game catalogue scan failed");
    }

    let addr = bind_addr_string(&state.config.host, state.config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "arena-api listening");

    let session_manager = state.session_manager.clone();
    let router = routes::router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    session_manager.stop_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed waiting for ctrl-c shutdown signal");
    }
    info!("shutdown signal received");
}

/// IPv6 hosts need bracketing for `SocketAddr` parsing; IPv4/hostnames
/// don't and must not be double-wrapped if already bracketed.
fn bind_addr_string(host: &str, port: u16) -> String {
    let needs_brackets = host.contains(':') && !host.starts_with('[');
    if needs_brackets {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::bind_addr_string;

    #[test]
    fn ipv4_loopback_formats_without_brackets() {
        assert_eq!(bind_addr_string("127.0.0.1", 3000), "127.0.0.1:3000");
    }

    #[test]
    fn hostname_formats_without_brackets() {
        assert_eq!(bind_addr_string("localhost", 8080), "localhost:8080");
    }

    #[test]
    fn ipv6_loopback_wraps_in_brackets() {
        assert_eq!(bind_addr_string("::1", 3000), "[::1]:3000");
    }

    #[test]
    fn ipv6_any_wraps_in_brackets() {
        assert_eq!(bind_addr_string("::", 3000), "[::]:3000");
    }

    #[test]
    fn ipv6_full_address_wraps_in_brackets() {
        assert_eq!(bind_addr_string("2001:db8::1", 443), "[2001:db8::1]:443");
    }

    #[test]
    fn pre_bracketed_ipv6_does_not_double_wrap() {
        assert_eq!(bind_addr_string("[::1]", 3000), "[::1]:3000");
    }
}
