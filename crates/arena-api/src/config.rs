use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    TrustedLocal,
    Token,
}

impl FromStr for AuthMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trusted_local" | "trusted-local" | "local" => Ok(Self::TrustedLocal),
            "token" => Ok(Self::Token),
            other => {
                anyhow::bail!("invalid auth mode '{other}'. expected one of: trusted_local, token")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArenaConfig {
    pub host: String,
    pub port: u16,
    pub served_by: String,
    pub auth_mode: AuthMode,
    pub token: Option<String>,
    pub games_path: PathBuf,
    pub redis_url: Option<String>,
    pub admin_emails: Vec<String>,
    pub report_webhook_url: Option<String>,
    pub competition_enabled: bool,
    pub max_sessions_per_user: usize,
    pub session_ttl: Duration,
    pub container_memory_bytes: Option<i64>,
    pub container_cpu_nanos: Option<i64>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            served_by: "gamebattle-arena".to_string(),
            auth_mode: AuthMode::TrustedLocal,
            token: None,
            games_path: PathBuf::from("./games"),
            redis_url: None,
            admin_emails: Vec::new(),
            report_webhook_url: None,
            competition_enabled: true,
            max_sessions_per_user: 1,
            session_ttl: Duration::from_secs(60 * 60),
            container_memory_bytes: None,
            container_cpu_nanos: None,
        }
    }
}

impl ArenaConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = env::var("ARENA_HOST") {
            config.host = host;
        }

        if let Ok(port) = env::var("ARENA_PORT") {
            config.port = port
                .parse::<u16>()
                .with_context(|| format!("failed parsing ARENA_PORT='{port}' as u16"))?;
        }

        if let Ok(served_by) = env::var("ARENA_SERVED_BY") {
            config.served_by = served_by;
        }

        if let Ok(mode) = env::var("ARENA_AUTH_MODE") {
            config.auth_mode = mode.parse::<AuthMode>()?;
        }

        if let Ok(token) = env::var("ARENA_TOKEN")
            && !token.trim().is_empty()
        {
            config.token = Some(token);
        }

        if let Ok(games_path) = env::var("ARENA_GAMES_PATH") {
            config.games_path = PathBuf::from(games_path);
        }

        if let Ok(redis_url) = env::var("ARENA_REDIS_URL")
            && !redis_url.trim().is_empty()
        {
            config.redis_url = Some(redis_url);
        }

        if let Ok(admins) = env::var("ARENA_ADMIN_EMAILS") {
            config.admin_emails = admins
                .split(',')
                .map(|email| email.trim().to_ascii_lowercase())
                .filter(|email| !email.is_empty())
                .collect();
        }

        if let Ok(webhook) = env::var("ARENA_REPORT_WEBHOOK_URL")
            && !webhook.trim().is_empty()
        {
            config.report_webhook_url = Some(webhook);
        }

        if let Ok(competition) = env::var("ARENA_COMPETITION_ENABLED") {
            config.competition_enabled = competition.trim().eq_ignore_ascii_case("true")
                || competition.trim() == "1";
        }

        if let Ok(max_sessions) = env::var("ARENA_MAX_SESSIONS_PER_USER") {
            config.max_sessions_per_user = max_sessions.parse::<usize>().with_context(|| {
                format!("failed parsing ARENA_MAX_SESSIONS_PER_USER='{max_sessions}' as usize")
            })?;
        }

        if let Ok(ttl_secs) = env::var("ARENA_SESSION_TTL_SECS") {
            let parsed: u64 = ttl_secs
                .parse()
                .with_context(|| format!("failed parsing ARENA_SESSION_TTL_SECS='{ttl_secs}' as u64"))?;
            config.session_ttl = Duration::from_secs(parsed);
        }

        if let Ok(memory_bytes) = env::var("ARENA_CONTAINER_MEMORY_BYTES") {
            config.container_memory_bytes = Some(memory_bytes.parse::<i64>().with_context(|| {
                format!("failed parsing ARENA_CONTAINER_MEMORY_BYTES='{memory_bytes}' as i64")
            })?);
        }

        if let Ok(cpu_nanos) = env::var("ARENA_CONTAINER_CPU_NANOS") {
            config.container_cpu_nanos = Some(cpu_nanos.parse::<i64>().with_context(|| {
                format!("failed parsing ARENA_CONTAINER_CPU_NANOS='{cpu_nanos}' as i64")
            })?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth_mode == AuthMode::Token
            && self
                .token
                .as_deref()
                .is_none_or(|token| token.trim().is_empty())
        {
            anyhow::bail!("ARENA_TOKEN must be configured when auth mode is token");
        }

        if self.auth_mode == AuthMode::TrustedLocal && !is_loopback_host(&self.host) {
            anyhow::bail!(
                "trusted_local auth mode requires loopback host; set ARENA_HOST to 127.0.0.1/::1 (or localhost) or switch to token auth"
            );
        }

        Ok(())
    }
}

fn is_loopback_host(host: &str) -> bool {
    let normalized = host
        .trim()
        .trim_matches('[')
        .trim_matches(']')
        .to_ascii_lowercase();

    matches!(normalized.as_str(), "127.0.0.1" | "localhost" | "::1")
}

#[cfg(test)]
mod tests {
    use super::{ArenaConfig, AuthMode};

    #[test]
    fn defaults_are_localhost_and_trusted_local() {
        let config = ArenaConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.auth_mode, AuthMode::TrustedLocal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn trusted_local_rejects_non_loopback_hosts() {
        let mut config = ArenaConfig::default();
        config.host = "0.0.0.0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn token_auth_allows_non_loopback_hosts() {
        let mut config = ArenaConfig::default();
        config.host = "0.0.0.0".to_string();
        config.auth_mode = AuthMode::Token;
        config.token = Some("secret-token".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn admin_emails_default_empty() {
        let config = ArenaConfig::default();
        assert!(config.admin_emails.is_empty());
    }
}
