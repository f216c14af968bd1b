//! Domain error taxonomy, independent of any transport.

use thiserror::Error;

/// Errors surfaced by the core subsystems. The API adapter maps these to
/// HTTP status codes; library code never does that translation itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// Session/game/team/preference/report absent, or an owner mismatch
    /// that must be indistinguishable from a truly missing id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller already holds `max_sessions_per_user` live sessions.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The container runtime cannot allocate another container.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A pairing strategy returned an empty game list.
    #[error("no games available: {0}")]
    NoGamesAvailable(String),

    /// Filename, content size, or unexpected field failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No credential was supplied where one is required.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// A credential was supplied but rejected.
    #[error("invalid authentication: {0}")]
    AuthInvalid(String),

    /// Caller lacks permission for the requested action.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The container daemon or a durable store is unreachable.
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Operation requires competition mode to be enabled.
    #[error("competition disabled: {0}")]
    CompetitionDisabled(String),

    /// A domain rule was violated that doesn't fit the other variants.
    #[error("gamebattle error: {0}")]
    GamebattleError(String),
}

pub type ArenaResult<T> = Result<T, ArenaError>;
