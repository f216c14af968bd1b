//! Data types shared by `PreferenceStore`, `ReportStore`, and `EloEngine`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A vote between the two games of one session.
///
/// `games.0 != games.1` is an invariant enforced by callers constructing a
/// `Preference` from a completed `Session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub session_id: Uuid,
    pub games: (String, String),
    /// 1.0 = `games.0` strictly preferred, 0.0 = `games.1` strictly
    /// preferred, 0.5 = tie. No special-case handling: the Elo update is
    /// symmetric in this value.
    pub first_score: f64,
    pub author_email: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortReason {
    Unclear,
    Buggy,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub session_id: Uuid,
    pub short_reason: ShortReason,
    pub reason: String,
    /// Optional base64 snapshot of the game's output at report time.
    pub output: Option<String>,
    pub author_email: String,
}
