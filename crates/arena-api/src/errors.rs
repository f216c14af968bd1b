//! Maps `arena_core::ArenaError` to HTTP responses. The core never knows
//! about status codes; this is the one place that translation happens.

use arena_core::ArenaError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn as_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code.to_string(),
            message: self.message.clone(),
        }
    }
}

impl From<ArenaError> for ApiError {
    fn from(error: ArenaError) -> Self {
        let status = status_for(&error);
        let code = code_for(&error);
        Self::new(status, code, error.to_string())
    }
}

fn status_for(error: &ArenaError) -> StatusCode {
    match error {
        ArenaError::NotFound(_) => StatusCode::NOT_FOUND,
        ArenaError::QuotaExceeded(_) | ArenaError::CapacityExceeded(_) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        ArenaError::NoGamesAvailable(_) => StatusCode::CONFLICT,
        ArenaError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ArenaError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
        ArenaError::AuthInvalid(_) => StatusCode::UNAUTHORIZED,
        ArenaError::Forbidden(_) => StatusCode::FORBIDDEN,
        ArenaError::RuntimeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ArenaError::CompetitionDisabled(_) => StatusCode::FORBIDDEN,
        ArenaError::GamebattleError(_) => StatusCode::BAD_REQUEST,
    }
}

fn code_for(error: &ArenaError) -> &'static str {
    match error {
        ArenaError::NotFound(_) => "NOT_FOUND",
        ArenaError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
        ArenaError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
        ArenaError::NoGamesAvailable(_) => "NO_GAMES_AVAILABLE",
        ArenaError::InvalidInput(_) => "INVALID_INPUT",
        ArenaError::AuthRequired(_) => "AUTH_REQUIRED",
        ArenaError::AuthInvalid(_) => "AUTH_INVALID",
        ArenaError::Forbidden(_) => "FORBIDDEN",
        ArenaError::RuntimeUnavailable(_) => "RUNTIME_UNAVAILABLE",
        ArenaError::CompetitionDisabled(_) => "COMPETITION_DISABLED",
        ArenaError::GamebattleError(_) => "GAMEBATTLE_ERROR",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.as_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let error: ApiError = ArenaError::NotFound("session x".to_string()).into();
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert_eq!(error.code, "NOT_FOUND");
    }

    #[test]
    fn quota_exceeded_maps_to_429() {
        let error: ApiError = ArenaError::QuotaExceeded("too many".to_string()).into();
        assert_eq!(error.status, StatusCode::TOO_MANY_REQUESTS);
    }
}
