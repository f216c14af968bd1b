//! REST + WebSocket route table (spec §6). Each handler translates HTTP
//! concerns into a call on `arena-core`, then maps `ArenaError` back out
//! via `ApiError`.

use std::collections::HashMap;

use arena_core::container::Frame;
use arena_core::errors::ArenaError;
use arena_core::game::GameMeta;
use arena_core::preferences::{Preference, Report, ShortReason};
use arena_core::session::SessionPublicView;
use axum::Json;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Principal;
use crate::errors::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/own", post(create_own_session))
        .route(
            "/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/sessions/{id}/{n}/restart", post(restart_game))
        .route("/sessions/{id}/{n}/ws", get(game_ws))
        .route("/sessions/{id}/preference", post(set_preference))
        .route("/sessions/{id}/{n}/report", post(file_report))
        .route("/leaderboard", get(leaderboard))
        .route("/game", get(list_files).post(add_file))
        .route("/game/file/{*path}", delete(remove_file))
        .route("/game/meta", get(game_meta))
        .route("/game/build", post(build_game))
        .route("/stats", get(stats))
        .route("/stats/{team_id}", get(stats_for_team))
        .route("/allstats.csv", get(allstats_csv))
        .route("/admin/exclude/{team_id}", post(admin_exclude))
        .route("/admin/include/{team_id}", post(admin_include))
        .route("/admin/excluded", get(admin_excluded))
        .route("/admin/history", get(admin_history))
        .route("/admin/reports/{team_id}", get(admin_reports))
        .with_state(state)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    state.auth.authorize(headers).map_err(Into::into)
}

fn require_admin(state: &AppState, principal: &Principal) -> Result<(), ApiError> {
    state.auth.require_admin(principal).map_err(Into::into)
}

// ---- sessions ---------------------------------------------------------

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HashMap<Uuid, SessionPublicView>>, ApiError> {
    let principal = authorize(&state, &headers)?;
    Ok(Json(state.session_manager.user_sessions(&principal.email).await))
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Uuid>, ApiError> {
    let principal = authorize(&state, &headers)?;
    let catalogue = state.launcher.snapshot().await;
    let strategy = state.elo_pair_strategy();
    let id = state
        .session_manager
        .create(principal.email, &catalogue, &strategy, 2)
        .await?;
    Ok(Json(id))
}

#[derive(Debug, Deserialize)]
struct CreateOwnBody {
    game_id: Option<String>,
}

async fn create_own_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CreateOwnBody>>,
) -> Result<Json<Uuid>, ApiError> {
    let principal = authorize(&state, &headers)?;
    let game_id = body.and_then(|Json(body)| body.game_id);
    let catalogue = state.launcher.snapshot().await;

    let id = if let Some(game_id) = game_id {
        require_admin(&state, &principal)?;
        let strategy = state.specified_strategy(game_id);
        state
            .session_manager
            .create(principal.email, &catalogue, &strategy, 1)
            .await?
    } else {
        let strategy = state.own_strategy();
        state
            .session_manager
            .create(principal.email, &catalogue, &strategy, 1)
            .await?
    };
    Ok(Json(id))
}

async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionPublicView>, ApiError> {
    let principal = authorize(&state, &headers)?;
    let view = state.session_manager.public_view(&principal.email, id).await?;
    Ok(Json(view))
}

async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<(), ApiError> {
    let principal = authorize(&state, &headers)?;
    state.session_manager.stop(&principal.email, id).await?;
    Ok(())
}

async fn restart_game(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<(), ApiError> {
    let principal = authorize(&state, &headers)?;
    state
        .session_manager
        .restart_game(&principal.email, id, index)
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreferenceBody {
    score_first: f64,
}

async fn set_preference(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<PreferenceBody>,
) -> Result<(), ApiError> {
    let principal = authorize(&state, &headers)?;

    if !state.session_manager.is_over(&principal.email, id).await? {
        return Err(ArenaError::GamebattleError("session is not over yet".to_string()).into());
    }
    let team_ids = state.session_manager.game_team_ids(&principal.email, id).await?;
    let [a, b] = <[String; 2]>::try_from(team_ids)
        .map_err(|_| ArenaError::GamebattleError("preference requires a two-game session".to_string()))?;

    let preference = Preference {
        session_id: id,
        games: (a, b),
        first_score: body.score_first.clamp(0.0, 1.0),
        author_email: principal.email,
        timestamp: chrono::Utc::now().timestamp_millis() as f64,
    };
    state.preferences.set(id, preference).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportBody {
    short_reason: ShortReason,
    reason: String,
    capture_output: bool,
    restart_game: Option<bool>,
}

async fn file_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(body): Json<ReportBody>,
) -> Result<Json<usize>, ApiError> {
    let principal = authorize(&state, &headers)?;
    let team_id = state
        .session_manager
        .game_team_id(&principal.email, id, index)
        .await?;

    let output = if body.capture_output {
        Some(capture_output_base64(&state, &principal, id, index).await?)
    } else {
        None
    };

    let report = Report {
        session_id: id,
        short_reason: body.short_reason,
        reason: body.reason,
        output,
        author_email: principal.email.clone(),
    };
    let new_len = state.reports.append(&team_id, report.clone()).await?;
    state.notifier.notify(&team_id, &report, new_len).await;

    if body.restart_game.unwrap_or(false) {
        state
            .session_manager
            .restart_game(&principal.email, id, index)
            .await?;
    }
    Ok(Json(new_len))
}

async fn capture_output_base64(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
    index: usize,
) -> Result<String, ApiError> {
    let frames = state
        .session_manager
        .game_output_snapshot(&principal.email, id, index)
        .await?;
    let mut bytes = Vec::new();
    for frame in frames {
        bytes.extend_from_slice(&frame.bytes);
    }
    Ok(BASE64.encode(bytes))
}

#[derive(Debug, Serialize)]
struct LeaderboardEntry {
    name: String,
    score: f64,
}

async fn leaderboard(State(state): State<AppState>) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let catalogue = state.launcher.snapshot().await;
    let excluded = state.reports.excluded_games().await?;
    let ranked = state.elo.top(&catalogue, &excluded).await;
    let entries = ranked
        .into_iter()
        .filter_map(|(team_id, score)| {
            catalogue
                .get(&team_id)
                .map(|meta| LeaderboardEntry { name: meta.name.clone(), score })
        })
        .collect();
    Ok(Json(entries))
}

// ---- game catalogue / file intake --------------------------------------

#[derive(Debug, Deserialize)]
struct TeamIdQuery {
    team_id: String,
}

async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TeamIdQuery>,
) -> Result<Json<HashMap<String, String>>, ApiError> {
    authorize(&state, &headers)?;
    let files = state.launcher.list_files(&query.team_id).await;
    let encoded = files
        .into_iter()
        .map(|(path, bytes)| (path, BASE64.encode(bytes)))
        .collect();
    Ok(Json(encoded))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddFileBody {
    team_id: String,
    path: String,
    content_base64: String,
}

async fn add_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AddFileBody>,
) -> Result<(), ApiError> {
    authorize(&state, &headers)?;
    let bytes = BASE64
        .decode(body.content_base64)
        .map_err(|error| ArenaError::InvalidInput(format!("invalid base64 content: {error}")))?;
    state.launcher.add_file(&body.team_id, &body.path, bytes).await?;
    Ok(())
}

async fn remove_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
    Query(query): Query<TeamIdQuery>,
) -> Result<(), ApiError> {
    authorize(&state, &headers)?;
    state.launcher.remove_file(&query.team_id, &path).await?;
    Ok(())
}

async fn game_meta(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TeamIdQuery>,
) -> Result<Json<GameMeta>, ApiError> {
    authorize(&state, &headers)?;
    state
        .launcher
        .get(&query.team_id)
        .await
        .map(Json)
        .ok_or_else(|| ArenaError::NotFound(format!("no game for team {}", query.team_id)).into())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildGameBody {
    name: String,
    team_id: String,
    entrypoint_file: String,
}

async fn build_game(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BuildGameBody>,
) -> Result<(), ApiError> {
    authorize(&state, &headers)?;
    state
        .launcher
        .build_game(GameMeta {
            name: body.name,
            team_id: body.team_id,
            entrypoint_file: body.entrypoint_file,
        })
        .await?;
    Ok(())
}

// ---- stats / admin ------------------------------------------------------

async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HashMap<String, f64>>, ApiError> {
    let principal = authorize(&state, &headers)?;
    require_admin(&state, &principal)?;
    Ok(Json(state.preferences.all_accumulations().await?))
}

async fn stats_for_team(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(team_id): Path<String>,
) -> Result<Json<f64>, ApiError> {
    let principal = authorize(&state, &headers)?;
    require_admin(&state, &principal)?;
    Ok(Json(state.preferences.accumulation_by(&team_id).await?))
}

async fn allstats_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = authorize(&state, &headers)?;
    require_admin(&state, &principal)?;
    let totals = state.preferences.all_accumulations().await?;
    let mut csv = String::from("email,votes\n");
    for (email, count) in totals {
        csv.push_str(&format!("{email},{count}\n"));
    }
    Ok(([("content-type", "text/csv")], csv))
}

async fn admin_exclude(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(team_id): Path<String>,
) -> Result<(), ApiError> {
    let principal = authorize(&state, &headers)?;
    require_admin(&state, &principal)?;
    state.reports.exclude(&team_id).await?;
    Ok(())
}

async fn admin_include(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(team_id): Path<String>,
) -> Result<(), ApiError> {
    let principal = authorize(&state, &headers)?;
    require_admin(&state, &principal)?;
    state.reports.include(&team_id).await?;
    Ok(())
}

async fn admin_excluded(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    let principal = authorize(&state, &headers)?;
    require_admin(&state, &principal)?;
    let mut excluded: Vec<String> = state.reports.excluded_games().await?.into_iter().collect();
    excluded.sort();
    Ok(Json(excluded))
}

async fn admin_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Preference>>, ApiError> {
    let principal = authorize(&state, &headers)?;
    require_admin(&state, &principal)?;
    Ok(Json(state.preferences.sorted_preferences().await?))
}

async fn admin_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(team_id): Path<String>,
) -> Result<Json<Vec<Report>>, ApiError> {
    let principal = authorize(&state, &headers)?;
    require_admin(&state, &principal)?;
    Ok(Json(state.reports.get(&team_id).await?))
}

// ---- WebSocket ----------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Stdin { data: String },
    Resize { cols: u16, rows: u16 },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Stdout { data: String },
    Bye,
}

async fn game_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| game_ws_connection(socket, state, id, index))
}

async fn game_ws_connection(mut socket: WebSocket, state: AppState, id: Uuid, index: usize) {
    let Some(Ok(Message::Text(token))) = socket.recv().await else {
        let _ = send_bye(&mut socket).await;
        return;
    };
    let token = token.to_string();

    let principal = match state.auth.authorize_ws_token(token.trim()) {
        Ok(principal) => principal,
        Err(_) => {
            warn!(session_id = %id, "ws auth failed");
            let _ = send_bye(&mut socket).await;
            return;
        }
    };

    let subscription = match state
        .session_manager
        .subscribe_game(&principal.email, id, index)
        .await
    {
        Ok(subscription) => subscription,
        Err(error) => {
            warn!(session_id = %id, %error, "ws subscribe failed");
            let _ = send_bye(&mut socket).await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let mut subscription = subscription;

    let reader = async move {
        while let Some(frame) = subscription.next().await {
            if !send_frame(&mut sink, &frame).await {
                break;
            }
        }
        let _ = send_bye_sink(&mut sink).await;
        sink
    };

    let session_manager = state.session_manager.clone();
    let owner_email = principal.email.clone();
    let writer = async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    let text = text.to_string();
                    let Ok(client_frame) = serde_json::from_str::<ClientFrame>(&text) else {
                        continue;
                    };
                    match client_frame {
                        ClientFrame::Stdin { data } => {
                            if let Ok(bytes) = BASE64.decode(data) {
                                let _ = session_manager
                                    .send_to_game(&owner_email, id, index, &bytes)
                                    .await;
                            }
                        }
                        ClientFrame::Resize { cols, rows } => {
                            session_manager
                                .resize_game(&owner_email, id, index, cols, rows)
                                .await;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = writer => {}
    }
    info!(session_id = %id, index, "ws connection closed");
}

async fn send_frame(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: &Frame,
) -> bool {
    let payload = ServerFrame::Stdout {
        data: BASE64.encode(&frame.bytes),
    };
    match serde_json::to_string(&payload) {
        Ok(text) => sink.send(Message::Text(text.into())).await.is_ok(),
        Err(_) => false,
    }
}

async fn send_bye_sink(sink: &mut futures::stream::SplitSink<WebSocket, Message>) -> bool {
    match serde_json::to_string(&ServerFrame::Bye) {
        Ok(text) => sink.send(Message::Text(text.into())).await.is_ok(),
        Err(_) => false,
    }
}

async fn send_bye(socket: &mut WebSocket) -> bool {
    match serde_json::to_string(&ServerFrame::Bye) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_frame_stdout_serializes_with_base64_field() {
        let frame = ServerFrame::Stdout {
            data: "aGVsbG8=".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"stdout\""));
        assert!(json.contains("aGVsbG8="));
    }

    #[test]
    fn server_frame_bye_serializes() {
        let json = serde_json::to_string(&ServerFrame::Bye).unwrap();
        assert_eq!(json, "{\"type\":\"bye\"}");
    }
}
