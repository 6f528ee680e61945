use super::AppState;
use crate::error::{ ApiError, TextError };
use crate::history::ConversationKey;
use crate::models::chat::{ CancelRequest, CancelResponse, SubmitRequest };
use crate::relay::RelayReply;
use axum::body::{ Body, Bytes };
use axum::extract::{ Query, State };
use axum::http::{ header, StatusCode };
use axum::response::{ IntoResponse, Response };
use axum::Json;
use log::{ debug, info };
use serde::de::DeserializeOwned;
use serde::Deserialize;

const STREAM_HEADERS: [(header::HeaderName, &str); 3] = [
    (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
    (header::CACHE_CONTROL, "no-cache, no-transform"),
    (header::CONNECTION, "keep-alive"),
];

#[derive(Deserialize)]
pub struct ActivityQuery {
    pub user: Option<String>,
}

#[derive(Deserialize)]
pub struct SystemQuery {
    pub server: Option<String>,
}

/// Bodies are parsed leniently: anything unreadable counts as an empty
/// request so the caller gets the usual 400 instead of an extractor rejection.
fn lenient<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    serde_json::from_slice(body).unwrap_or_else(|e| {
        debug!("Ignoring unreadable request body: {}", e);
        T::default()
    })
}

fn sweep_idle(state: &AppState) {
    let removed = state.relay.store().sweep();
    if removed > 0 {
        debug!("Dropped {} idle conversation(s)", removed);
    }
}

pub async fn submit_handler(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    sweep_idle(&state);
    let req: SubmitRequest = lenient(&body);

    let (Some(id), Some(message)) = (req.id.filter(|id| !id.is_empty()), req.message) else {
        return Err(ApiError::BadRequest("Provide an id and message to start a chat.".into()));
    };
    let key = ConversationKey::new(id, req.user_id.as_deref());

    let body = match state.relay.submit(key, message).await? {
        RelayReply::Streaming(chunks) => Body::from_stream(chunks),
        RelayReply::Stopped => Body::empty(),
    };
    Ok((StatusCode::OK, STREAM_HEADERS, body).into_response())
}

pub async fn cancel_handler(State(state): State<AppState>, body: Bytes) -> Response {
    sweep_idle(&state);
    let req: CancelRequest = lenient(&body);

    let Some(id) = req.id.filter(|id| !id.is_empty()) else {
        return ApiError::BadRequest("Provide an id to stop.".into()).into_response();
    };
    let key = ConversationKey::new(id, req.user_id.as_deref());

    if state.relay.cancel(&key) {
        (StatusCode::OK, Json(CancelResponse { ok: true, error: None })).into_response()
    } else {
        info!("Nothing streaming for {}", key);
        (
            StatusCode::NOT_FOUND,
            Json(CancelResponse { ok: false, error: Some("Not found.".into()) }),
        ).into_response()
    }
}

pub async fn weather_handler(State(state): State<AppState>) -> Result<Response, TextError> {
    let report = state.weather.current().await?;
    Ok(Json(report).into_response())
}

pub async fn spotify_handler(State(state): State<AppState>) -> Result<Response, TextError> {
    let playing = state.spotify.now_playing().await?;
    Ok(Json(playing).into_response())
}

pub async fn github_activity_handler(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>
) -> Result<Response, ApiError> {
    let activity = state.github.activity(query.user.as_deref()).await?;
    Ok(Json(activity).into_response())
}

pub async fn system_handler(
    State(state): State<AppState>,
    Query(query): Query<SystemQuery>
) -> Result<Response, TextError> {
    let stats = state.system.stats(query.server.as_deref()).await?;
    Ok(Json(stats).into_response())
}
