#![allow(dead_code)]

use axum::body::{ to_bytes, Body };
use axum::http::{ Request, Response };
use axum::Router;
use clap::Parser;
use portfolio_api::cli::Args;
use portfolio_api::history::{ ConversationStore, DEFAULT_CHAT_TTL };
use portfolio_api::server::{ router, AppState };
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tower::ServiceExt;

pub fn args(flags: &[&str]) -> Args {
    let argv = std::iter::once("portfolio-api").chain(flags.iter().copied());
    Args::try_parse_from(argv).unwrap()
}

pub fn app(args: &Args) -> (Router, Arc<ConversationStore>) {
    let store = Arc::new(ConversationStore::new(DEFAULT_CHAT_TTL));
    let state = AppState::from_args(args, store.clone());
    (router(state), store)
}

pub fn json_request(method: &str, uri: &str, body: &JsonValue) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

pub async fn body_text(resp: Response<Body>) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(resp: Response<Body>) -> JsonValue {
    serde_json::from_str(&body_text(resp).await).unwrap()
}
