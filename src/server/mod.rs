pub mod api;

use crate::cli::Args;
use crate::history::ConversationStore;
use crate::llm::chat::ChatCompletionClient;
use crate::llm::LlmConfig;
use crate::relay::ChatRelay;
use crate::widgets::github::{ GitHubClient, GitHubConfig };
use crate::widgets::spotify::{ SpotifyClient, SpotifyConfig };
use crate::widgets::system::{ SystemConfig, SystemMonitor };
use crate::widgets::weather::{ WeatherClient, WeatherConfig };
use axum::routing::{ get, post };
use axum::Router;
use log::{ error, info };
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{ Any, CorsLayer };

/// Shared handles every route draws from.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<ChatRelay>,
    pub weather: Arc<WeatherClient>,
    pub spotify: Arc<SpotifyClient>,
    pub github: Arc<GitHubClient>,
    pub system: Arc<SystemMonitor>,
}

impl AppState {
    pub fn from_args(args: &Args, store: Arc<ConversationStore>) -> Self {
        let client = ChatCompletionClient::new(LlmConfig::from_args(args));
        Self {
            relay: Arc::new(ChatRelay::new(client, store, args.chat_cancel_superseded)),
            weather: Arc::new(WeatherClient::new(WeatherConfig::from_args(args))),
            spotify: Arc::new(SpotifyClient::new(SpotifyConfig::from_args(args))),
            github: Arc::new(GitHubClient::new(GitHubConfig::from_args(args))),
            system: Arc::new(SystemMonitor::new(SystemConfig::from_args(args))),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/assistant", post(api::submit_handler).delete(api::cancel_handler))
        .route("/api/weather", get(api::weather_handler))
        .route("/api/spotify", get(api::spotify_handler))
        .route("/api/github-activity", get(api::github_activity_handler))
        .route("/api/system", get(api::system_handler))
        .layer(cors)
        .with_state(state)
}

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(addr: String, state: AppState, args: Args) -> Self {
        Self { addr, state, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let app = router(self.state.clone());

        match (self.args.enable_tls, &self.args.tls_cert_path, &self.args.tls_key_path) {
            (true, Some(cert_path), Some(key_path)) => {
                let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                    cert_path,
                    key_path
                ).await?;
                info!("HTTPS server listening on: https://{}", addr);
                axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
            }
            (enable_tls, _, _) => {
                if enable_tls {
                    error!("ENABLE_TLS is set but TLS_CERT_PATH/TLS_KEY_PATH are missing; serving plain HTTP");
                }
                let listener = tokio::net::TcpListener::bind(addr).await?;
                info!("HTTP server listening on: http://{}", addr);
                axum::serve(listener, app.into_make_service()).await?;
            }
        }

        Ok(())
    }
}
