use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Assistant Upstream Args ---
    /// Base URL of the OpenWebUI/Ollama-compatible chat API (e.g., http://localhost:8080/)
    #[arg(long, env = "OPENWEBUI_URL", default_value = "http://localhost:8080/")]
    pub openwebui_url: String,

    /// Model name sent with every chat completion request
    #[arg(long, env = "OPENWEBUI_MODEL", default_value = "qwen3:14b")]
    pub openwebui_model: String,

    /// Bearer token for the chat API. Requests fail with 500 while this is empty.
    #[arg(long, env = "OPENWEBUI_API_KEY", default_value = "")]
    pub openwebui_api_key: String,

    /// Optional system prompt prepended to every conversation
    #[arg(long, env = "OPENWEBUI_SYSTEM_PROMPT", default_value = "")]
    pub openwebui_system_prompt: String,

    /// keep_alive value forwarded upstream ("0", a number, or a duration like "5m"). Empty omits it.
    #[arg(long, env = "OPENWEBUI_KEEP_ALIVE", default_value = "-1", allow_hyphen_values = true)]
    pub openwebui_keep_alive: String,

    // --- Conversation Store Args ---
    /// Seconds a conversation may stay idle before the sweeper drops it
    #[arg(long, env = "CHAT_TTL_SECS", default_value = "300")]
    pub chat_ttl_secs: u64,

    /// Seconds between background sweeps of idle conversations
    #[arg(long, env = "CHAT_SWEEP_INTERVAL_SECS", default_value = "60")]
    pub chat_sweep_interval_secs: u64,

    /// Cancel a still-running reply when a new message arrives for the same conversation
    #[arg(long, env = "CHAT_CANCEL_SUPERSEDED", default_value = "false")]
    pub chat_cancel_superseded: bool,

    // --- Weather Args ---
    /// Open-Meteo forecast endpoint
    #[arg(long, env = "WEATHER_API_URL", default_value = "https://api.open-meteo.com/v1/forecast")]
    pub weather_api_url: String,

    #[arg(long, env = "WEATHER_LAT", default_value = "51.9851", allow_hyphen_values = true)]
    pub weather_lat: String,

    #[arg(long, env = "WEATHER_LON", default_value = "5.8987", allow_hyphen_values = true)]
    pub weather_lon: String,

    // --- Spotify Args ---
    #[arg(long, env = "SPOTIFY_CLIENT_ID")]
    pub spotify_client_id: Option<String>,

    #[arg(long, env = "SPOTIFY_CLIENT_SECRET")]
    pub spotify_client_secret: Option<String>,

    #[arg(long, env = "SPOTIFY_REFRESH_TOKEN")]
    pub spotify_refresh_token: Option<String>,

    /// Spotify accounts host used for token refresh
    #[arg(long, env = "SPOTIFY_ACCOUNTS_URL", default_value = "https://accounts.spotify.com")]
    pub spotify_accounts_url: String,

    /// Spotify Web API host
    #[arg(long, env = "SPOTIFY_API_URL", default_value = "https://api.spotify.com")]
    pub spotify_api_url: String,

    // --- GitHub Args ---
    /// Classic token with repo + read:user scopes
    #[arg(long, env = "GITHUB_TOKEN")]
    pub github_token: Option<String>,

    /// Login shown when the request does not name one
    #[arg(long, env = "GITHUB_USER", default_value = "Mailootje")]
    pub github_user: String,

    #[arg(long, env = "GITHUB_GRAPHQL_URL", default_value = "https://api.github.com/graphql")]
    pub github_graphql_url: String,

    // --- System Monitor Args ---
    /// JSON object mapping remote server names to stats agent URLs
    #[arg(long, env = "REMOTE_SERVERS")]
    pub remote_servers: Option<String>,

    /// Bearer token sent to remote stats agents
    #[arg(long, env = "STATS_TOKEN", default_value = "")]
    pub stats_token: String,

    // --- General App Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional path to the TLS certificate file (PEM format) for enabling HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}
