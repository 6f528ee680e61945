use crate::cli::Args;
use crate::error::ApiError;
use base64::{ engine::general_purpose::STANDARD, Engine as _ };
use log::{ debug, warn };
use reqwest::header::AUTHORIZATION;
use reqwest::{ Client as HttpClient, StatusCode };
use serde::{ Deserialize, Serialize };
use std::time::{ Duration, Instant };
use tokio::sync::Mutex;

pub const CACHE_TTL: Duration = Duration::from_secs(3);
const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub accounts_url: String,
    pub api_url: String,
}

impl SpotifyConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            client_id: args.spotify_client_id.clone(),
            client_secret: args.spotify_client_secret.clone(),
            refresh_token: args.spotify_refresh_token.clone(),
            accounts_url: args.spotify_accounts_url.clone(),
            api_url: args.spotify_api_url.clone(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecentTrack {
    pub title: Option<String>,
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_art: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub is_playing: bool,
    pub is_paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_art: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub recent: Vec<RecentTrack>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize, Default)]
struct Track {
    name: Option<String>,
    #[serde(default)]
    artists: Vec<Artist>,
    album: Option<Album>,
    external_urls: Option<ExternalUrls>,
    duration_ms: Option<u64>,
}

#[derive(Deserialize)]
struct Artist {
    name: String,
}

#[derive(Deserialize)]
struct Album {
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Deserialize)]
struct Image {
    url: String,
}

#[derive(Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Deserialize)]
struct CurrentlyPlaying {
    is_playing: Option<bool>,
    progress_ms: Option<u64>,
    item: Option<Track>,
}

#[derive(Deserialize)]
struct RecentlyPlayed {
    #[serde(default)]
    items: Vec<PlayHistory>,
}

#[derive(Deserialize)]
struct PlayHistory {
    track: Option<Track>,
}

impl Track {
    fn artist_names(&self) -> Option<String> {
        if self.artists.is_empty() {
            return None;
        }
        Some(
            self.artists
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    fn album_art(&self) -> Option<String> {
        self.album.as_ref().and_then(|album| album.images.first()).map(|img| img.url.clone())
    }

    fn link(&self) -> Option<String> {
        self.external_urls.as_ref().and_then(|urls| urls.spotify.clone())
    }
}

struct CachedPlayback {
    fetched_at: Instant,
    value: NowPlaying,
}

#[derive(Default)]
struct PlaybackCache {
    last: Option<CachedPlayback>,
    failed_at: Option<Instant>,
}

/// Now-playing client with a short-lived cache. The cache lock is held for
/// the whole refresh, so concurrent callers wait on one upstream fetch
/// instead of starting their own, and share its failure if it fails.
pub struct SpotifyClient {
    http: HttpClient,
    config: SpotifyConfig,
    cache: Mutex<PlaybackCache>,
}

impl SpotifyClient {
    pub fn new(config: SpotifyConfig) -> Self {
        Self {
            http: HttpClient::new(),
            config,
            cache: Mutex::new(PlaybackCache::default()),
        }
    }

    pub async fn now_playing(&self) -> Result<NowPlaying, ApiError> {
        let requested_at = Instant::now();
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.last.as_ref() {
            if cached.fetched_at.elapsed() < CACHE_TTL {
                return Ok(cached.value.clone());
            }
        }
        // A fetch that failed while this caller was queued answers for it too.
        if cache.failed_at.is_some_and(|failed_at| failed_at >= requested_at) {
            return Err(ApiError::Internal("Spotify error".into()));
        }

        match self.fetch().await {
            Ok(value) => {
                cache.last = Some(CachedPlayback {
                    fetched_at: Instant::now(),
                    value: value.clone(),
                });
                cache.failed_at = None;
                Ok(value)
            }
            Err(e) => {
                warn!("Spotify refresh failed: {}", e);
                cache.failed_at = Some(Instant::now());
                Err(ApiError::Internal("Spotify error".into()))
            }
        }
    }

    async fn access_token(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let (Some(client_id), Some(client_secret), Some(refresh_token)) = (
            self.config.client_id.as_deref(),
            self.config.client_secret.as_deref(),
            self.config.refresh_token.as_deref(),
        ) else {
            return Err("Spotify credentials are not configured".into());
        };

        let basic = STANDARD.encode(format!("{}:{}", client_id, client_secret));
        let url = format!("{}/api/token", self.config.accounts_url.trim_end_matches('/'));
        let resp = self.http
            .post(&url)
            .header(AUTHORIZATION, format!("Basic {}", basic))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send().await?;

        if !resp.status().is_success() {
            return Err(format!("Failed to refresh Spotify token ({})", resp.status()).into());
        }
        Ok(resp.json::<TokenResponse>().await?.access_token)
    }

    async fn fetch(&self) -> Result<NowPlaying, Box<dyn std::error::Error + Send + Sync>> {
        let token = self.access_token().await?;
        let api = self.config.api_url.trim_end_matches('/');
        let bearer = format!("Bearer {}", token);

        let now_resp = self.http
            .get(format!("{}/v1/me/player/currently-playing", api))
            .header(AUTHORIZATION, &bearer)
            .send().await?;
        let current = if now_resp.status() != StatusCode::NO_CONTENT && now_resp.status().is_success() {
            Some(now_resp.json::<CurrentlyPlaying>().await?)
        } else {
            debug!("Nothing playing on Spotify ({})", now_resp.status());
            None
        };

        let recent_resp = self.http
            .get(format!("{}/v1/me/player/recently-played", api))
            .query(&[("limit", RECENT_LIMIT)])
            .header(AUTHORIZATION, &bearer)
            .send().await?;
        let recent = if recent_resp.status().is_success() {
            recent_resp
                .json::<RecentlyPlayed>().await?
                .items.into_iter()
                .map(|entry| {
                    let track = entry.track.unwrap_or_default();
                    RecentTrack {
                        title: track.name.clone(),
                        artist: track.artist_names(),
                        album_art: track.album_art(),
                        url: track.link(),
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(match current {
            Some(CurrentlyPlaying { is_playing, progress_ms, item: Some(item) }) => {
                NowPlaying {
                    is_playing: is_playing == Some(true),
                    is_paused: is_playing == Some(false),
                    title: item.name.clone(),
                    artist: item.artist_names(),
                    album_art: item.album_art(),
                    url: item.link(),
                    progress_ms,
                    duration_ms: item.duration_ms,
                    recent,
                }
            }
            _ =>
                NowPlaying {
                    is_playing: false,
                    is_paused: false,
                    title: None,
                    artist: None,
                    album_art: None,
                    url: None,
                    progress_ms: None,
                    duration_ms: None,
                    recent,
                },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_helpers_join_artists_and_pick_first_image() {
        let track: Track = serde_json::from_value(
            serde_json::json!({
            "name": "Song",
            "artists": [{ "name": "A" }, { "name": "B" }],
            "album": { "images": [{ "url": "big.jpg" }, { "url": "small.jpg" }] },
            "external_urls": { "spotify": "https://open.spotify.com/track/1" }
        })
        ).unwrap();
        assert_eq!(track.artist_names().as_deref(), Some("A, B"));
        assert_eq!(track.album_art().as_deref(), Some("big.jpg"));
        assert_eq!(track.link().as_deref(), Some("https://open.spotify.com/track/1"));
    }

    #[tokio::test]
    async fn queued_callers_share_a_failed_refresh() {
        use std::sync::Arc;
        use wiremock::matchers::{ method, path };
        use wiremock::{ Mock, MockServer, ResponseTemplate };

        let accounts = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(300)))
            .expect(2)
            .mount(&accounts).await;

        let client = Arc::new(
            SpotifyClient::new(SpotifyConfig {
                client_id: Some("id".into()),
                client_secret: Some("secret".into()),
                refresh_token: Some("rt".into()),
                accounts_url: accounts.uri(),
                api_url: accounts.uri(),
            })
        );

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.now_playing().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = client.now_playing().await;

        assert!(first.await.unwrap().is_err());
        assert_eq!(second.unwrap_err().to_string(), "Spotify error");

        // Failures are not cached for callers that arrive afterwards.
        assert!(client.now_playing().await.is_err());
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_network() {
        let client = SpotifyClient::new(SpotifyConfig {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            accounts_url: "http://127.0.0.1:9".into(),
            api_url: "http://127.0.0.1:9".into(),
        });
        let err = client.now_playing().await.unwrap_err();
        assert_eq!(err.to_string(), "Spotify error");
    }
}
