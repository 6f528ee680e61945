pub mod event;
pub mod stream;

use super::{ chat_completions_url, parse_keep_alive, KeepAlive, LlmConfig };
use crate::error::ApiError;
use crate::models::chat::ChatMessage;
use log::{ debug, warn };
use reqwest::header::{ AUTHORIZATION, CONTENT_TYPE };
use reqwest::{ Client as HttpClient, Response };
use serde::Serialize;
use url::Url;

#[derive(Serialize, Debug)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<KeepAlive>,
}

/// Streaming client for an OpenWebUI/Ollama-compatible chat-completion API.
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    http: HttpClient,
    config: LlmConfig,
}

impl ChatCompletionClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: HttpClient::new(),
            config,
        }
    }

    /// Checks the configuration before anything is sent and returns the
    /// endpoint to call.
    pub fn endpoint(&self) -> Result<Url, ApiError> {
        let url = chat_completions_url(&self.config.base_url).map_err(|e| {
            warn!("Rejecting chat request, bad upstream URL '{}': {}", self.config.base_url, e);
            ApiError::Config(
                format!(
                    "Invalid OPENWEBUI_URL: {}. Check for extra characters.",
                    self.config.base_url
                )
            )
        })?;

        if self.config.api_key.is_empty() {
            return Err(ApiError::Config("Missing OPENWEBUI_API_KEY for OpenWebUI requests.".into()));
        }
        Ok(url)
    }

    /// Upstream message list: the system prompt (when configured) followed by
    /// the whole conversation.
    pub fn build_messages(&self, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let system_prompt = self.config.system_prompt.trim();
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.extend_from_slice(history);
        messages
    }

    /// Sends the streaming request and returns the response once its status
    /// line is in. The body is left for the caller to read.
    pub async fn open_stream(&self, url: Url, history: &[ChatMessage]) -> Result<Response, ApiError> {
        let req = ChatCompletionRequest {
            model: &self.config.model,
            messages: self.build_messages(history),
            stream: true,
            keep_alive: parse_keep_alive(&self.config.keep_alive),
        };
        debug!("Chat request to {}: model={}, {} message(s)", url, req.model, req.messages.len());

        let resp = self.http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .json(&req)
            .send().await
            .map_err(|e| {
                warn!("Chat upstream unreachable: {}", e);
                ApiError::Upstream(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Chat upstream answered {}: {}", status, body);
            let message = if body.is_empty() {
                format!("OpenWebUI request failed with status {}.", status.as_u16())
            } else {
                body
            };
            return Err(ApiError::Upstream(message));
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str, api_key: &str, system_prompt: &str) -> ChatCompletionClient {
        ChatCompletionClient::new(LlmConfig {
            base_url: base_url.into(),
            api_key: api_key.into(),
            system_prompt: system_prompt.into(),
            ..LlmConfig::default()
        })
    }

    #[test]
    fn endpoint_checks_url_before_key() {
        let err = client("::nope::", "", "").endpoint().unwrap_err();
        assert!(matches!(err, ApiError::Config(ref m) if m.starts_with("Invalid OPENWEBUI_URL: ::nope::")));

        let err = client("http://localhost:8080", "", "").endpoint().unwrap_err();
        assert_eq!(err.to_string(), "Missing OPENWEBUI_API_KEY for OpenWebUI requests.");

        let url = client("http://localhost:8080", "key", "").endpoint().unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/chat/completions");
    }

    #[test]
    fn system_prompt_leads_when_set() {
        let history = vec![ChatMessage::user("hi")];
        assert_eq!(client("http://x", "k", "  ").build_messages(&history), history);
        assert_eq!(
            client("http://x", "k", " Be brief. ").build_messages(&history),
            vec![ChatMessage::system("Be brief."), ChatMessage::user("hi")]
        );
    }
}
