pub mod chat;

use crate::cli::Args;
use serde::Serialize;
use serde_json::Number;
use url::Url;

const CHAT_COMPLETIONS_PATH: &str = "/api/chat/completions";

/// Upstream chat-completion settings, read once at startup.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub system_prompt: String,
    pub keep_alive: String,
}

impl LlmConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            base_url: args.openwebui_url.clone(),
            model: args.openwebui_model.clone(),
            api_key: args.openwebui_api_key.clone(),
            system_prompt: args.openwebui_system_prompt.clone(),
            keep_alive: args.openwebui_keep_alive.clone(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
            model: "qwen3:14b".to_string(),
            api_key: String::new(),
            system_prompt: String::new(),
            keep_alive: "-1".to_string(),
        }
    }
}

/// `keep_alive` as sent upstream: a JSON number when the configured text is
/// numeric, otherwise the text itself (e.g. `"5m"`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KeepAlive {
    Number(Number),
    Duration(String),
}

pub fn parse_keep_alive(raw: &str) -> Option<KeepAlive> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if value == "0" {
        return Some(KeepAlive::Number(Number::from(0)));
    }
    if let Some(int) = parse_radix_literal(value) {
        return Some(KeepAlive::Number(Number::from(int)));
    }
    if let Ok(int) = value.parse::<i64>() {
        return Some(KeepAlive::Number(Number::from(int)));
    }
    match value.parse::<f64>() {
        Ok(float) if float.is_finite() => {
            if float.fract() == 0.0 && float.abs() < (i64::MAX as f64) {
                return Some(KeepAlive::Number(Number::from(float as i64)));
            }
            Number::from_f64(float)
                .map(KeepAlive::Number)
                .or_else(|| Some(KeepAlive::Duration(value.to_string())))
        }
        _ => Some(KeepAlive::Duration(value.to_string())),
    }
}

/// Unsigned `0x`/`0o`/`0b` integer literals, which numeric env values may
/// use the same way a JavaScript `Number()` conversion accepts them.
fn parse_radix_literal(value: &str) -> Option<u64> {
    let lower = value.to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (rest, 2)
    } else {
        return None;
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

/// Resolves the chat-completions endpoint from a configured base URL.
/// Stray trailing `)` and whitespace (a common copy-paste artifact) are
/// dropped first; the path is absolute, so any base path is replaced.
pub fn chat_completions_url(base_url: &str) -> Result<Url, url::ParseError> {
    let cleaned = base_url.trim().trim_end_matches(|c: char| c == ')' || c.is_whitespace());
    Url::parse(cleaned)?.join(CHAT_COMPLETIONS_PATH)
}
