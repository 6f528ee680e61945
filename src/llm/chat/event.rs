use log::debug;
use serde::de::{ DeserializeOwned, IgnoredAny };
use serde::{ Deserialize, Deserializer };
use serde_json::Value as JsonValue;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One upstream stream line, normalized across the Ollama and OpenAI shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// The `[DONE]` sentinel.
    Done,
    /// An explicit `error` field. Nothing else on the line is used.
    Error(String),
    Delta {
        thinking: Option<String>,
        content: Option<String>,
        finished: bool,
    },
}

/// Reads a field that may carry an unexpected JSON type. A mistyped value
/// counts as absent instead of failing the whole line.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where D: Deserializer<'de>, T: DeserializeOwned
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// `done` and `finish_reason` are flags in the loose sense: any value other
/// than null, false, zero or an empty string ends the stream.
fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        JsonValue::String(text) => !text.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

#[derive(Deserialize, Default)]
struct RawEvent {
    #[serde(default, deserialize_with = "lenient")]
    message: Option<OllamaMessage>,
    #[serde(default, deserialize_with = "lenient")]
    choices: Option<Vec<JsonValue>>,
    #[serde(default)]
    error: Option<RawError>,
    #[serde(default)]
    done: Option<JsonValue>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default, deserialize_with = "lenient")]
    content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    thinking: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    #[serde(default, deserialize_with = "lenient")]
    delta: Option<OpenAIDelta>,
    #[serde(default, deserialize_with = "lenient")]
    message: Option<OpenAIDelta>,
    #[serde(default)]
    finish_reason: Option<JsonValue>,
}

#[derive(Deserialize, Default)]
struct OpenAIDelta {
    #[serde(default, deserialize_with = "lenient")]
    content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    reasoning_content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    reasoning: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    thinking: Option<String>,
}

impl OpenAIDelta {
    fn thinking(&self) -> Option<&String> {
        self.reasoning_content
            .as_ref()
            .or(self.reasoning.as_ref())
            .or(self.thinking.as_ref())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawError {
    Text(String),
    Detailed {
        message: Option<String>,
    },
    Other(IgnoredAny),
}

impl RawError {
    fn message(self) -> Option<String> {
        let message = match self {
            RawError::Text(text) => Some(text),
            RawError::Detailed { message } => message,
            RawError::Other(_) => None,
        };
        message.filter(|m| !m.is_empty())
    }
}

/// Parses one line of the upstream body. Blank and malformed lines yield
/// `None`.
///
/// Field precedence: the Ollama `message` object wins over OpenAI
/// `choices[0]`; within a choice `delta` wins over `message`; thinking text is
/// taken from `reasoning_content`, then `reasoning`, then `thinking`. The
/// first field that is present wins even when it is empty.
pub fn parse_line(line: &str) -> Option<UpstreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let payload = match trimmed.strip_prefix(DATA_PREFIX) {
        Some(rest) => rest.trim(),
        None => trimmed,
    };

    if payload == DONE_SENTINEL {
        return Some(UpstreamEvent::Done);
    }

    let raw: RawEvent = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Ignoring malformed upstream line ({}): {}", e, payload);
            return None;
        }
    };

    if let Some(message) = raw.error.and_then(RawError::message) {
        return Some(UpstreamEvent::Error(message));
    }

    let choice = raw.choices
        .and_then(|choices| choices.into_iter().next())
        .and_then(|first| serde_json::from_value::<OpenAIChoice>(first).ok());
    let (delta, choice_message, finish_reason) = match choice {
        Some(choice) => (
            choice.delta.unwrap_or_default(),
            choice.message.unwrap_or_default(),
            choice.finish_reason,
        ),
        None => (OpenAIDelta::default(), OpenAIDelta::default(), None),
    };
    let (ollama_content, ollama_thinking) = match raw.message {
        Some(message) => (message.content, message.thinking),
        None => (None, None),
    };

    let thinking = ollama_thinking
        .or_else(|| delta.thinking().cloned())
        .or_else(|| choice_message.thinking().cloned())
        .filter(|t| !t.is_empty());
    let content = ollama_content
        .or(delta.content)
        .or(choice_message.content)
        .filter(|c| !c.is_empty());
    let finished =
        raw.done.as_ref().is_some_and(truthy) || finish_reason.as_ref().is_some_and(truthy);

    Some(UpstreamEvent::Delta { thinking, content, finished })
}
