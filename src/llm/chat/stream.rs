use super::event::{ parse_line, UpstreamEvent };
use crate::history::StreamGuard;
use futures::{ Stream, StreamExt };
use log::{ info, warn };
use std::convert::Infallible;
use std::fmt::Display;
use tokio::sync::mpsc;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

pub type RelayChunk = Result<String, Infallible>;

pub fn error_fragment(message: impl Display) -> String {
    format!("\n[Error] {}\n", message)
}

/// Splits an incremental byte stream into lines, holding a trailing partial
/// line until more data arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete[..last_newline]
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Returns whatever is still buffered once the upstream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).into_owned();
        if text.trim().is_empty() { None } else { Some(text) }
    }
}

/// Text produced by one upstream line: what the browser sees, and the part of
/// it that belongs to the assistant's answer.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Fragment {
    pub output: String,
    pub content: String,
}

/// Thinking/content state machine. Wraps reasoning text in
/// `<think>`..`</think>` and passes answer text through untouched.
#[derive(Debug, Default)]
pub struct RelayState {
    thinking_open: bool,
    finished: bool,
}

impl RelayState {
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn feed_line(&mut self, line: &str) -> Fragment {
        let mut fragment = Fragment::default();
        if self.finished {
            return fragment;
        }
        if let Some(event) = parse_line(line) {
            self.apply(event, &mut fragment);
        }
        fragment
    }

    pub fn apply(&mut self, event: UpstreamEvent, fragment: &mut Fragment) {
        match event {
            UpstreamEvent::Done => {
                self.close_thinking(fragment);
                self.finished = true;
            }
            UpstreamEvent::Error(message) => {
                fragment.output.push_str(&error_fragment(message));
            }
            UpstreamEvent::Delta { thinking, content, finished } => {
                if let Some(thinking) = thinking {
                    if !self.thinking_open {
                        self.thinking_open = true;
                        fragment.output.push_str(THINK_OPEN);
                    }
                    fragment.output.push_str(&thinking);
                }
                if let Some(content) = content {
                    self.close_thinking(fragment);
                    fragment.output.push_str(&content);
                    fragment.content.push_str(&content);
                }
                if finished {
                    self.close_thinking(fragment);
                    self.finished = true;
                }
            }
        }
    }

    fn close_thinking(&mut self, fragment: &mut Fragment) {
        if self.thinking_open {
            self.thinking_open = false;
            fragment.output.push_str(THINK_CLOSE);
        }
    }
}

async fn emit(
    tx: &mpsc::Sender<RelayChunk>,
    guard: &mut StreamGuard,
    fragment: Fragment
) -> bool {
    guard.push_reply(&fragment.content);
    if fragment.output.is_empty() {
        return true;
    }
    tx.send(Ok(fragment.output)).await.is_ok()
}

/// Reads the upstream body to completion (or cancellation), forwarding the
/// relayed text into `tx`. The guard is dropped on return, which records the
/// reply and unregisters the stream.
pub async fn pump<S, B, E>(upstream: S, mut guard: StreamGuard, tx: mpsc::Sender<RelayChunk>)
    where S: Stream<Item = Result<B, E>>, B: AsRef<[u8]>, E: Display
{
    let mut upstream = std::pin::pin!(upstream);
    let token = guard.token().clone();
    let mut lines = LineBuffer::default();
    let mut state = RelayState::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Reply for {} stopped by client", guard.key());
                break;
            }
            _ = tx.closed() => {
                info!("Client for {} went away while the upstream was silent", guard.key());
                break;
            }
            next = upstream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for line in lines.push(chunk.as_ref()) {
                    let fragment = state.feed_line(&line);
                    if !emit(&tx, &mut guard, fragment).await {
                        info!("Client for {} went away mid-reply", guard.key());
                        return;
                    }
                    if state.is_finished() {
                        break;
                    }
                }
                if state.is_finished() {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("Upstream stream for {} failed: {}", guard.key(), e);
                let _ = tx.send(Ok(error_fragment(e))).await;
                break;
            }
            None => {
                if let Some(rest) = lines.finish() {
                    let fragment = state.feed_line(&rest);
                    emit(&tx, &mut guard, fragment).await;
                }
                break;
            }
        }
    }

    info!(
        "Reply for {} finished ({} chars of answer)",
        guard.key(),
        guard.reply().chars().count()
    );
    // Record the reply before `tx` closes the response body.
    drop(guard);
}
