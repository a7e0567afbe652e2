use futures::future::BoxFuture;
use log::debug;
use log::warn;
use serde::Deserialize;
use serde::Serialize;

const CHARS_PER_TOKEN: usize = 4;
const SUMMARY_PREFIX: &str = "Summary of the earlier conversation:\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Rough token estimate at ~4 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

fn estimate_messages(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|message| estimate_tokens(&message.content))
        .sum()
}

/// Produces the summary that replaces the compressed prefix; typically
/// one model call.
pub trait Summarizer: Send + Sync {
    fn summarize<'a>(
        &'a self,
        transcript: &'a str,
        budget_tokens: usize,
    ) -> BoxFuture<'a, anyhow::Result<String>>;
}

#[derive(Debug, Clone, Copy)]
pub struct CompressionConfig {
    /// Recent turns kept verbatim.
    pub keep_recent: usize,
    /// Smaller verbatim tail for local models with tight windows.
    pub keep_recent_local: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            keep_recent: 6,
            keep_recent_local: 3,
        }
    }
}

/// Bound `messages` to roughly `max_tokens`. The system message and
/// the last N turns are preserved verbatim; the remaining prefix is
/// replaced with one summary message. When summarization fails the
/// prefix is dropped instead (truncation fallback).
pub async fn compress(
    messages: &[Message],
    max_tokens: usize,
    is_local_model: bool,
    summarizer: &dyn Summarizer,
    config: CompressionConfig,
) -> Vec<Message> {
    if estimate_messages(messages) <= max_tokens {
        return messages.to_vec();
    }

    let keep_recent = if is_local_model {
        config.keep_recent_local
    } else {
        config.keep_recent
    }
    .max(1);

    let system: Vec<Message> = messages
        .iter()
        .filter(|message| message.role == Role::System)
        .cloned()
        .collect();
    let conversation: Vec<&Message> = messages
        .iter()
        .filter(|message| message.role != Role::System)
        .collect();

    let split = conversation.len().saturating_sub(keep_recent);
    let (prefix, tail) = conversation.split_at(split);
    let tail: Vec<Message> = tail.iter().map(|message| (*message).clone()).collect();

    if prefix.is_empty() {
        // Nothing left to fold; fall through to truncation of the tail
        // itself.
        return truncate_to_budget(system, tail, max_tokens);
    }

    let kept_tokens =
        estimate_messages(&system) + estimate_messages(&tail);
    let summary_budget = max_tokens.saturating_sub(kept_tokens).max(64);

    let transcript = prefix
        .iter()
        .map(|message| format!("{:?}: {}", message.role, message.content))
        .collect::<Vec<_>>()
        .join("\n");

    match summarizer.summarize(&transcript, summary_budget).await {
        Ok(summary) => {
            debug!(
                "compressed {} prefix messages into a {}-token summary",
                prefix.len(),
                estimate_tokens(&summary)
            );
            let mut bounded = summary;
            let max_chars = summary_budget * CHARS_PER_TOKEN;
            if bounded.len() > max_chars {
                bounded.truncate(max_chars);
            }
            let mut out = system;
            out.push(Message::new(
                Role::System,
                format!("{SUMMARY_PREFIX}{bounded}"),
            ));
            out.extend(tail);
            out
        }
        Err(err) => {
            warn!("history summarization failed ({err}); falling back to truncation");
            truncate_to_budget(system, tail, max_tokens)
        }
    }
}

/// Drop oldest non-system messages until the estimate fits.
fn truncate_to_budget(
    system: Vec<Message>,
    mut tail: Vec<Message>,
    max_tokens: usize,
) -> Vec<Message> {
    let system_tokens = estimate_messages(&system);
    while tail.len() > 1 && system_tokens + estimate_messages(&tail) > max_tokens {
        tail.remove(0);
    }
    let mut out = system;
    out.extend(tail);
    out
}
