//! Summarization collaborator and the deterministic fallback

use crate::bus::Message;
use crate::utils::{first_sentence, normalize_whitespace, truncate};
use async_trait::async_trait;

/// Longest sentence taken from a single message by the fallback summary
const FALLBACK_SENTENCE_MAX: usize = 160;

/// Longest message body quoted in a summarization prompt
const PROMPT_MESSAGE_MAX: usize = 600;

/// Turns a prompt into a short summary.
///
/// Implementations may fail or return an empty string; the memory store then
/// falls back to [`fallback_summary`].
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str) -> crate::Result<String>;
}

/// Build the prompt for one summarization slice
pub fn build_summary_prompt(messages: &[Message], sentence_budget: usize) -> String {
    let mut prompt = format!(
        "Summarize the following discussion in at most {} sentences. \
         Keep decisions, open proposals and points of disagreement.\n\n",
        sentence_budget
    );
    for message in messages.iter().filter(|m| !m.is_system()) {
        prompt.push_str(&format!(
            "{}: {}\n",
            message.speaker_id,
            truncate(&normalize_whitespace(&message.content), PROMPT_MESSAGE_MAX)
        ));
    }
    prompt
}

/// First sentence of each of the first `max_messages` non-system messages
pub fn fallback_summary(messages: &[Message], max_messages: usize) -> String {
    let parts: Vec<String> = messages
        .iter()
        .filter(|m| !m.is_system())
        .take(max_messages)
        .map(|m| {
            let content = normalize_whitespace(&m.content);
            format!(
                "{}: {}",
                m.speaker_id,
                truncate(first_sentence(&content), FALLBACK_SENTENCE_MAX)
            )
        })
        .collect();

    if parts.is_empty() {
        "No participant messages in this span.".to_string()
    } else {
        parts.join(" | ")
    }
}
