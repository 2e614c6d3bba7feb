//! Token usage estimation.
//!
//! Vertex does not reliably report token counts for streamed output, so the
//! relay estimates them from text at roughly four characters per token. The
//! figures are approximations for accounting, not tokenizer-exact counts.

use super::openai_types::{UnifiedRequest, Usage};
use super::vertex_types::UsageMetadata;

const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of `text`.
pub fn estimate_tokens(text: &str) -> u32 {
    let tokens = text.chars().count().div_ceil(CHARS_PER_TOKEN);
    u32::try_from(tokens).unwrap_or(u32::MAX)
}

/// Build usage from generated text and an already-known prompt token count.
pub fn response_text_to_usage(text: &str, prompt_tokens: u32) -> Usage {
    let completion_tokens = estimate_tokens(text);
    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens.saturating_add(completion_tokens),
    }
}

/// Convert provider-reported usage. Thought tokens count as completion.
pub fn usage_from_metadata(meta: &UsageMetadata) -> Usage {
    let completion_tokens = meta
        .candidates_token_count
        .saturating_add(meta.thoughts_token_count);
    let total_tokens = if meta.total_token_count > 0 {
        meta.total_token_count
    } else {
        meta.prompt_token_count.saturating_add(completion_tokens)
    };
    Usage {
        prompt_tokens: meta.prompt_token_count,
        completion_tokens,
        total_tokens,
    }
}

/// Estimate the prompt size of a request: message text, embedding input, or both.
pub fn estimate_prompt_tokens(req: &UnifiedRequest) -> u32 {
    // Role and framing overhead per message.
    const PER_MESSAGE: u32 = 4;

    let messages: u32 = req
        .messages
        .iter()
        .map(|m| {
            let text = m.content.as_ref().map(|c| c.as_text()).unwrap_or_default();
            estimate_tokens(&text).saturating_add(PER_MESSAGE)
        })
        .fold(0, u32::saturating_add);

    let input: u32 = req
        .parse_input()
        .iter()
        .map(|s| estimate_tokens(s))
        .fold(0, u32::saturating_add);

    messages.saturating_add(input)
}
