//! State machine for translating Vertex streaming chunks into OpenAI chunks.
//!
//! The [`StreamTranslator`] processes `streamGenerateContent` payloads one at a
//! time and emits the corresponding `chat.completion.chunk` objects. It keeps the
//! text it has emitted so usage can be estimated when the stream ends.

use super::openai_types::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction, Usage,
};
use super::response::{completion_id, map_finish_reason, tool_call_id};
use super::usage::{response_text_to_usage, usage_from_metadata};
use super::vertex_types::{GenerateContentResponse, UsageMetadata};
use std::collections::HashMap;

/// Translates Vertex stream chunks into OpenAI stream chunks.
///
/// Usage:
///   let mut translator = StreamTranslator::new("gemini-pro", prompt_tokens);
///   for chunk in vertex_chunks {
///       for out in translator.process_chunk(&chunk) {
///           // forward as `data: {json}`
///       }
///   }
///   let (usage_chunk, usage) = translator.finish();
#[derive(Debug)]
pub struct StreamTranslator {
    id: String,
    model: String,
    created: i64,
    prompt_tokens: u32,
    finished: bool,
    /// Keyed by candidate index.
    choices: HashMap<u32, ChoiceState>,
    response_text: String,
    reported_usage: Option<UsageMetadata>,
}

#[derive(Debug, Default)]
struct ChoiceState {
    role_sent: bool,
    saw_tool_call: bool,
    next_tool_index: u32,
}

impl StreamTranslator {
    pub fn new(model: &str, prompt_tokens: u32) -> Self {
        Self {
            id: completion_id(),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            prompt_tokens,
            finished: false,
            choices: HashMap::new(),
            response_text: String::new(),
            reported_usage: None,
        }
    }

    /// Process one Vertex chunk, returning zero or more OpenAI chunks.
    pub fn process_chunk(&mut self, chunk: &GenerateContentResponse) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }

        if let Some(meta) = chunk.usage_metadata {
            self.reported_usage = Some(meta);
        }

        let mut out = Vec::new();

        for candidate in &chunk.candidates {
            let state = self.choices.entry(candidate.index).or_default();
            let mut delta = ChunkDelta::default();
            let mut content = String::new();
            let mut reasoning = String::new();
            let mut tool_calls = Vec::new();

            for part in &candidate.content.parts {
                if let Some(ref call) = part.function_call {
                    tool_calls.push(ChunkToolCall {
                        index: state.next_tool_index,
                        id: Some(tool_call_id()),
                        call_type: Some("function".to_string()),
                        function: Some(ChunkToolCallFunction {
                            name: Some(call.name.clone()),
                            arguments: Some(call.args.to_string()),
                        }),
                    });
                    state.next_tool_index += 1;
                    state.saw_tool_call = true;
                } else if let Some(ref text) = part.text {
                    if part.is_thought() {
                        reasoning.push_str(text);
                    } else {
                        content.push_str(text);
                    }
                }
            }

            self.response_text.push_str(&reasoning);
            self.response_text.push_str(&content);

            if !content.is_empty() {
                delta.content = Some(content);
            }
            if !reasoning.is_empty() {
                delta.reasoning_content = Some(reasoning);
            }
            if !tool_calls.is_empty() {
                delta.tool_calls = Some(tool_calls);
            }

            let finish_reason = candidate.finish_reason.as_deref().map(|reason| {
                if state.saw_tool_call {
                    "tool_calls".to_string()
                } else {
                    map_finish_reason(reason)
                }
            });

            let has_payload = delta.content.is_some()
                || delta.reasoning_content.is_some()
                || delta.tool_calls.is_some();
            if !has_payload && finish_reason.is_none() {
                continue;
            }

            if !state.role_sent {
                delta.role = Some("assistant".to_string());
                state.role_sent = true;
            }

            out.push(self.make_chunk(vec![ChunkChoice {
                index: candidate.index,
                delta,
                finish_reason,
            }]));
        }

        out
    }

    /// Call when the stream ends. Returns the trailing usage-only chunk (once)
    /// and the final usage.
    pub fn finish(&mut self) -> (Option<ChatCompletionChunk>, Usage) {
        let usage = self.usage();
        if self.finished {
            return (None, usage);
        }
        self.finished = true;

        let mut chunk = self.make_chunk(Vec::new());
        chunk.usage = Some(usage);
        (Some(chunk), usage)
    }

    /// Usage so far: provider-reported when available, otherwise estimated.
    pub fn usage(&self) -> Usage {
        match self.reported_usage {
            Some(ref meta) if meta.total_token_count > 0 => usage_from_metadata(meta),
            _ => response_text_to_usage(&self.response_text, self.prompt_tokens),
        }
    }

    /// All text emitted so far, thoughts included.
    pub fn response_text(&self) -> &str {
        &self.response_text
    }

    fn make_chunk(&self, choices: Vec<ChunkChoice>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage: None,
        }
    }
}
