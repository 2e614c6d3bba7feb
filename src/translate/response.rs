use super::openai_types::{
    ChatCompletionResponse, ChatToolCall, ChatToolCallFunction, Choice, ChoiceMessage,
    EmbeddingItem, EmbeddingResponse as OpenAiEmbeddingResponse, Usage,
};
use super::usage::{response_text_to_usage, usage_from_metadata};
use super::vertex_types::{
    Candidate, EmbeddingResponse, GenerateContentResponse, VertexErrorResponse,
};
use crate::error::RelayError;

/// Translate a Vertex `generateContent` response into a chat completion.
/// Pure function: `model` is the clean model name the client asked for.
///
/// Usage comes from `usageMetadata` when the provider sent it, otherwise it is
/// estimated from the generated text and `prompt_tokens`.
pub fn gemini_to_openai(
    resp: &GenerateContentResponse,
    model: &str,
    prompt_tokens: u32,
) -> ChatCompletionResponse {
    let choices: Vec<Choice> = resp.candidates.iter().map(candidate_to_choice).collect();

    let usage = match resp.usage_metadata {
        Some(ref meta) => usage_from_metadata(meta),
        None => {
            let text: String = choices
                .iter()
                .filter_map(|c| c.message.content.as_deref())
                .collect();
            response_text_to_usage(&text, prompt_tokens)
        }
    };

    ChatCompletionResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices,
        usage,
    }
}

fn candidate_to_choice(candidate: &Candidate) -> Choice {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for part in &candidate.content.parts {
        if let Some(ref call) = part.function_call {
            tool_calls.push(ChatToolCall {
                id: tool_call_id(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: call.name.clone(),
                    arguments: call.args.to_string(),
                },
            });
        } else if let Some(ref t) = part.text {
            if part.is_thought() {
                reasoning.push_str(t);
            } else {
                text.push_str(t);
            }
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        candidate.finish_reason.as_deref().map(map_finish_reason)
    } else {
        Some("tool_calls".to_string())
    };

    Choice {
        index: candidate.index,
        message: ChoiceMessage {
            role: "assistant".to_string(),
            content: Some(text),
            reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        },
        finish_reason,
    }
}

/// Map a Vertex `finishReason` to an OpenAI `finish_reason`.
pub fn map_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" => "content_filter".to_string(),
        "MALFORMED_FUNCTION_CALL" => "tool_calls".to_string(),
        other => other.to_lowercase(),
    }
}

/// Translate Vertex embedding predictions into the unified embedding response.
///
/// `data[i].index` is the prediction's position; `usage.total_tokens` is the sum
/// of per-prediction token counts.
pub fn embedding_to_openai(resp: &EmbeddingResponse, model: &str) -> OpenAiEmbeddingResponse {
    let data: Vec<EmbeddingItem> = resp
        .predictions
        .iter()
        .enumerate()
        .map(|(index, pred)| EmbeddingItem {
            object: "embedding".to_string(),
            index,
            embedding: pred.embeddings.values.clone(),
        })
        .collect();

    let total_tokens = resp
        .predictions
        .iter()
        .map(|p| p.embeddings.statistics.token_count)
        .fold(0, u32::saturating_add);

    OpenAiEmbeddingResponse {
        object: "list".to_string(),
        data,
        model: model.to_string(),
        usage: Usage {
            prompt_tokens: total_tokens,
            completion_tokens: 0,
            total_tokens,
        },
    }
}

/// Build an upstream error from a non-success Vertex response body.
pub fn vertex_error_to_relay(status: u16, body: &[u8]) -> RelayError {
    match serde_json::from_slice::<VertexErrorResponse>(body) {
        Ok(err) if !err.error.message.is_empty() => {
            let message = if err.error.status.is_empty() {
                err.error.message
            } else {
                format!("{} ({})", err.error.message, err.error.status)
            };
            RelayError::upstream(status, message)
        }
        _ => {
            let text = String::from_utf8_lossy(body);
            RelayError::upstream(status, truncate(&text, 500).to_string())
        }
    }
}

pub(crate) fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn tool_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::vertex_types::*;

    fn text_response(text: &str, finish_reason: Option<&str>) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: "model".to_string(),
                    parts: vec![Part::text(text)],
                },
                finish_reason: finish_reason.map(String::from),
                index: 0,
            }],
            usage_metadata: None,
            model_version: None,
        }
    }

    fn prediction(values: Vec<f64>, token_count: u32) -> EmbeddingPrediction {
        EmbeddingPrediction {
            embeddings: EmbeddingData {
                statistics: EmbeddingStatistics {
                    truncated: false,
                    token_count,
                },
                values,
            },
        }
    }

    #[test]
    fn test_simple_text_response() {
        let mut resp = text_response("Hello!", Some("STOP"));
        resp.usage_metadata = Some(UsageMetadata {
            prompt_token_count: 10,
            candidates_token_count: 20,
            thoughts_token_count: 0,
            total_token_count: 30,
        });

        let result = gemini_to_openai(&resp, "gemini-pro", 99);

        assert_eq!(result.object, "chat.completion");
        assert_eq!(result.model, "gemini-pro");
        assert!(result.id.starts_with("chatcmpl-"));
        assert_eq!(result.choices.len(), 1);
        assert_eq!(result.choices[0].message.content.as_deref(), Some("Hello!"));
        assert_eq!(result.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(result.usage.prompt_tokens, 10);
        assert_eq!(result.usage.completion_tokens, 20);
        assert_eq!(result.usage.total_tokens, 30);
    }

    #[test]
    fn test_missing_usage_is_estimated() {
        let resp = text_response("12345678", Some("STOP"));
        let result = gemini_to_openai(&resp, "gemini-pro", 7);
        assert_eq!(result.usage.prompt_tokens, 7);
        assert_eq!(result.usage.completion_tokens, 2);
        assert_eq!(result.usage.total_tokens, 9);
    }

    #[test]
    fn test_thoughts_and_function_calls() {
        let resp = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: "model".to_string(),
                    parts: vec![
                        Part {
                            text: Some("Need the weather.".to_string()),
                            thought: Some(true),
                            ..Part::default()
                        },
                        Part {
                            function_call: Some(FunctionCall {
                                name: "get_weather".to_string(),
                                args: serde_json::json!({"city": "London"}),
                            }),
                            ..Part::default()
                        },
                    ],
                },
                finish_reason: Some("STOP".to_string()),
                index: 0,
            }],
            usage_metadata: None,
            model_version: None,
        };

        let result = gemini_to_openai(&resp, "gemini-2.0-flash-001", 0);
        let message = &result.choices[0].message;

        assert_eq!(message.reasoning_content.as_deref(), Some("Need the weather."));
        assert_eq!(message.content.as_deref(), Some(""));
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
        assert!(calls[0].id.starts_with("call_"));
        let args: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args["city"], "London");
        assert_eq!(result.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason("STOP"), "stop");
        assert_eq!(map_finish_reason("MAX_TOKENS"), "length");
        assert_eq!(map_finish_reason("SAFETY"), "content_filter");
        assert_eq!(map_finish_reason("OTHER"), "other");
    }

    #[test]
    fn test_embedding_index_and_usage() {
        let resp = EmbeddingResponse {
            predictions: vec![prediction(vec![0.1, 0.2], 3), prediction(vec![0.3, 0.4], 5)],
        };

        let result = embedding_to_openai(&resp, "text-multilingual-embedding-002");

        assert_eq!(result.model, "text-multilingual-embedding-002");
        assert_eq!(result.usage.total_tokens, 8);
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].index, 0);
        assert_eq!(result.data[0].embedding, vec![0.1, 0.2]);
        assert_eq!(result.data[1].index, 1);
        assert_eq!(result.data[1].embedding, vec![0.3, 0.4]);
    }

    #[test]
    fn test_vertex_error_body() {
        let body = br#"{"error":{"code":400,"message":"Invalid task type","status":"INVALID_ARGUMENT"}}"#;
        let err = vertex_error_to_relay(400, body);
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("Invalid task type (INVALID_ARGUMENT)"));

        let err = vertex_error_to_relay(503, b"<html>unavailable</html>");
        assert_eq!(err.status_code(), 503);
        assert!(err.to_string().contains("unavailable"));
    }
}
