//! The Vertex adaptor: request conversion and response-path dispatch.
//!
//! Conversion parses model directives and builds the provider body for the
//! operation mode. Dispatch picks exactly one normalizer from the call's
//! `{is_stream, mode}` flags.

use serde::Serialize;

use crate::body::UpstreamResponse;
use crate::error::{RelayError, Result};
use crate::handler::{self, ChatStream};
use crate::translate::directive::{parse_model, ModelDirective};
use crate::translate::openai_types::{
    ChatCompletionResponse, EmbeddingResponse, UnifiedRequest, Usage,
};
use crate::translate::request::{build_embedding_request, build_generation_request};
use crate::translate::vertex_types::{EmbeddingRequest, GenerateContentRequest};

/// Operation requested by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelayMode {
    #[default]
    ChatCompletions,
    Embeddings,
}

impl RelayMode {
    /// Map a request path to a mode. Paths that are not embeddings are chat.
    pub fn from_path(path: &str) -> Self {
        if path.trim_end_matches('/').ends_with("/embeddings") {
            Self::Embeddings
        } else {
            Self::ChatCompletions
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatCompletions => "chat",
            Self::Embeddings => "embeddings",
        }
    }
}

/// Per-call context handed to [`do_response`].
#[derive(Debug, Clone)]
pub struct CallMeta {
    pub is_stream: bool,
    pub mode: RelayMode,
    /// Clean model name, echoed in the unified response.
    pub actual_model_name: String,
    pub prompt_tokens: u32,
}

/// The normalizer a response is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePath {
    GenerationStream,
    Embeddings,
    Generation,
}

impl ResponsePath {
    /// Streaming always wins: embeddings are never streamed.
    pub fn select(is_stream: bool, mode: RelayMode) -> Self {
        match (is_stream, mode) {
            (true, _) => Self::GenerationStream,
            (false, RelayMode::Embeddings) => Self::Embeddings,
            (false, RelayMode::ChatCompletions) => Self::Generation,
        }
    }
}

/// Vertex method to call for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexAction {
    GenerateContent,
    StreamGenerateContent,
    Predict,
}

impl VertexAction {
    /// Method name appended after `models/{model}:`.
    pub fn method(&self) -> &'static str {
        match self {
            Self::GenerateContent => "generateContent",
            Self::StreamGenerateContent => "streamGenerateContent",
            Self::Predict => "predict",
        }
    }

    pub fn query(&self) -> Option<&'static str> {
        match self {
            Self::StreamGenerateContent => Some("alt=sse"),
            Self::GenerateContent | Self::Predict => None,
        }
    }
}

/// Provider-native body, serialized as-is for the transport.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProviderRequest {
    Generation(GenerateContentRequest),
    Embedding(EmbeddingRequest),
}

#[derive(Debug, Clone)]
pub struct ConvertedRequest {
    /// Model name with any directive suffix removed.
    pub model: String,
    pub directive: ModelDirective,
    pub body: ProviderRequest,
}

impl ConvertedRequest {
    pub fn action(&self, is_stream: bool) -> VertexAction {
        match (&self.body, is_stream) {
            (ProviderRequest::Embedding(_), _) => VertexAction::Predict,
            (ProviderRequest::Generation(_), true) => VertexAction::StreamGenerateContent,
            (ProviderRequest::Generation(_), false) => VertexAction::GenerateContent,
        }
    }
}

/// Convert a unified request into the Vertex request for `mode`.
pub fn convert_request(req: Option<&UnifiedRequest>, mode: RelayMode) -> Result<ConvertedRequest> {
    let req = req.ok_or_else(|| RelayError::invalid_request("request is nil"))?;

    let (model, directive) = parse_model(&req.model);
    let directive = directive.with_options(req.vertex_options.as_ref());

    let body = match mode {
        RelayMode::Embeddings => {
            ProviderRequest::Embedding(build_embedding_request(req, &directive)?)
        }
        RelayMode::ChatCompletions => {
            ProviderRequest::Generation(build_generation_request(req, &directive)?)
        }
    };

    tracing::debug!(model = %model, mode = mode.as_str(), ?directive, "Converted request");

    Ok(ConvertedRequest {
        model,
        directive,
        body,
    })
}

/// Normalized result of a relayed call.
pub enum RelayOutput {
    Chat(ChatCompletionResponse),
    Embeddings(EmbeddingResponse),
    /// Usage arrives with the stream's terminal item.
    Stream(ChatStream),
}

impl RelayOutput {
    /// Usage for buffered outputs; `None` for streams.
    pub fn usage(&self) -> Option<Usage> {
        match self {
            Self::Chat(resp) => Some(resp.usage),
            Self::Embeddings(resp) => Some(resp.usage),
            Self::Stream(_) => None,
        }
    }
}

impl std::fmt::Debug for RelayOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat(resp) => f.debug_tuple("Chat").field(resp).finish(),
            Self::Embeddings(resp) => f.debug_tuple("Embeddings").field(resp).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Route a provider response through the normalizer selected by `meta`.
pub async fn do_response(resp: UpstreamResponse, meta: &CallMeta) -> Result<RelayOutput> {
    match ResponsePath::select(meta.is_stream, meta.mode) {
        ResponsePath::GenerationStream => Ok(RelayOutput::Stream(handler::stream_handler(
            resp,
            meta.actual_model_name.clone(),
            meta.prompt_tokens,
        ))),
        ResponsePath::Embeddings => {
            handler::embedding_handler(resp, &meta.actual_model_name)
                .await
                .map(RelayOutput::Embeddings)
        }
        ResponsePath::Generation => {
            handler::handler(resp, &meta.actual_model_name, meta.prompt_tokens)
                .await
                .map(RelayOutput::Chat)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ResponseBody;
    use crate::translate::openai_types::{ChatMessage, EmbeddingInput, VertexOptions};
    use crate::translate::vertex_types::EmbeddingTaskType;

    fn embedding_request(model: &str, inputs: &[&str]) -> UnifiedRequest {
        UnifiedRequest {
            model: model.to_string(),
            input: Some(EmbeddingInput::Multiple(
                inputs.iter().map(|s| (*s).to_string()).collect(),
            )),
            ..UnifiedRequest::default()
        }
    }

    fn meta(is_stream: bool, mode: RelayMode) -> CallMeta {
        CallMeta {
            is_stream,
            mode,
            actual_model_name: "text-multilingual-embedding-002".to_string(),
            prompt_tokens: 0,
        }
    }

    #[test]
    fn test_path_selection() {
        assert_eq!(
            ResponsePath::select(true, RelayMode::Embeddings),
            ResponsePath::GenerationStream
        );
        assert_eq!(
            ResponsePath::select(true, RelayMode::ChatCompletions),
            ResponsePath::GenerationStream
        );
        assert_eq!(
            ResponsePath::select(false, RelayMode::Embeddings),
            ResponsePath::Embeddings
        );
        assert_eq!(
            ResponsePath::select(false, RelayMode::ChatCompletions),
            ResponsePath::Generation
        );
    }

    #[test]
    fn test_mode_from_path() {
        assert_eq!(RelayMode::from_path("/v1/embeddings"), RelayMode::Embeddings);
        assert_eq!(RelayMode::from_path("/v1/chat/completions"), RelayMode::ChatCompletions);
        assert_eq!(RelayMode::from_path("/v1/unknown"), RelayMode::ChatCompletions);
    }

    #[test]
    fn test_missing_request_is_invalid() {
        let err = convert_request(None, RelayMode::Embeddings).unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest { .. }));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_convert_embedding_request() {
        let req = embedding_request("text-multilingual-embedding-002?task_type=RETRIEVAL_QUERY", &["a", "b"]);

        let converted = convert_request(Some(&req), RelayMode::Embeddings).unwrap();

        assert_eq!(converted.model, "text-multilingual-embedding-002");
        assert_eq!(converted.action(false), VertexAction::Predict);
        assert_eq!(converted.action(true), VertexAction::Predict);
        let json = serde_json::to_value(&converted.body).unwrap();
        assert_eq!(json["instances"].as_array().unwrap().len(), 2);
        assert_eq!(json["instances"][0]["content"], "a");
        assert_eq!(json["instances"][1]["task_type"], "RETRIEVAL_QUERY");
    }

    #[test]
    fn test_typed_options_apply_without_suffix() {
        let mut req = embedding_request("text-multilingual-embedding-002", &["a"]);
        req.vertex_options = Some(VertexOptions {
            task_type: Some("SEMANTIC_SIMILARITY".to_string()),
            ..VertexOptions::default()
        });
        let converted = convert_request(Some(&req), RelayMode::Embeddings).unwrap();
        assert_eq!(converted.directive.task_type, EmbeddingTaskType::SemanticSimilarity);
    }

    #[test]
    fn test_convert_generation_request() {
        let req = UnifiedRequest {
            model: "gemini-pro?thinking=1&thinking_budget=500".to_string(),
            messages: vec![ChatMessage::text("user", "Hi")],
            ..UnifiedRequest::default()
        };

        let converted = convert_request(Some(&req), RelayMode::ChatCompletions).unwrap();

        assert_eq!(converted.model, "gemini-pro");
        assert_eq!(converted.action(true), VertexAction::StreamGenerateContent);
        let json = serde_json::to_value(&converted.body).unwrap();
        assert_eq!(json["generationConfig"]["thinkingConfig"]["includeThoughts"], true);
        assert_eq!(json["generationConfig"]["thinkingConfig"]["thinkingBudget"], 500);
    }

    #[tokio::test]
    async fn test_do_response_embeddings_echoes_model() {
        let body = ResponseBody::from_bytes(
            r#"{"predictions":[{"embeddings":{"statistics":{"token_count":4},"values":[1.0]}}]}"#,
        );
        let output = do_response(
            UpstreamResponse::new(200, body),
            &meta(false, RelayMode::Embeddings),
        )
        .await
        .unwrap();

        assert_eq!(output.usage().map(|u| u.total_tokens), Some(4));
        match output {
            RelayOutput::Embeddings(resp) => {
                assert_eq!(resp.model, "text-multilingual-embedding-002");
                assert_eq!(resp.data[0].index, 0);
            }
            other => panic!("Expected embeddings, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_do_response_stream_ignores_mode() {
        let body = ResponseBody::from_bytes("data: {\"candidates\":[]}\n\n");
        let output = do_response(
            UpstreamResponse::new(200, body),
            &meta(true, RelayMode::Embeddings),
        )
        .await
        .unwrap();
        assert!(matches!(output, RelayOutput::Stream(_)));
        assert!(output.usage().is_none());
    }
}
