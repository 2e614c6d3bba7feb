//! Response normalizers: read a Vertex response and produce the unified shape.
//!
//! Buffered handlers read the body to completion and release it before decoding.
//! The stream handler consumes server-sent events one at a time and forwards each
//! translated chunk as soon as it is produced.

use std::pin::Pin;

use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{Stream, StreamExt};

use crate::body::{ResponseBody, UpstreamResponse};
use crate::error::{RelayError, Result};
use crate::translate::openai_types::{
    ChatCompletionChunk, ChatCompletionResponse, EmbeddingResponse as OpenAiEmbeddingResponse,
    Usage,
};
use crate::translate::response::{embedding_to_openai, gemini_to_openai, vertex_error_to_relay};
use crate::translate::streaming::StreamTranslator;
use crate::translate::vertex_types::{
    EmbeddingResponse, GenerateContentResponse, VertexErrorResponse,
};

/// Item of a normalized generation stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(ChatCompletionChunk),
    /// Terminal item carrying the final usage. Nothing follows it.
    Done(Usage),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Normalize a buffered `:predict` embedding response.
pub async fn embedding_handler(
    resp: UpstreamResponse,
    model: &str,
) -> Result<OpenAiEmbeddingResponse> {
    let bytes = read_buffered(resp).await?;
    reject_error_body(&bytes)?;
    let vertex: EmbeddingResponse =
        serde_json::from_slice(&bytes).map_err(|e| RelayError::decode_failed(e.to_string()))?;
    Ok(embedding_to_openai(&vertex, model))
}

/// Normalize a buffered `:generateContent` response.
pub async fn handler(
    resp: UpstreamResponse,
    model: &str,
    prompt_tokens: u32,
) -> Result<ChatCompletionResponse> {
    let bytes = read_buffered(resp).await?;
    reject_error_body(&bytes)?;
    let vertex: GenerateContentResponse =
        serde_json::from_slice(&bytes).map_err(|e| RelayError::decode_failed(e.to_string()))?;
    Ok(gemini_to_openai(&vertex, model, prompt_tokens))
}

/// Normalize a `:streamGenerateContent?alt=sse` response into a chunk stream.
///
/// Errors end the stream: a transport failure mid-stream is yielded as
/// `ReadFailed`, and the body is released on every path.
pub fn stream_handler(resp: UpstreamResponse, model: String, prompt_tokens: u32) -> ChatStream {
    Box::pin(async_stream::stream! {
        let UpstreamResponse { status, mut body, .. } = resp;

        if !(200..300).contains(&status) {
            match read_and_release(&mut body).await {
                Ok(bytes) => yield Err(vertex_error_to_relay(status, &bytes)),
                Err(e) => yield Err(e),
            }
            return;
        }

        let mut translator = StreamTranslator::new(&model, prompt_tokens);
        let mut failure: Option<RelayError> = None;

        {
            let events = body.by_ref().eventsource();
            futures::pin_mut!(events);

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(EventStreamError::Transport(e)) => {
                        failure = Some(RelayError::read_failed(e.to_string()));
                        break;
                    }
                    Err(e) => {
                        failure = Some(RelayError::decode_failed(e.to_string()));
                        break;
                    }
                };

                let data = event.data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == "[DONE]" {
                    break;
                }

                // Every generation field is optional, so an error event would
                // otherwise decode as an empty chunk.
                if let Ok(err) = serde_json::from_str::<VertexErrorResponse>(data) {
                    failure = Some(error_event(err));
                    break;
                }

                let payload: GenerateContentResponse = match serde_json::from_str(data) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping unparseable stream chunk");
                        continue;
                    }
                };

                for chunk in translator.process_chunk(&payload) {
                    yield Ok(StreamEvent::Chunk(chunk));
                }
            }
        }

        let released = body.release();

        if let Some(err) = failure {
            if let Err(close_err) = released {
                tracing::warn!(error = %close_err, "Failed to release body after stream error");
            }
            yield Err(err);
            return;
        }

        if let Err(e) = released {
            yield Err(e);
            return;
        }

        let (usage_chunk, usage) = translator.finish();
        if let Some(chunk) = usage_chunk {
            yield Ok(StreamEvent::Chunk(chunk));
        }
        tracing::debug!(
            model = %model,
            completion_tokens = usage.completion_tokens,
            "Stream completed"
        );
        yield Ok(StreamEvent::Done(usage));
    })
}

/// Read a buffered response, release it, and surface non-success statuses.
async fn read_buffered(resp: UpstreamResponse) -> Result<Bytes> {
    let UpstreamResponse {
        status, mut body, ..
    } = resp;
    let bytes = read_and_release(&mut body).await?;
    if !(200..300).contains(&status) {
        return Err(vertex_error_to_relay(status, &bytes));
    }
    Ok(bytes)
}

/// A 2xx body can still carry a Vertex error object.
fn reject_error_body(bytes: &[u8]) -> Result<()> {
    match serde_json::from_slice::<VertexErrorResponse>(bytes) {
        Ok(err) => Err(error_event(err)),
        Err(_) => Ok(()),
    }
}

fn error_event(err: VertexErrorResponse) -> RelayError {
    let status = if err.error.code >= 400 { err.error.code } else { 500 };
    RelayError::upstream(status, err.error.message)
}

/// Read to completion, then release. Release is attempted even when the read fails;
/// a read failure takes precedence over a release failure.
async fn read_and_release(body: &mut ResponseBody) -> Result<Bytes> {
    let read = body.read_all().await;
    let released = body.release();
    let bytes = read?;
    released?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::tests::counting_hook;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ok_response(body: &'static str) -> UpstreamResponse {
        UpstreamResponse::new(200, ResponseBody::from_bytes(body))
    }

    #[tokio::test]
    async fn test_embedding_handler_success() {
        let body = r#"{"predictions":[
            {"embeddings":{"statistics":{"truncated":false,"token_count":3},"values":[0.1,0.2]}},
            {"embeddings":{"statistics":{"truncated":false,"token_count":5},"values":[0.3,0.4]}}
        ]}"#;

        let result = embedding_handler(ok_response(body), "text-multilingual-embedding-002")
            .await
            .unwrap();

        assert_eq!(result.usage.total_tokens, 8);
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].index, 0);
        assert_eq!(result.data[0].embedding, vec![0.1, 0.2]);
        assert_eq!(result.data[1].index, 1);
        assert_eq!(result.data[1].embedding, vec![0.3, 0.4]);
    }

    #[tokio::test]
    async fn test_embedding_handler_decode_failure() {
        let err = embedding_handler(ok_response("not json"), "m").await.unwrap_err();
        assert!(matches!(err, RelayError::DecodeFailed { .. }));
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_embedding_handler_close_failure() {
        let body = ResponseBody::from_bytes(r#"{"predictions":[]}"#)
            .with_release(Box::new(|| Err(std::io::Error::other("close"))));
        let err = embedding_handler(UpstreamResponse::new(200, body), "m")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::CloseFailed { .. }));
    }

    #[tokio::test]
    async fn test_read_failure_still_releases() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stream = tokio_stream::iter(vec![Err(std::io::Error::other("reset"))]);
        let body = ResponseBody::new(stream).with_release(counting_hook(&counter));

        let err = handler(UpstreamResponse::new(200, body), "m", 0)
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::ReadFailed { .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let body = ResponseBody::from_bytes(
            r#"{"error":{"code":404,"message":"Model not found","status":"NOT_FOUND"}}"#,
        );
        let err = handler(UpstreamResponse::new(404, body), "m", 0)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(err.to_string().contains("Model not found"));
    }

    #[tokio::test]
    async fn test_handler_success() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"pong"}]},"finishReason":"STOP","index":0}],
            "usageMetadata":{"promptTokenCount":2,"candidatesTokenCount":1,"totalTokenCount":3}}"#;
        let result = handler(ok_response(body), "gemini-pro", 0).await.unwrap();
        assert_eq!(result.choices[0].message.content.as_deref(), Some("pong"));
        assert_eq!(result.usage.total_tokens, 3);
    }

    #[tokio::test]
    async fn test_stream_handler_translates_events() {
        let counter = Arc::new(AtomicUsize::new(0));
        let body = ResponseBody::from_chunks(vec![
            Bytes::from_static(
                b"data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]},\"index\":0}]}\n\n",
            ),
            Bytes::from_static(b"data: {\"candidates\":[{\"content\":{\"role\":\"model\","),
            Bytes::from_static(
                b"\"parts\":[{\"text\":\"lo!\"}]},\"finishReason\":\"STOP\",\"index\":0}]}\n\n",
            ),
        ])
        .with_release(counting_hook(&counter));

        let events: Vec<_> = stream_handler(UpstreamResponse::new(200, body), "gemini-pro".into(), 2)
            .collect()
            .await;

        let events: Vec<StreamEvent> = events.into_iter().map(|e| e.unwrap()).collect();
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(c) => c.choices.first().and_then(|ch| ch.delta.content.clone()),
                StreamEvent::Done(_) => None,
            })
            .collect();
        assert_eq!(text, "Hello!");

        match events.last() {
            Some(StreamEvent::Done(usage)) => {
                assert_eq!(usage.prompt_tokens, 2);
                assert_eq!(usage.completion_tokens, 2);
                assert_eq!(usage.total_tokens, 4);
            }
            other => panic!("Expected Done, got {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_handler_propagates_transport_error() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stream = tokio_stream::iter(vec![
            Ok(Bytes::from_static(
                b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"partial\"}]}}]}\n\n",
            )),
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline exceeded")),
        ]);
        let body = ResponseBody::new(stream).with_release(counting_hook(&counter));

        let events: Vec<_> = stream_handler(UpstreamResponse::new(200, body), "m".into(), 0)
            .collect()
            .await;

        assert!(matches!(events.first(), Some(Ok(StreamEvent::Chunk(_)))));
        match events.last() {
            Some(Err(err)) => assert!(matches!(err, RelayError::ReadFailed { .. })),
            other => panic!("Expected ReadFailed, got {other:?}"),
        }
        assert!(!events.iter().any(|e| matches!(e, Ok(StreamEvent::Done(_)))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_handler_error_status() {
        let body = ResponseBody::from_bytes(
            r#"{"error":{"code":429,"message":"Resource exhausted","status":"RESOURCE_EXHAUSTED"}}"#,
        );
        let events: Vec<_> = stream_handler(UpstreamResponse::new(429, body), "m".into(), 0)
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Err(err) => assert_eq!(err.status_code(), 429),
            Ok(event) => panic!("Expected error, got {event:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_handler_surfaces_error_event() {
        let counter = Arc::new(AtomicUsize::new(0));
        let body = ResponseBody::from_chunks(vec![
            Bytes::from_static(
                b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Partial\"}]},\"index\":0}]}\n\n",
            ),
            Bytes::from_static(
                b"data: {\"error\":{\"code\":429,\"message\":\"Quota exceeded\",\"status\":\"RESOURCE_EXHAUSTED\"}}\n\n",
            ),
        ])
        .with_release(counting_hook(&counter));

        let events: Vec<_> = stream_handler(UpstreamResponse::new(200, body), "m".into(), 0)
            .collect()
            .await;

        assert!(matches!(events.first(), Some(Ok(StreamEvent::Chunk(_)))));
        match events.last() {
            Some(Err(err)) => {
                assert_eq!(err.code(), "bad_response_status_code");
                assert_eq!(err.status_code(), 429);
                assert!(err.to_string().contains("Quota exceeded"));
            }
            other => panic!("Expected upstream error, got {other:?}"),
        }
        assert!(!events.iter().any(|e| matches!(e, Ok(StreamEvent::Done(_)))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_rejects_error_body_with_success_status() {
        let body = r#"{"error":{"code":400,"message":"Bad thinking budget","status":"INVALID_ARGUMENT"}}"#;
        let err = handler(ok_response(body), "gemini-pro", 0).await.unwrap_err();
        assert_eq!(err.code(), "bad_response_status_code");
        assert_eq!(err.status_code(), 400);

        let err = embedding_handler(ok_response(body), "m").await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_embedding_handler_requires_predictions() {
        let err = embedding_handler(ok_response("{}"), "m").await.unwrap_err();
        assert_eq!(err.code(), "unmarshal_response_body_failed");
        assert_eq!(err.status_code(), 500);
    }
}
