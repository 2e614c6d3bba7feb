use crate::adaptor::{RelayMode, RelayOutput};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::handler::StreamEvent;
use crate::logging::SharedLogger;
use crate::models;
use crate::proxy;
use crate::translate::openai_types::UnifiedRequest;

use axum::extract::{OriginalUri, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: RelayConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_relay))
        .route("/v1/embeddings", post(handle_relay))
        .route("/v1/models", get(handle_models))
        .route("/v1/logs", get(handle_logs))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_relay(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Response {
    let mode = RelayMode::from_path(uri.path());

    // `null` parses to `None` and is rejected by the adaptor as a missing request.
    let req: Option<UnifiedRequest> = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state
                .logger
                .error("server", format!("Failed to parse request: {}", e));
            let err = RelayError::invalid_request(format!("Invalid request body: {}", e));
            return error_response(&err);
        }
    };

    let model = req.as_ref().map(|r| r.model.clone()).unwrap_or_default();

    state.logger.info(
        "server",
        format!("Request: model={} mode={}", model, mode.as_str()),
    );

    let relayed =
        match proxy::relay(req.as_ref(), mode, &state.config, &state.client, &state.logger).await
        {
            Ok(r) => r,
            Err(e) => {
                state
                    .logger
                    .call_failed(&model, mode.as_str(), e.code(), e.to_string());
                return error_response(&e);
            }
        };

    match relayed.output {
        RelayOutput::Chat(resp) => Json(resp).into_response(),
        RelayOutput::Embeddings(resp) => Json(resp).into_response(),
        RelayOutput::Stream(mut stream) => {
            let logger = state.logger.clone();
            let model = relayed.meta.actual_model_name;

            // Failures before the first chunk still get a real HTTP status.
            let first = match stream.next().await {
                Some(Err(e)) => {
                    logger.call_failed(&model, mode.as_str(), e.code(), e.to_string());
                    return error_response(&e);
                }
                first => first,
            };

            let events = futures::stream::iter(first).chain(stream).map(
                move |item| -> Result<Event, Infallible> {
                    match item {
                        Ok(StreamEvent::Chunk(chunk)) => Ok(Event::default()
                            .data(serde_json::to_string(&chunk).unwrap_or_default())),
                        Ok(StreamEvent::Done(usage)) => {
                            logger.call_completed(&model, mode.as_str(), usage);
                            Ok(Event::default().data("[DONE]"))
                        }
                        Err(e) => {
                            logger.call_failed(&model, mode.as_str(), e.code(), e.to_string());
                            Ok(Event::default().data(
                                serde_json::to_string(&e.to_response()).unwrap_or_default(),
                            ))
                        }
                    }
                },
            );

            Sse::new(events)
                .keep_alive(axum::response::sse::KeepAlive::default())
                .into_response()
        }
    }
}

fn error_response(err: &RelayError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_response())).into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "object": "list",
        "data": models::list_models(&state.config),
    }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn handle_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let entries = state.logger.recent(query.limit.unwrap_or(100));
    Json(serde_json::json!({ "data": entries }))
}
