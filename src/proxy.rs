use crate::adaptor::{convert_request, do_response, CallMeta, RelayMode, RelayOutput};
use crate::body::UpstreamResponse;
use crate::config::RelayConfig;
use crate::error::Result;
use crate::logging::SharedLogger;
use crate::models::mode_for_model;
use crate::translate::openai_types::UnifiedRequest;
use crate::translate::usage::estimate_prompt_tokens;

/// Outcome of relaying one call: the normalized output plus the context it was
/// produced under (model echoed, mode, prompt estimate).
#[derive(Debug)]
pub struct Relayed {
    pub meta: CallMeta,
    pub output: RelayOutput,
}

/// Relay a unified request to Vertex and normalize the answer.
///
/// Streams are returned unconsumed; usage for them arrives with the terminal
/// stream item.
pub async fn relay(
    req: Option<&UnifiedRequest>,
    mode: RelayMode,
    config: &RelayConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<Relayed> {
    let mut converted = convert_request(req, mode)?;
    converted.model = config.map_model(&converted.model);

    if let Some(known) = mode_for_model(&converted.model).filter(|m| *m != mode) {
        logger.warn(
            "proxy",
            format!(
                "Model {} serves {} but was called for {}",
                converted.model,
                known.as_str(),
                mode.as_str()
            ),
        );
    }

    // Embeddings are never streamed.
    let is_stream = mode == RelayMode::ChatCompletions && req.is_some_and(UnifiedRequest::is_stream);
    let prompt_tokens = req.map(estimate_prompt_tokens).unwrap_or_default();

    let url = config
        .vertex
        .endpoint_url(&converted.model, converted.action(is_stream))?;
    let token = config.resolve_access_token()?;

    logger.info(
        "proxy",
        format!(
            "POST {} model={} mode={} stream={}",
            url,
            converted.model,
            mode.as_str(),
            is_stream
        ),
    );

    let response = client
        .post(&url)
        .bearer_auth(token)
        .json(&converted.body)
        .send()
        .await?;

    let upstream = UpstreamResponse::from_reqwest(response);
    if upstream.is_success() {
        tracing::debug!(status = upstream.status, model = %converted.model, "Upstream responded");
    } else {
        tracing::warn!(
            status = upstream.status,
            model = %converted.model,
            request_id = ?upstream.headers.get("x-goog-request-id"),
            "Upstream returned an error status"
        );
    }

    let meta = CallMeta {
        is_stream,
        mode,
        actual_model_name: converted.model,
        prompt_tokens,
    };

    let output = do_response(upstream, &meta).await?;

    if let Some(usage) = output.usage() {
        logger.call_completed(&meta.actual_model_name, mode.as_str(), usage);
    }

    Ok(Relayed { meta, output })
}
