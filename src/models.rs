//! Models the relay knows how to serve.
//!
//! Any model name is forwarded as-is; these lists only feed `GET /v1/models`
//! and tell the server which operation a bare model name belongs to.

use crate::adaptor::RelayMode;
use crate::config::RelayConfig;
use serde::Serialize;

pub const CHAT_MODELS: &[&str] = &[
    "gemini-pro",
    "gemini-pro-vision",
    "gemini-exp-1206",
    "gemini-1.5-pro-001",
    "gemini-1.5-pro-002",
    "gemini-1.5-flash-001",
    "gemini-1.5-flash-002",
    "gemini-2.0-flash-exp",
    "gemini-2.0-flash-001",
    "gemini-2.0-flash-lite-preview-02-05",
    "gemini-2.0-flash-thinking-exp-01-21",
];

pub const EMBEDDING_MODELS: &[&str] = &[
    "textembedding-gecko-multilingual@001",
    "text-multilingual-embedding-002",
];

#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: &'static str,
    pub owned_by: &'static str,
}

/// Mode a known model serves. Unknown names return `None`.
#[must_use]
pub fn mode_for_model(model: &str) -> Option<RelayMode> {
    let name = model.split_once('?').map_or(model, |(name, _)| name);
    if EMBEDDING_MODELS.contains(&name) {
        Some(RelayMode::Embeddings)
    } else if CHAT_MODELS.contains(&name) {
        Some(RelayMode::ChatCompletions)
    } else {
        None
    }
}

/// Known models followed by configured aliases, without duplicates.
#[must_use]
pub fn list_models(config: &RelayConfig) -> Vec<ModelEntry> {
    let mut ids: Vec<String> = CHAT_MODELS
        .iter()
        .chain(EMBEDDING_MODELS)
        .map(|m| (*m).to_string())
        .collect();

    let mut aliases: Vec<&String> = config.models.keys().collect();
    aliases.sort();
    for alias in aliases {
        if !ids.contains(alias) {
            ids.push(alias.clone());
        }
    }

    ids.into_iter()
        .map(|id| ModelEntry {
            id,
            object: "model",
            owned_by: "vertex-ai",
        })
        .collect()
}
