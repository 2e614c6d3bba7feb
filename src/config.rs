use crate::adaptor::VertexAction;
use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub vertex: VertexConfig,
    /// Client-facing model name → Vertex model name.
    #[serde(default)]
    pub models: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexConfig {
    pub project_id: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
}

fn default_port() -> u16 {
    4333
}

fn default_region() -> String {
    "us-central1".to_string()
}

fn default_access_token_env() -> String {
    "VERTEX_ACCESS_TOKEN".to_string()
}

impl RelayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(RelayError::config(format!(
            "No config file found. Searched: {}. Create one from config.example.toml",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Apply the alias map to a clean model name.
    pub fn map_model(&self, model: &str) -> String {
        self.models
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }

    /// Resolve the bearer token from the configured environment variable.
    pub fn resolve_access_token(&self) -> Result<String> {
        std::env::var(&self.vertex.access_token_env).map_err(|_| {
            RelayError::config(format!(
                "Environment variable '{}' not set. Export a Vertex AI access token \
                 (e.g. from `gcloud auth print-access-token`).",
                self.vertex.access_token_env
            ))
        })
    }
}

impl VertexConfig {
    /// Base URL: the configured override, or the regional endpoint.
    pub fn effective_base_url(&self) -> String {
        if let Some(ref url) = self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        if self.region == "global" {
            "https://aiplatform.googleapis.com".to_string()
        } else {
            format!("https://{}-aiplatform.googleapis.com", self.region)
        }
    }

    /// Full URL of a publisher-model method.
    ///
    /// The model is encoded as a single path segment, so it can never leave
    /// `publishers/google/models/`.
    pub fn endpoint_url(&self, model: &str, action: VertexAction) -> Result<String> {
        if self.project_id.is_empty() {
            return Err(RelayError::config("vertex.project_id is empty"));
        }
        if model.is_empty() || model == "." || model == ".." || model.contains('/') {
            return Err(RelayError::invalid_request(format!(
                "Invalid model name: {model:?}"
            )));
        }

        let target = format!("{}:{}", model, action.method());
        let base = self.effective_base_url();
        let mut url = Url::parse(&base)
            .map_err(|e| RelayError::config(format!("Invalid base URL {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| RelayError::config(format!("Base URL {base} cannot carry a path")))?
            .pop_if_empty()
            .extend([
                "v1",
                "projects",
                self.project_id.as_str(),
                "locations",
                self.region.as_str(),
                "publishers",
                "google",
                "models",
                target.as_str(),
            ]);
        url.set_query(action.query());

        Ok(url.into())
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("vertex-relay.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("vertex-relay").join("config.toml"));
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("vertex-relay").join("config.toml"));
        paths.push(home.join(".vertex-relay.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
