//! Provider directives carried by the model identifier.
//!
//! Clients that cannot send provider-specific fields encode them as a query
//! suffix on the model name, e.g. `text-multilingual-embedding-002?task_type=RETRIEVAL_QUERY`
//! or `gemini-2.0-flash-001?thinking=1&thinking_budget=500`. The typed
//! [`VertexOptions`] block on the request is the primary configuration path;
//! the suffix form is normalised here for older clients.
//!
//! Parsing is best-effort: a malformed suffix yields the default directive and
//! never fails the request.

use super::openai_types::VertexOptions;
use super::vertex_types::{EmbeddingTaskType, ThinkingConfig};

/// Options parsed out of a model identifier, valid for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelDirective {
    pub task_type: EmbeddingTaskType,
    /// `None` when neither `thinking` nor `thinking_budget` was given.
    pub thinking: Option<ThinkingConfig>,
}

impl ModelDirective {
    pub fn include_thoughts(&self) -> bool {
        self.thinking.is_some_and(|t| t.include_thoughts)
    }

    pub fn thinking_budget(&self) -> i32 {
        self.thinking.map_or(0, |t| t.thinking_budget)
    }

    /// Overlay typed options; each field that is set wins over the suffix.
    #[must_use]
    pub fn with_options(mut self, options: Option<&VertexOptions>) -> Self {
        let Some(opts) = options else {
            return self;
        };

        if let Some(ref task_type) = opts.task_type {
            self.task_type = EmbeddingTaskType::from_name(task_type);
        }

        if opts.thinking.is_some() || opts.thinking_budget.is_some() {
            let mut thinking = self.thinking.unwrap_or_default();
            if let Some(include) = opts.thinking {
                thinking.include_thoughts = include;
            }
            if let Some(budget) = opts.thinking_budget {
                thinking.thinking_budget = budget;
            }
            self.thinking = Some(thinking);
        }

        self
    }
}

/// Split a raw model identifier into its clean name and directive.
///
/// Everything before the first `?` is the model name. The remainder is read as
/// `application/x-www-form-urlencoded` parameters.
pub fn parse_model(raw: &str) -> (String, ModelDirective) {
    let Some((name, query)) = raw.split_once('?') else {
        return (raw.to_string(), ModelDirective::default());
    };

    let Some(params) = parse_query(query) else {
        tracing::debug!(model = %raw, "Ignoring malformed model directive");
        return (name.to_string(), ModelDirective::default());
    };

    let lookup = |key: &str| {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    let mut directive = ModelDirective::default();

    if let Some(task_type) = lookup("task_type") {
        directive.task_type = EmbeddingTaskType::from_name(task_type);
    }

    let flag = lookup("thinking");
    let budget = lookup("thinking_budget");
    if flag.is_some() || budget.is_some() {
        let mut thinking = ThinkingConfig::default();
        if let Some(flag) = flag {
            thinking.include_thoughts = flag == "1";
        }
        if let Some(Ok(budget)) = budget.map(str::parse::<i32>) {
            thinking.thinking_budget = budget;
        }
        directive.thinking = Some(thinking);
    }

    (name.to_string(), directive)
}

/// Decode a query string, rejecting `;` separators and bad `%` escapes.
fn parse_query(query: &str) -> Option<Vec<(String, String)>> {
    if query.contains(';') || !has_valid_escapes(query) {
        return None;
    }

    Some(
        url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
    )
}

fn has_valid_escapes(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
            if !valid {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}
