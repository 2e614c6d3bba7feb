//! Translate unified (OpenAI-compatible) requests into Vertex AI requests.
//!
//! Chat requests become `generateContent` bodies: system messages move into
//! `systemInstruction`, assistant turns become `model` turns, tool results become
//! `functionResponse` parts, and sampling parameters land in `generationConfig`.
//! Embedding requests become `predict` bodies with one instance per input.

use std::collections::HashMap;

use super::directive::ModelDirective;
use super::openai_types::{
    ChatContent, ChatMessage, ChatToolChoice, ContentPart, UnifiedRequest,
};
use super::vertex_types::{
    Content, EmbeddingInstance, EmbeddingParams, EmbeddingRequest, FileData, FunctionCall,
    FunctionCallingConfig, FunctionDeclaration, FunctionResponse, GenerateContentRequest,
    GenerationConfig, InlineData, Part, SafetySetting, Tool, ToolConfig,
};
use crate::error::{RelayError, Result};

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Build the Vertex embedding request: one instance per input, in order.
pub fn build_embedding_request(
    req: &UnifiedRequest,
    directive: &ModelDirective,
) -> Result<EmbeddingRequest> {
    let inputs = req.parse_input();
    if inputs.is_empty() {
        return Err(RelayError::invalid_request("embedding input is empty"));
    }

    let instances = inputs
        .into_iter()
        .map(|content| EmbeddingInstance {
            content,
            task_type: directive.task_type,
        })
        .collect();

    Ok(EmbeddingRequest {
        instances,
        parameters: EmbeddingParams {
            output_dimensionality: req.dimensions,
        },
    })
}

/// Build the Vertex generation request, then apply the thinking directive.
///
/// The directive is applied after the base translation so it always wins.
pub fn build_generation_request(
    req: &UnifiedRequest,
    directive: &ModelDirective,
) -> Result<GenerateContentRequest> {
    if req.messages.is_empty() {
        return Err(RelayError::invalid_request("messages must not be empty"));
    }

    let mut gemini_req = openai_to_gemini(req);
    if let Some(thinking) = directive.thinking {
        gemini_req.generation_config.thinking_config = Some(thinking);
    }
    Ok(gemini_req)
}

/// Translate a unified chat request into a `generateContent` body.
/// Pure function; the model name travels in the URL, not the body.
pub fn openai_to_gemini(req: &UnifiedRequest) -> GenerateContentRequest {
    let mut system_parts: Vec<Part> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();
    let tool_names = tool_call_names(&req.messages);

    for msg in &req.messages {
        match msg.role.as_str() {
            "system" | "developer" => {
                if let Some(ref content) = msg.content {
                    system_parts.push(Part::text(content.as_text()));
                }
            }
            "tool" | "function" => {
                let part = translate_tool_result(msg, &tool_names);
                push_content(&mut contents, "user", vec![part]);
            }
            "assistant" => {
                let parts = translate_assistant_message(msg);
                push_content(&mut contents, "model", parts);
            }
            _ => {
                let parts = msg
                    .content
                    .as_ref()
                    .map(translate_content)
                    .unwrap_or_default();
                push_content(&mut contents, "user", parts);
            }
        }
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(Content {
            role: String::new(),
            parts: system_parts,
        })
    };

    let tools = req.tools.as_ref().filter(|t| !t.is_empty()).map(|tools| {
        vec![Tool {
            function_declarations: tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    parameters: t.function.parameters.clone(),
                })
                .collect(),
        }]
    });

    let tool_config = req.tool_choice.as_ref().map(translate_tool_choice);

    let safety_settings = HARM_CATEGORIES
        .iter()
        .map(|category| SafetySetting {
            category: (*category).to_string(),
            threshold: "BLOCK_NONE".to_string(),
        })
        .collect();

    GenerateContentRequest {
        contents,
        system_instruction,
        tools,
        tool_config,
        safety_settings: Some(safety_settings),
        generation_config: translate_generation_config(req),
    }
}

fn translate_generation_config(req: &UnifiedRequest) -> GenerationConfig {
    let mut config = GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        max_output_tokens: req.max_completion_tokens.or(req.max_tokens),
        candidate_count: req.n.filter(|n| *n > 1),
        stop_sequences: req.stop.as_ref().map(|s| s.to_vec()),
        seed: req.seed,
        presence_penalty: req.presence_penalty,
        frequency_penalty: req.frequency_penalty,
        ..GenerationConfig::default()
    };

    if let Some(ref format) = req.response_format {
        match format.format_type.as_str() {
            "json_object" => {
                config.response_mime_type = Some("application/json".to_string());
            }
            "json_schema" => {
                config.response_mime_type = Some("application/json".to_string());
                config.response_schema = format
                    .json_schema
                    .as_ref()
                    .and_then(|s| s.schema.clone());
            }
            _ => {}
        }
    }

    config
}

/// Append a turn, merging with the previous one when the role repeats.
fn push_content(contents: &mut Vec<Content>, role: &str, parts: Vec<Part>) {
    if parts.is_empty() {
        return;
    }
    if let Some(last) = contents.last_mut() {
        if last.role == role {
            last.parts.extend(parts);
            return;
        }
    }
    contents.push(Content {
        role: role.to_string(),
        parts,
    });
}

fn translate_content(content: &ChatContent) -> Vec<Part> {
    match content {
        ChatContent::Text(text) => vec![Part::text(text.clone())],
        ChatContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => Part::text(text.clone()),
                ContentPart::ImageUrl { image_url } => translate_image(&image_url.url),
            })
            .collect(),
    }
}

fn translate_image(url: &str) -> Part {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((meta, data)) = rest.split_once(',') {
            let mime_type = meta.trim_end_matches(";base64").to_string();
            return Part {
                inline_data: Some(InlineData {
                    mime_type,
                    data: data.to_string(),
                }),
                ..Part::default()
            };
        }
    }

    Part {
        file_data: Some(FileData {
            mime_type: guess_mime_type(url).to_string(),
            file_uri: url.to_string(),
        }),
        ..Part::default()
    }
}

fn guess_mime_type(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        _ => "image/jpeg",
    }
}

fn translate_assistant_message(msg: &ChatMessage) -> Vec<Part> {
    let mut parts = Vec::new();

    if let Some(ref content) = msg.content {
        let text = content.as_text();
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
    }

    for call in msg.tool_calls.iter().flatten() {
        let args = serde_json::from_str(&call.function.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
        parts.push(Part {
            function_call: Some(FunctionCall {
                name: call.function.name.clone(),
                args,
            }),
            ..Part::default()
        });
    }

    parts
}

/// Map tool call ids to function names so tool results can name their function.
fn tool_call_names(messages: &[ChatMessage]) -> HashMap<String, String> {
    messages
        .iter()
        .flat_map(|m| m.tool_calls.iter().flatten())
        .map(|c| (c.id.clone(), c.function.name.clone()))
        .collect()
}

fn translate_tool_result(msg: &ChatMessage, tool_names: &HashMap<String, String>) -> Part {
    let name = msg
        .tool_call_id
        .as_ref()
        .and_then(|id| tool_names.get(id).cloned())
        .or_else(|| msg.name.clone())
        .unwrap_or_else(|| "function".to_string());

    let text = msg.content.as_ref().map(|c| c.as_text()).unwrap_or_default();
    let response = match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::json!({ "content": text }),
    };

    Part {
        function_response: Some(FunctionResponse { name, response }),
        ..Part::default()
    }
}

fn translate_tool_choice(choice: &ChatToolChoice) -> ToolConfig {
    let (mode, allowed) = match choice {
        ChatToolChoice::String(s) => match s.as_str() {
            "none" => ("NONE", None),
            "required" => ("ANY", None),
            _ => ("AUTO", None),
        },
        ChatToolChoice::Specific(specific) => {
            ("ANY", Some(vec![specific.function.name.clone()]))
        }
    };

    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: mode.to_string(),
            allowed_function_names: allowed,
        },
    }
}
