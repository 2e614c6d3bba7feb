//! Translation between the unified `OpenAI`-style format and Vertex AI.
//!
//! Model directive parsing, request building, response and stream
//! normalization, and token accounting. Nothing in here performs I/O.

pub mod directive;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
pub mod usage;
pub mod vertex_types;
