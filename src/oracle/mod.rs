//! The language oracle: the fallible LLM capability every stage queries.
//!
//! Requests carry a prompt kind, the prompt text, and a JSON schema the answer
//! must satisfy. Answers come back as a JSON object that each stage decodes
//! into its own response shape.

mod bounded;
mod ollama;

pub use bounded::BoundedOracle;
pub use ollama::OllamaClient;

use crate::pipeline::prompts::PromptKind;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// One structured request to the oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequest {
    pub kind: PromptKind,
    pub prompt: String,
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle returned an unusable response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait LanguageOracle: Send + Sync {
    async fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError>;
}

/// Send a request and decode the answer into `T`.
pub async fn ask<T: DeserializeOwned>(
    oracle: &dyn LanguageOracle,
    request: &OracleRequest,
) -> Result<T, OracleError> {
    let value = oracle.complete(request).await?;
    serde_json::from_value(value)
        .map_err(|e| OracleError::InvalidResponse(format!("{} response: {}", request.kind, e)))
}

/// Parse raw model text into a JSON object, tolerating Markdown fences and
/// prose around the object.
pub fn parse_json_object(raw: &str) -> Result<Value, OracleError> {
    let clean = strip_markdown_fences(raw);
    let candidate = if clean.starts_with('{') {
        clean
    } else {
        extract_json_fragment(clean, '{', '}').unwrap_or(clean)
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(OracleError::InvalidResponse(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
        Err(first) => {
            // The leading brace may belong to prose; retry on the outermost object.
            extract_json_fragment(clean, '{', '}')
                .filter(|fragment| *fragment != candidate)
                .and_then(|fragment| serde_json::from_str::<Value>(fragment).ok())
                .filter(Value::is_object)
                .ok_or_else(|| OracleError::InvalidResponse(first.to_string()))
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Strip markdown code fences from a response
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// Extract a balanced JSON fragment between matching delimiters, ignoring
/// delimiters inside strings.
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut start_idx = None;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }

        if c == open {
            if depth == 0 {
                start_idx = Some(i);
            }
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(start) = start_idx {
                    return Some(&text[start..=i]);
                }
            }
        }
    }

    None
}
