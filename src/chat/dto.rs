use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One chat turn request. `history` is taken as raw JSON so malformed
/// entries can be skipped rather than failing the whole request.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub history: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}
