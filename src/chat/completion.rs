use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::conversation::ChatMessage;
use crate::error::AppError;

/// Incremental text pieces from a streaming completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A hosted text-completion endpoint.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Returns the full response text.
    async fn invoke(&self, request: CompletionRequest) -> Result<String, AppError>;

    /// Opens a streaming call. Dropping the returned stream releases the
    /// underlying connection.
    async fn stream(&self, request: CompletionRequest) -> Result<TextStream, AppError>;
}
