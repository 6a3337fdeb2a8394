use std::sync::Arc;

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use super::completion::{CompletionRequest, CompletionService};
use super::conversation::build_messages;
use crate::config::AppConfig;
use crate::error::AppError;

pub const DEFAULT_MODEL_ID: &str = "mistral.mistral-large-2402-v1:0";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful AI assistant. Provide clear, accurate, \
                                              and concise responses to user questions.";

pub const EMPTY_MESSAGE_REPLY: &str = "Please enter a message.";

fn apology(e: &AppError) -> String {
    format!("Sorry, I encountered an error: {e}")
}

/// Per-instance overrides; each field wins over the settings value.
#[derive(Debug, Clone, Default)]
pub struct ChatOverrides {
    pub model_id: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub region: Option<String>,
    pub system_instruction: Option<String>,
    pub history_limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub region: String,
    pub system_instruction: String,
    pub history_limit: usize,
}

impl ChatConfig {
    /// Resolve each parameter as override > settings > built-in default.
    pub fn resolve(settings: Option<&AppConfig>, overrides: ChatOverrides) -> Self {
        Self {
            model_id: overrides
                .model_id
                .or_else(|| settings.map(|s| s.bedrock.model_id.clone()))
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            max_tokens: overrides
                .max_tokens
                .or_else(|| settings.map(|s| s.bedrock.max_tokens))
                .unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: overrides
                .temperature
                .or_else(|| settings.map(|s| s.bedrock.temperature))
                .unwrap_or(DEFAULT_TEMPERATURE),
            region: overrides
                .region
                .or_else(|| settings.map(|s| s.aws_region.clone()))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            system_instruction: overrides
                .system_instruction
                .or_else(|| settings.and_then(|s| s.system_prompt.clone()))
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            history_limit: overrides
                .history_limit
                .or_else(|| settings.map(|s| s.history_limit))
                .unwrap_or(DEFAULT_HISTORY_LIMIT),
        }
    }
}

/// Drives one chat turn against the completion service.
pub struct ChatOrchestrator {
    config: ChatConfig,
    service: Arc<dyn CompletionService>,
}

impl ChatOrchestrator {
    pub fn new(config: ChatConfig, service: Arc<dyn CompletionService>) -> Self {
        info!(model = %config.model_id, region = %config.region, "chat orchestrator ready");
        Self { config, service }
    }

    pub fn set_system_instruction(&mut self, instruction: impl Into<String>) {
        self.config.system_instruction = instruction.into();
    }

    fn request_for(&self, user_message: &str, history: &[Value]) -> CompletionRequest {
        let messages = build_messages(
            user_message,
            history,
            &self.config.system_instruction,
            self.config.history_limit,
        );
        debug!(messages = messages.len(), "conversation assembled");
        CompletionRequest {
            model_id: self.config.model_id.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    /// Full response in one piece. Failures come back as the apology text.
    #[instrument(skip_all)]
    pub async fn chat(&self, user_message: &str, history: &[Value]) -> String {
        if user_message.trim().is_empty() {
            return EMPTY_MESSAGE_REPLY.to_string();
        }
        match self.service.invoke(self.request_for(user_message, history)).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "chat error");
                apology(&e)
            }
        }
    }

    /// Cumulative snapshots of the response as it grows. The sequence ends
    /// after the last increment, or after a single apology snapshot on
    /// failure. Dropping it early drops the remote stream.
    pub fn stream(
        &self,
        user_message: &str,
        history: &[Value],
    ) -> impl Stream<Item = String> + Send + 'static {
        let service = Arc::clone(&self.service);
        let request = if user_message.trim().is_empty() {
            None
        } else {
            Some(self.request_for(user_message, history))
        };

        stream! {
            let Some(request) = request else {
                yield EMPTY_MESSAGE_REPLY.to_string();
                return;
            };

            let mut pieces = match service.stream(request).await {
                Ok(pieces) => pieces,
                Err(e) => {
                    error!(error = %e, "chat stream error");
                    yield apology(&e);
                    return;
                }
            };

            let mut full = String::new();
            while let Some(piece) = pieces.next().await {
                match piece {
                    Ok(text) if text.is_empty() => {}
                    Ok(text) => {
                        full.push_str(&text);
                        yield full.clone();
                    }
                    Err(e) => {
                        error!(error = %e, received = full.len(), "chat stream error");
                        yield apology(&e);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::chat::completion::scripted::ScriptedCompletion;
    use crate::chat::conversation::Role;

    fn orchestrator(service: Arc<ScriptedCompletion>) -> ChatOrchestrator {
        ChatOrchestrator::new(ChatConfig::resolve(None, ChatOverrides::default()), service)
    }

    #[tokio::test]
    async fn blank_message_short_circuits() {
        let service = Arc::new(ScriptedCompletion::yielding(&["never"]));
        let chat = orchestrator(service.clone());

        let snaps: Vec<String> = chat.stream("", &[]).collect().await;
        assert_eq!(snaps, vec![EMPTY_MESSAGE_REPLY]);
        let snaps: Vec<String> = chat.stream("  \n\t", &[]).collect().await;
        assert_eq!(snaps, vec![EMPTY_MESSAGE_REPLY]);
        assert_eq!(chat.chat(" ", &[]).await, EMPTY_MESSAGE_REPLY);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn snapshots_are_cumulative() {
        let chat = orchestrator(Arc::new(ScriptedCompletion::yielding(&["Hel", "lo"])));
        let snaps: Vec<String> = chat.stream("hi", &[]).collect().await;
        assert_eq!(snaps, vec!["Hel", "Hello"]);
    }

    #[tokio::test]
    async fn empty_increments_are_not_emitted() {
        let chat = orchestrator(Arc::new(ScriptedCompletion::yielding(&["", "a", "", "b"])));
        let snaps: Vec<String> = chat.stream("hi", &[]).collect().await;
        assert_eq!(snaps, vec!["a", "ab"]);
    }

    #[tokio::test]
    async fn connect_failure_yields_single_apology() {
        let chat = orchestrator(Arc::new(ScriptedCompletion::refusing("ThrottlingException: slow down")));
        let snaps: Vec<String> = chat.stream("hi", &[]).collect().await;
        assert_eq!(
            snaps,
            vec!["Sorry, I encountered an error: ThrottlingException: slow down"]
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_terminates_with_apology() {
        let chat = orchestrator(Arc::new(ScriptedCompletion::failing_after(&["par", "tial"], "timeout")));
        let snaps: Vec<String> = chat.stream("hi", &[]).collect().await;
        assert_eq!(
            snaps,
            vec!["par", "partial", "Sorry, I encountered an error: timeout"]
        );
    }

    #[tokio::test]
    async fn malformed_history_is_dropped_not_fatal() {
        let service = Arc::new(ScriptedCompletion::yielding(&["ok"]));
        let chat = orchestrator(service.clone());
        let history = vec![
            json!({"role": "user", "content": "earlier"}),
            json!(42),
            json!({"role": "robot", "content": "beep"}),
            json!({"role": "assistant", "content": {"nested": true}}),
        ];
        let snaps: Vec<String> = chat.stream("hi", &history).collect().await;
        assert_eq!(snaps, vec!["ok"]);

        let sent = service.last_request.lock().unwrap().clone().unwrap();
        let roles: Vec<Role> = sent.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::User]);
        assert_eq!(sent.messages[1].content, "earlier");
    }

    #[tokio::test]
    async fn abandoning_the_stream_releases_the_remote_handle() {
        let service = Arc::new(ScriptedCompletion::yielding(&["a", "b", "c"]));
        let released = service.released.clone();
        let chat = orchestrator(service);

        let first: Vec<String> = chat.stream("hi", &[]).take(1).collect().await;
        assert_eq!(first, vec!["a"]);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn non_streaming_chat_returns_full_text_or_apology() {
        let chat = orchestrator(Arc::new(ScriptedCompletion::yielding(&["Hel", "lo"])));
        assert_eq!(chat.chat("hi", &[]).await, "Hello");

        let chat = orchestrator(Arc::new(ScriptedCompletion::refusing("AccessDenied")));
        assert_eq!(chat.chat("hi", &[]).await, "Sorry, I encountered an error: AccessDenied");
    }

    #[tokio::test]
    async fn request_carries_resolved_parameters() {
        let service = Arc::new(ScriptedCompletion::yielding(&["x"]));
        let config = ChatConfig::resolve(
            None,
            ChatOverrides {
                model_id: Some("anthropic.claude-3-haiku".into()),
                temperature: Some(0.0),
                ..Default::default()
            },
        );
        let mut chat = ChatOrchestrator::new(config, service.clone());
        chat.set_system_instruction("answer in French");
        let _: Vec<String> = chat.stream("hi", &[]).collect().await;

        let sent = service.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(sent.model_id, "anthropic.claude-3-haiku");
        assert_eq!(sent.temperature, 0.0);
        assert_eq!(sent.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(sent.messages[0].content, "answer in French");
    }

    #[test]
    fn overrides_beat_settings_beat_defaults() {
        let mut settings = AppConfig::from_lookup(|k| (k == "JWT_SECRET").then(|| "s".to_string())).unwrap();
        settings.bedrock.max_tokens = 2048;
        settings.aws_region = "eu-west-1".into();

        let cfg = ChatConfig::resolve(
            Some(&settings),
            ChatOverrides {
                region: Some("ap-south-1".into()),
                ..Default::default()
            },
        );
        assert_eq!(cfg.region, "ap-south-1");
        assert_eq!(cfg.max_tokens, 2048);
        assert_eq!(cfg.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);

        let cfg = ChatConfig::resolve(None, ChatOverrides::default());
        assert_eq!(cfg.region, DEFAULT_REGION);
        assert_eq!(cfg.model_id, DEFAULT_MODEL_ID);
    }
}
