use async_stream::stream;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_bedrockruntime::{
    config::Region,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::{
        ContentBlock, ContentBlockDelta, ConversationRole, ConverseOutput, ConverseStreamOutput,
        InferenceConfiguration, Message, SystemContentBlock,
    },
    Client,
};
use tracing::{debug, info};

use super::completion::{CompletionRequest, CompletionService, TextStream};
use super::conversation::{ChatMessage, Role};
use crate::error::AppError;

/// Bedrock Runtime adapter using the Converse and ConverseStream APIs.
#[derive(Clone)]
pub struct BedrockCompletion {
    client: Client,
}

impl BedrockCompletion {
    pub async fn connect(region: &str) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        info!(%region, "bedrock client initialized");
        Self {
            client: Client::new(&shared),
        }
    }

    fn prepare(
        request: &CompletionRequest,
    ) -> Result<(Option<Vec<SystemContentBlock>>, Vec<Message>, InferenceConfiguration), AppError> {
        let (system, turns) = normalize_turns(&request.messages);

        let system = (!system.is_empty())
            .then(|| system.into_iter().map(SystemContentBlock::Text).collect());

        let messages = turns
            .into_iter()
            .map(|(role, text)| {
                Message::builder()
                    .role(match role {
                        Role::Assistant => ConversationRole::Assistant,
                        _ => ConversationRole::User,
                    })
                    .content(ContentBlock::Text(text))
                    .build()
                    .map_err(|e| AppError::Internal(format!("build bedrock message: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let inference = InferenceConfiguration::builder()
            .max_tokens(i32::try_from(request.max_tokens).unwrap_or(i32::MAX))
            .temperature(request.temperature)
            .build();

        Ok((system, messages, inference))
    }
}

/// Splits system text out and reshapes the rest into what Converse accepts:
/// strictly alternating turns that start with the user. Adjacent turns of
/// the same role are joined; leading assistant turns are dropped.
pub(crate) fn normalize_turns(messages: &[ChatMessage]) -> (Vec<String>, Vec<(Role, String)>) {
    let mut system = Vec::new();
    let mut turns: Vec<(Role, String)> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system.push(msg.content.clone()),
            Role::Assistant if turns.is_empty() => {}
            role => {
                if let Some((last, text)) = turns.last_mut() {
                    if *last == role {
                        text.push_str("\n\n");
                        text.push_str(&msg.content);
                        continue;
                    }
                }
                turns.push((role, msg.content.clone()));
            }
        }
    }

    (system, turns)
}

fn remote_error<E, R>(e: SdkError<E, R>) -> AppError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    debug!(error = %DisplayErrorContext(&e), "bedrock call failed");
    let message = match (e.code(), e.message()) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (Some(code), None) => code.to_string(),
        _ => DisplayErrorContext(&e).to_string(),
    };
    AppError::RemoteService(message)
}

#[async_trait]
impl CompletionService for BedrockCompletion {
    async fn invoke(&self, request: CompletionRequest) -> Result<String, AppError> {
        let (system, messages, inference) = Self::prepare(&request)?;

        let output = self
            .client
            .converse()
            .model_id(&request.model_id)
            .set_system(system)
            .set_messages(Some(messages))
            .inference_config(inference)
            .send()
            .await
            .map_err(remote_error)?;

        let text = match output.output() {
            Some(ConverseOutput::Message(message)) => message
                .content()
                .iter()
                .filter_map(|block| block.as_text().ok())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        };
        Ok(text)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TextStream, AppError> {
        let (system, messages, inference) = Self::prepare(&request)?;

        let output = self
            .client
            .converse_stream()
            .model_id(&request.model_id)
            .set_system(system)
            .set_messages(Some(messages))
            .inference_config(inference)
            .send()
            .await
            .map_err(remote_error)?;

        // The receiver owns the HTTP response; it is released when the
        // stream below is dropped, finished or not.
        let mut events = output.stream;
        Ok(Box::pin(stream! {
            loop {
                match events.recv().await {
                    Ok(Some(ConverseStreamOutput::ContentBlockDelta(event))) => {
                        if let Some(ContentBlockDelta::Text(text)) = event.delta {
                            yield Ok(text);
                        }
                    }
                    Ok(Some(ConverseStreamOutput::MessageStop(event))) => {
                        debug!(stop_reason = ?event.stop_reason, "bedrock message stop");
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(remote_error(e));
                        break;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, text: &str) -> ChatMessage {
        ChatMessage::new(role, text)
    }

    #[test]
    fn system_is_split_out() {
        let (system, turns) = normalize_turns(&[msg(Role::System, "be brief"), msg(Role::User, "hi")]);
        assert_eq!(system, vec!["be brief"]);
        assert_eq!(turns, vec![(Role::User, "hi".to_string())]);
    }

    #[test]
    fn leading_assistant_turns_are_dropped() {
        let (_, turns) = normalize_turns(&[
            msg(Role::Assistant, "Welcome!"),
            msg(Role::User, "hi"),
        ]);
        assert_eq!(turns, vec![(Role::User, "hi".to_string())]);
    }

    #[test]
    fn adjacent_same_role_turns_are_merged() {
        let (_, turns) = normalize_turns(&[
            msg(Role::User, "first"),
            msg(Role::User, "second"),
            msg(Role::Assistant, "a"),
            msg(Role::Assistant, "b"),
            msg(Role::User, "q"),
        ]);
        assert_eq!(
            turns,
            vec![
                (Role::User, "first\n\nsecond".to_string()),
                (Role::Assistant, "a\n\nb".to_string()),
                (Role::User, "q".to_string()),
            ]
        );
    }

    #[test]
    fn prepare_builds_sdk_types() {
        let request = CompletionRequest {
            model_id: "m".into(),
            messages: vec![msg(Role::System, "sys"), msg(Role::User, "hi")],
            max_tokens: 256,
            temperature: 0.5,
        };
        let (system, messages, inference) = BedrockCompletion::prepare(&request).unwrap();
        assert_eq!(system.map(|s| s.len()), Some(1));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role(), &ConversationRole::User);
        assert_eq!(inference.max_tokens(), Some(256));
        assert_eq!(inference.temperature(), Some(0.5));
    }
}
