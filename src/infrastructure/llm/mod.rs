use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::domain::chat::{CompletionRequest, Role, UpstreamError};

/// Incremental text fragments of a streamed completion, in upstream order.
pub type FragmentStream = BoxStream<'static, Result<String, UpstreamError>>;

/// Client for the remote language-model provider.
///
/// Abstracts the concrete provider SDK so the orchestration layer can be
/// exercised against fakes.
#[async_trait]
pub trait ChatModelClient: Send + Sync {
    /// Run a completion and return the full assistant text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, UpstreamError>;

    /// Open a streamed completion. The initial call fails fast on provider
    /// errors; mid-stream failures are yielded as stream items.
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<FragmentStream, UpstreamError>;
}

/// OpenAI implementation of [`ChatModelClient`].
pub struct OpenAiChatClient {
    client: Arc<Client<OpenAIConfig>>,
}

impl OpenAiChatClient {
    pub fn new(client: Arc<Client<OpenAIConfig>>) -> Self {
        Self { client }
    }

    pub fn from_api_key(api_key: &str) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Arc::new(Client::with_config(config)),
        }
    }

    fn build_request(
        &self,
        request: &CompletionRequest,
    ) -> Result<CreateChatCompletionRequest, UpstreamError> {
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            let converted: ChatCompletionRequestMessage = match message.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
            };
            messages.push(converted);
        }

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&request.model)
            .messages(messages)
            .temperature(request.temperature);
        if let Some(max_tokens) = request.max_tokens {
            args.max_tokens(max_tokens);
        }
        args.build().map_err(map_openai_error)
    }
}

#[async_trait]
impl ChatModelClient for OpenAiChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, UpstreamError> {
        let payload = self.build_request(request)?;
        tracing::info!(
            model = %request.model,
            message_count = request.messages.len(),
            "calling chat completion API"
        );

        let response = self
            .client
            .chat()
            .create(payload)
            .await
            .map_err(map_openai_error)?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        tracing::debug!(content_length = content.len(), "chat completion received");
        Ok(content)
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<FragmentStream, UpstreamError> {
        let payload = self.build_request(request)?;
        tracing::info!(model = %request.model, "opening chat completion stream");

        let stream = self
            .client
            .chat()
            .create_stream(payload)
            .await
            .map_err(map_openai_error)?;

        Ok(stream
            .filter_map(|item| async move {
                match item {
                    Ok(chunk) => chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .filter(|content| !content.is_empty())
                        .map(Ok),
                    Err(error) => Some(Err(map_openai_error(error))),
                }
            })
            .boxed())
    }
}

fn map_openai_error(error: OpenAIError) -> UpstreamError {
    match error {
        OpenAIError::Reqwest(inner) => UpstreamError::Transport(inner.to_string()),
        OpenAIError::StreamError(message) => UpstreamError::Transport(message),
        OpenAIError::ApiError(api) => map_api_error(api),
        other => UpstreamError::Provider(other.to_string()),
    }
}

fn map_api_error(error: ApiError) -> UpstreamError {
    let kind = error.r#type.as_deref().unwrap_or_default();
    let code = error.code.as_deref().unwrap_or_default();

    if code.contains("invalid_api_key") || kind.contains("authentication") {
        UpstreamError::Auth(error.message)
    } else if code.contains("rate_limit")
        || code.contains("insufficient_quota")
        || kind.contains("rate_limit")
    {
        UpstreamError::RateLimited(error.message)
    } else {
        UpstreamError::Provider(error.message)
    }
}
