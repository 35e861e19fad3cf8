use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;

use super::{ChatMessage, ChatReply, ChatStreamEvent, CompletionRequest, TtsOptions, UpstreamError};
use crate::domain::speech::{SpeechService, SynthesisRequest};
use crate::infrastructure::llm::ChatModelClient;

/// Drives a conversation exchange with the remote language model and,
/// when asked, attaches rendered speech to the assistant reply.
///
/// Upstream failures fail the exchange outright; speech failures only cost
/// the audio annotation, never the text.
pub struct ChatService {
    client: Arc<dyn ChatModelClient>,
    speech: Arc<SpeechService>,
    upstream_timeout: Duration,
}

impl ChatService {
    pub fn new(
        client: Arc<dyn ChatModelClient>,
        speech: Arc<SpeechService>,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            client,
            speech,
            upstream_timeout,
        }
    }

    /// Batch exchange: full completion, then optional TTS annotation.
    pub async fn chat(
        &self,
        request: &CompletionRequest,
        tts: Option<&TtsOptions>,
    ) -> Result<ChatReply, UpstreamError> {
        tracing::info!(
            model = %request.model,
            message_count = request.messages.len(),
            tts_enabled = tts.is_some(),
            "chat completion request"
        );

        let content = tokio::time::timeout(self.upstream_timeout, self.client.complete(request))
            .await
            .map_err(|_| UpstreamError::Timeout(self.upstream_timeout))??;

        let mut reply = ChatReply {
            message: ChatMessage::assistant(content),
            audio_url: None,
        };
        if let Some(options) = tts {
            reply.audio_url = self.annotate_audio(&reply.message.content, options).await;
        }
        Ok(reply)
    }

    /// Streamed exchange: fragments are forwarded in upstream order as
    /// tagged events; an upstream failure mid-stream becomes a terminal
    /// `Error` event and nothing follows it. TTS is not applied to
    /// streamed replies.
    pub async fn chat_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<BoxStream<'static, ChatStreamEvent>, UpstreamError> {
        tracing::info!(
            model = %request.model,
            message_count = request.messages.len(),
            "chat stream request"
        );

        let mut upstream =
            tokio::time::timeout(self.upstream_timeout, self.client.complete_stream(request))
                .await
                .map_err(|_| UpstreamError::Timeout(self.upstream_timeout))??;

        Ok(stream! {
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(content) => yield ChatStreamEvent::fragment(content),
                    Err(error) => {
                        tracing::error!(error = %error, "chat stream failed mid-flight");
                        yield ChatStreamEvent::error(error.to_string());
                        return;
                    }
                }
            }
            yield ChatStreamEvent::done();
        }
        .boxed())
    }

    async fn annotate_audio(&self, text: &str, options: &TtsOptions) -> Option<String> {
        let request = match SynthesisRequest::new(
            text,
            options.voice,
            options.exaggeration,
            options.guidance_weight,
        ) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(error = %error, "assistant reply is not synthesizable");
                return None;
            }
        };

        match self.speech.generate(&request).await {
            Ok(key) => Some(format!("/api/audio/{}", key.file_name())),
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "speech generation failed, returning reply without audio"
                );
                None
            }
        }
    }
}
