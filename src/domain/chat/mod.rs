pub mod error;
pub mod service;

pub use error::UpstreamError;
pub use service::ChatService;

use serde::{Deserialize, Serialize};

use crate::domain::speech::Voice;

/// Model used when the caller does not name one.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

/// Temperature used when the caller does not set one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Parameters of one completion call against the remote language model.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }
}

/// Synthesis parameters applied to the assistant reply when TTS is enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsOptions {
    pub voice: Voice,
    pub exaggeration: f32,
    pub guidance_weight: f32,
}

impl Default for TtsOptions {
    fn default() -> Self {
        Self {
            voice: Voice::Default,
            exaggeration: 0.5,
            guidance_weight: 0.5,
        }
    }
}

/// A completed conversation exchange, optionally annotated with a weak
/// reference to the rendered audio of the assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: ChatMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

/// One element of a streamed conversation exchange.
///
/// The stream yields fragments in upstream order and terminates with
/// exactly one `Done` or `Error`; errors are data, never a torn stream.
/// Serializes to the wire shapes `{"content"}` / `{"done"}` / `{"error"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatStreamEvent {
    Fragment { content: String },
    Done { done: bool },
    Error { error: String },
}

impl ChatStreamEvent {
    pub fn fragment(content: impl Into<String>) -> Self {
        ChatStreamEvent::Fragment {
            content: content.into(),
        }
    }

    pub fn done() -> Self {
        ChatStreamEvent::Done { done: true }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        ChatStreamEvent::Error {
            error: detail.into(),
        }
    }
}
