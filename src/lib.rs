//! Core library for a chat + text-to-speech backend.
//!
//! The crate owns the stateful parts of the system: deterministic audio
//! cache identity, the lazily-initialized synthesis model handle, the
//! retrying speech generator and the chat orchestration against a remote
//! language-model provider. HTTP routing is left to the embedding server,
//! which wires these services together and exposes them however it likes.

pub mod domain;
pub mod infrastructure;

pub use domain::chat::{
    ChatMessage, ChatReply, ChatService, ChatStreamEvent, CompletionRequest, Role, TtsOptions,
    UpstreamError,
};
pub use domain::speech::{
    CacheKey, RetryPolicy, SpeechError, SpeechService, StorageError, SynthesisRequest, Voice,
};
pub use infrastructure::cache::AudioCacheStore;
pub use infrastructure::config::{Config, LogFormat};
pub use infrastructure::llm::{ChatModelClient, OpenAiChatClient};
pub use infrastructure::model::{
    ComputeTarget, EngineError, EngineLoader, ModelInitializationError, ModelRef, SynthesisEngine,
    SynthesisModelHandle,
};
