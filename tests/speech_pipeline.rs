//! End-to-end exercises of the chat + speech pipeline against fake
//! collaborators: repeated requests must converge on one cache entry, and
//! chat replies must carry (or gracefully drop) their audio reference.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use pretty_assertions::assert_eq;

use chatvoice_backend::infrastructure::llm::FragmentStream;
use chatvoice_backend::{
    AudioCacheStore, ChatMessage, ChatModelClient, ChatService, ChatStreamEvent, CompletionRequest,
    ComputeTarget, EngineError, EngineLoader, RetryPolicy, SpeechService, SynthesisEngine,
    SynthesisModelHandle, SynthesisRequest, TtsOptions, UpstreamError, Voice,
};

struct CountingEngine {
    calls: AtomicU32,
}

#[async_trait]
impl SynthesisEngine for CountingEngine {
    async fn synthesize(
        &self,
        text: &str,
        _exaggeration: f32,
        _guidance_weight: f32,
    ) -> Result<Vec<u8>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("RIFF:{text}").into_bytes())
    }

    fn sample_rate(&self) -> u32 {
        24_000
    }
}

struct FixedLoader {
    engine: Arc<CountingEngine>,
}

#[async_trait]
impl EngineLoader for FixedLoader {
    async fn load(&self, _target: ComputeTarget) -> Result<Arc<dyn SynthesisEngine>, EngineError> {
        Ok(Arc::clone(&self.engine) as Arc<dyn SynthesisEngine>)
    }
}

struct EchoClient;

#[async_trait]
impl ChatModelClient for EchoClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, UpstreamError> {
        let last = request
            .messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        Ok(format!("echo: {last}"))
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<FragmentStream, UpstreamError> {
        let text = self.complete(request).await?;
        let fragments: Vec<Result<String, UpstreamError>> = text
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(stream::iter(fragments).boxed())
    }
}

struct Pipeline {
    store: Arc<AudioCacheStore>,
    speech: Arc<SpeechService>,
    chat: ChatService,
    engine: Arc<CountingEngine>,
    _dir: tempfile::TempDir,
}

async fn pipeline() -> Pipeline {
    let engine = Arc::new(CountingEngine {
        calls: AtomicU32::new(0),
    });
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(AudioCacheStore::new(dir.path(), true).await.unwrap());
    let model = Arc::new(SynthesisModelHandle::new(
        Box::new(FixedLoader {
            engine: Arc::clone(&engine),
        }),
        ComputeTarget::Cpu,
        1,
    ));
    let speech = Arc::new(SpeechService::new(
        Arc::clone(&store),
        model,
        RetryPolicy::default(),
        Duration::from_secs(120),
    ));
    let chat = ChatService::new(
        Arc::new(EchoClient),
        Arc::clone(&speech),
        Duration::from_secs(60),
    );
    Pipeline {
        store,
        speech,
        chat,
        engine,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_back_to_back_requests_share_one_cache_entry() {
    let pipeline = pipeline().await;
    let request = SynthesisRequest::new("hello", Voice::Default, 0.5, 0.5).unwrap();

    let first = pipeline.speech.generate(&request).await.unwrap();
    assert_eq!(pipeline.engine.calls.load(Ordering::SeqCst), 1);

    let second = pipeline.speech.generate(&request).await.unwrap();
    assert_eq!(first, second);
    // Second call never reached the engine.
    assert_eq!(pipeline.engine.calls.load(Ordering::SeqCst), 1);

    assert_eq!(
        pipeline.store.read(&first).await.unwrap(),
        b"RIFF:hello".to_vec()
    );
}

#[tokio::test]
async fn test_cache_identity_survives_distinct_service_instances() {
    // Same parameters derived in two processes-worth of services must name
    // the same entry.
    let first = pipeline().await;
    let second = pipeline().await;
    let request = SynthesisRequest::new("stable", Voice::Robot, 0.25, 0.75).unwrap();

    let key_a = first.speech.generate(&request).await.unwrap();
    let key_b = second.speech.generate(&request).await.unwrap();
    assert_eq!(key_a, key_b);
}

#[tokio::test]
async fn test_chat_reply_audio_is_readable_from_the_store() {
    let pipeline = pipeline().await;
    let request = CompletionRequest::new(vec![ChatMessage::user("hi")]);

    let reply = pipeline
        .chat
        .chat(&request, Some(&TtsOptions::default()))
        .await
        .unwrap();

    assert_eq!(reply.message.content, "echo: hi");
    let url = reply.audio_url.expect("reply should carry audio");

    // The URL names the cache entry for the reply text.
    let expected = SynthesisRequest::new("echo: hi", Voice::Default, 0.5, 0.5)
        .unwrap()
        .cache_key();
    assert_eq!(url, format!("/api/audio/{}", expected.file_name()));
    assert_eq!(
        pipeline.store.read(&expected).await.unwrap(),
        b"RIFF:echo: hi".to_vec()
    );
}

#[tokio::test]
async fn test_streamed_chat_reassembles_the_full_reply() {
    let pipeline = pipeline().await;
    let request = CompletionRequest::new(vec![ChatMessage::user("one two three")]);

    let events: Vec<_> = pipeline
        .chat
        .chat_stream(&request)
        .await
        .unwrap()
        .collect()
        .await;

    let mut text = String::new();
    for event in &events[..events.len() - 1] {
        match event {
            ChatStreamEvent::Fragment { content } => text.push_str(content),
            other => panic!("unexpected non-fragment before the terminal event: {other:?}"),
        }
    }
    assert_eq!(text, "echo: one two three");
    assert_eq!(events.last(), Some(&ChatStreamEvent::done()));
    // Streaming never triggers synthesis.
    assert_eq!(pipeline.engine.calls.load(Ordering::SeqCst), 0);
}
