use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use super::{CacheKey, SpeechError, SynthesisRequest};
use crate::infrastructure::cache::AudioCacheStore;
use crate::infrastructure::model::{ModelRef, SynthesisModelHandle};

/// Retry policy for transient synthesis failures.
///
/// Retries are blanket: every engine failure is treated as transient and
/// fed back into the policy, mirroring the behavior this subsystem has
/// always had. A failure on the final attempt surfaces as
/// [`SpeechError::Synthesis`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Cap applied to the growing backoff.
    pub max_backoff: Duration,
    /// Backoff multiplier between attempts.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Orchestrates speech generation: cache lookup, model acquisition,
/// retried synthesis and cache write-back.
///
/// `generate` returns only the [`CacheKey`]; the audio itself is read back
/// through [`AudioCacheStore`]. There is deliberately no in-memory fallback
/// return path when the post-synthesis write fails.
pub struct SpeechService {
    store: Arc<AudioCacheStore>,
    model: Arc<SynthesisModelHandle>,
    retry: RetryPolicy,
    synthesis_timeout: Duration,
    inflight: Mutex<HashMap<CacheKey, watch::Receiver<()>>>,
}

enum InflightRole<'a> {
    Leader(InflightGuard<'a>),
    Follower(watch::Receiver<()>),
}

struct InflightGuard<'a> {
    map: &'a Mutex<HashMap<CacheKey, watch::Receiver<()>>>,
    key: CacheKey,
    _notify_on_drop: watch::Sender<()>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.remove(&self.key);
    }
}

impl SpeechService {
    pub fn new(
        store: Arc<AudioCacheStore>,
        model: Arc<SynthesisModelHandle>,
        retry: RetryPolicy,
        synthesis_timeout: Duration,
    ) -> Self {
        Self {
            store,
            model,
            retry,
            synthesis_timeout,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Produce (or find) the cached audio for `request` and return its key.
    pub async fn generate(&self, request: &SynthesisRequest) -> Result<CacheKey, SpeechError> {
        let key = request.cache_key();

        if self.store.exists(&key).await? {
            tracing::info!(
                cache_key = %key,
                text_preview = %preview(request.text()),
                "audio cache hit"
            );
            return Ok(key);
        }

        // Coalesce concurrent misses on the same key: one leader pays for
        // the synthesis, followers wait and re-check the store. A failed
        // leader leaves followers to take their own turn.
        let guard = loop {
            match self.join_or_lead(&key) {
                InflightRole::Leader(guard) => break guard,
                InflightRole::Follower(mut done) => {
                    tracing::debug!(cache_key = %key, "waiting for in-flight synthesis of same key");
                    let _ = done.changed().await;
                    if self.store.exists(&key).await? {
                        return Ok(key);
                    }
                }
            }
        };

        let result = self.synthesize_and_store(request, &key).await;
        drop(guard);
        result.map(|_| key)
    }

    fn join_or_lead(&self, key: &CacheKey) -> InflightRole<'_> {
        let mut map = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(done) = map.get(key) {
            return InflightRole::Follower(done.clone());
        }
        let (notify_on_drop, done) = watch::channel(());
        map.insert(key.clone(), done);
        InflightRole::Leader(InflightGuard {
            map: &self.inflight,
            key: key.clone(),
            _notify_on_drop: notify_on_drop,
        })
    }

    async fn synthesize_and_store(
        &self,
        request: &SynthesisRequest,
        key: &CacheKey,
    ) -> Result<(), SpeechError> {
        let model = self.model.acquire().await?;

        tracing::info!(
            cache_key = %key,
            voice = %request.voice(),
            text_length = request.text().len(),
            text_preview = %preview(request.text()),
            "generating speech"
        );

        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0u32;
        let audio = loop {
            attempt += 1;
            match self.attempt_synthesis(&model, request).await {
                Ok(audio) => break audio,
                Err(message) => {
                    if attempt >= self.retry.max_attempts {
                        tracing::error!(
                            cache_key = %key,
                            attempts = attempt,
                            error = %message,
                            "speech synthesis exhausted retries"
                        );
                        return Err(SpeechError::Synthesis {
                            attempts: attempt,
                            message,
                        });
                    }
                    tracing::warn!(
                        cache_key = %key,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %message,
                        "speech synthesis attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = Duration::from_secs_f64(
                        (backoff.as_secs_f64() * self.retry.multiplier)
                            .min(self.retry.max_backoff.as_secs_f64()),
                    );
                }
            }
        };

        self.store.write(key, &audio).await?;
        tracing::info!(
            cache_key = %key,
            audio_size = audio.len(),
            "speech generated and cached"
        );
        Ok(())
    }

    /// One synthesis attempt. The lease covers only this attempt, so
    /// backoff sleeps never hold up other callers.
    async fn attempt_synthesis(
        &self,
        model: &ModelRef,
        request: &SynthesisRequest,
    ) -> Result<Vec<u8>, String> {
        let leased = model.lease().await;
        let synthesis = leased.engine().synthesize(
            request.text(),
            request.exaggeration(),
            request.guidance_weight(),
        );
        match tokio::time::timeout(self.synthesis_timeout, synthesis).await {
            Ok(Ok(audio)) => Ok(audio),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err(format!(
                "synthesis timed out after {:?}",
                self.synthesis_timeout
            )),
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(30).collect()
}
