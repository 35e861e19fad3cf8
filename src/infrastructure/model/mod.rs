use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, OwnedSemaphorePermit, Semaphore};

/// Compute device the synthesis engine is loaded onto.
///
/// Passed explicitly into the engine loader; device selection is never done
/// by overriding shared runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeTarget {
    Cpu,
    Gpu(u32),
}

#[derive(Debug, thiserror::Error)]
#[error("invalid compute target {0:?}, expected \"cpu\", \"gpu\" or \"gpu:<index>\"")]
pub struct InvalidComputeTarget(pub String);

impl FromStr for ComputeTarget {
    type Err = InvalidComputeTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "cpu" => Ok(ComputeTarget::Cpu),
            "gpu" | "cuda" => Ok(ComputeTarget::Gpu(0)),
            other => other
                .strip_prefix("gpu:")
                .or_else(|| other.strip_prefix("cuda:"))
                .and_then(|index| index.parse().ok())
                .map(ComputeTarget::Gpu)
                .ok_or_else(|| InvalidComputeTarget(s.to_string())),
        }
    }
}

impl std::fmt::Display for ComputeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeTarget::Cpu => write!(f, "cpu"),
            ComputeTarget::Gpu(index) => write!(f, "gpu:{index}"),
        }
    }
}

/// Failure reported by the synthesis engine or its loader.
///
/// The engine is opaque to this crate; failures are carried as text and the
/// generation layer blanket-retries them within its policy.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct EngineError(pub String);

/// A loaded speech-synthesis engine.
///
/// Implementations must be safe to share; callers only invoke it through a
/// lease handed out by [`ModelRef`], which bounds in-flight synthesis.
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// Render `text` into an encoded waveform.
    async fn synthesize(
        &self,
        text: &str,
        exaggeration: f32,
        guidance_weight: f32,
    ) -> Result<Vec<u8>, EngineError>;

    /// Sample rate the engine renders at.
    fn sample_rate(&self) -> u32;
}

/// Loads the synthesis engine onto the configured compute device.
/// Invoked at most once per process by [`SynthesisModelHandle`].
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, target: ComputeTarget) -> Result<Arc<dyn SynthesisEngine>, EngineError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("synthesis model initialization failed: {0}")]
pub struct ModelInitializationError(pub String);

/// Shared reference to the ready engine plus its synthesis lease.
#[derive(Clone)]
pub struct ModelRef {
    engine: Arc<dyn SynthesisEngine>,
    lease: Arc<Semaphore>,
}

impl ModelRef {
    /// Wait for a synthesis slot. The semaphore queues waiters FIFO; the
    /// slot is released when the returned lease is dropped.
    pub async fn lease(&self) -> LeasedEngine {
        let permit = Arc::clone(&self.lease)
            .acquire_owned()
            .await
            .expect("synthesis lease semaphore is never closed");
        LeasedEngine {
            engine: Arc::clone(&self.engine),
            _permit: permit,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate()
    }
}

/// Exclusive (or bounded, when parallelism > 1) right to invoke the engine.
pub struct LeasedEngine {
    engine: Arc<dyn SynthesisEngine>,
    _permit: OwnedSemaphorePermit,
}

impl LeasedEngine {
    pub fn engine(&self) -> &dyn SynthesisEngine {
        self.engine.as_ref()
    }
}

enum ModelState {
    Uninitialized,
    Initializing,
    Ready(ModelRef),
    Failed(String),
}

/// Process-wide handle to the single synthesis model instance.
///
/// State machine: `Uninitialized -> Initializing -> Ready | Failed`. The
/// first caller of [`acquire`](Self::acquire) performs the load; concurrent
/// callers suspend until it resolves and then share the outcome. `Failed` is
/// terminal for the process lifetime: initialization is not retried, the
/// operator restarts the process.
pub struct SynthesisModelHandle {
    loader: Box<dyn EngineLoader>,
    target: ComputeTarget,
    parallelism: usize,
    state: Mutex<ModelState>,
    transitions: watch::Sender<u64>,
}

impl SynthesisModelHandle {
    pub fn new(loader: Box<dyn EngineLoader>, target: ComputeTarget, parallelism: usize) -> Self {
        let (transitions, _) = watch::channel(0);
        Self {
            loader,
            target,
            parallelism: parallelism.max(1),
            state: Mutex::new(ModelState::Uninitialized),
            transitions,
        }
    }

    /// Get the ready model, initializing it on first use.
    pub async fn acquire(&self) -> Result<ModelRef, ModelInitializationError> {
        loop {
            // Subscribe before inspecting state so a transition between the
            // check and the wait is never missed.
            let mut transitions = self.transitions.subscribe();
            let initialize = {
                let mut state = self.state.lock().await;
                match &*state {
                    ModelState::Ready(model) => return Ok(model.clone()),
                    ModelState::Failed(message) => {
                        return Err(ModelInitializationError(message.clone()))
                    }
                    ModelState::Initializing => false,
                    ModelState::Uninitialized => {
                        *state = ModelState::Initializing;
                        true
                    }
                }
            };

            if initialize {
                self.run_initialization().await;
            } else if transitions.changed().await.is_err() {
                return Err(ModelInitializationError(
                    "model handle dropped during initialization".to_string(),
                ));
            }
        }
    }

    /// Trigger initialization without waiting for it, so the first real
    /// request does not pay the load cost.
    pub fn warm_up(self: &Arc<Self>) {
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = handle.acquire().await {
                tracing::warn!(error = %error, "synthesis model warm-up failed");
            }
        });
    }

    async fn run_initialization(&self) {
        tracing::info!(target_device = %self.target, "initializing synthesis model");
        let started = Instant::now();
        let outcome = self.loader.load(self.target).await;

        let mut state = self.state.lock().await;
        *state = match outcome {
            Ok(engine) => {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    sample_rate = engine.sample_rate(),
                    "synthesis model ready"
                );
                ModelState::Ready(ModelRef {
                    engine,
                    lease: Arc::new(Semaphore::new(self.parallelism)),
                })
            }
            Err(error) => {
                tracing::error!(error = %error, "synthesis model initialization failed");
                ModelState::Failed(error.to_string())
            }
        };
        drop(state);
        self.transitions.send_modify(|generation| *generation += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct NullEngine;

    #[async_trait]
    impl SynthesisEngine for NullEngine {
        async fn synthesize(
            &self,
            _text: &str,
            _exaggeration: f32,
            _guidance_weight: f32,
        ) -> Result<Vec<u8>, EngineError> {
            Ok(vec![0u8; 4])
        }

        fn sample_rate(&self) -> u32 {
            24_000
        }
    }

    struct CountingLoader {
        loads: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl EngineLoader for CountingLoader {
        async fn load(
            &self,
            _target: ComputeTarget,
        ) -> Result<Arc<dyn SynthesisEngine>, EngineError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                Err(EngineError("weights missing".to_string()))
            } else {
                Ok(Arc::new(NullEngine))
            }
        }
    }

    fn handle(loads: &Arc<AtomicU32>, fail: bool) -> Arc<SynthesisModelHandle> {
        Arc::new(SynthesisModelHandle::new(
            Box::new(CountingLoader {
                loads: Arc::clone(loads),
                fail,
            }),
            ComputeTarget::Cpu,
            1,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_initializes_exactly_once() {
        let loads = Arc::new(AtomicU32::new(0));
        let handle = handle(&loads, false);

        let callers: Vec<_> = (0..8).map(|_| handle.acquire()).collect();
        let results = join_all(callers).await;

        assert!(results.iter().all(|result| result.is_ok()));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialization_failure_reaches_all_waiters_and_is_terminal() {
        let loads = Arc::new(AtomicU32::new(0));
        let handle = handle(&loads, true);

        let callers: Vec<_> = (0..4).map(|_| handle.acquire()).collect();
        let results = join_all(callers).await;

        assert!(results.iter().all(|result| result.is_err()));
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        // Failed is terminal: a later caller fails without a new load.
        assert!(handle.acquire().await.is_err());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_handle_is_reused_without_reloading() {
        let loads = Arc::new(AtomicU32::new(0));
        let handle = handle(&loads, false);

        handle.acquire().await.unwrap();
        let model = handle.acquire().await.unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(model.sample_rate(), 24_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_serializes_engine_use() {
        let loads = Arc::new(AtomicU32::new(0));
        let handle = handle(&loads, false);
        let model = handle.acquire().await.unwrap();

        let held = model.lease().await;
        let blocked = tokio::time::timeout(Duration::from_millis(10), model.lease()).await;
        assert!(blocked.is_err(), "second lease must wait for the first");

        drop(held);
        let granted = tokio::time::timeout(Duration::from_millis(10), model.lease()).await;
        assert!(granted.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_up_preloads_the_model_in_the_background() {
        let loads = Arc::new(AtomicU32::new(0));
        let handle = handle(&loads, false);

        handle.warm_up();
        // Let the spawned initialization run to completion.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        handle.acquire().await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_compute_target_parsing() {
        assert_eq!("cpu".parse::<ComputeTarget>().unwrap(), ComputeTarget::Cpu);
        assert_eq!("gpu".parse::<ComputeTarget>().unwrap(), ComputeTarget::Gpu(0));
        assert_eq!(
            "gpu:2".parse::<ComputeTarget>().unwrap(),
            ComputeTarget::Gpu(2)
        );
        assert_eq!(
            "cuda:1".parse::<ComputeTarget>().unwrap(),
            ComputeTarget::Gpu(1)
        );
        assert!("tpu".parse::<ComputeTarget>().is_err());
        assert!("gpu:x".parse::<ComputeTarget>().is_err());
    }

    #[test]
    fn test_compute_target_display() {
        assert_eq!(ComputeTarget::Cpu.to_string(), "cpu");
        assert_eq!(ComputeTarget::Gpu(3).to_string(), "gpu:3");
    }
}
