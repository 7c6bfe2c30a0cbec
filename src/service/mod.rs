//! Model facade shared by all request handlers

mod builder;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;

pub use builder::ServiceBuilder;

use crate::error::{Result, ServiceError};
use crate::model::{CancelFlag, GenerationParams, GenerationTicket, ModelBackend};
use crate::request::{DecodeRequest, EncodeRequest, GenerateRequest};
use crate::types::{GenerationResult, InfoResponse, ServiceStats};

/// Owns the loaded model and serializes access to it.
///
/// Tokenization runs inline. Generation is bounded by a semaphore and a
/// deadline; a generation whose caller goes away is asked to stop.
pub struct LlmService {
    backend: Arc<dyn ModelBackend>,
    generation_slots: Arc<Semaphore>,
    request_timeout: Duration,
    stats: Mutex<StatsState>,
    started: Instant,
}

#[derive(Debug, Default)]
struct StatsState {
    counters: ServiceStats,
    total_generate_time: Duration,
}

/// Cancels the wrapped flag when dropped, so an abandoned request future
/// stops its generation.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl LlmService {
    /// Create a new service builder
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    pub(crate) fn new(
        backend: Arc<dyn ModelBackend>,
        max_concurrent_generations: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            generation_slots: Arc::new(Semaphore::new(max_concurrent_generations)),
            request_timeout,
            stats: Mutex::new(StatsState::default()),
            started: Instant::now(),
        }
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        self.backend.count_tokens(text)
    }

    pub fn encode(&self, request: &EncodeRequest) -> Result<Vec<u32>> {
        let tokens = self.backend.encode(&request.text)?;
        self.stats.lock().counters.encode_requests += 1;
        Ok(tokens)
    }

    pub fn decode(&self, request: &DecodeRequest) -> Result<String> {
        let text = self.backend.decode(&request.tokens)?;
        self.stats.lock().counters.decode_requests += 1;
        Ok(text)
    }

    /// Sample continuations of `request.prompt`.
    ///
    /// Returns exactly `max(num_return_sequences, 1)` texts, each starting
    /// with the prompt.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerationResult> {
        let params = GenerationParams::from(request);
        let expected = params.sequences();
        let start_time = Instant::now();

        let cancel = CancelFlag::new();
        let _guard = CancelOnDrop(cancel.clone());

        let backend = Arc::clone(&self.backend);
        let slots = Arc::clone(&self.generation_slots);
        let work = async move {
            let slot = slots
                .acquire_owned()
                .await
                .map_err(|e| ServiceError::backend_with("generation slots closed", e))?;
            backend
                .generate(params, GenerationTicket::new(cancel, Some(slot)))
                .await
        };

        let outcome = match tokio::time::timeout(self.request_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                self.stats.lock().counters.timeouts += 1;
                Err(ServiceError::Timeout {
                    duration: self.request_timeout,
                    operation: "generate".to_string(),
                })
            }
        };

        let outcome = outcome.and_then(|texts| {
            if texts.len() == expected {
                Ok(texts)
            } else {
                Err(ServiceError::backend(format!(
                    "backend returned {} sequences, expected {}",
                    texts.len(),
                    expected
                )))
            }
        });

        let elapsed = start_time.elapsed();
        let mut stats = self.stats.lock();
        match outcome {
            Ok(texts) => {
                stats.counters.generate_requests += 1;
                stats.counters.generated_sequences += texts.len() as u64;
                stats.total_generate_time += elapsed;
                stats.counters.average_generate_ms = stats.total_generate_time.as_secs_f64()
                    * 1000.0
                    / stats.counters.generate_requests as f64;
                drop(stats);

                tracing::info!(
                    sequences = texts.len(),
                    max_new_tokens = request.max_new_tokens,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "generation completed"
                );
                Ok(GenerationResult { texts })
            }
            Err(e) => {
                stats.counters.generate_failures += 1;
                drop(stats);
                tracing::warn!(error = %e, "generation failed");
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats.lock().counters.clone()
    }

    pub fn info(&self) -> InfoResponse {
        InfoResponse {
            model: self.backend.model_id().to_string(),
            device: self.backend.device(),
            max_context: self.backend.max_context(),
            version: crate::VERSION.to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            stats: self.stats(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::request::{DecodeRequest, EncodeRequest};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Word-per-token backend with a fixed GPT-2-like vocabulary.
    pub(crate) struct MockBackend {
        pub(crate) delay: Duration,
        /// Time spent on a blocking thread that ignores cancellation
        pub(crate) blocking: Duration,
        pub(crate) short_by: usize,
        pub(crate) calls: AtomicUsize,
    }

    const VOCAB: &[(&str, u32)] = &[
        ("That", 2504),
        (" is", 318),
        (" my", 616),
        (" text", 2420),
    ];

    impl MockBackend {
        pub(crate) fn new() -> Self {
            Self {
                delay: Duration::ZERO,
                blocking: Duration::ZERO,
                short_by: 0,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ModelBackend for MockBackend {
        fn model_id(&self) -> &str {
            "mock-gpt2"
        }

        fn device(&self) -> String {
            "cpu".to_string()
        }

        fn max_context(&self) -> usize {
            1024
        }

        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            let mut tokens = Vec::new();
            for (i, word) in text.split(' ').enumerate() {
                let piece = if i == 0 {
                    word.to_string()
                } else {
                    format!(" {}", word)
                };
                let id = VOCAB
                    .iter()
                    .find(|(p, _)| *p == piece)
                    .map(|(_, id)| *id)
                    .ok_or_else(|| ServiceError::backend(format!("unknown word '{}'", word)))?;
                tokens.push(id);
            }
            Ok(tokens)
        }

        fn decode(&self, tokens: &[u32]) -> Result<String> {
            Ok(tokens
                .iter()
                .filter_map(|t| VOCAB.iter().find(|(_, id)| id == t).map(|(p, _)| *p))
                .collect())
        }

        async fn generate(
            &self,
            params: GenerationParams,
            ticket: GenerationTicket,
        ) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.blocking.is_zero() {
                let blocking = self.blocking;
                return tokio::task::spawn_blocking(move || {
                    std::thread::sleep(blocking);
                    drop(ticket);
                    Ok(vec![params.prompt.clone(); params.sequences()])
                })
                .await
                .map_err(|e| ServiceError::backend_with("worker failed", e))?;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if ticket.is_cancelled() {
                return Err(ServiceError::backend("generation cancelled"));
            }
            let count = params.sequences().saturating_sub(self.short_by);
            Ok((0..count)
                .map(|i| format!("{} continuation {}", params.prompt, i))
                .collect())
        }
    }

    fn service(backend: MockBackend, timeout: Duration) -> LlmService {
        LlmService::new(Arc::new(backend), 1, timeout)
    }

    #[test]
    fn test_encode_decode() {
        let svc = service(MockBackend::new(), Duration::from_secs(5));
        let tokens = svc
            .encode(&EncodeRequest {
                text: "That is my text".to_string(),
            })
            .unwrap();
        assert_eq!(tokens, vec![2504, 318, 616, 2420]);
        assert_eq!(svc.count_tokens("That is my text").unwrap(), 4);

        let text = svc.decode(&DecodeRequest { tokens }).unwrap();
        assert_eq!(text, "That is my text");

        let stats = svc.stats();
        assert_eq!(stats.encode_requests, 1);
        assert_eq!(stats.decode_requests, 1);
    }

    #[tokio::test]
    async fn test_generate_returns_prompt_prefixed_texts() {
        let svc = service(MockBackend::new(), Duration::from_secs(5));
        let mut request = GenerateRequest::new("Hello");
        request.num_return_sequences = 3;

        let result = svc.generate(&request).await.unwrap();
        assert_eq!(result.texts.len(), 3);
        assert!(result.texts.iter().all(|t| t.starts_with("Hello")));
        assert_eq!(svc.stats().generated_sequences, 3);
    }

    #[tokio::test]
    async fn test_zero_sequences_returns_one() {
        let svc = service(MockBackend::new(), Duration::from_secs(5));
        let mut request = GenerateRequest::new("Hello");
        request.num_return_sequences = 0;

        let result = svc.generate(&request).await.unwrap();
        assert_eq!(result.texts.len(), 1);
    }

    #[tokio::test]
    async fn test_generate_timeout() {
        let backend = MockBackend {
            delay: Duration::from_millis(500),
            ..MockBackend::new()
        };
        let svc = service(backend, Duration::from_millis(20));

        let err = svc.generate(&GenerateRequest::new("Hello")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { .. }));
        let stats = svc.stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.generate_failures, 1);
    }

    #[tokio::test]
    async fn test_short_backend_output_is_an_error() {
        let backend = MockBackend {
            short_by: 1,
            ..MockBackend::new()
        };
        let svc = service(backend, Duration::from_secs(5));

        let err = svc.generate(&GenerateRequest::new("Hello")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Backend { .. }));
    }

    #[tokio::test]
    async fn test_info_reports_backend() {
        let svc = service(MockBackend::new(), Duration::from_secs(5));
        let info = svc.info();
        assert_eq!(info.model, "mock-gpt2");
        assert_eq!(info.device, "cpu");
        assert_eq!(info.max_context, 1024);
        assert_eq!(info.version, crate::VERSION);
    }

    #[tokio::test]
    async fn test_generations_are_serialized() {
        let backend = MockBackend {
            delay: Duration::from_millis(50),
            ..MockBackend::new()
        };
        let svc = Arc::new(service(backend, Duration::from_secs(5)));

        let start = Instant::now();
        let a = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.generate(&GenerateRequest::new("Hello")).await })
        };
        let b = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.generate(&GenerateRequest::new("Hello")).await })
        };
        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_timed_out_generation_keeps_its_slot_until_it_stops() {
        let backend = MockBackend {
            blocking: Duration::from_millis(300),
            ..MockBackend::new()
        };
        let svc = service(backend, Duration::from_millis(20));

        let err = svc.generate(&GenerateRequest::new("Hello")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { .. }));
        assert_eq!(svc.generation_slots.available_permits(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(svc.generation_slots.available_permits(), 1);
    }
}
