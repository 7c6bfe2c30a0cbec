//! Model backend abstraction and the GPT-2 implementation behind it

mod gpt2;
mod loader;
mod runtime;
mod tokenizer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;

pub use gpt2::{Gpt2Cache, Gpt2Config, Gpt2Model};
pub use loader::{ModelFiles, ModelLoader};
pub use runtime::{CandleBackend, Gpt2Runtime};
pub use tokenizer::{TextTokenizer, END_OF_TEXT};

use crate::error::Result;
use crate::request::GenerateRequest;

/// Sampling parameters of one generate call, as handed to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub max_new_tokens: usize,
    pub num_return_sequences: usize,
    pub temperature: f64,
    pub top_p: f64,
}

impl GenerationParams {
    /// Number of sequences actually produced; zero is treated as one.
    pub fn sequences(&self) -> usize {
        self.num_return_sequences.max(1)
    }
}

impl From<&GenerateRequest> for GenerationParams {
    fn from(request: &GenerateRequest) -> Self {
        Self {
            prompt: request.prompt.clone(),
            max_new_tokens: request.max_new_tokens,
            num_return_sequences: request.num_return_sequences,
            temperature: request.temp,
            top_p: request.top_p,
        }
    }
}

/// Shared flag asking a running generation to stop early
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What a backend holds for the lifetime of one generation: the
/// cancellation flag and, when the caller bounds concurrency, the slot the
/// generation occupies. The slot is released only when the ticket is dropped,
/// so it must live as long as the work itself.
#[derive(Debug)]
pub struct GenerationTicket {
    cancel: CancelFlag,
    _slot: Option<OwnedSemaphorePermit>,
}

impl GenerationTicket {
    pub fn new(cancel: CancelFlag, slot: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            cancel,
            _slot: slot,
        }
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl From<CancelFlag> for GenerationTicket {
    fn from(cancel: CancelFlag) -> Self {
        Self::new(cancel, None)
    }
}

/// Capabilities the service needs from an inference engine.
///
/// `encode`/`decode` must be deterministic. `generate` returns exactly
/// [`GenerationParams::sequences`] texts or an error.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    /// Identifier the model was loaded from
    fn model_id(&self) -> &str;

    /// Device label, e.g. `cpu` or `cuda:0`
    fn device(&self) -> String;

    /// Context window in tokens
    fn max_context(&self) -> usize;

    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, tokens: &[u32]) -> Result<String>;

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text)?.len())
    }

    /// Implementations must keep `ticket` alive until the generation has
    /// actually stopped, not merely until the future is dropped.
    async fn generate(
        &self,
        params: GenerationParams,
        ticket: GenerationTicket,
    ) -> Result<Vec<String>>;
}
