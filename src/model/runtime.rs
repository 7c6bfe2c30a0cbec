// Location: src/model/runtime.rs

use std::sync::Arc;
use std::time::Instant;

use candle_core::{Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};

use super::{
    CancelFlag, GenerationParams, GenerationTicket, Gpt2Cache, Gpt2Model, ModelBackend,
    TextTokenizer,
};
use crate::device;
use crate::error::{Result, ServiceError};

/// Loaded tokenizer and weights plus the sampling loop.
pub struct Gpt2Runtime {
    model: Gpt2Model,
    tokenizer: TextTokenizer,
    eos_token_id: Option<u32>,
    pad_token_id: u32,
}

impl Gpt2Runtime {
    /// `pad_token_id` is fed to rows that already finished. Vocabularies
    /// too small to hold it pad with the end-of-text token instead.
    pub fn new(model: Gpt2Model, tokenizer: TextTokenizer, pad_token_id: u32) -> Self {
        let eos_token_id = tokenizer.eos_token_id().or(model.config().eos_token_id);
        let pad_token_id = if (pad_token_id as usize) < model.config().vocab_size {
            pad_token_id
        } else {
            eos_token_id.unwrap_or(0)
        };
        Self {
            model,
            tokenizer,
            eos_token_id,
            pad_token_id,
        }
    }

    pub fn device(&self) -> &Device {
        self.model.device()
    }

    pub fn max_context(&self) -> usize {
        self.model.config().n_positions
    }

    pub fn tokenizer(&self) -> &TextTokenizer {
        &self.tokenizer
    }

    /// Keep the most recent prompt tokens so prompt and continuation fit the
    /// context window. At least one prompt token survives; the number of new
    /// tokens shrinks only when it alone exceeds the window.
    fn fit_context(&self, mut prompt: Vec<u32>, max_new_tokens: usize) -> (Vec<u32>, usize) {
        let window = self.max_context();
        let max_new_tokens = max_new_tokens.min(window.saturating_sub(1));
        let budget = (window - max_new_tokens).max(1);
        if prompt.len() > budget {
            prompt.drain(..prompt.len() - budget);
        }
        (prompt, max_new_tokens)
    }

    /// Sample `params.sequences()` continuations of the prompt as one batch.
    pub fn generate(&self, params: &GenerationParams, cancel: &CancelFlag) -> Result<Vec<String>> {
        let start_time = Instant::now();
        let sequences = params.sequences();

        let mut prompt_ids = self.tokenizer.encode(&params.prompt)?;
        if prompt_ids.is_empty() {
            prompt_ids.push(self.eos_token_id.unwrap_or(self.pad_token_id));
        }
        let (context, max_new_tokens) = self.fit_context(prompt_ids, params.max_new_tokens);

        let device = self.device();
        let mut input = Tensor::new(context.as_slice(), device)?
            .unsqueeze(0)?
            .repeat((sequences, 1))?;
        let mut cache = Gpt2Cache::new(self.model.config());

        let sampling = sampling_for(params.temperature, params.top_p);
        let mut processors: Vec<LogitsProcessor> = (0..sequences)
            .map(|_| LogitsProcessor::from_sampling(rand::random(), sampling.clone()))
            .collect();

        let mut generated: Vec<Vec<u32>> = vec![Vec::new(); sequences];
        let mut finished = vec![false; sequences];

        for _ in 0..max_new_tokens {
            if cancel.is_cancelled() {
                return Err(ServiceError::backend("generation cancelled"));
            }

            let logits = self.model.forward(&input, &mut cache)?;

            let mut next_tokens = Vec::with_capacity(sequences);
            for (row, processor) in processors.iter_mut().enumerate() {
                if finished[row] {
                    next_tokens.push(self.pad_token_id);
                    continue;
                }
                let token = processor.sample(&logits.get(row)?)?;
                if Some(token) == self.eos_token_id {
                    finished[row] = true;
                    next_tokens.push(self.pad_token_id);
                } else {
                    generated[row].push(token);
                    next_tokens.push(token);
                }
            }

            if finished.iter().all(|done| *done) {
                break;
            }
            input = Tensor::new(next_tokens.as_slice(), device)?.unsqueeze(1)?;
        }

        let texts = generated
            .iter()
            .map(|tokens| {
                self.tokenizer
                    .decode(tokens)
                    .map(|continuation| format!("{}{}", params.prompt, continuation))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            sequences,
            prompt_tokens = context.len(),
            new_tokens = generated.iter().map(Vec::len).sum::<usize>(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "generation finished"
        );

        Ok(texts)
    }
}

/// Map request parameters onto a candle sampling strategy.
///
/// A temperature of zero, or a nucleus of zero probability mass, reduces to
/// picking the most likely token.
fn sampling_for(temperature: f64, top_p: f64) -> Sampling {
    if temperature <= 0.0 || top_p <= 0.0 {
        Sampling::ArgMax
    } else if top_p >= 1.0 {
        Sampling::All { temperature }
    } else {
        Sampling::TopP {
            p: top_p,
            temperature,
        }
    }
}

/// [`ModelBackend`] running a [`Gpt2Runtime`] on blocking worker threads.
pub struct CandleBackend {
    model_id: String,
    runtime: Arc<Gpt2Runtime>,
}

impl CandleBackend {
    pub fn new(model_id: impl Into<String>, runtime: Gpt2Runtime) -> Self {
        Self {
            model_id: model_id.into(),
            runtime: Arc::new(runtime),
        }
    }
}

#[async_trait::async_trait]
impl ModelBackend for CandleBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn device(&self) -> String {
        device::describe(self.runtime.device())
    }

    fn max_context(&self) -> usize {
        self.runtime.max_context()
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        self.runtime.tokenizer().encode(text)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.runtime.tokenizer().decode(tokens)
    }

    async fn generate(
        &self,
        params: GenerationParams,
        ticket: GenerationTicket,
    ) -> Result<Vec<String>> {
        let runtime = Arc::clone(&self.runtime);
        // The ticket moves into the worker so its slot outlives an abandoned future.
        tokio::task::spawn_blocking(move || runtime.generate(&params, ticket.cancel_flag()))
            .await
            .map_err(|e| ServiceError::backend_with("generation task failed", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tokenizer::tests::word_tokenizer;
    use crate::model::Gpt2Config;
    use candle_core::DType;
    use candle_nn::VarBuilder;

    fn tiny_runtime() -> Gpt2Runtime {
        let config = Gpt2Config {
            vocab_size: 8,
            n_positions: 16,
            n_embd: 4,
            n_layer: 1,
            n_head: 2,
            layer_norm_epsilon: 1e-5,
            eos_token_id: Some(7),
        };
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let model = Gpt2Model::load(vb, &config).unwrap();
        Gpt2Runtime::new(model, word_tokenizer(), 7)
    }

    fn params(prompt: &str, max_new_tokens: usize, sequences: usize) -> GenerationParams {
        GenerationParams {
            prompt: prompt.to_string(),
            max_new_tokens,
            num_return_sequences: sequences,
            temperature: 0.7,
            top_p: 0.9,
        }
    }

    #[test]
    fn test_generate_returns_requested_count() -> Result<()> {
        let runtime = tiny_runtime();
        let texts = runtime.generate(&params("hello world", 4, 3), &CancelFlag::new())?;
        assert_eq!(texts.len(), 3);
        for text in &texts {
            assert!(text.starts_with("hello world"));
        }
        Ok(())
    }

    #[test]
    fn test_zero_sequences_yield_one() -> Result<()> {
        let runtime = tiny_runtime();
        let texts = runtime.generate(&params("hello", 2, 0), &CancelFlag::new())?;
        assert_eq!(texts.len(), 1);
        Ok(())
    }

    #[test]
    fn test_long_prompt_is_truncated_not_rejected() -> Result<()> {
        let runtime = tiny_runtime();
        let prompt = vec!["hello"; 40].join(" ");
        let texts = runtime.generate(&params(&prompt, 1024, 1), &CancelFlag::new())?;
        assert_eq!(texts.len(), 1);
        Ok(())
    }

    #[test]
    fn test_fit_context() {
        let runtime = tiny_runtime();
        let (context, new_tokens) = runtime.fit_context((0..20).collect(), 4);
        assert_eq!(context, (8..20).collect::<Vec<u32>>());
        assert_eq!(new_tokens, 4);

        let (context, new_tokens) = runtime.fit_context(vec![1, 2, 3], 1024);
        assert_eq!(context, vec![3]);
        assert_eq!(new_tokens, 15);
    }

    #[test]
    fn test_cancelled_generation_fails() {
        let runtime = tiny_runtime();
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(runtime.generate(&params("hello", 4, 1), &cancel).is_err());
    }

    #[test]
    fn test_out_of_vocab_pad_falls_back_to_eos() {
        let runtime = tiny_runtime();
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let model = Gpt2Model::load(vb, runtime.model.config()).unwrap();
        let runtime = Gpt2Runtime::new(model, word_tokenizer(), crate::bounds::PAD_TOKEN_ID);
        assert_eq!(runtime.pad_token_id, 7);
    }

    #[test]
    fn test_sampling_strategy() {
        assert!(matches!(sampling_for(0.0, 0.9), Sampling::ArgMax));
        assert!(matches!(sampling_for(0.7, 0.0), Sampling::ArgMax));
        assert!(matches!(sampling_for(0.7, 1.0), Sampling::All { .. }));
        assert!(matches!(sampling_for(0.2, 0.95), Sampling::TopP { .. }));
    }

    #[tokio::test]
    async fn test_backend_delegates_to_runtime() -> Result<()> {
        let backend = CandleBackend::new("tiny", tiny_runtime());
        assert_eq!(backend.model_id(), "tiny");
        assert_eq!(backend.device(), "cpu");
        assert_eq!(backend.max_context(), 16);
        assert_eq!(backend.count_tokens("that is my text")?, 4);

        let texts = backend
            .generate(params("hello", 3, 2), CancelFlag::new().into())
            .await?;
        assert_eq!(texts.len(), 2);
        Ok(())
    }
}
