// Location: src/model/tokenizer.rs

use std::path::Path;

use tokenizers::Tokenizer as HfTokenizer;

use crate::error::{Result, ServiceError};

/// Spelling of the end-of-text marker in GPT-2 style vocabularies
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// HuggingFace tokenizer bound to the loaded model's vocabulary.
///
/// Encoding never adds special tokens and decoding never emits them, so
/// `decode(encode(text)) == text` for in-vocabulary text.
pub struct TextTokenizer {
    tokenizer: HfTokenizer,
    eos_token_id: Option<u32>,
}

impl TextTokenizer {
    /// Load a `tokenizer.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = HfTokenizer::from_file(path).map_err(|e| {
            ServiceError::startup(format!("failed to load tokenizer from {}", path.display()), e)
        })?;
        Ok(Self::new(tokenizer))
    }

    pub fn new(tokenizer: HfTokenizer) -> Self {
        let eos_token_id = tokenizer.token_to_id(END_OF_TEXT);
        Self {
            tokenizer,
            eos_token_id,
        }
    }

    /// Encode text to token IDs
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| ServiceError::backend_with("tokenization failed", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode token IDs back to text, dropping special tokens
    pub fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| ServiceError::backend_with("decoding failed", e))
    }

    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    /// Get the vocabulary size, added tokens included
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}
