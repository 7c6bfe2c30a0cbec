//! LLM Service - HTTP tokenization and text generation over a pretrained
//! GPT-2 family model
//!
//! The crate exposes four operations over a single loaded model: liveness,
//! encoding text to token ids, decoding token ids to text, and sampling
//! continuations of a prompt. Requests are validated against the limits in
//! [`bounds`] before they reach the model.

// Public modules
pub mod api;
pub mod bounds;
pub mod config;
pub mod device;
pub mod error;
pub mod model;
pub mod request;
pub mod service;
pub mod types;
pub mod utils;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_RUST_VERSION: &str = "1.75.0";

// Re-exports for public API
pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use model::{CancelFlag, GenerationParams, GenerationTicket, ModelBackend};
pub use request::{DecodeRequest, EncodeRequest, GenerateRequest, Reason, ValidationErrors};
pub use service::{LlmService, ServiceBuilder};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_numbers() {
        assert!(!VERSION.is_empty());
        assert!(!MIN_RUST_VERSION.is_empty());
    }
}
