//! Response bodies of the HTTP surface and service statistics

use serde::{Deserialize, Serialize};

/// Liveness status reported by `/health`
pub const HEALTHY: &str = "HEALTHY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: HEALTHY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeResponse {
    pub tokens: Vec<u32>,
    /// Always `tokens.len()`
    pub count: usize,
}

impl From<Vec<u32>> for EncodeResponse {
    fn from(tokens: Vec<u32>) -> Self {
        Self {
            count: tokens.len(),
            tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeResponse {
    pub text: String,
}

/// One sampled continuation, prompt included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub generated_text: String,
}

/// Outcome of one generate call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub result: Vec<GeneratedText>,
}

impl From<GenerationResult> for GenerateResponse {
    fn from(result: GenerationResult) -> Self {
        Self {
            result: result
                .texts
                .into_iter()
                .map(|generated_text| GeneratedText { generated_text })
                .collect(),
        }
    }
}

/// Counters accumulated since startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Completed encode calls
    pub encode_requests: u64,
    /// Completed decode calls
    pub decode_requests: u64,
    /// Generate calls that returned texts
    pub generate_requests: u64,
    /// Texts returned across all generate calls
    pub generated_sequences: u64,
    /// Generate calls that failed or timed out
    pub generate_failures: u64,
    /// Generate calls that hit the deadline
    pub timeouts: u64,
    /// Mean wall time of successful generate calls, in milliseconds
    pub average_generate_ms: f64,
}

/// Body of `/info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub model: String,
    pub device: String,
    pub max_context: usize,
    pub version: String,
    pub uptime_secs: u64,
    pub stats: ServiceStats,
}
