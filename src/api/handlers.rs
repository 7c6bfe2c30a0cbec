use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::error::{Result, ServiceError};
use crate::request::{DecodeRequest, EncodeRequest, GenerateRequest, Reason, ValidationErrors};
use crate::service::LlmService;
use crate::types::{
    DecodeResponse, EncodeResponse, GenerateResponse, HealthResponse, InfoResponse,
};

type AppState = State<Arc<LlmService>>;

/// Parse the raw body as JSON. Unparseable bodies are a validation failure
/// of the body itself rather than a transport error.
fn parse_body(body: &Bytes) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| {
        ServiceError::from(ValidationErrors::single(
            "body",
            Reason::WrongType,
            format!("invalid JSON: {}", e),
        ))
    })
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

pub async fn info(State(service): AppState) -> Json<InfoResponse> {
    Json(service.info())
}

pub async fn encode(State(service): AppState, body: Bytes) -> Result<Json<EncodeResponse>> {
    let request = EncodeRequest::from_json(&parse_body(&body)?)?;
    let tokens = service.encode(&request)?;
    Ok(Json(EncodeResponse::from(tokens)))
}

pub async fn decode(State(service): AppState, body: Bytes) -> Result<Json<DecodeResponse>> {
    let request = DecodeRequest::from_json(&parse_body(&body)?)?;
    let text = service.decode(&request)?;
    Ok(Json(DecodeResponse { text }))
}

pub async fn generate(State(service): AppState, body: Bytes) -> Result<Json<GenerateResponse>> {
    let request = GenerateRequest::from_json(&parse_body(&body)?)?;
    tracing::debug!(
        prompt_chars = request.prompt.chars().count(),
        max_new_tokens = request.max_new_tokens,
        num_return_sequences = request.num_return_sequences,
        temp = request.temp,
        top_p = request.top_p,
        "generate request"
    );
    let result = service.generate(&request).await?;
    Ok(Json(GenerateResponse::from(result)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_body_is_wrong_type() {
        let err = parse_body(&Bytes::from_static(b"{not json")).unwrap_err();
        match err {
            ServiceError::Validation(errors) => assert!(errors.has("body", Reason::WrongType)),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_valid_body_parses() {
        let value = parse_body(&Bytes::from_static(br#"{"text": "hi"}"#)).unwrap();
        assert_eq!(value["text"], "hi");
    }
}
