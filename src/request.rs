//! Self-validating request schemas for the encode, decode and generate
//! operations.
//!
//! Each schema is built from an untyped JSON value. Validation never stops
//! at the first problem: every offending field is reported with a
//! machine-readable [`Reason`].

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::bounds::{self, Bound, LengthBound};

/// Why a field was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    TooShort,
    TooLong,
    OutOfRange,
    MissingField,
    WrongType,
}

/// A single rejected field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    /// Field path, e.g. `prompt` or `tokens[3]`
    pub field: String,
    pub reason: Reason,
    /// Human readable explanation
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, reason: Reason, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason,
            message: message.into(),
        }
    }
}

/// All field errors found in one request. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Wrap a single error
    pub fn single(field: impl Into<String>, reason: Reason, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError::new(field, reason, message)],
        }
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Whether `field` was rejected for `reason`
    pub fn has(&self, field: &str, reason: Reason) -> bool {
        self.errors
            .iter()
            .any(|e| e.field == field && e.reason == reason)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.errors {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Collects field errors while reading values out of a JSON object.
struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> FieldReader<'a> {
    fn new(value: &'a Value) -> Result<Self, ValidationErrors> {
        match value {
            Value::Object(object) => Ok(Self {
                object,
                errors: Vec::new(),
            }),
            other => Err(ValidationErrors::single(
                "body",
                Reason::WrongType,
                format!("expected a JSON object, got {}", json_type(other)),
            )),
        }
    }

    fn reject(&mut self, field: impl Into<String>, reason: Reason, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, reason, message));
    }

    fn missing(&mut self, name: &str) {
        self.reject(name, Reason::MissingField, "field required");
    }

    /// Mandatory string whose character count must satisfy `bound`
    fn required_string(&mut self, bound: &LengthBound) -> Option<String> {
        let name = bound.name;
        let text = match self.object.get(name) {
            None => {
                self.missing(name);
                return None;
            }
            Some(Value::String(text)) => text,
            Some(other) => {
                let message = format!("expected a string, got {}", json_type(other));
                self.reject(name, Reason::WrongType, message);
                return None;
            }
        };

        let length = text.chars().count();
        if length < bound.min {
            self.reject(
                name,
                Reason::TooShort,
                format!("must have at least {} character(s)", bound.min),
            );
            return None;
        }
        if let Some(max) = bound.max {
            if length > max {
                self.reject(
                    name,
                    Reason::TooLong,
                    format!("must have at most {} character(s)", max),
                );
                return None;
            }
        }
        Some(text.clone())
    }

    /// Mandatory list of token ids whose item count must satisfy `bound`
    fn required_tokens(&mut self, bound: &LengthBound) -> Option<Vec<u32>> {
        let name = bound.name;
        let items = match self.object.get(name) {
            None => {
                self.missing(name);
                return None;
            }
            Some(Value::Array(items)) => items,
            Some(other) => {
                let message = format!("expected a list of integers, got {}", json_type(other));
                self.reject(name, Reason::WrongType, message);
                return None;
            }
        };

        let mut valid = true;
        if items.len() < bound.min {
            self.reject(
                name,
                Reason::TooShort,
                format!("must have at least {} item(s), got {}", bound.min, items.len()),
            );
            valid = false;
        }
        if let Some(max) = bound.max {
            if items.len() > max {
                self.reject(
                    name,
                    Reason::TooLong,
                    format!("must have at most {} item(s), got {}", max, items.len()),
                );
                valid = false;
            }
        }
        if !valid {
            return None;
        }

        let mut tokens = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let field = format!("{}[{}]", name, index);
            match as_integer(item) {
                Integer::Value(id) => match u32::try_from(id) {
                    Ok(id) => tokens.push(id),
                    Err(_) => {
                        self.reject(field, Reason::OutOfRange, "token id must fit in 0..=4294967295");
                        valid = false;
                    }
                },
                Integer::Overflow => {
                    self.reject(field, Reason::OutOfRange, "token id must fit in 0..=4294967295");
                    valid = false;
                }
                Integer::NotAnInteger => {
                    let message = format!("expected an integer, got {}", json_type(item));
                    self.reject(field, Reason::WrongType, message);
                    valid = false;
                }
            }
        }
        valid.then_some(tokens)
    }

    /// Optional integer, falling back to the bound's default when absent
    fn optional_int(&mut self, bound: &Bound<i64>) -> Option<i64> {
        let name = bound.name;
        let value = match self.object.get(name) {
            None => return Some(bound.default),
            Some(value) => value,
        };
        match as_integer(value) {
            Integer::Value(v) if bound.contains(v) => Some(v),
            Integer::Value(_) | Integer::Overflow => {
                self.reject(name, Reason::OutOfRange, range_message(bound));
                None
            }
            Integer::NotAnInteger => {
                let message = format!("expected an integer, got {}", json_type(value));
                self.reject(name, Reason::WrongType, message);
                None
            }
        }
    }

    /// Optional float, falling back to the bound's default when absent
    fn optional_float(&mut self, bound: &Bound<f64>) -> Option<f64> {
        let name = bound.name;
        let value = match self.object.get(name) {
            None => return Some(bound.default),
            Some(value) => value,
        };
        match value.as_f64() {
            Some(v) if bound.contains(v) => Some(v),
            Some(_) => {
                self.reject(name, Reason::OutOfRange, range_message(bound));
                None
            }
            None => {
                let message = format!("expected a number, got {}", json_type(value));
                self.reject(name, Reason::WrongType, message);
                None
            }
        }
    }

    fn finish<T>(self, build: impl FnOnce() -> Option<T>) -> Result<T, ValidationErrors> {
        if !self.errors.is_empty() {
            return Err(ValidationErrors {
                errors: self.errors,
            });
        }
        build().ok_or_else(|| {
            ValidationErrors::single("body", Reason::WrongType, "request could not be read")
        })
    }
}

enum Integer {
    Value(i64),
    Overflow,
    NotAnInteger,
}

/// Integers may arrive as `10` or `10.0`; anything fractional is rejected.
fn as_integer(value: &Value) -> Integer {
    let Value::Number(number) = value else {
        return Integer::NotAnInteger;
    };
    if let Some(v) = number.as_i64() {
        return Integer::Value(v);
    }
    if number.is_u64() {
        return Integer::Overflow;
    }
    match number.as_f64() {
        Some(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => Integer::Value(v as i64),
        Some(v) if v.fract() == 0.0 => Integer::Overflow,
        _ => Integer::NotAnInteger,
    }
}

fn range_message<T: fmt::Display>(bound: &Bound<T>) -> String {
    format!("must be between {} and {} inclusive", bound.min, bound.max)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Text to tokenize
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeRequest {
    pub text: String,
}

impl EncodeRequest {
    pub fn from_json(value: &Value) -> Result<Self, ValidationErrors> {
        let mut reader = FieldReader::new(value)?;
        let text = reader.required_string(&bounds::ENCODE_TEXT);
        reader.finish(|| Some(Self { text: text? }))
    }
}

/// Token ids to turn back into text
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeRequest {
    pub tokens: Vec<u32>,
}

impl DecodeRequest {
    pub fn from_json(value: &Value) -> Result<Self, ValidationErrors> {
        let mut reader = FieldReader::new(value)?;
        let tokens = reader.required_tokens(&bounds::DECODE_TOKENS);
        reader.finish(|| Some(Self { tokens: tokens? }))
    }
}

/// Sampling-based continuation of a prompt
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub max_new_tokens: usize,
    pub num_return_sequences: usize,
    pub temp: f64,
    pub top_p: f64,
}

impl GenerateRequest {
    /// Request for `prompt` with every tunable at its default
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_new_tokens: bounds::MAX_NEW_TOKENS.default as usize,
            num_return_sequences: bounds::NUM_RETURN_SEQUENCES.default as usize,
            temp: bounds::TEMPERATURE.default,
            top_p: bounds::TOP_P.default,
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, ValidationErrors> {
        let mut reader = FieldReader::new(value)?;
        let prompt = reader.required_string(&bounds::PROMPT);
        let max_new_tokens = reader.optional_int(&bounds::MAX_NEW_TOKENS);
        let num_return_sequences = reader.optional_int(&bounds::NUM_RETURN_SEQUENCES);
        let temp = reader.optional_float(&bounds::TEMPERATURE);
        let top_p = reader.optional_float(&bounds::TOP_P);

        // Range checks above guarantee the integers are non-negative.
        reader.finish(|| {
            Some(Self {
                prompt: prompt?,
                max_new_tokens: max_new_tokens? as usize,
                num_return_sequences: num_return_sequences? as usize,
                temp: temp?,
                top_p: top_p?,
            })
        })
    }
}
