//! Legal ranges and defaults for every tunable request parameter.
//!
//! Validation, defaults and the documentation of the HTTP surface all read
//! from these constants; nothing else in the crate hard-codes a limit.

/// Inclusive numeric range with a default, for one tunable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound<T> {
    /// Request field name the bound applies to
    pub name: &'static str,
    /// Value used when the field is omitted
    pub default: T,
    /// Smallest accepted value
    pub min: T,
    /// Largest accepted value
    pub max: T,
}

impl<T: PartialOrd + Copy> Bound<T> {
    /// Whether `value` lies inside `[min, max]`
    pub fn contains(&self, value: T) -> bool {
        self.min <= value && value <= self.max
    }

    /// `min <= default <= max`
    pub fn is_consistent(&self) -> bool {
        self.min <= self.default && self.default <= self.max
    }
}

/// Length constraint on a string (in characters) or a list (in items).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthBound {
    /// Request field name the bound applies to
    pub name: &'static str,
    /// Shortest accepted length
    pub min: usize,
    /// Longest accepted length, unbounded when `None`
    pub max: Option<usize>,
}

/// Model identifier used when none is configured.
pub const DEFAULT_MODEL_ID: &str = "gpt2";

/// Token id used to pad finished sequences inside a generation batch.
pub const PAD_TOKEN_ID: u32 = 50256;

pub const MAX_NEW_TOKENS: Bound<i64> = Bound {
    name: "max_new_tokens",
    default: 50,
    min: 1,
    max: 1024,
};

pub const NUM_RETURN_SEQUENCES: Bound<i64> = Bound {
    name: "num_return_sequences",
    default: 5,
    min: 0,
    max: 10,
};

pub const TEMPERATURE: Bound<f64> = Bound {
    name: "temp",
    default: 0.7,
    min: 0.0,
    max: 1.0,
};

pub const TOP_P: Bound<f64> = Bound {
    name: "top_p",
    default: 0.9,
    min: 0.0,
    max: 1.0,
};

pub const ENCODE_TEXT: LengthBound = LengthBound {
    name: "text",
    min: 1,
    max: None,
};

pub const PROMPT: LengthBound = LengthBound {
    name: "prompt",
    min: 1,
    max: None,
};

pub const DECODE_TOKENS: LengthBound = LengthBound {
    name: "tokens",
    min: 1,
    max: Some(1024),
};
