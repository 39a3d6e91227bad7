use std::fmt;

use thiserror::Error;

use crate::types::{StateId, TokenId};

/// Which construction bound a pattern exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexityBound {
    PatternLength,
    Repetition,
    NfaStates,
    DfaStates,
}

impl fmt::Display for ComplexityBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComplexityBound::PatternLength => "pattern length",
            ComplexityBound::Repetition => "repetition count",
            ComplexityBound::NfaStates => "NFA state count",
            ComplexityBound::DfaStates => "DFA state count",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum RegulaError {
    #[error("Invalid pattern: {0}")]
    Pattern(String),

    #[error("Pattern too complex: {bound} exceeds the limit of {limit}")]
    PatternTooComplex { bound: ComplexityBound, limit: usize },

    #[error("Unsatisfiable pattern: {0}")]
    UnsatisfiablePattern(String),

    #[error("Invalid transition: token {token_id} is not allowed from state {state}")]
    InvalidTransition { state: StateId, token_id: TokenId },

    #[error("Invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RegulaError {
    pub fn too_complex(bound: ComplexityBound, limit: usize) -> Self {
        RegulaError::PatternTooComplex { bound, limit }
    }
}

pub type Result<T> = std::result::Result<T, RegulaError>;
