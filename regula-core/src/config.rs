use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Limits applied while compiling a pattern into an automaton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Maximum pattern length in bytes.
    pub max_pattern_len: usize,
    /// Largest `m` or `n` accepted in a bounded repetition `{m,n}`.
    pub max_repetition: u32,
    /// Maximum number of NFA states produced by Thompson construction.
    pub max_nfa_states: usize,
    /// Maximum number of DFA states produced by subset construction.
    pub max_dfa_states: usize,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            max_pattern_len: 8192,
            max_repetition: 1000,
            max_nfa_states: 1 << 20,
            max_dfa_states: 100_000,
        }
    }
}

/// Options for the state-to-token indexing pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Walk state groups on the rayon thread pool.
    pub parallel: bool,
    /// Leave empty-text tokens out of every allowed set instead of treating
    /// them as no-op self transitions.
    pub skip_empty_tokens: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            skip_empty_tokens: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached guides. `None` keeps every guide for the
    /// lifetime of the cache.
    pub capacity: Option<usize>,
}

/// Top-level configuration, typically loaded from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub compile: CompileConfig,
    pub index: IndexConfig,
    pub cache: CacheConfig,
}

impl Config {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config =
            Config::from_json_str(r#"{"compile": {"max_repetition": 50}, "cache": {"capacity": 8}}"#)
                .unwrap();
        assert_eq!(config.compile.max_repetition, 50);
        assert_eq!(config.compile.max_dfa_states, CompileConfig::default().max_dfa_states);
        assert!(config.index.parallel);
        assert_eq!(config.cache.capacity, Some(8));
    }

    #[test]
    fn test_invalid_config_is_json_error() {
        let err = Config::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, crate::RegulaError::Json(_)));
    }
}
