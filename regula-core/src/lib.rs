//! Regula core types, configuration, and error definitions.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CacheConfig, CompileConfig, Config, IndexConfig};
pub use error::{ComplexityBound, RegulaError, Result};
pub use types::*;
