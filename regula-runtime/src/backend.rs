//! Regex-constrained generators per model backend.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use regula_core::{Config, RegulaError, Result};

use crate::cache::GuideCache;
use crate::guide::{Guide, TokenGuide};
use crate::processor::RegexLogitsProcessor;
use crate::vocab::VocabIndex;

/// The model families a constrained generator can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelBackend {
    Transformers,
    TransformersVision,
    LlamaCpp,
    Mlx,
    Vllm,
    OpenAi,
}

impl ModelBackend {
    pub const ALL: [ModelBackend; 6] = [
        ModelBackend::Transformers,
        ModelBackend::TransformersVision,
        ModelBackend::LlamaCpp,
        ModelBackend::Mlx,
        ModelBackend::Vllm,
        ModelBackend::OpenAi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModelBackend::Transformers => "transformers",
            ModelBackend::TransformersVision => "transformers-vision",
            ModelBackend::LlamaCpp => "llama-cpp",
            ModelBackend::Mlx => "mlx",
            ModelBackend::Vllm => "vllm",
            ModelBackend::OpenAi => "openai",
        }
    }

    /// Whether the backend exposes next-token logits to the caller.
    pub fn supports_logits_processing(&self) -> bool {
        !matches!(self, ModelBackend::OpenAi)
    }

    pub fn is_multimodal(&self) -> bool {
        matches!(self, ModelBackend::TransformersVision)
    }
}

impl fmt::Display for ModelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelBackend {
    type Err = RegulaError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|backend| backend.name() == normalized)
            .ok_or_else(|| RegulaError::InvalidArgument(format!("unknown model backend: {s}")))
    }
}

/// How the generator feeds model inputs to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorAdapter {
    Text,
    Vision,
}

/// A regex-constrained generator: the backend it targets plus the logits
/// processor that enforces the pattern.
pub struct RegexGenerator {
    backend: ModelBackend,
    adapter: GeneratorAdapter,
    guide: Arc<Guide>,
    processor: RegexLogitsProcessor,
}

impl RegexGenerator {
    fn new(backend: ModelBackend, adapter: GeneratorAdapter, guide: Arc<Guide>) -> Self {
        let shared: Arc<dyn TokenGuide> = guide.clone();
        Self {
            backend,
            adapter,
            guide,
            processor: RegexLogitsProcessor::new(shared),
        }
    }

    pub fn backend(&self) -> ModelBackend {
        self.backend
    }

    pub fn adapter(&self) -> GeneratorAdapter {
        self.adapter
    }

    pub fn is_multimodal(&self) -> bool {
        self.adapter == GeneratorAdapter::Vision
    }

    pub fn guide(&self) -> &Arc<Guide> {
        &self.guide
    }

    pub fn processor(&self) -> &RegexLogitsProcessor {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut RegexLogitsProcessor {
        &mut self.processor
    }

    pub fn into_processor(self) -> RegexLogitsProcessor {
        self.processor
    }
}

/// Build a generator whose output must match `pattern`.
///
/// The guide is taken from `cache`, so generators for the same pattern and
/// vocabulary share one compiled index.
pub fn regex(
    backend: ModelBackend,
    pattern: &str,
    vocab: &VocabIndex,
    cache: &GuideCache,
    config: &Config,
) -> Result<RegexGenerator> {
    let adapter = match backend {
        ModelBackend::Transformers
        | ModelBackend::LlamaCpp
        | ModelBackend::Mlx
        | ModelBackend::Vllm => GeneratorAdapter::Text,
        ModelBackend::TransformersVision => GeneratorAdapter::Vision,
        ModelBackend::OpenAi => {
            return Err(RegulaError::UnsupportedBackend(
                "cannot use regex-structured generation with an OpenAI model \
                 due to the limitations of the OpenAI API"
                    .into(),
            ));
        }
    };
    let guide = cache.get_or_build(pattern, vocab, config)?;
    info!("Regex generator ready for {} ({:?} adapter)", backend, adapter);
    Ok(RegexGenerator::new(backend, adapter, guide))
}
