//! Regula runtime: vocabulary indexing, the token guide, and logits masking.
//!
//! A pattern is compiled once per (pattern, vocabulary) pair into a [`Guide`];
//! at each decoding step the generation loop masks logits with
//! `allowed_tokens(state)`, samples, and calls `advance(state, token)`.

pub mod backend;
pub mod cache;
pub mod guide;
pub mod index;
pub mod processor;
pub mod tokenizer;
pub mod vocab;

pub use backend::{regex, GeneratorAdapter, ModelBackend, RegexGenerator};
pub use cache::GuideCache;
pub use guide::{Guide, TokenGuide};
pub use index::{build_tables, StateTokenTable, TokenTransitionTable};
pub use processor::{RegexLogitsProcessor, SequenceGuide};
pub use tokenizer::{resolve_eos_token_id, TokenEncoding};
pub use vocab::{TokenKind, TokenTrie, VocabEntry, VocabIndex, Vocabulary};
