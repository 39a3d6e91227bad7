//! Vocabulary tables and the byte trie used for token lookahead.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use regula_core::{RegulaError, Result, TokenId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Ordinary token; its bytes are consumed by the automaton.
    Text,
    /// The end-of-sequence token. Tracked by id, never decoded.
    EndOfSequence,
    /// Control token (padding, BOS, chat markers). Never legal.
    Special,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VocabEntry {
    pub kind: TokenKind,
    pub bytes: Vec<u8>,
}

impl VocabEntry {
    pub fn text(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: TokenKind::Text,
            bytes: bytes.into(),
        }
    }

    pub fn special() -> Self {
        Self {
            kind: TokenKind::Special,
            bytes: Vec::new(),
        }
    }

    pub fn end_of_sequence() -> Self {
        Self {
            kind: TokenKind::EndOfSequence,
            bytes: Vec::new(),
        }
    }
}

/// A model vocabulary: token id -> decoded bytes, with one end-of-sequence id.
///
/// Token ids are dense: entry `i` describes token `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    entries: Vec<VocabEntry>,
    eos_token_id: TokenId,
    fingerprint: u64,
}

impl Vocabulary {
    /// Build from entries indexed by token id. Exactly one entry must be the
    /// end-of-sequence token.
    pub fn from_entries(entries: Vec<VocabEntry>) -> Result<Self> {
        let mut eos = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == TokenKind::EndOfSequence)
            .map(|(id, _)| id as TokenId);
        let eos_token_id = eos.next().ok_or_else(|| {
            RegulaError::InvalidVocabulary("no end-of-sequence token".into())
        })?;
        if let Some(other) = eos.next() {
            return Err(RegulaError::InvalidVocabulary(format!(
                "multiple end-of-sequence tokens ({eos_token_id} and {other})"
            )));
        }

        let mut hasher = DefaultHasher::new();
        eos_token_id.hash(&mut hasher);
        entries.hash(&mut hasher);
        Ok(Self {
            entries,
            eos_token_id,
            fingerprint: hasher.finish(),
        })
    }

    /// Every token is text except `eos_token_id`, whose bytes are ignored.
    pub fn new(eos_token_id: TokenId, tokens: Vec<Vec<u8>>) -> Result<Self> {
        let vocab_size = tokens.len();
        Self::from_decode_fn(vocab_size, eos_token_id, |id| {
            Some(tokens[id as usize].clone())
        })
    }

    /// Convenience constructor from string tokens.
    pub fn from_strs(eos_token_id: TokenId, tokens: &[&str]) -> Result<Self> {
        Self::new(
            eos_token_id,
            tokens.iter().map(|t| t.as_bytes().to_vec()).collect(),
        )
    }

    /// Build from a decode function. `decode_fn` returns the bytes of a
    /// token, or `None` for control tokens that must never be emitted.
    pub fn from_decode_fn<F>(vocab_size: usize, eos_token_id: TokenId, decode_fn: F) -> Result<Self>
    where
        F: Fn(TokenId) -> Option<Vec<u8>>,
    {
        if eos_token_id as usize >= vocab_size {
            return Err(RegulaError::InvalidVocabulary(format!(
                "end-of-sequence id {eos_token_id} is outside a vocabulary of {vocab_size} tokens"
            )));
        }
        let entries = (0..vocab_size as TokenId)
            .map(|id| {
                if id == eos_token_id {
                    VocabEntry::end_of_sequence()
                } else {
                    match decode_fn(id) {
                        Some(bytes) => VocabEntry::text(bytes),
                        None => VocabEntry::special(),
                    }
                }
            })
            .collect();
        Self::from_entries(entries)
    }

    /// Build from `(token id, bytes)` pairs in any order. Ids must be unique
    /// and cover `0..N` without gaps.
    pub fn from_pairs<I>(eos_token_id: TokenId, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (TokenId, Vec<u8>)>,
    {
        let mut slots: Vec<Option<Vec<u8>>> = Vec::new();
        for (id, bytes) in pairs {
            let idx = id as usize;
            if idx >= slots.len() {
                slots.resize(idx + 1, None);
            }
            if slots[idx].replace(bytes).is_some() {
                return Err(RegulaError::InvalidVocabulary(format!(
                    "token id {id} appears more than once"
                )));
            }
        }
        if let Some(missing) = slots.iter().position(Option::is_none) {
            return Err(RegulaError::InvalidVocabulary(format!(
                "token ids are not contiguous: {missing} is missing"
            )));
        }
        let tokens = slots.into_iter().flatten().collect();
        Self::new(eos_token_id, tokens)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn eos_token_id(&self) -> TokenId {
        self.eos_token_id
    }

    pub fn entry(&self, token_id: TokenId) -> Option<&VocabEntry> {
        self.entries.get(token_id as usize)
    }

    /// Decoded bytes of a token; empty for special tokens and unknown ids.
    pub fn token_bytes(&self, token_id: TokenId) -> &[u8] {
        self.entry(token_id)
            .map(|e| e.bytes.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (TokenId, &VocabEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(id, entry)| (id as TokenId, entry))
    }

    /// Deterministic hash of the whole table, used as the tokenizer identity.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Concatenate the bytes of a token sequence, skipping the end-of-sequence
    /// token.
    pub fn decode(&self, token_ids: &[TokenId]) -> Vec<u8> {
        token_ids
            .iter()
            .flat_map(|&id| self.token_bytes(id).iter().copied())
            .collect()
    }
}

/// Arena trie over token bytes. Tokens with identical bytes share a node.
#[derive(Debug, Clone, Default)]
pub struct TokenTrie {
    nodes: Vec<TrieNode>,
}

#[derive(Debug, Clone, Default)]
struct TrieNode {
    /// Sorted by byte.
    children: Vec<(u8, u32)>,
    tokens: Vec<TokenId>,
}

impl TokenTrie {
    pub const ROOT: u32 = 0;

    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
        }
    }

    pub fn insert(&mut self, bytes: &[u8], token_id: TokenId) {
        let mut node = Self::ROOT;
        for &byte in bytes {
            let children = &self.nodes[node as usize].children;
            node = match children.binary_search_by_key(&byte, |&(b, _)| b) {
                Ok(pos) => children[pos].1,
                Err(pos) => {
                    let child = self.nodes.len() as u32;
                    self.nodes.push(TrieNode::default());
                    self.nodes[node as usize].children.insert(pos, (byte, child));
                    child
                }
            };
        }
        self.nodes[node as usize].tokens.push(token_id);
    }

    pub fn children(&self, node: u32) -> &[(u8, u32)] {
        &self.nodes[node as usize].children
    }

    /// Tokens whose bytes end exactly at `node`.
    pub fn tokens(&self, node: u32) -> &[TokenId] {
        &self.nodes[node as usize].tokens
    }

    pub fn find(&self, bytes: &[u8]) -> Option<u32> {
        bytes.iter().try_fold(Self::ROOT, |node, &byte| {
            let children = self.children(node);
            children
                .binary_search_by_key(&byte, |&(b, _)| b)
                .ok()
                .map(|pos| children[pos].1)
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// A vocabulary prepared for indexing against automata.
#[derive(Debug, Clone)]
pub struct VocabIndex {
    vocab: Arc<Vocabulary>,
    trie: TokenTrie,
    empty_tokens: Vec<TokenId>,
    partial_utf8_tokens: usize,
}

impl VocabIndex {
    pub fn new(vocab: Arc<Vocabulary>) -> Self {
        let mut trie = TokenTrie::new();
        let mut empty_tokens = Vec::new();
        let mut partial_utf8_tokens = 0;

        for (id, entry) in vocab.iter() {
            if entry.kind != TokenKind::Text {
                continue;
            }
            if entry.bytes.is_empty() {
                empty_tokens.push(id);
                continue;
            }
            if std::str::from_utf8(&entry.bytes).is_err() {
                partial_utf8_tokens += 1;
            }
            trie.insert(&entry.bytes, id);
        }

        Self {
            vocab,
            trie,
            empty_tokens,
            partial_utf8_tokens,
        }
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    pub fn trie(&self) -> &TokenTrie {
        &self.trie
    }

    pub fn eos_token_id(&self) -> TokenId {
        self.vocab.eos_token_id()
    }

    pub fn len(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }

    /// Text tokens that decode to no bytes at all.
    pub fn empty_tokens(&self) -> &[TokenId] {
        &self.empty_tokens
    }

    /// Text tokens whose bytes are not valid UTF-8 on their own, e.g. byte
    /// fallback tokens holding part of a multi-byte character.
    pub fn partial_utf8_tokens(&self) -> usize {
        self.partial_utf8_tokens
    }
}

impl From<Vocabulary> for VocabIndex {
    fn from(vocab: Vocabulary) -> Self {
        Self::new(Arc::new(vocab))
    }
}
