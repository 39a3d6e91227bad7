//! Loading vocabularies from Hugging Face `tokenizer.json` files.
//!
//! Vocabulary strings are stored in a tokenizer-specific encoding. The
//! automaton consumes real bytes, so each token is mapped back:
//!
//! | Encoding | Stored as | Decoded by |
//! |----------|-----------|------------|
//! | `ByteLevel` | GPT-2 remapped chars (`Ġ` = 0x20) | inverse byte table |
//! | `SentencePiece` | `▁` for spaces, `<0xHH>` byte fallback | replace / parse |
//! | `Raw` | plain text | UTF-8 bytes |

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use serde_json::Value;
use tokenizers::Tokenizer as HfTokenizer;
use tracing::{debug, warn};

use regula_core::{RegulaError, Result, TokenId};

use crate::vocab::Vocabulary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEncoding {
    ByteLevel,
    SentencePiece { byte_fallback: bool },
    Raw,
}

impl TokenEncoding {
    /// Detect the encoding from a parsed `tokenizer.json`.
    pub fn detect(tokenizer_json: &Value) -> Self {
        let pre_tokenizer = tokenizer_json.get("pre_tokenizer").unwrap_or(&Value::Null);
        let decoder = tokenizer_json.get("decoder").unwrap_or(&Value::Null);
        let pre_types = node_types(pre_tokenizer, "pretokenizers");
        let decoder_types = node_types(decoder, "decoders");

        if pre_types.contains(&"ByteLevel") || decoder_types.contains(&"ByteLevel") {
            return TokenEncoding::ByteLevel;
        }

        let byte_fallback = tokenizer_json
            .pointer("/model/byte_fallback")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || decoder_types.contains(&"ByteFallback");
        let metaspace = pre_types.contains(&"Metaspace")
            || decoder_types.contains(&"Metaspace")
            || decoder_types.contains(&"Replace");
        if byte_fallback || metaspace {
            TokenEncoding::SentencePiece { byte_fallback }
        } else {
            TokenEncoding::Raw
        }
    }

    /// Map a vocabulary string back to the bytes it stands for.
    pub fn decode(&self, token: &str) -> Vec<u8> {
        match self {
            TokenEncoding::ByteLevel => {
                let table = char_to_byte();
                let bytes: Option<Vec<u8>> = token.chars().map(|c| table.get(&c).copied()).collect();
                // Tokens outside the byte alphabet are literal added tokens.
                bytes.unwrap_or_else(|| token.as_bytes().to_vec())
            }
            TokenEncoding::SentencePiece { byte_fallback } => {
                if *byte_fallback {
                    if let Some(byte) = parse_byte_token(token) {
                        return vec![byte];
                    }
                }
                token.replace('\u{2581}', " ").into_bytes()
            }
            TokenEncoding::Raw => token.as_bytes().to_vec(),
        }
    }
}

/// Collect `type` names of a (possibly `Sequence`-wrapped) pipeline node.
fn node_types<'a>(node: &'a Value, key: &str) -> Vec<&'a str> {
    let Some(kind) = node.get("type").and_then(Value::as_str) else {
        return Vec::new();
    };
    if kind == "Sequence" {
        node.get(key)
            .and_then(Value::as_array)
            .map(|nodes| nodes.iter().flat_map(|n| node_types(n, key)).collect())
            .unwrap_or_default()
    } else {
        vec![kind]
    }
}

/// Parse a byte fallback token such as `<0x0A>`.
fn parse_byte_token(token: &str) -> Option<u8> {
    let hex = token.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

/// GPT-2 byte-level table: printable ASCII and most of Latin-1 map to
/// themselves, the remaining bytes map to U+0100 onwards.
fn byte_to_char() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut n = 0u32;
    for byte in 0..=255u8 {
        let code = match byte {
            0x21..=0x7E | 0xA1..=0xAC | 0xAE..=0xFF => byte as u32,
            _ => {
                n += 1;
                0xFF + n
            }
        };
        table[byte as usize] = char::from_u32(code).unwrap_or('\0');
    }
    table
}

fn char_to_byte() -> &'static HashMap<char, u8> {
    static TABLE: OnceLock<HashMap<char, u8>> = OnceLock::new();
    TABLE.get_or_init(|| {
        byte_to_char()
            .iter()
            .enumerate()
            .map(|(byte, &c)| (c, byte as u8))
            .collect()
    })
}

/// Resolve the end-of-sequence id the way model repositories declare it:
/// `tokenizer_config.json` first, then well-known token strings.
pub fn resolve_eos_token_id(tokenizer: &HfTokenizer, tokenizer_path: &Path) -> Option<TokenId> {
    let config_eos = tokenizer_path.parent().and_then(|dir| {
        let text = std::fs::read_to_string(dir.join("tokenizer_config.json")).ok()?;
        let value: Value = serde_json::from_str(&text).ok()?;
        if let Some(id) = value.get("eos_token_id").and_then(Value::as_u64) {
            return Some(id as TokenId);
        }
        // eos_token can be a string or {"content": "..."} object
        let eos = value.get("eos_token").and_then(|v| {
            v.as_str()
                .or_else(|| v.get("content").and_then(Value::as_str))
                .map(String::from)
        })?;
        tokenizer.token_to_id(&eos)
    });

    config_eos
        .or_else(|| tokenizer.token_to_id("</s>"))
        .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
        .or_else(|| tokenizer.token_to_id("<|im_end|>"))
        .or_else(|| tokenizer.token_to_id("<|eot_id|>"))
        .or_else(|| tokenizer.token_to_id("<eos>"))
}

impl Vocabulary {
    /// Build a vocabulary from a loaded tokenizer.
    ///
    /// Special added tokens other than `eos_token_id` become never-legal
    /// control tokens; ids with no token at all are treated the same way.
    pub fn from_tokenizer(
        tokenizer: &HfTokenizer,
        encoding: TokenEncoding,
        eos_token_id: TokenId,
    ) -> Result<Self> {
        let vocab_size = tokenizer
            .get_vocab(true)
            .values()
            .max()
            .map_or(0, |&max| max as usize + 1);

        let added: HashMap<TokenId, (String, bool)> = tokenizer
            .get_added_tokens_decoder()
            .iter()
            .map(|(&id, token)| (id, (token.content.clone(), token.special)))
            .collect();

        let vocab = Vocabulary::from_decode_fn(vocab_size, eos_token_id, |id| {
            if let Some((content, special)) = added.get(&id) {
                return (!special).then(|| content.as_bytes().to_vec());
            }
            tokenizer.id_to_token(id).map(|token| encoding.decode(&token))
        })?;
        debug!(
            "Vocabulary loaded: {} tokens ({} added), encoding {:?}, eos {}",
            vocab.len(),
            added.len(),
            encoding,
            eos_token_id
        );
        Ok(vocab)
    }

    /// Load `tokenizer.json`, detecting its encoding. The end-of-sequence id
    /// is `eos_override` when given, otherwise resolved from the files next to
    /// the tokenizer.
    pub fn from_tokenizer_file(path: &Path, eos_override: Option<TokenId>) -> Result<Self> {
        let tokenizer = HfTokenizer::from_file(path).map_err(|e| {
            RegulaError::Tokenizer(format!("failed to load {}: {e}", path.display()))
        })?;
        let json: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let encoding = TokenEncoding::detect(&json);
        let eos_token_id = eos_override
            .or_else(|| resolve_eos_token_id(&tokenizer, path))
            .ok_or_else(|| {
                warn!("No end-of-sequence token found for {}", path.display());
                RegulaError::Tokenizer(format!(
                    "could not determine the end-of-sequence token of {}",
                    path.display()
                ))
            })?;
        Self::from_tokenizer(&tokenizer, encoding, eos_token_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_byte_level_round_trips_every_byte() {
        let table = byte_to_char();
        for byte in 0..=255u8 {
            let s = table[byte as usize].to_string();
            assert_eq!(TokenEncoding::ByteLevel.decode(&s), vec![byte]);
        }
        assert_eq!(TokenEncoding::ByteLevel.decode("Ġhello"), b" hello");
        assert_eq!(TokenEncoding::ByteLevel.decode("Ċ"), b"\n");
    }

    #[test]
    fn test_sentencepiece_byte_fallback() {
        let sp = TokenEncoding::SentencePiece { byte_fallback: true };
        assert_eq!(sp.decode("<0xE2>"), vec![0xE2]);
        assert_eq!(sp.decode("▁the"), b" the");
        assert_eq!(sp.decode("<0xZZ>"), b"<0xZZ>");
        let no_fallback = TokenEncoding::SentencePiece { byte_fallback: false };
        assert_eq!(no_fallback.decode("<0x41>"), b"<0x41>");
    }

    #[test]
    fn test_detect_encoding() {
        let gpt2 = json!({"pre_tokenizer": {"type": "ByteLevel"}, "decoder": {"type": "ByteLevel"}});
        assert_eq!(TokenEncoding::detect(&gpt2), TokenEncoding::ByteLevel);

        let llama = json!({
            "model": {"type": "BPE", "byte_fallback": true},
            "decoder": {"type": "Sequence", "decoders": [
                {"type": "Replace"}, {"type": "ByteFallback"}, {"type": "Fuse"}
            ]}
        });
        assert_eq!(
            TokenEncoding::detect(&llama),
            TokenEncoding::SentencePiece { byte_fallback: true }
        );

        let qwen = json!({"pre_tokenizer": {"type": "Sequence", "pretokenizers": [
            {"type": "Split"}, {"type": "ByteLevel"}
        ]}});
        assert_eq!(TokenEncoding::detect(&qwen), TokenEncoding::ByteLevel);

        assert_eq!(TokenEncoding::detect(&json!({})), TokenEncoding::Raw);
    }
}
