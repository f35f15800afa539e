//! Minimal Solidity ABI support for the handful of calls the sale flow makes.
//!
//! Only the shapes we actually emit are supported: static 32-byte words
//! (`address`, `uint256`, `bool`) plus a single dynamic `bytes32[]` kind.

use sha3::{Digest, Keccak256};

use crate::errors::{Result, SaleError};
use crate::types::{Address, H256};

const WORD: usize = 32;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// First four bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(u128),
    Bytes32Array(Vec<H256>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::Bytes32Array(_))
    }

    fn head_word(&self) -> [u8; WORD] {
        match self {
            Token::Address(addr) => {
                let mut word = [0u8; WORD];
                word[12..].copy_from_slice(addr.as_bytes());
                word
            }
            Token::Uint(n) => uint_word(*n),
            // Dynamic tokens get an offset word, written by `encode`.
            Token::Bytes32Array(_) => [0u8; WORD],
        }
    }
}

fn uint_word(n: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&n.to_be_bytes());
    word
}

/// ABI-encode `tokens` as a tuple (head/tail layout).
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
            if let Token::Bytes32Array(items) = token {
                tail.extend_from_slice(&uint_word(items.len() as u128));
                for item in items {
                    tail.extend_from_slice(item.as_bytes());
                }
            }
        } else {
            head.extend_from_slice(&token.head_word());
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Selector followed by the encoded arguments.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode(tokens));
    data
}

// ─────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────

/// Splits return data into 32-byte words, requiring at least `min_words`.
pub fn words(data: &[u8], min_words: usize) -> Result<Vec<[u8; WORD]>> {
    if data.len() < min_words * WORD {
        return Err(SaleError::Abi(format!(
            "expected at least {min_words} words, got {} bytes",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(WORD)
        .map(|chunk| {
            let mut word = [0u8; WORD];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

pub fn decode_u128(word: &[u8; WORD]) -> Result<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(SaleError::Abi("uint256 value does not fit in 128 bits".into()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

pub fn decode_u64(word: &[u8; WORD]) -> Result<u64> {
    let value = decode_u128(word)?;
    u64::try_from(value).map_err(|_| SaleError::Abi(format!("{value} does not fit in 64 bits")))
}

pub fn decode_bool(word: &[u8; WORD]) -> Result<bool> {
    match decode_u128(word)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(SaleError::Abi(format!("invalid bool word {other}"))),
    }
}
