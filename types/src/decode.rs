//! Decoding base64url text into fixed-size values.
//!
//! Wire ids and hashes are length-checked once here, so the parsing crates
//! can hold array-backed types without re-validating sizes at every use.

use thiserror::Error;

use crate::{H256, H384};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashParseError {
    #[error("invalid base64url text: {0}")]
    Encoding(String),
    #[error("decoded to {actual} bytes where {expected} were required")]
    Length { expected: usize, actual: usize },
}

fn decode_exact<const N: usize>(text: &str) -> Result<[u8; N], HashParseError> {
    let bytes =
        base64_url::decode(text).map_err(|e| HashParseError::Encoding(e.to_string()))?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| HashParseError::Length { expected: N, actual })
}

/// Conversion from the wire's base64url text form.
pub trait FromBase64Url: Sized {
    fn from_base64_url(text: &str) -> Result<Self, HashParseError>;
}

impl FromBase64Url for [u8; 32] {
    fn from_base64_url(text: &str) -> Result<Self, HashParseError> {
        decode_exact(text)
    }
}

impl FromBase64Url for H256 {
    fn from_base64_url(text: &str) -> Result<Self, HashParseError> {
        decode_exact::<32>(text).map(H256)
    }
}

impl FromBase64Url for H384 {
    fn from_base64_url(text: &str) -> Result<Self, HashParseError> {
        decode_exact::<48>(text).map(H384)
    }
}
