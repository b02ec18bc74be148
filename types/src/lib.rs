//! Shared primitives for the gateway crates.
//!
//! Chain data crosses the wire in two shapes: fixed-size hashes and
//! variable-length byte blobs, both rendered as base64url text in JSON.
//! The types here pin that encoding down once, so the parsing crates work
//! on bytes and only touch text at the boundary.

use fixed_hash::construct_fixed_hash;
use serde::de::Error as _;
use serde::{Deserializer, Serializer};
use serde_derive::{Deserialize, Serialize};
use uint::construct_uint;

/// Protocol constants shared by the validator, bundle, and chain crates
pub mod consensus;
/// Decoding of base64url text into fixed-size values
pub mod decode;
/// JSON wire types exchanged with the trusted node and peer gateways
pub mod json;

use decode::FromBase64Url;

construct_uint! {
    /// 256-bit unsigned integer, wide enough for the big-endian size and
    /// offset words in Merkle notes and bundle item records.
    pub struct U256(4);
}

impl U256 {
    /// Reads a big-endian word of up to 32 bytes.
    pub fn from_be_slice(bytes: &[u8]) -> Self {
        U256::from_big_endian(bytes)
    }
}

construct_fixed_hash! {
    /// 32 byte hash: SHA-256 outputs, data roots, transaction ids.
    pub struct H256(32);
}

construct_fixed_hash! {
    /// 48 byte hash: block independent hashes.
    pub struct H384(48);
}

// Hashes serialize as base64url strings, never as byte arrays.
macro_rules! impl_base64url_text {
    ($hash:ident) => {
        impl serde::Serialize for $hash {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&base64_url::encode(self.as_bytes()))
            }
        }

        impl<'de> serde::Deserialize<'de> for $hash {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text: String = serde::Deserialize::deserialize(deserializer)?;
                $hash::from_base64_url(&text).map_err(D::Error::custom)
            }
        }
    };
}

impl_base64url_text!(H256);
impl_base64url_text!(H384);

/// The node serves several integer fields as decimal strings.
/// `#[serde(with = "dec_string")]` keeps them numeric in memory and text on
/// the wire.
pub mod dec_string {
    use serde::de::Error as _;
    use serde::{Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Display,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr,
        T::Err: Display,
    {
        let raw: String = serde::Deserialize::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// A blob of bytes that crosses the wire as base64url text: ids, owners,
/// signatures, data paths, chunk payloads.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Base64(pub Vec<u8>);

impl Base64 {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Base64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&base64_url::encode(&self.0))
    }
}

impl std::str::FromStr for Base64 {
    type Err = decode::HashParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        base64_url::decode(text)
            .map(Base64)
            .map_err(|e| decode::HashParseError::Encoding(e.to_string()))
    }
}

impl serde::Serialize for Base64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Base64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text: String = serde::Deserialize::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// A list of base64url blobs, e.g. the tx ids in a block header.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Base64List(pub Vec<Base64>);
