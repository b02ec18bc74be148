//! JSON wire types exchanged with the trusted node and with peer gateways.
//!
//! Only the fields the gateway actually serves or validates are kept. Numeric
//! fields the node encodes as strings use the [`dec_string`](crate::dec_string)
//! adapter so they survive a serialize round trip unchanged.

use serde_derive::{Deserialize, Serialize};

use crate::{dec_string, Base64, Base64List, H256, H384};

//==============================================================================
// Network / node info
//------------------------------------------------------------------------------
/// Response body of `GET /info` on a node or peer gateway.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkInfoJson {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub release: u64,
    pub height: u64,
    pub blocks: u64,
    #[serde(default)]
    pub peers: u64,
}

//==============================================================================
// Block header
//------------------------------------------------------------------------------
/// Proof-of-access payload attached to block headers. Stripped before the
/// gateway caches a header, it is only dead weight for data retrieval.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PoaJson {
    #[serde(default)]
    pub option: String,
    #[serde(default)]
    pub tx_path: Base64,
    #[serde(default)]
    pub data_path: Base64,
    #[serde(default)]
    pub chunk: Base64,
}

/// The subset of an Arweave block header the gateway caches and serves.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockJson {
    pub indep_hash: H384,
    pub height: u64,
    pub previous_block: H384,
    pub timestamp: u64,
    pub txs: Base64List,
    #[serde(default, with = "optional_hash")]
    pub tx_root: Option<H256>,
    #[serde(with = "dec_string")]
    pub weave_size: u128,
    #[serde(with = "dec_string")]
    pub block_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poa: Option<PoaJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poa2: Option<PoaJson>,
}

impl BlockJson {
    /// Drops the proof-of-access payloads so cached headers stay small.
    pub fn strip_poa(&mut self) {
        self.poa = None;
        self.poa2 = None;
    }

    /// Cheap structural check applied before a header is cached.
    pub fn is_sane(&self) -> bool {
        !self.indep_hash.is_zero() && self.timestamp > 0
    }
}

/// Nodes serve `tx_root` as an empty string on txless blocks; treat that
/// form as absent in both directions.
mod optional_hash {
    use serde::de::Error as _;
    use serde::{Deserializer, Serializer};

    use crate::decode::FromBase64Url;
    use crate::H256;

    pub fn serialize<S: Serializer>(
        value: &Option<H256>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(hash) => serializer.collect_str(&base64_url::encode(hash.as_bytes())),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<H256>, D::Error> {
        let text: Option<String> = serde::Deserialize::deserialize(deserializer)?;
        match text.as_deref() {
            None | Some("") => Ok(None),
            Some(text) => H256::from_base64_url(text)
                .map(Some)
                .map_err(D::Error::custom),
        }
    }
}

//==============================================================================
// Transaction
//------------------------------------------------------------------------------
/// A single name/value tag on a transaction, both fields base64url encoded.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TagJson {
    pub name: Base64,
    pub value: Base64,
}

/// An Arweave transaction header as served by `GET /tx/{id}`.
///
/// The inline `data` field is stripped before caching. Large payloads are
/// never inlined by the node anyway; chunked retrieval is the source of truth.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransactionJson {
    pub format: u64,
    pub id: Base64,
    pub last_tx: Base64,
    pub owner: Base64,
    #[serde(default)]
    pub tags: Vec<TagJson>,
    #[serde(default)]
    pub target: Base64,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub data: Base64,
    #[serde(with = "dec_string")]
    pub data_size: u64,
    #[serde(default)]
    pub data_root: Base64,
    #[serde(default)]
    pub reward: String,
    pub signature: Base64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_type: Option<u16>,
}

impl TransactionJson {
    pub fn strip_data(&mut self) {
        self.data = Base64::default();
    }

    /// Cheap structural check applied before a transaction is cached.
    pub fn is_sane(&self) -> bool {
        self.id.len() == 32 && !self.signature.is_empty()
    }
}

/// Response body of `GET /tx/{id}/offset`: the absolute weave offset of the
/// transaction's last byte and its data size.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TxOffsetJson {
    #[serde(with = "dec_string")]
    pub size: u64,
    #[serde(with = "dec_string")]
    pub offset: u128,
}

//==============================================================================
// Chunks
//------------------------------------------------------------------------------
/// Response body of `GET /chunk/{offset}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChunkJson {
    pub tx_path: Base64,
    pub data_path: Base64,
    pub chunk: Base64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packing: Option<String>,
}

/// Request body of `POST /chunk`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChunkPostJson {
    pub data_root: Base64,
    #[serde(with = "dec_string")]
    pub data_size: u64,
    pub data_path: Base64,
    #[serde(with = "dec_string")]
    pub offset: u128,
    pub chunk: Base64,
}
