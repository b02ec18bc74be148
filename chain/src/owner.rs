//! Owner recovery for ECDSA-signed transactions.
//!
//! Nodes may serve such transactions with an empty `owner` field since the
//! public key is recoverable from the signature. The signed message is the
//! protocol deep hash of the transaction's signature payload.

use openssl::sha;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};

use ar_gateway_types::json::TransactionJson;
use ar_gateway_types::Base64;

use crate::error::ChainError;

/// A node in the deep-hash tree: raw bytes or a list of nodes.
pub enum DeepHashChunk<'a> {
    Blob(&'a [u8]),
    List(Vec<DeepHashChunk<'a>>),
}

fn sha384(data: &[u8]) -> [u8; 48] {
    sha::sha384(data)
}

/// The chain's SHA-384 deep hash: blobs are tagged with their length, lists
/// fold left over their tagged accumulator.
pub fn deep_hash(chunk: &DeepHashChunk<'_>) -> [u8; 48] {
    match chunk {
        DeepHashChunk::Blob(data) => {
            let tag = format!("blob{}", data.len());
            let mut acc = Vec::with_capacity(96);
            acc.extend_from_slice(&sha384(tag.as_bytes()));
            acc.extend_from_slice(&sha384(data));
            sha384(&acc)
        }
        DeepHashChunk::List(items) => {
            let tag = format!("list{}", items.len());
            let mut acc = sha384(tag.as_bytes());
            for item in items {
                let mut pair = Vec::with_capacity(96);
                pair.extend_from_slice(&acc);
                pair.extend_from_slice(&deep_hash(item));
                acc = sha384(&pair);
            }
            acc
        }
    }
}

/// The 32 byte digest an ECDSA signature covers: SHA-256 of the deep hash
/// of the format-2 signature payload.
pub fn signature_digest(tx: &TransactionJson) -> [u8; 32] {
    let data_size = tx.data_size.to_string();
    let tags = tx
        .tags
        .iter()
        .map(|tag| {
            DeepHashChunk::List(vec![
                DeepHashChunk::Blob(tag.name.as_slice()),
                DeepHashChunk::Blob(tag.value.as_slice()),
            ])
        })
        .collect();

    let payload = DeepHashChunk::List(vec![
        DeepHashChunk::Blob(b"2"),
        DeepHashChunk::Blob(tx.owner.as_slice()),
        DeepHashChunk::Blob(tx.target.as_slice()),
        DeepHashChunk::Blob(tx.quantity.as_bytes()),
        DeepHashChunk::Blob(tx.reward.as_bytes()),
        DeepHashChunk::Blob(tx.last_tx.as_slice()),
        DeepHashChunk::List(tags),
        DeepHashChunk::Blob(data_size.as_bytes()),
        DeepHashChunk::Blob(tx.data_root.as_slice()),
    ]);

    sha::sha256(&deep_hash(&payload))
}

/// Recovers the compressed secp256k1 public key from a 65 byte recoverable
/// signature and returns it as the transaction's owner.
pub fn recover_owner(tx: &TransactionJson) -> Result<Base64, ChainError> {
    let sig_bytes = tx.signature.as_slice();
    if sig_bytes.len() != 65 {
        return Err(ChainError::MalformedResponse(format!(
            "expected a 65 byte recoverable signature, got {}",
            sig_bytes.len()
        )));
    }

    let raw_id = sig_bytes[64];
    let normalized = if raw_id >= 27 { raw_id - 27 } else { raw_id };
    let recovery_id = RecoveryId::from_i32(normalized as i32)
        .map_err(|e| ChainError::MalformedResponse(format!("bad recovery id: {e}")))?;
    let signature = RecoverableSignature::from_compact(&sig_bytes[..64], recovery_id)
        .map_err(|e| ChainError::MalformedResponse(format!("bad signature: {e}")))?;

    let digest = signature_digest(tx);
    let secp = Secp256k1::new();
    let public_key = secp
        .recover_ecdsa(&Message::from_digest(digest), &signature)
        .map_err(|e| ChainError::MalformedResponse(format!("key recovery failed: {e}")))?;

    Ok(Base64(public_key.serialize().to_vec()))
}
