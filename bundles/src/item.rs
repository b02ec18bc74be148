//! Binary data-item header parsing.
//!
//! Layout: `sigType(2, LE) ‖ signature ‖ owner ‖ targetFlag(1)[‖ target(32)]
//! ‖ anchorFlag(1)[‖ anchor(32)] ‖ tagsCount(8, LE) ‖ tagsByteLen(8, LE) ‖
//! tagsBytes`. Signature and owner lengths are fixed by the signature type.
//! The data payload begins immediately after the tag block.

use thiserror::Error;

use ar_gateway_types::consensus::MAX_TAG_BYTES;

use crate::tags::{parse_tags, Tag, TagError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("unknown signature type {0}")]
    UnknownSignatureType(u16),
    #[error("data item header is truncated")]
    Truncated,
    #[error("data item header is malformed: {0}")]
    Malformed(&'static str),
    #[error("tag block of {0} bytes exceeds the protocol maximum")]
    TagsTooLarge(u64),
    #[error(transparent)]
    Tags(#[from] TagError),
}

/// The signing schemes a data item may carry, with their fixed signature and
/// owner (public key) lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    /// Arweave native RSA-PSS.
    Arweave,
    Ed25519,
    /// secp256k1 as used by Ethereum wallets.
    EthereumSecp256k1,
    Solana,
}

impl SignatureType {
    pub fn from_u16(value: u16) -> Result<Self, ItemError> {
        match value {
            1 => Ok(SignatureType::Arweave),
            2 => Ok(SignatureType::Ed25519),
            3 => Ok(SignatureType::EthereumSecp256k1),
            4 => Ok(SignatureType::Solana),
            other => Err(ItemError::UnknownSignatureType(other)),
        }
    }

    pub fn signature_len(&self) -> usize {
        match self {
            SignatureType::Arweave => 512,
            SignatureType::Ed25519 => 64,
            SignatureType::EthereumSecp256k1 => 65,
            SignatureType::Solana => 64,
        }
    }

    pub fn owner_len(&self) -> usize {
        match self {
            SignatureType::Arweave => 512,
            SignatureType::Ed25519 => 32,
            SignatureType::EthereumSecp256k1 => 20,
            SignatureType::Solana => 32,
        }
    }
}

/// The pieces of a data-item header the resolver needs: where the payload
/// starts and what the tags say.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItemHeader {
    pub signature_type: SignatureType,
    /// Number of header bytes before the data payload.
    pub header_size: usize,
    pub tags: Vec<Tag>,
}

/// Parses a data-item header from the front of `bytes`.
///
/// `bytes` is a bounded window, not the whole item; the parse fails with
/// [`ItemError::Truncated`] when the window ends before the tag block does.
pub fn parse_item_header(bytes: &[u8]) -> Result<ParsedItemHeader, ItemError> {
    let mut pos = 0usize;

    let sig_type_raw = u16::from_le_bytes(
        bytes
            .get(pos..pos + 2)
            .ok_or(ItemError::Truncated)?
            .try_into()
            .unwrap(),
    );
    pos += 2;
    let signature_type = SignatureType::from_u16(sig_type_raw)?;

    pos += signature_type.signature_len();
    pos += signature_type.owner_len();
    if bytes.len() < pos {
        return Err(ItemError::Truncated);
    }

    // Optional target and anchor, each gated by a single flag byte.
    for _ in 0..2 {
        let flag = *bytes.get(pos).ok_or(ItemError::Truncated)?;
        pos += 1;
        match flag {
            0 => {}
            1 => pos += 32,
            _ => return Err(ItemError::Malformed("presence flag must be 0 or 1")),
        }
    }
    if bytes.len() < pos {
        return Err(ItemError::Truncated);
    }

    let tags_count = u64::from_le_bytes(
        bytes
            .get(pos..pos + 8)
            .ok_or(ItemError::Truncated)?
            .try_into()
            .unwrap(),
    );
    pos += 8;
    let tags_byte_len = u64::from_le_bytes(
        bytes
            .get(pos..pos + 8)
            .ok_or(ItemError::Truncated)?
            .try_into()
            .unwrap(),
    );
    pos += 8;

    if tags_byte_len > MAX_TAG_BYTES as u64 {
        return Err(ItemError::TagsTooLarge(tags_byte_len));
    }

    let tag_bytes = bytes
        .get(pos..pos + tags_byte_len as usize)
        .ok_or(ItemError::Truncated)?;
    let tags = parse_tags(tag_bytes, tags_count)?;
    pos += tags_byte_len as usize;

    Ok(ParsedItemHeader {
        signature_type,
        header_size: pos,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal Ed25519 item header with the given tag block.
    pub(crate) fn ed25519_header(tag_bytes: &[u8], tags_count: u64) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&[0xaa; 64]); // signature
        out.extend_from_slice(&[0xbb; 32]); // owner
        out.push(0); // no target
        out.push(0); // no anchor
        out.extend_from_slice(&tags_count.to_le_bytes());
        out.extend_from_slice(&(tag_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(tag_bytes);
        out
    }

    #[test]
    fn parses_an_untagged_ed25519_header() {
        let header = ed25519_header(&[], 0);
        let parsed = parse_item_header(&header).unwrap();
        assert_eq!(parsed.signature_type, SignatureType::Ed25519);
        // 2 + 64 + 32 + 1 + 1 + 8 + 8
        assert_eq!(parsed.header_size, 116);
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn target_and_anchor_extend_the_header() {
        let mut out = Vec::new();
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&[0xaa; 64]);
        out.extend_from_slice(&[0xbb; 32]);
        out.push(1);
        out.extend_from_slice(&[0xcc; 32]); // target
        out.push(1);
        out.extend_from_slice(&[0xdd; 32]); // anchor
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());

        let parsed = parse_item_header(&out).unwrap();
        assert_eq!(parsed.header_size, 116 + 64);
    }

    #[test]
    fn unknown_signature_type_is_reported() {
        let mut header = ed25519_header(&[], 0);
        header[0] = 99;
        header[1] = 0;
        assert_eq!(
            parse_item_header(&header).unwrap_err(),
            ItemError::UnknownSignatureType(99)
        );
    }

    #[test]
    fn truncated_window_is_reported() {
        let header = ed25519_header(&[], 0);
        assert_eq!(
            parse_item_header(&header[..50]).unwrap_err(),
            ItemError::Truncated
        );
    }

    #[test]
    fn bad_presence_flag_is_malformed() {
        let mut header = ed25519_header(&[], 0);
        header[2 + 64 + 32] = 7;
        assert!(matches!(
            parse_item_header(&header).unwrap_err(),
            ItemError::Malformed(_)
        ));
    }

    #[test]
    fn oversized_tag_block_is_rejected() {
        let mut out = Vec::new();
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&[0xaa; 64]);
        out.extend_from_slice(&[0xbb; 32]);
        out.push(0);
        out.push(0);
        out.extend_from_slice(&1u64.to_le_bytes());
        out.extend_from_slice(&(MAX_TAG_BYTES as u64 + 1).to_le_bytes());
        assert!(matches!(
            parse_item_header(&out).unwrap_err(),
            ItemError::TagsTooLarge(_)
        ));
    }
}
