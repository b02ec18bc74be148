//! Chooses which Merkle [`Ruleset`] applies to a chunk based on where it
//! sits in the weave, and exposes helpers for pulling fields out of raw
//! paths.

use ar_gateway_types::consensus::{
    HASH_SIZE, MERKLE_REBASE_SUPPORT_THRESHOLD, NOTE_SIZE, STRICT_DATA_SPLIT_THRESHOLD,
};
use ar_gateway_types::U256;

use crate::merkle::{
    self, hash_all_sha256, InvalidProofError, ParsedDataPath, Ruleset, BRANCH_SIZE, LEAF_SIZE,
};

/// Arguments for a single data-path parse.
#[derive(Debug, Clone)]
pub struct DataPathRequest<'a> {
    pub data_root: [u8; HASH_SIZE],
    pub data_size: u128,
    pub data_path: &'a [u8],
    /// Byte offset within the transaction's data.
    pub offset: u128,
    /// Explicit ruleset; resolved from the weave offset when `None`.
    pub ruleset: Option<Ruleset>,
}

/// Maps absolute weave offsets to the validation ruleset in force there.
///
/// The default thresholds are the mainnet fork constants from
/// [`ar_gateway_types::consensus`]; deployments tracking another chain can
/// pin the values they observe in block headers.
#[derive(Debug, Clone, Copy)]
pub struct RulesetResolver {
    strict_data_split_threshold: u128,
    rebase_support_threshold: u128,
}

impl Default for RulesetResolver {
    fn default() -> Self {
        RulesetResolver {
            strict_data_split_threshold: STRICT_DATA_SPLIT_THRESHOLD,
            rebase_support_threshold: MERKLE_REBASE_SUPPORT_THRESHOLD,
        }
    }
}

impl RulesetResolver {
    pub fn new(strict_data_split_threshold: u128, rebase_support_threshold: u128) -> Self {
        RulesetResolver {
            strict_data_split_threshold,
            rebase_support_threshold,
        }
    }

    pub fn ruleset_for_offset(&self, weave_offset: u128) -> Ruleset {
        if weave_offset >= self.rebase_support_threshold {
            Ruleset::OffsetRebaseSupport
        } else if weave_offset >= self.strict_data_split_threshold {
            Ruleset::StrictDataSplit
        } else {
            Ruleset::Basic
        }
    }

    /// Parses a data path, resolving the ruleset from `weave_offset` unless
    /// the request pins one explicitly.
    pub fn parse_data_path(
        &self,
        weave_offset: u128,
        request: DataPathRequest<'_>,
    ) -> Result<ParsedDataPath, InvalidProofError> {
        let ruleset = request
            .ruleset
            .unwrap_or_else(|| self.ruleset_for_offset(weave_offset));
        merkle::parse_data_path(
            request.data_root,
            request.data_size,
            request.data_path,
            request.offset,
            ruleset,
        )
    }
}

/// Returns the big-endian note carried by the path's final 32 bytes.
pub fn extract_note(data_path: &[u8]) -> Result<U256, InvalidProofError> {
    if data_path.len() < NOTE_SIZE {
        return Err(InvalidProofError::MalformedLength(data_path.len()));
    }
    Ok(U256::from_be_slice(&data_path[data_path.len() - NOTE_SIZE..]))
}

/// Recomputes the root hash committed to by the path's first node. The node
/// kind is identified by length: exactly one leaf record, or at least one
/// branch record.
pub fn extract_root(data_path: &[u8]) -> Result<[u8; HASH_SIZE], InvalidProofError> {
    if data_path.len() == LEAF_SIZE {
        let (data_hash, note) = data_path.split_at(HASH_SIZE);
        Ok(hash_all_sha256(&[data_hash, note]))
    } else if data_path.len() >= BRANCH_SIZE {
        let left = &data_path[..HASH_SIZE];
        let right = &data_path[HASH_SIZE..HASH_SIZE * 2];
        let note = &data_path[HASH_SIZE * 2..BRANCH_SIZE];
        Ok(hash_all_sha256(&[left, right, note]))
    } else {
        Err(InvalidProofError::MalformedLength(data_path.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::hash_sha256;

    #[test]
    fn ruleset_selection_follows_the_fork_thresholds() {
        let resolver = RulesetResolver::new(1000, 5000);
        assert_eq!(resolver.ruleset_for_offset(0), Ruleset::Basic);
        assert_eq!(resolver.ruleset_for_offset(999), Ruleset::Basic);
        assert_eq!(resolver.ruleset_for_offset(1000), Ruleset::StrictDataSplit);
        assert_eq!(resolver.ruleset_for_offset(4999), Ruleset::StrictDataSplit);
        assert_eq!(
            resolver.ruleset_for_offset(5000),
            Ruleset::OffsetRebaseSupport
        );
    }

    #[test]
    fn default_resolver_uses_mainnet_constants() {
        let resolver = RulesetResolver::default();
        assert_eq!(
            resolver.ruleset_for_offset(STRICT_DATA_SPLIT_THRESHOLD - 1),
            Ruleset::Basic
        );
        assert_eq!(
            resolver.ruleset_for_offset(MERKLE_REBASE_SUPPORT_THRESHOLD),
            Ruleset::OffsetRebaseSupport
        );
    }

    #[test]
    fn extract_note_reads_the_final_big_endian_word() {
        let mut path = vec![0u8; 64];
        path[62] = 0x01;
        path[63] = 0x02;
        assert_eq!(extract_note(&path).unwrap(), U256::from(0x0102u64));
        assert!(extract_note(&[0u8; 16]).is_err());
    }

    /// Invariant: extracting the root of a bare leaf path round-trips to the
    /// leaf hash.
    #[test]
    fn extract_root_round_trips_a_leaf() {
        let data_hash = hash_sha256(b"chunk");
        let mut note = [0u8; NOTE_SIZE];
        note[NOTE_SIZE - 8..].copy_from_slice(&262144u64.to_be_bytes());

        let mut path = Vec::new();
        path.extend_from_slice(&data_hash);
        path.extend_from_slice(&note);

        let root = extract_root(&path).unwrap();
        assert_eq!(root, hash_all_sha256(&[&data_hash, &note]));
    }

    #[test]
    fn parse_selects_ruleset_by_weave_offset() {
        // A misaligned single chunk passes under Basic (below the strict
        // threshold) and fails at an offset past it.
        let data_hash = hash_sha256(b"tail chunk");
        let data_size: u128 = 300000;
        let mut note = [0u8; NOTE_SIZE];
        note[NOTE_SIZE - 16..].copy_from_slice(&data_size.to_be_bytes());
        let root = hash_all_sha256(&[&data_hash, &note]);
        let mut path = Vec::new();
        path.extend_from_slice(&data_hash);
        path.extend_from_slice(&note);

        let resolver = RulesetResolver::new(1_000_000, u128::MAX);
        let request = DataPathRequest {
            data_root: root,
            data_size,
            data_path: &path,
            offset: 100,
            ruleset: None,
        };
        assert!(resolver.parse_data_path(0, request.clone()).is_ok());
        assert!(resolver.parse_data_path(2_000_000, request).is_err());
    }
}
