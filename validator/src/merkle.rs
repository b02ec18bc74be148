use borsh::BorshDeserialize;
use borsh_derive::BorshDeserialize;
use thiserror::Error;

use ar_gateway_types::consensus::{DATA_CHUNK_SIZE, HASH_SIZE, NOTE_SIZE};

/// Maximum size of a proven chunk, in bytes.
pub const MAX_CHUNK_SIZE: usize = DATA_CHUNK_SIZE;

/// Size of a leaf record: data hash followed by the end-offset note.
pub const LEAF_SIZE: usize = HASH_SIZE + NOTE_SIZE;

/// Size of a branch record: two child hashes followed by the boundary note.
pub const BRANCH_SIZE: usize = HASH_SIZE * 2 + NOTE_SIZE;

/// Size of a rebasing prefix: 32 zero bytes, two subtree roots, a boundary.
pub const REBASE_PREFIX_SIZE: usize = HASH_SIZE * 4;

/// Populated with data from a deserialized proof slice for an original data
/// chunk (leaf node).
#[repr(C)]
#[derive(BorshDeserialize, Debug, PartialEq, Clone)]
pub struct LeafProof {
    data_hash: [u8; HASH_SIZE],
    notepad: [u8; NOTE_SIZE - 16],
    offset: [u8; 16],
}

/// Populated with data from a deserialized proof slice for a branch node
/// (hash of a pair of child nodes).
#[repr(C)]
#[derive(BorshDeserialize, Debug, PartialEq, Clone)]
pub struct BranchProof {
    left_id: [u8; HASH_SIZE],
    right_id: [u8; HASH_SIZE],
    notepad: [u8; NOTE_SIZE - 16],
    offset: [u8; 16],
}

/// Populated with data from a deserialized rebasing prefix. The marker is 32
/// zero bytes; the note is the absolute boundary between the two subtrees.
#[repr(C)]
#[derive(BorshDeserialize, Debug, PartialEq, Clone)]
pub struct RebaseProof {
    marker: [u8; HASH_SIZE],
    left_root: [u8; HASH_SIZE],
    right_root: [u8; HASH_SIZE],
    notepad: [u8; NOTE_SIZE - 16],
    offset: [u8; 16],
}

/// Includes methods to deserialize proof records.
pub trait ProofDeserialize<T> {
    fn try_from_proof_slice(slice: &[u8]) -> Result<T, InvalidProofError>;
    fn offset(&self) -> u128;
}

impl ProofDeserialize<LeafProof> for LeafProof {
    fn try_from_proof_slice(slice: &[u8]) -> Result<Self, InvalidProofError> {
        LeafProof::try_from_slice(slice).map_err(|e| InvalidProofError::Record(e.to_string()))
    }
    fn offset(&self) -> u128 {
        u128::from_be_bytes(self.offset)
    }
}

impl ProofDeserialize<BranchProof> for BranchProof {
    fn try_from_proof_slice(slice: &[u8]) -> Result<Self, InvalidProofError> {
        BranchProof::try_from_slice(slice).map_err(|e| InvalidProofError::Record(e.to_string()))
    }
    fn offset(&self) -> u128 {
        u128::from_be_bytes(self.offset)
    }
}

impl ProofDeserialize<RebaseProof> for RebaseProof {
    fn try_from_proof_slice(slice: &[u8]) -> Result<Self, InvalidProofError> {
        RebaseProof::try_from_slice(slice).map_err(|e| InvalidProofError::Record(e.to_string()))
    }
    fn offset(&self) -> u128 {
        u128::from_be_bytes(self.offset)
    }
}

/// The validation rules a data path is held to, in ascending strictness.
///
/// Which ruleset applies is a function of where the chunk sits in the weave;
/// see [`crate::ruleset::RulesetResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ruleset {
    /// Hash equality only.
    Basic,
    /// Hash equality plus chunk border enforcement.
    StrictBorders,
    /// Borders plus the strict data split rule.
    StrictDataSplit,
    /// Borders plus the relaxed split rule; the only ruleset that accepts
    /// rebased proofs.
    OffsetRebaseSupport,
}

enum SplitRule {
    None,
    Strict,
    Relaxed,
}

impl Ruleset {
    fn check_borders(&self) -> bool {
        !matches!(self, Ruleset::Basic)
    }

    fn split_rule(&self) -> SplitRule {
        match self {
            Ruleset::Basic | Ruleset::StrictBorders => SplitRule::None,
            Ruleset::StrictDataSplit => SplitRule::Strict,
            Ruleset::OffsetRebaseSupport => SplitRule::Relaxed,
        }
    }

    fn allows_rebase(&self) -> bool {
        matches!(self, Ruleset::OffsetRebaseSupport)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidProofError {
    #[error("data path has an impossible length ({0} bytes remaining)")]
    MalformedLength(usize),
    #[error("proof record is malformed: {0}")]
    Record(String),
    #[error("branch does not hash to the expected path hash")]
    BranchHashMismatch,
    #[error("leaf does not hash to the expected path hash")]
    LeafHashMismatch,
    #[error("rebased subtree roots do not hash to the expected path hash")]
    RebaseRootMismatch,
    #[error("rebasing marker present but the ruleset does not accept rebased proofs")]
    RebaseNotAllowed,
    #[error("chunk bytes do not hash to the proven leaf data hash")]
    ChunkHashMismatch,
    #[error("chunk is {actual} bytes but the proof covers {expected}")]
    ChunkSizeMismatch { expected: u128, actual: u128 },
    #[error("chunk violates the ruleset's border rule")]
    BorderViolation,
    #[error("chunk violates the ruleset's data split rule")]
    SplitViolation,
    #[error("data size of zero leaves nothing to prove")]
    EmptyData,
}

/// The outcome of a successful data-path walk.
///
/// All offsets are byte positions within the transaction's data. For rebased
/// proofs they already include the accumulated left-bound shift of every
/// subtree entered on the way down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDataPath {
    /// First byte of the chunk, inclusive.
    pub start_offset: u128,
    /// One past the last byte of the chunk.
    pub end_offset: u128,
    pub chunk_size: u128,
    pub is_rebased: bool,
    pub rebase_depth: u32,
    /// Whether the walk only ever descended right inside the innermost
    /// subtree. `None` when no branch was taken after the last rebase.
    pub is_right_most_in_its_sub_tree: Option<bool>,
    /// The leaf's data hash, the source of truth for the chunk's bytes.
    pub chunk_data: [u8; HASH_SIZE],
}

pub fn hash_sha256(message: &[u8]) -> [u8; HASH_SIZE] {
    openssl::sha::sha256(message)
}

/// Returns a SHA-256 hash of the concatenated SHA-256 hashes of a list of
/// messages.
pub fn hash_all_sha256(messages: &[&[u8]]) -> [u8; HASH_SIZE] {
    let concat: Vec<u8> = messages.iter().flat_map(|m| hash_sha256(m)).collect();
    hash_sha256(&concat)
}

/// Walks `data_path` from `data_root` down to the leaf covering
/// `target_offset`, validating every node hash and the ruleset's border and
/// split requirements along the way.
pub fn parse_data_path(
    data_root: [u8; HASH_SIZE],
    data_size: u128,
    data_path: &[u8],
    target_offset: u128,
    ruleset: Ruleset,
) -> Result<ParsedDataPath, InvalidProofError> {
    if data_size == 0 {
        return Err(InvalidProofError::EmptyData);
    }

    let mut expected_hash = data_root;
    let mut left_bound: u128 = 0;
    let mut right_bound: u128 = data_size;
    let mut target = target_offset.min(data_size - 1);
    let mut left_bound_shift: u128 = 0;
    let mut rebase_depth: u32 = 0;
    let mut rightmost: Option<bool> = None;
    let mut rest = data_path;

    loop {
        // A 32-zero-byte prefix long enough to still hold a leaf marks a
        // rebased subtree.
        if rest.len() >= REBASE_PREFIX_SIZE + LEAF_SIZE
            && rest[..HASH_SIZE].iter().all(|b| *b == 0)
        {
            if !ruleset.allows_rebase() {
                return Err(InvalidProofError::RebaseNotAllowed);
            }
            let proof = RebaseProof::try_from_proof_slice(&rest[..REBASE_PREFIX_SIZE])?;
            let note_bytes = &rest[HASH_SIZE * 3..REBASE_PREFIX_SIZE];
            let id = hash_all_sha256(&[&proof.left_root, &proof.right_root, note_bytes]);
            if id != expected_hash {
                return Err(InvalidProofError::RebaseRootMismatch);
            }

            // Translate into the chosen subtree's local coordinates and
            // remember its absolute left edge.
            let boundary = proof.offset().clamp(left_bound + 1, right_bound);
            if target < boundary {
                expected_hash = proof.left_root;
                left_bound_shift += left_bound;
                target -= left_bound;
                right_bound = boundary - left_bound;
            } else {
                expected_hash = proof.right_root;
                left_bound_shift += boundary;
                target -= boundary;
                right_bound -= boundary;
            }
            left_bound = 0;
            rebase_depth += 1;
            rightmost = None;
            rest = &rest[REBASE_PREFIX_SIZE..];
            continue;
        }

        if rest.len() == LEAF_SIZE {
            let leaf = LeafProof::try_from_proof_slice(rest)?;
            let note_bytes = &rest[HASH_SIZE..];
            let id = hash_all_sha256(&[&leaf.data_hash, note_bytes]);
            if id != expected_hash {
                return Err(InvalidProofError::LeafHashMismatch);
            }

            // Leaf notes carry the chunk's end offset; clamp it into the
            // bounds the walk established.
            let end_offset = leaf.offset().min(right_bound).max(left_bound + 1);
            let chunk_size = end_offset - left_bound;

            check_borders(ruleset.check_borders(), end_offset, left_bound, right_bound)?;
            check_split(
                ruleset.split_rule(),
                chunk_size,
                left_bound,
                right_bound,
                end_offset,
                data_size,
                rightmost,
            )?;

            return Ok(ParsedDataPath {
                start_offset: left_bound + left_bound_shift,
                end_offset: end_offset + left_bound_shift,
                chunk_size,
                is_rebased: rebase_depth > 0,
                rebase_depth,
                is_right_most_in_its_sub_tree: rightmost,
                chunk_data: leaf.data_hash,
            });
        }

        if rest.len() >= BRANCH_SIZE + LEAF_SIZE {
            let branch = BranchProof::try_from_proof_slice(&rest[..BRANCH_SIZE])?;
            let note_bytes = &rest[HASH_SIZE * 2..BRANCH_SIZE];
            let id = hash_all_sha256(&[&branch.left_id, &branch.right_id, note_bytes]);
            if id != expected_hash {
                return Err(InvalidProofError::BranchHashMismatch);
            }

            let offset = branch.offset();
            if target < offset {
                expected_hash = branch.left_id;
                right_bound = right_bound.min(offset);
                rightmost = Some(false);
            } else {
                expected_hash = branch.right_id;
                left_bound = left_bound.max(offset);
                if rightmost.is_none() {
                    rightmost = Some(true);
                }
            }
            rest = &rest[BRANCH_SIZE..];
            continue;
        }

        return Err(InvalidProofError::MalformedLength(rest.len()));
    }
}

fn check_borders(
    enforce: bool,
    end_offset: u128,
    left_bound: u128,
    right_bound: u128,
) -> Result<(), InvalidProofError> {
    if !enforce {
        return Ok(());
    }
    let chunk = MAX_CHUNK_SIZE as u128;
    if end_offset - left_bound > chunk || right_bound - left_bound > chunk {
        return Err(InvalidProofError::BorderViolation);
    }
    Ok(())
}

fn check_split(
    rule: SplitRule,
    chunk_size: u128,
    left_bound: u128,
    right_bound: u128,
    end_offset: u128,
    data_size: u128,
    rightmost: Option<bool>,
) -> Result<(), InvalidProofError> {
    let chunk = MAX_CHUNK_SIZE as u128;
    let ok = match rule {
        SplitRule::None => true,
        SplitRule::Strict => {
            let full_and_aligned = chunk_size == chunk && left_bound % chunk == 0;
            let is_last = end_offset == data_size
                && right_bound % chunk > 0
                && left_bound <= (right_bound / chunk) * chunk;
            let is_second_to_last = left_bound % chunk == 0
                && data_size - left_bound > chunk
                && data_size - left_bound < 2 * chunk;
            full_and_aligned || is_last || is_second_to_last
        }
        SplitRule::Relaxed => {
            if chunk_size == chunk {
                left_bound % chunk == 0
            } else {
                rightmost == Some(true) || left_bound % chunk == 0
            }
        }
    };
    if ok {
        Ok(())
    } else {
        Err(InvalidProofError::SplitViolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: u128 = MAX_CHUNK_SIZE as u128;

    fn note(value: u128) -> [u8; NOTE_SIZE] {
        let mut out = [0u8; NOTE_SIZE];
        out[NOTE_SIZE - 16..].copy_from_slice(&value.to_be_bytes());
        out
    }

    fn leaf_hash(data_hash: &[u8; 32], end_offset: u128) -> [u8; 32] {
        hash_all_sha256(&[data_hash, &note(end_offset)])
    }

    fn branch_hash(left: &[u8; 32], right: &[u8; 32], offset: u128) -> [u8; 32] {
        hash_all_sha256(&[left, right, &note(offset)])
    }

    /// Single full-size chunk: root is the leaf hash itself.
    #[test]
    fn single_full_chunk_validates_under_strict_split() {
        let data_hash = hash_sha256(b"some chunk bytes");
        let root = leaf_hash(&data_hash, CHUNK);
        let mut path = Vec::new();
        path.extend_from_slice(&data_hash);
        path.extend_from_slice(&note(CHUNK));

        let parsed =
            parse_data_path(root, CHUNK, &path, CHUNK - 1, Ruleset::StrictDataSplit).unwrap();
        assert_eq!(parsed.start_offset, 0);
        assert_eq!(parsed.end_offset, CHUNK);
        assert_eq!(parsed.chunk_size, CHUNK);
        assert!(!parsed.is_rebased);
        assert_eq!(parsed.rebase_depth, 0);
        assert_eq!(parsed.chunk_data, data_hash);
    }

    /// A single 300000 byte chunk is misaligned under the strict split rule.
    #[test]
    fn strict_split_rejects_misaligned_chunk() {
        let data_hash = hash_sha256(b"some chunk bytes");
        let data_size: u128 = 300000;
        let root = leaf_hash(&data_hash, data_size);
        let mut path = Vec::new();
        path.extend_from_slice(&data_hash);
        path.extend_from_slice(&note(data_size));

        let err = parse_data_path(root, data_size, &path, 100000, Ruleset::StrictDataSplit)
            .unwrap_err();
        assert!(matches!(err, InvalidProofError::BorderViolation));
    }

    /// The same oversized chunk passes under `Basic`, which only checks
    /// hashes.
    #[test]
    fn basic_accepts_what_strict_borders_reject() {
        let data_hash = hash_sha256(b"some chunk bytes");
        let data_size: u128 = 300000;
        let root = leaf_hash(&data_hash, data_size);
        let mut path = Vec::new();
        path.extend_from_slice(&data_hash);
        path.extend_from_slice(&note(data_size));

        let parsed = parse_data_path(root, data_size, &path, 100000, Ruleset::Basic).unwrap();
        assert_eq!(parsed.start_offset, 0);
        assert_eq!(parsed.end_offset, data_size);
    }

    fn two_chunk_tree() -> ([u8; 32], [u8; 32], [u8; 32], Vec<u8>, Vec<u8>) {
        let data_size = 2 * CHUNK;
        let d0 = hash_sha256(b"chunk zero");
        let d1 = hash_sha256(b"chunk one");
        let l0 = leaf_hash(&d0, CHUNK);
        let l1 = leaf_hash(&d1, data_size);
        let root = branch_hash(&l0, &l1, CHUNK);

        let mut path0 = Vec::new();
        path0.extend_from_slice(&l0);
        path0.extend_from_slice(&l1);
        path0.extend_from_slice(&note(CHUNK));
        path0.extend_from_slice(&d0);
        path0.extend_from_slice(&note(CHUNK));

        let mut path1 = Vec::new();
        path1.extend_from_slice(&l0);
        path1.extend_from_slice(&l1);
        path1.extend_from_slice(&note(CHUNK));
        path1.extend_from_slice(&d1);
        path1.extend_from_slice(&note(data_size));

        (root, d0, d1, path0, path1)
    }

    #[test]
    fn branch_walk_descends_to_the_correct_leaf() {
        let (root, d0, d1, path0, path1) = two_chunk_tree();
        let data_size = 2 * CHUNK;

        let first =
            parse_data_path(root, data_size, &path0, 1000, Ruleset::StrictDataSplit).unwrap();
        assert_eq!(first.start_offset, 0);
        assert_eq!(first.end_offset, CHUNK);
        assert_eq!(first.chunk_data, d0);
        assert_eq!(first.is_right_most_in_its_sub_tree, Some(false));

        let second =
            parse_data_path(root, data_size, &path1, CHUNK + 1000, Ruleset::StrictDataSplit)
                .unwrap();
        assert_eq!(second.start_offset, CHUNK);
        assert_eq!(second.end_offset, 2 * CHUNK);
        assert_eq!(second.chunk_data, d1);
        assert_eq!(second.is_right_most_in_its_sub_tree, Some(true));
    }

    #[test]
    fn branch_hash_mismatch_is_rejected() {
        let (root, _, _, mut path0, _) = two_chunk_tree();
        path0[0] ^= 0xff;
        let err = parse_data_path(root, 2 * CHUNK, &path0, 0, Ruleset::Basic).unwrap_err();
        assert!(matches!(err, InvalidProofError::BranchHashMismatch));
    }

    #[test]
    fn leaf_hash_mismatch_is_rejected() {
        let (root, _, _, mut path0, _) = two_chunk_tree();
        let len = path0.len();
        path0[len - NOTE_SIZE - 1] ^= 0xff;
        let err = parse_data_path(root, 2 * CHUNK, &path0, 0, Ruleset::Basic).unwrap_err();
        assert!(matches!(err, InvalidProofError::LeafHashMismatch));
    }

    #[test]
    fn impossible_path_lengths_are_rejected() {
        let root = [1u8; 32];
        let err = parse_data_path(root, CHUNK, &[0u8; 65], 0, Ruleset::Basic).unwrap_err();
        assert!(matches!(err, InvalidProofError::MalformedLength(65)));

        let err = parse_data_path(root, CHUNK, &[0u8; 0], 0, Ruleset::Basic).unwrap_err();
        assert!(matches!(err, InvalidProofError::MalformedLength(0)));
    }

    #[test]
    fn zero_data_size_is_rejected() {
        let err = parse_data_path([0u8; 32], 0, &[0u8; 64], 0, Ruleset::Basic).unwrap_err();
        assert!(matches!(err, InvalidProofError::EmptyData));
    }

    /// Single-level rebase: the root commits to (leftRoot, rightRoot,
    /// boundary) and the walk continues inside the left subtree at local
    /// coordinates.
    #[test]
    fn rebased_proof_resolves_subtree_local_offsets() {
        let data_hash = hash_sha256(b"rebased chunk");
        let subtree_leaf = leaf_hash(&data_hash, CHUNK);
        let right_root = [7u8; 32];
        let root = hash_all_sha256(&[&subtree_leaf, &right_root, &note(CHUNK)]);

        let mut path = Vec::new();
        path.extend_from_slice(&[0u8; 32]);
        path.extend_from_slice(&subtree_leaf);
        path.extend_from_slice(&right_root);
        path.extend_from_slice(&note(CHUNK));
        path.extend_from_slice(&data_hash);
        path.extend_from_slice(&note(CHUNK));

        let parsed =
            parse_data_path(root, 2 * CHUNK, &path, 100000, Ruleset::OffsetRebaseSupport)
                .unwrap();
        assert!(parsed.is_rebased);
        assert_eq!(parsed.rebase_depth, 1);
        assert_eq!(parsed.start_offset, 0);
        assert_eq!(parsed.end_offset, CHUNK);
        assert_eq!(parsed.chunk_size, CHUNK);
    }

    /// The right subtree's offsets must be shifted by the boundary.
    #[test]
    fn rebased_right_subtree_shifts_reported_offsets() {
        let data_hash = hash_sha256(b"right subtree chunk");
        let subtree_leaf = leaf_hash(&data_hash, CHUNK);
        let left_root = [9u8; 32];
        let root = hash_all_sha256(&[&left_root, &subtree_leaf, &note(CHUNK)]);

        let mut path = Vec::new();
        path.extend_from_slice(&[0u8; 32]);
        path.extend_from_slice(&left_root);
        path.extend_from_slice(&subtree_leaf);
        path.extend_from_slice(&note(CHUNK));
        path.extend_from_slice(&data_hash);
        path.extend_from_slice(&note(CHUNK));

        let parsed = parse_data_path(
            root,
            2 * CHUNK,
            &path,
            CHUNK + 5,
            Ruleset::OffsetRebaseSupport,
        )
        .unwrap();
        assert!(parsed.is_rebased);
        assert_eq!(parsed.start_offset, CHUNK);
        assert_eq!(parsed.end_offset, 2 * CHUNK);
    }

    #[test]
    fn rebase_marker_is_rejected_outside_its_ruleset() {
        let data_hash = hash_sha256(b"rebased chunk");
        let subtree_leaf = leaf_hash(&data_hash, CHUNK);
        let right_root = [7u8; 32];
        let root = hash_all_sha256(&[&subtree_leaf, &right_root, &note(CHUNK)]);

        let mut path = Vec::new();
        path.extend_from_slice(&[0u8; 32]);
        path.extend_from_slice(&subtree_leaf);
        path.extend_from_slice(&right_root);
        path.extend_from_slice(&note(CHUNK));
        path.extend_from_slice(&data_hash);
        path.extend_from_slice(&note(CHUNK));

        let err =
            parse_data_path(root, 2 * CHUNK, &path, 100000, Ruleset::StrictDataSplit).unwrap_err();
        assert!(matches!(err, InvalidProofError::RebaseNotAllowed));
    }

    /// Two nested rebase levels accumulate both shifts.
    #[test]
    fn nested_rebases_accumulate_the_shift() {
        let data_hash = hash_sha256(b"deep chunk");
        let inner_leaf = leaf_hash(&data_hash, CHUNK);
        let inner_sibling = [3u8; 32];
        let inner_root = hash_all_sha256(&[&inner_sibling, &inner_leaf, &note(CHUNK)]);
        let outer_sibling = [4u8; 32];
        let root = hash_all_sha256(&[&outer_sibling, &inner_root, &note(2 * CHUNK)]);

        let mut path = Vec::new();
        // Outer rebase: target is in the right subtree, shift = 2*CHUNK.
        path.extend_from_slice(&[0u8; 32]);
        path.extend_from_slice(&outer_sibling);
        path.extend_from_slice(&inner_root);
        path.extend_from_slice(&note(2 * CHUNK));
        // Inner rebase: target is in the right subtree, shift = CHUNK.
        path.extend_from_slice(&[0u8; 32]);
        path.extend_from_slice(&inner_sibling);
        path.extend_from_slice(&inner_leaf);
        path.extend_from_slice(&note(CHUNK));
        // Leaf at local coordinates [0, CHUNK).
        path.extend_from_slice(&data_hash);
        path.extend_from_slice(&note(CHUNK));

        let parsed = parse_data_path(
            root,
            4 * CHUNK,
            &path,
            3 * CHUNK + 17,
            Ruleset::OffsetRebaseSupport,
        )
        .unwrap();
        assert_eq!(parsed.rebase_depth, 2);
        assert_eq!(parsed.start_offset, 3 * CHUNK);
        assert_eq!(parsed.end_offset, 4 * CHUNK);
    }

    /// Invariant: a stricter ruleset never reports boundaries the basic
    /// ruleset would not.
    #[test]
    fn stricter_rulesets_never_widen_boundaries() {
        let (root, _, _, path0, path1) = two_chunk_tree();
        let data_size = 2 * CHUNK;
        for (path, offset) in [(&path0, 10u128), (&path1, CHUNK + 10)] {
            let basic = parse_data_path(root, data_size, path, offset, Ruleset::Basic).unwrap();
            for ruleset in [Ruleset::StrictBorders, Ruleset::StrictDataSplit] {
                let strict = parse_data_path(root, data_size, path, offset, ruleset).unwrap();
                assert!(strict.start_offset >= basic.start_offset);
                assert!(strict.end_offset <= basic.end_offset);
            }
        }
    }
}
