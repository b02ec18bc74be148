//! Protocol constants the gateway must agree on with the chain's canonical
//! release. Weave-offset thresholds below were lifted from the mainnet
//! release at the corresponding fork blocks.

/// Maximum size of a single data chunk, in bytes.
pub const DATA_CHUNK_SIZE: usize = 256 * 1024;

/// Size of a SHA-256 hash, in bytes.
pub const HASH_SIZE: usize = 32;

/// Size of the big-endian offset "note" carried by Merkle proof nodes.
pub const NOTE_SIZE: usize = 32;

// The threshold was determined on the mainnet at the 2.5 fork block. The
// chunks submitted after the threshold must adhere to stricter validation
// rules.
pub const STRICT_DATA_SPLIT_THRESHOLD: u128 = 30607159107830;

// The threshold was determined on the mainnet at the 2.7 fork block. Proofs
// covering offsets at or past it may carry rebasing prefixes.
pub const MERKLE_REBASE_SUPPORT_THRESHOLD: u128 = 151066495197430;

/// Blocks deeper than this below the tip are considered safe from reorgs.
pub const MAX_FORK_DEPTH: u64 = 18;

/// Number of bytes in a bundle's big-endian item count field.
pub const BUNDLE_COUNT_SIZE: usize = 32;

/// Number of bytes in each bundle header record (32 byte size, 32 byte id).
pub const BUNDLE_ENTRY_SIZE: usize = 64;

/// No valid binary data item fits below this size (the smallest signature
/// configuration plus flags and empty tag block).
pub const MIN_BINARY_DATA_ITEM_SIZE: usize = 80;

/// Upper bound on the encoded tag block of a single data item.
pub const MAX_TAG_BYTES: usize = 4096;

/// Fixed data-item header bytes outside the tag block, at the largest
/// signature configuration (RSA 512 byte signature and owner).
pub const MAX_DATA_ITEM_HEADER_OVERHEAD: usize = 2 + 512 + 512 + 1 + 32 + 1 + 32 + 8 + 8;

/// Window fetched when classifying whether a data item is a nested bundle.
pub const BUNDLE_CLASSIFY_WINDOW: usize = MAX_TAG_BYTES + MAX_DATA_ITEM_HEADER_OVERHEAD;

/// Largest slice any streaming parse path may request at once.
pub const MAX_PARSE_WINDOW: usize = 10 * 1024;

/// Identifying tag values for nested ANS-104 bundles. Both must match.
pub const BUNDLE_FORMAT_TAG: &str = "Bundle-Format";
pub const BUNDLE_FORMAT_VALUE: &str = "binary";
pub const BUNDLE_VERSION_TAG: &str = "Bundle-Version";
pub const BUNDLE_VERSION_VALUE: &str = "2.0.0";
