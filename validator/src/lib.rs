//! Merkle data-path parsing and validation for retrieved chunks.
//!
//! A data path is the proof connecting a single chunk to a transaction's
//! `data_root`. Peers are untrusted, so every chunk the gateway serves is
//! walked through [`merkle::parse_data_path`] under the ruleset the weave
//! offset demands before it is cached or returned.

pub mod merkle;
pub mod ruleset;

pub use merkle::{
    hash_all_sha256, hash_sha256, InvalidProofError, ParsedDataPath, Ruleset, MAX_CHUNK_SIZE,
};
pub use ruleset::{extract_note, extract_root, DataPathRequest, RulesetResolver};
