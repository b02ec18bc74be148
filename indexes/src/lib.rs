//! Contains the indexes (cached chain data) that facilitate operations in
//! `ar_gateway`.
//!
//! Today that is a single index: the coarse block↔offset interval map used to
//! narrow the block-height search range for an absolute weave offset.

pub mod block_offset_index;

pub use block_offset_index::{
    BlockOffsetIndex, BlockOffsetInterval, Initialized, OffsetMapError, SearchBounds,
    Uninitialized,
};
