//! Streaming ANS-104 bundle parsing.
//!
//! A bundle packs many signed data items into one transaction payload. The
//! gateway never materializes a bundle; it reads small windows of bytes
//! through a [`RegionSource`] and computes exact byte offsets for the item a
//! client asked for, recursing into nested bundles when the tags say there is
//! one.

pub mod item;
pub mod resolver;
pub mod tags;

pub use item::{parse_item_header, ItemError, ParsedItemHeader, SignatureType};
pub use resolver::{
    resolve_item_offset, BundleError, BundleItemRecord, DataItemLocation, RegionSource,
};
pub use tags::{parse_tags, Tag};
