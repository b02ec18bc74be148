//! Locates a data item inside a possibly nested bundle without ever
//! materializing the bundle.
//!
//! All byte offsets are absolute positions within the *root* bundle's
//! payload, which is also the only fetch key handed to the [`RegionSource`].
//! Nested bundles are just sub-regions of the root.

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, warn};

use ar_gateway_types::consensus::{
    BUNDLE_CLASSIFY_WINDOW, BUNDLE_COUNT_SIZE, BUNDLE_ENTRY_SIZE, MAX_PARSE_WINDOW,
    MIN_BINARY_DATA_ITEM_SIZE,
};
use ar_gateway_types::{Base64, U256};

use crate::item::{parse_item_header, ItemError};
use crate::tags;

/// Windowed byte access to a bundle region. Implementations may return fewer
/// bytes than requested when the read crosses the end of the region.
#[async_trait]
pub trait RegionSource: Send + Sync {
    async fn read(&self, bundle_id: &Base64, offset: u128, length: usize) -> Result<Bytes>;
    async fn size(&self, bundle_id: &Base64) -> Result<u128>;
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to parse the requested data item: {0}")]
    Parse(#[from] ItemError),
    #[error(transparent)]
    Read(eyre::Report),
}

/// One 64 byte record from a bundle header: a big-endian declared size and
/// the item's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleItemRecord {
    pub size: u128,
    pub id: Vec<u8>,
}

/// Where a data item lives, in absolute bytes within the root bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItemLocation {
    /// First byte of the item (its header).
    pub item_offset: u128,
    /// First byte of the item's data payload.
    pub data_offset: u128,
    pub item_size: u128,
    pub data_size: u128,
    pub content_type: Option<String>,
}

/// Searches `root_bundle_id` for `target_item_id`, recursing into nested
/// bundles. `Ok(None)` means the id is not reachable from this bundle.
pub async fn resolve_item_offset<S: RegionSource + ?Sized>(
    source: &S,
    target_item_id: &Base64,
    root_bundle_id: &Base64,
) -> Result<Option<DataItemLocation>, BundleError> {
    let root_size = source
        .size(root_bundle_id)
        .await
        .map_err(BundleError::Read)?;

    let mut visited: HashSet<Vec<u8>> = HashSet::new();
    visited.insert(root_bundle_id.0.clone());

    search_region(
        source,
        root_bundle_id,
        0,
        root_size,
        target_item_id.as_slice(),
        &mut visited,
    )
    .await
}

/// Reads the `count` header records of the bundle region starting at
/// `region_offset`, in bounded windows. `None` when the region is too short
/// to hold them.
async fn read_records<S: RegionSource + ?Sized>(
    source: &S,
    root: &Base64,
    region_offset: u128,
    count: u64,
) -> Result<Option<Vec<BundleItemRecord>>, BundleError> {
    let mut records = Vec::with_capacity(count as usize);
    let mut pos = region_offset + BUNDLE_COUNT_SIZE as u128;
    let mut remaining = count;

    while remaining > 0 {
        let batch = remaining.min((MAX_PARSE_WINDOW / BUNDLE_ENTRY_SIZE) as u64);
        let want = batch as usize * BUNDLE_ENTRY_SIZE;
        let bytes = source
            .read(root, pos, want)
            .await
            .map_err(BundleError::Read)?;
        if bytes.len() < want {
            return Ok(None);
        }
        for entry in bytes.chunks_exact(BUNDLE_ENTRY_SIZE) {
            let size = U256::from_be_slice(&entry[..32]);
            if size.bits() > 127 {
                return Ok(None);
            }
            records.push(BundleItemRecord {
                size: size.as_u128(),
                id: entry[32..].to_vec(),
            });
        }
        pos += want as u128;
        remaining -= batch;
    }

    Ok(Some(records))
}

fn search_region<'a, S: RegionSource + ?Sized>(
    source: &'a S,
    root: &'a Base64,
    region_offset: u128,
    region_size: u128,
    target: &'a [u8],
    visited: &'a mut HashSet<Vec<u8>>,
) -> BoxFuture<'a, Result<Option<DataItemLocation>, BundleError>> {
    async move {
        if region_size < BUNDLE_COUNT_SIZE as u128 {
            return Ok(None);
        }

        let count_bytes = source
            .read(root, region_offset, BUNDLE_COUNT_SIZE)
            .await
            .map_err(BundleError::Read)?;
        if count_bytes.len() < BUNDLE_COUNT_SIZE {
            return Ok(None);
        }
        let count = U256::from_be_slice(&count_bytes);
        if count.is_zero() {
            return Ok(None);
        }
        // More records than the region can hold means this is not a bundle.
        if count.bits() > 32 || count > U256::from(region_size / BUNDLE_ENTRY_SIZE as u128) {
            return Ok(None);
        }
        let count = count.as_u64();

        let records = match read_records(source, root, region_offset, count).await? {
            Some(records) => records,
            None => return Ok(None),
        };

        let header_len = BUNDLE_COUNT_SIZE as u128 + count as u128 * BUNDLE_ENTRY_SIZE as u128;
        let declared: u128 = records.iter().map(|r| r.size).sum();
        if header_len + declared > region_size {
            return Ok(None);
        }

        // First pass: the target may be a direct member of this bundle.
        let header_base = region_offset + header_len;
        let mut cursor = header_base;
        for record in &records {
            if record.id == target {
                return locate_target(source, root, cursor, record.size)
                    .await
                    .map(Some);
            }
            cursor += record.size;
        }

        // Second pass: recurse into members that identify as nested bundles.
        let mut cursor = header_base;
        for record in &records {
            let item_offset = cursor;
            cursor += record.size;

            if record.size < MIN_BINARY_DATA_ITEM_SIZE as u128 {
                continue;
            }
            if visited.contains(&record.id) {
                debug!(
                    id = %base64_url::encode(&record.id),
                    "bundle already visited, breaking cycle"
                );
                continue;
            }

            let window = BUNDLE_CLASSIFY_WINDOW.min(record.size as usize);
            let head = source
                .read(root, item_offset, window)
                .await
                .map_err(BundleError::Read)?;
            let header = match parse_item_header(&head) {
                Ok(header) => header,
                Err(ItemError::UnknownSignatureType(sig_type)) => {
                    warn!(sig_type, "unknown signature type, treating item as opaque");
                    continue;
                }
                Err(_) => continue,
            };
            if !tags::is_bundle(&header.tags) {
                continue;
            }
            if header.header_size as u128 > record.size {
                continue;
            }

            visited.insert(record.id.clone());
            let payload_offset = item_offset + header.header_size as u128;
            let payload_size = record.size - header.header_size as u128;
            if let Some(location) =
                search_region(source, root, payload_offset, payload_size, target, visited).await?
            {
                return Ok(Some(location));
            }
        }

        Ok(None)
    }
    .boxed()
}

/// Parses the matched item's header to convert its record into exact data
/// payload offsets. Unlike classification, failures here are fatal for the
/// lookup.
async fn locate_target<S: RegionSource + ?Sized>(
    source: &S,
    root: &Base64,
    item_offset: u128,
    item_size: u128,
) -> Result<DataItemLocation, BundleError> {
    let window = BUNDLE_CLASSIFY_WINDOW.min(item_size as usize);
    let head = source
        .read(root, item_offset, window)
        .await
        .map_err(BundleError::Read)?;
    let header = parse_item_header(&head)?;
    if header.header_size as u128 > item_size {
        return Err(BundleError::Parse(ItemError::Truncated));
    }

    Ok(DataItemLocation {
        item_offset,
        data_offset: item_offset + header.header_size as u128,
        item_size,
        data_size: item_size - header.header_size as u128,
        content_type: tags::content_type(&header.tags),
    })
}
