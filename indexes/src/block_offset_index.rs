use chrono::{DateTime, FixedOffset};
use serde_derive::{Deserialize, Serialize};
use std::io::Read;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A single `(offset, blockHeight)` interval boundary in the coarse map.
///
/// The interval *starting* at `offset` was first written by the block at
/// `block_height`; it extends to the next entry's `offset`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockOffsetInterval {
    pub offset: u128,
    pub block_height: u64,
}

/// On-disk JSON shape of the block↔offset map.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOffsetMapJson {
    pub version: String,
    pub generated_at: DateTime<FixedOffset>,
    pub current_height: u64,
    pub current_weave_size: u128,
    pub interval_bytes: u64,
    pub intervals: Vec<BlockOffsetInterval>,
}

/// Inclusive block-height search window for an absolute weave offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchBounds {
    pub low_height: u64,
    pub high_height: u64,
}

#[derive(Debug, Error)]
pub enum OffsetMapError {
    #[error("failed to parse block offset map: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("block offset map must contain at least 2 intervals, got {0}")]
    TooFewIntervals(usize),
    #[error("block offset map {field} is not strictly increasing at entry {index}")]
    NonMonotonic { field: &'static str, index: usize },
}

/// Use a Type State pattern for BlockOffsetIndex with two states,
/// Uninitialized and Initialized
#[derive(Debug, Default, Clone)]
pub struct Uninitialized;

#[derive(Debug, Clone)]
pub struct Initialized;

#[derive(Debug, Clone)]
pub struct BlockOffsetIndex<Stage = Uninitialized> {
    intervals: Arc<[BlockOffsetInterval]>,
    version: String,
    generated_at: Option<DateTime<FixedOffset>>,
    current_weave_size: u128,
    interval_bytes: u64,
    stage: PhantomData<Stage>,
}

impl BlockOffsetIndex {
    pub fn new() -> Self {
        BlockOffsetIndex {
            intervals: Arc::new([]),
            version: String::new(),
            generated_at: None,
            current_weave_size: 0,
            interval_bytes: 0,
            stage: PhantomData,
        }
    }
}

impl Default for BlockOffsetIndex<Uninitialized> {
    fn default() -> Self {
        BlockOffsetIndex::new()
    }
}

//==============================================================================
// Uninitialized State
//------------------------------------------------------------------------------

impl BlockOffsetIndex<Uninitialized> {
    /// Parses and validates a JSON map, producing the searchable index.
    pub fn init_from_json(self, json: &str) -> Result<BlockOffsetIndex<Initialized>, OffsetMapError> {
        let map: BlockOffsetMapJson = serde_json::from_str(json)?;
        Self::init_from_map(map)
    }

    pub fn init_from_reader<R: Read>(
        self,
        reader: R,
    ) -> Result<BlockOffsetIndex<Initialized>, OffsetMapError> {
        let map: BlockOffsetMapJson = serde_json::from_reader(reader)?;
        Self::init_from_map(map)
    }

    fn init_from_map(
        map: BlockOffsetMapJson,
    ) -> Result<BlockOffsetIndex<Initialized>, OffsetMapError> {
        if map.intervals.len() < 2 {
            return Err(OffsetMapError::TooFewIntervals(map.intervals.len()));
        }

        // Both fields must be strictly increasing for binary search to be
        // meaningful.
        for (i, pair) in map.intervals.windows(2).enumerate() {
            if pair[1].offset <= pair[0].offset {
                return Err(OffsetMapError::NonMonotonic {
                    field: "offset",
                    index: i + 1,
                });
            }
            if pair[1].block_height <= pair[0].block_height {
                return Err(OffsetMapError::NonMonotonic {
                    field: "blockHeight",
                    index: i + 1,
                });
            }
        }

        debug!(
            intervals = map.intervals.len(),
            version = %map.version,
            "loaded block offset map"
        );

        Ok(BlockOffsetIndex {
            intervals: map.intervals.into(),
            version: map.version,
            generated_at: Some(map.generated_at),
            current_weave_size: map.current_weave_size,
            interval_bytes: map.interval_bytes,
            stage: PhantomData,
        })
    }
}

//==============================================================================
// Initialized State
//------------------------------------------------------------------------------

impl BlockOffsetIndex<Initialized> {
    pub fn num_intervals(&self) -> usize {
        self.intervals.len()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn generated_at(&self) -> Option<DateTime<FixedOffset>> {
        self.generated_at
    }

    pub fn current_weave_size(&self) -> u128 {
        self.current_weave_size
    }

    pub fn interval_bytes(&self) -> u64 {
        self.interval_bytes
    }

    /// Narrows the block-height range that can contain `target_offset`.
    ///
    /// An offset before the first interval maps to `[0, first]`; an offset at
    /// or past the last interval maps to `[last, current_height]`. An exact
    /// boundary hit makes the matched interval the low bound.
    pub fn get_search_bounds(&self, target_offset: u128, current_height: u64) -> SearchBounds {
        let intervals = &self.intervals;
        let first = intervals[0];
        let last = intervals[intervals.len() - 1];

        if target_offset < first.offset {
            return SearchBounds {
                low_height: 0,
                high_height: first.block_height,
            };
        }
        if target_offset >= last.offset {
            return SearchBounds {
                low_height: last.block_height,
                high_height: current_height.max(last.block_height),
            };
        }

        // partition_point returns the first interval past the target, so the
        // containing interval is the one before it.
        let i = intervals.partition_point(|item| item.offset <= target_offset) - 1;

        SearchBounds {
            low_height: intervals[i].block_height,
            high_height: intervals[i + 1].block_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_json(intervals: &str) -> String {
        format!(
            r#"{{
                "version": "1",
                "generatedAt": "2024-05-01T00:00:00Z",
                "currentHeight": 1800000,
                "currentWeaveSize": 21990232555520,
                "intervalBytes": 5497558138880,
                "intervals": {intervals}
            }}"#
        )
    }

    fn mainnet_style_index() -> BlockOffsetIndex<Initialized> {
        let json = map_json(
            r#"[
                {"offset": 0, "blockHeight": 0},
                {"offset": 5497558138880, "blockHeight": 642449},
                {"offset": 10995116277760, "blockHeight": 731523},
                {"offset": 16492674416640, "blockHeight": 779014},
                {"offset": 21990232555520, "blockHeight": 807172}
            ]"#,
        );
        BlockOffsetIndex::new().init_from_json(&json).unwrap()
    }

    #[test]
    fn bounds_for_offset_inside_an_interval() {
        let index = mainnet_style_index();
        let bounds = index.get_search_bounds(7_000_000_000_000, 1_800_000);
        assert_eq!(
            bounds,
            SearchBounds {
                low_height: 642449,
                high_height: 731523
            }
        );
    }

    #[test]
    fn bounds_past_the_last_interval_use_current_height() {
        let index = mainnet_style_index();
        let bounds = index.get_search_bounds(50_000_000_000_000, 1_800_000);
        assert_eq!(
            bounds,
            SearchBounds {
                low_height: 807172,
                high_height: 1_800_000
            }
        );
    }

    #[test]
    fn exact_boundary_hit_is_the_low_bound() {
        let index = mainnet_style_index();
        let bounds = index.get_search_bounds(10_995_116_277_760, 1_800_000);
        assert_eq!(
            bounds,
            SearchBounds {
                low_height: 731523,
                high_height: 779014
            }
        );
    }

    #[test]
    fn offset_before_first_interval_starts_at_genesis() {
        let json = map_json(
            r#"[
                {"offset": 1000, "blockHeight": 10},
                {"offset": 2000, "blockHeight": 20}
            ]"#,
        );
        let index = BlockOffsetIndex::new().init_from_json(&json).unwrap();
        let bounds = index.get_search_bounds(5, 100);
        assert_eq!(
            bounds,
            SearchBounds {
                low_height: 0,
                high_height: 10
            }
        );
    }

    #[test]
    fn bounds_are_always_ordered() {
        let index = mainnet_style_index();
        for offset in [0u128, 1, 5_497_558_138_880, 21_990_232_555_519, 1 << 60] {
            let b = index.get_search_bounds(offset, 1_800_000);
            assert!(b.low_height <= b.high_height, "offset {offset}");
        }
    }

    #[test]
    fn rejects_fewer_than_two_intervals() {
        let json = map_json(r#"[{"offset": 0, "blockHeight": 0}]"#);
        let err = BlockOffsetIndex::new().init_from_json(&json).unwrap_err();
        assert!(matches!(err, OffsetMapError::TooFewIntervals(1)));
    }

    #[test]
    fn rejects_non_monotonic_offsets() {
        let json = map_json(
            r#"[
                {"offset": 1000, "blockHeight": 10},
                {"offset": 1000, "blockHeight": 20}
            ]"#,
        );
        let err = BlockOffsetIndex::new().init_from_json(&json).unwrap_err();
        assert!(matches!(
            err,
            OffsetMapError::NonMonotonic {
                field: "offset",
                index: 1
            }
        ));
    }

    #[test]
    fn rejects_non_monotonic_heights() {
        let json = map_json(
            r#"[
                {"offset": 1000, "blockHeight": 20},
                {"offset": 2000, "blockHeight": 20}
            ]"#,
        );
        let err = BlockOffsetIndex::new().init_from_json(&json).unwrap_err();
        assert!(matches!(
            err,
            OffsetMapError::NonMonotonic {
                field: "blockHeight",
                index: 1
            }
        ));
    }

    #[test]
    fn rejects_garbage_json() {
        let err = BlockOffsetIndex::new()
            .init_from_json("not a map")
            .unwrap_err();
        assert!(matches!(err, OffsetMapError::Parse(_)));
    }
}
