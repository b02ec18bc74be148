//! Byte-range parsing and exact response-size accounting.
//!
//! The limiter bills responses by their true byte count, so range requests
//! need the exact size of what will be sent, including the multipart
//! envelope when several ranges are returned in one response.

use rand::Rng;

/// Length of a multipart boundary token: 26 dashes followed by 24 hex
/// characters.
pub const BOUNDARY_DASHES: usize = 26;
pub const BOUNDARY_HEX: usize = 24;
pub const BOUNDARY_LEN: usize = BOUNDARY_DASHES + BOUNDARY_HEX;

/// An inclusive satisfied byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes the range covers; both bounds are inclusive.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parses a `Range` header against a known content length. `None` means the
/// header is malformed or no range is satisfiable; callers treat both as a
/// full-content response.
pub fn parse_range_header(value: &str, total: u64) -> Option<Vec<ByteRange>> {
    let set = value.strip_prefix("bytes=")?;
    if total == 0 {
        return None;
    }

    let mut ranges = Vec::new();
    for part in set.split(',') {
        let part = part.trim();
        let (start_str, end_str) = part.split_once('-')?;
        match (start_str.is_empty(), end_str.is_empty()) {
            // "-suffix": the final N bytes.
            (true, false) => {
                let suffix: u64 = end_str.parse().ok()?;
                if suffix == 0 {
                    continue;
                }
                let start = total.saturating_sub(suffix);
                ranges.push(ByteRange {
                    start,
                    end: total - 1,
                });
            }
            // "start-": from an offset to the end.
            (false, true) => {
                let start: u64 = start_str.parse().ok()?;
                if start >= total {
                    continue;
                }
                ranges.push(ByteRange {
                    start,
                    end: total - 1,
                });
            }
            // "start-end", clamped to the content.
            (false, false) => {
                let start: u64 = start_str.parse().ok()?;
                let end: u64 = end_str.parse().ok()?;
                if start > end || start >= total {
                    continue;
                }
                ranges.push(ByteRange {
                    start,
                    end: end.min(total - 1),
                });
            }
            (true, true) => return None,
        }
    }

    if ranges.is_empty() {
        return None;
    }
    Some(ranges)
}

/// A fresh boundary token: 26 dashes and 24 random hex characters.
pub fn generate_boundary() -> String {
    let mut rng = rand::thread_rng();
    let mut boundary = String::with_capacity(BOUNDARY_LEN);
    boundary.extend(std::iter::repeat('-').take(BOUNDARY_DASHES));
    for _ in 0..BOUNDARY_HEX {
        let digit = rng.gen_range(0..16u32);
        boundary.push(char::from_digit(digit, 16).unwrap());
    }
    boundary
}

/// The per-part header inside a `multipart/byteranges` body.
pub fn multipart_part_header(
    boundary: &str,
    content_type: &str,
    range: ByteRange,
    total: u64,
) -> String {
    format!(
        "--{boundary}\r\nContent-Type: {content_type}\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
        range.start, range.end, total
    )
}

/// Exact size of a `multipart/byteranges` response body for the given
/// satisfied ranges.
pub fn multipart_byte_size(ranges: &[ByteRange], content_type: &str, total: u64) -> u64 {
    let boundary = "-".repeat(BOUNDARY_LEN);
    let mut size = 0u64;
    for range in ranges {
        size += multipart_part_header(&boundary, content_type, *range, total).len() as u64;
        size += range.len();
        size += 2; // trailing CRLF after each part's data
    }
    size += format!("--{boundary}--\r\n").len() as u64;
    size
}

/// The billed response size for a request: full content when no (valid)
/// range was asked for, the range length for a single range, the exact
/// multipart envelope otherwise.
pub fn response_byte_size(range_header: Option<&str>, content_type: &str, total: u64) -> u64 {
    let Some(header) = range_header else {
        return total;
    };
    match parse_range_header(header, total) {
        None => total,
        Some(ranges) if ranges.len() == 1 => ranges[0].len(),
        Some(ranges) => multipart_byte_size(&ranges, content_type, total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_range_bills_its_length() {
        assert_eq!(response_byte_size(Some("bytes=0-99"), "text/plain", 1000), 100);
        assert_eq!(response_byte_size(Some("bytes=900-"), "text/plain", 1000), 100);
        assert_eq!(response_byte_size(Some("bytes=-100"), "text/plain", 1000), 100);
        // End clamps to the content length.
        assert_eq!(
            response_byte_size(Some("bytes=990-2000"), "text/plain", 1000),
            10
        );
    }

    #[test]
    fn malformed_and_unsatisfiable_bill_full_content() {
        for header in ["bytes", "bytes=", "bytes=abc-def", "bytes=--5", "items=0-1"] {
            assert_eq!(response_byte_size(Some(header), "text/plain", 1000), 1000);
        }
        // Start past the end is unsatisfiable.
        assert_eq!(
            response_byte_size(Some("bytes=1000-1100"), "text/plain", 1000),
            1000
        );
        assert_eq!(response_byte_size(None, "text/plain", 1000), 1000);
    }

    #[test]
    fn boundary_has_the_mandated_shape() {
        let boundary = generate_boundary();
        assert_eq!(boundary.len(), BOUNDARY_LEN);
        assert!(boundary[..BOUNDARY_DASHES].chars().all(|c| c == '-'));
        assert!(boundary[BOUNDARY_DASHES..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    /// The computed multipart size must equal the length of an actually
    /// assembled body.
    #[test]
    fn multipart_size_matches_an_assembled_body() {
        let total = 1000u64;
        let content_type = "application/octet-stream";
        let ranges =
            parse_range_header("bytes=0-99,200-299,950-", total).expect("ranges parse");
        assert_eq!(ranges.len(), 3);

        let boundary = "-".repeat(BOUNDARY_LEN);
        let data = vec![0xabu8; total as usize];
        let mut body = Vec::new();
        for range in &ranges {
            body.extend_from_slice(
                multipart_part_header(&boundary, content_type, *range, total).as_bytes(),
            );
            body.extend_from_slice(&data[range.start as usize..=range.end as usize]);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        assert_eq!(
            multipart_byte_size(&ranges, content_type, total),
            body.len() as u64
        );
        assert_eq!(
            response_byte_size(Some("bytes=0-99,200-299,950-"), content_type, total),
            body.len() as u64
        );
    }

    #[test]
    fn partially_satisfiable_sets_keep_the_valid_ranges() {
        let ranges = parse_range_header("bytes=0-9,5000-6000", 1000).expect("one valid range");
        assert_eq!(ranges, vec![ByteRange { start: 0, end: 9 }]);
    }
}
