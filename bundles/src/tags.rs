//! Tag block parsing.
//!
//! Unlike the big-endian 32 byte integers in bundle item records, tag name
//! and value fields are prefixed by 4 byte **little-endian** lengths.

use thiserror::Error;

use ar_gateway_types::consensus::{
    BUNDLE_FORMAT_TAG, BUNDLE_FORMAT_VALUE, BUNDLE_VERSION_TAG, BUNDLE_VERSION_VALUE,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("tag block ended inside a length prefix or field")]
    Truncated,
    #[error("tag block declares {declared} tags but encodes {found}")]
    CountMismatch { declared: u64, found: u64 },
}

/// A single name/value tag, both fields raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl Tag {
    pub fn new(name: &str, value: &str) -> Self {
        Tag {
            name: name.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn value_lossy(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

fn read_field<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a [u8], TagError> {
    let len_bytes = bytes.get(*pos..*pos + 4).ok_or(TagError::Truncated)?;
    let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
    *pos += 4;
    let field = bytes.get(*pos..*pos + len).ok_or(TagError::Truncated)?;
    *pos += len;
    Ok(field)
}

/// Parses `declared_count` length-prefixed tags out of `bytes`, requiring the
/// block to be fully consumed.
pub fn parse_tags(bytes: &[u8], declared_count: u64) -> Result<Vec<Tag>, TagError> {
    let mut tags = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let name = read_field(bytes, &mut pos)?.to_vec();
        let value = read_field(bytes, &mut pos)?.to_vec();
        tags.push(Tag { name, value });
    }
    if tags.len() as u64 != declared_count {
        return Err(TagError::CountMismatch {
            declared: declared_count,
            found: tags.len() as u64,
        });
    }
    Ok(tags)
}

/// Serializes tags with the little-endian length prefixes. Used by tests and
/// by the chunk broadcast path when re-posting locally assembled items.
pub fn encode_tags(tags: &[Tag]) -> Vec<u8> {
    let mut out = Vec::new();
    for tag in tags {
        out.extend_from_slice(&(tag.name.len() as u32).to_le_bytes());
        out.extend_from_slice(&tag.name);
        out.extend_from_slice(&(tag.value.len() as u32).to_le_bytes());
        out.extend_from_slice(&tag.value);
    }
    out
}

/// First `Content-Type` value, matched case-insensitively.
pub fn content_type(tags: &[Tag]) -> Option<String> {
    tags.iter()
        .find(|t| t.name_lossy().eq_ignore_ascii_case("content-type"))
        .map(|t| t.value_lossy())
}

/// A data item is a nested bundle only when both identifying tags are
/// present with exactly the expected values.
pub fn is_bundle(tags: &[Tag]) -> bool {
    let format = tags
        .iter()
        .any(|t| t.name_lossy() == BUNDLE_FORMAT_TAG && t.value_lossy() == BUNDLE_FORMAT_VALUE);
    let version = tags
        .iter()
        .any(|t| t.name_lossy() == BUNDLE_VERSION_TAG && t.value_lossy() == BUNDLE_VERSION_VALUE);
    format && version
}
