//! Core data models for the SEP gateway

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace every backend path lives under
pub const IPFS_NAMESPACE: &str = "/ipfs";

/// A validated, canonical content address
///
/// Accepts the characters of the multibase alphabets used for CIDs
/// (base58btc, base32, base36, base16 and base64url). An upper-case base32
/// CIDv1 (`B...`) is rewritten to the lower-case form (`b...`); every other
/// encoding is case sensitive and kept as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Longest identifier accepted
    pub const MAX_LEN: usize = 256;

    /// Validate and canonicalize a raw identifier
    ///
    /// # Returns
    /// * `Ok(Identifier)` holding the canonical string form
    /// * `Err(GatewayError::BadIdentifier)` if the input is empty, too long
    ///   or contains characters outside the multibase alphabets
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(GatewayError::BadIdentifier("empty identifier".to_string()));
        }

        if raw.len() > Self::MAX_LEN {
            return Err(GatewayError::BadIdentifier(format!(
                "identifier longer than {} characters",
                Self::MAX_LEN
            )));
        }

        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(GatewayError::BadIdentifier(format!(
                "unexpected character {:?} in {:?}",
                c, raw
            )));
        }

        Ok(Identifier(canonicalize(raw)))
    }

    /// The canonical string form, also used as the descriptor cache key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn canonicalize(raw: &str) -> String {
    let is_base32_upper = raw.len() > 1
        && raw.starts_with('B')
        && raw[1..]
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b));

    if is_base32_upper {
        raw.to_ascii_lowercase()
    } else {
        raw.to_string()
    }
}

impl FromStr for Identifier {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        Identifier::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self> {
        Identifier::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Absolute path of a single node in the backend namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendPath(String);

impl BackendPath {
    /// Path of the node named directly by `id`
    pub fn root(id: &Identifier) -> Self {
        BackendPath(format!("{}/{}", IPFS_NAMESPACE, id))
    }

    /// Join a sub-path onto an identifier
    ///
    /// Empty segments are dropped, so `a//b/` joins as `a/b`. Segments equal
    /// to `.` or `..` are rejected: a sub-path may never climb out of the
    /// node it is joined to.
    pub fn join(id: &Identifier, sub_path: &str) -> Result<Self> {
        let mut path = format!("{}/{}", IPFS_NAMESPACE, id);

        for segment in sub_path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(GatewayError::InvalidSubPath(sub_path.to_string()));
            }
            path.push('/');
            path.push_str(segment);
        }

        Ok(BackendPath(path))
    }

    /// Wrap an already absolute path (used by backends and tests)
    pub fn from_absolute(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if !path.starts_with(IPFS_NAMESPACE) {
            return Err(GatewayError::InvalidSubPath(path));
        }
        Ok(BackendPath(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request outcome of descriptor resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Identifier whose node is actually served
    pub effective_address: Identifier,
    /// Sub-path below the effective address (may be empty)
    pub sub_path: String,
    /// Name used to pick a content type
    pub display_name: String,
    /// Joined backend path
    pub path: BackendPath,
}

/// Represents a byte range for HTTP Range requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a new ByteRange
    ///
    /// # Returns
    /// * `Ok(ByteRange)` if the range is valid
    /// * `Err(GatewayError)` if start > end
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(GatewayError::InternalError(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        Ok(ByteRange { start, end })
    }

    /// Range covering a whole object of `size` bytes, `None` when empty
    pub fn full(size: u64) -> Option<Self> {
        if size == 0 {
            None
        } else {
            Some(ByteRange { start: 0, end: size - 1 })
        }
    }

    /// Get the size of this byte range in bytes
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for a `Content-Range` header on an object of `total` bytes
    pub fn to_content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Interpretation of a client `Range` header against an object size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// Serve the whole object (no header, or a multi-range request)
    Full,
    /// Serve the given slice with 206
    Partial(ByteRange),
    /// Answer 416
    Unsatisfiable,
}

impl RangeRequest {
    /// Parse a `Range` header value
    ///
    /// Supports `bytes=a-b`, `bytes=a-` and `bytes=-n`. The end of an
    /// explicit range is clamped to the object size. Multi-range requests
    /// are answered with the full body. Malformed headers and ranges that
    /// start past the end of the object are unsatisfiable.
    pub fn parse(header: Option<&str>, size: u64) -> Self {
        let header = match header {
            Some(h) => h.trim(),
            None => return RangeRequest::Full,
        };

        let specs = match header.strip_prefix("bytes=") {
            Some(specs) => specs,
            None => return RangeRequest::Unsatisfiable,
        };

        let parts: Vec<&str> = specs.split(',').map(str::trim).collect();
        if parts.len() > 1 {
            return RangeRequest::Full;
        }

        let (start, end) = match parts[0].split_once('-') {
            Some((start, end)) => (start.trim(), end.trim()),
            None => return RangeRequest::Unsatisfiable,
        };

        if start.is_empty() {
            // suffix range: last n bytes
            let suffix = match end.parse::<u64>() {
                Ok(n) if n > 0 && size > 0 => n.min(size),
                _ => return RangeRequest::Unsatisfiable,
            };
            return RangeRequest::Partial(ByteRange {
                start: size - suffix,
                end: size - 1,
            });
        }

        let start = match start.parse::<u64>() {
            Ok(start) => start,
            Err(_) => return RangeRequest::Unsatisfiable,
        };
        if start >= size {
            return RangeRequest::Unsatisfiable;
        }

        let end = if end.is_empty() {
            size - 1
        } else {
            match end.parse::<u64>() {
                Ok(end) if end >= start => end.min(size - 1),
                _ => return RangeRequest::Unsatisfiable,
            }
        };

        RangeRequest::Partial(ByteRange { start, end })
    }
}
