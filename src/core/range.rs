//! Byte-range header handling
//!
//! Formats the open-ended `Range` request header used by downloads and the
//! `bytes <start>-<end>/<total>` value attached to every upload chunk, and
//! parses the `Content-Range` header of partial responses.

use std::fmt;
use std::str::FromStr;

use crate::core::error::Error;

/// `Range` header value asking for everything from `offset` onwards.
pub fn open_range(offset: u64) -> String {
    format!("bytes={offset}-")
}

/// A `bytes <start>-<end>/<total>` content range. `end` is inclusive and a
/// `None` total stands for the `*` (unknown) form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

impl ContentRange {
    /// Range of a chunk of `len` bytes starting at `start` inside an object
    /// of `total` bytes. `len` must be non-zero.
    pub fn for_chunk(start: u64, len: u64, total: u64) -> Self {
        Self {
            start,
            end: start + len - 1,
            total: Some(total),
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Some(total) => write!(f, "bytes {}-{}/{}", self.start, self.end, total),
            None => write!(f, "bytes {}-{}/*", self.start, self.end),
        }
    }
}

impl FromStr for ContentRange {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let malformed = || Error::ProtocolViolation(format!("malformed content-range: {value:?}"));

        let rest = value
            .trim()
            .strip_prefix("bytes")
            .ok_or_else(malformed)?
            .trim_start();
        let (range, total) = rest.split_once('/').ok_or_else(malformed)?;
        let (start, end) = range.split_once('-').ok_or_else(malformed)?;

        let start: u64 = start.trim().parse().map_err(|_| malformed())?;
        let end: u64 = end.trim().parse().map_err(|_| malformed())?;
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse::<u64>().map_err(|_| malformed())?),
        };

        if end < start {
            return Err(malformed());
        }
        if matches!(total, Some(t) if end >= t) {
            return Err(malformed());
        }

        Ok(Self { start, end, total })
    }
}

/// Total size advertised by a `Content-Range` header, if present.
///
/// The unsatisfied form `bytes */<total>` is accepted as well.
pub fn total_from_content_range(value: &str) -> Result<Option<u64>, Error> {
    let trimmed = value.trim();
    if let Some(total) = trimmed.strip_prefix("bytes */") {
        return total
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::ProtocolViolation(format!("malformed content-range: {value:?}")));
    }
    Ok(trimmed.parse::<ContentRange>()?.total)
}
