//! Typed byte ranges and the container assembler.
//!
//! Every editing primitive describes its output as a list of [`Region`]s cut
//! from one or two source containers plus a freshly computed directory, and
//! hands them to [`ContainerWriter`]. Nothing writes at literal offsets.

use std::fmt;

use crate::error::{Error, Result};

use super::directory::DirEntry;
use super::headers::{FIRST_RECORD_INFO, NUMBER_OF_RECORDS, UNIQUE_ID_SEED};

/// What a region of a container holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// The fixed 78-byte PDB header.
    Header,
    /// The record directory.
    Directory,
    /// Padding between the directory and the first record.
    Gap,
    /// The payload of one record.
    Record(usize),
    /// A run of payload spanning several records.
    Payload,
    /// A field or entry inside a record.
    Field,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Header => f.write_str("header"),
            RegionKind::Directory => f.write_str("directory"),
            RegionKind::Gap => f.write_str("gap"),
            RegionKind::Record(i) => write!(f, "record {i}"),
            RegionKind::Payload => f.write_str("payload"),
            RegionKind::Field => f.write_str("field"),
        }
    }
}

/// A half-open byte range `[start, end)` with a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub end: usize,
    pub kind: RegionKind,
}

impl Region {
    pub fn new(start: usize, end: usize, kind: RegionKind) -> Result<Self> {
        if start > end {
            return Err(Error::bounds(format!("{kind} starts at {start} after its end {end}")));
        }
        Ok(Self { start, end, kind })
    }

    /// An empty region positioned at `at`, used as an insertion point.
    pub fn at(at: usize, kind: RegionKind) -> Self {
        Self { start: at, end: at, kind }
    }

    /// The region from this region's start up to `other`'s start.
    pub fn until(&self, other: &Region) -> Result<Region> {
        Region::new(self.start, other.start, RegionKind::Payload)
    }

    /// The region from this region's end to `len`.
    pub fn rest(&self, len: usize) -> Result<Region> {
        Region::new(self.end, len, RegionKind::Payload)
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn slice<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        data.get(self.start..self.end).ok_or_else(|| {
            Error::bounds(format!(
                "{} {}..{} exceeds {}-byte buffer",
                self.kind,
                self.start,
                self.end,
                data.len()
            ))
        })
    }
}

/// Builds a complete container from a base header, a directory and a list
/// of payload slices.
///
/// The PDB header and the directory-to-payload gap are copied from `base`;
/// the record count is always written from the directory length and the
/// unique-id seed is recomputed only when [`reseed`](Self::reseed) is set.
pub(crate) struct ContainerWriter<'a> {
    base: &'a [u8],
    gap: Region,
    reseed: bool,
    entries: Vec<DirEntry>,
    pieces: Vec<&'a [u8]>,
}

impl<'a> ContainerWriter<'a> {
    pub fn new(base: &'a [u8], gap: Region) -> Self {
        Self {
            base,
            gap,
            reseed: false,
            entries: Vec::new(),
            pieces: Vec::new(),
        }
    }

    /// Rewrite the unique-id seed as `2*N+1`.
    pub fn reseed(mut self) -> Self {
        self.reseed = true;
        self
    }

    pub fn entries(mut self, entries: Vec<DirEntry>) -> Self {
        self.entries = entries;
        self
    }

    /// Append a run of payload cut from `data`.
    pub fn splice(mut self, data: &'a [u8], region: Region) -> Result<Self> {
        let bytes = region.slice(data)?;
        self.pieces.push(bytes);
        Ok(self)
    }

    /// Append payload bytes that do not come from a container.
    pub fn bytes(mut self, bytes: &'a [u8]) -> Self {
        self.pieces.push(bytes);
        self
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let count = u16::try_from(self.entries.len()).map_err(|_| {
            Error::bounds(format!("{} records exceed the directory limit", self.entries.len()))
        })?;
        let header = Region::new(0, FIRST_RECORD_INFO, RegionKind::Header)?.slice(self.base)?;
        let gap = self.gap.slice(self.base)?;

        let payload_len: usize = self.pieces.iter().map(|p| p.len()).sum();
        let mut out = Vec::with_capacity(
            header.len() + self.entries.len() * 8 + gap.len() + payload_len,
        );

        out.extend_from_slice(&header[..UNIQUE_ID_SEED]);
        if self.reseed {
            out.extend_from_slice(&(2 * u32::from(count) + 1).to_be_bytes());
        } else {
            out.extend_from_slice(&header[UNIQUE_ID_SEED..UNIQUE_ID_SEED + 4]);
        }
        out.extend_from_slice(&header[UNIQUE_ID_SEED + 4..NUMBER_OF_RECORDS]);
        out.extend_from_slice(&count.to_be_bytes());

        for entry in &self.entries {
            out.extend_from_slice(&entry.offset.to_be_bytes());
            out.extend_from_slice(&entry.attributes.to_be_bytes());
        }
        out.extend_from_slice(gap);

        for piece in self.pieces {
            out.extend_from_slice(piece);
        }
        Ok(out)
    }
}
