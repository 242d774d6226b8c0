//! Read-only view of a container's record directory.

use crate::error::{Error, Result};

use super::headers::{
    FIRST_RECORD_INFO, NUMBER_OF_RECORDS, PDB_NAME_LEN, RECORD_INFO_SIZE, read_u16, read_u32,
};
use super::region::{ContainerWriter, Region, RegionKind};

/// One directory slot: the record's file offset and its attribute/unique-id word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub offset: u32,
    pub attributes: u32,
}

impl DirEntry {
    /// Move the record by `delta` bytes.
    pub fn shifted(self, delta: i64) -> Result<Self> {
        let offset = u32::try_from(i64::from(self.offset) + delta).map_err(|_| {
            Error::bounds(format!("record offset {} cannot move by {delta}", self.offset))
        })?;
        Ok(Self { offset, ..self })
    }

    /// Give the record the unique id of slot `index` (`2*index`).
    pub fn renumbered(self, index: usize) -> Result<Self> {
        let attributes = u32::try_from(index * 2)
            .map_err(|_| Error::bounds(format!("record index {index} has no unique id")))?;
        Ok(Self { attributes, ..self })
    }
}

/// The record table of a PDB container.
///
/// The record count in the header is the single source of truth for how many
/// entries the directory holds.
#[derive(Debug, Clone)]
pub struct Directory {
    entries: Vec<DirEntry>,
}

impl Directory {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let count = read_u16(data, NUMBER_OF_RECORDS)? as usize;
        let end = FIRST_RECORD_INFO + count * RECORD_INFO_SIZE;
        if data.len() < end {
            return Err(Error::bounds(format!(
                "directory of {count} records ends at {end}, container is {} bytes",
                data.len()
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let pos = FIRST_RECORD_INFO + i * RECORD_INFO_SIZE;
            entries.push(DirEntry {
                offset: read_u32(data, pos)?,
                attributes: read_u32(data, pos + 4)?,
            });
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    /// Byte range of record `index` within a container of `file_len` bytes.
    pub fn record(&self, index: usize, file_len: usize) -> Result<Region> {
        let entry = self.entries.get(index).ok_or_else(|| {
            Error::bounds(format!("record {index} out of range 0..{}", self.entries.len()))
        })?;
        let start = entry.offset as usize;
        let end = match self.entries.get(index + 1) {
            Some(next) => next.offset as usize,
            None => file_len,
        };
        if end > file_len {
            return Err(Error::bounds(format!(
                "record {index} ends at {end}, container is {file_len} bytes"
            )));
        }
        Region::new(start, end, RegionKind::Record(index))
    }

    /// The padding between the end of the directory and the first record.
    pub fn gap(&self, file_len: usize) -> Result<Region> {
        let start = FIRST_RECORD_INFO + self.entries.len() * RECORD_INFO_SIZE;
        let end = self
            .entries
            .first()
            .map(|e| e.offset as usize)
            .unwrap_or(start);
        if end > file_len {
            return Err(Error::bounds(format!(
                "first record at {end} lies past the {file_len}-byte container"
            )));
        }
        Region::new(start, end, RegionKind::Gap)
            .map_err(|_| Error::format(format!("first record at {end} overlaps the directory")))
    }
}

/// `(start, end)` of record `index`; the last record runs to the end of the container.
pub fn record_bounds(data: &[u8], index: usize) -> Result<(usize, usize)> {
    let region = Directory::parse(data)?.record(index, data.len())?;
    Ok((region.start, region.end))
}

/// Build a fresh container holding `records`, with unique ids `2*i` and the
/// customary two-byte gap after the directory.
pub fn assemble_container(name: &str, records: &[&[u8]]) -> Result<Vec<u8>> {
    let mut header = vec![0u8; FIRST_RECORD_INFO];
    let name = name.as_bytes();
    let copy_len = name.len().min(PDB_NAME_LEN - 1);
    header[..copy_len].copy_from_slice(&name[..copy_len]);
    header[60..68].copy_from_slice(b"BOOKMOBI");

    let gap_len = 2;
    let mut offset = FIRST_RECORD_INFO + records.len() * RECORD_INFO_SIZE + gap_len;
    let mut entries = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let entry = DirEntry {
            offset: u32::try_from(offset)
                .map_err(|_| Error::bounds(format!("record {i} starts past 4 GiB")))?,
            attributes: 0,
        };
        entries.push(entry.renumbered(i)?);
        offset += record.len();
    }

    // The writer copies header and gap from its base, so give it one.
    header.extend_from_slice(&[0u8; 2]);
    let gap = Region::new(FIRST_RECORD_INFO, FIRST_RECORD_INFO + gap_len, RegionKind::Gap)?;
    let mut writer = ContainerWriter::new(&header, gap).reseed().entries(entries);
    for record in records {
        writer = writer.bytes(record);
    }
    writer.finish()
}
