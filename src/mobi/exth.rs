//! Editing of the EXTH metadata block embedded in a MOBI header.
//!
//! The block sits at `16 + headerLength` inside record 0:
//!
//! ```text
//! "EXTH" | totalLength: u32 | count: u32 | (tag: u32, length: u32, payload)*
//! ```
//!
//! `length` includes its own 8-byte prefix. Tags may repeat. The title text
//! follows the block, so every size change is mirrored into the header's
//! title offset.

use crate::error::{Error, Result};

use super::headers::{
    MOBI_HEADER_BASE, MOBI_HEADER_LENGTH, TITLE_OFFSET, adjust_u32, read_u32,
};
use super::region::{Region, RegionKind};

const EXTH_MAGIC: &[u8; 4] = b"EXTH";
const EXTH_HEADER_LEN: usize = 12;
const ENTRY_PREFIX_LEN: usize = 8;

/// Location and declared size of the EXTH block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExthParams {
    /// Offset of the `"EXTH"` magic within record 0.
    pub base: usize,
    /// Declared block length, sub-header included.
    pub length: usize,
    /// Declared number of entries.
    pub count: usize,
}

impl ExthParams {
    pub fn read(rec0: &[u8]) -> Result<Self> {
        let header_len = read_u32(rec0, MOBI_HEADER_LENGTH)? as usize;
        let base = MOBI_HEADER_BASE + header_len;
        if rec0.get(base..base + 4) != Some(EXTH_MAGIC.as_slice()) {
            return Err(Error::format(format!("no EXTH block at offset {base}")));
        }
        let length = read_u32(rec0, base + 4)? as usize;
        let count = read_u32(rec0, base + 8)? as usize;
        if length < EXTH_HEADER_LEN || base + length > rec0.len() {
            return Err(Error::format(format!(
                "EXTH length {length} at {base} does not fit a {}-byte header",
                rec0.len()
            )));
        }
        Ok(Self { base, length, count })
    }

    fn end(&self) -> usize {
        self.base + self.length
    }
}

/// Whether record 0 carries the EXTH magic where the block belongs. The
/// block itself may still be malformed; [`ExthParams::read`] reports that.
pub fn has_exth(rec0: &[u8]) -> bool {
    let Ok(header_len) = read_u32(rec0, MOBI_HEADER_LENGTH) else {
        return false;
    };
    let base = MOBI_HEADER_BASE + header_len as usize;
    rec0.get(base..base + EXTH_MAGIC.len()) == Some(EXTH_MAGIC.as_slice())
}

/// One entry inside the block.
#[derive(Debug, Clone, Copy)]
struct Entry {
    tag: u32,
    region: Region,
}

impl Entry {
    fn payload<'a>(&self, rec0: &'a [u8]) -> &'a [u8] {
        &rec0[self.region.start + ENTRY_PREFIX_LEN..self.region.end]
    }
}

/// Walk the declared entries, checking that each fits inside the block.
/// Returns the entries and the offset just past the last one.
fn scan(rec0: &[u8], params: &ExthParams) -> Result<(Vec<Entry>, usize)> {
    // The declared count is untrusted; no more entries fit than the block holds.
    let room = (params.length - EXTH_HEADER_LEN) / ENTRY_PREFIX_LEN;
    let mut entries = Vec::with_capacity(params.count.min(room));
    let mut pos = params.base + EXTH_HEADER_LEN;
    for n in 0..params.count {
        if pos + ENTRY_PREFIX_LEN > params.end() {
            return Err(Error::format(format!(
                "EXTH declares {} entries but the block ends after {n}",
                params.count
            )));
        }
        let tag = read_u32(rec0, pos)?;
        let len = read_u32(rec0, pos + 4)? as usize;
        if len < ENTRY_PREFIX_LEN || pos + len > params.end() {
            return Err(Error::format(format!(
                "EXTH entry {n} (tag {tag}, length {len}) overruns the block ending at {}",
                params.end()
            )));
        }
        entries.push(Entry {
            tag,
            region: Region::new(pos, pos + len, RegionKind::Field)?,
        });
        pos += len;
    }
    Ok((entries, pos))
}

fn find(rec0: &[u8], params: &ExthParams, tag: u32) -> Result<Entry> {
    let (entries, _) = scan(rec0, params)?;
    entries
        .into_iter()
        .find(|e| e.tag == tag)
        .ok_or_else(|| Error::bounds(format!("no EXTH entry with tag {tag}")))
}

fn encode(tag: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len() + ENTRY_PREFIX_LEN)
        .map_err(|_| Error::bounds(format!("EXTH payload of {} bytes", payload.len())))?;
    let mut entry = Vec::with_capacity(payload.len() + ENTRY_PREFIX_LEN);
    entry.extend_from_slice(&tag.to_be_bytes());
    entry.extend_from_slice(&len.to_be_bytes());
    entry.extend_from_slice(payload);
    Ok(entry)
}

/// Rebuild record 0 with `replaced` swapped for `replacement`, then carry
/// the size change into the block length, the entry count and the title offset.
fn splice(
    rec0: &[u8],
    params: &ExthParams,
    replaced: Region,
    replacement: &[u8],
    count_delta: i64,
) -> Result<Vec<u8>> {
    let delta = replacement.len() as i64 - replaced.len() as i64;

    let mut out = Vec::with_capacity((rec0.len() as i64 + delta).max(0) as usize);
    out.extend_from_slice(&rec0[..replaced.start]);
    out.extend_from_slice(replacement);
    out.extend_from_slice(&rec0[replaced.end..]);

    adjust_u32(&mut out, params.base + 4, delta)?;
    adjust_u32(&mut out, params.base + 8, count_delta)?;
    adjust_u32(&mut out, TITLE_OFFSET, delta)?;
    Ok(out)
}

/// Payloads of every entry with `tag`, in block order.
pub fn read_entries(rec0: &[u8], tag: u32) -> Result<Vec<&[u8]>> {
    let params = ExthParams::read(rec0)?;
    let (entries, _) = scan(rec0, &params)?;
    Ok(entries
        .iter()
        .filter(|e| e.tag == tag)
        .map(|e| e.payload(rec0))
        .collect())
}

/// The first entry with `tag`, read as a big-endian u32.
pub fn first_u32(rec0: &[u8], tag: u32) -> Result<Option<u32>> {
    match read_entries(rec0, tag)?.first() {
        None => Ok(None),
        Some(payload) => read_u32(payload, 0)
            .map(Some)
            .map_err(|_| Error::format(format!("EXTH entry {tag} is too short for a number"))),
    }
}

/// Replace the payload of the first entry with `tag`.
pub fn write_entry(rec0: &[u8], tag: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let params = ExthParams::read(rec0)?;
    let entry = find(rec0, &params, tag)?;
    splice(rec0, &params, entry.region, &encode(tag, payload)?, 0)
}

/// Append a new entry after the last one.
pub fn add_entry(rec0: &[u8], tag: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let params = ExthParams::read(rec0)?;
    let (_, end) = scan(rec0, &params)?;
    splice(rec0, &params, Region::at(end, RegionKind::Field), &encode(tag, payload)?, 1)
}

/// Remove the first entry with `tag`.
pub fn delete_entry(rec0: &[u8], tag: u32) -> Result<Vec<u8>> {
    let params = ExthParams::read(rec0)?;
    let entry = find(rec0, &params, tag)?;
    splice(rec0, &params, entry.region, &[], -1)
}

/// Overwrite the first entry with `tag`, or add one if there is none.
pub fn set_entry(rec0: &[u8], tag: u32, payload: &[u8]) -> Result<Vec<u8>> {
    if read_entries(rec0, tag)?.is_empty() {
        add_entry(rec0, tag, payload)
    } else {
        write_entry(rec0, tag, payload)
    }
}

/// Delete entries with `tag` from the front until only the last one remains.
pub fn keep_last(rec0: &[u8], tag: u32) -> Result<Vec<u8>> {
    let mut out = rec0.to_vec();
    let mut count = read_entries(&out, tag)?.len();
    while count > 1 {
        out = delete_entry(&out, tag)?;
        count -= 1;
    }
    Ok(out)
}
