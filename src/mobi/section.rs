//! Record-level editing of a PDB container.
//!
//! Each operation reads the directory of the container it is given and
//! returns a complete new container; inputs are never modified. Offsets are
//! moved by deltas computed against the pre-edit directory, so callers doing
//! several edits must re-derive record indices between calls.

use crate::error::{Error, Result};

use super::directory::{DirEntry, Directory};
use super::headers::RECORD_INFO_SIZE;
use super::region::{ContainerWriter, Region, RegionKind};

/// Borrow the payload of record `index`.
pub fn read_section(data: &[u8], index: usize) -> Result<&[u8]> {
    let dir = Directory::parse(data)?;
    dir.record(index, data.len())?.slice(data)
}

/// Empty record `index` but keep its directory slot, so indices stored
/// elsewhere in the book stay valid.
pub fn null_section(data: &[u8], index: usize) -> Result<Vec<u8>> {
    let dir = Directory::parse(data)?;
    let target = dir.record(index, data.len())?;
    let zero = dir.record(0, data.len())?;
    let dif = target.len() as i64;

    let entries = dir
        .entries()
        .iter()
        .enumerate()
        .map(|(i, e)| if i <= index { Ok(*e) } else { e.shifted(-dif) })
        .collect::<Result<Vec<_>>>()?;

    ContainerWriter::new(data, dir.gap(data.len())?)
        .entries(entries)
        .splice(data, zero.until(&target)?)?
        .splice(data, target.rest(data.len())?)?
        .finish()
}

/// Replace the payload of record `index`, moving every later record by the
/// change in length.
pub fn write_section(data: &[u8], index: usize, payload: &[u8]) -> Result<Vec<u8>> {
    let dir = Directory::parse(data)?;
    let target = dir.record(index, data.len())?;
    let zero = dir.record(0, data.len())?;
    let dif = payload.len() as i64 - target.len() as i64;

    let entries = dir
        .entries()
        .iter()
        .enumerate()
        .map(|(i, e)| match i.cmp(&index) {
            std::cmp::Ordering::Less => Ok(*e),
            std::cmp::Ordering::Equal => e.renumbered(i),
            std::cmp::Ordering::Greater => e.shifted(dif),
        })
        .collect::<Result<Vec<_>>>()?;

    ContainerWriter::new(data, dir.gap(data.len())?)
        .reseed()
        .entries(entries)
        .splice(data, zero.until(&target)?)?
        .bytes(payload)
        .splice(data, target.rest(data.len())?)?
        .finish()
}

/// Remove records `first..=last` together with their directory slots.
pub fn delete_section_range(data: &[u8], first: usize, last: usize) -> Result<Vec<u8>> {
    if last < first {
        return Err(Error::bounds(format!("empty record range {first}..={last}")));
    }
    let dir = Directory::parse(data)?;
    let head = dir.record(first, data.len())?;
    let tail = dir.record(last, data.len())?;
    let zero = dir.record(0, data.len())?;

    let removed = last - first + 1;
    let shrink = (removed * RECORD_INFO_SIZE) as i64;
    let dif = tail.end as i64 - head.start as i64 + shrink;

    let mut entries = Vec::with_capacity(dir.len() - removed);
    for (i, e) in dir.entries().iter().enumerate() {
        if i < first {
            entries.push(e.shifted(-shrink)?);
        } else if i > last {
            entries.push(e.shifted(-dif)?.renumbered(i - removed)?);
        }
    }

    ContainerWriter::new(data, dir.gap(data.len())?)
        .reseed()
        .entries(entries)
        .splice(data, zero.until(&head)?)?
        .splice(data, tail.rest(data.len())?)?
        .finish()
}

/// Copy records `first..=last` of `src` into `dst` in front of record `target`.
///
/// The copied records keep their relative spacing; every record of `dst`
/// from `target` on moves behind them and is renumbered.
pub fn insert_section_range(
    src: &[u8],
    first: usize,
    last: usize,
    dst: &[u8],
    target: usize,
) -> Result<Vec<u8>> {
    if last < first {
        return Err(Error::bounds(format!("empty record range {first}..={last}")));
    }
    let src_dir = Directory::parse(src)?;
    let head = src_dir.record(first, src.len())?;
    let tail = src_dir.record(last, src.len())?;

    let dst_dir = Directory::parse(dst)?;
    let at = dst_dir.record(target, dst.len())?;
    let zero = dst_dir.record(0, dst.len())?;

    let inserted = last - first + 1;
    let grow = (inserted * RECORD_INFO_SIZE) as i64;
    let span = Region::new(head.start, tail.end, RegionKind::Payload)?;

    let mut entries: Vec<DirEntry> = Vec::with_capacity(dst_dir.len() + inserted);
    for e in &dst_dir.entries()[..target] {
        entries.push(e.shifted(grow)?);
    }
    for k in 0..inserted {
        let record = src_dir.record(first + k, src.len())?;
        let offset = at.start + (record.start - head.start) + inserted * RECORD_INFO_SIZE;
        let offset = u32::try_from(offset)
            .map_err(|_| Error::bounds(format!("inserted record {k} starts past 4 GiB")))?;
        entries.push(DirEntry { offset, attributes: 0 }.renumbered(target + k)?);
    }
    for (i, e) in dst_dir.entries().iter().enumerate().skip(target) {
        entries.push(e.shifted(span.len() as i64 + grow)?.renumbered(i + inserted)?);
    }

    ContainerWriter::new(dst, dst_dir.gap(dst.len())?)
        .reseed()
        .entries(entries)
        .splice(dst, zero.until(&at)?)?
        .splice(src, span)?
        .splice(dst, Region::new(at.start, dst.len(), RegionKind::Payload)?)?
        .finish()
}
