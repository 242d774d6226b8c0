//! Field offsets and checked big-endian accessors for the PDB header and
//! the MOBI header (record 0).

use crate::error::{Error, Result};

pub const NULL_INDEX: u32 = 0xFFFF_FFFF;

// PDB header
pub const PDB_NAME_LEN: usize = 32;
pub const UNIQUE_ID_SEED: usize = 68;
pub const NUMBER_OF_RECORDS: usize = 76;
pub const FIRST_RECORD_INFO: usize = 78;
pub const RECORD_INFO_SIZE: usize = 8;

// Record 0
pub const CRYPTO_TYPE: usize = 12;
pub const MOBI_HEADER_BASE: usize = 16;
pub const MOBI_HEADER_LENGTH: usize = 20;
pub const MOBI_VERSION: usize = 36;
pub const FIRST_NON_TEXT: usize = 80;
pub const TITLE_OFFSET: usize = 84;
pub const FIRST_RESOURCE: usize = 108;
pub const HUFF_TABLE_OFFSET: usize = 120;
pub const EXTH_FLAGS: usize = 0x80;
pub const KF8_FDST_INDEX: usize = 192;
pub const LAST_CONTENT_INDEX: usize = 194;
pub const FCIS_INDEX: usize = 200;
pub const FLIS_INDEX: usize = 208;
pub const SRCS_INDEX: usize = 224;
pub const SRCS_COUNT: usize = 228;
pub const DATP_INDEX: usize = 256;

/// Smallest KF8 header that still holds every field the splitter patches.
pub const MIN_KF8_HEADER: usize = DATP_INDEX + 4;

/// Format version of a KF8-only book.
pub const KF8_VERSION: u32 = 8;

/// EXTH tags the splitter reads or writes.
pub mod exth_tag {
    pub const ASIN: u32 = 113;
    pub const START_READING: u32 = 116;
    pub const KF8_OFFSET: u32 = 121;
    pub const RESOURCE_COUNT: u32 = 125;
    pub const THUMBNAIL_URI: u32 = 129;
    pub const COVER_OFFSET: u32 = 201;
    pub const THUMB_OFFSET: u32 = 202;
    pub const CDE_TYPE: u32 = 501;
    pub const CDE_CONTENT_KEY: u32 = 504;
}

fn field(data: &[u8], ofs: usize, width: usize) -> Result<&[u8]> {
    ofs.checked_add(width)
        .and_then(|end| data.get(ofs..end))
        .ok_or_else(|| short_read(ofs, width, data.len()))
}

fn field_mut(data: &mut [u8], ofs: usize, width: usize) -> Result<&mut [u8]> {
    let len = data.len();
    ofs.checked_add(width)
        .and_then(|end| data.get_mut(ofs..end))
        .ok_or_else(|| short_read(ofs, width, len))
}

pub fn read_u16(data: &[u8], ofs: usize) -> Result<u16> {
    let b = field(data, ofs, 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

pub fn read_u32(data: &[u8], ofs: usize) -> Result<u32> {
    let b = field(data, ofs, 4)?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Read a record index field, mapping negative (signed) values to `None`.
///
/// Unused index slots hold `0xFFFFFFFF`; anything with the sign bit set is
/// treated the same way.
pub fn read_index(data: &[u8], ofs: usize) -> Result<Option<u32>> {
    let value = read_u32(data, ofs)?;
    Ok((value < 0x8000_0000).then_some(value))
}

pub fn put_u16(data: &mut [u8], ofs: usize, value: u16) -> Result<()> {
    field_mut(data, ofs, 2)?.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

pub fn put_u32(data: &mut [u8], ofs: usize, value: u32) -> Result<()> {
    field_mut(data, ofs, 4)?.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Add a signed delta to a u32 field, refusing to wrap.
pub fn adjust_u32(data: &mut [u8], ofs: usize, delta: i64) -> Result<()> {
    let value = i64::from(read_u32(data, ofs)?) + delta;
    let value = u32::try_from(value).map_err(|_| {
        Error::format(format!("field at {ofs} out of range after adjusting by {delta}"))
    })?;
    put_u32(data, ofs, value)
}

fn short_read(ofs: usize, width: usize, len: usize) -> Error {
    Error::bounds(format!("{width}-byte field at {ofs} exceeds {len}-byte buffer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_roundtrip_fields() {
        let mut data = vec![0u8; 8];
        put_u32(&mut data, 0, 0xDEAD_BEEF).unwrap();
        put_u16(&mut data, 4, 0x1234).unwrap();
        assert_eq!(read_u32(&data, 0).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_u16(&data, 4).unwrap(), 0x1234);
    }

    #[test]
    fn test_short_reads_are_bounds_errors() {
        let data = [0u8; 3];
        assert!(matches!(read_u32(&data, 0), Err(Error::Bounds(_))));
        assert!(matches!(read_u16(&data, 2), Err(Error::Bounds(_))));
        assert!(matches!(read_u32(&data, usize::MAX - 1), Err(Error::Bounds(_))));
    }

    #[test]
    fn test_read_index_null() {
        let mut data = vec![0u8; 8];
        put_u32(&mut data, 0, NULL_INDEX).unwrap();
        put_u32(&mut data, 4, 42).unwrap();
        assert_eq!(read_index(&data, 0).unwrap(), None);
        assert_eq!(read_index(&data, 4).unwrap(), Some(42));
    }

    #[test]
    fn test_adjust_refuses_to_wrap() {
        let mut data = vec![0u8; 4];
        put_u32(&mut data, 0, 10).unwrap();
        adjust_u32(&mut data, 0, -4).unwrap();
        assert_eq!(read_u32(&data, 0).unwrap(), 6);
        assert!(matches!(adjust_u32(&mut data, 0, -7), Err(Error::Format(_))));
    }
}
