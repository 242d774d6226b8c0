//! Test helpers for building containers.
//!
//! These utilities are used by both unit tests and integration tests to
//! produce small but structurally faithful compiler output.

use crate::error::Result;

use super::directory::assemble_container;
use super::headers::{
    DATP_INDEX, EXTH_FLAGS, FCIS_INDEX, FIRST_NON_TEXT, FIRST_RESOURCE, FLIS_INDEX,
    HUFF_TABLE_OFFSET, KF8_FDST_INDEX, LAST_CONTENT_INDEX, MOBI_VERSION, NULL_INDEX, SRCS_COUNT,
    SRCS_INDEX, TITLE_OFFSET, exth_tag,
};

const MOBI_HEADER_LEN: u32 = 264;

#[derive(Debug, Clone, Copy)]
enum Field {
    U16(u16),
    U32(u32),
}

/// Builds a record 0: PalmDOC header, a 264-byte MOBI header, an EXTH block
/// and the title.
///
/// Every record index field starts out unused (`0xFFFFFFFF`) and the
/// Huffman fields start at zero, as the compiler writes them for
/// uncompressed books.
#[derive(Debug, Clone)]
pub struct Record0Builder {
    title: String,
    version: u32,
    fields: Vec<(usize, Field)>,
    exth: Vec<(u32, Vec<u8>)>,
    with_exth: bool,
    pad_exth: bool,
}

impl Record0Builder {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_owned(),
            version: 6,
            fields: Vec::new(),
            exth: Vec::new(),
            with_exth: true,
            pad_exth: false,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn field_u32(mut self, ofs: usize, value: u32) -> Self {
        self.fields.push((ofs, Field::U32(value)));
        self
    }

    pub fn field_u16(mut self, ofs: usize, value: u16) -> Self {
        self.fields.push((ofs, Field::U16(value)));
        self
    }

    pub fn exth(mut self, tag: u32, payload: &[u8]) -> Self {
        self.exth.push((tag, payload.to_vec()));
        self
    }

    pub fn exth_u32(self, tag: u32, value: u32) -> Self {
        self.exth(tag, &value.to_be_bytes())
    }

    /// Leave the EXTH block out entirely.
    pub fn without_exth(mut self) -> Self {
        self.with_exth = false;
        self
    }

    /// Pad the EXTH block to a multiple of four bytes.
    pub fn pad_exth(mut self, pad: bool) -> Self {
        self.pad_exth = pad;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let exth = if self.with_exth { self.build_exth() } else { Vec::new() };
        let title_offset = 16 + MOBI_HEADER_LEN + exth.len() as u32;

        let mut rec0 = vec![0u8; (16 + MOBI_HEADER_LEN) as usize];
        // PalmDOC header: no compression, no encryption
        rec0[0..2].copy_from_slice(&1u16.to_be_bytes());
        rec0[8..10].copy_from_slice(&1u16.to_be_bytes());
        rec0[10..12].copy_from_slice(&4096u16.to_be_bytes());

        rec0[16..20].copy_from_slice(b"MOBI");
        put(&mut rec0, 20, Field::U32(MOBI_HEADER_LEN));
        put(&mut rec0, 24, Field::U32(2));
        put(&mut rec0, 28, Field::U32(65001));
        put(&mut rec0, MOBI_VERSION, Field::U32(self.version));
        for ofs in (40..80).step_by(4) {
            put(&mut rec0, ofs, Field::U32(NULL_INDEX));
        }
        put(&mut rec0, FIRST_NON_TEXT, Field::U32(NULL_INDEX));
        put(&mut rec0, TITLE_OFFSET, Field::U32(title_offset));
        put(&mut rec0, 88, Field::U32(self.title.len() as u32));
        put(&mut rec0, FIRST_RESOURCE, Field::U32(NULL_INDEX));
        let flags = if self.with_exth { 0x50 } else { 0x10 };
        put(&mut rec0, EXTH_FLAGS, Field::U32(flags));
        for ofs in [KF8_FDST_INDEX, FCIS_INDEX, FLIS_INDEX, SRCS_INDEX, DATP_INDEX] {
            put(&mut rec0, ofs, Field::U32(NULL_INDEX));
        }
        put(&mut rec0, SRCS_COUNT, Field::U32(0));
        for &(ofs, value) in &self.fields {
            put(&mut rec0, ofs, value);
        }

        rec0.extend_from_slice(&exth);
        rec0.extend_from_slice(self.title.as_bytes());
        rec0.extend_from_slice(&[0, 0]);
        rec0
    }

    fn build_exth(&self) -> Vec<u8> {
        let mut entries = Vec::new();
        for (tag, payload) in &self.exth {
            entries.extend_from_slice(&tag.to_be_bytes());
            entries.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
            entries.extend_from_slice(payload);
        }
        let mut len = 12 + entries.len();
        if self.pad_exth {
            len = len.div_ceil(4) * 4;
        }

        let mut exth = Vec::with_capacity(len);
        exth.extend_from_slice(b"EXTH");
        exth.extend_from_slice(&(len as u32).to_be_bytes());
        exth.extend_from_slice(&(self.exth.len() as u32).to_be_bytes());
        exth.extend_from_slice(&entries);
        exth.resize(len, 0);
        exth
    }
}

fn put(rec0: &mut [u8], ofs: usize, value: Field) {
    match value {
        Field::U16(v) => rec0[ofs..ofs + 2].copy_from_slice(&v.to_be_bytes()),
        Field::U32(v) => rec0[ofs..ofs + 4].copy_from_slice(&v.to_be_bytes()),
    }
}

/// A minimal baseline JPEG header with the given dimensions.
pub fn fake_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x11, 0x08];
    data.extend_from_slice(&(height as u16).to_be_bytes());
    data.extend_from_slice(&(width as u16).to_be_bytes());
    data.extend_from_slice(&[0x03, 0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
    data.extend_from_slice(&[0xFF, 0xFE, 0x00, 0x04, b'o', b'k']);
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// A `PAGE` record as the compiler writes it.
///
/// Version 2 records carry an extra word before the revision string length.
pub fn page_record(version: u16, json: &str, bits: u16, offsets: &[u32]) -> Vec<u8> {
    let revision = b"1.0";
    let extra = (version.max(1) as usize - 1) * 4;

    let mut rec = vec![0u8; 0x14 + extra];
    rec[0..4].copy_from_slice(b"PAGE");
    rec[0x0A..0x0C].copy_from_slice(&version.to_be_bytes());
    let len_at = 0x10 + extra;
    rec[len_at..len_at + 4].copy_from_slice(&(revision.len() as u32).to_be_bytes());
    rec.extend_from_slice(revision);

    rec.extend_from_slice(&0u16.to_be_bytes());
    rec.extend_from_slice(&(json.len() as u16).to_be_bytes());
    rec.extend_from_slice(&(offsets.len() as u16).to_be_bytes());
    rec.extend_from_slice(&bits.to_be_bytes());
    rec.extend_from_slice(json.as_bytes());
    for &ofs in offsets {
        if bits == 32 {
            rec.extend_from_slice(&ofs.to_be_bytes());
        } else {
            rec.extend_from_slice(&(ofs as u16).to_be_bytes());
        }
    }
    rec
}

pub const COVER_SIZE: (u32, u32) = (600, 800);
pub const PAGE_MAP_JSON: &str = r#"{"description":"Print pages","pageMap":"(1,a,1)"}"#;

/// Builds compiler output: a legacy MOBI part followed by a KF8 part.
///
/// ```text
/// 0 legacy header | 1 text | 2 cover | [thumb] | [SRCS] | BOUNDARY
/// KF8 header | KF8 text | FDST | [PAGE] | EOF
/// ```
///
/// Both headers point at their own first resource; the KF8 header's
/// resource pointer is relative to the KF8 part, where the images will be
/// inserted.
#[derive(Debug, Clone)]
pub struct ComboBook {
    pub name: String,
    pub thumb: Option<(u32, u32)>,
    pub srcs: bool,
    pub page_map: Option<Vec<u8>>,
    /// Start-reading entries in the KF8 header.
    pub start_reading: Vec<u32>,
    /// Explicit last content index in the legacy header; inferred from
    /// the FCIS/FLIS pointers when `None`.
    pub last_content: Option<u16>,
    pub legacy_exth: Vec<(u32, Vec<u8>)>,
    pub kf8_exth: Vec<(u32, Vec<u8>)>,
}

impl Default for ComboBook {
    fn default() -> Self {
        Self {
            name: "Combo_Book".to_owned(),
            thumb: Some((100, 140)),
            srcs: false,
            page_map: Some(page_record(1, PAGE_MAP_JSON, 32, &[0, 1500, 3200])),
            start_reading: vec![10, 20, 30],
            last_content: None,
            legacy_exth: Vec::new(),
            kf8_exth: Vec::new(),
        }
    }
}

impl ComboBook {
    pub fn resource_count(&self) -> usize {
        1 + usize::from(self.thumb.is_some())
    }

    /// Index of the SRCS record, when present.
    pub fn srcs_index(&self) -> Option<usize> {
        self.srcs.then(|| 2 + self.resource_count())
    }

    /// Index of the KF8 header.
    pub fn kf8_index(&self) -> usize {
        2 + self.resource_count() + usize::from(self.srcs) + 1
    }

    pub fn cover(&self) -> Vec<u8> {
        fake_jpeg(COVER_SIZE.0, COVER_SIZE.1)
    }

    pub fn thumbnail(&self) -> Option<Vec<u8>> {
        self.thumb.map(|(w, h)| fake_jpeg(w, h))
    }

    pub fn legacy_header(&self) -> Vec<u8> {
        let boundary = (2 + self.resource_count()) as u32;
        let mut rec0 = Record0Builder::new(&self.name)
            .field_u32(FIRST_NON_TEXT, 2)
            .field_u32(FIRST_RESOURCE, 2)
            .field_u32(EXTH_FLAGS, 0x1850)
            .field_u32(FCIS_INDEX, boundary)
            .field_u32(FLIS_INDEX, boundary)
            .field_u16(KF8_FDST_INDEX, 1)
            .field_u16(LAST_CONTENT_INDEX, self.last_content.unwrap_or(0xFFFF))
            .exth_u32(exth_tag::KF8_OFFSET, self.kf8_index() as u32)
            .exth_u32(exth_tag::COVER_OFFSET, 0);
        if self.thumb.is_some() {
            rec0 = rec0.exth_u32(exth_tag::THUMB_OFFSET, 1);
        }
        if let Some(srcs) = self.srcs_index() {
            rec0 = rec0
                .field_u32(SRCS_INDEX, srcs as u32)
                .field_u32(SRCS_COUNT, 1);
        }
        for (tag, payload) in &self.legacy_exth {
            rec0 = rec0.exth(*tag, payload);
        }
        rec0.build()
    }

    pub fn kf8_header(&self) -> Vec<u8> {
        let mut rec0 = Record0Builder::new(&self.name)
            .version(8)
            .field_u32(FIRST_NON_TEXT, 2)
            .field_u32(FIRST_RESOURCE, 2)
            .field_u32(EXTH_FLAGS, 0x1050)
            .field_u32(KF8_FDST_INDEX, 2)
            .field_u32(HUFF_TABLE_OFFSET, NULL_INDEX);
        for &pos in &self.start_reading {
            rec0 = rec0.exth_u32(exth_tag::START_READING, pos);
        }
        rec0 = rec0.exth_u32(exth_tag::COVER_OFFSET, 0);
        if self.thumb.is_some() {
            rec0 = rec0.exth_u32(exth_tag::THUMB_OFFSET, 1);
        }
        for (tag, payload) in &self.kf8_exth {
            rec0 = rec0.exth(*tag, payload);
        }
        rec0.build()
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let legacy = self.legacy_header();
        let kf8 = self.kf8_header();
        let cover = self.cover();
        let thumb = self.thumbnail();

        let mut records: Vec<&[u8]> = vec![&legacy[..], &b"legacy text"[..], &cover[..]];
        if let Some(thumb) = &thumb {
            records.push(thumb);
        }
        if self.srcs {
            records.push(b"SRCS\0\0\0\x10zipped source archive");
        }
        records.push(b"BOUNDARY");
        records.push(&kf8);
        records.push(b"kf8 text");
        records.push(b"FDST\0\0\0\x0c\0\0\0\x01");
        if let Some(page) = &self.page_map {
            records.push(page);
        }
        records.push(b"\xe9\x8e\r\n");

        assemble_container(&self.name, &records)
    }
}
