//! Turns compiler output into device-ready books.
//!
//! The compiler emits a combo container: a legacy MOBI part followed by a
//! KF8 part whose header record is named by EXTH 121. Two rewrites exist:
//!
//! - [`SplitMode::Combo`] keeps both parts, drops the embedded sources and
//!   fixes up the KF8 metadata so sideloaded books behave like store books.
//! - [`SplitMode::Kf8`] discards the legacy part, pulls the shared images
//!   into the KF8 part and promotes its header to record 0, giving an AZW3.
//!
//! Both also derive an APNX page map from the compiler's `PAGE` record when
//! one is present.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use log::{debug, info, warn};

use crate::config::{PageMapMode, SplitMode, SplitOptions};
use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::util::{EMBED_DIGITS, sanitize_acr, to_radix32};

use super::exth::{self, ExthParams, add_entry, delete_entry, has_exth, keep_last, set_entry};
use super::headers::{
    DATP_INDEX, EXTH_FLAGS, FCIS_INDEX, FIRST_NON_TEXT, FIRST_RESOURCE, FLIS_INDEX,
    HUFF_TABLE_OFFSET, KF8_FDST_INDEX, KF8_VERSION, LAST_CONTENT_INDEX, MIN_KF8_HEADER,
    MOBI_VERSION, NULL_INDEX, NUMBER_OF_RECORDS, PDB_NAME_LEN, SRCS_COUNT, SRCS_INDEX, exth_tag,
    put_u32, read_index, read_u16, read_u32,
};
use super::pagemap::{ContentHeader, PageMap};
use super::section::{
    delete_section_range, insert_section_range, null_section, read_section, write_section,
};
use super::thumbnail::{
    THUMBNAIL_HEIGHT, THUMBNAIL_WIDTH, ThumbnailRenderer, is_undersized, render_jpeg,
};

const EBOK: &[u8] = b"EBOK";
const PDOC: &[u8] = b"PDOC";

// Bits of the EXTH flag word kept when the KF8 header becomes record 0,
// and the "shared resources" bit set on it.
const KF8_FLAG_MASK: u32 = 0x1FFF;
const SHARED_RESOURCES_FLAG: u32 = 0x0800;

/// Why a container was passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Record 0 already is a KF8 header.
    Kf8Only,
    /// Record 0 has no EXTH block.
    NoMetadata,
    /// No usable KF8 boundary in EXTH 121.
    NoKf8Part,
    /// The KF8 header is too short to carry the index fields that get patched.
    ShortKf8Header,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::Kf8Only => "container is KF8 only",
            SkipReason::NoMetadata => "record 0 has no EXTH metadata",
            SkipReason::NoKf8Part => "container has no KF8 part",
            SkipReason::ShortKf8Header => "KF8 header is too short",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Rewritten,
    NotApplicable(SkipReason),
}

/// Result of a split: the container to save and, if the compiler left a
/// usable page map, the APNX sidecar.
#[derive(Debug, Clone)]
pub struct SplitOutput {
    pub container: Vec<u8>,
    pub page_map: Option<Vec<u8>>,
    pub outcome: Outcome,
}

impl SplitOutput {
    fn unchanged(data: &[u8], reason: SkipReason) -> Self {
        info!("Leaving container as is: {reason}");
        Self {
            container: data.to_vec(),
            page_map: None,
            outcome: Outcome::NotApplicable(reason),
        }
    }

    pub fn is_rewritten(&self) -> bool {
        self.outcome == Outcome::Rewritten
    }

    pub fn save_result(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.container)?;
        debug!("Saved {} bytes to {}", self.container.len(), path.display());
        Ok(())
    }

    /// Write the APNX sidecar for a book saved at `book`.
    ///
    /// `App` places `<stem>.apnx` next to the book, `Eink` places it in a
    /// `<stem>.sdr/` directory created alongside. Returns the path written,
    /// or `None` when there is nothing to write.
    pub fn save_page_map(&self, book: &Path, mode: PageMapMode) -> Result<Option<PathBuf>> {
        let Some(apnx) = &self.page_map else {
            debug!("Page map does not exist, ignoring");
            return Ok(None);
        };
        let stem = book.file_stem().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", book.display()),
            ))
        })?;
        let parent = book.parent().unwrap_or_else(|| Path::new(""));

        let dir = match mode {
            PageMapMode::None => return Ok(None),
            PageMapMode::App => parent.to_path_buf(),
            PageMapMode::Eink => {
                let mut sdr = stem.to_os_string();
                sdr.push(".sdr");
                let dir = parent.join(sdr);
                fs::create_dir_all(&dir)?;
                dir
            }
        };

        let mut name = stem.to_os_string();
        name.push(".apnx");
        let path = dir.join(name);
        fs::write(&path, apnx)?;
        debug!("Saved page map to {}", path.display());
        Ok(Some(path))
    }
}

/// What both rewrites learn from the untouched input.
struct Source<'a> {
    data: &'a [u8],
    rec0: &'a [u8],
    kf8: usize,
    kf_rec0: &'a [u8],
    acr: String,
    page_record: Option<&'a [u8]>,
}

enum Prelude<'a> {
    Ready(Source<'a>),
    Skip(SkipReason),
}

impl<'a> Source<'a> {
    fn inspect(data: &'a [u8]) -> Result<Prelude<'a>> {
        let rec0 = read_section(data, 0)?;
        if read_u32(rec0, MOBI_VERSION)? == KF8_VERSION {
            return Ok(Prelude::Skip(SkipReason::Kf8Only));
        }
        if !has_exth(rec0) {
            return Ok(Prelude::Skip(SkipReason::NoMetadata));
        }

        // Only the first boundary entry counts.
        let kf8 = match exth::first_u32(rec0, exth_tag::KF8_OFFSET)? {
            Some(k) if k != 0 && k < 0x8000_0000 => k as usize,
            _ => return Ok(Prelude::Skip(SkipReason::NoKf8Part)),
        };
        let kf_rec0 = read_section(data, kf8)?;
        if kf_rec0.is_empty() {
            return Ok(Prelude::Skip(SkipReason::NoKf8Part));
        }
        if kf_rec0.len() < MIN_KF8_HEADER {
            return Ok(Prelude::Skip(SkipReason::ShortKf8Header));
        }
        ExthParams::read(kf_rec0)?;

        let name = data
            .get(..PDB_NAME_LEN)
            .ok_or_else(|| Error::bounds("container shorter than its database name"))?;

        Ok(Prelude::Ready(Source {
            data,
            rec0,
            kf8,
            kf_rec0,
            acr: sanitize_acr(name),
            page_record: PageMap::find(data, read_index(rec0, FIRST_NON_TEXT)?),
        }))
    }
}

/// Identity written into the result, needed again for the page map.
struct Stamped {
    container: Vec<u8>,
    asin: Vec<u8>,
    cde_key: Vec<u8>,
    cde_type: &'static [u8],
}

impl Stamped {
    /// Content key when present, ASIN otherwise.
    fn page_map_asin(&self) -> String {
        let key = if self.cde_key.is_empty() { &self.asin } else { &self.cde_key };
        key.to_str_lossy().into_owned()
    }
}

fn first_entry(rec0: &[u8], tag: u32) -> Result<Option<Vec<u8>>> {
    Ok(exth::read_entries(rec0, tag)?.first().map(|v| v.to_vec()))
}

fn offset_index(base: u32, rel: u32) -> Result<usize> {
    base.checked_add(rel)
        .map(|i| i as usize)
        .ok_or_else(|| Error::bounds(format!("image {rel} past first resource {base}")))
}

/// The last shared resource record of the legacy part.
///
/// An unknown last-content index is recovered from the lowest of the record
/// pointers that follow the resources.
fn last_resource(rec0: &[u8]) -> Result<Option<u32>> {
    let last = read_u16(rec0, LAST_CONTENT_INDEX)?;
    if last != u16::MAX {
        return Ok(Some(u32::from(last)));
    }
    let mut lowest = u32::from(u16::MAX);
    for ofs in [FCIS_INDEX, FLIS_INDEX, DATP_INDEX, HUFF_TABLE_OFFSET] {
        if let Some(n) = read_index(rec0, ofs)? {
            if n > 0 && n < lowest {
                lowest = n;
            }
        }
    }
    Ok((lowest < u32::from(u16::MAX)).then(|| lowest - 1))
}

/// Rewrites compiler output. Holds no per-book state, so one splitter can
/// serve any number of books.
#[derive(Default)]
pub struct Splitter<'r> {
    renderer: Option<&'r dyn ThumbnailRenderer>,
}

impl fmt::Debug for Splitter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Splitter")
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}

impl Splitter<'static> {
    /// A splitter that leaves embedded thumbnails alone.
    pub fn new() -> Self {
        Self { renderer: None }
    }
}

impl<'r> Splitter<'r> {
    /// A splitter that regenerates undersized thumbnails from the cover.
    pub fn with_renderer(renderer: &'r dyn ThumbnailRenderer) -> Self {
        Self {
            renderer: Some(renderer),
        }
    }

    pub fn split(
        &self,
        data: &[u8],
        id: &Identifier,
        options: &SplitOptions,
    ) -> Result<SplitOutput> {
        let src = match Source::inspect(data)? {
            Prelude::Ready(src) => src,
            Prelude::Skip(reason) => return Ok(SplitOutput::unchanged(data, reason)),
        };

        let code = match &options.asin {
            Some(asin) => asin.as_bytes().to_vec(),
            None => id.content_code().into_bytes(),
        };
        debug!(
            "Splitting {} records, KF8 part at {}, fallback ASIN {}",
            read_u16(data, NUMBER_OF_RECORDS)?,
            src.kf8,
            code.as_bstr()
        );

        let stamped = match options.mode {
            SplitMode::Combo => self.combo(&src, &code, options)?,
            SplitMode::Kf8 => self.promote(&src, &code, options)?,
        };

        let asin = stamped.page_map_asin();
        let cde_type = stamped.cde_type.to_str_lossy();
        let header = match options.mode {
            SplitMode::Combo => ContentHeader::combo(&id.content_guid(), &asin, &cde_type),
            SplitMode::Kf8 => ContentHeader::kf8(&id.content_guid(), &asin, &cde_type, &src.acr),
        };
        let page_map = src.page_record.and_then(|record| {
            match PageMap::parse(record).and_then(|pm| pm.to_apnx(&header)) {
                Ok(apnx) => Some(apnx),
                Err(err) => {
                    warn!("Unable to parse page map data, ignoring: {err}");
                    None
                }
            }
        });

        info!(
            "Rewrote container ({} -> {} bytes), ASIN {}",
            data.len(),
            stamped.container.len(),
            asin
        );
        Ok(SplitOutput {
            container: stamped.container,
            page_map,
            outcome: Outcome::Rewritten,
        })
    }

    fn combo(&self, src: &Source<'_>, code: &[u8], options: &SplitOptions) -> Result<Stamped> {
        let mut result = src.data.to_vec();
        let mut rec0 = src.rec0.to_vec();

        // Drop the embedded sources, keeping their directory slots.
        if let (Some(srcs), Some(count)) =
            (read_index(&rec0, SRCS_INDEX)?, read_index(&rec0, SRCS_COUNT)?)
        {
            if count > 0 {
                debug!("Removing {count} SRCS records at {srcs}");
                for i in srcs..srcs.saturating_add(count) {
                    result = null_section(&result, i as usize)?;
                }
                put_u32(&mut rec0, SRCS_INDEX, NULL_INDEX)?;
                put_u32(&mut rec0, SRCS_COUNT, 0)?;
            }
        }

        let existing_asin = first_entry(&rec0, exth_tag::ASIN)?;
        if options.non_personal {
            rec0 = set_entry(&rec0, exth_tag::CDE_TYPE, EBOK)?;
            if existing_asin.is_none() {
                rec0 = add_entry(&rec0, exth_tag::ASIN, code)?;
            }
        }
        let asin = existing_asin.unwrap_or_else(|| code.to_vec());
        result = write_section(&result, 0, &rec0)?;

        // The compiler copies the legacy start-reading offset into the KF8
        // header, where it points at garbage.
        let kf_rec0 = keep_last(src.kf_rec0, exth_tag::START_READING)?;
        let base = read_u32(&rec0, FIRST_RESOURCE)?;
        let (mut result, mut kf_rec0) = self.reconcile_cover(result, kf_rec0, base)?;

        let existing_key = first_entry(&kf_rec0, exth_tag::CDE_CONTENT_KEY)?;
        let cde_type = if options.non_personal {
            kf_rec0 = set_entry(&kf_rec0, exth_tag::CDE_TYPE, EBOK)?;
            if existing_key.is_none() {
                kf_rec0 = add_entry(&kf_rec0, exth_tag::CDE_CONTENT_KEY, code)?;
            }
            EBOK
        } else {
            PDOC
        };
        result = write_section(&result, src.kf8, &kf_rec0)?;

        Ok(Stamped {
            container: result,
            asin,
            cde_key: existing_key.unwrap_or_else(|| code.to_vec()),
            cde_type,
        })
    }

    fn promote(&self, src: &Source<'_>, code: &[u8], options: &SplitOptions) -> Result<Stamped> {
        let first = read_index(src.rec0, FIRST_RESOURCE)?;
        let last = last_resource(src.rec0)?;
        let resources = match (first, last) {
            (Some(first), Some(last)) if last >= first => Some((first as usize, last as usize)),
            _ => None,
        };
        let count = resources.map_or(0, |(first, last)| (last - first + 1) as u32);
        let asin = first_entry(src.rec0, exth_tag::ASIN)?.unwrap_or_else(|| code.to_vec());

        let mut result = delete_section_range(src.data, 0, src.kf8 - 1)?;
        let target = read_u32(src.kf_rec0, FIRST_RESOURCE)?;
        if let Some((first, last)) = resources {
            debug!("Moving resources {first}..={last} in front of KF8 record {target}");
            result = insert_section_range(src.data, first, last, &result, target as usize)?;
        }

        let mut kf_rec0 = keep_last(read_section(&result, 0)?, exth_tag::START_READING)?;
        kf_rec0 = set_entry(&kf_rec0, exth_tag::RESOURCE_COUNT, &count.to_be_bytes())?;

        let flags = read_u32(&kf_rec0, EXTH_FLAGS)?;
        put_u32(&mut kf_rec0, EXTH_FLAGS, (flags & KF8_FLAG_MASK) | SHARED_RESOURCES_FLAG)?;

        for ofs in [KF8_FDST_INDEX, FCIS_INDEX, FLIS_INDEX, DATP_INDEX, HUFF_TABLE_OFFSET] {
            if let Some(n) = read_index(&kf_rec0, ofs)? {
                let shifted = n
                    .checked_add(count)
                    .ok_or_else(|| Error::bounds(format!("index {n} at {ofs} overflows")))?;
                put_u32(&mut kf_rec0, ofs, shifted)?;
            }
        }

        let (result, mut kf_rec0) = self.reconcile_cover(result, kf_rec0, target)?;

        let cde_type = if options.non_personal { EBOK } else { PDOC };
        kf_rec0 = set_entry(&kf_rec0, exth_tag::CDE_TYPE, cde_type)?;
        let cde_key = match first_entry(&kf_rec0, exth_tag::CDE_CONTENT_KEY)? {
            Some(key) => key,
            None => {
                kf_rec0 = add_entry(&kf_rec0, exth_tag::CDE_CONTENT_KEY, code)?;
                code.to_vec()
            }
        };
        if options.force_asin && first_entry(&kf_rec0, exth_tag::ASIN)?.is_none() {
            kf_rec0 = add_entry(&kf_rec0, exth_tag::ASIN, &cde_key)?;
        }

        Ok(Stamped {
            container: write_section(&result, 0, &kf_rec0)?,
            asin,
            cde_key,
            cde_type,
        })
    }

    /// Make sure the header names a thumbnail and that the thumbnail is
    /// usable, then point EXTH 129 at it. Image indices in the header are
    /// relative to `base`.
    fn reconcile_cover(
        &self,
        mut result: Vec<u8>,
        mut header: Vec<u8>,
        base: u32,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let Some(cover_rel) = exth::first_u32(&header, exth_tag::COVER_OFFSET)? else {
            return Ok((result, header));
        };
        let cover = offset_index(base, cover_rel)?;

        let thumb_rel = match exth::first_u32(&header, exth_tag::THUMB_OFFSET)? {
            Some(thumb_rel) => {
                let thumb = offset_index(base, thumb_rel)?;
                if let Some(jpeg) = self.regenerate_thumbnail(&result, cover, thumb)? {
                    result = write_section(&result, thumb, &jpeg)?;
                }
                thumb_rel
            }
            None => {
                // Last resort: use the cover as its own thumbnail.
                header = add_entry(&header, exth_tag::THUMB_OFFSET, &cover_rel.to_be_bytes())?;
                cover_rel
            }
        };

        if !exth::read_entries(&header, exth_tag::THUMBNAIL_URI)?.is_empty() {
            header = delete_entry(&header, exth_tag::THUMBNAIL_URI)?;
        }
        let uri = format!("kindle:embed:{}", to_radix32(u128::from(thumb_rel), 4, EMBED_DIGITS));
        header = add_entry(&header, exth_tag::THUMBNAIL_URI, uri.as_bytes())?;
        Ok((result, header))
    }

    fn regenerate_thumbnail(
        &self,
        data: &[u8],
        cover: usize,
        thumb: usize,
    ) -> Result<Option<Vec<u8>>> {
        let Some(renderer) = self.renderer else {
            return Ok(None);
        };
        if !is_undersized(read_section(data, thumb)?) {
            return Ok(None);
        }
        match render_jpeg(renderer, read_section(data, cover)?, THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT) {
            Ok(jpeg) => {
                debug!("Replacing undersized thumbnail at record {thumb}");
                Ok(Some(jpeg))
            }
            Err(err) => {
                warn!("Unable to render thumbnail from cover, keeping the embedded one: {err}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mobi::directory::{Directory, assemble_container};
    use crate::mobi::headers::TITLE_OFFSET;
    use crate::mobi::test_helpers::{ComboBook, Record0Builder, fake_jpeg, page_record};
    use crate::util::extract_image_dimensions;

    fn id() -> Identifier {
        "0f3a9c2e-1b4d-4e5f-8a6b-7c8d9e0f1a2b".parse().unwrap()
    }

    fn kf8_options() -> SplitOptions {
        SplitOptions::default().with_mode(SplitMode::Kf8)
    }

    fn record_count(data: &[u8]) -> usize {
        read_u16(data, NUMBER_OF_RECORDS).unwrap() as usize
    }

    fn entries(rec0: &[u8], tag: u32) -> Vec<Vec<u8>> {
        exth::read_entries(rec0, tag)
            .unwrap()
            .into_iter()
            .map(|v| v.to_vec())
            .collect()
    }

    fn title(rec0: &[u8], len: usize) -> &[u8] {
        let ofs = read_u32(rec0, TITLE_OFFSET).unwrap() as usize;
        &rec0[ofs..ofs + len]
    }

    fn stub_renderer(_: &[u8], w: u32, h: u32) -> Result<Vec<u8>> {
        Ok(fake_jpeg(w, h))
    }

    #[test]
    fn test_kf8_only_container_is_left_alone() {
        let rec0 = Record0Builder::new("KF8").version(8).build();
        let data = assemble_container("KF8", &[&rec0, b"text"]).unwrap();
        for options in [SplitOptions::default(), kf8_options()] {
            let out = Splitter::new().split(&data, &id(), &options).unwrap();
            assert_eq!(out.outcome, Outcome::NotApplicable(SkipReason::Kf8Only));
            assert_eq!(out.container, data);
            assert!(out.page_map.is_none());
        }
    }

    #[test]
    fn test_missing_kf8_part_is_left_alone() {
        let rec0 = Record0Builder::new("Old").build();
        let data = assemble_container("Old", &[&rec0, b"text"]).unwrap();
        let out = Splitter::new().split(&data, &id(), &kf8_options()).unwrap();
        assert_eq!(out.outcome, Outcome::NotApplicable(SkipReason::NoKf8Part));
        assert_eq!(out.container, data);

        let rec0 = Record0Builder::new("Old").without_exth().build();
        let data = assemble_container("Old", &[&rec0, b"text"]).unwrap();
        let out = Splitter::new().split(&data, &id(), &kf8_options()).unwrap();
        assert_eq!(out.outcome, Outcome::NotApplicable(SkipReason::NoMetadata));
    }

    #[test]
    fn test_short_kf8_header_is_left_alone() {
        let rec0 = Record0Builder::new("Short")
            .exth_u32(exth_tag::KF8_OFFSET, 2)
            .build();
        let data = assemble_container("Short", &[&rec0, b"text", b"tiny KF8 header"]).unwrap();
        let out = Splitter::new().split(&data, &id(), &kf8_options()).unwrap();
        assert_eq!(out.outcome, Outcome::NotApplicable(SkipReason::ShortKf8Header));
    }

    #[test]
    fn test_malformed_legacy_exth_is_format_error() {
        let book = ComboBook::default();
        let mut legacy = book.legacy_header();
        let base = ExthParams::read(&legacy).unwrap().base;
        legacy[base + 4..base + 8].copy_from_slice(&0x7000u32.to_be_bytes());
        let data = write_section(&book.build().unwrap(), 0, &legacy).unwrap();

        for options in [SplitOptions::default(), kf8_options()] {
            let err = Splitter::new().split(&data, &id(), &options).unwrap_err();
            assert!(matches!(err, Error::Format(_)));
        }
    }

    #[test]
    fn test_kf8_boundary_out_of_range() {
        let rec0 = Record0Builder::new("Broken")
            .exth_u32(exth_tag::KF8_OFFSET, 40)
            .build();
        let data = assemble_container("Broken", &[&rec0, b"text"]).unwrap();
        let err = Splitter::new().split(&data, &id(), &kf8_options()).unwrap_err();
        assert!(matches!(err, Error::Bounds(_)));
    }

    #[test]
    fn test_kf8_header_without_exth_is_format_error() {
        let book = ComboBook::default();
        let data = book.build().unwrap();
        let bare = Record0Builder::new("Combo_Book").version(8).without_exth().build();
        let data = write_section(&data, book.kf8_index(), &bare).unwrap();
        let err = Splitter::new().split(&data, &id(), &kf8_options()).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_promote_scenario() {
        // N=10, KF8 at 5, three start-reading entries
        let book = ComboBook::default();
        let data = book.build().unwrap();
        assert_eq!(record_count(&data), 10);
        assert_eq!(book.kf8_index(), 5);

        let options = kf8_options().with_force_asin(true);
        let out = Splitter::new().split(&data, &id(), &options).unwrap();
        assert!(out.is_rewritten());
        let result = &out.container;

        // 5 legacy records gone, 2 images in
        assert_eq!(record_count(result), 7);
        assert_eq!(read_u32(result, 68).unwrap(), 15);
        let dir = Directory::parse(result).unwrap();
        for (i, e) in dir.entries().iter().enumerate() {
            assert_eq!(e.attributes, 2 * i as u32);
        }

        let rec0 = read_section(result, 0).unwrap();
        assert_eq!(read_u32(rec0, MOBI_VERSION).unwrap(), 8);
        assert_eq!(title(rec0, 10), b"Combo_Book");
        assert_eq!(read_section(result, 1).unwrap(), b"kf8 text");
        assert_eq!(read_section(result, 2).unwrap(), book.cover());
        assert_eq!(read_section(result, 3).unwrap(), book.thumbnail().unwrap());
        assert!(read_section(result, 4).unwrap().starts_with(b"FDST"));
        assert!(read_section(result, 5).unwrap().starts_with(b"PAGE"));

        assert_eq!(entries(rec0, exth_tag::START_READING), vec![30u32.to_be_bytes().to_vec()]);
        assert_eq!(exth::first_u32(rec0, exth_tag::RESOURCE_COUNT).unwrap(), Some(2));
        assert_eq!(read_u32(rec0, EXTH_FLAGS).unwrap(), 0x1850);
        assert_eq!(read_index(rec0, KF8_FDST_INDEX).unwrap(), Some(4));
        assert_eq!(read_index(rec0, FCIS_INDEX).unwrap(), None);
        assert_eq!(entries(rec0, exth_tag::THUMBNAIL_URI), vec![b"kindle:embed:0001".to_vec()]);
        assert_eq!(entries(rec0, exth_tag::CDE_TYPE), vec![b"PDOC".to_vec()]);

        let code = id().content_code().into_bytes();
        assert_eq!(entries(rec0, exth_tag::CDE_CONTENT_KEY), vec![code.clone()]);
        assert_eq!(entries(rec0, exth_tag::ASIN), vec![code]);
    }

    #[test]
    fn test_promote_removes_duplicate_start_reading_entries() {
        let book = ComboBook::default();
        let header = book.kf8_header();
        let trimmed = keep_last(&header, exth_tag::START_READING).unwrap();
        assert_eq!(
            read_u32(&trimmed, TITLE_OFFSET).unwrap(),
            read_u32(&header, TITLE_OFFSET).unwrap() - 2 * 12
        );
    }

    #[test]
    fn test_promote_with_explicit_last_content() {
        let book = ComboBook {
            thumb: None,
            last_content: Some(2),
            ..Default::default()
        };
        let data = book.build().unwrap();
        let out = Splitter::new().split(&data, &id(), &kf8_options()).unwrap();
        let result = &out.container;
        let rec0 = read_section(result, 0).unwrap();

        assert_eq!(record_count(result), record_count(&data) - book.kf8_index() + 1);
        assert_eq!(read_section(result, 2).unwrap(), book.cover());
        assert_eq!(exth::first_u32(rec0, exth_tag::RESOURCE_COUNT).unwrap(), Some(1));
        // The cover doubles as thumbnail.
        assert_eq!(exth::first_u32(rec0, exth_tag::THUMB_OFFSET).unwrap(), Some(0));
        assert_eq!(entries(rec0, exth_tag::THUMBNAIL_URI), vec![b"kindle:embed:0000".to_vec()]);
        assert!(entries(rec0, exth_tag::ASIN).is_empty());
    }

    #[test]
    fn test_promote_keeps_existing_identity() {
        let book = ComboBook {
            kf8_exth: vec![
                (exth_tag::CDE_CONTENT_KEY, b"KEY123".to_vec()),
                (exth_tag::THUMBNAIL_URI, b"kindle:embed:XXXX".to_vec()),
            ],
            ..Default::default()
        };
        let data = book.build().unwrap();
        let options = kf8_options().with_non_personal(true).with_force_asin(true);
        let out = Splitter::new().split(&data, &id(), &options).unwrap();
        let rec0 = read_section(&out.container, 0).unwrap();

        assert_eq!(entries(rec0, exth_tag::CDE_CONTENT_KEY), vec![b"KEY123".to_vec()]);
        assert_eq!(entries(rec0, exth_tag::ASIN), vec![b"KEY123".to_vec()]);
        assert_eq!(entries(rec0, exth_tag::CDE_TYPE), vec![b"EBOK".to_vec()]);
        assert_eq!(entries(rec0, exth_tag::THUMBNAIL_URI), vec![b"kindle:embed:0001".to_vec()]);

        let apnx = String::from_utf8_lossy(out.page_map.as_deref().unwrap()).into_owned();
        assert!(apnx.contains(r#""asin":"KEY123","cdeType":"EBOK","format":"MOBI_8""#));
        assert!(apnx.contains(r#""acr":"Combo_Book""#));
    }

    #[test]
    fn test_promote_regenerates_small_thumbnail() {
        let book = ComboBook::default();
        let data = book.build().unwrap();
        let renderer = stub_renderer;
        let out = Splitter::with_renderer(&renderer)
            .split(&data, &id(), &kf8_options())
            .unwrap();
        let thumb = read_section(&out.container, 3).unwrap();
        assert_eq!(&thumb[2..4], &[0xFF, 0xE0]);
        assert_eq!(extract_image_dimensions(thumb), Some((330, 470)));
        // Everything after the thumbnail moved but stayed intact.
        assert!(read_section(&out.container, 4).unwrap().starts_with(b"FDST"));
    }

    #[test]
    fn test_large_thumbnail_is_kept() {
        let book = ComboBook {
            thumb: Some((330, 470)),
            ..Default::default()
        };
        let data = book.build().unwrap();
        let renderer = stub_renderer;
        let out = Splitter::with_renderer(&renderer)
            .split(&data, &id(), &kf8_options())
            .unwrap();
        assert_eq!(read_section(&out.container, 3).unwrap(), book.thumbnail().unwrap());
    }

    #[test]
    fn test_renderer_failure_keeps_thumbnail() {
        let book = ComboBook::default();
        let data = book.build().unwrap();
        let failing =
            |_: &[u8], _: u32, _: u32| -> Result<Vec<u8>> { Err(Error::Format("bad jpeg".into())) };
        let out = Splitter::with_renderer(&failing)
            .split(&data, &id(), &SplitOptions::default())
            .unwrap();
        assert!(out.is_rewritten());
        assert_eq!(read_section(&out.container, 3).unwrap(), book.thumbnail().unwrap());
    }

    #[test]
    fn test_combo_non_personal() {
        let book = ComboBook {
            srcs: true,
            ..Default::default()
        };
        let data = book.build().unwrap();
        let srcs = book.srcs_index().unwrap();
        let options = SplitOptions::default().with_non_personal(true);
        let out = Splitter::new().split(&data, &id(), &options).unwrap();
        let result = &out.container;
        let code = id().content_code().into_bytes();

        assert_eq!(record_count(result), record_count(&data));
        assert!(read_section(result, srcs).unwrap().is_empty());
        assert_eq!(read_section(result, srcs + 1).unwrap(), b"BOUNDARY");

        let rec0 = read_section(result, 0).unwrap();
        assert_eq!(read_u32(rec0, SRCS_INDEX).unwrap(), NULL_INDEX);
        assert_eq!(read_u32(rec0, SRCS_COUNT).unwrap(), 0);
        assert_eq!(entries(rec0, exth_tag::CDE_TYPE), vec![b"EBOK".to_vec()]);
        assert_eq!(entries(rec0, exth_tag::ASIN), vec![code.clone()]);
        assert_eq!(title(rec0, 10), b"Combo_Book");

        let kf = read_section(result, book.kf8_index()).unwrap();
        assert_eq!(entries(kf, exth_tag::START_READING), vec![30u32.to_be_bytes().to_vec()]);
        assert_eq!(entries(kf, exth_tag::CDE_TYPE), vec![b"EBOK".to_vec()]);
        assert_eq!(entries(kf, exth_tag::CDE_CONTENT_KEY), vec![code]);
        assert_eq!(entries(kf, exth_tag::THUMBNAIL_URI), vec![b"kindle:embed:0001".to_vec()]);
        assert_eq!(title(kf, 10), b"Combo_Book");

        // Records outside the two headers and the sources are untouched.
        assert_eq!(read_section(result, 2).unwrap(), book.cover());
        assert!(read_section(result, book.kf8_index() + 2).unwrap().starts_with(b"FDST"));
    }

    #[test]
    fn test_combo_personal_keeps_identity_entries_out() {
        let book = ComboBook::default();
        let data = book.build().unwrap();
        let out = Splitter::new().split(&data, &id(), &SplitOptions::default()).unwrap();
        let rec0 = read_section(&out.container, 0).unwrap();
        assert!(entries(rec0, exth_tag::CDE_TYPE).is_empty());
        assert!(entries(rec0, exth_tag::ASIN).is_empty());

        let kf = read_section(&out.container, book.kf8_index()).unwrap();
        assert!(entries(kf, exth_tag::CDE_CONTENT_KEY).is_empty());

        let apnx = String::from_utf8_lossy(out.page_map.as_deref().unwrap()).into_owned();
        let code = id().content_code();
        assert!(apnx.contains(&format!(
            r#"{{"contentGuid":"0f3a9c2e","asin":"{code}","cdeType":"PDOC","fileRevisionId":"1"}}"#
        )));
        assert!(!apnx.contains("MOBI_8"));
    }

    #[test]
    fn test_explicit_asin_replaces_derived_code() {
        let book = ComboBook::default();
        let data = book.build().unwrap();
        let options = SplitOptions::default()
            .with_non_personal(true)
            .with_asin(Some("B00GIVEN"));
        let out = Splitter::new().split(&data, &id(), &options).unwrap();
        let rec0 = read_section(&out.container, 0).unwrap();
        assert_eq!(entries(rec0, exth_tag::ASIN), vec![b"B00GIVEN".to_vec()]);
    }

    #[test]
    fn test_no_page_map_still_produces_container() {
        let book = ComboBook {
            page_map: None,
            ..Default::default()
        };
        let data = book.build().unwrap();
        let out = Splitter::new().split(&data, &id(), &kf8_options()).unwrap();
        assert!(out.is_rewritten());
        assert!(out.page_map.is_none());
    }

    #[test]
    fn test_unsupported_page_map_is_skipped() {
        let book = ComboBook {
            page_map: Some(page_record(3, r#"{"pageMap":"(1,a,1)"}"#, 32, &[0])),
            ..Default::default()
        };
        let data = book.build().unwrap();
        let out = Splitter::new().split(&data, &id(), &kf8_options()).unwrap();
        assert!(out.is_rewritten());
        assert!(out.page_map.is_none());
    }

    #[test]
    fn test_last_resource_inference() {
        let rec0 = Record0Builder::new("T")
            .field_u32(FCIS_INDEX, 9)
            .field_u32(FLIS_INDEX, 7)
            .field_u32(DATP_INDEX, 12)
            .build();
        assert_eq!(last_resource(&rec0).unwrap(), Some(6));

        let rec0 = Record0Builder::new("T").build();
        assert_eq!(last_resource(&rec0).unwrap(), None);

        let rec0 = Record0Builder::new("T").field_u16(LAST_CONTENT_INDEX, 4).build();
        assert_eq!(last_resource(&rec0).unwrap(), Some(4));
    }
}
