//! Cover thumbnails: the pluggable renderer, JFIF density stamping and the
//! standalone extractor that produces `system/thumbnails` images for devices.

use std::fs;
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use log::debug;

use crate::error::{Error, Result};
use crate::util::extract_image_dimensions;

use super::exth::{self, has_exth};
use super::headers::{CRYPTO_TYPE, FIRST_RESOURCE, NULL_INDEX, exth_tag, read_u16, read_u32};
use super::section::read_section;

/// Device thumbnail bounds.
pub const THUMBNAIL_WIDTH: u32 = 330;
pub const THUMBNAIL_HEIGHT: u32 = 470;

/// Density written into the JFIF APP0 segment of generated thumbnails.
pub const THUMBNAIL_DPI: u16 = 300;

const APP0_MARKER: [u8; 2] = [0xFF, 0xE0];
// "JFIF\0" followed by version 1.02
const JFIF_IDENT: [u8; 7] = [0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x02];
const DENSITY_PX_PER_INCH: u8 = 1;

/// Decodes an image and re-encodes it as a JPEG that fits the given box,
/// keeping the aspect ratio.
///
/// Image processing lives outside this crate; callers plug in whatever codec
/// they use. Closures with the same signature implement the trait.
pub trait ThumbnailRenderer {
    fn render(&self, image: &[u8], max_width: u32, max_height: u32) -> Result<Vec<u8>>;
}

impl<F> ThumbnailRenderer for F
where
    F: Fn(&[u8], u32, u32) -> Result<Vec<u8>>,
{
    fn render(&self, image: &[u8], max_width: u32, max_height: u32) -> Result<Vec<u8>> {
        self(image, max_width, max_height)
    }
}

/// Insert a JFIF APP0 segment carrying `dpi` right after SOI, unless the
/// image already starts with an APP0 segment. Returns whether one was added.
pub fn ensure_jfif(jpeg: Vec<u8>, dpi: u16) -> (Vec<u8>, bool) {
    if jpeg.len() < 4 || jpeg[..2] != [0xFF, 0xD8] || jpeg[2..4] == APP0_MARKER {
        return (jpeg, false);
    }

    let mut out = Vec::with_capacity(jpeg.len() + 18);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&APP0_MARKER);
    out.extend_from_slice(&0x10u16.to_be_bytes());
    out.extend_from_slice(&JFIF_IDENT);
    out.push(DENSITY_PX_PER_INCH);
    out.extend_from_slice(&dpi.to_be_bytes());
    out.extend_from_slice(&dpi.to_be_bytes());
    // no embedded preview
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&jpeg[2..]);
    (out, true)
}

/// A thumbnail is too small for the device when its size cannot be read or
/// it is smaller than the device bounds in both directions.
pub fn is_undersized(image: &[u8]) -> bool {
    match extract_image_dimensions(image) {
        Some((w, h)) => w < THUMBNAIL_WIDTH && h < THUMBNAIL_HEIGHT,
        None => true,
    }
}

/// Render `image` into the box and stamp the JFIF density.
pub(crate) fn render_jpeg(
    renderer: &dyn ThumbnailRenderer,
    image: &[u8],
    max_width: u32,
    max_height: u32,
) -> Result<Vec<u8>> {
    let jpeg = renderer.render(image, max_width, max_height)?;
    let (jpeg, added) = ensure_jfif(jpeg, THUMBNAIL_DPI);
    if added {
        debug!("Inserted JFIF APP0 segment into thumbnail");
    }
    Ok(jpeg)
}

/// Size of thumbnails produced by [`extract_thumbnail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailRequest {
    pub width: u32,
    pub height: u32,
    /// Always regenerate from the cover, even when the embedded thumbnail
    /// is already large enough.
    pub stretch: bool,
}

impl Default for ThumbnailRequest {
    fn default() -> Self {
        Self {
            width: THUMBNAIL_WIDTH,
            height: THUMBNAIL_HEIGHT,
            stretch: false,
        }
    }
}

/// A device thumbnail ready to be written into `system/thumbnails`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// Content key when the book has one, ASIN otherwise.
    pub asin: String,
    pub cde_type: String,
    pub jpeg: Vec<u8>,
}

impl Thumbnail {
    pub fn file_name(&self) -> String {
        format!("thumbnail_{}_{}_portrait.jpg", self.asin, self.cde_type)
    }

    /// Write the image into `dir`, replacing any previous thumbnail of the book.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.file_name());
        if path.exists() {
            debug!("Overwriting existing thumbnail {}", path.display());
        }
        fs::write(&path, &self.jpeg)?;
        Ok(path)
    }
}

#[derive(Debug, Default)]
struct Identity {
    asin: Vec<u8>,
    cde_type: Vec<u8>,
    cde_key: Vec<u8>,
}

impl Identity {
    /// Overlay whatever identity entries `rec0` carries.
    fn absorb(&mut self, rec0: &[u8]) -> Result<()> {
        let pick = |tag| -> Result<Option<Vec<u8>>> {
            Ok(exth::read_entries(rec0, tag)?.first().map(|v| v.to_vec()))
        };
        if let Some(v) = pick(exth_tag::ASIN)? {
            self.asin = v;
        }
        if let Some(v) = pick(exth_tag::CDE_TYPE)? {
            self.cde_type = v;
        }
        if let Some(v) = pick(exth_tag::CDE_CONTENT_KEY)? {
            self.cde_key = v;
        }
        Ok(())
    }

    fn key(&self) -> &[u8] {
        if self.cde_key.is_empty() {
            &self.asin
        } else {
            &self.cde_key
        }
    }
}

fn image_index(rec0: &[u8], first_image: u32, tag: u32) -> Result<Option<usize>> {
    Ok(exth::first_u32(rec0, tag)?
        .and_then(|rel| first_image.checked_add(rel))
        .map(|i| i as usize))
}

/// Produce a device thumbnail for a finished book.
///
/// An embedded thumbnail larger than the request is re-encoded as is;
/// otherwise the cover is rendered down to the requested size. Encrypted
/// books, books without an identity and books without a cover yield `None`.
pub fn extract_thumbnail(
    data: &[u8],
    request: &ThumbnailRequest,
    renderer: &dyn ThumbnailRenderer,
) -> Result<Option<Thumbnail>> {
    let rec0 = read_section(data, 0)?;
    if read_u16(rec0, CRYPTO_TYPE)? != 0 {
        debug!("Encrypted book, no thumbnail");
        return Ok(None);
    }
    if !has_exth(rec0) {
        debug!("Book has no EXTH metadata, no thumbnail");
        return Ok(None);
    }

    let mut identity = Identity::default();
    identity.absorb(rec0)?;

    let jpeg = cover_jpeg(data, rec0, request, renderer)?;

    // KF8 metadata wins in combo files
    if let Some(kf8) = exth::first_u32(rec0, exth_tag::KF8_OFFSET)?.filter(|&k| k != NULL_INDEX) {
        match read_section(data, kf8 as usize) {
            Ok(kf_rec0) if has_exth(kf_rec0) => identity.absorb(kf_rec0)?,
            _ => debug!("KF8 header at record {kf8} is unusable, keeping legacy identity"),
        }
    }

    let Some(jpeg) = jpeg else {
        debug!("Nothing to save, no cover or thumbnail extracted");
        return Ok(None);
    };
    if identity.key().is_empty() {
        debug!("Nothing to save, book has no ASIN");
        return Ok(None);
    }

    Ok(Some(Thumbnail {
        asin: identity.key().to_str_lossy().into_owned(),
        cde_type: identity.cde_type.to_str_lossy().into_owned(),
        jpeg,
    }))
}

fn cover_jpeg(
    data: &[u8],
    rec0: &[u8],
    request: &ThumbnailRequest,
    renderer: &dyn ThumbnailRenderer,
) -> Result<Option<Vec<u8>>> {
    let first_image = read_u32(rec0, FIRST_RESOURCE)?;
    let Some(cover) = image_index(rec0, first_image, exth_tag::COVER_OFFSET)? else {
        return Ok(None);
    };

    let oversized_thumb = match image_index(rec0, first_image, exth_tag::THUMB_OFFSET)? {
        Some(thumb) if !request.stretch => read_section(data, thumb)
            .ok()
            .and_then(|img| extract_image_dimensions(img).map(|dims| (img, dims)))
            .filter(|&(_, (w, h))| w > request.width || h > request.height),
        _ => None,
    };

    let rendered = match oversized_thumb {
        Some((img, (w, h))) => render_jpeg(renderer, img, w, h),
        None => {
            let image = read_section(data, cover)?;
            render_jpeg(renderer, image, request.width, request.height)
        }
    };
    match rendered {
        Ok(jpeg) => Ok(Some(jpeg)),
        Err(err @ (Error::Bounds(_) | Error::Format(_))) => {
            debug!("Unable to produce thumbnail: {err}");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
