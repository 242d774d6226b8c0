//! Small encoding helpers shared by the splitter, the page-map writer and the
//! thumbnail code.

/// Digits used for content codes derived from a book identifier.
pub const CONTENT_CODE_DIGITS: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Digits used by `kindle:embed:` references, which readers decode as plain base 32.
pub const EMBED_DIGITS: &[u8; 32] = b"0123456789ABCDEFGHIJKLMNOPQRSTUV";

/// Characters kept verbatim when deriving the ACR from a database name.
const ACR_ALPHABET: &[u8] = b"- ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Encode `value` in base 32 with the given digit table, left-padded with
/// `'0'` to at least `min_digits`.
///
/// # Examples
///
/// ```
/// use mobisplit::util::{to_radix32, EMBED_DIGITS};
///
/// assert_eq!(to_radix32(33, 4, EMBED_DIGITS), "0011");
/// assert_eq!(to_radix32(0, 4, EMBED_DIGITS), "0000");
/// ```
pub fn to_radix32(mut value: u128, min_digits: usize, digits: &[u8; 32]) -> String {
    let mut out = Vec::with_capacity(min_digits.max(26));
    while value > 0 {
        out.push(digits[(value % 32) as usize]);
        value /= 32;
    }
    while out.len() < min_digits {
        out.push(b'0');
    }
    out.reverse();
    // Every byte comes from an ASCII digit table.
    out.into_iter().map(char::from).collect()
}

/// Turn the 32-byte PDB database name into the ACR string used in APNX headers.
///
/// NUL bytes are dropped; anything outside `ACR_ALPHABET` becomes `_`.
pub fn sanitize_acr(name: &[u8]) -> String {
    name.iter()
        .filter(|&&b| b != 0)
        .map(|&b| {
            if ACR_ALPHABET.contains(&b) {
                char::from(b)
            } else {
                '_'
            }
        })
        .collect()
}

// ============================================================================
// Image Dimension Extraction
// ============================================================================

/// Extract image dimensions from raw image data.
///
/// Supports PNG, JPEG, and GIF formats by parsing header bytes.
/// Returns `(width, height)` or `None` if format is unrecognized.
pub fn extract_image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 24 {
        return None;
    }

    // PNG: width/height at bytes 16-23 in IHDR chunk
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
        let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        return Some((width, height));
    }

    // JPEG: Need to parse SOF markers
    if data.starts_with(&[0xFF, 0xD8]) {
        return extract_jpeg_dimensions(data);
    }

    // GIF: width/height at bytes 6-9 (little-endian)
    if data.starts_with(b"GIF") {
        let width = u16::from_le_bytes([data[6], data[7]]) as u32;
        let height = u16::from_le_bytes([data[8], data[9]]) as u32;
        return Some((width, height));
    }

    None
}

/// Extract dimensions from JPEG data by parsing SOF markers.
fn extract_jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 4 < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }

        let marker = data[i + 1];

        // SOF markers, excluding DHT (C4), JPG (C8) and DAC (CC)
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof && i + 9 < data.len() {
            let height = u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32;
            let width = u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32;
            return Some((width, height));
        }

        let length = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        i += 2 + length;
    }
    None
}
