//! The `PAGE` record kindlegen leaves in its output and the APNX sidecar
//! derived from it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::directory::Directory;
use super::headers::{read_u16, read_u32};

const PAGE_MAGIC: &[u8; 4] = b"PAGE";
const VERSION_OFFSET: usize = 0x0A;
const REVISION_LENGTH_OFFSET: usize = 0x10;
const REVISION_OFFSET: usize = 0x14;

/// Page-map JSON as kindlegen writes it.
#[derive(Debug, Deserialize)]
struct PageMapJson {
    #[serde(default)]
    description: String,
    #[serde(rename = "pageMap")]
    page_map: String,
}

/// A parsed page map: the page label description and one text offset per page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMap {
    pub description: String,
    pub page_map: String,
    pub offsets: Vec<u32>,
}

/// Identity block at the head of an APNX file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentHeader {
    pub content_guid: String,
    pub asin: String,
    pub cde_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub file_revision_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
}

impl ContentHeader {
    /// Header for a combo (MOBI 7 + KF8) book.
    pub fn combo(content_guid: &str, asin: &str, cde_type: &str) -> Self {
        Self {
            content_guid: content_guid.to_owned(),
            asin: asin.to_owned(),
            cde_type: cde_type.to_owned(),
            format: None,
            file_revision_id: "1".to_owned(),
            acr: None,
        }
    }

    /// Header for a KF8-only book, which also names the format and the ACR.
    pub fn kf8(content_guid: &str, asin: &str, cde_type: &str, acr: &str) -> Self {
        Self {
            format: Some("MOBI_8".to_owned()),
            acr: Some(acr.to_owned()),
            ..Self::combo(content_guid, asin, cde_type)
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageHeader<'a> {
    asin: &'a str,
    page_map: &'a str,
}

impl PageMap {
    /// The last record from `first_non_text` on that starts with `"PAGE"`.
    pub fn find(data: &[u8], first_non_text: Option<u32>) -> Option<&[u8]> {
        let first = first_non_text? as usize;
        let dir = Directory::parse(data).ok()?;
        (first..dir.len())
            .filter_map(|i| dir.record(i, data.len()).ok()?.slice(data).ok())
            .filter(|record| record.starts_with(PAGE_MAGIC))
            .last()
    }

    pub fn parse(record: &[u8]) -> Result<Self> {
        if !record.starts_with(PAGE_MAGIC) {
            return Err(Error::format("page map record lacks PAGE magic"));
        }
        let version = read_u16(record, VERSION_OFFSET).map_err(truncated)? as usize;
        // Version 2 carries one extra word before the revision string.
        if !matches!(version, 1 | 2) {
            return Err(Error::format(format!("unsupported page map version {version}")));
        }
        let extra = (version - 1) * 4;
        let revision_len = read_u32(record, REVISION_LENGTH_OFFSET + extra).map_err(truncated)?;
        let ofs = (REVISION_OFFSET + extra)
            .checked_add(revision_len as usize)
            .ok_or_else(|| Error::format("page map revision length overflows"))?;

        let json_len = read_u16(record, ofs + 2).map_err(truncated)? as usize;
        let count = read_u16(record, ofs + 4).map_err(truncated)? as usize;
        let bits = read_u16(record, ofs + 6).map_err(truncated)?;
        let width = match bits {
            16 => 2,
            32 => 4,
            other => {
                return Err(Error::format(format!("unsupported page offset width {other}")));
            }
        };

        let json_start = ofs + 8;
        let json = record
            .get(json_start..json_start + json_len)
            .ok_or_else(|| Error::format("page map JSON runs past the record"))?;
        let table = json_start + json_len;
        let offsets = (0..count)
            .map(|i| {
                let at = table + i * width;
                if width == 2 {
                    read_u16(record, at).map(u32::from)
                } else {
                    read_u32(record, at)
                }
                .map_err(truncated)
            })
            .collect::<Result<Vec<_>>>()?;

        let parsed: PageMapJson = serde_json::from_slice(json)?;
        Ok(Self {
            description: parsed.description,
            page_map: parsed.page_map,
            offsets,
        })
    }

    /// Serialize as an APNX file. Offsets are always written 32 bits wide.
    pub fn to_apnx(&self, content: &ContentHeader) -> Result<Vec<u8>> {
        let content_json = serde_json::to_vec(content)?;
        let page_json = serde_json::to_vec(&PageHeader {
            asin: &content.asin,
            page_map: &self.page_map,
        })?;

        let content_len = u32::try_from(content_json.len())
            .map_err(|_| Error::bounds("APNX content header too long"))?;
        let page_len = u16::try_from(page_json.len())
            .map_err(|_| Error::bounds("APNX page header too long"))?;
        let count = u16::try_from(self.offsets.len()).map_err(|_| {
            Error::bounds(format!("{} pages exceed the APNX limit", self.offsets.len()))
        })?;

        let mut apnx = Vec::with_capacity(
            20 + content_json.len() + page_json.len() + 4 * self.offsets.len(),
        );
        apnx.extend_from_slice(&1u16.to_be_bytes());
        apnx.extend_from_slice(&1u16.to_be_bytes());
        apnx.extend_from_slice(&(12 + content_len).to_be_bytes());
        apnx.extend_from_slice(&content_len.to_be_bytes());
        apnx.extend_from_slice(&content_json);

        apnx.extend_from_slice(&1u16.to_be_bytes());
        apnx.extend_from_slice(&page_len.to_be_bytes());
        apnx.extend_from_slice(&count.to_be_bytes());
        apnx.extend_from_slice(&32u16.to_be_bytes());
        apnx.extend_from_slice(&page_json);
        for offset in &self.offsets {
            apnx.extend_from_slice(&offset.to_be_bytes());
        }
        Ok(apnx)
    }
}

fn truncated(_: Error) -> Error {
    Error::format("page map record is truncated")
}
