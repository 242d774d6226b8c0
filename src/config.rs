//! Options for a split run.
//!
//! `SplitOptions` mirrors the `kindlegen` section of the converter's
//! configuration file, so the same JSON can drive both:
//!
//! ```json
//! { "remove_personal_label": true, "generate_apnx": "eink", "force_asin_on_azw3": false }
//! ```
//!
//! Anything not present falls back to [`SplitOptions::default`]. Options are
//! never read from the environment.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which device format the compiler output is turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Keep both parts in one `.mobi`, cleaned for sideloading.
    #[default]
    Combo,
    /// Promote the KF8 part into a standalone `.azw3`.
    Kf8,
}

impl SplitMode {
    /// `Kf8` for `.azw3` targets, `Combo` for everything else.
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("azw3") => SplitMode::Kf8,
            _ => SplitMode::Combo,
        }
    }
}

impl FromStr for SplitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "combo" | "mobi" => Ok(SplitMode::Combo),
            "kf8" | "azw3" => Ok(SplitMode::Kf8),
            other => Err(Error::format(format!("unknown split mode {other:?}"))),
        }
    }
}

/// Where, if anywhere, the APNX sidecar goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageMapMode {
    #[default]
    None,
    /// Inside `<book>.sdr/`, where e-ink readers look for it.
    Eink,
    /// Next to the book, for the reading apps.
    App,
}

impl FromStr for PageMapMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(PageMapMode::None),
            "eink" => Ok(PageMapMode::Eink),
            "app" => Ok(PageMapMode::App),
            other => Err(Error::format(format!("unknown page map mode {other:?}"))),
        }
    }
}

impl fmt::Display for PageMapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PageMapMode::None => "none",
            PageMapMode::Eink => "eink",
            PageMapMode::App => "app",
        })
    }
}

/// Tunables for [`Splitter::split`](crate::Splitter::split).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitOptions {
    pub mode: SplitMode,

    /// Stamp the book as a store book (`EBOK`) so devices drop the
    /// "personal" label.
    #[serde(rename = "remove_personal_label")]
    pub non_personal: bool,

    /// Give KF8 output an ASIN even when the source had none.
    #[serde(rename = "force_asin_on_azw3")]
    pub force_asin: bool,

    #[serde(rename = "generate_apnx")]
    pub page_map: PageMapMode,

    /// Use this instead of the identifier-derived code for ASIN and content key.
    pub asin: Option<String>,
}

impl SplitOptions {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn with_mode(mut self, mode: SplitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_non_personal(mut self, on: bool) -> Self {
        self.non_personal = on;
        self
    }

    pub fn with_force_asin(mut self, on: bool) -> Self {
        self.force_asin = on;
        self
    }

    pub fn with_page_map(mut self, mode: PageMapMode) -> Self {
        self.page_map = mode;
        self
    }

    pub fn with_asin<S: Into<String>>(mut self, asin: Option<S>) -> Self {
        self.asin = asin.map(Into::into).filter(|s: &String| !s.is_empty());
        self
    }
}
