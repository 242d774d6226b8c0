//! # mobisplit
//!
//! Rewrites kindlegen output into device-ready books.
//!
//! kindlegen produces a combo container holding a legacy MOBI part and a
//! KF8 part. This crate edits that container directly, record by record:
//!
//! - keep both parts and clean them up for sideloading (`.mobi`)
//! - promote the KF8 part to a standalone book (`.azw3`)
//! - derive the APNX page map sidecar from the compiler's `PAGE` record
//! - produce device thumbnails for finished books
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use mobisplit::{Identifier, PageMapMode, SplitMode, SplitOptions, Splitter};
//!
//! let data = std::fs::read("kindlegen-output.mobi").unwrap();
//! let id: Identifier = "0f3a9c2e-1b4d-4e5f-8a6b-7c8d9e0f1a2b".parse().unwrap();
//! let options = SplitOptions::default()
//!     .with_mode(SplitMode::Kf8)
//!     .with_page_map(PageMapMode::Eink);
//!
//! let out = Splitter::new().split(&data, &id, &options).unwrap();
//! out.save_result(Path::new("book.azw3")).unwrap();
//! out.save_page_map(Path::new("book.azw3"), options.page_map).unwrap();
//! ```
//!
//! ## Working with Records
//!
//! The editing primitives in [`mobi`] take a container and return a new one:
//!
//! ```
//! use mobisplit::mobi::{assemble_container, read_section, write_section};
//!
//! let data = assemble_container("Sample", &[b"header", b"text"]).unwrap();
//! let data = write_section(&data, 1, b"longer text").unwrap();
//! assert_eq!(read_section(&data, 1).unwrap(), b"longer text");
//! ```

pub mod config;
pub mod error;
pub mod identifier;
pub mod kindlegen;
pub mod mobi;
pub mod util;

pub use config::{PageMapMode, SplitMode, SplitOptions};
pub use error::{Error, Result};
pub use identifier::Identifier;
pub use kindlegen::CompilerStatus;
pub use mobi::{Outcome, SkipReason, SplitOutput, Splitter, ThumbnailRenderer};
