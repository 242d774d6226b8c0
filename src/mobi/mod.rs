//! PDB container editing for MOBI and KF8 books.

pub mod directory;
pub mod exth;
pub mod headers;
pub mod pagemap;
pub(crate) mod region;
pub mod section;
pub mod splitter;
pub mod test_helpers;
pub mod thumbnail;

pub use directory::{DirEntry, Directory, assemble_container, record_bounds};
pub use pagemap::{ContentHeader, PageMap};
pub use section::{
    delete_section_range, insert_section_range, null_section, read_section, write_section,
};
pub use splitter::{Outcome, SkipReason, SplitOutput, Splitter};
pub use thumbnail::{Thumbnail, ThumbnailRenderer, ThumbnailRequest, extract_thumbnail};
