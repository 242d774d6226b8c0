//! The 16-byte book identifier that seeds ASINs, content keys and APNX GUIDs.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::util::{CONTENT_CODE_DIGITS, to_radix32};

/// A 128-bit book identifier, usually the UUID the source document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Identifier([u8; 16]);

impl Identifier {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Derive a stable identifier from arbitrary content, for books that
    /// arrive without one.
    pub fn from_content(data: &[u8]) -> Self {
        let digest = sha1_smol::Sha1::from(data).digest().bytes();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// First eight lowercase hex digits, used as the APNX `contentGuid`.
    pub fn content_guid(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }

    /// The identifier's value in base 32, at least ten digits. Stands in for
    /// an ASIN or content key when the book has none.
    pub fn content_code(&self) -> String {
        to_radix32(u128::from_be_bytes(self.0), 10, CONTENT_CODE_DIGITS)
    }
}

impl FromStr for Identifier {
    type Err = Error;

    /// Accepts 32 hex digits, with or without the usual UUID dashes.
    fn from_str(s: &str) -> Result<Self> {
        let hex: Vec<u8> = s.bytes().filter(|&b| b != b'-').collect();
        if hex.len() != 32 {
            return Err(Error::format(format!("identifier {s:?} is not 32 hex digits")));
        }
        let mut bytes = [0u8; 16];
        for (i, pair) in hex.chunks_exact(2).enumerate() {
            let digit = |c: u8| {
                char::from(c)
                    .to_digit(16)
                    .ok_or_else(|| Error::format(format!("identifier {s:?} has non-hex digit")))
            };
            bytes[i] = (digit(pair[0])? * 16 + digit(pair[1])?) as u8;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}
