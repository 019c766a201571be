//! Types shared by the three structural tree walkers (`bmff`, `ebml`, `riff`).

use thiserror::Error;

use crate::source::SourceError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("Truncated header at offset {offset}")]
    Truncated { offset: u64 },
    #[error("Element at offset {offset} declares {declared} bytes but only {remaining} remain")]
    SizeOverflow {
        offset: u64,
        declared: u64,
        remaining: u64,
    },
    #[error("Invalid size field at offset {offset}")]
    InvalidSize { offset: u64 },
    #[error("Invalid variable-length integer at offset {offset}")]
    InvalidVint { offset: u64 },
    #[error("Source read failed: {0}")]
    Source(String),
}

impl From<SourceError> for TreeError {
    fn from(err: SourceError) -> Self {
        TreeError::Source(err.to_string())
    }
}

/// Declared payload size of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSize {
    Known(u64),
    /// Payload runs to the end of the parent (EBML all-ones, ISO-BMFF size 0).
    Unknown,
}

impl ElementSize {
    pub fn known(&self) -> Option<u64> {
        match self {
            ElementSize::Known(n) => Some(*n),
            ElementSize::Unknown => None,
        }
    }

    /// Resolve against the bytes left in the parent after the header.
    pub fn resolve(&self, offset: u64, remaining: u64) -> Result<u64, TreeError> {
        match *self {
            ElementSize::Unknown => Ok(remaining),
            ElementSize::Known(declared) if declared > remaining => Err(TreeError::SizeOverflow {
                offset,
                declared,
                remaining,
            }),
            ElementSize::Known(declared) => Ok(declared),
        }
    }
}

/// Render a four character code, replacing non-printable bytes.
pub fn fourcc_str(code: &[u8; 4]) -> String {
    code.iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_size_takes_remaining() {
        assert_eq!(ElementSize::Unknown.resolve(0, 42), Ok(42));
    }

    #[test]
    fn oversize_is_rejected() {
        let err = ElementSize::Known(100).resolve(8, 10).unwrap_err();
        assert_eq!(
            err,
            TreeError::SizeOverflow {
                offset: 8,
                declared: 100,
                remaining: 10
            }
        );
    }

    #[test]
    fn fourcc_is_printable() {
        assert_eq!(fourcc_str(b"avc1"), "avc1");
        assert_eq!(fourcc_str(&[0x00, b'a', 0xFF, b' ']), ".a. ");
    }
}
