//! Error types shared by every layer of the crate.

use std::io;

use thiserror::Error;

/// Result alias used throughout the library.
pub type ZipResult<T> = Result<T, ZipError>;

/// Errors raised while reading or writing ZIP structures.
#[derive(Debug, Error)]
pub enum ZipError {
    /// Malformed or truncated binary structure.
    #[error("invalid ZIP data at offset {offset}: {reason}")]
    Format { offset: u64, reason: String },

    /// The password verification value derived from the password does not match.
    #[error("invalid password")]
    BadPassword,

    /// The authentication code computed over the ciphertext does not match the stored one.
    #[error("authentication code mismatch: the entry is corrupt or the password is wrong")]
    Integrity,

    /// The CRC-32 of extracted data does not match the directory record.
    #[error("CRC-32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The operation is not available in the stream's current mode.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A caller supplied a value outside the accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ZipError {
    pub fn format(offset: u64, reason: impl Into<String>) -> Self {
        ZipError::Format {
            offset,
            reason: reason.into(),
        }
    }

    /// Turns an `UnexpectedEof` from a fixed-size read into a format error at `offset`.
    pub(crate) fn short_read(err: io::Error, offset: u64, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ZipError::format(offset, format!("truncated {what}"))
        } else {
            ZipError::Io(err)
        }
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(e) => e,
            ZipError::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
            ZipError::InvalidArgument(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            ZipError::BadPassword => io::Error::new(io::ErrorKind::PermissionDenied, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

pub(crate) fn unsupported(what: &'static str) -> io::Error {
    ZipError::Unsupported(what).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_read_maps_eof_to_format_error() {
        let err = io::Error::from(io::ErrorKind::UnexpectedEof);
        match ZipError::short_read(err, 46, "directory record") {
            ZipError::Format { offset, reason } => {
                assert_eq!(offset, 46);
                assert_eq!(reason, "truncated directory record");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn io_conversion_keeps_kind() {
        let err: io::Error = ZipError::Unsupported("seek").into();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        let err: io::Error = ZipError::Integrity.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
