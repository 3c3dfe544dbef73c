//! # spanzip
//!
//! A ZIP archive engine for split (multi-volume) archives and WinZip AES
//! encryption.
//!
//! The crate is layered:
//!
//! - [`io`]: signature probing, byte counting, lock-retrying reads and
//!   [`SegmentedStream`], which presents a set of `.z01`, `.z02`, ... volumes
//!   as one stream
//! - [`crypto`]: the WinZip AES envelope, as a [`WinZipAesStream`] filter
//! - [`zip`]: central directory records and the [`ZipExtractor`] built on the
//!   layers above
//!
//! ## Example
//!
//! ```no_run
//! use spanzip::{ArchiveOptions, ZipExtractor};
//!
//! fn main() -> Result<(), spanzip::ZipError> {
//!     let archive = ZipExtractor::open("backup.zip", ArchiveOptions::default())?;
//!     for entry in archive.entries() {
//!         println!("{} ({} bytes)", entry.file_name(), entry.uncompressed_size());
//!     }
//!
//!     let entry = &archive.entries()[0];
//!     let mut data = Vec::new();
//!     archive.extract_to_writer(entry, Some(b"secret".as_slice()), &mut data, None)?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod crypto;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use crypto::{AesStrength, WinZipAesStream};
pub use error::{ZipError, ZipResult};
pub use io::{CountingStream, RetryPolicy, SegmentedStream, WriteOptions};
pub use zip::{ArchiveOptions, DirectoryRecord, DirectoryRecordBuilder, TextEncoding, ZipExtractor};
