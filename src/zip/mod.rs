//! ZIP archive structures, parsing and extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: fixed records at the end of the archive and the local file header
//! - [`directory`]: central directory records, read and written
//! - [`extra`]: zip64 and WinZip AES extra-field blocks
//! - [`dostime`]: MS-DOS packed timestamps
//! - [`encoding`]: legacy code pages for names and comments
//! - [`parser`]: locating and walking the central directory
//! - [`extractor`]: high-level extraction API for end users
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! A split archive spreads these bytes over numbered volumes; offsets in the
//! directory are relative to the volume named by the record's disk number.
//!
//! ## Supported Features
//!
//! - ZIP64 extensions for files > 4GB
//! - Split archives of up to 99 volumes
//! - STORED and DEFLATE compression methods
//! - WinZip AES (AE-1 and AE-2) encryption
//!
//! ## Limitations
//!
//! - Traditional PKWARE and strong encryption are recognised but not decrypted
//! - No BZIP2, LZMA, or other compression methods

pub mod directory;
pub mod dostime;
pub mod encoding;
pub mod extra;
mod extractor;
mod parser;
mod structures;

pub use directory::{DirectoryProbe, DirectoryRecord, DirectoryRecordBuilder};
pub use encoding::TextEncoding;
pub use extra::{AesExtraField, AesVendorVersion};
pub use extractor::{ArchiveOptions, Progress, ZipExtractor};
pub use parser::{DirectoryLocation, ZipParser, read_central_directory};
pub use structures::*;
