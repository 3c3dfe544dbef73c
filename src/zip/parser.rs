//! Low-level ZIP archive parser.
//!
//! This module locates the central directory of an archive and walks its
//! records. It only needs `Read + Seek`, so the same code serves a plain file,
//! an in-memory buffer and the final volume of a split set.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data

use std::io::{Read, Seek, SeekFrom};

use log::{debug, warn};

use super::directory::{DirectoryProbe, DirectoryRecord};
use super::encoding::TextEncoding;
use super::structures::*;
use crate::error::{ZipError, ZipResult};

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Where the central directory lives, with everything from the end records
/// that callers need afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLocation {
    /// Volume holding the first directory record.
    pub disk: u32,
    /// Offset of the first record within that volume.
    pub offset: u64,
    pub size: u64,
    pub total_entries: u64,
    /// Number of volumes in the set; 1 for an ordinary archive.
    pub volume_count: u32,
    /// Offset of the classic EOCD record within the parsed file.
    pub eocd_offset: u64,
    pub comment: Vec<u8>,
}

/// Low-level ZIP file parser.
///
/// This struct handles reading and parsing the end-of-archive structures
/// from a data source. For a split archive it is given the final volume,
/// which is where the end records are stored.
///
/// ## Usage
///
/// Typically used through [`ZipExtractor`](super::ZipExtractor)
/// rather than directly.
///
/// ## Example
///
/// ```ignore
/// let mut parser = ZipParser::new(File::open("archive.zip")?)?;
/// let location = parser.directory_location()?;
/// println!("{} entries at {}", location.total_entries, location.offset);
/// ```
pub struct ZipParser<R> {
    /// The underlying data source
    reader: R,
    /// Total size of the source in bytes
    size: u64,
}

impl<R: Read + Seek> ZipParser<R> {
    /// Create a new parser for the given reader.
    ///
    /// # Arguments
    ///
    /// * `reader` - Any seekable byte source
    ///
    /// # Returns
    ///
    /// A new parser instance ready to read the archive.
    pub fn new(mut reader: R) -> ZipResult<Self> {
        let size = reader.seek(SeekFrom::End(0))?;
        Ok(Self { reader, size })
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::Format`] if no valid EOCD can be found, indicating
    /// the file is not a valid ZIP archive.
    pub fn find_eocd(&mut self) -> ZipResult<(EndOfCentralDirectory, u64)> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(ZipError::format(0, "file is too short to be a ZIP archive"));
        }

        // Common case first: no archive comment.
        let offset = self.size - eocd_size;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.read_exact_at(offset, &mut buf)?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf, offset)?;
            debug!("end of central directory at {offset}");
            return Ok((eocd, offset));
        }

        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.read_exact_at(search_start, &mut buf)?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // Only accept a candidate whose comment runs exactly to the end of the file.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let found = search_start + i as u64;
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                        found,
                    )?;
                    debug!("end of central directory at {found}, {comment_len}-byte comment");
                    return Ok((eocd, found));
                }
            }
        }

        Err(ZipError::format(search_start, "end of central directory not found"))
    }

    /// Read the ZIP64 End of Central Directory Locator.
    ///
    /// # Arguments
    ///
    /// * `eocd_offset` - Offset of the regular EOCD in the file
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::Format`] if the locator is missing.
    pub fn read_zip64_locator(&mut self, eocd_offset: u64) -> ZipResult<Zip64EOCDLocator> {
        // The locator sits immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| ZipError::format(eocd_offset, "no room for a zip64 locator"))?;
        let mut buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.read_exact_at(locator_offset, &mut buf)?;
        Zip64EOCDLocator::from_bytes(&buf, locator_offset)
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    ///
    /// # Arguments
    ///
    /// * `eocd_offset` - Offset of the regular EOCD in the file
    ///
    /// # Returns
    ///
    /// The locator and the ZIP64 EOCD with 64-bit field values.
    ///
    /// # Errors
    ///
    /// Returns an error if the ZIP64 structures are missing or invalid, and
    /// [`ZipError::Unsupported`] when the record is stored on an earlier
    /// volume of a split set.
    pub fn read_zip64_eocd(
        &mut self,
        eocd_offset: u64,
    ) -> ZipResult<(Zip64EOCDLocator, Zip64EOCD)> {
        let locator = self.read_zip64_locator(eocd_offset)?;
        let locator_offset = eocd_offset - Zip64EOCDLocator::SIZE as u64;
        let volumes_through_record =
            locator.disk_with_eocd64.checked_add(1).ok_or_else(|| {
                ZipError::format(locator_offset, "zip64 locator names an impossible volume")
            })?;
        if locator.total_disks > 1 && volumes_through_record != locator.total_disks {
            return Err(ZipError::Unsupported("zip64 end record on an earlier volume"));
        }

        let mut buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.read_exact_at(locator.eocd64_offset, &mut buf)?;
        let record = Zip64EOCD::from_bytes(&buf, locator.eocd64_offset)?;
        Ok((locator, record))
    }

    /// Find the central directory.
    ///
    /// Reads the EOCD, follows it to the ZIP64 records when needed, and
    /// collects the archive comment.
    pub fn directory_location(&mut self) -> ZipResult<DirectoryLocation> {
        let (eocd, eocd_offset) = self.find_eocd()?;

        let mut comment = vec![0u8; eocd.comment_len as usize];
        self.read_exact_at(eocd_offset + EndOfCentralDirectory::SIZE as u64, &mut comment)?;

        let location = if eocd.is_zip64() {
            let (locator, eocd64) = self.read_zip64_eocd(eocd_offset)?;
            DirectoryLocation {
                disk: eocd64.disk_with_cd,
                offset: eocd64.cd_offset,
                size: eocd64.cd_size,
                total_entries: eocd64.total_entries,
                volume_count: locator.total_disks.max(1),
                eocd_offset,
                comment,
            }
        } else {
            DirectoryLocation {
                disk: eocd.disk_with_cd as u32,
                offset: eocd.cd_offset as u64,
                size: eocd.cd_size as u64,
                total_entries: eocd.total_entries as u64,
                volume_count: eocd.disk_number as u32 + 1,
                eocd_offset,
                comment,
            }
        };

        if location.disk >= location.volume_count {
            return Err(ZipError::format(
                eocd_offset,
                format!(
                    "central directory on volume {} of a {}-volume set",
                    location.disk, location.volume_count
                ),
            ));
        }
        Ok(location)
    }

    /// Get a mutable reference to the underlying reader.
    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> ZipResult<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader
            .read_exact(buf)
            .map_err(|e| ZipError::short_read(e, offset, "end of archive records"))
    }
}

/// Read directory records from the current position until the directory ends.
///
/// # Arguments
///
/// * `reader` - A stream positioned at the first record
/// * `encoding` - Encoding for names without the UTF-8 flag
/// * `expected` - Entry count from the end record, used as a capacity hint and sanity check
///
/// # Returns
///
/// The records in directory order.
pub fn read_central_directory<R: Read + Seek + ?Sized>(
    reader: &mut R,
    encoding: TextEncoding,
    expected: u64,
) -> ZipResult<Vec<DirectoryRecord>> {
    let mut entries = Vec::with_capacity(expected.min(u16::MAX as u64) as usize);
    loop {
        match DirectoryRecord::read_from(reader, encoding)? {
            DirectoryProbe::Entry(record) => entries.push(*record),
            DirectoryProbe::EndOfDirectory(_) => break,
        }
    }

    if entries.len() as u64 != expected {
        warn!(
            "end record announces {expected} entries but the central directory holds {}",
            entries.len()
        );
    }
    Ok(entries)
}
