//! Central directory records.
//!
//! A record is decoded in one pass: signature probe, the fixed 42-byte body,
//! name, extra area and comment. Sizes and the local header offset are only
//! final after the zip64 extra field has been applied, and the encryption
//! scheme only after the AES extra field has been seen, so the derived values
//! (`compressed_file_data_size`, trailer lengths) are computed last.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::time::SystemTime;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::NaiveDateTime;
use log::warn;

use super::dostime::{
    date_time_to_packed, packed_from_system_time, packed_now, packed_to_date_time,
};
use super::encoding::TextEncoding;
use super::extra::{
    AesExtraField, AesVendorVersion, ExtraBlocks, WINZIP_AES_EXTRA_ID, ZIP64_EXTRA_ID,
    Zip64Request, Zip64Values,
};
use super::structures::{
    CompressionMethod, EncryptionAlgorithm, ZIP64_SENTINEL_U16, ZIP64_SENTINEL_U32,
};
use crate::crypto::AesStrength;
use crate::error::{ZipError, ZipResult};
use crate::io::signature::{
    CENTRAL_DIRECTORY_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE,
    ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE, read_signature,
};

/// Size of a record without its signature and variable fields.
pub const FIXED_FIELDS_LEN: usize = 42;

pub const FLAG_ENCRYPTED: u16 = 0x0001;
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub const FLAG_STRONG_ENCRYPTION: u16 = 0x0040;
pub const FLAG_UTF8: u16 = 0x0800;

const ATTRIBUTE_DIRECTORY: u32 = 0x10;
const DESCRIPTOR_LEN: u64 = 16;
const ZIP64_DESCRIPTOR_LEN: u64 = 24;

/// Outcome of probing for the next directory record.
#[derive(Debug)]
pub enum DirectoryProbe {
    Entry(Box<DirectoryRecord>),
    /// The directory is over; the stream has been put back in front of this signature.
    EndOfDirectory(u32),
}

/// One decoded central directory record.
///
/// Values are read-only once the record exists; new records are assembled
/// with [`DirectoryRecordBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    version_made_by: u16,
    version_needed: u16,
    flags: u16,
    compression_method: CompressionMethod,
    last_modified_packed: u32,
    last_modified: NaiveDateTime,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    disk_number_start: u32,
    internal_attributes: u16,
    external_attributes: u32,
    local_header_offset: u64,
    file_name: String,
    extra: Vec<u8>,
    comment: String,
    is_directory: bool,
    encryption: EncryptionAlgorithm,
    aes: Option<AesExtraField>,
    zip64: bool,
    compressed_file_data_size: u64,
    crypto_trailer_len: u64,
    descriptor_len: u64,
}

/// The 42 bytes after the signature, decoded.
struct FixedFields {
    version_made_by: u16,
    version_needed: u16,
    flags: u16,
    compression_method: u16,
    last_modified_packed: u32,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    name_len: u16,
    extra_len: u16,
    comment_len: u16,
    disk_number_start: u16,
    internal_attributes: u16,
    external_attributes: u32,
    local_header_offset: u32,
}

impl FixedFields {
    fn decode(data: &[u8; FIXED_FIELDS_LEN]) -> std::io::Result<Self> {
        let mut cursor = Cursor::new(&data[..]);
        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let time = cursor.read_u16::<LittleEndian>()? as u32;
        let date = cursor.read_u16::<LittleEndian>()? as u32;

        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            compression_method,
            last_modified_packed: (date << 16) | time,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            name_len: cursor.read_u16::<LittleEndian>()?,
            extra_len: cursor.read_u16::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
            disk_number_start: cursor.read_u16::<LittleEndian>()?,
            internal_attributes: cursor.read_u16::<LittleEndian>()?,
            external_attributes: cursor.read_u32::<LittleEndian>()?,
            local_header_offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    fn zip64_request(&self) -> Zip64Request {
        Zip64Request {
            uncompressed_size: self.uncompressed_size == ZIP64_SENTINEL_U32,
            compressed_size: self.compressed_size == ZIP64_SENTINEL_U32,
            header_offset: self.local_header_offset == ZIP64_SENTINEL_U32,
            disk_start: self.disk_number_start == ZIP64_SENTINEL_U16,
        }
    }
}

impl DirectoryRecord {
    /// Read the next record from `reader`.
    ///
    /// Names and comments without the UTF-8 flag are decoded with `encoding`.
    ///
    /// # Returns
    ///
    /// [`DirectoryProbe::Entry`] for a record, or
    /// [`DirectoryProbe::EndOfDirectory`] when the next signature is an end
    /// record or a local file header. In the latter case the stream is
    /// positioned back at that signature.
    ///
    /// # Errors
    ///
    /// [`ZipError::Format`] for an unknown signature, end of data before the
    /// directory is closed, a truncated record, or inconsistent sizes.
    pub fn read_from<R: Read + Seek + ?Sized>(
        reader: &mut R,
        encoding: TextEncoding,
    ) -> ZipResult<DirectoryProbe> {
        let offset = reader.stream_position()?;
        let Some(signature) = read_signature(reader)? else {
            return Err(ZipError::format(offset, "data ends inside the central directory"));
        };

        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            reader.seek(SeekFrom::Start(offset))?;
            return match signature {
                END_OF_CENTRAL_DIRECTORY_SIGNATURE
                | ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE
                | LOCAL_FILE_HEADER_SIGNATURE => Ok(DirectoryProbe::EndOfDirectory(signature)),
                other => Err(ZipError::format(
                    offset,
                    format!("unexpected signature {other:#010x} in central directory"),
                )),
            };
        }

        let mut fixed = [0u8; FIXED_FIELDS_LEN];
        reader
            .read_exact(&mut fixed)
            .map_err(|e| ZipError::short_read(e, offset, "central directory record"))?;
        let fields = FixedFields::decode(&fixed)?;

        let name_raw = read_field(reader, fields.name_len, offset, "file name")?;
        let extra = read_field(reader, fields.extra_len, offset, "extra field")?;
        let comment_raw = read_field(reader, fields.comment_len, offset, "file comment")?;

        let utf8 = fields.flags & FLAG_UTF8 != 0;
        let file_name = decode_text(&name_raw, utf8, encoding);
        let comment = decode_text(&comment_raw, utf8, encoding);

        let record = Self::from_parts(fields, file_name, extra, comment, offset)?;
        Ok(DirectoryProbe::Entry(Box::new(record)))
    }

    fn from_parts(
        fields: FixedFields,
        mut file_name: String,
        extra: Vec<u8>,
        comment: String,
        offset: u64,
    ) -> ZipResult<Self> {
        let is_directory = (fields.internal_attributes == 0
            && fields.external_attributes & ATTRIBUTE_DIRECTORY != 0)
            || file_name.ends_with('/');
        if is_directory && !file_name.ends_with('/') {
            file_name.push('/');
        }

        let mut encryption = if fields.flags & FLAG_STRONG_ENCRYPTION != 0 {
            EncryptionAlgorithm::Unsupported
        } else if fields.flags & FLAG_ENCRYPTED != 0 {
            EncryptionAlgorithm::PkzipWeak
        } else {
            EncryptionAlgorithm::None
        };

        let request = fields.zip64_request();
        let mut compressed_size = fields.compressed_size as u64;
        let mut uncompressed_size = fields.uncompressed_size as u64;
        let mut local_header_offset = fields.local_header_offset as u64;
        let mut disk_number_start = fields.disk_number_start as u32;
        let mut zip64_values = Zip64Values::default();
        let mut aes = None;

        for block in ExtraBlocks::new(&extra) {
            let block = match block {
                Ok(block) => block,
                Err(at) => {
                    warn!("ignoring malformed extra field data at byte {at} of {file_name:?}");
                    break;
                }
            };
            match block.id {
                ZIP64_EXTRA_ID => zip64_values = Zip64Values::parse(block.data, request),
                WINZIP_AES_EXTRA_ID => {
                    let field = AesExtraField::parse(block.data)
                        .map_err(|reason| ZipError::format(offset, reason))?;
                    encryption = EncryptionAlgorithm::WinZipAes(field.strength);
                    aes = Some(field);
                }
                _ => {}
            }
        }

        let missing = |what: &str| {
            ZipError::format(offset, format!("{what} needs a zip64 value that is missing"))
        };
        if request.uncompressed_size {
            uncompressed_size = zip64_values
                .uncompressed_size
                .ok_or_else(|| missing("uncompressed size"))?;
        }
        if request.compressed_size {
            compressed_size = zip64_values
                .compressed_size
                .ok_or_else(|| missing("compressed size"))?;
        }
        if request.header_offset {
            local_header_offset = zip64_values
                .header_offset
                .ok_or_else(|| missing("local header offset"))?;
        }
        if request.disk_start {
            disk_number_start = zip64_values.disk_start.ok_or_else(|| missing("disk number"))?;
        }

        let compression_method = CompressionMethod::from_u16(fields.compression_method);
        if compression_method == CompressionMethod::Aes && aes.is_none() {
            return Err(ZipError::format(offset, "AES entry without an AES extra field"));
        }

        let last_modified = packed_to_date_time(fields.last_modified_packed).map_err(|e| match e {
            ZipError::Format { reason, .. } => ZipError::format(offset, reason),
            other => other,
        })?;

        let mut record = Self {
            version_made_by: fields.version_made_by,
            version_needed: fields.version_needed,
            flags: fields.flags,
            compression_method,
            last_modified_packed: fields.last_modified_packed,
            last_modified,
            crc32: fields.crc32,
            compressed_size,
            uncompressed_size,
            disk_number_start,
            internal_attributes: fields.internal_attributes,
            external_attributes: fields.external_attributes,
            local_header_offset,
            file_name,
            extra,
            comment,
            is_directory,
            encryption,
            aes,
            zip64: request.any(),
            compressed_file_data_size: 0,
            crypto_trailer_len: 0,
            descriptor_len: 0,
        };
        record.resolve_envelope(offset)?;
        Ok(record)
    }

    /// Work out how much of `compressed_size` is compressed data proper.
    fn resolve_envelope(&mut self, offset: u64) -> ZipResult<()> {
        let header = self.encryption.header_len();
        let trailer = self.encryption.trailer_len();
        self.compressed_file_data_size = self
            .compressed_size
            .checked_sub(header)
            .filter(|data| *data >= trailer)
            .ok_or_else(|| {
                ZipError::format(
                    offset,
                    format!(
                        "compressed size {} cannot hold a {}-byte encryption envelope",
                        self.compressed_size,
                        header + trailer
                    ),
                )
            })?;
        self.crypto_trailer_len = trailer;
        self.descriptor_len = if self.flags & FLAG_DATA_DESCRIPTOR == 0 {
            0
        } else if self.zip64 {
            ZIP64_DESCRIPTOR_LEN
        } else {
            DESCRIPTOR_LEN
        };
        Ok(())
    }

    /// Serialize the record, signature included.
    ///
    /// Sizes and offsets that do not fit their 32-bit fields are written as
    /// 0xFFFFFFFF with the real values in a regenerated zip64 extra field.
    pub fn write_to<W: Write + ?Sized>(
        &self,
        writer: &mut W,
        encoding: TextEncoding,
    ) -> ZipResult<()> {
        let name = encode_text(&self.file_name, self.is_utf8(), encoding);
        let comment = encode_text(&self.comment, self.is_utf8(), encoding);

        let mut zip64 = Zip64Values::default();
        let uncompressed_size = narrow(self.uncompressed_size, &mut zip64.uncompressed_size);
        let compressed_size = narrow(self.compressed_size, &mut zip64.compressed_size);
        let local_header_offset = narrow(self.local_header_offset, &mut zip64.header_offset);
        let disk_number_start = match u16::try_from(self.disk_number_start) {
            Ok(disk) if disk != ZIP64_SENTINEL_U16 => disk,
            _ => {
                zip64.disk_start = Some(self.disk_number_start);
                ZIP64_SENTINEL_U16
            }
        };

        let mut extra = Vec::with_capacity(self.extra.len() + 32);
        zip64.write_block(&mut extra);
        extra.extend_from_slice(&strip_zip64(&self.extra));

        let too_long =
            |what: &str| ZipError::InvalidArgument(format!("{what} longer than 65535 bytes"));
        let name_len = u16::try_from(name.len()).map_err(|_| too_long("file name"))?;
        let extra_len = u16::try_from(extra.len()).map_err(|_| too_long("extra field"))?;
        let comment_len = u16::try_from(comment.len()).map_err(|_| too_long("file comment"))?;

        writer.write_u32::<LittleEndian>(CENTRAL_DIRECTORY_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.version_made_by)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        writer.write_u16::<LittleEndian>(self.last_modified_packed as u16)?;
        writer.write_u16::<LittleEndian>((self.last_modified_packed >> 16) as u16)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(compressed_size)?;
        writer.write_u32::<LittleEndian>(uncompressed_size)?;
        writer.write_u16::<LittleEndian>(name_len)?;
        writer.write_u16::<LittleEndian>(extra_len)?;
        writer.write_u16::<LittleEndian>(comment_len)?;
        writer.write_u16::<LittleEndian>(disk_number_start)?;
        writer.write_u16::<LittleEndian>(self.internal_attributes)?;
        writer.write_u32::<LittleEndian>(self.external_attributes)?;
        writer.write_u32::<LittleEndian>(local_header_offset)?;
        writer.write_all(&name)?;
        writer.write_all(&extra)?;
        writer.write_all(&comment)?;
        Ok(())
    }

    pub fn version_made_by(&self) -> u16 {
        self.version_made_by
    }

    pub fn version_needed(&self) -> u16 {
        self.version_needed
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Method stored in the record. For AES entries this is the placeholder 99.
    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }

    /// Method the data was actually compressed with.
    pub fn effective_compression_method(&self) -> CompressionMethod {
        match &self.aes {
            Some(aes) => CompressionMethod::from_u16(aes.compression_method),
            None => self.compression_method,
        }
    }

    pub fn last_modified_packed(&self) -> u32 {
        self.last_modified_packed
    }

    pub fn last_modified(&self) -> NaiveDateTime {
        self.last_modified
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// Stored size, including any encryption envelope.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn disk_number_start(&self) -> u32 {
        self.disk_number_start
    }

    pub fn internal_attributes(&self) -> u16 {
        self.internal_attributes
    }

    pub fn external_attributes(&self) -> u32 {
        self.external_attributes
    }

    pub fn local_header_offset(&self) -> u64 {
        self.local_header_offset
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Raw extra area as stored.
    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn is_utf8(&self) -> bool {
        self.flags & FLAG_UTF8 != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption != EncryptionAlgorithm::None
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn encryption(&self) -> EncryptionAlgorithm {
        self.encryption
    }

    pub fn aes(&self) -> Option<&AesExtraField> {
        self.aes.as_ref()
    }

    /// Whether any field needed a zip64 value.
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    /// Stored size minus the encryption header (12 bytes for PKWARE
    /// encryption, salt and verifier for AES). The AES authentication code is
    /// still included; see [`ciphertext_len`](Self::ciphertext_len).
    pub fn compressed_file_data_size(&self) -> u64 {
        self.compressed_file_data_size
    }

    /// Bytes of encryption trailer after the data: 10 for AES, otherwise 0.
    pub fn crypto_trailer_len(&self) -> u64 {
        self.crypto_trailer_len
    }

    /// Compressed data with both encryption header and trailer removed.
    pub fn ciphertext_len(&self) -> u64 {
        self.compressed_file_data_size - self.crypto_trailer_len
    }

    /// Length of the data descriptor following the entry data: 0, 16 or 24.
    pub fn descriptor_len(&self) -> u64 {
        self.descriptor_len
    }

    /// Whether the CRC-32 field is meaningful. AE-2 entries store zero there.
    pub fn has_meaningful_crc(&self) -> bool {
        !matches!(
            self.aes,
            Some(AesExtraField {
                vendor_version: AesVendorVersion::Ae2,
                ..
            })
        )
    }
}

/// Assembles a [`DirectoryRecord`] for writing.
#[derive(Debug, Clone)]
pub struct DirectoryRecordBuilder {
    file_name: String,
    comment: String,
    compression_method: CompressionMethod,
    last_modified_packed: u32,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    disk_number_start: u32,
    external_attributes: u32,
    extra: Vec<u8>,
    data_descriptor: bool,
    pkzip_encrypted: bool,
    aes: Option<AesExtraField>,
}

impl DirectoryRecordBuilder {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            comment: String::new(),
            compression_method: CompressionMethod::Stored,
            last_modified_packed: packed_now(),
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            local_header_offset: 0,
            disk_number_start: 0,
            external_attributes: 0,
            extra: Vec::new(),
            data_descriptor: false,
            pkzip_encrypted: false,
            aes: None,
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn compression_method(mut self, method: CompressionMethod) -> Self {
        self.compression_method = method;
        self
    }

    /// Local wall-clock time. Defaults to now.
    pub fn last_modified(mut self, when: NaiveDateTime) -> Self {
        self.last_modified_packed = date_time_to_packed(when);
        self
    }

    pub fn modified_at(mut self, when: SystemTime) -> Self {
        self.last_modified_packed = packed_from_system_time(when);
        self
    }

    pub fn crc32(mut self, crc32: u32) -> Self {
        self.crc32 = crc32;
        self
    }

    /// Stored size including any encryption envelope, and original size.
    pub fn sizes(mut self, compressed: u64, uncompressed: u64) -> Self {
        self.compressed_size = compressed;
        self.uncompressed_size = uncompressed;
        self
    }

    pub fn local_header(mut self, disk: u32, offset: u64) -> Self {
        self.disk_number_start = disk;
        self.local_header_offset = offset;
        self
    }

    pub fn external_attributes(mut self, attributes: u32) -> Self {
        self.external_attributes = attributes;
        self
    }

    /// Additional extra-field blocks, already encoded.
    pub fn extra(mut self, extra: Vec<u8>) -> Self {
        self.extra = extra;
        self
    }

    pub fn data_descriptor(mut self, present: bool) -> Self {
        self.data_descriptor = present;
        self
    }

    /// Mark the entry as using traditional PKWARE encryption.
    pub fn pkzip_encrypted(mut self) -> Self {
        self.pkzip_encrypted = true;
        self
    }

    /// Mark the entry as WinZip AES encrypted. The method set with
    /// [`compression_method`](Self::compression_method) moves into the AES
    /// extra field and the record stores 99.
    pub fn aes(mut self, strength: AesStrength, vendor_version: AesVendorVersion) -> Self {
        self.aes = Some(AesExtraField {
            vendor_version,
            strength,
            compression_method: 0,
        });
        self
    }

    pub fn build(self) -> ZipResult<DirectoryRecord> {
        let mut file_name = self.file_name;
        let is_directory =
            file_name.ends_with('/') || self.external_attributes & ATTRIBUTE_DIRECTORY != 0;
        if is_directory && !file_name.ends_with('/') {
            file_name.push('/');
        }

        let mut flags = 0u16;
        if !file_name.is_ascii() || !self.comment.is_ascii() {
            flags |= FLAG_UTF8;
        }
        if self.data_descriptor {
            flags |= FLAG_DATA_DESCRIPTOR;
        }

        let mut extra = strip_zip64(&self.extra);
        let mut compression_method = self.compression_method;
        let mut encryption = EncryptionAlgorithm::None;
        let aes = self.aes.map(|mut field| {
            field.compression_method = compression_method.as_u16();
            field
        });
        if let Some(field) = &aes {
            field.write_block(&mut extra);
            compression_method = CompressionMethod::Aes;
            encryption = EncryptionAlgorithm::WinZipAes(field.strength);
            flags |= FLAG_ENCRYPTED;
        } else if self.pkzip_encrypted {
            encryption = EncryptionAlgorithm::PkzipWeak;
            flags |= FLAG_ENCRYPTED;
        }

        let zip64 = self.compressed_size >= ZIP64_SENTINEL_U32 as u64
            || self.uncompressed_size >= ZIP64_SENTINEL_U32 as u64
            || self.local_header_offset >= ZIP64_SENTINEL_U32 as u64
            || self.disk_number_start >= ZIP64_SENTINEL_U16 as u32;
        let version_needed = if zip64 {
            45
        } else if aes.is_some() {
            51
        } else {
            20
        };

        let last_modified_packed = self.last_modified_packed;
        let mut record = DirectoryRecord {
            version_made_by: (3 << 8) | 63,
            version_needed,
            flags,
            compression_method,
            last_modified_packed,
            last_modified: packed_to_date_time(last_modified_packed)?,
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            disk_number_start: self.disk_number_start,
            internal_attributes: 0,
            external_attributes: self.external_attributes,
            local_header_offset: self.local_header_offset,
            file_name,
            extra,
            comment: self.comment,
            is_directory,
            encryption,
            aes,
            zip64,
            compressed_file_data_size: 0,
            crypto_trailer_len: 0,
            descriptor_len: 0,
        };
        record.resolve_envelope(0).map_err(|_| {
            ZipError::InvalidArgument(
                "compressed size is smaller than the encryption envelope".to_string(),
            )
        })?;
        Ok(record)
    }
}

fn read_field<R: Read + ?Sized>(
    reader: &mut R,
    len: u16,
    offset: u64,
    what: &str,
) -> ZipResult<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .map_err(|e| ZipError::short_read(e, offset, what))?;
    Ok(buf)
}

fn decode_text(raw: &[u8], utf8: bool, encoding: TextEncoding) -> String {
    if utf8 {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        encoding.decode(raw).into_owned()
    }
}

fn encode_text(text: &str, utf8: bool, encoding: TextEncoding) -> Vec<u8> {
    if utf8 {
        text.as_bytes().to_vec()
    } else {
        encoding.encode(text).into_owned()
    }
}

/// `value` as a 32-bit field, moving it into `slot` when it needs zip64.
fn narrow(value: u64, slot: &mut Option<u64>) -> u32 {
    match u32::try_from(value) {
        Ok(small) if small != ZIP64_SENTINEL_U32 => small,
        _ => {
            *slot = Some(value);
            ZIP64_SENTINEL_U32
        }
    }
}

/// Extra area without its zip64 block. A malformed tail is kept verbatim.
fn strip_zip64(extra: &[u8]) -> Vec<u8> {
    let mut kept = Vec::with_capacity(extra.len());
    let mut consumed = 0;
    for block in ExtraBlocks::new(extra) {
        match block {
            Ok(block) => {
                let len = 4 + block.data.len();
                if block.id != ZIP64_EXTRA_ID {
                    kept.extend_from_slice(&extra[consumed..consumed + len]);
                }
                consumed += len;
            }
            Err(_) => {
                kept.extend_from_slice(&extra[consumed..]);
                break;
            }
        }
    }
    kept
}
