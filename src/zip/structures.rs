use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::crypto::AesStrength;
use crate::error::{ZipError, ZipResult};
use crate::io::signature::{
    END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE,
    ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE, ZIP64_LOCATOR_SIGNATURE,
};

/// 32-bit size or offset field meaning "see the zip64 extra field".
pub const ZIP64_SENTINEL_U32: u32 = 0xFFFF_FFFF;
/// 16-bit count or disk field meaning "see the zip64 end record".
pub const ZIP64_SENTINEL_U16: u16 = 0xFFFF;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    /// Placeholder stored for WinZip AES entries; the real method is in the 0x9901 extra field.
    Aes,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            99 => CompressionMethod::Aes,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Aes => 99,
            CompressionMethod::Unknown(v) => *v,
        }
    }

    /// Short name for listings.
    pub fn name(&self) -> String {
        match self {
            CompressionMethod::Stored => "Stored".to_string(),
            CompressionMethod::Deflate => "Defl:N".to_string(),
            CompressionMethod::Aes => "AES".to_string(),
            CompressionMethod::Unknown(v) => format!("Unk:{v:03}"),
        }
    }
}

/// How an entry's data is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionAlgorithm {
    #[default]
    None,
    /// Traditional PKWARE stream cipher with a 12-byte header.
    PkzipWeak,
    WinZipAes(AesStrength),
    /// Strong encryption (flag bit 6) or another scheme this crate cannot read.
    Unsupported,
}

impl EncryptionAlgorithm {
    /// Bytes stored ahead of the entry's (compressed) data.
    pub fn header_len(&self) -> u64 {
        match self {
            EncryptionAlgorithm::PkzipWeak => 12,
            EncryptionAlgorithm::WinZipAes(strength) => strength.header_len() as u64,
            EncryptionAlgorithm::None | EncryptionAlgorithm::Unsupported => 0,
        }
    }

    /// Bytes stored after the entry's data.
    pub fn trailer_len(&self) -> u64 {
        match self {
            EncryptionAlgorithm::WinZipAes(_) => crate::crypto::AUTH_CODE_LEN as u64,
            _ => 0,
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Decode the fixed part of an EOCD found at `offset`.
    pub fn from_bytes(data: &[u8], offset: u64) -> ZipResult<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::format(offset, "invalid end of central directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_number == ZIP64_SENTINEL_U16
            || self.disk_with_cd == ZIP64_SENTINEL_U16
            || self.disk_entries == ZIP64_SENTINEL_U16
            || self.total_entries == ZIP64_SENTINEL_U16
            || self.cd_size == ZIP64_SENTINEL_U32
            || self.cd_offset == ZIP64_SENTINEL_U32
    }

    /// Write the record followed by `comment`. `comment_len` is taken from `comment`.
    pub fn write_to<W: Write>(&self, writer: &mut W, comment: &[u8]) -> ZipResult<()> {
        let comment_len = u16::try_from(comment.len()).map_err(|_| {
            ZipError::InvalidArgument("archive comment longer than 65535 bytes".to_string())
        })?;
        writer.write_u32::<LittleEndian>(END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.disk_number)?;
        writer.write_u16::<LittleEndian>(self.disk_with_cd)?;
        writer.write_u16::<LittleEndian>(self.disk_entries)?;
        writer.write_u16::<LittleEndian>(self.total_entries)?;
        writer.write_u32::<LittleEndian>(self.cd_size)?;
        writer.write_u32::<LittleEndian>(self.cd_offset)?;
        writer.write_u16::<LittleEndian>(comment_len)?;
        writer.write_all(comment)?;
        Ok(())
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8], offset: u64) -> ZipResult<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::format(offset, "invalid zip64 end of central directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> ZipResult<()> {
        writer.write_u32::<LittleEndian>(ZIP64_LOCATOR_SIGNATURE)?;
        writer.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        writer.write_u64::<LittleEndian>(self.eocd64_offset)?;
        writer.write_u32::<LittleEndian>(self.total_disks)?;
        Ok(())
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8], offset: u64) -> ZipResult<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::format(offset, "invalid zip64 end of central directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    /// Write the fixed record. No extensible data sector is written, so
    /// `eocd64_size` is replaced by 44.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> ZipResult<()> {
        writer.write_u32::<LittleEndian>(ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        writer.write_u64::<LittleEndian>((Self::MIN_SIZE - 12) as u64)?;
        writer.write_u16::<LittleEndian>(self.version_made_by)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u32::<LittleEndian>(self.disk_number)?;
        writer.write_u32::<LittleEndian>(self.disk_with_cd)?;
        writer.write_u64::<LittleEndian>(self.disk_entries)?;
        writer.write_u64::<LittleEndian>(self.total_entries)?;
        writer.write_u64::<LittleEndian>(self.cd_size)?;
        writer.write_u64::<LittleEndian>(self.cd_offset)?;
        Ok(())
    }
}

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Header written in front of each entry's data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    /// Packed DOS date (high half) and time (low half).
    pub last_modified: u32,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Decode the fixed 30 bytes. `file_name` and `extra` are left empty;
    /// their lengths are returned so the caller can read or skip them.
    pub fn fixed_from_bytes(data: &[u8], offset: u64) -> ZipResult<(Self, u16, u16)> {
        if data.len() < LFH_SIZE || &data[0..4] != LFH_SIGNATURE {
            return Err(ZipError::format(offset, "invalid local file header"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let time = cursor.read_u16::<LittleEndian>()? as u32;
        let date = cursor.read_u16::<LittleEndian>()? as u32;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()?;
        let extra_len = cursor.read_u16::<LittleEndian>()?;

        let header = Self {
            version_needed,
            flags,
            compression_method,
            last_modified: (date << 16) | time,
            crc32,
            compressed_size,
            uncompressed_size,
            file_name: Vec::new(),
            extra: Vec::new(),
        };
        Ok((header, name_len, extra_len))
    }

    /// Total bytes this header occupies on disk.
    pub fn encoded_len(&self) -> u64 {
        (LFH_SIZE + self.file_name.len() + self.extra.len()) as u64
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> ZipResult<()> {
        let name_len = u16::try_from(self.file_name.len()).map_err(|_| {
            ZipError::InvalidArgument("file name longer than 65535 bytes".to_string())
        })?;
        let extra_len = u16::try_from(self.extra.len()).map_err(|_| {
            ZipError::InvalidArgument("extra field longer than 65535 bytes".to_string())
        })?;

        writer.write_u32::<LittleEndian>(LOCAL_FILE_HEADER_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.compression_method)?;
        writer.write_u16::<LittleEndian>(self.last_modified as u16)?;
        writer.write_u16::<LittleEndian>((self.last_modified >> 16) as u16)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(name_len)?;
        writer.write_u16::<LittleEndian>(extra_len)?;
        writer.write_all(&self.file_name)?;
        writer.write_all(&self.extra)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eocd_round_trip_with_comment() {
        let eocd = EndOfCentralDirectory {
            disk_number: 2,
            disk_with_cd: 1,
            disk_entries: 3,
            total_entries: 7,
            cd_size: 0x1234,
            cd_offset: 0x56,
            comment_len: 0,
        };
        let mut bytes = Vec::new();
        eocd.write_to(&mut bytes, b"hi").unwrap();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE + 2);

        let parsed = EndOfCentralDirectory::from_bytes(&bytes, 0).unwrap();
        assert_eq!(parsed.comment_len, 2);
        assert_eq!(parsed.cd_size, 0x1234);
        assert_eq!(parsed.disk_with_cd, 1);
        assert!(!parsed.is_zip64());
    }

    #[test]
    fn bad_signature_reports_offset() {
        match EndOfCentralDirectory::from_bytes(&[0u8; 22], 99) {
            Err(ZipError::Format { offset, .. }) => assert_eq!(offset, 99),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn zip64_records() {
        let record = Zip64EOCD {
            eocd64_size: 0,
            version_made_by: 45,
            version_needed: 45,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 70_000,
            total_entries: 70_000,
            cd_size: 5_000_000,
            cd_offset: 0x1_0000_0000,
        };
        let mut bytes = Vec::new();
        record.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), Zip64EOCD::MIN_SIZE);
        let parsed = Zip64EOCD::from_bytes(&bytes, 0).unwrap();
        assert_eq!(parsed.eocd64_size, 44);
        assert_eq!(parsed.cd_offset, 0x1_0000_0000);

        let locator = Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset: 0x1_0000_1000,
            total_disks: 1,
        };
        let mut bytes = Vec::new();
        locator.write_to(&mut bytes).unwrap();
        assert_eq!(Zip64EOCDLocator::from_bytes(&bytes, 0).unwrap(), locator);
    }

    #[test]
    fn local_header_layout() {
        let header = LocalFileHeader {
            version_needed: 20,
            flags: 0x0008,
            compression_method: 8,
            last_modified: 0x4A21_6B5A,
            crc32: 0xDEAD_BEEF,
            compressed_size: 10,
            uncompressed_size: 20,
            file_name: b"a.txt".to_vec(),
            extra: vec![1, 2, 3],
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, header.encoded_len());
        assert_eq!(&bytes[10..14], &[0x5A, 0x6B, 0x21, 0x4A]);

        let (parsed, name_len, extra_len) = LocalFileHeader::fixed_from_bytes(&bytes, 0).unwrap();
        assert_eq!((name_len, extra_len), (5, 3));
        assert_eq!(parsed.last_modified, 0x4A21_6B5A);
        assert_eq!(parsed.crc32, 0xDEAD_BEEF);
    }
}
