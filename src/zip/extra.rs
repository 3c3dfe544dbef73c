//! Extra-field blocks attached to directory records and local headers.
//!
//! The extra area is a run of `id (u16) | length (u16) | data` blocks. Two
//! are interpreted here: zip64 extended information (0x0001) and the WinZip
//! AES descriptor (0x9901). Everything else is kept as raw bytes.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::crypto::AesStrength;

pub const ZIP64_EXTRA_ID: u16 = 0x0001;
pub const WINZIP_AES_EXTRA_ID: u16 = 0x9901;

/// "AE", little-endian.
const AES_VENDOR_ID: u16 = 0x4541;
const AES_EXTRA_DATA_LEN: u16 = 7;

/// One `id | length | data` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraBlock<'a> {
    pub id: u16,
    pub data: &'a [u8],
}

/// Iterator over the blocks of an extra area.
///
/// Yields `Err(offset)` once, with the offset of the bad block inside the
/// area, when a header is cut short or a length runs past the end, and then stops.
pub struct ExtraBlocks<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> ExtraBlocks<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for ExtraBlocks<'a> {
    type Item = Result<ExtraBlock<'a>, usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.data.len() {
            return None;
        }

        let start = self.pos;
        let rest = &self.data[start..];
        if rest.len() < 4 {
            self.done = true;
            return Some(Err(start));
        }
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        if rest.len() < 4 + len {
            self.done = true;
            return Some(Err(start));
        }

        self.pos = start + 4 + len;
        Some(Ok(ExtraBlock {
            id,
            data: &rest[4..4 + len],
        }))
    }
}

/// Which 32-bit fields of a record carried the zip64 sentinel.
///
/// The zip64 block stores only the values whose regular field overflowed,
/// always in this order: uncompressed size, compressed size, local header
/// offset, disk number start.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Zip64Request {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub header_offset: bool,
    pub disk_start: bool,
}

impl Zip64Request {
    pub fn any(&self) -> bool {
        self.uncompressed_size || self.compressed_size || self.header_offset || self.disk_start
    }
}

/// Values recovered from, or to be written to, a zip64 block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Zip64Values {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

impl Zip64Values {
    /// Decode the fields named by `request`. A value the block is too short
    /// to hold is left as `None`.
    pub fn parse(data: &[u8], request: Zip64Request) -> Self {
        let mut cursor = Cursor::new(data);
        let mut values = Zip64Values::default();
        if request.uncompressed_size {
            values.uncompressed_size = cursor.read_u64::<LittleEndian>().ok();
        }
        if request.compressed_size {
            values.compressed_size = cursor.read_u64::<LittleEndian>().ok();
        }
        if request.header_offset {
            values.header_offset = cursor.read_u64::<LittleEndian>().ok();
        }
        if request.disk_start {
            values.disk_start = cursor.read_u32::<LittleEndian>().ok();
        }
        values
    }

    pub fn is_empty(&self) -> bool {
        *self == Zip64Values::default()
    }

    /// Append the block, header included. Nothing is written when no value is set.
    pub fn write_block(&self, out: &mut Vec<u8>) {
        if self.is_empty() {
            return;
        }
        let mut body = Vec::with_capacity(28);
        for value in [self.uncompressed_size, self.compressed_size, self.header_offset]
            .into_iter()
            .flatten()
        {
            body.extend_from_slice(&value.to_le_bytes());
        }
        if let Some(disk) = self.disk_start {
            body.extend_from_slice(&disk.to_le_bytes());
        }
        push_block(out, ZIP64_EXTRA_ID, &body);
    }
}

/// AE-1 entries store a real CRC-32; AE-2 entries store zero and rely on the MAC alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesVendorVersion {
    Ae1,
    Ae2,
}

/// The 0x9901 descriptor of an AES-encrypted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtraField {
    pub vendor_version: AesVendorVersion,
    pub strength: AesStrength,
    /// Compression applied before encryption.
    pub compression_method: u16,
}

impl AesExtraField {
    pub fn parse(data: &[u8]) -> Result<Self, &'static str> {
        if data.len() != AES_EXTRA_DATA_LEN as usize {
            return Err("AES extra field has an unexpected length");
        }
        let mut cursor = Cursor::new(data);
        let vendor_version = match read_u16(&mut cursor)? {
            1 => AesVendorVersion::Ae1,
            2 => AesVendorVersion::Ae2,
            _ => return Err("unknown AES vendor version"),
        };
        if read_u16(&mut cursor)? != AES_VENDOR_ID {
            return Err("AES extra field has a foreign vendor id");
        }
        let mut strength = [0u8];
        cursor
            .read_exact(&mut strength)
            .map_err(|_| "truncated AES extra field")?;
        let strength = AesStrength::from_code(strength[0]).ok_or("unknown AES key strength")?;
        let compression_method = read_u16(&mut cursor)?;

        Ok(Self {
            vendor_version,
            strength,
            compression_method,
        })
    }

    /// Append the block, header included.
    pub fn write_block(&self, out: &mut Vec<u8>) {
        let mut body = Vec::with_capacity(AES_EXTRA_DATA_LEN as usize);
        let version = match self.vendor_version {
            AesVendorVersion::Ae1 => 1,
            AesVendorVersion::Ae2 => 2,
        };
        body.extend_from_slice(&u16::to_le_bytes(version));
        body.extend_from_slice(&AES_VENDOR_ID.to_le_bytes());
        body.push(self.strength.code());
        body.extend_from_slice(&self.compression_method.to_le_bytes());
        push_block(out, WINZIP_AES_EXTRA_ID, &body);
    }
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, &'static str> {
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| "truncated AES extra field")
}

fn push_block(out: &mut Vec<u8>, id: u16, body: &[u8]) {
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_blocks_and_flags_truncation() {
        let mut data = Vec::new();
        push_block(&mut data, 0x5455, &[1, 2, 3, 4, 5]);
        push_block(&mut data, 0x000a, &[]);
        data.extend_from_slice(&[0x01, 0x00, 0x10]);

        let blocks: Vec<_> = ExtraBlocks::new(&data).collect();
        assert_eq!(
            blocks,
            vec![
                Ok(ExtraBlock {
                    id: 0x5455,
                    data: &[1, 2, 3, 4, 5]
                }),
                Ok(ExtraBlock {
                    id: 0x000a,
                    data: &[]
                }),
                Err(13),
            ]
        );
    }

    #[test]
    fn zip64_reads_only_requested_fields() {
        let mut body = Vec::new();
        body.extend_from_slice(&0x1_0000_0000u64.to_le_bytes());
        body.extend_from_slice(&0x2_0000_0000u64.to_le_bytes());

        let request = Zip64Request {
            compressed_size: true,
            header_offset: true,
            ..Default::default()
        };
        let values = Zip64Values::parse(&body, request);
        assert_eq!(values.uncompressed_size, None);
        assert_eq!(values.compressed_size, Some(0x1_0000_0000));
        assert_eq!(values.header_offset, Some(0x2_0000_0000));

        let mut written = Vec::new();
        values.write_block(&mut written);
        assert_eq!(&written[..4], &[0x01, 0x00, 16, 0]);
        assert_eq!(&written[4..], &body[..]);
    }

    #[test]
    fn zip64_missing_value_stays_unset() {
        let request = Zip64Request {
            uncompressed_size: true,
            compressed_size: true,
            ..Default::default()
        };
        let values = Zip64Values::parse(&7u64.to_le_bytes(), request);
        assert_eq!(values.uncompressed_size, Some(7));
        assert_eq!(values.compressed_size, None);
    }

    #[test]
    fn aes_descriptor() {
        let data = [0x02, 0x00, b'A', b'E', 0x03, 0x08, 0x00];
        let field = AesExtraField::parse(&data).unwrap();
        assert_eq!(field.vendor_version, AesVendorVersion::Ae2);
        assert_eq!(field.strength, AesStrength::Aes256);
        assert_eq!(field.compression_method, 8);

        let mut written = Vec::new();
        field.write_block(&mut written);
        assert_eq!(&written[..4], &[0x01, 0x99, 7, 0]);
        assert_eq!(&written[4..], &data);

        assert!(AesExtraField::parse(&[0x02, 0x00, b'X', b'Y', 0x03, 0x08, 0x00]).is_err());
        assert!(AesExtraField::parse(&[0x02, 0x00, b'A', b'E', 0x04, 0x08, 0x00]).is_err());
        assert!(AesExtraField::parse(&data[..6]).is_err());
    }
}
