//! Four-byte record signature probing and scanning.
//!
//! ZIP records are introduced by little-endian 32-bit magic numbers. Readers
//! constantly ask "is there another record here?", so a missing signature is
//! reported as `None` rather than as an error.

use std::io::{self, Read, Seek, SeekFrom};

use memchr::memchr_iter;

/// Local file header, `PK\x03\x04`.
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
/// Central directory file header, `PK\x01\x02`.
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
/// End of central directory, `PK\x05\x06`.
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;
/// Zip64 end of central directory record, `PK\x06\x06`.
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0606_4b50;
/// Zip64 end of central directory locator, `PK\x06\x07`.
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
/// Data descriptor, `PK\x07\x08`. Also opens the first volume of a split archive.
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
/// Marker written at the start of segment 0 of a split archive.
pub const SPLIT_ARCHIVE_SIGNATURE: u32 = DATA_DESCRIPTOR_SIGNATURE;

const SCAN_BATCH_SIZE: usize = 64 * 1024;

/// Read exactly four bytes and decode them as a little-endian signature.
///
/// Returns `Ok(None)` when fewer than four bytes remain. The stream is left
/// wherever the short read ended.
pub fn read_signature<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(None),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Some(u32::from_le_bytes(buf)))
}

/// Read the signature of the next local entry, stepping over a stray data descriptor.
///
/// Some writers leave a data descriptor in front of the next local header even
/// when the entry did not announce one. When the first signature is a
/// descriptor, the 12-byte descriptor body is skipped and the probe repeated;
/// if that misses, a further 8 bytes (the zip64 descriptor tail) are skipped
/// and the probe repeated once more. If neither lands on a local header, the
/// stream is put back just past the original four bytes and the original
/// signature is returned.
pub fn read_entry_signature<R: Read + Seek + ?Sized>(reader: &mut R) -> io::Result<Option<u32>> {
    let Some(first) = read_signature(reader)? else {
        return Ok(None);
    };
    if first != DATA_DESCRIPTOR_SIGNATURE {
        return Ok(Some(first));
    }

    let after_first = reader.stream_position()?;

    reader.seek(SeekFrom::Current(12))?;
    if read_signature(reader)? == Some(LOCAL_FILE_HEADER_SIGNATURE) {
        return Ok(Some(LOCAL_FILE_HEADER_SIGNATURE));
    }

    reader.seek(SeekFrom::Start(after_first + 20))?;
    if read_signature(reader)? == Some(LOCAL_FILE_HEADER_SIGNATURE) {
        return Ok(Some(LOCAL_FILE_HEADER_SIGNATURE));
    }

    reader.seek(SeekFrom::Start(after_first))?;
    Ok(Some(first))
}

/// Scan forward for `target`, returning the number of bytes skipped before it.
///
/// On success the stream is positioned immediately after the signature. When
/// the signature does not occur in the remaining bytes the original position
/// is restored and `None` is returned.
pub fn find_signature<R: Read + Seek + ?Sized>(
    reader: &mut R,
    target: u32,
) -> io::Result<Option<u64>> {
    let start = reader.stream_position()?;
    let first_byte = target.to_le_bytes()[0];
    let mut batch = vec![0u8; SCAN_BATCH_SIZE];

    loop {
        let batch_start = reader.stream_position()?;
        let n = read_batch(reader, &mut batch)?;
        if n == 0 {
            break;
        }

        for i in memchr_iter(first_byte, &batch[..n]) {
            let candidate = batch_start + i as u64;
            reader.seek(SeekFrom::Start(candidate))?;
            if read_signature(reader)? == Some(target) {
                return Ok(Some(candidate - start));
            }
        }

        reader.seek(SeekFrom::Start(batch_start + n as u64))?;
    }

    reader.seek(SeekFrom::Start(start))?;
    Ok(None)
}

/// Fill as much of `buf` as the reader allows, stopping only at EOF.
fn read_batch<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn read_signature_reports_eof() {
        let mut cursor = Cursor::new(vec![0x50, 0x4b, 0x01]);
        assert_eq!(read_signature(&mut cursor).unwrap(), None);

        let mut cursor = Cursor::new(b"PK\x01\x02rest".to_vec());
        assert_eq!(
            read_signature(&mut cursor).unwrap(),
            Some(CENTRAL_DIRECTORY_SIGNATURE)
        );
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn entry_signature_skips_stray_descriptor() {
        let mut data = Vec::new();
        data.extend_from_slice(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&[0xAA; 12]);
        data.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        data.extend_from_slice(b"body");

        let mut cursor = Cursor::new(data);
        assert_eq!(
            read_entry_signature(&mut cursor).unwrap(),
            Some(LOCAL_FILE_HEADER_SIGNATURE)
        );
        assert_eq!(cursor.position(), 20);
    }

    #[test]
    fn entry_signature_skips_zip64_descriptor() {
        let mut data = Vec::new();
        data.extend_from_slice(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&[0xAA; 20]);
        data.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());

        let mut cursor = Cursor::new(data);
        assert_eq!(
            read_entry_signature(&mut cursor).unwrap(),
            Some(LOCAL_FILE_HEADER_SIGNATURE)
        );
        assert_eq!(cursor.position(), 28);
    }

    #[test]
    fn entry_signature_restores_when_nothing_follows() {
        let mut data = Vec::new();
        data.extend_from_slice(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&[0u8; 40]);

        let mut cursor = Cursor::new(data);
        assert_eq!(
            read_entry_signature(&mut cursor).unwrap(),
            Some(DATA_DESCRIPTOR_SIGNATURE)
        );
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn find_signature_across_batch_boundary() {
        let mut data = vec![0u8; SCAN_BATCH_SIZE - 2];
        data.extend_from_slice(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3]);

        let mut cursor = Cursor::new(data);
        let skipped = find_signature(&mut cursor, END_OF_CENTRAL_DIRECTORY_SIGNATURE).unwrap();
        assert_eq!(skipped, Some((SCAN_BATCH_SIZE - 2) as u64));
        assert_eq!(cursor.position(), SCAN_BATCH_SIZE as u64 + 2);
    }

    #[test]
    fn find_signature_ignores_partial_matches() {
        let mut data = b"PKPK\x05".to_vec();
        data.extend_from_slice(b"xxPK\x05\x06tail");
        let mut cursor = Cursor::new(data);
        cursor.set_position(1);
        let skipped = find_signature(&mut cursor, END_OF_CENTRAL_DIRECTORY_SIGNATURE).unwrap();
        assert_eq!(skipped, Some(6));
        assert_eq!(cursor.position(), 11);
    }

    proptest! {
        #[test]
        fn find_signature_position_contract(
            prefix in proptest::collection::vec(0u8..0x50, 0..512),
            suffix in proptest::collection::vec(any::<u8>(), 0..64),
            start in 0usize..16,
            present in any::<bool>(),
        ) {
            let mut data = prefix.clone();
            if present {
                data.extend_from_slice(&CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
            }
            data.extend_from_slice(&suffix);
            let start = start.min(prefix.len()) as u64;

            let mut cursor = Cursor::new(data.clone());
            cursor.set_position(start);
            let found = find_signature(&mut cursor, CENTRAL_DIRECTORY_SIGNATURE).unwrap();

            let expected = data
                .windows(4)
                .enumerate()
                .skip(start as usize)
                .find(|(_, w)| *w == CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())
                .map(|(i, _)| i as u64);

            match expected {
                Some(at) => {
                    prop_assert_eq!(found, Some(at - start));
                    prop_assert_eq!(cursor.position(), at + 4);
                }
                None => {
                    prop_assert_eq!(found, None);
                    prop_assert_eq!(cursor.position(), start);
                }
            }
        }
    }
}
