//! End-to-end: archives are assembled with the public building blocks
//! (segmented stream, AES stream, directory records, end records) and read
//! back through `ZipExtractor`.

use std::cell::RefCell;
use std::fs;
use std::io::{Seek, Write};
use std::path::Path;
use std::rc::Rc;

use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use spanzip::io::SegmentEvent;
use spanzip::zip::{AesVendorVersion, CompressionMethod, EndOfCentralDirectory, LocalFileHeader};
use spanzip::{
    AesStrength, ArchiveOptions, DirectoryRecord, DirectoryRecordBuilder, SegmentedStream,
    TextEncoding, WinZipAesStream, WriteOptions, ZipError, ZipExtractor,
};
use tempfile::TempDir;

const PASSWORD: &[u8] = b"correct horse";

struct Planned {
    name: &'static str,
    data: Vec<u8>,
    method: CompressionMethod,
    aes: Option<(AesStrength, AesVendorVersion)>,
}

fn planned(
    name: &'static str,
    data: Vec<u8>,
    method: CompressionMethod,
    aes: Option<(AesStrength, AesVendorVersion)>,
) -> Planned {
    Planned {
        name,
        data,
        method,
        aes,
    }
}

fn text(len: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog\n"
        .iter()
        .cycle()
        .take(len)
        .copied()
        .collect()
}

fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x2545_F491u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

fn stamp() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 17)
        .unwrap()
        .and_hms_opt(10, 30, 0)
        .unwrap()
}

/// Where a contiguous write of `len` bytes will start.
fn next_location(stream: &mut SegmentedStream, len: u64) -> (u32, u64) {
    let current = stream.current_segment();
    if stream.compute_segment(len).unwrap() == current {
        (current, stream.stream_position().unwrap())
    } else {
        (current + 1, 0)
    }
}

fn encode_payload(entry: &Planned) -> Vec<u8> {
    let compressed = match entry.method {
        CompressionMethod::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&entry.data).unwrap();
            encoder.finish().unwrap()
        }
        _ => entry.data.clone(),
    };

    match entry.aes {
        Some((strength, _)) => {
            let mut cipher = WinZipAesStream::open_encrypt(Vec::new(), PASSWORD, strength).unwrap();
            cipher.write_all(&compressed).unwrap();
            cipher.finish_encrypt().unwrap().0
        }
        None => compressed,
    }
}

/// Write `entries` as a split archive whose final volume is `path`.
fn write_archive(path: &Path, max_segment_size: u64, entries: &[Planned]) -> Vec<SegmentEvent> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut stream =
        SegmentedStream::open_write(path, WriteOptions::new(max_segment_size)).unwrap();
    let sink = Rc::clone(&events);
    stream.on_event(move |event| sink.borrow_mut().push(event.clone()));

    let mut records = Vec::new();
    for entry in entries {
        let payload = encode_payload(entry);
        let crc = match entry.aes {
            Some((_, AesVendorVersion::Ae2)) => 0,
            _ => crc32fast::hash(&entry.data),
        };
        let mut builder = DirectoryRecordBuilder::new(entry.name)
            .compression_method(entry.method)
            .last_modified(stamp())
            .crc32(crc)
            .sizes(payload.len() as u64, entry.data.len() as u64);
        if let Some((strength, version)) = entry.aes {
            builder = builder.aes(strength, version);
        }

        let provisional = builder.clone().build().unwrap();
        let header_len = 30 + provisional.file_name().len() + provisional.extra().len();

        stream.set_contiguous_write(true).unwrap();
        let (disk, offset) = next_location(&mut stream, header_len as u64);
        let record = builder.local_header(disk, offset).build().unwrap();
        local_header(&record).write_to(&mut stream).unwrap();

        stream.set_contiguous_write(false).unwrap();
        stream.write_all(&payload).unwrap();
        records.push(record);
    }

    stream.set_contiguous_write(true).unwrap();
    let mut directory = Vec::new();
    let mut cd_start = None;
    for record in &records {
        let mut bytes = Vec::new();
        record.write_to(&mut bytes, TextEncoding::Cp437).unwrap();
        let location = next_location(&mut stream, bytes.len() as u64);
        cd_start.get_or_insert(location);
        stream.write_all(&bytes).unwrap();
        directory.extend_from_slice(&bytes);
    }
    let (cd_disk, cd_offset) = cd_start.unwrap();

    let (eocd_disk, _) = next_location(&mut stream, EndOfCentralDirectory::SIZE as u64);
    EndOfCentralDirectory {
        disk_number: eocd_disk as u16,
        disk_with_cd: cd_disk as u16,
        disk_entries: records.len() as u16,
        total_entries: records.len() as u16,
        cd_size: directory.len() as u32,
        cd_offset: cd_offset as u32,
        comment_len: 0,
    }
    .write_to(&mut stream, b"")
    .unwrap();
    stream.close().unwrap();

    events.take()
}

fn local_header(record: &DirectoryRecord) -> LocalFileHeader {
    LocalFileHeader {
        version_needed: record.version_needed(),
        flags: record.flags(),
        compression_method: record.compression_method().as_u16(),
        last_modified: record.last_modified_packed(),
        crc32: record.crc32(),
        compressed_size: record.compressed_size() as u32,
        uncompressed_size: record.uncompressed_size() as u32,
        file_name: record.file_name().as_bytes().to_vec(),
        extra: record.extra().to_vec(),
    }
}

fn extract(
    archive: &ZipExtractor,
    name: &str,
    password: Option<&[u8]>,
) -> Result<Vec<u8>, ZipError> {
    let entry = archive.find(name).unwrap_or_else(|| panic!("{name} missing"));
    let mut out = Vec::new();
    archive.extract_to_writer(entry, password, &mut out, None)?;
    Ok(out)
}

fn mixed_entries() -> Vec<Planned> {
    vec![
        planned("plain.txt", text(3000), CompressionMethod::Stored, None),
        planned("notes/deflated.txt", text(20_000), CompressionMethod::Deflate, None),
        planned(
            "secret/aes256.bin",
            noise(5000),
            CompressionMethod::Deflate,
            Some((AesStrength::Aes256, AesVendorVersion::Ae1)),
        ),
        planned(
            "secret/aes128.txt",
            text(777),
            CompressionMethod::Stored,
            Some((AesStrength::Aes128, AesVendorVersion::Ae2)),
        ),
        planned("empty.txt", Vec::new(), CompressionMethod::Stored, None),
    ]
}

#[test]
fn split_archive_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bundle.zip");
    let entries = mixed_entries();
    let events = write_archive(&path, 2048, &entries);

    assert!(dir.path().join("bundle.z01").exists());
    assert!(path.exists());
    let finalized: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SegmentEvent::Finalized { path, .. } => Some(path.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(finalized.last(), Some(&path));
    for volume in &finalized {
        assert!(fs::metadata(volume).unwrap().len() <= 2048 + 4);
    }

    let archive = ZipExtractor::open(&path, ArchiveOptions::default()).unwrap();
    assert_eq!(archive.volume_count() as usize, finalized.len());
    assert!(archive.volume_count() > 2);

    let names: Vec<_> = archive.entries().iter().map(|e| e.file_name()).collect();
    assert_eq!(
        names,
        [
            "plain.txt",
            "notes/deflated.txt",
            "secret/aes256.bin",
            "secret/aes128.txt",
            "empty.txt"
        ]
    );
    for entry in &entries {
        assert_eq!(
            extract(&archive, entry.name, Some(PASSWORD)).unwrap(),
            entry.data,
            "{}",
            entry.name
        );
    }

    let aes = archive.find("secret/aes256.bin").unwrap();
    assert!(aes.is_encrypted());
    assert_eq!(aes.compression_method(), CompressionMethod::Aes);
    assert_eq!(aes.effective_compression_method(), CompressionMethod::Deflate);
    assert_eq!(aes.last_modified(), stamp());
}

#[test]
fn aes_entries_need_the_right_password() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.zip");
    write_archive(&path, 1 << 20, &mixed_entries());
    let archive = ZipExtractor::open(&path, ArchiveOptions::default()).unwrap();
    assert_eq!(archive.volume_count(), 1);

    assert!(matches!(
        extract(&archive, "secret/aes256.bin", Some(b"wrong")),
        Err(ZipError::BadPassword)
    ));
    assert!(matches!(
        extract(&archive, "secret/aes128.txt", None),
        Err(ZipError::InvalidArgument(_))
    ));
    // the password is ignored for unencrypted entries
    assert_eq!(extract(&archive, "plain.txt", Some(b"wrong")).unwrap(), text(3000));
}

#[test]
fn tampered_ciphertext_fails_authentication() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.zip");
    let entries = vec![planned(
        "ledger.csv",
        text(600),
        CompressionMethod::Stored,
        Some((AesStrength::Aes128, AesVendorVersion::Ae2)),
    )];
    write_archive(&path, 1 << 20, &entries);

    let archive = ZipExtractor::open(&path, ArchiveOptions::default()).unwrap();
    let entry = archive.find("ledger.csv").unwrap();
    let data_start =
        entry.local_header_offset() as usize + 30 + entry.file_name().len() + entry.extra().len();
    let first_ciphertext = data_start + AesStrength::Aes128.header_len();

    let mut bytes = fs::read(&path).unwrap();
    bytes[first_ciphertext + 100] ^= 0x01;
    fs::write(&path, &bytes).unwrap();

    let archive = ZipExtractor::open(&path, ArchiveOptions::default()).unwrap();
    assert!(matches!(
        extract(&archive, "ledger.csv", Some(PASSWORD)),
        Err(ZipError::Integrity)
    ));
}

#[test]
fn corrupted_stored_data_fails_the_crc_check() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.zip");
    write_archive(&path, 1 << 20, &[planned("a.txt", text(100), CompressionMethod::Stored, None)]);

    let archive = ZipExtractor::open(&path, ArchiveOptions::default()).unwrap();
    let entry = archive.find("a.txt").unwrap();
    let data_start = entry.local_header_offset() as usize + 30 + "a.txt".len();

    let mut bytes = fs::read(&path).unwrap();
    bytes[data_start + 10] ^= 0x20;
    fs::write(&path, &bytes).unwrap();

    let archive = ZipExtractor::open(&path, ArchiveOptions::default()).unwrap();
    assert!(matches!(
        extract(&archive, "a.txt", None),
        Err(ZipError::ChecksumMismatch { .. })
    ));
}

#[test]
fn archive_behind_a_stub_is_still_readable() {
    let dir = TempDir::new().unwrap();
    let original = dir.path().join("original.zip");
    write_archive(
        &original,
        1 << 20,
        &[
            planned("one.txt", text(500), CompressionMethod::Deflate, None),
            planned("two.txt", text(900), CompressionMethod::Stored, None),
        ],
    );

    let mut shifted = vec![0x90u8; 333];
    shifted.extend_from_slice(&fs::read(&original).unwrap());
    let path = dir.path().join("installer.exe");
    fs::write(&path, &shifted).unwrap();

    let archive = ZipExtractor::open(&path, ArchiveOptions::default()).unwrap();
    assert_eq!(archive.entries().len(), 2);
    assert_eq!(extract(&archive, "one.txt", None).unwrap(), text(500));
    assert_eq!(extract(&archive, "two.txt", None).unwrap(), text(900));
}

#[test]
fn shifted_header_offset_past_the_end_is_a_format_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stub.exe");

    let record = DirectoryRecordBuilder::new("far.txt")
        .sizes(4, 4)
        .local_header(0, u64::MAX - 4)
        .build()
        .unwrap();
    let mut directory = Vec::new();
    record.write_to(&mut directory, TextEncoding::Cp437).unwrap();

    let mut data = vec![0x90u8; 10];
    data.extend_from_slice(&directory);
    EndOfCentralDirectory {
        disk_entries: 1,
        total_entries: 1,
        cd_size: directory.len() as u32,
        cd_offset: 0,
        ..Default::default()
    }
    .write_to(&mut data, b"")
    .unwrap();
    fs::write(&path, &data).unwrap();

    let archive = ZipExtractor::open(&path, ArchiveOptions::default()).unwrap();
    match extract(&archive, "far.txt", None) {
        Err(ZipError::Format { offset, .. }) => assert_eq!(offset, u64::MAX - 4),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn extraction_reports_progress_and_creates_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bundle.zip");
    write_archive(&path, 1500, &mixed_entries());
    let archive = ZipExtractor::open(&path, ArchiveOptions::default()).unwrap();

    let entry = archive.find("notes/deflated.txt").unwrap();
    let mut last = (0, 0);
    let mut progress = |done: u64, total: u64| last = (done, total);
    let mut out = Vec::new();
    let written = archive
        .extract_to_writer(entry, None, &mut out, Some(&mut progress))
        .unwrap();
    assert_eq!(written, 20_000);
    assert_eq!(last, (20_000, 20_000));

    let target = dir.path().join("out").join(entry.file_name());
    archive.extract_to_file(entry, None, &target).unwrap();
    assert_eq!(fs::read(&target).unwrap(), text(20_000));
}

#[test]
fn missing_volume_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bundle.zip");
    write_archive(&path, 1024, &mixed_entries());
    fs::remove_file(dir.path().join("bundle.z01")).unwrap();

    let archive = ZipExtractor::open(&path, ArchiveOptions::default()).unwrap();
    assert!(matches!(
        extract(&archive, "plain.txt", None),
        Err(ZipError::Io(_))
    ));
}
