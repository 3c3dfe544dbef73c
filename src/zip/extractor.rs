use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use flate2::read::DeflateDecoder;
use log::{debug, warn};

use super::directory::DirectoryRecord;
use super::encoding::TextEncoding;
use super::parser::{ZipParser, read_central_directory};
use super::structures::{CompressionMethod, EncryptionAlgorithm, LFH_SIZE, LocalFileHeader};
use crate::crypto::WinZipAesStream;
use crate::error::{ZipError, ZipResult};
use crate::io::signature::{CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE};
use crate::io::{
    CountingStream, RetryPolicy, SegmentedStream, find_signature, read_entry_signature,
    read_signature,
};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Progress callback: bytes extracted so far and the entry's total.
pub type Progress<'a> = &'a mut dyn FnMut(u64, u64);

/// How an archive is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveOptions {
    /// Encoding of names and comments that do not carry the UTF-8 flag.
    pub encoding: TextEncoding,
    /// Applied to every read from the archive's volumes.
    pub retry: RetryPolicy,
}

/// ZIP file extractor
///
/// Opens a plain archive or the final volume of a split set, reads the
/// central directory once, and extracts entries on demand.
pub struct ZipExtractor {
    path: PathBuf,
    options: ArchiveOptions,
    volume_count: u32,
    /// Bytes between where the end record says the archive starts and where it really does.
    shift: u64,
    entries: Vec<DirectoryRecord>,
    comment: String,
}

impl ZipExtractor {
    pub fn open(path: impl AsRef<Path>, options: ArchiveOptions) -> ZipResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut parser = ZipParser::new(BufReader::new(file))?;
        let location = parser.directory_location()?;
        drop(parser);

        debug!(
            "{}: {} entries, directory on volume {} at {}",
            path.display(),
            location.total_entries,
            location.disk,
            location.offset
        );

        let mut stream = SegmentedStream::open_read_at(
            &path,
            location.volume_count,
            location.disk,
            location.offset,
        )?
        .with_retry_policy(options.retry);

        let shift = if location.volume_count == 1 && location.total_entries > 0 {
            locate_directory(&mut stream, location.offset)?
        } else {
            0
        };

        let entries =
            read_central_directory(&mut stream, options.encoding, location.total_entries)?;
        stream.close()?;

        Ok(Self {
            path,
            options,
            volume_count: location.volume_count,
            shift,
            entries,
            comment: options.encoding.decode(&location.comment).into_owned(),
        })
    }

    /// List all entries in directory order.
    pub fn entries(&self) -> &[DirectoryRecord] {
        &self.entries
    }

    /// Look up an entry by its full name.
    pub fn find(&self, name: &str) -> Option<&DirectoryRecord> {
        self.entries.iter().find(|e| e.file_name() == name)
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn volume_count(&self) -> u32 {
        self.volume_count
    }

    /// Decrypt and decompress one entry into `out`.
    ///
    /// # Arguments
    ///
    /// * `entry` - A record from [`entries`](Self::entries)
    /// * `password` - Required for AES-encrypted entries, ignored otherwise
    /// * `out` - Destination of the plaintext
    /// * `progress` - Called after every chunk written
    ///
    /// # Returns
    ///
    /// The number of bytes written.
    ///
    /// # Errors
    ///
    /// [`ZipError::BadPassword`] or [`ZipError::Integrity`] for AES failures,
    /// [`ZipError::ChecksumMismatch`] when the CRC-32 disagrees, and
    /// [`ZipError::Unsupported`] for legacy encryption or unknown methods.
    pub fn extract_to_writer<W: Write + ?Sized>(
        &self,
        entry: &DirectoryRecord,
        password: Option<&[u8]>,
        out: &mut W,
        mut progress: Option<Progress<'_>>,
    ) -> ZipResult<u64> {
        if entry.is_directory() {
            return Ok(0);
        }

        let method = entry.effective_compression_method();
        if !matches!(method, CompressionMethod::Stored | CompressionMethod::Deflate) {
            return Err(ZipError::Unsupported("compression method"));
        }

        let mut source = self.open_entry_data(entry)?;
        let region = (&mut source).take(entry.compressed_size());
        let mut sink = CheckedSink::new(out, entry.uncompressed_size());

        match entry.encryption() {
            EncryptionAlgorithm::None => decode(method, region, &mut sink, &mut progress)?,
            EncryptionAlgorithm::WinZipAes(strength) => {
                let password = password.ok_or_else(|| {
                    ZipError::InvalidArgument(format!(
                        "{} is encrypted and needs a password",
                        entry.file_name()
                    ))
                })?;
                let mut cipher = WinZipAesStream::open_decrypt(
                    region,
                    password,
                    strength,
                    entry.ciphertext_len(),
                )?;
                decode(method, &mut cipher, &mut sink, &mut progress)?;
                cipher.finish_decrypt()?;
            }
            EncryptionAlgorithm::PkzipWeak => {
                return Err(ZipError::Unsupported("traditional PKWARE encryption"));
            }
            EncryptionAlgorithm::Unsupported => {
                return Err(ZipError::Unsupported("strong encryption"));
            }
        }

        let (written, crc) = sink.finish();
        if entry.has_meaningful_crc() && crc != entry.crc32() {
            return Err(ZipError::ChecksumMismatch {
                expected: entry.crc32(),
                actual: crc,
            });
        }
        if written != entry.uncompressed_size() {
            return Err(ZipError::format(
                entry.local_header_offset(),
                format!(
                    "{} should be {} bytes but {written} were extracted",
                    entry.file_name(),
                    entry.uncompressed_size()
                ),
            ));
        }
        Ok(written)
    }

    /// Extract one entry to `output_path`, creating parent directories.
    ///
    /// A file left behind by a failed extraction is removed.
    pub fn extract_to_file(
        &self,
        entry: &DirectoryRecord,
        password: Option<&[u8]>,
        output_path: &Path,
    ) -> ZipResult<u64> {
        if entry.is_directory() {
            fs::create_dir_all(output_path)?;
            return Ok(0);
        }
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = BufWriter::new(File::create(output_path)?);
        let result = self
            .extract_to_writer(entry, password, &mut file, None)
            .and_then(|written| {
                file.flush()?;
                Ok(written)
            });
        if result.is_err() {
            drop(file);
            if let Err(e) = fs::remove_file(output_path) {
                warn!("could not remove partial output {}: {e}", output_path.display());
            }
        }
        result
    }

    /// Position a stream at the first byte after the entry's local header.
    fn open_entry_data(&self, entry: &DirectoryRecord) -> ZipResult<SegmentedStream> {
        let header_offset = entry
            .local_header_offset()
            .checked_add(self.shift)
            .ok_or_else(|| {
                ZipError::format(
                    entry.local_header_offset(),
                    format!(
                        "local header of {} is past the end of the archive",
                        entry.file_name()
                    ),
                )
            })?;
        let mut source = SegmentedStream::open_read_at(
            &self.path,
            self.volume_count,
            entry.disk_number_start(),
            header_offset,
        )?
        .with_retry_policy(self.options.retry);

        if read_entry_signature(&mut source)? != Some(LOCAL_FILE_HEADER_SIGNATURE) {
            return Err(ZipError::format(
                header_offset,
                format!("no local header for {}", entry.file_name()),
            ));
        }

        let mut fixed = [0u8; LFH_SIZE];
        fixed[..4].copy_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        source
            .read_exact(&mut fixed[4..])
            .map_err(|e| ZipError::short_read(e, header_offset, "local file header"))?;
        let (_, name_len, extra_len) = LocalFileHeader::fixed_from_bytes(&fixed, header_offset)?;

        // Read rather than seek: the variable fields may straddle a volume boundary.
        let skip = name_len as u64 + extra_len as u64;
        let skipped = io::copy(&mut (&mut source).take(skip), &mut io::sink())?;
        if skipped != skip {
            return Err(ZipError::format(header_offset, "truncated local file header"));
        }
        Ok(source)
    }
}

/// Check that the directory starts where the end record says. If it does
/// not, search forward for it and return how far it was displaced.
fn locate_directory(stream: &mut SegmentedStream, recorded: u64) -> ZipResult<u64> {
    if read_signature(stream)? == Some(CENTRAL_DIRECTORY_SIGNATURE) {
        stream.seek(SeekFrom::Start(recorded))?;
        return Ok(0);
    }

    stream.seek(SeekFrom::Start(recorded))?;
    match find_signature(stream, CENTRAL_DIRECTORY_SIGNATURE)? {
        Some(shift) => {
            warn!("central directory found {shift} bytes after its recorded offset");
            stream.seek(SeekFrom::Current(-4))?;
            Ok(shift)
        }
        None => Err(ZipError::format(recorded, "central directory not found")),
    }
}

/// Destination wrapper that counts and checksums the plaintext.
struct CheckedSink<'a, W: Write + ?Sized> {
    out: CountingStream<&'a mut W>,
    hasher: Hasher,
    total: u64,
}

impl<'a, W: Write + ?Sized> CheckedSink<'a, W> {
    fn new(out: &'a mut W, total: u64) -> Self {
        Self {
            out: CountingStream::new(out),
            hasher: Hasher::new(),
            total,
        }
    }

    fn finish(self) -> (u64, u32) {
        (self.out.bytes_written(), self.hasher.finalize())
    }
}

fn decode<R: Read, W: Write + ?Sized>(
    method: CompressionMethod,
    reader: R,
    sink: &mut CheckedSink<'_, W>,
    progress: &mut Option<Progress<'_>>,
) -> ZipResult<()> {
    match method {
        CompressionMethod::Deflate => pump(DeflateDecoder::new(reader), sink, progress),
        _ => pump(reader, sink, progress),
    }
}

fn pump<R: Read, W: Write + ?Sized>(
    mut reader: R,
    sink: &mut CheckedSink<'_, W>,
    progress: &mut Option<Progress<'_>>,
) -> ZipResult<()> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(into_zip_error(e)),
        };
        sink.hasher.update(&buf[..n]);
        sink.out.write_all(&buf[..n])?;
        if let Some(callback) = progress.as_mut() {
            callback(sink.out.bytes_written(), sink.total);
        }
    }
    sink.out.flush()?;
    Ok(())
}

/// Recover a [`ZipError`] that travelled through an `io::Read` boundary.
fn into_zip_error(err: io::Error) -> ZipError {
    if !err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
        return ZipError::Io(err);
    }
    match err.into_inner().map(|inner| inner.downcast::<ZipError>()) {
        Some(Ok(zip)) => *zip,
        Some(Err(other)) => ZipError::Io(io::Error::other(other)),
        None => ZipError::Io(io::Error::other("stream error")),
    }
}
