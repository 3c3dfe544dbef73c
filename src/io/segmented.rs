//! Multi-volume ("split") archive storage.
//!
//! A split archive is a run of volume files `<stem>.z01`, `<stem>.z02`, ...
//! followed by a final volume that keeps the archive's own file name. A
//! [`SegmentedStream`] makes such a run look like one stream in one of three
//! modes:
//!
//! - **read**: sequential reading that rolls from volume to volume;
//! - **write**: appending with rollover at a size limit, where the volume
//!   being filled lives in a temporary file until it is complete;
//! - **update**: in-place patching of a single existing volume.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::TempPath;

use super::retry::{RetryPolicy, read_with_retry};
use super::signature::SPLIT_ARCHIVE_SIGNATURE;
use crate::error::{ZipError, ZipResult, unsupported};

/// Volume names carry a two-digit index, so a set holds at most 99 volumes.
pub const MAX_SEGMENTS: u32 = 99;

const SPLIT_SIGNATURE_LEN: u64 = 4;

/// Naming scheme of the volumes that make up one split archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSet {
    dir: PathBuf,
    stem: OsString,
    final_path: PathBuf,
}

impl VolumeSet {
    /// Describe the volume set whose final volume is `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let final_path = path.as_ref().to_path_buf();
        let dir = match final_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = final_path
            .file_stem()
            .map(OsString::from)
            .unwrap_or_default();
        Self {
            dir,
            stem,
            final_path,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// `<stem>.zNN` for 0-based `segment`.
    pub fn intermediate_path(&self, segment: u32) -> PathBuf {
        let mut name = self.stem.clone();
        name.push(format!(".z{:02}", segment + 1));
        self.dir.join(name)
    }

    /// Path of `segment` in a set whose final volume is `last_segment`.
    pub fn segment_path(&self, segment: u32, last_segment: u32) -> PathBuf {
        if segment == last_segment {
            self.final_path.clone()
        } else {
            self.intermediate_path(segment)
        }
    }

    /// All volume paths of a set of `count` volumes, in order.
    pub fn paths(&self, count: u32) -> Vec<PathBuf> {
        let last = count.saturating_sub(1);
        (0..count).map(|s| self.segment_path(s, last)).collect()
    }
}

/// Settings for writing a split archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Largest number of bytes placed in one volume. The split signature at
    /// the start of the first volume is not counted.
    pub max_segment_size: u64,
    /// Start with contiguous writes: a write that does not fit in the current
    /// volume goes whole into the next one instead of being split.
    pub contiguous: bool,
}

impl WriteOptions {
    pub fn new(max_segment_size: u64) -> Self {
        Self {
            max_segment_size,
            contiguous: false,
        }
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024)
    }
}

/// Volume lifecycle notifications, delivered synchronously on the calling thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    /// A volume became the current one.
    Opened { segment: u32 },
    /// A written volume was moved to its permanent name.
    Finalized { segment: u32, path: PathBuf },
    /// Writing resumed at an earlier position.
    RolledBack { segment: u32, offset: u64 },
}

type EventSink = Box<dyn FnMut(&SegmentEvent)>;

/// The volume currently being written, backed by a temporary file in the
/// archive's directory.
struct PendingSegment {
    file: File,
    path: TempPath,
}

impl PendingSegment {
    fn create(dir: &Path) -> io::Result<Self> {
        let (file, path) = temp_builder().tempfile_in(dir)?.into_parts();
        Ok(Self { file, path })
    }

    /// Move an already finalized volume to a fresh temporary name and open it.
    fn reopen(permanent: &Path, dir: &Path) -> io::Result<Self> {
        let path = temp_builder().tempfile_in(dir)?.into_temp_path();
        fs::rename(permanent, &path).map_err(|e| with_path(e, permanent))?;
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self { file, path })
    }

    fn persist(self, target: &Path) -> io::Result<()> {
        let PendingSegment { mut file, path } = self;
        file.flush()?;
        drop(file);
        path.persist(target)
            .map_err(|e| with_path(e.error, target))
    }

    fn discard(self) -> io::Result<()> {
        let PendingSegment { file, path } = self;
        drop(file);
        path.close()
    }
}

fn temp_builder() -> tempfile::Builder<'static, 'static> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".spanzip-").suffix(".tmp");
    builder
}

enum Mode {
    Read {
        file: File,
        last_segment: u32,
        retry: RetryPolicy,
    },
    Write {
        pending: PendingSegment,
        max_segment_size: u64,
        contiguous: bool,
    },
    Update {
        file: File,
    },
    Closed,
}

/// A run of volume files presented as one stream.
pub struct SegmentedStream {
    volumes: VolumeSet,
    current_segment: u32,
    mode: Mode,
    events: Option<EventSink>,
}

impl SegmentedStream {
    /// Open a volume set of `volume_count` volumes for sequential reading from the start.
    pub fn open_read(path: impl AsRef<Path>, volume_count: u32) -> ZipResult<Self> {
        Self::open_read_at(path, volume_count, 0, 0)
    }

    /// Open a volume set for reading, starting at `offset` within `segment`.
    pub fn open_read_at(
        path: impl AsRef<Path>,
        volume_count: u32,
        segment: u32,
        offset: u64,
    ) -> ZipResult<Self> {
        check_volume_count(volume_count)?;
        if segment >= volume_count {
            return Err(ZipError::InvalidArgument(format!(
                "volume {segment} does not exist in a set of {volume_count}"
            )));
        }

        let volumes = VolumeSet::new(path);
        let last_segment = volume_count - 1;
        let mut file = open_volume(&volumes.segment_path(segment, last_segment))?;
        file.seek(SeekFrom::Start(offset))?;

        Ok(Self {
            volumes,
            current_segment: segment,
            mode: Mode::Read {
                file,
                last_segment,
                retry: RetryPolicy::default(),
            },
            events: None,
        })
    }

    /// Create a new split archive whose final volume will be `path`.
    pub fn open_write(path: impl AsRef<Path>, options: WriteOptions) -> ZipResult<Self> {
        if options.max_segment_size == 0 {
            return Err(ZipError::InvalidArgument(
                "maximum segment size must be positive".to_string(),
            ));
        }

        let volumes = VolumeSet::new(path);
        let mut pending = PendingSegment::create(volumes.directory())?;
        pending
            .file
            .write_all(&SPLIT_ARCHIVE_SIGNATURE.to_le_bytes())?;

        Ok(Self {
            volumes,
            current_segment: 0,
            mode: Mode::Write {
                pending,
                max_segment_size: options.max_segment_size,
                contiguous: options.contiguous,
            },
            events: None,
        })
    }

    /// Open one existing volume for in-place modification.
    pub fn open_update(path: impl AsRef<Path>, volume_count: u32, segment: u32) -> ZipResult<Self> {
        check_volume_count(volume_count)?;
        if segment >= volume_count {
            return Err(ZipError::InvalidArgument(format!(
                "volume {segment} does not exist in a set of {volume_count}"
            )));
        }

        let volumes = VolumeSet::new(path);
        let path = volumes.segment_path(segment, volume_count - 1);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| with_path(e, &path))?;

        Ok(Self {
            volumes,
            current_segment: segment,
            mode: Mode::Update { file },
            events: None,
        })
    }

    /// Replace the lock-violation retry policy used by reads.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        if let Mode::Read { retry, .. } = &mut self.mode {
            *retry = policy;
        }
        self
    }

    /// Register a callback for volume lifecycle events.
    pub fn on_event(&mut self, sink: impl FnMut(&SegmentEvent) + 'static) {
        self.events = Some(Box::new(sink));
    }

    pub fn volumes(&self) -> &VolumeSet {
        &self.volumes
    }

    /// 0-based index of the volume currently open.
    pub fn current_segment(&self) -> u32 {
        self.current_segment
    }

    /// Number of volumes written or reachable so far.
    pub fn volume_count(&self) -> u32 {
        match &self.mode {
            Mode::Read { last_segment, .. } => last_segment + 1,
            _ => self.current_segment + 1,
        }
    }

    /// Switch between contiguous and splitting writes.
    pub fn set_contiguous_write(&mut self, value: bool) -> ZipResult<()> {
        match &mut self.mode {
            Mode::Write { contiguous, .. } => {
                *contiguous = value;
                Ok(())
            }
            _ => Err(ZipError::Unsupported("contiguous writes need write mode")),
        }
    }

    /// Segment in which a write of `length` bytes from the current position would end.
    ///
    /// Only predicts; nothing is written and no volume is rolled.
    pub fn compute_segment(&mut self, length: u64) -> ZipResult<u32> {
        let (max_segment_size, contiguous) = match self.mode {
            Mode::Write {
                max_segment_size,
                contiguous,
                ..
            } => (max_segment_size, contiguous),
            _ => return Err(ZipError::Unsupported("segment planning needs write mode")),
        };
        let (position, capacity) = self.write_position_and_capacity()?;
        let end = position.saturating_add(length);
        if end <= capacity {
            return Ok(self.current_segment);
        }
        if contiguous {
            // Same rule as the write: an empty volume keeps the whole buffer.
            return Ok(if position > self.segment_header_len() {
                self.current_segment + 1
            } else {
                self.current_segment
            });
        }
        let spill = (end - capacity).div_ceil(max_segment_size);
        Ok(self
            .current_segment
            .saturating_add(u32::try_from(spill).unwrap_or(u32::MAX)))
    }

    /// Abandon everything written after `offset` in `segment` and continue writing there.
    ///
    /// Volumes after `segment` are deleted. The target volume must still be on
    /// disk; if it is not, the stream is closed and the error returned.
    pub fn truncate_backward(&mut self, segment: u32, offset: u64) -> ZipResult<()> {
        if !matches!(self.mode, Mode::Write { .. }) {
            return Err(ZipError::Unsupported("truncate_backward needs write mode"));
        }
        if segment > self.current_segment {
            return Err(ZipError::InvalidArgument(format!(
                "cannot roll back to volume {segment} from volume {}",
                self.current_segment
            )));
        }
        if segment == 0 && offset < SPLIT_SIGNATURE_LEN {
            return Err(ZipError::InvalidArgument(
                "rollback offset would remove the split signature".to_string(),
            ));
        }

        if segment == self.current_segment {
            if let Mode::Write { pending, .. } = &mut self.mode {
                truncate_at(&mut pending.file, offset)?;
            }
            self.emit(SegmentEvent::RolledBack { segment, offset });
            return Ok(());
        }

        let (pending, max_segment_size, contiguous) =
            match mem::replace(&mut self.mode, Mode::Closed) {
                Mode::Write {
                    pending,
                    max_segment_size,
                    contiguous,
                } => (pending, max_segment_size, contiguous),
                other => {
                    self.mode = other;
                    return Err(ZipError::Unsupported("truncate_backward needs write mode"));
                }
            };

        pending.discard()?;
        for doomed in (segment + 1)..self.current_segment {
            let path = self.volumes.intermediate_path(doomed);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(with_path(e, &path).into()),
            }
        }

        let target = self.volumes.intermediate_path(segment);
        let mut reopened = PendingSegment::reopen(&target, self.volumes.directory())?;
        truncate_at(&mut reopened.file, offset)?;

        debug!(
            "rolled split archive back from volume {} to volume {segment} at offset {offset}",
            self.current_segment
        );
        self.current_segment = segment;
        self.mode = Mode::Write {
            pending: reopened,
            max_segment_size,
            contiguous,
        };
        self.emit(SegmentEvent::RolledBack { segment, offset });
        Ok(())
    }

    /// Finish the stream.
    ///
    /// In write mode the last volume is moved to the archive's own name. In
    /// the other modes the open volume is released. Calling `close` twice is
    /// harmless.
    pub fn close(&mut self) -> ZipResult<()> {
        match mem::replace(&mut self.mode, Mode::Closed) {
            Mode::Write { pending, .. } => {
                let path = self.volumes.final_path().to_path_buf();
                pending.persist(&path)?;
                debug!(
                    "finalized volume {} as {}",
                    self.current_segment,
                    path.display()
                );
                self.emit(SegmentEvent::Finalized {
                    segment: self.current_segment,
                    path,
                });
            }
            Mode::Read { .. } | Mode::Update { .. } | Mode::Closed => {}
        }
        Ok(())
    }

    fn emit(&mut self, event: SegmentEvent) {
        if let Some(sink) = self.events.as_mut() {
            sink(&event);
        }
    }

    fn write_position_and_capacity(&mut self) -> ZipResult<(u64, u64)> {
        let header = self.segment_header_len();
        match &mut self.mode {
            Mode::Write {
                pending,
                max_segment_size,
                ..
            } => {
                let position = pending.file.stream_position()?;
                Ok((position, *max_segment_size + header))
            }
            _ => Err(ZipError::Unsupported("segment planning needs write mode")),
        }
    }

    fn segment_header_len(&self) -> u64 {
        if self.current_segment == 0 {
            SPLIT_SIGNATURE_LEN
        } else {
            0
        }
    }

    fn pending_file(&mut self) -> io::Result<&mut File> {
        match &mut self.mode {
            Mode::Write { pending, .. } => Ok(&mut pending.file),
            _ => Err(unsupported("write needs write mode")),
        }
    }

    /// Finalize the current volume under its `.zNN` name and start the next one.
    fn roll_over(&mut self) -> io::Result<()> {
        let next = self.current_segment + 1;
        if next >= MAX_SEGMENTS {
            return Err(io::Error::other(format!(
                "split archive would need more than {MAX_SEGMENTS} volumes"
            )));
        }

        let finished_path = self.volumes.intermediate_path(self.current_segment);
        let (pending, max_segment_size, contiguous) =
            match mem::replace(&mut self.mode, Mode::Closed) {
                Mode::Write {
                    pending,
                    max_segment_size,
                    contiguous,
                } => (pending, max_segment_size, contiguous),
                other => {
                    self.mode = other;
                    return Err(unsupported("rollover needs write mode"));
                }
            };
        // The finished volume is closed before the next one is created.
        pending.persist(&finished_path)?;
        let finished = self.current_segment;
        debug!("finalized volume {finished} as {}", finished_path.display());
        self.emit(SegmentEvent::Finalized {
            segment: finished,
            path: finished_path,
        });

        self.mode = Mode::Write {
            pending: PendingSegment::create(&self.volumes.dir)?,
            max_segment_size,
            contiguous,
        };
        self.current_segment = next;
        debug!("continuing in volume {next}");
        self.emit(SegmentEvent::Opened { segment: next });
        Ok(())
    }

    fn write_segmented(&mut self, mut buf: &[u8]) -> io::Result<()> {
        let contiguous = match self.mode {
            Mode::Write { contiguous, .. } => contiguous,
            _ => return Err(unsupported("write needs write mode")),
        };

        if contiguous {
            let (position, capacity) = self.write_position_and_capacity()?;
            // An empty volume takes the write whatever its size.
            if position + buf.len() as u64 > capacity && position > self.segment_header_len() {
                self.roll_over()?;
            }
            return self.pending_file()?.write_all(buf);
        }

        loop {
            let (position, capacity) = self.write_position_and_capacity()?;
            if position + buf.len() as u64 <= capacity {
                break;
            }
            let room = capacity.saturating_sub(position) as usize;
            self.pending_file()?.write_all(&buf[..room])?;
            buf = &buf[room..];
            self.roll_over()?;
        }
        if !buf.is_empty() {
            self.pending_file()?.write_all(buf)?;
        }
        Ok(())
    }

    /// Move to the next volume of a read-mode set. Returns `false` at the last volume.
    fn advance_read_volume(&mut self) -> io::Result<bool> {
        let Mode::Read {
            file, last_segment, ..
        } = &mut self.mode
        else {
            return Ok(false);
        };
        if self.current_segment >= *last_segment {
            return Ok(false);
        }

        let next = self.current_segment + 1;
        let path = self.volumes.segment_path(next, *last_segment);
        *file = open_volume(&path)?;
        self.current_segment = next;
        debug!("reading continues in volume {next} ({})", path.display());
        self.emit(SegmentEvent::Opened { segment: next });
        Ok(true)
    }

    fn read_across_volumes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let Mode::Read { file, retry, .. } = &mut self.mode else {
                break;
            };
            let n = read_with_retry(file, &mut buf[filled..], retry)?;
            if n == 0 {
                if !self.advance_read_volume()? {
                    break;
                }
                continue;
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl Read for SegmentedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.mode {
            Mode::Read { .. } => self.read_across_volumes(buf),
            Mode::Update { file } => file.read(buf),
            Mode::Write { .. } => Err(unsupported("read from a split archive opened for writing")),
            Mode::Closed => Err(closed()),
        }
    }
}

impl Write for SegmentedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.mode {
            Mode::Write { .. } => {
                self.write_segmented(buf)?;
                Ok(buf.len())
            }
            Mode::Update { file } => file.write(buf),
            Mode::Read { .. } => Err(unsupported("write to a split archive opened for reading")),
            Mode::Closed => Err(closed()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.mode {
            Mode::Write { pending, .. } => pending.file.flush(),
            Mode::Update { file } => file.flush(),
            Mode::Read { .. } | Mode::Closed => Ok(()),
        }
    }
}

/// Seeking moves within the current volume only.
impl Seek for SegmentedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.mode {
            Mode::Read { file, .. } | Mode::Update { file } => file.seek(pos),
            Mode::Write { pending, .. } => pending.file.seek(pos),
            Mode::Closed => Err(closed()),
        }
    }
}

impl Drop for SegmentedStream {
    fn drop(&mut self) {
        if let Mode::Write { .. } = self.mode {
            warn!(
                "split archive {} dropped without close; discarding volume {}",
                self.volumes.final_path().display(),
                self.current_segment
            );
        }
    }
}

fn check_volume_count(volume_count: u32) -> ZipResult<()> {
    if volume_count == 0 || volume_count > MAX_SEGMENTS {
        return Err(ZipError::InvalidArgument(format!(
            "a split archive has between 1 and {MAX_SEGMENTS} volumes, not {volume_count}"
        )));
    }
    Ok(())
}

fn open_volume(path: &Path) -> io::Result<File> {
    File::open(path).map_err(|e| with_path(e, path))
}

fn truncate_at(file: &mut File, offset: u64) -> ZipResult<()> {
    let len = file.metadata()?.len();
    if offset > len {
        return Err(ZipError::InvalidArgument(format!(
            "rollback offset {offset} is past the end of the volume ({len} bytes)"
        )));
    }
    file.set_len(offset)?;
    file.seek(SeekFrom::Start(offset))?;
    Ok(())
}

fn with_path(err: io::Error, path: &Path) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {err}", path.display()))
}

fn closed() -> io::Error {
    unsupported("stream is closed")
}
