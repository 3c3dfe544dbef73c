use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::ZipError;

/// Stream wrapper that tallies bytes read and written since it was created.
///
/// Counts are relative to the wrapped stream's position at wrap time, so
/// `initial_offset() + bytes_written()` is where the next output byte lands
/// for an append-only writer.
pub struct CountingStream<S> {
    inner: S,
    initial_offset: u64,
    bytes_read: u64,
    bytes_written: u64,
}

impl<S> CountingStream<S> {
    /// Wrap a stream whose position is not known or does not matter.
    pub fn new(inner: S) -> Self {
        Self::with_offset(inner, 0)
    }

    pub fn with_offset(inner: S, initial_offset: u64) -> Self {
        Self {
            inner,
            initial_offset,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn initial_offset(&self) -> u64 {
        self.initial_offset
    }

    /// Position implied by the output so far.
    pub fn computed_position(&self) -> u64 {
        self.initial_offset + self.bytes_written
    }

    /// Take `delta` bytes back off the written tally.
    ///
    /// Used after seeking back and overwriting a field in place: the rewrite
    /// went through this wrapper and was counted, but it is not new output.
    pub fn adjust_written(&mut self, delta: u64) -> Result<(), ZipError> {
        self.bytes_written = self.bytes_written.checked_sub(delta).ok_or_else(|| {
            ZipError::InvalidArgument(format!(
                "cannot adjust {} written bytes by {delta}",
                self.bytes_written
            ))
        })?;
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Seek> CountingStream<S> {
    /// Wrap a seekable stream, taking its current position as the origin.
    pub fn at_current_position(mut inner: S) -> io::Result<Self> {
        let offset = inner.stream_position()?;
        Ok(Self::with_offset(inner, offset))
    }
}

impl<S: Read> Read for CountingStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl<S: Write> Write for CountingStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: Seek> Seek for CountingStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}
