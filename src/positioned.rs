//! Positioned reads over a single seekable stream
//!
//! A container is one file handle, but several things want to read it at once:
//! the tar walker pulls compressed bytes from the middle of the file,
//! while anybody holding a metadata [`Section`] reads from near the end.
//! Each of them just issues ordinary `read()` calls, so we give every reader
//! its own cursor and make "seek, then read" a single critical section
//! on the shared handle.

use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::sync::{Arc, Mutex};

/// A seekable stream that can be read at arbitrary offsets from many threads.
#[derive(Debug)]
pub struct PositionedReader<R> {
    inner: Mutex<R>,
}

impl<R: Read + Seek> PositionedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Reads into `buf` from the absolute position `offset`.
    ///
    /// Like [`Read::read()`], this may return fewer bytes than requested.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "positioned reader was poisoned"))?;
        inner.seek(SeekFrom::Start(offset))?;
        inner.read(buf)
    }
}

/// Reads a byte range of a shared [`PositionedReader`] as if it were its own stream.
#[derive(Debug)]
pub struct Section<R> {
    source: Arc<PositionedReader<R>>,
    /// Absolute position of the next read
    position: u64,
    end: u64,
}

impl<R> Section<R> {
    pub fn new(source: Arc<PositionedReader<R>>, range: Range<u64>) -> Self {
        Self {
            source,
            position: range.start,
            end: range.end,
        }
    }

    /// Bytes left before the end of the section
    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.position)
    }
}

impl<R: Read + Seek> Read for Section<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let wanted = buf.len().min(usize::try_from(self.remaining()).unwrap_or(usize::MAX));
        if wanted == 0 {
            return Ok(0);
        }
        let n = self.source.read_at(&mut buf[..wanted], self.position)?;
        self.position += n as u64;
        Ok(n)
    }
}
