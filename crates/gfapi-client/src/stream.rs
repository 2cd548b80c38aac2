//! Byte-stream views over an open handle.
//!
//! A view borrows its handle mutably, so at most one view advances a given
//! offset at a time.

use std::io::{self, IoSlice, IoSliceMut};

use crate::error::Result;
use crate::handle::FileHandle;

/// Sequential reads from the handle offset.
#[derive(Debug)]
pub struct StreamReader<'a> {
    handle: &'a mut FileHandle,
}

impl<'a> StreamReader<'a> {
    /// A reader starting at the handle's current offset.
    pub fn new(handle: &'a mut FileHandle) -> Self {
        Self { handle }
    }

    /// Next byte, or `None` at end of data.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read_buffer(&mut byte, 1)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Reads up to `max_len` bytes (bounded by `buf.len()`). Returns the
    /// count read; 0 means end of stream.
    pub fn read_buffer(&mut self, buf: &mut [u8], max_len: usize) -> Result<usize> {
        let len = max_len.min(buf.len());
        self.handle.read_next(&mut buf[..len])
    }

    /// Current handle offset.
    pub fn offset(&self) -> u64 {
        self.handle.offset()
    }

    /// The underlying handle.
    pub fn handle(&self) -> &FileHandle {
        &*self.handle
    }
}

impl io::Read for StreamReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        Ok(self.read_buffer(buf, len)?)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        Ok(self.handle.readv(bufs)?)
    }
}

/// Sequential writes at the handle offset.
#[derive(Debug)]
pub struct StreamWriter<'a> {
    handle: &'a mut FileHandle,
}

impl<'a> StreamWriter<'a> {
    /// A writer starting at the handle's current offset.
    pub fn new(handle: &'a mut FileHandle) -> Self {
        Self { handle }
    }

    /// Writes one byte.
    pub fn write_byte(&mut self, value: u8) -> Result<()> {
        self.write_buffer(&[value]).map(|_| ())
    }

    /// Writes all of `buf`. On failure the offset is left where it was
    /// before the call, though some bytes may already be on the volume.
    pub fn write_buffer(&mut self, buf: &[u8]) -> Result<usize> {
        self.handle.write_next(buf)?;
        Ok(buf.len())
    }

    /// Current handle offset.
    pub fn offset(&self) -> u64 {
        self.handle.offset()
    }

    /// The underlying handle.
    pub fn handle(&self) -> &FileHandle {
        &*self.handle
    }
}

impl io::Write for StreamWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_buffer(buf)?)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        Ok(self.handle.writev(bufs)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.handle.sync()?)
    }
}
