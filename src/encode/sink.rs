//! Paged output sink for the JPEG encoder.
//!
//! The encoder writes into a fixed-size scratch page. Each full page is
//! handed to [`OutputSink::on_page_full`]; the partial page left at the end
//! goes to [`OutputSink::on_finalize`].

use std::io;

use bytes::BytesMut;

use crate::error::{PipelineError, Result};

/// Flush granularity used unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest accepted page size.
pub const MIN_PAGE_SIZE: usize = 256;

/// Fixed-size staging area between the encoder and a sink.
#[derive(Debug)]
pub struct ScratchPage {
    buf: Box<[u8]>,
    filled: usize,
}

impl ScratchPage {
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0; size].into_boxed_slice(),
            filled: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Bytes still free in the page.
    pub fn free(&self) -> usize {
        self.buf.len() - self.filled
    }

    /// Copies as much of `bytes` as fits, returning the count copied.
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.free());
        self.buf[self.filled..self.filled + n].copy_from_slice(&bytes[..n]);
        self.filled += n;
        n
    }

    pub fn pending(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    pub fn reset(&mut self) {
        self.filled = 0;
    }
}

/// Destination for encoder output.
pub trait OutputSink {
    /// Prepare for a new frame and reset the written count.
    fn initialize(&mut self);

    /// Scratch page the encoder writes into.
    fn page(&mut self) -> &mut ScratchPage;

    /// Called when the scratch page has no free space left.
    fn on_page_full(&mut self) -> Result<()>;

    /// Called once after the last byte; flushes the partial page.
    fn on_finalize(&mut self) -> Result<()>;

    /// Total bytes committed to the destination so far.
    fn written(&self) -> usize;
}

/// Adapts an [`OutputSink`] to [`io::Write`] for the encoder.
pub struct SinkWriter<'s, S: OutputSink + ?Sized> {
    sink: &'s mut S,
}

impl<'s, S: OutputSink + ?Sized> SinkWriter<'s, S> {
    pub fn new(sink: &'s mut S) -> Self {
        Self { sink }
    }

    /// Flush the residual page.
    pub fn finish(self) -> Result<()> {
        self.sink.on_finalize()
    }
}

impl<S: OutputSink + ?Sized> io::Write for SinkWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.sink.page().free() == 0 {
            self.sink.on_page_full().map_err(io::Error::other)?;
        }
        Ok(self.sink.page().fill(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that commits pages into a capacity-limited in-memory buffer.
#[derive(Debug)]
pub struct BufferSink {
    dest: BytesMut,
    capacity: usize,
    page: ScratchPage,
    written: usize,
}

impl BufferSink {
    pub fn new(capacity: usize, page_size: usize) -> Self {
        Self {
            dest: BytesMut::new(),
            capacity,
            page: ScratchPage::new(page_size),
            written: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Limit for frames committed after this call.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Install the destination buffer for the next frame.
    pub fn bind(&mut self, dest: BytesMut) {
        self.dest = dest;
    }

    /// Take the destination buffer back, leaving the sink unbound.
    pub fn unbind(&mut self) -> BytesMut {
        std::mem::take(&mut self.dest)
    }

    fn commit_page(&mut self) -> Result<()> {
        let pending = self.page.pending();
        let attempted = self.written + pending.len();
        if attempted > self.capacity {
            return Err(PipelineError::BufferOverflow {
                attempted,
                capacity: self.capacity,
            });
        }
        self.dest.extend_from_slice(pending);
        self.written = attempted;
        self.page.reset();
        Ok(())
    }
}

impl OutputSink for BufferSink {
    fn initialize(&mut self) {
        self.dest.clear();
        self.page.reset();
        self.written = 0;
    }

    fn page(&mut self) -> &mut ScratchPage {
        &mut self.page
    }

    fn on_page_full(&mut self) -> Result<()> {
        debug_assert_eq!(self.page.free(), 0);
        self.commit_page()
    }

    fn on_finalize(&mut self) -> Result<()> {
        self.commit_page()
    }

    fn written(&self) -> usize {
        self.written
    }
}
