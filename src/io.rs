//! Suspendable byte I/O at the pipeline boundaries.
//!
//! Compressed output is pushed into a [`ByteSink`]; compressed input is
//! pulled from a [`ByteSource`] the caller refills. Neither side ever
//! blocks: a sink that cannot accept more bytes and a source that has run
//! dry cause the invoking operation to return a suspension status, and the
//! caller re-invokes the same operation once capacity or data is available.
//!
//! To keep suspended operations idempotent-resumable, the source supports
//! cheap mark/rewind over absolute stream offsets, and the sink side drains
//! through a staging buffer so a partially accepted write is never lost.

use crate::error::{Error, Result};

// =============================================================================
// Sink side (compression output)
// =============================================================================

/// Push-model destination for compressed bytes.
///
/// `write` returns how many bytes were accepted; accepting fewer than
/// offered signals the sink is (temporarily) full and the pipeline will
/// suspend. Implementations must never block.
pub trait ByteSink {
    /// Offer `buf`; returns the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
}

impl ByteSink for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.try_reserve(buf.len())?;
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// A sink with a caller-managed capacity budget, for exercising and testing
/// suspension: it accepts bytes only up to the granted budget.
#[derive(Debug, Default)]
pub struct ThrottledSink {
    bytes: Vec<u8>,
    budget: usize,
}

impl ThrottledSink {
    /// Create an empty sink with zero budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant the sink capacity for `n` more bytes.
    pub fn grant(&mut self, n: usize) {
        self.budget += n;
    }

    /// Bytes accepted so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the sink, returning the accepted bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl ByteSink for ThrottledSink {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = buf.len().min(self.budget);
        self.bytes.try_reserve(n)?;
        self.bytes.extend_from_slice(&buf[..n]);
        self.budget -= n;
        Ok(n)
    }
}

/// Staging writer in front of a [`ByteSink`].
///
/// All marker and entropy output is appended to the staging buffer and
/// drained opportunistically; bytes the sink refuses simply stay staged, so
/// a suspended pass resumes without re-emitting anything.
#[derive(Debug)]
pub struct SinkWriter<S: ByteSink> {
    sink: S,
    pending: Vec<u8>,
    bytes_written: u64,
}

impl<S: ByteSink> SinkWriter<S> {
    /// Wrap a sink.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            pending: Vec::new(),
            bytes_written: 0,
        }
    }

    /// Append bytes to the staging buffer.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Append one byte to the staging buffer.
    pub fn push_byte(&mut self, byte: u8) {
        self.pending.push(byte);
    }

    /// Append a big-endian u16.
    pub fn push_be16(&mut self, value: u16) {
        self.pending.push((value >> 8) as u8);
        self.pending.push(value as u8);
    }

    /// Try to move staged bytes into the sink. Returns true if the staging
    /// buffer is now empty.
    pub fn drain(&mut self) -> Result<bool> {
        while !self.pending.is_empty() {
            let accepted = self.sink.write(&self.pending)?;
            if accepted == 0 {
                return Ok(false);
            }
            self.pending.drain(..accepted);
            self.bytes_written += accepted as u64;
        }
        Ok(true)
    }

    /// Number of bytes currently staged but not yet accepted by the sink.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total bytes the sink has accepted.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Consume the writer, returning the sink. The staging buffer must be
    /// empty (callers drain before finishing a session).
    pub fn into_sink(self) -> Result<S> {
        if self.pending.is_empty() {
            Ok(self.sink)
        } else {
            Err(Error::InternalError("sink finished with staged bytes"))
        }
    }

    /// Access the underlying sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

// =============================================================================
// Source side (decompression input)
// =============================================================================

/// Opaque resume point within a [`ByteSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMark(u64);

/// Pull-model buffer of compressed input.
///
/// The caller appends chunks with [`feed`](Self::feed) and declares the end
/// of the stream with [`finish`](Self::finish). Consumers take bytes one at
/// a time and may mark/rewind to implement idempotent-resumable decode
/// operations. Consumed bytes are reclaimed by [`compact`](Self::compact)
/// at pass boundaries, when no marks are outstanding.
#[derive(Debug, Default)]
pub struct ByteSource {
    data: Vec<u8>,
    /// Read position relative to `data`
    pos: usize,
    /// Absolute stream offset of `data[0]`
    base: u64,
    /// True once the caller has declared end of input
    eof: bool,
}

impl ByteSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source holding the complete stream.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut src = Self::new();
        src.feed(bytes);
        src.finish();
        src
    }

    /// Append more compressed input.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Declare that no more input will arrive. Running dry afterwards is
    /// truncation (handled leniently downstream), not suspension.
    pub fn finish(&mut self) {
        self.eof = true;
    }

    /// True once the caller has declared end of input.
    pub fn is_finished(&self) -> bool {
        self.eof
    }

    /// Bytes available to read right now.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Take the next byte, if available.
    pub fn next_byte(&mut self) -> Option<u8> {
        if self.pos < self.data.len() {
            let b = self.data[self.pos];
            self.pos += 1;
            Some(b)
        } else {
            None
        }
    }

    /// Look at the next byte without consuming it.
    pub fn peek_byte(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Skip up to `n` bytes; returns how many were actually skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.remaining());
        self.pos += n;
        n
    }

    /// Record the current absolute position.
    pub fn mark(&self) -> SourceMark {
        SourceMark(self.base + self.pos as u64)
    }

    /// Rewind to a previously recorded mark.
    pub fn rewind(&mut self, mark: SourceMark) -> Result<()> {
        if mark.0 < self.base || mark.0 > self.base + self.data.len() as u64 {
            return Err(Error::InternalError("source rewind past compacted data"));
        }
        self.pos = (mark.0 - self.base) as usize;
        Ok(())
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    /// Discard consumed bytes. Invalidates marks taken before the current
    /// position; only called between passes.
    pub fn compact(&mut self) {
        if self.pos > 0 {
            self.data.drain(..self.pos);
            self.base += self.pos as u64;
            self.pos = 0;
        }
    }
}
