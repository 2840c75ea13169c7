//! Session state machines.
//!
//! Each session tracks its global progress as a closed enum. Every public
//! entry point declares the set of states it may legally be invoked from;
//! the guard helpers turn any other invocation into a fatal
//! [`Error::BadState`](crate::Error::BadState). The state machine performs
//! no data transformation - it is purely a gate over buffer/table
//! initialization order.

use crate::error::{Error, Result};

/// Global state of a compression session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressState {
    /// Session created; frame parameters may still change.
    #[default]
    Start,
    /// `start_compress` done; `write_scanlines` is legal.
    Scanning,
    /// `start_compress(raw)` done; `write_raw_data` is legal.
    RawOk,
    /// `write_coefficients` began a transcode; no pixel input is legal.
    WritingCoefs,
}

impl CompressState {
    /// Human-readable state name for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            CompressState::Start => "Start",
            CompressState::Scanning => "Scanning",
            CompressState::RawOk => "RawOk",
            CompressState::WritingCoefs => "WritingCoefs",
        }
    }

    /// Guard: return `BadState` unless `self` is one of `allowed`.
    pub fn require(self, operation: &'static str, allowed: &[CompressState]) -> Result<()> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(Error::BadState {
                operation,
                state: self.name(),
            })
        }
    }
}

/// Global state of a decompression session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecompressState {
    /// Session created; no input consumed.
    #[default]
    Start,
    /// Reading header markers; no SOS seen yet.
    InHeader,
    /// Frame header fully parsed; ready for `start_decompress`.
    Ready,
    /// Performing the dummy pass for two-pass color quantization.
    Prescan,
    /// `start_decompress` done; `read_scanlines` is legal.
    Scanning,
    /// `start_decompress(raw)` done; `read_raw_data` is legal.
    RawOk,
    /// Buffered-image mode: expecting `start_output`.
    BufImage,
    /// Buffered-image mode: between `finish_output` and the next scan.
    BufPost,
    /// `read_coefficients` is consuming the file.
    ReadingCoefs,
    /// Looking for EOI in `finish_decompress`.
    Stopping,
}

impl DecompressState {
    /// Human-readable state name for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            DecompressState::Start => "Start",
            DecompressState::InHeader => "InHeader",
            DecompressState::Ready => "Ready",
            DecompressState::Prescan => "Prescan",
            DecompressState::Scanning => "Scanning",
            DecompressState::RawOk => "RawOk",
            DecompressState::BufImage => "BufImage",
            DecompressState::BufPost => "BufPost",
            DecompressState::ReadingCoefs => "ReadingCoefs",
            DecompressState::Stopping => "Stopping",
        }
    }

    /// Guard: return `BadState` unless `self` is one of `allowed`.
    pub fn require(self, operation: &'static str, allowed: &[DecompressState]) -> Result<()> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(Error::BadState {
                operation,
                state: self.name(),
            })
        }
    }
}
