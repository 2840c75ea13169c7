//! # pipejpeg
//!
//! Streaming-first JPEG codec pipeline with a libjpeg-style multi-pass
//! architecture: explicit session state machines, suspension-capable I/O,
//! and pluggable pipeline stages on both the compression and
//! decompression sides.
//!
//! ## Compressing
//!
//! A [`Compressor`] owns its output sink and is fed pixel rows:
//!
//! ```no_run
//! use pipejpeg::{ColorSpace, Compressor};
//!
//! # fn main() -> Result<(), pipejpeg::Error> {
//! let mut c = Compressor::new(Vec::new());
//! c.set_image(640, 480, ColorSpace::Rgb)?;
//! c.set_quality(85)?;
//! c.start_compress()?;
//!
//! let row = vec![0u8; 640 * 3];
//! for _ in 0..480 {
//!     c.write_scanlines(&[&row])?;
//! }
//! c.finish_compress()?;
//! let jpeg: Vec<u8> = c.into_sink()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Decompressing
//!
//! A [`Decompressor`] is fed compressed bytes and produces pixel rows.
//! Input may arrive in arbitrary chunks; every consuming call reports
//! suspension instead of blocking when the source runs dry:
//!
//! ```no_run
//! use pipejpeg::{Decompressor, InputStatus};
//!
//! # fn main() -> Result<(), pipejpeg::Error> {
//! # let jpeg: Vec<u8> = vec![];
//! let mut d = Decompressor::new();
//! d.feed_data(&jpeg);
//! d.finish_input();
//!
//! assert_eq!(d.read_header()?, InputStatus::HeaderReady);
//! d.start_decompress()?;
//!
//! let mut row = vec![0u8; d.output_row_len()];
//! while d.output_scanline() < d.height() {
//!     d.read_scanlines(&mut [&mut row])?;
//!     // use `row`
//! }
//! d.finish_decompress()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Both sessions are thin state machines over a chain of pipeline
//! controllers. Each controller runs one of four buffering modes per
//! pass (straight through, save to a full-image array, replay a saved
//! array, or both at once), and the pass planner in [`master`] decides
//! the sequence: sequential frames stream in one pass, Huffman-optimized
//! and progressive frames buffer coefficients and crank them back out,
//! and two-pass color quantization adds a histogram pass over the
//! decoded image.

#![deny(unsafe_code)]
#![warn(missing_docs)]

// ============================================================================
// Internal modules - hidden from public docs but accessible for tests
// ============================================================================

/// Entropy-coded bitstream reading and writing (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod bitstream;

/// Coefficient buffer controllers (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod coef;

/// Color conversion (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod color;

/// Constants and standard tables (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod consts;

/// Forward and inverse DCT (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod dct;

/// Huffman entropy coding stages (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod entropy;

/// Huffman table derivation (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod huffman;

/// Decompression input controller (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod input;

/// Suspension-capable byte sources and sinks.
#[doc(hidden)]
#[allow(dead_code)]
pub mod io;

/// Sample strip buffer between coefficients and postprocessing (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod mainbuf;

/// JPEG marker reading and writing (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod marker;

/// Pass planning (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod master;

/// Upsampling, color deconversion, and quantized output (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod post;

/// Color conversion and downsampling ahead of the DCT (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod prep;

/// Progressive scan scripts and coding stages (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod progressive;

/// Color quantization to a palette (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod quantizer;

/// Chroma downsampling and upsampling (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod sample;

/// Session state machines (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod state;

/// Core type definitions (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod types;

/// Virtual full-image arrays (internal).
#[doc(hidden)]
#[allow(dead_code)]
pub mod virtarr;

// Main session modules (not hidden)
mod compress;
mod decompress;
mod error;

// ============================================================================
// Public API
// ============================================================================

pub use compress::Compressor;
pub use decompress::Decompressor;
pub use error::{Error, Result};
pub use input::InputStatus;
pub use io::{ByteSink, ByteSource, SinkWriter, ThrottledSink};
pub use types::{
    BufferMode, ColorSpace, ComponentInfo, DctBlock, DctMethod, FrameGeometry, QuantTable,
    ScanInfo, Subsampling,
};
pub use virtarr::VirtualArray;
