//! Error types for the codec pipeline.
//!
//! Only *fatal* conditions are represented here: usage-contract violations
//! (an operation invoked in the wrong session state), resource exhaustion,
//! and malformed headers that cannot be resynchronized past. Recoverable
//! input damage (skipped marker bytes, truncated entropy data) is absorbed
//! by the detecting stage and surfaced as counters, and suspension is a
//! normal status return, not an error.

use std::fmt;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal error raised by the codec pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Operation invoked outside its legal session states. Indicates a
    /// caller bug; the session must be discarded.
    BadState {
        /// The public entry point that was called
        operation: &'static str,
        /// Name of the state the session was actually in
        state: &'static str,
    },
    /// Invalid image dimensions (zero width or height)
    InvalidDimensions {
        /// Image width
        width: u32,
        /// Image height
        height: u32,
    },
    /// Caller buffer size doesn't match the configured geometry
    BufferSizeMismatch {
        /// Expected buffer size
        expected: usize,
        /// Actual buffer size
        actual: usize,
    },
    /// Invalid quality value (must be 1-100)
    InvalidQuality(u8),
    /// A quantization table required by the current pass was never supplied
    MissingQuantTable(usize),
    /// A Huffman table required by the current pass was never supplied
    MissingHuffmanTable(usize),
    /// Invalid Huffman table structure (bad bits counts or symbol codes)
    InvalidHuffmanTable,
    /// Invalid sampling factor
    InvalidSamplingFactor {
        /// Horizontal sampling factor
        h: u8,
        /// Vertical sampling factor
        v: u8,
    },
    /// Invalid progressive scan script
    InvalidScanScript {
        /// Reason for the invalid script
        reason: &'static str,
    },
    /// A frame header field was structurally unusable (not resynchronizable)
    MalformedHeader(&'static str),
    /// Unsupported color space for the requested operation
    UnsupportedColorSpace,
    /// Unsupported feature
    UnsupportedFeature(&'static str),
    /// Virtual array window request violated the access discipline
    BadArrayAccess {
        /// Requested window start row
        start: u32,
        /// Requested window row count
        count: u32,
    },
    /// Internal pipeline error
    InternalError(&'static str),
    /// Memory allocation failed
    AllocationFailed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadState { operation, state } => {
                write!(f, "{} called in illegal session state {}", operation, state)
            }
            Error::InvalidDimensions { width, height } => {
                write!(f, "Invalid image dimensions: {}x{}", width, height)
            }
            Error::BufferSizeMismatch { expected, actual } => {
                write!(
                    f,
                    "Buffer size mismatch: expected {}, got {}",
                    expected, actual
                )
            }
            Error::InvalidQuality(q) => {
                write!(f, "Invalid quality value: {} (must be 1-100)", q)
            }
            Error::MissingQuantTable(idx) => {
                write!(f, "Quantization table {} was never defined", idx)
            }
            Error::MissingHuffmanTable(idx) => {
                write!(f, "Huffman table {} was never defined", idx)
            }
            Error::InvalidHuffmanTable => {
                write!(f, "Invalid Huffman table structure")
            }
            Error::InvalidSamplingFactor { h, v } => {
                write!(f, "Invalid sampling factor: {}x{}", h, v)
            }
            Error::InvalidScanScript { reason } => {
                write!(f, "Invalid scan script: {}", reason)
            }
            Error::MalformedHeader(what) => {
                write!(f, "Malformed header: {}", what)
            }
            Error::UnsupportedColorSpace => {
                write!(f, "Unsupported color space")
            }
            Error::UnsupportedFeature(feature) => {
                write!(f, "Unsupported feature: {}", feature)
            }
            Error::BadArrayAccess { start, count } => {
                write!(
                    f,
                    "Illegal virtual array window request: [{}, {})",
                    start,
                    start + count
                )
            }
            Error::InternalError(msg) => {
                write!(f, "Internal pipeline error: {}", msg)
            }
            Error::AllocationFailed => {
                write!(f, "Memory allocation failed")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::AllocationFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = [
            (
                Error::BadState {
                    operation: "write_scanlines",
                    state: "Start",
                },
                "write_scanlines called in illegal session state Start",
            ),
            (
                Error::InvalidDimensions {
                    width: 0,
                    height: 10,
                },
                "Invalid image dimensions: 0x10",
            ),
            (
                Error::MissingQuantTable(2),
                "Quantization table 2 was never defined",
            ),
            (
                Error::InvalidSamplingFactor { h: 3, v: 1 },
                "Invalid sampling factor: 3x1",
            ),
            (Error::AllocationFailed, "Memory allocation failed"),
        ];
        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_error_is_error_trait() {
        let error: &dyn std::error::Error = &Error::AllocationFailed;
        let _ = error.to_string();
    }
}
