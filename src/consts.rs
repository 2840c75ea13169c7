//! Shared constants: block geometry, marker byte values, coefficient
//! ordering tables, and the default quantization tables from ITU-T T.81
//! Annex K.

/// The basic DCT block is 8x8 samples.
pub const DCTSIZE: usize = 8;

/// Number of elements in one DCT block.
pub const DCTSIZE2: usize = 64;

/// Maximum number of color components in a frame.
pub const MAX_COMPONENTS: usize = 4;

/// Maximum number of components that may participate in one scan.
pub const MAX_COMPS_IN_SCAN: usize = 4;

/// Maximum sampling factor (both directions).
pub const MAX_SAMP_FACTOR: usize = 2;

/// Number of quantization table slots.
pub const NUM_QUANT_TBLS: usize = 4;

/// Number of Huffman table slots (per class).
pub const NUM_HUFF_TBLS: usize = 4;

/// Maximum number of blocks in one MCU (T.81 B.2.3 allows 10).
pub const MAX_BLOCKS_IN_MCU: usize = 10;

// =============================================================================
// Marker codes (the byte following 0xFF)
// =============================================================================

/// Start of Image
pub const JPEG_SOI: u8 = 0xD8;
/// End of Image
pub const JPEG_EOI: u8 = 0xD9;
/// Start of Scan
pub const JPEG_SOS: u8 = 0xDA;
/// Baseline Start of Frame
pub const JPEG_SOF0: u8 = 0xC0;
/// Extended sequential Start of Frame
pub const JPEG_SOF1: u8 = 0xC1;
/// Progressive Start of Frame
pub const JPEG_SOF2: u8 = 0xC2;
/// Define Huffman Table
pub const JPEG_DHT: u8 = 0xC4;
/// Define Quantization Table
pub const JPEG_DQT: u8 = 0xDB;
/// Define Restart Interval
pub const JPEG_DRI: u8 = 0xDD;
/// First restart marker (RST0..RST7 = 0xD0..0xD7)
pub const JPEG_RST0: u8 = 0xD0;
/// First application marker (APP0..APP15 = 0xE0..0xEF)
pub const JPEG_APP0: u8 = 0xE0;
/// Comment marker
pub const JPEG_COM: u8 = 0xFE;
/// Temporary marker, has no payload
pub const JPEG_TEM: u8 = 0x01;

/// Zigzag index -> natural (row-major) index.
///
/// Entropy coding visits coefficients in zigzag order; the transform and
/// quantization stages work in natural order.
pub const JPEG_NATURAL_ORDER: [usize; DCTSIZE2] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

// =============================================================================
// Default quantization tables (T.81 Annex K.1, luminance/chrominance)
// =============================================================================

/// Annex K luminance quantization table, natural order.
pub const STD_LUMA_QUANT_TBL: [u16; DCTSIZE2] = [
    16, 11, 10, 16, 24, 40, 51, 61, //
    12, 12, 14, 19, 26, 58, 60, 55, //
    14, 13, 16, 24, 40, 57, 69, 56, //
    14, 17, 22, 29, 51, 87, 80, 62, //
    18, 22, 37, 56, 68, 109, 103, 77, //
    24, 35, 55, 64, 81, 104, 113, 92, //
    49, 64, 78, 87, 103, 121, 120, 101, //
    72, 92, 95, 98, 112, 100, 103, 99,
];

/// Annex K chrominance quantization table, natural order.
pub const STD_CHROMA_QUANT_TBL: [u16; DCTSIZE2] = [
    17, 18, 24, 47, 99, 99, 99, 99, //
    18, 21, 26, 66, 99, 99, 99, 99, //
    24, 26, 56, 99, 99, 99, 99, 99, //
    47, 66, 99, 99, 99, 99, 99, 99, //
    99, 99, 99, 99, 99, 99, 99, 99, //
    99, 99, 99, 99, 99, 99, 99, 99, //
    99, 99, 99, 99, 99, 99, 99, 99, //
    99, 99, 99, 99, 99, 99, 99, 99,
];

/// Divide a by b, rounding up. Geometry helper used throughout the pipeline.
#[inline]
pub const fn div_round_up(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Round a up to the next multiple of b.
#[inline]
pub const fn round_up(a: usize, b: usize) -> usize {
    div_round_up(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_order_is_permutation() {
        let mut seen = [false; DCTSIZE2];
        for &idx in &JPEG_NATURAL_ORDER {
            assert!(!seen[idx]);
            seen[idx] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_natural_order_endpoints() {
        assert_eq!(JPEG_NATURAL_ORDER[0], 0);
        assert_eq!(JPEG_NATURAL_ORDER[1], 1);
        assert_eq!(JPEG_NATURAL_ORDER[2], 8);
        assert_eq!(JPEG_NATURAL_ORDER[63], 63);
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(div_round_up(16, 8), 2);
        assert_eq!(div_round_up(17, 8), 3);
        assert_eq!(round_up(17, 8), 24);
        assert_eq!(round_up(16, 16), 16);
    }
}
