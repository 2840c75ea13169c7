//! Color conversion between interleaved RGB rows and per-component planes.
//!
//! Both directions use 16-bit fixed-point BT.601 arithmetic. Conversion
//! happens at the pipeline edges only: the compressor converts incoming
//! pixel rows before downsampling, the decompressor converts after
//! upsampling.

use crate::error::{Error, Result};
use crate::types::ColorSpace;

const SCALEBITS: i32 = 16;
const ONE_HALF: i32 = 1 << (SCALEBITS - 1);
const CENTER: i32 = 128 << SCALEBITS;

/// FIX(x) = x * 2^16, rounded.
const FIX_0_29900: i32 = 19595;
const FIX_0_58700: i32 = 38470;
const FIX_0_11400: i32 = 7471;
const FIX_0_16874: i32 = 11059;
const FIX_0_33126: i32 = 21709;
const FIX_0_50000: i32 = 32768;
const FIX_0_41869: i32 = 27439;
const FIX_0_08131: i32 = 5329;

const FIX_1_40200: i32 = 91881;
const FIX_0_34414: i32 = 22554;
const FIX_0_71414: i32 = 46802;
const FIX_1_77200: i32 = 116130;

/// Convert one interleaved RGB row into Y/Cb/Cr planes.
pub fn rgb_to_ycc_row(rgb: &[u8], y: &mut [u8], cb: &mut [u8], cr: &mut [u8]) {
    debug_assert_eq!(rgb.len(), y.len() * 3);
    for (i, px) in rgb.chunks_exact(3).enumerate() {
        let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
        y[i] = ((FIX_0_29900 * r + FIX_0_58700 * g + FIX_0_11400 * b + ONE_HALF)
            >> SCALEBITS) as u8;
        cb[i] = ((-FIX_0_16874 * r - FIX_0_33126 * g + FIX_0_50000 * b + CENTER + ONE_HALF - 1)
            >> SCALEBITS) as u8;
        cr[i] = ((FIX_0_50000 * r - FIX_0_41869 * g - FIX_0_08131 * b + CENTER + ONE_HALF - 1)
            >> SCALEBITS) as u8;
    }
}

/// Convert one interleaved RGB row into a luma-only plane.
pub fn rgb_to_gray_row(rgb: &[u8], y: &mut [u8]) {
    debug_assert_eq!(rgb.len(), y.len() * 3);
    for (i, px) in rgb.chunks_exact(3).enumerate() {
        let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
        y[i] = ((FIX_0_29900 * r + FIX_0_58700 * g + FIX_0_11400 * b + ONE_HALF)
            >> SCALEBITS) as u8;
    }
}

/// Convert Y/Cb/Cr planes into one interleaved RGB row.
pub fn ycc_to_rgb_row(y: &[u8], cb: &[u8], cr: &[u8], rgb: &mut [u8]) {
    debug_assert_eq!(rgb.len(), y.len() * 3);
    for i in 0..y.len() {
        let yy = y[i] as i32;
        let cb = cb[i] as i32 - 128;
        let cr = cr[i] as i32 - 128;
        let r = yy + ((FIX_1_40200 * cr + ONE_HALF) >> SCALEBITS);
        let g = yy - ((FIX_0_34414 * cb + FIX_0_71414 * cr + ONE_HALF) >> SCALEBITS);
        let b = yy + ((FIX_1_77200 * cb + ONE_HALF) >> SCALEBITS);
        rgb[i * 3] = r.clamp(0, 255) as u8;
        rgb[i * 3 + 1] = g.clamp(0, 255) as u8;
        rgb[i * 3 + 2] = b.clamp(0, 255) as u8;
    }
}

/// Replicate a luma plane into an interleaved RGB row.
pub fn gray_to_rgb_row(y: &[u8], rgb: &mut [u8]) {
    debug_assert_eq!(rgb.len(), y.len() * 3);
    for (i, &s) in y.iter().enumerate() {
        rgb[i * 3] = s;
        rgb[i * 3 + 1] = s;
        rgb[i * 3 + 2] = s;
    }
}

/// Compression-side converter selected from the (source, internal) color
/// space pair at `start_compress` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorConverter {
    /// RGB pixels into Y/Cb/Cr planes
    YccFromRgb,
    /// RGB pixels into a single luma plane
    GrayFromRgb,
    /// Input planes already match the internal color space
    Null,
}

impl ColorConverter {
    /// Pick the converter for a source/internal color space pair.
    pub fn select(source: ColorSpace, internal: ColorSpace) -> Result<Self> {
        match (source, internal) {
            (ColorSpace::Rgb, ColorSpace::YCbCr) => Ok(Self::YccFromRgb),
            (ColorSpace::Rgb, ColorSpace::Grayscale) => Ok(Self::GrayFromRgb),
            (a, b) if a == b => Ok(Self::Null),
            _ => Err(Error::UnsupportedColorSpace),
        }
    }

    /// Convert one interleaved input row into per-component output rows.
    pub fn convert_row(&self, input: &[u8], outputs: &mut [&mut [u8]]) {
        match self {
            Self::YccFromRgb => {
                let (y, rest) = outputs.split_first_mut().expect("3 output planes");
                let (cb, rest) = rest.split_first_mut().expect("3 output planes");
                rgb_to_ycc_row(input, y, cb, &mut rest[0]);
            }
            Self::GrayFromRgb => rgb_to_gray_row(input, outputs[0]),
            Self::Null => {
                let comps = outputs.len();
                for (i, px) in input.chunks_exact(comps).enumerate() {
                    for (c, &s) in px.iter().enumerate() {
                        outputs[c][i] = s;
                    }
                }
            }
        }
    }
}

/// Decompression-side deconverter selected from the (internal, output)
/// color space pair at `start_decompress` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorDeconverter {
    /// Y/Cb/Cr planes into interleaved RGB
    RgbFromYcc,
    /// A luma plane replicated into RGB
    RgbFromGray,
    /// Internal planes interleaved unchanged
    Null,
}

impl ColorDeconverter {
    /// Pick the deconverter for an internal/output color space pair.
    pub fn select(internal: ColorSpace, output: ColorSpace) -> Result<Self> {
        match (internal, output) {
            (ColorSpace::YCbCr, ColorSpace::Rgb) => Ok(Self::RgbFromYcc),
            (ColorSpace::Grayscale, ColorSpace::Rgb) => Ok(Self::RgbFromGray),
            (a, b) if a == b => Ok(Self::Null),
            _ => Err(Error::UnsupportedColorSpace),
        }
    }

    /// Output pixel stride for `internal` component count.
    pub fn output_components(&self, internal_components: usize) -> usize {
        match self {
            Self::RgbFromYcc | Self::RgbFromGray => 3,
            Self::Null => internal_components,
        }
    }

    /// Convert per-component rows into one interleaved output row.
    pub fn convert_row(&self, inputs: &[&[u8]], output: &mut [u8]) {
        match self {
            Self::RgbFromYcc => ycc_to_rgb_row(inputs[0], inputs[1], inputs[2], output),
            Self::RgbFromGray => gray_to_rgb_row(inputs[0], output),
            Self::Null => {
                let comps = inputs.len();
                for (i, px) in output.chunks_exact_mut(comps).enumerate() {
                    for (c, s) in px.iter_mut().enumerate() {
                        *s = inputs[c][i];
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primaries_convert_to_expected_ycc() {
        let rgb = [255u8, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255, 0, 0, 0];
        let mut y = [0u8; 5];
        let mut cb = [0u8; 5];
        let mut cr = [0u8; 5];
        rgb_to_ycc_row(&rgb, &mut y, &mut cb, &mut cr);
        assert_eq!(y, [76, 150, 29, 255, 0]);
        // White and black are neutral.
        assert_eq!((cb[3], cr[3]), (128, 128));
        assert_eq!((cb[4], cr[4]), (128, 128));
        // Red has maximal Cr, blue maximal Cb.
        assert!(cr[0] > 200 && cb[2] > 200);
    }

    #[test]
    fn test_ycc_round_trip_is_close() {
        let rgb: Vec<u8> = (0..255).map(|i| (i * 3) as u8).collect();
        let n = rgb.len() / 3;
        let mut y = vec![0u8; n];
        let mut cb = vec![0u8; n];
        let mut cr = vec![0u8; n];
        rgb_to_ycc_row(&rgb[..n * 3], &mut y, &mut cb, &mut cr);
        let mut back = vec![0u8; n * 3];
        ycc_to_rgb_row(&y, &cb, &cr, &mut back);
        for (a, b) in rgb[..n * 3].iter().zip(back.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 3);
        }
    }

    #[test]
    fn test_gray_from_rgb_matches_luma() {
        let rgb = [10u8, 20, 30, 200, 100, 50];
        let mut y1 = [0u8; 2];
        let mut cb = [0u8; 2];
        let mut cr = [0u8; 2];
        let mut y2 = [0u8; 2];
        rgb_to_ycc_row(&rgb, &mut y1, &mut cb, &mut cr);
        rgb_to_gray_row(&rgb, &mut y2);
        assert_eq!(y1, y2);
    }

    #[test]
    fn test_converter_selection() {
        assert_eq!(
            ColorConverter::select(ColorSpace::Rgb, ColorSpace::YCbCr).unwrap(),
            ColorConverter::YccFromRgb
        );
        assert_eq!(
            ColorConverter::select(ColorSpace::Grayscale, ColorSpace::Grayscale).unwrap(),
            ColorConverter::Null
        );
        assert!(ColorConverter::select(ColorSpace::YCbCr, ColorSpace::Rgb).is_err());
        assert_eq!(
            ColorDeconverter::select(ColorSpace::YCbCr, ColorSpace::Rgb).unwrap(),
            ColorDeconverter::RgbFromYcc
        );
        assert!(ColorDeconverter::select(ColorSpace::Rgb, ColorSpace::YCbCr).is_err());
    }

    #[test]
    fn test_null_conversion_interleaves_and_deinterleaves() {
        let input = [1u8, 2, 3, 4, 5, 6];
        let mut a = [0u8; 2];
        let mut b = [0u8; 2];
        let mut c = [0u8; 2];
        {
            let mut outs: [&mut [u8]; 3] = [&mut a, &mut b, &mut c];
            ColorConverter::Null.convert_row(&input, &mut outs);
        }
        assert_eq!((a, b, c), ([1, 4], [2, 5], [3, 6]));

        let mut out = [0u8; 6];
        ColorDeconverter::Null.convert_row(&[&a, &b, &c], &mut out);
        assert_eq!(out, input);
    }
}
