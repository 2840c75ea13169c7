//! Chroma downsampling and upsampling.
//!
//! Downsampling uses a box filter with an alternating rounding bias so the
//! truncation error does not drift in one direction across a row.
//! Upsampling replicates samples; smoothing reconstruction filters are a
//! quality refinement the pipeline does not carry.
//!
//! Sampling ratios are per component, derived from its sampling factors
//! relative to the frame maxima; only 1:1 and 2:1 per axis are supported.

use crate::error::{Error, Result};

/// Per-axis sampling ratio of one component relative to the frame maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRatio {
    /// Component axis matches the frame (no resampling)
    Full,
    /// Component axis is half the frame (2:1)
    Half,
}

impl SampleRatio {
    /// Derive the ratio from a component factor and the frame maximum.
    pub fn from_factors(comp_factor: u8, max_factor: u8) -> Option<Self> {
        match (comp_factor, max_factor) {
            (a, b) if a == b => Some(Self::Full),
            (a, b) if a * 2 == b => Some(Self::Half),
            _ => None,
        }
    }
}

#[inline]
fn at(row: &[u8], i: usize) -> i32 {
    // Columns past the edge replicate the last real sample.
    row[i.min(row.len() - 1)] as i32
}

/// 2:1 horizontal box downsample of one row.
pub fn downsample_h2v1(input: &[u8], output: &mut [u8]) {
    let mut bias = 0;
    for (i, out) in output.iter_mut().enumerate() {
        *out = ((at(input, 2 * i) + at(input, 2 * i + 1) + bias) >> 1) as u8;
        bias ^= 1;
    }
}

/// 2:1 horizontal and vertical box downsample of a row pair.
pub fn downsample_h2v2(row0: &[u8], row1: &[u8], output: &mut [u8]) {
    let mut bias = 1;
    for (i, out) in output.iter_mut().enumerate() {
        let sum = at(row0, 2 * i) + at(row0, 2 * i + 1) + at(row1, 2 * i) + at(row1, 2 * i + 1);
        *out = ((sum + bias) >> 2) as u8;
        bias ^= 3; // alternate 1, 2
    }
}

/// 1:2 horizontal replication upsample of one row.
pub fn upsample_h2(input: &[u8], output: &mut [u8]) {
    for (i, out) in output.iter_mut().enumerate() {
        *out = input[(i / 2).min(input.len() - 1)];
    }
}

/// Copy a row unchanged, truncating or edge-replicating to the output
/// width.
pub fn copy_row(input: &[u8], output: &mut [u8]) {
    for (i, out) in output.iter_mut().enumerate() {
        *out = input[i.min(input.len() - 1)];
    }
}

/// Downsampler for one component, selected at `start_compress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downsampler {
    /// Horizontal ratio
    pub h: SampleRatio,
    /// Vertical ratio
    pub v: SampleRatio,
}

impl Downsampler {
    /// Select from component and frame sampling factors.
    pub fn select(h_samp: u8, v_samp: u8, max_h: u8, max_v: u8) -> Result<Self> {
        let h = SampleRatio::from_factors(h_samp, max_h);
        let v = SampleRatio::from_factors(v_samp, max_v);
        match (h, v) {
            (Some(h), Some(v)) => Ok(Self { h, v }),
            _ => Err(Error::InvalidSamplingFactor {
                h: h_samp,
                v: v_samp,
            }),
        }
    }

    /// Input rows consumed per output row.
    pub fn rows_in_per_row_out(&self) -> usize {
        match self.v {
            SampleRatio::Full => 1,
            SampleRatio::Half => 2,
        }
    }

    /// Downsample one output row from one or two input rows. `rows` holds
    /// `rows_in_per_row_out()` rows; the second may repeat the first at the
    /// image bottom.
    pub fn downsample_row(&self, rows: &[&[u8]], output: &mut [u8]) {
        match (self.h, self.v) {
            (SampleRatio::Full, SampleRatio::Full) => copy_row(rows[0], output),
            (SampleRatio::Half, SampleRatio::Full) => downsample_h2v1(rows[0], output),
            (SampleRatio::Half, SampleRatio::Half) => {
                downsample_h2v2(rows[0], rows[1], output)
            }
            (SampleRatio::Full, SampleRatio::Half) => {
                // v-only 2:1: average vertical pairs.
                let mut bias = 0;
                for (i, out) in output.iter_mut().enumerate() {
                    *out = ((at(rows[0], i) + at(rows[1], i) + bias) >> 1) as u8;
                    bias ^= 1;
                }
            }
        }
    }
}

/// Upsampler for one component, selected at `start_decompress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upsampler {
    /// Horizontal ratio
    pub h: SampleRatio,
    /// Vertical ratio
    pub v: SampleRatio,
}

impl Upsampler {
    /// Select from component and frame sampling factors.
    pub fn select(h_samp: u8, v_samp: u8, max_h: u8, max_v: u8) -> Result<Self> {
        let h = SampleRatio::from_factors(h_samp, max_h);
        let v = SampleRatio::from_factors(v_samp, max_v);
        match (h, v) {
            (Some(h), Some(v)) => Ok(Self { h, v }),
            _ => Err(Error::InvalidSamplingFactor {
                h: h_samp,
                v: v_samp,
            }),
        }
    }

    /// Output rows produced per input row.
    pub fn rows_out_per_row_in(&self) -> usize {
        match self.v {
            SampleRatio::Full => 1,
            SampleRatio::Half => 2,
        }
    }

    /// Map an output row index to the component row it replicates.
    pub fn source_row(&self, output_row: u32) -> u32 {
        match self.v {
            SampleRatio::Full => output_row,
            SampleRatio::Half => output_row / 2,
        }
    }

    /// Upsample one component row to full resolution.
    pub fn upsample_row(&self, input: &[u8], output: &mut [u8]) {
        match self.h {
            SampleRatio::Full => copy_row(input, output),
            SampleRatio::Half => upsample_h2(input, output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_h2v1_averages_pairs() {
        let input = [10u8, 20, 30, 50];
        let mut out = [0u8; 2];
        downsample_h2v1(&input, &mut out);
        assert_eq!(out, [15, 40]); // bias 0 then 1
    }

    #[test]
    fn test_h2v1_replicates_edge_on_odd_width() {
        let input = [10u8, 20, 40];
        let mut out = [0u8; 2];
        downsample_h2v1(&input, &mut out);
        assert_eq!(out[1], ((40 + 40 + 1) >> 1) as u8);
    }

    #[test]
    fn test_h2v2_averages_quads_with_alternating_bias() {
        let row0 = [0u8, 10, 100, 100];
        let row1 = [20u8, 10, 100, 102];
        let mut out = [0u8; 2];
        downsample_h2v2(&row0, &row1, &mut out);
        assert_eq!(out, [(40 + 1) >> 2, ((402u16 + 2) >> 2) as u8]);
    }

    #[test]
    fn test_upsample_replicates() {
        let input = [1u8, 2, 3];
        let mut out = [0u8; 6];
        upsample_h2(&input, &mut out);
        assert_eq!(out, [1, 1, 2, 2, 3, 3]);
        // Odd output width replicates the edge.
        let mut out5 = [0u8; 5];
        upsample_h2(&input[..2], &mut out5);
        assert_eq!(out5, [1, 1, 2, 2, 2]);
    }

    #[test]
    fn test_ratio_selection() {
        assert_eq!(
            SampleRatio::from_factors(1, 2),
            Some(SampleRatio::Half)
        );
        assert_eq!(SampleRatio::from_factors(2, 2), Some(SampleRatio::Full));
        assert_eq!(SampleRatio::from_factors(1, 3), None);
        assert!(Downsampler::select(1, 1, 3, 1).is_err());
    }

    #[test]
    fn test_downsampler_dispatch_matches_ratios() {
        let d = Downsampler::select(1, 1, 2, 2).unwrap();
        assert_eq!(d.rows_in_per_row_out(), 2);
        let rows: [&[u8]; 2] = [&[10, 20], &[30, 40]];
        let mut out = [0u8; 1];
        d.downsample_row(&rows, &mut out);
        assert_eq!(out[0], ((10 + 20 + 30 + 40 + 1) >> 2) as u8);

        let u = Upsampler::select(1, 1, 2, 2).unwrap();
        assert_eq!(u.rows_out_per_row_in(), 2);
        assert_eq!(u.source_row(5), 2);
    }
}
