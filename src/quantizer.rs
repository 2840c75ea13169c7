//! Color quantization for palette output.
//!
//! Two strategies behind one stage trait: a one-pass quantizer that maps
//! pixels onto a fixed color cube, and a two-pass quantizer that first
//! histograms the full image (the prescan pass) and then maps through a
//! palette chosen by median-cut. The two-pass path is what forces the
//! postprocessing controller into its save/replay buffering modes.

use crate::error::{Error, Result};
use crate::virtarr::try_alloc_vec;

/// Histogram resolution: 5 bits per channel.
const HIST_BITS: u32 = 5;
const HIST_SHIFT: u32 = 8 - HIST_BITS;
const HIST_SIZE: usize = 1 << (3 * HIST_BITS);

/// Maximum palette size.
pub const MAX_PALETTE: usize = 256;

/// Color quantization stage for one output pass sequence.
pub trait ColorQuantStage {
    /// Begin a pass. `is_pre_scan` marks the histogram-gathering dummy
    /// pass of a two-pass quantizer.
    fn start_pass(&mut self, is_pre_scan: bool) -> Result<()>;

    /// Map one interleaved RGB row to palette indices. During a prescan
    /// the output row is ignored.
    fn quantize_row(&mut self, rgb: &[u8], indices: &mut [u8]);

    /// End the current pass (a prescan builds the palette here).
    fn finish_pass(&mut self) -> Result<()>;

    /// True if this quantizer needs a prescan pass before mapping.
    fn needs_prescan(&self) -> bool;

    /// The palette, valid once mapping is possible.
    fn palette(&self) -> &[[u8; 3]];
}

// =============================================================================
// One-pass quantizer
// =============================================================================

/// Fixed-cube quantizer: 8x8x4 levels of R/G/B.
#[derive(Debug)]
pub struct OnePassQuantizer {
    palette: Vec<[u8; 3]>,
    r_map: [u8; 256],
    g_map: [u8; 256],
    b_map: [u8; 256],
}

const CUBE_R: usize = 8;
const CUBE_G: usize = 8;
const CUBE_B: usize = 4;

impl OnePassQuantizer {
    /// Build the cube palette and per-channel index maps.
    pub fn new() -> Self {
        let level = |i: usize, n: usize| (((2 * i + 1) * 255) / (2 * n)) as u8;
        let mut palette = Vec::with_capacity(CUBE_R * CUBE_G * CUBE_B);
        for r in 0..CUBE_R {
            for g in 0..CUBE_G {
                for b in 0..CUBE_B {
                    palette.push([level(r, CUBE_R), level(g, CUBE_G), level(b, CUBE_B)]);
                }
            }
        }
        let map = |n: usize| {
            let mut m = [0u8; 256];
            for (v, out) in m.iter_mut().enumerate() {
                *out = ((v * n) >> 8) as u8;
            }
            m
        };
        Self {
            palette,
            r_map: map(CUBE_R),
            g_map: map(CUBE_G),
            b_map: map(CUBE_B),
        }
    }
}

impl Default for OnePassQuantizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorQuantStage for OnePassQuantizer {
    fn start_pass(&mut self, is_pre_scan: bool) -> Result<()> {
        if is_pre_scan {
            return Err(Error::InternalError("one-pass quantizer has no prescan"));
        }
        Ok(())
    }

    fn quantize_row(&mut self, rgb: &[u8], indices: &mut [u8]) {
        for (px, out) in rgb.chunks_exact(3).zip(indices.iter_mut()) {
            let r = self.r_map[px[0] as usize] as usize;
            let g = self.g_map[px[1] as usize] as usize;
            let b = self.b_map[px[2] as usize] as usize;
            *out = ((r * CUBE_G + g) * CUBE_B + b) as u8;
        }
    }

    fn finish_pass(&mut self) -> Result<()> {
        Ok(())
    }

    fn needs_prescan(&self) -> bool {
        false
    }

    fn palette(&self) -> &[[u8; 3]] {
        &self.palette
    }
}

// =============================================================================
// Two-pass quantizer
// =============================================================================

/// A box of histogram cells being split by median-cut.
#[derive(Debug, Clone, Copy)]
struct CutBox {
    r0: usize,
    r1: usize,
    g0: usize,
    g1: usize,
    b0: usize,
    b1: usize,
    count: u64,
}

impl CutBox {
    fn volume(&self) -> usize {
        (self.r1 - self.r0 + 1) * (self.g1 - self.g0 + 1) * (self.b1 - self.b0 + 1)
    }
}

/// Histogram-then-map quantizer with an adaptive palette.
#[derive(Debug)]
pub struct TwoPassQuantizer {
    desired_colors: usize,
    histogram: Vec<u32>,
    palette: Vec<[u8; 3]>,
    /// Nearest palette index per histogram cell, filled lazily in pass 2
    cell_map: Vec<u16>,
    in_prescan: bool,
}

const CELL_UNMAPPED: u16 = u16::MAX;

impl TwoPassQuantizer {
    /// Create a quantizer targeting `desired_colors` palette entries.
    pub fn new(desired_colors: usize) -> Result<Self> {
        if desired_colors < 8 || desired_colors > MAX_PALETTE {
            return Err(Error::UnsupportedFeature("palette size out of range"));
        }
        Ok(Self {
            desired_colors,
            histogram: try_alloc_vec(0u32, HIST_SIZE)?,
            palette: Vec::new(),
            cell_map: try_alloc_vec(CELL_UNMAPPED, HIST_SIZE)?,
            in_prescan: false,
        })
    }

    #[inline]
    fn cell_index(r: u8, g: u8, b: u8) -> usize {
        (((r >> HIST_SHIFT) as usize) << (2 * HIST_BITS))
            | (((g >> HIST_SHIFT) as usize) << HIST_BITS)
            | ((b >> HIST_SHIFT) as usize)
    }

    fn box_count(&self, b: &CutBox) -> u64 {
        let mut total = 0u64;
        for r in b.r0..=b.r1 {
            for g in b.g0..=b.g1 {
                for bb in b.b0..=b.b1 {
                    total += self.histogram[(r << (2 * HIST_BITS)) | (g << HIST_BITS) | bb] as u64;
                }
            }
        }
        total
    }

    /// Shrink box bounds to the populated region.
    fn shrink(&self, b: &mut CutBox) {
        let occupied = |r: usize, g: usize, bb: usize| {
            self.histogram[(r << (2 * HIST_BITS)) | (g << HIST_BITS) | bb] != 0
        };
        while b.r0 < b.r1
            && !(b.g0..=b.g1).any(|g| (b.b0..=b.b1).any(|bb| occupied(b.r0, g, bb)))
        {
            b.r0 += 1;
        }
        while b.r1 > b.r0
            && !(b.g0..=b.g1).any(|g| (b.b0..=b.b1).any(|bb| occupied(b.r1, g, bb)))
        {
            b.r1 -= 1;
        }
        while b.g0 < b.g1
            && !(b.r0..=b.r1).any(|r| (b.b0..=b.b1).any(|bb| occupied(r, b.g0, bb)))
        {
            b.g0 += 1;
        }
        while b.g1 > b.g0
            && !(b.r0..=b.r1).any(|r| (b.b0..=b.b1).any(|bb| occupied(r, b.g1, bb)))
        {
            b.g1 -= 1;
        }
        while b.b0 < b.b1
            && !(b.r0..=b.r1).any(|r| (b.g0..=b.g1).any(|g| occupied(r, g, b.b0)))
        {
            b.b0 += 1;
        }
        while b.b1 > b.b0
            && !(b.r0..=b.r1).any(|r| (b.g0..=b.g1).any(|g| occupied(r, g, b.b1)))
        {
            b.b1 -= 1;
        }
    }

    fn build_palette(&mut self) {
        let full = CutBox {
            r0: 0,
            r1: (1 << HIST_BITS) - 1,
            g0: 0,
            g1: (1 << HIST_BITS) - 1,
            b0: 0,
            b1: (1 << HIST_BITS) - 1,
            count: 0,
        };
        let mut boxes = vec![CutBox {
            count: self.box_count(&full),
            ..full
        }];
        self.shrink(&mut boxes[0]);

        while boxes.len() < self.desired_colors {
            // Split the most populous splittable box along its longest axis.
            let Some(idx) = boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| b.volume() > 1 && b.count > 0)
                .max_by_key(|(_, b)| b.count)
                .map(|(i, _)| i)
            else {
                break;
            };
            let b = boxes[idx];
            let (dr, dg, db) = (b.r1 - b.r0, b.g1 - b.g0, b.b1 - b.b0);
            let mut lo = b;
            let mut hi = b;
            if dr >= dg && dr >= db {
                let mid = (b.r0 + b.r1) / 2;
                lo.r1 = mid;
                hi.r0 = mid + 1;
            } else if dg >= db {
                let mid = (b.g0 + b.g1) / 2;
                lo.g1 = mid;
                hi.g0 = mid + 1;
            } else {
                let mid = (b.b0 + b.b1) / 2;
                lo.b1 = mid;
                hi.b0 = mid + 1;
            }
            lo.count = self.box_count(&lo);
            hi.count = self.box_count(&hi);
            self.shrink(&mut lo);
            self.shrink(&mut hi);
            boxes[idx] = lo;
            boxes.push(hi);
        }

        // Palette entry = population-weighted mean of each box.
        self.palette.clear();
        for b in &boxes {
            if b.count == 0 {
                continue;
            }
            let (mut rs, mut gs, mut bs, mut n) = (0u64, 0u64, 0u64, 0u64);
            for r in b.r0..=b.r1 {
                for g in b.g0..=b.g1 {
                    for bb in b.b0..=b.b1 {
                        let c =
                            self.histogram[(r << (2 * HIST_BITS)) | (g << HIST_BITS) | bb] as u64;
                        if c == 0 {
                            continue;
                        }
                        // Cell center in 8-bit terms.
                        let center = |v: usize| ((v << HIST_SHIFT) + (1 << (HIST_SHIFT - 1))) as u64;
                        rs += c * center(r);
                        gs += c * center(g);
                        bs += c * center(bb);
                        n += c;
                    }
                }
            }
            if n > 0 {
                self.palette
                    .push([(rs / n) as u8, (gs / n) as u8, (bs / n) as u8]);
            }
        }
        if self.palette.is_empty() {
            self.palette.push([0, 0, 0]);
        }
    }

    fn map_cell(&mut self, cell: usize) -> u16 {
        let cached = self.cell_map[cell];
        if cached != CELL_UNMAPPED {
            return cached;
        }
        // Cell center color.
        let r = (((cell >> (2 * HIST_BITS)) << HIST_SHIFT) + (1 << (HIST_SHIFT - 1))) as i32;
        let g =
            ((((cell >> HIST_BITS) & ((1 << HIST_BITS) - 1)) << HIST_SHIFT)
                + (1 << (HIST_SHIFT - 1))) as i32;
        let b = (((cell & ((1 << HIST_BITS) - 1)) << HIST_SHIFT) + (1 << (HIST_SHIFT - 1))) as i32;
        let mut best = 0u16;
        let mut best_dist = i64::MAX;
        for (i, p) in self.palette.iter().enumerate() {
            let dr = r - p[0] as i32;
            let dg = g - p[1] as i32;
            let db = b - p[2] as i32;
            // Weighted distance; green dominates perceived error.
            let dist = 2 * (dr as i64 * dr as i64)
                + 3 * (dg as i64 * dg as i64)
                + (db as i64 * db as i64);
            if dist < best_dist {
                best_dist = dist;
                best = i as u16;
            }
        }
        self.cell_map[cell] = best;
        best
    }
}

impl ColorQuantStage for TwoPassQuantizer {
    fn start_pass(&mut self, is_pre_scan: bool) -> Result<()> {
        self.in_prescan = is_pre_scan;
        if is_pre_scan {
            self.histogram.fill(0);
        } else if self.palette.is_empty() {
            return Err(Error::BadState {
                operation: "quantize_row",
                state: "palette not built",
            });
        }
        Ok(())
    }

    fn quantize_row(&mut self, rgb: &[u8], indices: &mut [u8]) {
        if self.in_prescan {
            for px in rgb.chunks_exact(3) {
                self.histogram[Self::cell_index(px[0], px[1], px[2])] =
                    self.histogram[Self::cell_index(px[0], px[1], px[2])].saturating_add(1);
            }
            return;
        }
        for (px, out) in rgb.chunks_exact(3).zip(indices.iter_mut()) {
            let cell = Self::cell_index(px[0], px[1], px[2]);
            *out = self.map_cell(cell) as u8;
        }
    }

    fn finish_pass(&mut self) -> Result<()> {
        if self.in_prescan {
            self.build_palette();
            self.cell_map.fill(CELL_UNMAPPED);
            self.in_prescan = false;
        }
        Ok(())
    }

    fn needs_prescan(&self) -> bool {
        self.palette.is_empty()
    }

    fn palette(&self) -> &[[u8; 3]] {
        &self.palette
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_pass_maps_into_palette_range() {
        let mut q = OnePassQuantizer::new();
        q.start_pass(false).unwrap();
        let rgb = [0u8, 0, 0, 255, 255, 255, 10, 200, 100];
        let mut idx = [0u8; 3];
        q.quantize_row(&rgb, &mut idx);
        assert_eq!(q.palette().len(), 256);
        // Black and white map to the darkest and lightest cube corners.
        let p0 = q.palette()[idx[0] as usize];
        let p1 = q.palette()[idx[1] as usize];
        assert!(p0.iter().all(|&c| c < 64));
        assert!(p1.iter().all(|&c| c > 192));
    }

    #[test]
    fn test_one_pass_rejects_prescan() {
        let mut q = OnePassQuantizer::new();
        assert!(q.start_pass(true).is_err());
        assert!(!q.needs_prescan());
    }

    #[test]
    fn test_two_pass_builds_palette_from_histogram() {
        let mut q = TwoPassQuantizer::new(16).unwrap();
        assert!(q.needs_prescan());

        q.start_pass(true).unwrap();
        // Feed two distinct color populations.
        let red_row: Vec<u8> = [200u8, 10, 10].repeat(64);
        let blue_row: Vec<u8> = [10u8, 10, 200].repeat(64);
        let mut sink = [0u8; 64];
        for _ in 0..10 {
            q.quantize_row(&red_row, &mut sink);
            q.quantize_row(&blue_row, &mut sink);
        }
        q.finish_pass().unwrap();
        assert!(!q.needs_prescan());
        assert!(!q.palette().is_empty() && q.palette().len() <= 16);

        q.start_pass(false).unwrap();
        let mut idx = [0u8; 64];
        q.quantize_row(&red_row, &mut idx);
        let p = q.palette()[idx[0] as usize];
        assert!(p[0] > p[2], "red pixels should map to a reddish entry");
        q.quantize_row(&blue_row, &mut idx);
        let p = q.palette()[idx[0] as usize];
        assert!(p[2] > p[0], "blue pixels should map to a bluish entry");
        q.finish_pass().unwrap();
    }

    #[test]
    fn test_two_pass_mapping_before_palette_is_an_error() {
        let mut q = TwoPassQuantizer::new(32).unwrap();
        assert!(q.start_pass(false).is_err());
    }

    #[test]
    fn test_palette_size_bounds() {
        assert!(TwoPassQuantizer::new(4).is_err());
        assert!(TwoPassQuantizer::new(257).is_err());
        assert!(TwoPassQuantizer::new(256).is_ok());
    }
}
