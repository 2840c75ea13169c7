//! Main sample buffering between the coefficient controllers and the
//! pixel-side stages.
//!
//! Both directions use the same shape: one iMCU row of samples per
//! component, `v_samp_factor * DCTSIZE` rows each. On the compression side
//! the buffer backs the raw-data input path (callers supply downsampled
//! component rows directly, bypassing preprocessing). On the decompression
//! side it holds IDCT output for the postprocessor and backs the raw-data
//! output path.
//!
//! This controller only ever operates stripwise; the multi-pass buffering
//! modes live in the coefficient and postprocessing controllers.

use crate::consts::DCTSIZE;
use crate::error::{Error, Result};
use crate::types::{ComponentInfo, FrameGeometry};
use crate::virtarr::try_alloc_vec;

/// One iMCU row of component sample strips.
#[derive(Debug)]
pub struct MainBuffer {
    strips: Vec<Vec<Vec<u8>>>,
    ready: bool,
}

impl MainBuffer {
    /// Buffer sized for the compression side: strip rows are padded to the
    /// full interleaved-MCU width.
    pub fn for_compression(
        components: &[ComponentInfo],
        geometry: &FrameGeometry,
    ) -> Result<Self> {
        Self::with_widths(components, |c| {
            geometry.mcus_per_row as usize * c.mcu_width as usize * DCTSIZE
        })
    }

    /// Buffer sized for the decompression side: strip rows span the
    /// component's block-padded width.
    pub fn for_decompression(components: &[ComponentInfo]) -> Result<Self> {
        Self::with_widths(components, |c| c.width_in_blocks as usize * DCTSIZE)
    }

    fn with_widths(
        components: &[ComponentInfo],
        width_of: impl Fn(&ComponentInfo) -> usize,
    ) -> Result<Self> {
        let mut strips = Vec::with_capacity(components.len());
        for comp in components {
            let height = comp.v_samp_factor as usize * DCTSIZE;
            let width = width_of(comp);
            let mut rows = Vec::with_capacity(height);
            for _ in 0..height {
                rows.push(try_alloc_vec(0u8, width)?);
            }
            strips.push(rows);
        }
        Ok(Self {
            strips,
            ready: false,
        })
    }

    /// Rows in the strip of component `comp`.
    pub fn strip_height(&self, comp: usize) -> usize {
        self.strips[comp].len()
    }

    /// Read access to one component's strip.
    pub fn rows(&self, comp: usize) -> &[Vec<u8>] {
        &self.strips[comp]
    }

    /// Write access to one component's strip.
    pub fn rows_mut(&mut self, comp: usize) -> &mut [Vec<u8>] {
        &mut self.strips[comp]
    }

    /// True while the buffer holds a complete, unconsumed iMCU row.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Mark the buffer filled.
    pub fn set_ready(&mut self) {
        self.ready = true;
    }

    /// Mark the buffer consumed.
    pub fn clear_ready(&mut self) {
        self.ready = false;
    }

    /// Copy caller-supplied raw component rows into the strip, replicating
    /// the last supplied row if fewer than a full strip is given (bottom
    /// edge of the image).
    pub fn load_raw_strip(&mut self, comp: usize, rows: &[&[u8]]) -> Result<()> {
        let strip = &mut self.strips[comp];
        if rows.is_empty() || rows.len() > strip.len() {
            return Err(Error::BufferSizeMismatch {
                expected: strip.len(),
                actual: rows.len(),
            });
        }
        for (i, dst) in strip.iter_mut().enumerate() {
            let src = rows[i.min(rows.len() - 1)];
            // Short input rows edge-replicate into the padding.
            for (j, d) in dst.iter_mut().enumerate() {
                *d = src[j.min(src.len() - 1)];
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::finalize_frame_geometry;

    fn comps_420(width: u32, height: u32) -> (Vec<ComponentInfo>, FrameGeometry) {
        let mut comps = vec![
            ComponentInfo {
                component_id: 1,
                h_samp_factor: 2,
                v_samp_factor: 2,
                ..Default::default()
            },
            ComponentInfo {
                component_id: 2,
                component_index: 1,
                h_samp_factor: 1,
                v_samp_factor: 1,
                ..Default::default()
            },
        ];
        let geom = finalize_frame_geometry(&mut comps, width, height);
        (comps, geom)
    }

    #[test]
    fn test_compression_strip_shapes() {
        let (comps, geom) = comps_420(20, 20);
        let buf = MainBuffer::for_compression(&comps, &geom).unwrap();
        // 2 MCUs per row: luma rows are 32 wide, chroma 16.
        assert_eq!(buf.strip_height(0), 16);
        assert_eq!(buf.rows(0)[0].len(), 32);
        assert_eq!(buf.strip_height(1), 8);
        assert_eq!(buf.rows(1)[0].len(), 16);
    }

    #[test]
    fn test_decompression_strip_shapes() {
        let (comps, _) = comps_420(20, 20);
        let buf = MainBuffer::for_decompression(&comps).unwrap();
        // Luma 3 blocks wide (24), chroma 2 blocks (16).
        assert_eq!(buf.rows(0)[0].len(), 24);
        assert_eq!(buf.rows(1)[0].len(), 16);
    }

    #[test]
    fn test_raw_strip_replicates_edges() {
        let (comps, geom) = comps_420(20, 20);
        let mut buf = MainBuffer::for_compression(&comps, &geom).unwrap();
        let short_rows: Vec<Vec<u8>> = (0..4).map(|r| vec![r as u8 + 1; 20]).collect();
        let refs: Vec<&[u8]> = short_rows.iter().map(|r| r.as_slice()).collect();
        buf.load_raw_strip(1, &refs).unwrap();
        // Row 7 replicates row 3.
        assert_eq!(buf.rows(1)[7][0], 4);
        assert_eq!(buf.rows(1)[3][15], 4);
        // Too many rows is an error.
        let tall: Vec<Vec<u8>> = (0..9).map(|_| vec![0u8; 20]).collect();
        let refs: Vec<&[u8]> = tall.iter().map(|r| r.as_slice()).collect();
        assert!(buf.load_raw_strip(1, &refs).is_err());
    }

    #[test]
    fn test_ready_flag() {
        let (comps, _) = comps_420(8, 8);
        let mut buf = MainBuffer::for_decompression(&comps).unwrap();
        assert!(!buf.is_ready());
        buf.rows_mut(0)[0][0] = 7;
        buf.set_ready();
        assert!(buf.is_ready());
        buf.clear_ready();
        assert!(!buf.is_ready());
    }
}
