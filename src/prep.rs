//! Compression preprocessing: color conversion and downsampling.
//!
//! The controller accepts interleaved pixel rows one at a time, converts
//! them to the internal color space, and downsamples them into
//! per-component strips covering one iMCU row each. Strip rows are padded
//! to the full MCU width by edge replication, and a partial final strip is
//! completed by replicating the last real image row, so the coefficient
//! controller downstream always sees whole MCUs.

use crate::color::ColorConverter;
use crate::consts::DCTSIZE;
use crate::error::{Error, Result};
use crate::sample::Downsampler;
use crate::types::{ColorSpace, ComponentInfo, FrameGeometry};
use crate::virtarr::try_alloc_vec;

/// One component's slice of the preprocessing pipeline.
#[derive(Debug)]
struct PrepComponent {
    downsampler: Downsampler,
    /// Full-resolution converted rows for the current row group
    group_rows: Vec<Vec<u8>>,
    /// Downsampled rows for the current iMCU row, padded to MCU width
    strip_rows: Vec<Vec<u8>>,
    /// Rows of this component produced per full-resolution row group
    rows_per_group: usize,
}

/// Preprocessing controller for one compression session.
#[derive(Debug)]
pub struct PrepController {
    converter: ColorConverter,
    comps: Vec<PrepComponent>,
    /// Full-resolution rows per group (the frame's max vertical factor)
    group_height: usize,
    /// Row groups per iMCU row (always DCTSIZE)
    groups_per_strip: usize,
    rows_in_group: usize,
    groups_in_strip: usize,
    /// Copy of the most recent input row, for bottom-edge replication
    last_row: Vec<u8>,
    fed_any: bool,
}

impl PrepController {
    /// Build the controller from the finalized frame layout.
    pub fn new(
        components: &[ComponentInfo],
        geometry: &FrameGeometry,
        source: ColorSpace,
        internal: ColorSpace,
        width: u32,
    ) -> Result<Self> {
        let converter = ColorConverter::select(source, internal)?;
        let group_height = geometry.max_v_samp as usize;
        let mut comps = Vec::with_capacity(components.len());
        for comp in components {
            let downsampler = Downsampler::select(
                comp.h_samp_factor,
                comp.v_samp_factor,
                geometry.max_h_samp,
                geometry.max_v_samp,
            )?;
            let strip_width =
                geometry.mcus_per_row as usize * comp.mcu_width as usize * DCTSIZE;
            let strip_height = comp.v_samp_factor as usize * DCTSIZE;
            let mut group_rows = Vec::with_capacity(group_height);
            for _ in 0..group_height {
                group_rows.push(try_alloc_vec(0u8, width as usize)?);
            }
            let mut strip_rows = Vec::with_capacity(strip_height);
            for _ in 0..strip_height {
                strip_rows.push(try_alloc_vec(0u8, strip_width)?);
            }
            comps.push(PrepComponent {
                downsampler,
                group_rows,
                strip_rows,
                rows_per_group: comp.v_samp_factor as usize,
            });
        }
        let row_bytes = width as usize * source.num_components();
        Ok(Self {
            converter,
            comps,
            group_height,
            groups_per_strip: DCTSIZE,
            rows_in_group: 0,
            groups_in_strip: 0,
            last_row: try_alloc_vec(0u8, row_bytes)?,
            fed_any: false,
        })
    }

    /// True when a full iMCU row of downsampled data is waiting to be taken.
    pub fn strip_ready(&self) -> bool {
        self.groups_in_strip == self.groups_per_strip
    }

    /// Downsampled strip rows for component `comp`; valid while
    /// [`strip_ready`](Self::strip_ready) holds.
    pub fn strip(&self, comp: usize) -> &[Vec<u8>] {
        &self.comps[comp].strip_rows
    }

    /// Mark the current strip consumed, making room for the next iMCU row.
    pub fn consume_strip(&mut self) {
        self.groups_in_strip = 0;
    }

    /// Feed one interleaved pixel row. The caller must drain a ready strip
    /// before feeding more rows.
    pub fn feed_row(&mut self, row: &[u8]) -> Result<()> {
        if self.strip_ready() {
            return Err(Error::InternalError("strip not consumed"));
        }
        if row.len() != self.last_row.len() {
            return Err(Error::BufferSizeMismatch {
                expected: self.last_row.len(),
                actual: row.len(),
            });
        }
        self.last_row.copy_from_slice(row);
        self.fed_any = true;
        self.convert_into_group(row);
        self.rows_in_group += 1;
        if self.rows_in_group == self.group_height {
            self.downsample_group();
        }
        Ok(())
    }

    /// Pad out and complete a partial final strip by replicating the last
    /// image row. After this, `strip_ready` tells whether a final strip is
    /// waiting; a no-op when the image height filled the strips exactly.
    pub fn flush(&mut self) -> Result<()> {
        if !self.fed_any || (self.rows_in_group == 0 && self.groups_in_strip == 0) {
            return Ok(());
        }
        if self.strip_ready() {
            return Err(Error::InternalError("strip not consumed"));
        }
        let pad = self.last_row.clone();
        while !self.strip_ready() {
            self.convert_into_group(&pad);
            self.rows_in_group += 1;
            if self.rows_in_group == self.group_height {
                self.downsample_group();
            }
        }
        Ok(())
    }

    fn convert_into_group(&mut self, row: &[u8]) {
        let slot = self.rows_in_group;
        let mut outputs: Vec<&mut [u8]> = self
            .comps
            .iter_mut()
            .map(|c| c.group_rows[slot].as_mut_slice())
            .collect();
        self.converter.convert_row(row, &mut outputs);
    }

    fn downsample_group(&mut self) {
        for comp in &mut self.comps {
            let ratio = comp.downsampler.rows_in_per_row_out();
            for r in 0..comp.rows_per_group {
                let strip_row = self.groups_in_strip * comp.rows_per_group + r;
                // A 2:1 vertical component reads a pair of group rows per
                // output row; 1:1 reads one.
                let rows: Vec<&[u8]> = (0..ratio)
                    .map(|k| comp.group_rows[r * ratio + k].as_slice())
                    .collect();
                comp.downsampler
                    .downsample_row(&rows, &mut comp.strip_rows[strip_row]);
            }
        }
        self.rows_in_group = 0;
        self.groups_in_strip += 1;
    }
}
