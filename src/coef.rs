//! Coefficient buffer controllers.
//!
//! These sit between the sample-domain stages and the entropy coders,
//! running the forward DCT on the way in and the inverse DCT on the way
//! out. Each controller operates in one [`BufferMode`] per pass:
//!
//! - `PassThrough`: one iMCU row at a time, no full-image storage
//! - `SaveSource`: transform into the full-image coefficient arrays only
//! - `CrankDest`: replay the arrays into the entropy coder / sample strips
//! - `SaveAndPass`: transform into the arrays and forward in the same pass
//!
//! MCU assembly and disassembly go through a scratch copy of the MCU's
//! blocks, so the entropy stages never hold references into the virtual
//! arrays. Interleaved scans walk the MCU-padded grid (strips arrive
//! edge-replicated, so padding blocks carry real data); single-component
//! scans walk only the component's true block grid.

use crate::bitstream::BitWriter;
use crate::consts::DCTSIZE;
use crate::dct::{forward_block, inverse_block};
use crate::entropy::{EntropyDecodeStage, EntropyEncodeStage};
use crate::error::{Error, Result};
use crate::io::{ByteSink, ByteSource};
use crate::mainbuf::MainBuffer;
use crate::types::{
    BufferMode, ComponentInfo, DctBlock, DctMethod, FrameGeometry, QuantTable, ScanInfo,
};
use crate::virtarr::VirtualArray;

/// Component block-grid width padded out to whole interleaved MCUs.
fn padded_width_in_blocks(comp: &ComponentInfo, geometry: &FrameGeometry) -> u32 {
    geometry.mcus_per_row * comp.mcu_width
}

/// MCU grid of a scan: (rows, cols). Interleaved scans use the frame MCU
/// grid; a single-component scan walks its true block grid.
fn scan_grid(
    components: &[ComponentInfo],
    geometry: &FrameGeometry,
    scan: &ScanInfo,
) -> (u32, u32) {
    if scan.comps_in_scan == 1 {
        let comp = &components[scan.component_index[0] as usize];
        (comp.height_in_blocks, comp.width_in_blocks)
    } else {
        (geometry.mcu_rows, geometry.mcus_per_row)
    }
}

fn resolve_quant(
    components: &[ComponentInfo],
    quant_tables: &[Option<QuantTable>],
) -> Result<Vec<QuantTable>> {
    components
        .iter()
        .map(|c| {
            quant_tables
                .get(c.quant_tbl_no as usize)
                .and_then(|t| *t)
                .ok_or(Error::MissingQuantTable(c.quant_tbl_no as usize))
        })
        .collect()
}

fn alloc_arrays(
    components: &[ComponentInfo],
    geometry: &FrameGeometry,
) -> Result<Vec<VirtualArray<DctBlock>>> {
    components
        .iter()
        .map(|c| {
            VirtualArray::new(
                padded_width_in_blocks(c, geometry) as usize,
                geometry.mcu_rows * c.mcu_height,
            )
        })
        .collect()
}

fn alloc_strip(
    components: &[ComponentInfo],
    geometry: &FrameGeometry,
) -> Result<Vec<Vec<Vec<DctBlock>>>> {
    components
        .iter()
        .map(|c| {
            let width = padded_width_in_blocks(c, geometry) as usize;
            let mut rows = Vec::new();
            rows.try_reserve_exact(c.mcu_height as usize)?;
            for _ in 0..c.mcu_height {
                rows.push(crate::virtarr::try_alloc_vec([0i16; 64], width)?);
            }
            Ok(rows)
        })
        .collect()
}

/// Copy one 8x8 sample block out of strip rows.
fn load_sample_block(rows: &[Vec<u8>], y0: usize, x0: usize) -> [u8; 64] {
    let mut block = [0u8; 64];
    for y in 0..DCTSIZE {
        let row = &rows[y0 + y];
        block[y * DCTSIZE..(y + 1) * DCTSIZE].copy_from_slice(&row[x0..x0 + DCTSIZE]);
    }
    block
}

/// Scatter one 8x8 sample block into strip rows.
fn store_sample_block(rows: &mut [Vec<u8>], y0: usize, x0: usize, block: &[u8; 64]) {
    for y in 0..DCTSIZE {
        let row = &mut rows[y0 + y];
        row[x0..x0 + DCTSIZE].copy_from_slice(&block[y * DCTSIZE..(y + 1) * DCTSIZE]);
    }
}

// =============================================================================
// Compression side
// =============================================================================

/// Coefficient controller for compression.
pub struct CoefEncoder {
    components: Vec<ComponentInfo>,
    geometry: FrameGeometry,
    quant: Vec<QuantTable>,
    method: DctMethod,
    mode: BufferMode,
    arrays: Option<Vec<VirtualArray<DctBlock>>>,
    /// One iMCU row of blocks per component, for stripwise passes
    strip: Vec<Vec<Vec<DctBlock>>>,
    strip_loaded: bool,
    row: u32,
    col: u32,
}

impl CoefEncoder {
    /// Build the controller. `buffered` allocates the full-image
    /// coefficient arrays needed by any mode other than `PassThrough`.
    pub fn new(
        components: &[ComponentInfo],
        geometry: &FrameGeometry,
        quant_tables: &[Option<QuantTable>],
        method: DctMethod,
        buffered: bool,
    ) -> Result<Self> {
        Ok(Self {
            components: components.to_vec(),
            geometry: *geometry,
            quant: resolve_quant(components, quant_tables)?,
            method,
            mode: BufferMode::PassThrough,
            arrays: if buffered {
                Some(alloc_arrays(components, geometry)?)
            } else {
                None
            },
            strip: alloc_strip(components, geometry)?,
            strip_loaded: false,
            row: 0,
            col: 0,
        })
    }

    /// Begin a pass in the given mode, resetting the MCU cursor.
    pub fn start_pass(&mut self, mode: BufferMode) -> Result<()> {
        if mode != BufferMode::PassThrough && self.arrays.is_none() {
            return Err(Error::InternalError(
                "buffered mode without coefficient arrays",
            ));
        }
        self.mode = mode;
        self.strip_loaded = false;
        self.row = 0;
        self.col = 0;
        if let Some(arrays) = &mut self.arrays {
            for a in arrays {
                a.start_pass();
            }
        }
        Ok(())
    }

    /// Direct access to the coefficient arrays (transcoding path).
    pub fn arrays_mut(&mut self) -> Option<&mut [VirtualArray<DctBlock>]> {
        self.arrays.as_deref_mut()
    }

    /// Transform and forward one iMCU row of sample strips. `strips[c]`
    /// holds `v_samp_factor * DCTSIZE` padded rows of component `c`.
    ///
    /// Returns false on suspension; call again with the same strips (the
    /// transformed blocks are retained, so the transform is not redone).
    pub fn compress_strip<S: ByteSink>(
        &mut self,
        strips: &[&[Vec<u8>]],
        entropy: &mut dyn EntropyEncodeStage<S>,
        writer: &mut BitWriter<S>,
    ) -> Result<bool> {
        if !matches!(self.mode, BufferMode::PassThrough | BufferMode::SaveAndPass) {
            return Err(Error::InternalError("strip input outside a stripwise pass"));
        }
        if !self.strip_loaded {
            self.transform_strip(strips)?;
            self.save_strip_if_needed()?;
            self.strip_loaded = true;
            self.col = 0;
        }
        while self.col < self.geometry.mcus_per_row {
            let scratch = self.gather_strip_mcu(self.col as usize);
            let refs: Vec<&DctBlock> = scratch.iter().collect();
            if !entropy.encode_mcu(writer, &refs)? {
                return Ok(false);
            }
            self.col += 1;
        }
        self.strip_loaded = false;
        self.row += 1;
        self.col = 0;
        Ok(true)
    }

    /// Transform one iMCU row into the coefficient arrays without running
    /// the entropy stage (save-only pass).
    pub fn save_strip(&mut self, strips: &[&[Vec<u8>]]) -> Result<()> {
        if self.mode != BufferMode::SaveSource {
            return Err(Error::InternalError("save-only input outside a save pass"));
        }
        self.transform_strip(strips)?;
        self.save_strip_if_needed()?;
        self.row += 1;
        Ok(())
    }

    /// Replay the coefficient arrays through the entropy coder for one
    /// scan. Returns false on suspension; resumes where it left off.
    pub fn crank_scan<S: ByteSink>(
        &mut self,
        scan: &ScanInfo,
        entropy: &mut dyn EntropyEncodeStage<S>,
        writer: &mut BitWriter<S>,
    ) -> Result<bool> {
        if self.mode != BufferMode::CrankDest {
            return Err(Error::InternalError("crank outside a crank pass"));
        }
        let (rows, cols) = scan_grid(&self.components, &self.geometry, scan);
        let arrays = self
            .arrays
            .as_mut()
            .ok_or(Error::InternalError("crank without coefficient arrays"))?;
        while self.row < rows {
            // Re-requesting the same window start after a suspension is
            // allowed by the arrays' access discipline.
            let mut windows = Vec::with_capacity(scan.comps_in_scan as usize);
            for (ci, array) in Self::scan_arrays(arrays, scan) {
                let comp = &self.components[ci];
                let (start, count) = if scan.comps_in_scan == 1 {
                    (self.row, 1)
                } else {
                    (self.row * comp.mcu_height, comp.mcu_height)
                };
                windows.push(array.access(start, count)?);
            }
            while self.col < cols {
                let mut scratch: Vec<DctBlock> = Vec::new();
                for ci in 0..scan.comps_in_scan as usize {
                    let comp = &self.components[scan.component_index[ci] as usize];
                    if scan.comps_in_scan == 1 {
                        scratch.push(windows[ci].row(0)[self.col as usize]);
                    } else {
                        for y in 0..comp.mcu_height as usize {
                            for x in 0..comp.mcu_width as usize {
                                let bx = self.col as usize * comp.mcu_width as usize + x;
                                scratch.push(windows[ci].row(y)[bx]);
                            }
                        }
                    }
                }
                let refs: Vec<&DctBlock> = scratch.iter().collect();
                if !entropy.encode_mcu(writer, &refs)? {
                    return Ok(false);
                }
                self.col += 1;
            }
            self.col = 0;
            self.row += 1;
        }
        Ok(true)
    }

    /// Arrays participating in `scan`, paired with their component index.
    fn scan_arrays<'a>(
        arrays: &'a mut [VirtualArray<DctBlock>],
        scan: &ScanInfo,
    ) -> impl Iterator<Item = (usize, &'a mut VirtualArray<DctBlock>)> {
        let members: Vec<usize> = (0..scan.comps_in_scan as usize)
            .map(|ci| scan.component_index[ci] as usize)
            .collect();
        arrays
            .iter_mut()
            .enumerate()
            .filter(move |(i, _)| members.contains(i))
    }

    fn transform_strip(&mut self, strips: &[&[Vec<u8>]]) -> Result<()> {
        if strips.len() != self.components.len() {
            return Err(Error::BufferSizeMismatch {
                expected: self.components.len(),
                actual: strips.len(),
            });
        }
        for (c, comp) in self.components.iter().enumerate() {
            let width = padded_width_in_blocks(comp, &self.geometry) as usize;
            let rows = strips[c];
            if rows.len() != comp.mcu_height as usize * DCTSIZE {
                return Err(Error::BufferSizeMismatch {
                    expected: comp.mcu_height as usize * DCTSIZE,
                    actual: rows.len(),
                });
            }
            for by in 0..comp.mcu_height as usize {
                for bx in 0..width {
                    let samples = load_sample_block(rows, by * DCTSIZE, bx * DCTSIZE);
                    self.strip[c][by][bx] =
                        forward_block(self.method, &samples, &self.quant[c]);
                }
            }
        }
        Ok(())
    }

    fn save_strip_if_needed(&mut self) -> Result<()> {
        if !matches!(self.mode, BufferMode::SaveSource | BufferMode::SaveAndPass) {
            return Ok(());
        }
        let arrays = self
            .arrays
            .as_mut()
            .ok_or(Error::InternalError("save mode without coefficient arrays"))?;
        for (c, comp) in self.components.iter().enumerate() {
            let mut window =
                arrays[c].access(self.row * comp.mcu_height, comp.mcu_height)?;
            for by in 0..comp.mcu_height as usize {
                window.row_mut(by).copy_from_slice(&self.strip[c][by]);
            }
        }
        Ok(())
    }

    /// Interleaved MCU `col` assembled from the current strip.
    fn gather_strip_mcu(&self, col: usize) -> Vec<DctBlock> {
        let mut scratch = Vec::new();
        for (c, comp) in self.components.iter().enumerate() {
            for y in 0..comp.mcu_height as usize {
                for x in 0..comp.mcu_width as usize {
                    scratch.push(self.strip[c][y][col * comp.mcu_width as usize + x]);
                }
            }
        }
        scratch
    }
}

// =============================================================================
// Decompression side
// =============================================================================

/// Coefficient controller for decompression.
pub struct CoefDecoder {
    components: Vec<ComponentInfo>,
    geometry: FrameGeometry,
    quant: Vec<QuantTable>,
    method: DctMethod,
    mode: BufferMode,
    arrays: Option<Vec<VirtualArray<DctBlock>>>,
    /// One iMCU row of blocks per component, for the stripwise path
    strip: Vec<Vec<Vec<DctBlock>>>,
    row: u32,
    col: u32,
    /// Output cursor (iMCU rows served to the main buffer)
    out_row: u32,
}

impl CoefDecoder {
    /// Build the controller. `buffered` allocates the full-image arrays
    /// required for multi-scan input and coefficient access.
    pub fn new(
        components: &[ComponentInfo],
        geometry: &FrameGeometry,
        quant_tables: &[Option<QuantTable>],
        method: DctMethod,
        buffered: bool,
    ) -> Result<Self> {
        Ok(Self {
            components: components.to_vec(),
            geometry: *geometry,
            quant: resolve_quant(components, quant_tables)?,
            method,
            mode: BufferMode::PassThrough,
            arrays: if buffered {
                Some(alloc_arrays(components, geometry)?)
            } else {
                None
            },
            strip: alloc_strip(components, geometry)?,
            row: 0,
            col: 0,
            out_row: 0,
        })
    }

    /// Begin an input pass (one scan) in the given mode.
    pub fn start_input_pass(&mut self, mode: BufferMode) -> Result<()> {
        if mode != BufferMode::PassThrough && self.arrays.is_none() {
            return Err(Error::InternalError(
                "buffered mode without coefficient arrays",
            ));
        }
        self.mode = mode;
        self.row = 0;
        self.col = 0;
        if let Some(arrays) = &mut self.arrays {
            for a in arrays {
                a.start_pass();
            }
        }
        Ok(())
    }

    /// Begin an output pass, rewinding the output cursor.
    pub fn start_output_pass(&mut self) {
        self.out_row = 0;
        if let Some(arrays) = &mut self.arrays {
            for a in arrays {
                a.start_pass();
            }
        }
    }

    /// Output iMCU rows served so far.
    pub fn output_row(&self) -> u32 {
        self.out_row
    }

    /// Direct access to the coefficient arrays (coefficient-access path).
    pub fn arrays_mut(&mut self) -> Option<&mut [VirtualArray<DctBlock>]> {
        self.arrays.as_deref_mut()
    }

    /// Decode one whole scan into the coefficient arrays (save mode).
    /// Returns false on suspension; resumes at the interrupted MCU.
    pub fn consume_scan(
        &mut self,
        scan: &ScanInfo,
        entropy: &mut dyn EntropyDecodeStage,
        src: &mut ByteSource,
    ) -> Result<bool> {
        if self.mode != BufferMode::SaveSource {
            return Err(Error::InternalError("scan input outside a save pass"));
        }
        let (rows, cols) = scan_grid(&self.components, &self.geometry, scan);
        let arrays = self
            .arrays
            .as_mut()
            .ok_or(Error::InternalError("save mode without coefficient arrays"))?;
        while self.row < rows {
            let mut windows = Vec::with_capacity(scan.comps_in_scan as usize);
            for (ci, array) in CoefEncoder::scan_arrays(arrays, scan) {
                let comp = &self.components[ci];
                let (start, count) = if scan.comps_in_scan == 1 {
                    (self.row, 1)
                } else {
                    (self.row * comp.mcu_height, comp.mcu_height)
                };
                windows.push(array.access(start, count)?);
            }
            while self.col < cols {
                // Refinement scans read existing coefficients, so the
                // scratch MCU is loaded from the arrays first.
                let mut scratch: Vec<DctBlock> = Vec::new();
                let mut positions: Vec<(usize, usize, usize)> = Vec::new();
                for ci in 0..scan.comps_in_scan as usize {
                    let comp = &self.components[scan.component_index[ci] as usize];
                    if scan.comps_in_scan == 1 {
                        scratch.push(windows[ci].row(0)[self.col as usize]);
                        positions.push((ci, 0, self.col as usize));
                    } else {
                        for y in 0..comp.mcu_height as usize {
                            for x in 0..comp.mcu_width as usize {
                                let bx = self.col as usize * comp.mcu_width as usize + x;
                                scratch.push(windows[ci].row(y)[bx]);
                                positions.push((ci, y, bx));
                            }
                        }
                    }
                }
                let mut refs: Vec<&mut DctBlock> = scratch.iter_mut().collect();
                if !entropy.decode_mcu(src, &mut refs)? {
                    return Ok(false);
                }
                for (block, &(ci, y, bx)) in scratch.iter().zip(&positions) {
                    windows[ci].row_mut(y)[bx] = *block;
                }
                self.col += 1;
            }
            self.col = 0;
            self.row += 1;
        }
        Ok(true)
    }

    /// Stripwise decode for a single-scan image: decode one iMCU row of
    /// MCUs and inverse-transform it into the main buffer. Returns false
    /// on suspension.
    pub fn decompress_strip(
        &mut self,
        scan: &ScanInfo,
        entropy: &mut dyn EntropyDecodeStage,
        src: &mut ByteSource,
        main: &mut MainBuffer,
    ) -> Result<bool> {
        if self.mode != BufferMode::PassThrough {
            return Err(Error::InternalError("stripwise decode in a buffered pass"));
        }
        let (rows, cols) = scan_grid(&self.components, &self.geometry, scan);
        if self.row >= rows {
            return Err(Error::InternalError("decode past the last iMCU row"));
        }
        if self.col == 0 {
            for (c, comp) in self.components.iter().enumerate() {
                let width = padded_width_in_blocks(comp, &self.geometry) as usize;
                for by in 0..comp.mcu_height as usize {
                    self.strip[c][by][..width].fill([0i16; 64]);
                }
            }
        }
        while self.col < cols {
            let blocks = self.layout_positions(scan, self.col as usize);
            let mut scratch: Vec<DctBlock> =
                blocks.iter().map(|&(c, y, bx)| self.strip[c][y][bx]).collect();
            let mut refs: Vec<&mut DctBlock> = scratch.iter_mut().collect();
            if !entropy.decode_mcu(src, &mut refs)? {
                return Ok(false);
            }
            for (block, &(c, y, bx)) in scratch.iter().zip(&blocks) {
                self.strip[c][y][bx] = *block;
            }
            self.col += 1;
        }
        for c in 0..self.components.len() {
            self.idct_strip_into_main(c, main)?;
        }
        main.set_ready();
        self.col = 0;
        self.row += 1;
        self.out_row += 1;
        Ok(true)
    }

    /// Replay one iMCU row of the coefficient arrays through the inverse
    /// transform into the main buffer (crank mode).
    pub fn output_strip(&mut self, main: &mut MainBuffer) -> Result<()> {
        if self.mode != BufferMode::CrankDest {
            return Err(Error::InternalError("array output outside a crank pass"));
        }
        if self.out_row >= self.geometry.mcu_rows {
            return Err(Error::InternalError("output past the last iMCU row"));
        }
        let arrays = self
            .arrays
            .as_mut()
            .ok_or(Error::InternalError("crank without coefficient arrays"))?;
        for (c, comp) in self.components.iter().enumerate() {
            let window =
                arrays[c].access(self.out_row * comp.mcu_height, comp.mcu_height)?;
            for by in 0..comp.mcu_height as usize {
                let src_row = window.row(by);
                for bx in 0..comp.width_in_blocks as usize {
                    let mut samples = [0u8; 64];
                    inverse_block(self.method, &src_row[bx], &self.quant[c], &mut samples);
                    store_sample_block(
                        main.rows_mut(c),
                        by * DCTSIZE,
                        bx * DCTSIZE,
                        &samples,
                    );
                }
            }
        }
        main.set_ready();
        self.out_row += 1;
        Ok(())
    }

    /// Block positions (component, strip row, block column) of MCU `col`
    /// in the stripwise path, in scan order.
    fn layout_positions(&self, scan: &ScanInfo, col: usize) -> Vec<(usize, usize, usize)> {
        let mut positions = Vec::new();
        if scan.comps_in_scan == 1 {
            positions.push((scan.component_index[0] as usize, 0, col));
        } else {
            for ci in 0..scan.comps_in_scan as usize {
                let c = scan.component_index[ci] as usize;
                let comp = &self.components[c];
                for y in 0..comp.mcu_height as usize {
                    for x in 0..comp.mcu_width as usize {
                        positions.push((c, y, col * comp.mcu_width as usize + x));
                    }
                }
            }
        }
        positions
    }

    fn idct_strip_into_main(&self, c: usize, main: &mut MainBuffer) -> Result<()> {
        let comp = &self.components[c];
        for by in 0..comp.mcu_height as usize {
            for bx in 0..comp.width_in_blocks as usize {
                let mut samples = [0u8; 64];
                inverse_block(self.method, &self.strip[c][by][bx], &self.quant[c], &mut samples);
                store_sample_block(main.rows_mut(c), by * DCTSIZE, bx * DCTSIZE, &samples);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{HuffDecoder, HuffEncoder};
    use crate::huffman::HuffTable;
    use crate::io::ThrottledSink;
    use crate::types::finalize_frame_geometry;

    fn gray_frame(width: u32, height: u32) -> (Vec<ComponentInfo>, FrameGeometry) {
        let mut comps = vec![ComponentInfo {
            component_id: 1,
            h_samp_factor: 1,
            v_samp_factor: 1,
            ..Default::default()
        }];
        let geom = finalize_frame_geometry(&mut comps, width, height);
        (comps, geom)
    }

    fn std_tables() -> (Vec<Option<HuffTable>>, Vec<Option<HuffTable>>) {
        (
            vec![Some(HuffTable::std_dc_luma())],
            vec![Some(HuffTable::std_ac_luma())],
        )
    }

    /// Flat strips survive the whole DCT round trip exactly with an
    /// identity quantization table.
    fn flat_strips(value: u8, rows: usize, width: usize) -> Vec<Vec<u8>> {
        (0..rows).map(|_| vec![value; width]).collect()
    }

    fn encode_gray_image(
        comps: &[ComponentInfo],
        geom: &FrameGeometry,
        strips: &[Vec<Vec<u8>>],
        buffered: bool,
    ) -> Vec<u8> {
        let quant = vec![Some(QuantTable::identity())];
        let mut coef =
            CoefEncoder::new(comps, geom, &quant, DctMethod::IntSlow, buffered).unwrap();
        let scan = ScanInfo::sequential(1);
        let (dc, ac) = std_tables();
        let mut entropy = HuffEncoder::new(comps, &scan, &dc, &ac, 0, false).unwrap();
        let mut writer = BitWriter::new(Vec::new());

        if buffered {
            coef.start_pass(BufferMode::SaveSource).unwrap();
            for strip in strips {
                let refs: Vec<&[Vec<u8>]> = vec![strip.as_slice()];
                coef.save_strip(&refs).unwrap();
            }
            coef.start_pass(BufferMode::CrankDest).unwrap();
            assert!(coef.crank_scan(&scan, &mut entropy, &mut writer).unwrap());
        } else {
            coef.start_pass(BufferMode::PassThrough).unwrap();
            for strip in strips {
                let refs: Vec<&[Vec<u8>]> = vec![strip.as_slice()];
                assert!(coef.compress_strip(&refs, &mut entropy, &mut writer).unwrap());
            }
        }
        assert!(entropy.finish_scan(&mut writer).unwrap());
        writer.into_sink().unwrap()
    }

    #[test]
    fn test_pass_through_and_buffered_agree() {
        let (comps, geom) = gray_frame(16, 16);
        let strips = vec![flat_strips(50, 8, 16), flat_strips(200, 8, 16)];
        let direct = encode_gray_image(&comps, &geom, &strips, false);
        let buffered = encode_gray_image(&comps, &geom, &strips, true);
        assert_eq!(direct, buffered);
        assert!(!direct.is_empty());
    }

    #[test]
    fn test_stripwise_decode_round_trip() {
        let (comps, geom) = gray_frame(16, 16);
        let strips = vec![flat_strips(50, 8, 16), flat_strips(200, 8, 16)];
        let bytes = encode_gray_image(&comps, &geom, &strips, false);

        let quant = vec![Some(QuantTable::identity())];
        let mut coef =
            CoefDecoder::new(&comps, &geom, &quant, DctMethod::IntSlow, false).unwrap();
        coef.start_input_pass(BufferMode::PassThrough).unwrap();
        let scan = ScanInfo::sequential(1);
        let (dc, ac) = std_tables();
        let mut entropy = HuffDecoder::new(&comps, &scan, &dc, &ac, 0).unwrap();
        let mut src = ByteSource::from_bytes(&bytes);
        let mut main = MainBuffer::for_decompression(&comps).unwrap();

        for strip in &strips {
            assert!(coef
                .decompress_strip(&scan, &mut entropy, &mut src, &mut main)
                .unwrap());
            assert!(main.is_ready());
            for (row, expected) in main.rows(0).iter().zip(strip.iter()) {
                assert_eq!(row, expected);
            }
            main.clear_ready();
        }
    }

    #[test]
    fn test_buffered_decode_round_trip() {
        let (comps, geom) = gray_frame(16, 16);
        let strips = vec![flat_strips(50, 8, 16), flat_strips(200, 8, 16)];
        let bytes = encode_gray_image(&comps, &geom, &strips, false);

        let quant = vec![Some(QuantTable::identity())];
        let mut coef =
            CoefDecoder::new(&comps, &geom, &quant, DctMethod::IntSlow, true).unwrap();
        coef.start_input_pass(BufferMode::SaveSource).unwrap();
        let scan = ScanInfo::sequential(1);
        let (dc, ac) = std_tables();
        let mut entropy = HuffDecoder::new(&comps, &scan, &dc, &ac, 0).unwrap();
        let mut src = ByteSource::from_bytes(&bytes);
        assert!(coef.consume_scan(&scan, &mut entropy, &mut src).unwrap());

        coef.start_input_pass(BufferMode::CrankDest).unwrap();
        coef.start_output_pass();
        let mut main = MainBuffer::for_decompression(&comps).unwrap();
        for strip in &strips {
            coef.output_strip(&mut main).unwrap();
            for (row, expected) in main.rows(0).iter().zip(strip.iter()) {
                assert_eq!(row, expected);
            }
            main.clear_ready();
        }
    }

    /// Cranking through a throttled sink a byte at a time produces the
    /// same stream as the unconstrained run.
    #[test]
    fn test_crank_suspension_equivalence() {
        let (comps, geom) = gray_frame(16, 16);
        let strips = vec![flat_strips(50, 8, 16), flat_strips(200, 8, 16)];
        let reference = encode_gray_image(&comps, &geom, &strips, true);

        let quant = vec![Some(QuantTable::identity())];
        let mut coef =
            CoefEncoder::new(&comps, &geom, &quant, DctMethod::IntSlow, true).unwrap();
        let scan = ScanInfo::sequential(1);
        let (dc, ac) = std_tables();
        let mut entropy = HuffEncoder::new(&comps, &scan, &dc, &ac, 0, false).unwrap();
        let mut writer = BitWriter::new(ThrottledSink::new());

        coef.start_pass(BufferMode::SaveSource).unwrap();
        for strip in &strips {
            let refs: Vec<&[Vec<u8>]> = vec![strip.as_slice()];
            coef.save_strip(&refs).unwrap();
        }
        coef.start_pass(BufferMode::CrankDest).unwrap();
        while !coef.crank_scan(&scan, &mut entropy, &mut writer).unwrap() {
            writer.sink_mut().grant(1);
        }
        while !entropy.finish_scan(&mut writer).unwrap() {
            writer.sink_mut().grant(1);
        }
        assert_eq!(writer.into_sink().unwrap().into_bytes(), reference);
    }

    #[test]
    fn test_mode_misuse_rejected() {
        let (comps, geom) = gray_frame(8, 8);
        let quant = vec![Some(QuantTable::identity())];
        let mut coef =
            CoefEncoder::new(&comps, &geom, &quant, DctMethod::IntSlow, false).unwrap();
        assert!(coef.start_pass(BufferMode::SaveSource).is_err());

        let mut dec =
            CoefDecoder::new(&comps, &geom, &quant, DctMethod::IntSlow, false).unwrap();
        assert!(dec.start_input_pass(BufferMode::CrankDest).is_err());
        let mut main = MainBuffer::for_decompression(&comps).unwrap();
        assert!(dec.output_strip(&mut main).is_err());
    }

    #[test]
    fn test_missing_quant_table_rejected() {
        let (comps, geom) = gray_frame(8, 8);
        let quant: Vec<Option<QuantTable>> = vec![None];
        assert!(matches!(
            CoefEncoder::new(&comps, &geom, &quant, DctMethod::IntSlow, false),
            Err(Error::MissingQuantTable(0))
        ));
    }
}
