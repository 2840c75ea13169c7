//! Compression session.
//!
//! A [`Compressor`] owns the output sink and the whole encoding pipeline.
//! Frame parameters are set while the session is in its start state; then
//! `start_compress` freezes them, plans the passes, and emits the
//! datastream header. Pixel rows go in through `write_scanlines` (or
//! downsampled component rows through `write_raw_data`, or raw
//! coefficients through `write_coefficients`), and `finish_compress`
//! runs any remaining passes and terminates the stream.
//!
//! Every output-producing entry point reports suspension instead of
//! blocking: when the sink refuses bytes, the call returns early with a
//! count or `false`, and calling it again resumes exactly where the
//! session stopped.

use crate::bitstream::BitWriter;
use crate::coef::CoefEncoder;
use crate::consts::{JPEG_EOI, JPEG_SOI, NUM_HUFF_TBLS, NUM_QUANT_TBLS, STD_CHROMA_QUANT_TBL, STD_LUMA_QUANT_TBL};
use crate::entropy::{EntropyEncodeStage, HuffEncoder};
use crate::error::{Error, Result};
use crate::huffman::HuffTable;
use crate::io::ByteSink;
use crate::mainbuf::MainBuffer;
use crate::marker::{
    write_dht, write_dqt, write_dri, write_jfif_app0, write_marker, write_sof, write_sos,
};
use crate::master::{plan_compression, CompressPlan};
use crate::prep::PrepController;
use crate::progressive::{simple_progression, ProgressiveEncoder};
use crate::state::CompressState;
use crate::types::{
    ColorSpace, ComponentInfo, DctBlock, DctMethod, FrameGeometry, QuantTable, ScanInfo,
    Subsampling,
};
use crate::virtarr::VirtualArray;

/// Entropy stage of the current pass.
enum EntropyEnc {
    Seq(HuffEncoder),
    Prog(ProgressiveEncoder),
}

impl<S: ByteSink> EntropyEncodeStage<S> for EntropyEnc {
    fn encode_mcu(&mut self, writer: &mut BitWriter<S>, blocks: &[&DctBlock]) -> Result<bool> {
        match self {
            Self::Seq(e) => e.encode_mcu(writer, blocks),
            Self::Prog(e) => e.encode_mcu(writer, blocks),
        }
    }

    fn finish_scan(&mut self, writer: &mut BitWriter<S>) -> Result<bool> {
        match self {
            Self::Seq(e) => e.finish_scan(writer),
            Self::Prog(e) => e.finish_scan(writer),
        }
    }
}

/// JPEG compression session writing to a [`ByteSink`].
pub struct Compressor<S: ByteSink> {
    state: CompressState,
    writer: BitWriter<S>,

    width: u32,
    height: u32,
    in_color_space: ColorSpace,
    jpeg_color_space: ColorSpace,
    subsampling: Subsampling,
    progressive: bool,
    optimize_coding: bool,
    restart_interval: u32,
    dct_method: DctMethod,
    custom_scans: Option<Vec<ScanInfo>>,

    quant_tables: [Option<QuantTable>; NUM_QUANT_TBLS],
    dc_tables: [Option<HuffTable>; NUM_HUFF_TBLS],
    ac_tables: [Option<HuffTable>; NUM_HUFF_TBLS],

    components: Vec<ComponentInfo>,
    geometry: FrameGeometry,
    scans: Vec<ScanInfo>,
    plan: Option<CompressPlan>,

    prep: Option<PrepController>,
    coef: Option<CoefEncoder>,
    raw_buffer: Option<MainBuffer>,
    entropy: Option<EntropyEnc>,

    next_scanline: u32,
    raw_rows_done: u32,
    scanline_harvested: bool,
    crank_index: usize,
    crank_ready: bool,
    eoi_written: bool,
    tables_staged: bool,
}

impl<S: ByteSink> Compressor<S> {
    /// Create a session with library defaults: quality 75, 4:2:0, the
    /// fixed baseline Huffman tables, the accurate integer transform.
    pub fn new(sink: S) -> Self {
        let mut c = Self {
            state: CompressState::Start,
            writer: BitWriter::new(sink),
            width: 0,
            height: 0,
            in_color_space: ColorSpace::Rgb,
            jpeg_color_space: ColorSpace::YCbCr,
            subsampling: Subsampling::S420,
            progressive: false,
            optimize_coding: false,
            restart_interval: 0,
            dct_method: DctMethod::IntSlow,
            custom_scans: None,
            quant_tables: Default::default(),
            dc_tables: Default::default(),
            ac_tables: Default::default(),
            components: Vec::new(),
            geometry: FrameGeometry::default(),
            scans: Vec::new(),
            plan: None,
            prep: None,
            coef: None,
            raw_buffer: None,
            entropy: None,
            next_scanline: 0,
            raw_rows_done: 0,
            scanline_harvested: false,
            crank_index: 0,
            crank_ready: false,
            eoi_written: false,
            tables_staged: false,
        };
        c.dc_tables[0] = Some(HuffTable::std_dc_luma());
        c.ac_tables[0] = Some(HuffTable::std_ac_luma());
        c.dc_tables[1] = Some(HuffTable::std_dc_chroma());
        c.ac_tables[1] = Some(HuffTable::std_ac_chroma());
        c.apply_quality(75);
        c
    }

    // -------------------------------------------------------------------------
    // Parameter setup (legal only before start_compress)
    // -------------------------------------------------------------------------

    /// Set the image dimensions and incoming pixel format.
    pub fn set_image(&mut self, width: u32, height: u32, color: ColorSpace) -> Result<()> {
        self.state.require("set_image", &[CompressState::Start])?;
        if width == 0 || height == 0 || width > 65535 || height > 65535 {
            return Err(Error::InvalidDimensions { width, height });
        }
        self.width = width;
        self.height = height;
        self.in_color_space = color;
        self.jpeg_color_space = match color {
            ColorSpace::Grayscale => ColorSpace::Grayscale,
            ColorSpace::Rgb | ColorSpace::YCbCr => ColorSpace::YCbCr,
        };
        if color == ColorSpace::Grayscale {
            self.subsampling = Subsampling::Gray;
        }
        Ok(())
    }

    /// Set the quality level (1-100), rebuilding both quantization tables.
    pub fn set_quality(&mut self, quality: u8) -> Result<()> {
        self.state.require("set_quality", &[CompressState::Start])?;
        if quality == 0 || quality > 100 {
            return Err(Error::InvalidQuality(quality));
        }
        self.apply_quality(quality);
        Ok(())
    }

    fn apply_quality(&mut self, quality: u8) {
        let scale = QuantTable::quality_to_scale(quality);
        self.quant_tables[0] = Some(QuantTable::scaled(&STD_LUMA_QUANT_TBL, scale, true));
        self.quant_tables[1] = Some(QuantTable::scaled(&STD_CHROMA_QUANT_TBL, scale, true));
    }

    /// Override one quantization table slot.
    pub fn set_quant_table(&mut self, slot: usize, table: QuantTable) -> Result<()> {
        self.state.require("set_quant_table", &[CompressState::Start])?;
        if slot >= NUM_QUANT_TBLS {
            return Err(Error::MissingQuantTable(slot));
        }
        self.quant_tables[slot] = Some(table);
        Ok(())
    }

    /// Set the chroma subsampling mode.
    pub fn set_subsampling(&mut self, mode: Subsampling) -> Result<()> {
        self.state.require("set_subsampling", &[CompressState::Start])?;
        self.subsampling = mode;
        Ok(())
    }

    /// Select progressive coding with the standard scan script.
    pub fn set_progressive(&mut self, progressive: bool) -> Result<()> {
        self.state.require("set_progressive", &[CompressState::Start])?;
        self.progressive = progressive;
        Ok(())
    }

    /// Replace the scan script (progressive sessions only).
    pub fn set_scan_script(&mut self, scans: Vec<ScanInfo>) -> Result<()> {
        self.state.require("set_scan_script", &[CompressState::Start])?;
        self.custom_scans = Some(scans);
        Ok(())
    }

    /// Compute image-specific Huffman tables in an extra pass.
    pub fn set_optimize_coding(&mut self, optimize: bool) -> Result<()> {
        self.state
            .require("set_optimize_coding", &[CompressState::Start])?;
        self.optimize_coding = optimize;
        Ok(())
    }

    /// Emit restart markers every `interval` MCUs (0 disables them).
    pub fn set_restart_interval(&mut self, interval: u32) -> Result<()> {
        self.state
            .require("set_restart_interval", &[CompressState::Start])?;
        if interval > 65535 {
            return Err(Error::UnsupportedFeature("restart interval exceeds 65535"));
        }
        self.restart_interval = interval;
        Ok(())
    }

    /// Select the transform implementation.
    pub fn set_dct_method(&mut self, method: DctMethod) -> Result<()> {
        self.state.require("set_dct_method", &[CompressState::Start])?;
        self.dct_method = method;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Frame components, finalized by `start_compress`.
    pub fn components(&self) -> &[ComponentInfo] {
        &self.components
    }

    /// Frame geometry, finalized by `start_compress`.
    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Next row index expected by `write_scanlines`.
    pub fn next_scanline(&self) -> u32 {
        self.next_scanline
    }

    /// The output sink (to grant capacity, inspect output, and so on).
    pub fn sink_mut(&mut self) -> &mut S {
        self.writer.sink_mut()
    }

    /// Consume the session and hand back the sink. Fails if staged output
    /// never fit into the sink.
    pub fn into_sink(self) -> Result<S> {
        self.writer.into_sink()
    }

    // -------------------------------------------------------------------------
    // Session control
    // -------------------------------------------------------------------------

    /// Freeze parameters, plan the passes, and emit the frame header.
    /// Scanline input follows.
    pub fn start_compress(&mut self) -> Result<()> {
        self.begin_frame(false)?;
        self.state = CompressState::Scanning;
        Ok(())
    }

    /// Like [`start_compress`](Self::start_compress), but the caller
    /// supplies downsampled component rows via `write_raw_data` and the
    /// preprocessing stages are bypassed.
    pub fn start_compress_raw(&mut self) -> Result<()> {
        self.begin_frame(true)?;
        self.state = CompressState::RawOk;
        Ok(())
    }

    /// Begin a transcoding session: the returned arrays are the frame's
    /// coefficient storage, one array per component, to be filled by the
    /// caller before `finish_compress`.
    pub fn write_coefficients(&mut self) -> Result<&mut [VirtualArray<DctBlock>]> {
        if self.state == CompressState::Start {
            self.begin_transcode()?;
            self.state = CompressState::WritingCoefs;
        }
        self.state
            .require("write_coefficients", &[CompressState::WritingCoefs])?;
        self.coef
            .as_mut()
            .and_then(|c| c.arrays_mut())
            .ok_or(Error::InternalError("transcode without coefficient arrays"))
    }

    /// Emit an abbreviated tables-only datastream. Returns false if the
    /// sink refused bytes; call again to drain.
    pub fn write_tables_only(&mut self) -> Result<bool> {
        self.state
            .require("write_tables_only", &[CompressState::Start])?;
        if !self.tables_staged {
            let w = self.writer.writer();
            write_marker(w, JPEG_SOI);
            for slot in 0..NUM_QUANT_TBLS {
                if let Some(t) = &mut self.quant_tables[slot] {
                    if !t.sent {
                        write_dqt(w, slot as u8, t);
                    }
                }
            }
            for slot in 0..NUM_HUFF_TBLS {
                if let Some(t) = &mut self.dc_tables[slot] {
                    if !t.sent {
                        write_dht(w, 0, slot as u8, t);
                    }
                }
                if let Some(t) = &mut self.ac_tables[slot] {
                    if !t.sent {
                        write_dht(w, 1, slot as u8, t);
                    }
                }
            }
            write_marker(w, JPEG_EOI);
            self.tables_staged = true;
        }
        if !self.writer.drain()? {
            return Ok(false);
        }
        self.tables_staged = false;
        Ok(true)
    }

    fn build_components(&self) -> Result<Vec<ComponentInfo>> {
        let comps = match self.jpeg_color_space {
            ColorSpace::Grayscale => vec![ComponentInfo {
                component_id: 1,
                h_samp_factor: 1,
                v_samp_factor: 1,
                ..Default::default()
            }],
            ColorSpace::YCbCr => {
                let (h, v) = self.subsampling.luma_factors();
                vec![
                    ComponentInfo {
                        component_id: 1,
                        component_index: 0,
                        h_samp_factor: h,
                        v_samp_factor: v,
                        ..Default::default()
                    },
                    ComponentInfo {
                        component_id: 2,
                        component_index: 1,
                        h_samp_factor: 1,
                        v_samp_factor: 1,
                        quant_tbl_no: 1,
                        dc_tbl_no: 1,
                        ac_tbl_no: 1,
                        ..Default::default()
                    },
                    ComponentInfo {
                        component_id: 3,
                        component_index: 2,
                        h_samp_factor: 1,
                        v_samp_factor: 1,
                        quant_tbl_no: 1,
                        dc_tbl_no: 1,
                        ac_tbl_no: 1,
                        ..Default::default()
                    },
                ]
            }
            ColorSpace::Rgb => return Err(Error::UnsupportedColorSpace),
        };
        Ok(comps)
    }

    fn begin_frame(&mut self, raw: bool) -> Result<()> {
        self.state.require("start_compress", &[CompressState::Start])?;
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let mut components = self.build_components()?;
        self.geometry =
            crate::types::finalize_frame_geometry(&mut components, self.width, self.height);
        self.components = components;

        let n = self.components.len() as u8;
        self.scans = if self.progressive {
            match &self.custom_scans {
                Some(s) => s.clone(),
                None => simple_progression(n),
            }
        } else {
            vec![ScanInfo::sequential(n)]
        };
        let plan = plan_compression(self.progressive, self.optimize_coding, &self.scans, n)?;

        let mut coef = CoefEncoder::new(
            &self.components,
            &self.geometry,
            &self.quant_tables,
            self.dct_method,
            plan.needs_buffering(),
        )?;
        coef.start_pass(plan.scanline_mode)?;
        self.coef = Some(coef);
        if raw {
            self.raw_buffer = Some(MainBuffer::for_compression(
                &self.components,
                &self.geometry,
            )?);
        } else {
            self.prep = Some(PrepController::new(
                &self.components,
                &self.geometry,
                self.in_color_space,
                self.jpeg_color_space,
                self.width,
            )?);
        }
        self.entropy = match plan.scanline_mode {
            crate::types::BufferMode::SaveSource => None,
            _ => Some(self.make_entropy(&self.scans[0], plan.scanline_gather)?),
        };

        self.write_frame_header(plan.cranks.is_empty())?;
        self.plan = Some(plan);
        self.next_scanline = 0;
        self.raw_rows_done = 0;
        self.scanline_harvested = false;
        self.crank_index = 0;
        self.crank_ready = false;
        self.eoi_written = false;
        Ok(())
    }

    fn begin_transcode(&mut self) -> Result<()> {
        self.state
            .require("write_coefficients", &[CompressState::Start])?;
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let mut components = self.build_components()?;
        self.geometry =
            crate::types::finalize_frame_geometry(&mut components, self.width, self.height);
        self.components = components;

        let n = self.components.len() as u8;
        self.scans = if self.progressive {
            match &self.custom_scans {
                Some(s) => s.clone(),
                None => simple_progression(n),
            }
        } else {
            vec![ScanInfo::sequential(n)]
        };
        // Transcoding always replays from the arrays; even the plain
        // sequential case needs one emit crank.
        let mut plan =
            plan_compression(self.progressive, self.optimize_coding, &self.scans, n)?;
        plan.scanline_mode = crate::types::BufferMode::SaveSource;
        plan.scanline_gather = false;
        if plan.cranks.is_empty() {
            plan.cranks.push(crate::master::CrankPass {
                scan_index: 0,
                gather: false,
            });
        } else if self.optimize_coding && !self.progressive {
            // The usual gather happens during the scanline pass, which a
            // transcode does not have; run it as a crank instead.
            plan.cranks.insert(
                0,
                crate::master::CrankPass {
                    scan_index: 0,
                    gather: true,
                },
            );
        }

        self.coef = Some(CoefEncoder::new(
            &self.components,
            &self.geometry,
            &self.quant_tables,
            self.dct_method,
            true,
        )?);
        self.entropy = None;
        self.write_frame_header(false)?;
        self.plan = Some(plan);
        self.scanline_harvested = true;
        self.crank_index = 0;
        self.crank_ready = false;
        self.eoi_written = false;
        Ok(())
    }

    fn write_frame_header(&mut self, with_scan_header: bool) -> Result<()> {
        {
            let w = self.writer.writer();
            write_marker(w, JPEG_SOI);
            write_jfif_app0(w);
            for comp in &self.components {
                let slot = comp.quant_tbl_no as usize;
                match &mut self.quant_tables[slot] {
                    Some(t) if !t.sent => write_dqt(w, slot as u8, t),
                    Some(_) => {}
                    None => return Err(Error::MissingQuantTable(slot)),
                }
            }
            if self.restart_interval > 0 {
                write_dri(w, self.restart_interval as u16);
            }
            write_sof(
                w,
                self.progressive,
                false,
                self.width,
                self.height,
                &self.components,
            );
        }
        if with_scan_header {
            let scan = self.scans[0];
            self.write_scan_header(&scan)?;
        }
        Ok(())
    }

    /// Emit the DHT segments a scan needs (unsent tables only) and its SOS.
    fn write_scan_header(&mut self, scan: &ScanInfo) -> Result<()> {
        let (needs_dc, needs_ac) = if !self.progressive {
            (true, true)
        } else if scan.is_dc_scan() {
            (!scan.is_refinement(), false)
        } else {
            (false, true)
        };
        let w = self.writer.writer();
        for ci in 0..scan.comps_in_scan as usize {
            let comp = &self.components[scan.component_index[ci] as usize];
            if needs_dc {
                let slot = comp.dc_tbl_no as usize;
                match &mut self.dc_tables[slot] {
                    Some(t) if !t.sent => write_dht(w, 0, slot as u8, t),
                    Some(_) => {}
                    None => return Err(Error::MissingHuffmanTable(slot)),
                }
            }
            if needs_ac {
                let slot = comp.ac_tbl_no as usize;
                match &mut self.ac_tables[slot] {
                    Some(t) if !t.sent => write_dht(w, 1, slot as u8, t),
                    Some(_) => {}
                    None => return Err(Error::MissingHuffmanTable(slot)),
                }
            }
        }
        write_sos(w, scan, &self.components);
        Ok(())
    }

    fn make_entropy(&self, scan: &ScanInfo, gather: bool) -> Result<EntropyEnc> {
        Ok(if self.progressive {
            EntropyEnc::Prog(ProgressiveEncoder::new(
                &self.components,
                scan,
                &self.dc_tables,
                &self.ac_tables,
                self.restart_interval,
                gather,
            )?)
        } else {
            EntropyEnc::Seq(HuffEncoder::new(
                &self.components,
                scan,
                &self.dc_tables,
                &self.ac_tables,
                self.restart_interval,
                gather,
            )?)
        })
    }

    // -------------------------------------------------------------------------
    // Data input
    // -------------------------------------------------------------------------

    /// Feed interleaved pixel rows. Returns the number of rows consumed;
    /// fewer than `rows.len()` means the sink is full (grant capacity and
    /// call again) or the image height was reached.
    pub fn write_scanlines(&mut self, rows: &[&[u8]]) -> Result<usize> {
        self.state
            .require("write_scanlines", &[CompressState::Scanning])?;
        let mut consumed = 0;
        for row in rows {
            if self.next_scanline >= self.height {
                break;
            }
            if !self.push_ready_strip()? {
                return Ok(consumed);
            }
            let prep = self
                .prep
                .as_mut()
                .ok_or(Error::InternalError("scanline input without a preprocessor"))?;
            prep.feed_row(row)?;
            self.next_scanline += 1;
            consumed += 1;
        }
        Ok(consumed)
    }

    /// Feed one iMCU row of downsampled component rows: `data[c]` holds up
    /// to `v_samp_factor * DCTSIZE` rows of component `c` (short rows and
    /// strips are edge-replicated). Returns false on suspension; call
    /// again with the same data.
    pub fn write_raw_data(&mut self, data: &[&[&[u8]]]) -> Result<bool> {
        self.state.require("write_raw_data", &[CompressState::RawOk])?;
        if self.raw_rows_done >= self.geometry.mcu_rows {
            return Err(Error::InternalError("raw input past the last iMCU row"));
        }
        if data.len() != self.components.len() {
            return Err(Error::BufferSizeMismatch {
                expected: self.components.len(),
                actual: data.len(),
            });
        }
        let main = self
            .raw_buffer
            .as_mut()
            .ok_or(Error::InternalError("raw input without a raw buffer"))?;
        for (c, rows) in data.iter().copied().enumerate() {
            main.load_raw_strip(c, rows)?;
        }
        if !self.push_raw_strip()? {
            return Ok(false);
        }
        self.raw_rows_done += 1;
        Ok(true)
    }

    fn push_ready_strip(&mut self) -> Result<bool> {
        match self.prep.as_ref() {
            Some(p) if p.strip_ready() => {}
            _ => return Ok(true),
        }
        let mode = self
            .plan
            .as_ref()
            .ok_or(Error::InternalError("no pass plan"))?
            .scanline_mode;
        {
            let prep = self
                .prep
                .as_ref()
                .ok_or(Error::InternalError("no preprocessor"))?;
            let coef = self
                .coef
                .as_mut()
                .ok_or(Error::InternalError("no coefficient controller"))?;
            let strips: Vec<&[Vec<u8>]> =
                (0..self.components.len()).map(|c| prep.strip(c)).collect();
            if mode == crate::types::BufferMode::SaveSource {
                coef.save_strip(&strips)?;
            } else {
                let entropy = self
                    .entropy
                    .as_mut()
                    .ok_or(Error::InternalError("no entropy stage"))?;
                if !coef.compress_strip(&strips, entropy, &mut self.writer)? {
                    return Ok(false);
                }
            }
        }
        if let Some(prep) = self.prep.as_mut() {
            prep.consume_strip();
        }
        Ok(true)
    }

    fn push_raw_strip(&mut self) -> Result<bool> {
        let mode = self
            .plan
            .as_ref()
            .ok_or(Error::InternalError("no pass plan"))?
            .scanline_mode;
        let main = self
            .raw_buffer
            .as_ref()
            .ok_or(Error::InternalError("raw input without a raw buffer"))?;
        let coef = self
            .coef
            .as_mut()
            .ok_or(Error::InternalError("no coefficient controller"))?;
        let strips: Vec<&[Vec<u8>]> =
            (0..self.components.len()).map(|c| main.rows(c)).collect();
        if mode == crate::types::BufferMode::SaveSource {
            coef.save_strip(&strips)?;
            Ok(true)
        } else {
            let entropy = self
                .entropy
                .as_mut()
                .ok_or(Error::InternalError("no entropy stage"))?;
            coef.compress_strip(&strips, entropy, &mut self.writer)
        }
    }

    // -------------------------------------------------------------------------
    // Finish
    // -------------------------------------------------------------------------

    /// Run any remaining passes, emit the end-of-image marker, and drain
    /// the staging buffer. Returns false on suspension; call again after
    /// granting sink capacity.
    pub fn finish_compress(&mut self) -> Result<bool> {
        self.state.require(
            "finish_compress",
            &[
                CompressState::Scanning,
                CompressState::RawOk,
                CompressState::WritingCoefs,
            ],
        )?;
        match self.state {
            CompressState::Scanning => {
                if self.next_scanline < self.height {
                    return Err(Error::BufferSizeMismatch {
                        expected: self.height as usize,
                        actual: self.next_scanline as usize,
                    });
                }
                if !self.push_ready_strip()? {
                    return Ok(false);
                }
                if let Some(prep) = self.prep.as_mut() {
                    prep.flush()?;
                }
                if !self.push_ready_strip()? {
                    return Ok(false);
                }
            }
            CompressState::RawOk => {
                if self.raw_rows_done < self.geometry.mcu_rows {
                    return Err(Error::BufferSizeMismatch {
                        expected: self.geometry.mcu_rows as usize,
                        actual: self.raw_rows_done as usize,
                    });
                }
            }
            CompressState::WritingCoefs => {}
            _ => {}
        }

        let (direct, scanline_gather) = {
            let plan = self
                .plan
                .as_ref()
                .ok_or(Error::InternalError("no pass plan"))?;
            (plan.cranks.is_empty(), plan.scanline_gather)
        };
        if direct {
            // Direct emission: the scan is already on the wire.
            if let Some(entropy) = self.entropy.as_mut() {
                if !entropy.finish_scan(&mut self.writer)? {
                    return Ok(false);
                }
            }
            self.entropy = None;
        } else {
            if scanline_gather && !self.scanline_harvested {
                let scan = self.scans[0];
                self.harvest_tables(&scan);
                self.scanline_harvested = true;
                self.entropy = None;
            }
            if !self.run_cranks()? {
                return Ok(false);
            }
        }

        if !self.eoi_written {
            write_marker(self.writer.writer(), JPEG_EOI);
            self.eoi_written = true;
        }
        if !self.writer.drain()? {
            return Ok(false);
        }
        self.state = CompressState::Start;
        self.prep = None;
        self.coef = None;
        self.raw_buffer = None;
        self.plan = None;
        Ok(true)
    }

    fn run_cranks(&mut self) -> Result<bool> {
        loop {
            let Some(plan) = self.plan.as_ref() else {
                return Err(Error::InternalError("no pass plan"));
            };
            let Some(&crank) = plan.cranks.get(self.crank_index) else {
                return Ok(true);
            };
            let scan = self.scans[crank.scan_index];
            if !self.crank_ready {
                self.coef
                    .as_mut()
                    .ok_or(Error::InternalError("no coefficient controller"))?
                    .start_pass(crate::types::BufferMode::CrankDest)?;
                if !crank.gather {
                    self.write_scan_header(&scan)?;
                }
                self.entropy = Some(self.make_entropy(&scan, crank.gather)?);
                self.crank_ready = true;
            }
            let coef = self
                .coef
                .as_mut()
                .ok_or(Error::InternalError("no coefficient controller"))?;
            let entropy = self
                .entropy
                .as_mut()
                .ok_or(Error::InternalError("no entropy stage"))?;
            if !coef.crank_scan(&scan, entropy, &mut self.writer)? {
                return Ok(false);
            }
            if !entropy.finish_scan(&mut self.writer)? {
                return Ok(false);
            }
            if crank.gather {
                self.harvest_tables(&scan);
            }
            self.entropy = None;
            self.crank_ready = false;
            self.crank_index += 1;
        }
    }

    /// Turn the gather pass's statistics into Huffman tables for the
    /// scan's table slots.
    fn harvest_tables(&mut self, scan: &ScanInfo) {
        let Some(entropy) = self.entropy.as_ref() else {
            return;
        };
        for ci in 0..scan.comps_in_scan as usize {
            let comp = &self.components[scan.component_index[ci] as usize];
            match entropy {
                EntropyEnc::Seq(e) => {
                    let dc_slot = comp.dc_tbl_no as usize;
                    if let Some(c) = e.dc_counter(dc_slot) {
                        self.dc_tables[dc_slot] = Some(c.build_table());
                    }
                    let ac_slot = comp.ac_tbl_no as usize;
                    if let Some(c) = e.ac_counter(ac_slot) {
                        self.ac_tables[ac_slot] = Some(c.build_table());
                    }
                }
                EntropyEnc::Prog(e) => {
                    if scan.is_dc_scan() {
                        let slot = comp.dc_tbl_no as usize;
                        if let Some(c) = e.counter(slot) {
                            self.dc_tables[slot] = Some(c.build_table());
                        }
                    } else {
                        let slot = comp.ac_tbl_no as usize;
                        if let Some(c) = e.counter(slot) {
                            self.ac_tables[slot] = Some(c.build_table());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{JPEG_SOF0, JPEG_SOF2, JPEG_SOS};
    use crate::io::ThrottledSink;

    fn gradient_rows(width: usize, height: usize, comps: usize) -> Vec<Vec<u8>> {
        (0..height)
            .map(|y| {
                (0..width * comps)
                    .map(|x| ((x * 7 + y * 13) % 256) as u8)
                    .collect()
            })
            .collect()
    }

    fn compress_gray(
        width: u32,
        height: u32,
        configure: impl FnOnce(&mut Compressor<Vec<u8>>),
    ) -> Vec<u8> {
        let mut c = Compressor::new(Vec::new());
        c.set_image(width, height, ColorSpace::Grayscale).unwrap();
        configure(&mut c);
        c.start_compress().unwrap();
        let rows = gradient_rows(width as usize, height as usize, 1);
        let refs: Vec<&[u8]> = rows.iter().map(|r| r.as_slice()).collect();
        assert_eq!(c.write_scanlines(&refs).unwrap(), height as usize);
        assert!(c.finish_compress().unwrap());
        c.into_sink().unwrap()
    }

    fn marker_positions(bytes: &[u8], marker: u8) -> usize {
        bytes
            .windows(2)
            .filter(|w| w[0] == 0xFF && w[1] == marker)
            .count()
    }

    #[test]
    fn test_sequential_stream_structure() {
        let bytes = compress_gray(16, 16, |_| {});
        assert_eq!(&bytes[..2], &[0xFF, JPEG_SOI]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, JPEG_EOI]);
        assert_eq!(marker_positions(&bytes, JPEG_SOF0), 1);
        assert_eq!(marker_positions(&bytes, JPEG_SOS), 1);
    }

    #[test]
    fn test_progressive_stream_has_scan_per_script_entry() {
        let bytes = compress_gray(16, 16, |c| {
            c.set_progressive(true).unwrap();
        });
        assert_eq!(marker_positions(&bytes, JPEG_SOF2), 1);
        let scans = crate::progressive::simple_progression(1).len();
        assert_eq!(marker_positions(&bytes, JPEG_SOS), scans);
    }

    #[test]
    fn test_optimized_differs_but_both_produced() {
        let plain = compress_gray(16, 16, |_| {});
        let optimized = compress_gray(16, 16, |c| {
            c.set_optimize_coding(true).unwrap();
        });
        // Optimized tables are image-specific; the streams differ but both
        // carry exactly one scan.
        assert_ne!(plain, optimized);
        assert_eq!(marker_positions(&optimized, JPEG_SOS), 1);
        assert!(optimized.len() <= plain.len());
    }

    #[test]
    fn test_suspension_produces_identical_stream() {
        let reference = compress_gray(16, 16, |_| {});

        let mut c = Compressor::new(ThrottledSink::new());
        c.set_image(16, 16, ColorSpace::Grayscale).unwrap();
        c.start_compress().unwrap();
        let rows = gradient_rows(16, 16, 1);
        let refs: Vec<&[u8]> = rows.iter().map(|r| r.as_slice()).collect();
        let mut done = 0;
        while done < refs.len() {
            let n = c.write_scanlines(&refs[done..]).unwrap();
            done += n;
            if n == 0 {
                c.sink_mut().grant(1);
            }
        }
        while !c.finish_compress().unwrap() {
            c.sink_mut().grant(1);
        }
        assert_eq!(c.into_sink().unwrap().into_bytes(), reference);
    }

    #[test]
    fn test_state_guards() {
        let mut c = Compressor::new(Vec::new());
        assert!(matches!(
            c.write_scanlines(&[]),
            Err(Error::BadState { .. })
        ));
        c.set_image(8, 8, ColorSpace::Grayscale).unwrap();
        c.start_compress().unwrap();
        assert!(matches!(c.set_quality(50), Err(Error::BadState { .. })));
        assert!(matches!(c.write_raw_data(&[]), Err(Error::BadState { .. })));
        // Finishing before all rows are in is an error.
        assert!(c.finish_compress().is_err());
    }

    #[test]
    fn test_parameter_validation() {
        let mut c = Compressor::new(Vec::new());
        assert!(matches!(
            c.set_image(0, 8, ColorSpace::Rgb),
            Err(Error::InvalidDimensions { .. })
        ));
        assert!(matches!(
            c.set_image(8, 70000, ColorSpace::Rgb),
            Err(Error::InvalidDimensions { .. })
        ));
        assert!(matches!(c.set_quality(0), Err(Error::InvalidQuality(0))));
        assert!(matches!(
            c.set_quality(101),
            Err(Error::InvalidQuality(101))
        ));
        // start_compress without dimensions fails.
        assert!(c.start_compress().is_err());
    }

    #[test]
    fn test_color_image_compresses() {
        let mut c = Compressor::new(Vec::new());
        c.set_image(17, 11, ColorSpace::Rgb).unwrap();
        c.start_compress().unwrap();
        assert_eq!(c.components().len(), 3);
        let rows = gradient_rows(17, 11, 3);
        let refs: Vec<&[u8]> = rows.iter().map(|r| r.as_slice()).collect();
        assert_eq!(c.write_scanlines(&refs).unwrap(), 11);
        assert!(c.finish_compress().unwrap());
        let bytes = c.into_sink().unwrap();
        assert_eq!(marker_positions(&bytes, JPEG_SOF0), 1);
    }

    #[test]
    fn test_raw_data_session() {
        let mut c = Compressor::new(Vec::new());
        c.set_image(16, 16, ColorSpace::Grayscale).unwrap();
        c.start_compress_raw().unwrap();
        let strip: Vec<Vec<u8>> = (0..8).map(|i| vec![(i * 16) as u8; 16]).collect();
        let rows: Vec<&[u8]> = strip.iter().map(|r| r.as_slice()).collect();
        for _ in 0..2 {
            assert!(c.write_raw_data(&[&rows]).unwrap());
        }
        assert!(c.finish_compress().unwrap());
        let bytes = c.into_sink().unwrap();
        assert_eq!(&bytes[..2], &[0xFF, JPEG_SOI]);
    }

    #[test]
    fn test_tables_only_stream() {
        let mut c = Compressor::new(Vec::new());
        assert!(c.write_tables_only().unwrap());
        let bytes = c.into_sink().unwrap();
        assert_eq!(&bytes[..2], &[0xFF, JPEG_SOI]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, JPEG_EOI]);
        // Both quantization tables and all four default Huffman tables.
        assert_eq!(marker_positions(&bytes, crate::consts::JPEG_DQT), 2);
        assert_eq!(marker_positions(&bytes, crate::consts::JPEG_DHT), 4);
    }

    #[test]
    fn test_transcode_session() {
        let mut c = Compressor::new(Vec::new());
        c.set_image(16, 8, ColorSpace::Grayscale).unwrap();
        let arrays = c.write_coefficients().unwrap();
        assert_eq!(arrays.len(), 1);
        let mut window = arrays[0].access(0, 1).unwrap();
        window.row_mut(0)[0][0] = -50;
        window.row_mut(0)[1][0] = 30;
        drop(window);
        assert!(c.finish_compress().unwrap());
        let bytes = c.into_sink().unwrap();
        assert_eq!(marker_positions(&bytes, JPEG_SOS), 1);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, JPEG_EOI]);
    }
}
