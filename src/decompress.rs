//! Decompression session.
//!
//! A [`Decompressor`] owns the byte source and the whole decoding
//! pipeline. Input arrives through `feed_data` (and `finish_input` once
//! the stream ends); `read_header` parses up to the first scan, the
//! caller may then adjust output parameters, and `start_decompress` plus
//! `read_scanlines` produce pixel rows. Single-scan sequential frames
//! decode stripwise as input arrives; progressive and other multi-scan
//! frames are gathered into full-image coefficient arrays first.
//!
//! Every entry point that consumes input reports suspension instead of
//! blocking: when the source runs dry, the call returns early and can be
//! repeated after more bytes are fed.

use crate::coef::CoefDecoder;
use crate::consts::DCTSIZE;
use crate::error::{Error, Result};
use crate::input::{InputController, InputStatus};
use crate::io::ByteSource;
use crate::mainbuf::MainBuffer;
use crate::master::{plan_output, OutputPass};
use crate::post::PostController;
use crate::quantizer::{ColorQuantStage, OnePassQuantizer, TwoPassQuantizer};
use crate::state::DecompressState;
use crate::types::{BufferMode, ColorSpace, ComponentInfo, DctBlock, DctMethod, FrameGeometry};
use crate::virtarr::{try_alloc_vec, VirtualArray};

/// JPEG decompression session reading from an internally owned
/// [`ByteSource`].
pub struct Decompressor {
    state: DecompressState,
    src: ByteSource,
    input: InputController,

    out_color_space: Option<ColorSpace>,
    quantize_colors: bool,
    desired_colors: usize,
    two_pass_quantize: bool,
    dct_method: DctMethod,
    buffered_image: bool,
    raw_data_out: bool,
    force_buffered: bool,

    coef: Option<CoefDecoder>,
    main: Option<MainBuffer>,
    post: Option<PostController>,
    geometry: Option<FrameGeometry>,
    passes: Vec<OutputPass>,
    pass_index: usize,
    buffered: bool,
    output_started: bool,

    output_scanline: u32,
    prescan_row: u32,
    current_strip: Option<u32>,
    raw_strips_done: u32,
    rows_per_strip: u32,
    row_buf: Vec<u8>,
}

impl Decompressor {
    /// Create a session with an empty source and library defaults:
    /// full-color output, no quantization, the accurate integer
    /// transform.
    pub fn new() -> Self {
        Self {
            state: DecompressState::Start,
            src: ByteSource::new(),
            input: InputController::new(),
            out_color_space: None,
            quantize_colors: false,
            desired_colors: 256,
            two_pass_quantize: true,
            dct_method: DctMethod::IntSlow,
            buffered_image: false,
            raw_data_out: false,
            force_buffered: false,
            coef: None,
            main: None,
            post: None,
            geometry: None,
            passes: Vec::new(),
            pass_index: 0,
            buffered: false,
            output_started: false,
            output_scanline: 0,
            prescan_row: 0,
            current_strip: None,
            raw_strips_done: 0,
            rows_per_strip: 0,
            row_buf: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Input feeding
    // -------------------------------------------------------------------------

    /// Append compressed bytes to the source buffer.
    pub fn feed_data(&mut self, bytes: &[u8]) {
        self.src.feed(bytes);
    }

    /// Declare that no further input will arrive. A truncated stream then
    /// decodes as far as possible instead of suspending forever.
    pub fn finish_input(&mut self) {
        self.src.finish();
    }

    // -------------------------------------------------------------------------
    // Header parsing and frame queries
    // -------------------------------------------------------------------------

    /// Parse markers up to the first scan header. Returns `HeaderReady`
    /// once the frame is known, `Eoi` for a tables-only stream, or
    /// `Suspended` when more input is needed.
    pub fn read_header(&mut self) -> Result<InputStatus> {
        self.state.require(
            "read_header",
            &[DecompressState::Start, DecompressState::InHeader],
        )?;
        let status = self.input.read_header(&mut self.src)?;
        self.state = match status {
            InputStatus::HeaderReady => DecompressState::Ready,
            InputStatus::Suspended => DecompressState::InHeader,
            _ => DecompressState::Start,
        };
        self.src.compact();
        Ok(status)
    }

    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.input.header().width
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.input.header().height
    }

    /// Frame components in header order.
    pub fn components(&self) -> &[ComponentInfo] {
        &self.input.header().components
    }

    /// True for a progressive frame.
    pub fn progressive(&self) -> bool {
        self.input.header().progressive
    }

    /// True if the frame needs more than one input scan (it then cannot
    /// be decoded stripwise and is buffered through coefficient arrays).
    pub fn has_multiple_scans(&self) -> bool {
        self.input.has_multiple_scans()
    }

    /// True once the whole datastream has been consumed.
    pub fn input_complete(&self) -> bool {
        self.input.eoi_reached()
    }

    /// Next row index to be produced by `read_scanlines`.
    pub fn output_scanline(&self) -> u32 {
        self.output_scanline
    }

    /// Interleaved components per output pixel (1 when quantizing to a
    /// palette).
    pub fn output_components(&self) -> usize {
        if self.quantize_colors {
            1
        } else {
            self.resolved_output_space().num_components()
        }
    }

    /// Bytes per output row.
    pub fn output_row_len(&self) -> usize {
        match &self.post {
            Some(post) => post.output_row_len(),
            None => self.width() as usize * self.output_components(),
        }
    }

    /// The palette, once color quantization has built one.
    pub fn palette(&self) -> Option<&[[u8; 3]]> {
        self.post.as_ref().and_then(|p| p.palette())
    }

    fn internal_color_space(&self) -> Result<ColorSpace> {
        match self.input.header().components.len() {
            1 => Ok(ColorSpace::Grayscale),
            3 => Ok(ColorSpace::YCbCr),
            _ => Err(Error::UnsupportedFeature("unsupported component count")),
        }
    }

    fn resolved_output_space(&self) -> ColorSpace {
        self.out_color_space.unwrap_or_else(|| {
            if self.input.header().components.len() == 1 {
                ColorSpace::Grayscale
            } else {
                ColorSpace::Rgb
            }
        })
    }

    // -------------------------------------------------------------------------
    // Output parameters (legal between read_header and start_decompress)
    // -------------------------------------------------------------------------

    /// Override the output color space.
    pub fn set_output_color_space(&mut self, space: ColorSpace) -> Result<()> {
        self.state
            .require("set_output_color_space", &[DecompressState::Ready])?;
        self.out_color_space = Some(space);
        Ok(())
    }

    /// Quantize the output to a palette of at most `colors` entries;
    /// output rows become palette indices.
    pub fn set_quantize_colors(&mut self, colors: usize) -> Result<()> {
        self.state
            .require("set_quantize_colors", &[DecompressState::Ready])?;
        self.quantize_colors = true;
        self.desired_colors = colors;
        Ok(())
    }

    /// Choose between the image-adaptive two-pass quantizer (default) and
    /// the fixed-palette one-pass quantizer.
    pub fn set_two_pass_quantize(&mut self, two_pass: bool) -> Result<()> {
        self.state
            .require("set_two_pass_quantize", &[DecompressState::Ready])?;
        self.two_pass_quantize = two_pass;
        Ok(())
    }

    /// Select the inverse transform implementation.
    pub fn set_dct_method(&mut self, method: DctMethod) -> Result<()> {
        self.state
            .require("set_dct_method", &[DecompressState::Ready])?;
        self.dct_method = method;
        Ok(())
    }

    /// Enable buffered-image mode: the session keeps the coefficient
    /// arrays and the caller runs one output pass per `start_output`,
    /// interleaved with `consume_input` calls.
    pub fn set_buffered_image(&mut self, enabled: bool) -> Result<()> {
        self.state
            .require("set_buffered_image", &[DecompressState::Ready])?;
        self.buffered_image = enabled;
        Ok(())
    }

    /// Skip upsampling and color conversion; output is fetched per
    /// component with `read_raw_data`.
    pub fn set_raw_data_out(&mut self, enabled: bool) -> Result<()> {
        self.state
            .require("set_raw_data_out", &[DecompressState::Ready])?;
        self.raw_data_out = enabled;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Session control
    // -------------------------------------------------------------------------

    fn build_pipeline(&mut self, with_output: bool) -> Result<()> {
        let geometry = self
            .input
            .geometry()
            .ok_or(Error::InternalError("pipeline built before the header"))?;
        let internal = self.internal_color_space()?;
        let header = self.input.header();
        let components = header.components.clone();

        let buffered =
            self.force_buffered || self.buffered_image || self.input.has_multiple_scans();
        let coef = CoefDecoder::new(
            &components,
            &geometry,
            &header.quant_tables,
            self.dct_method,
            buffered,
        )?;
        let main = MainBuffer::for_decompression(&components)?;

        if with_output && !self.raw_data_out {
            let output = self.resolved_output_space();
            let quantizer: Option<Box<dyn ColorQuantStage>> = if self.quantize_colors {
                Some(if self.two_pass_quantize {
                    Box::new(TwoPassQuantizer::new(self.desired_colors)?)
                } else {
                    Box::new(OnePassQuantizer::new())
                })
            } else {
                None
            };
            let header = self.input.header();
            let post = PostController::new(
                &components,
                &geometry,
                internal,
                output,
                header.width,
                header.height,
                quantizer,
            )?;
            self.row_buf = try_alloc_vec(0u8, post.output_row_len())?;
            self.passes = plan_output(post.needs_prescan());
            self.post = Some(post);
        }

        self.rows_per_strip = geometry.max_v_samp as u32 * DCTSIZE as u32;
        self.geometry = Some(geometry);
        self.buffered = buffered;
        self.coef = Some(coef);
        self.main = Some(main);
        self.pass_index = 0;
        self.output_started = false;
        self.output_scanline = 0;
        self.prescan_row = 0;
        self.current_strip = None;
        self.raw_strips_done = 0;
        Ok(())
    }

    /// Consume the rest of the frame's scans into the coefficient arrays.
    /// Returns false on suspension.
    fn consume_to_eoi(&mut self) -> Result<bool> {
        let coef = self
            .coef
            .as_mut()
            .ok_or(Error::InternalError("input without a pipeline"))?;
        loop {
            match self.input.consume_input(&mut self.src, coef)? {
                InputStatus::Suspended => return Ok(false),
                InputStatus::Eoi => return Ok(true),
                _ => {}
            }
        }
    }

    /// Begin producing output. Returns false on suspension; call again
    /// after feeding more input.
    pub fn start_decompress(&mut self) -> Result<bool> {
        self.state.require(
            "start_decompress",
            &[DecompressState::Ready, DecompressState::Prescan],
        )?;
        if self.coef.is_none() {
            self.build_pipeline(true)?;
        }
        if self.buffered && !self.buffered_image && !self.consume_to_eoi()? {
            return Ok(false);
        }
        if self.buffered_image {
            // Hand control back as soon as one scan is displayable; the
            // caller drives the remaining input explicitly.
            while self.input.scans_completed() == 0 && !self.input.eoi_reached() {
                let coef = self
                    .coef
                    .as_mut()
                    .ok_or(Error::InternalError("input without a pipeline"))?;
                if self.input.consume_input(&mut self.src, coef)? == InputStatus::Suspended {
                    return Ok(false);
                }
            }
            self.state = DecompressState::BufImage;
            return Ok(true);
        }
        if !self.output_started {
            if self.buffered {
                let coef = self
                    .coef
                    .as_mut()
                    .ok_or(Error::InternalError("output without a pipeline"))?;
                coef.start_input_pass(BufferMode::CrankDest)?;
                coef.start_output_pass();
            }
            if let Some(post) = self.post.as_mut() {
                let mode = self
                    .passes
                    .first()
                    .ok_or(Error::InternalError("no output passes planned"))?
                    .mode;
                post.start_pass(mode)?;
            }
            self.output_started = true;
        }
        if !self.raw_data_out && self.current_pass()?.is_prescan {
            self.state = DecompressState::Prescan;
            if !self.run_prescan()? {
                return Ok(false);
            }
            self.advance_past_prescan()?;
        }
        self.state = if self.raw_data_out {
            DecompressState::RawOk
        } else {
            DecompressState::Scanning
        };
        Ok(true)
    }

    fn current_pass(&self) -> Result<OutputPass> {
        self.passes
            .get(self.pass_index)
            .copied()
            .ok_or(Error::InternalError("output pass out of range"))
    }

    /// Drive the histogram pass over the whole image, discarding rows.
    fn run_prescan(&mut self) -> Result<bool> {
        let height = self.height();
        while self.prescan_row < height {
            if !self.ensure_strip(self.prescan_row)? {
                return Ok(false);
            }
            let post = self
                .post
                .as_mut()
                .ok_or(Error::InternalError("prescan without a postprocessor"))?;
            let main = self
                .main
                .as_ref()
                .ok_or(Error::InternalError("prescan without a main buffer"))?;
            post.process_row(main, self.prescan_row, &mut self.row_buf)?;
            self.prescan_row += 1;
        }
        Ok(true)
    }

    /// Build the palette and switch to the replay pass.
    fn advance_past_prescan(&mut self) -> Result<()> {
        let post = self
            .post
            .as_mut()
            .ok_or(Error::InternalError("prescan without a postprocessor"))?;
        post.finish_pass()?;
        self.pass_index += 1;
        let mode = self.current_pass()?.mode;
        self.post
            .as_mut()
            .ok_or(Error::InternalError("prescan without a postprocessor"))?
            .start_pass(mode)?;
        self.output_scanline = 0;
        Ok(())
    }

    /// Make sure the main buffer holds the iMCU row covering image row
    /// `row`. Strips are produced strictly in order. Returns false on
    /// suspension (stripwise sessions only).
    fn ensure_strip(&mut self, row: u32) -> Result<bool> {
        let index = row / self.rows_per_strip;
        if self.current_strip == Some(index) {
            return Ok(true);
        }
        let coef = self
            .coef
            .as_mut()
            .ok_or(Error::InternalError("output without a pipeline"))?;
        let main = self
            .main
            .as_mut()
            .ok_or(Error::InternalError("output without a main buffer"))?;
        main.clear_ready();
        if self.buffered {
            coef.output_strip(main)?;
        } else {
            loop {
                match self.input.decompress_strip(&mut self.src, coef, main)? {
                    InputStatus::StripReady => break,
                    InputStatus::Suspended => return Ok(false),
                    _ => {
                        return Err(Error::InternalError(
                            "unexpected input state during stripwise decode",
                        ))
                    }
                }
            }
        }
        self.current_strip = Some(index);
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Output
    // -------------------------------------------------------------------------

    /// Produce pixel rows. Returns the number of rows written; fewer than
    /// `out.len()` means the source suspended or the image ended.
    pub fn read_scanlines(&mut self, out: &mut [&mut [u8]]) -> Result<usize> {
        self.state
            .require("read_scanlines", &[DecompressState::Scanning])?;
        let height = self.height();
        let mut done = 0;
        for buf in out.iter_mut() {
            if self.output_scanline >= height {
                break;
            }
            let crank = self.current_pass()?.mode == BufferMode::CrankDest;
            if !crank && !self.ensure_strip(self.output_scanline)? {
                return Ok(done);
            }
            let post = self
                .post
                .as_mut()
                .ok_or(Error::InternalError("output without a postprocessor"))?;
            let main = self
                .main
                .as_ref()
                .ok_or(Error::InternalError("output without a main buffer"))?;
            post.process_row(main, self.output_scanline, buf)?;
            self.output_scanline += 1;
            done += 1;
        }
        Ok(done)
    }

    /// Fetch one iMCU row of downsampled component samples: `out[c]` must
    /// hold `v_samp_factor * DCTSIZE` rows of `width_in_blocks * DCTSIZE`
    /// bytes for component `c`. Returns false on suspension.
    pub fn read_raw_data(&mut self, out: &mut [&mut [&mut [u8]]]) -> Result<bool> {
        self.state
            .require("read_raw_data", &[DecompressState::RawOk])?;
        let geometry = self
            .geometry
            .ok_or(Error::InternalError("output without a pipeline"))?;
        if self.raw_strips_done >= geometry.mcu_rows {
            return Err(Error::InternalError("raw output past the last iMCU row"));
        }
        if out.len() != self.components().len() {
            return Err(Error::BufferSizeMismatch {
                expected: self.components().len(),
                actual: out.len(),
            });
        }
        if !self.ensure_strip(self.raw_strips_done * self.rows_per_strip)? {
            return Ok(false);
        }
        let main = self
            .main
            .as_ref()
            .ok_or(Error::InternalError("output without a main buffer"))?;
        for (c, comp_rows) in out.iter_mut().enumerate() {
            let strip = main.rows(c);
            if comp_rows.len() != strip.len() {
                return Err(Error::BufferSizeMismatch {
                    expected: strip.len(),
                    actual: comp_rows.len(),
                });
            }
            for (dst, src_row) in comp_rows.iter_mut().zip(strip) {
                if dst.len() != src_row.len() {
                    return Err(Error::BufferSizeMismatch {
                        expected: src_row.len(),
                        actual: dst.len(),
                    });
                }
                dst.copy_from_slice(src_row);
            }
        }
        self.raw_strips_done += 1;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Buffered-image mode
    // -------------------------------------------------------------------------

    /// Decode input through the end of the next scan (buffered-image
    /// mode, between output passes).
    pub fn consume_input(&mut self) -> Result<InputStatus> {
        self.state
            .require("consume_input", &[DecompressState::BufImage])?;
        let coef = self
            .coef
            .as_mut()
            .ok_or(Error::InternalError("input without a pipeline"))?;
        self.input.consume_input(&mut self.src, coef)
    }

    /// Begin one output pass over the scans decoded so far.
    pub fn start_output(&mut self) -> Result<bool> {
        self.state
            .require("start_output", &[DecompressState::BufImage])?;
        let coef = self
            .coef
            .as_mut()
            .ok_or(Error::InternalError("output without a pipeline"))?;
        coef.start_input_pass(BufferMode::CrankDest)?;
        coef.start_output_pass();
        let post = self
            .post
            .as_mut()
            .ok_or(Error::InternalError("output without a postprocessor"))?;
        self.passes = plan_output(post.needs_prescan());
        self.pass_index = 0;
        self.output_scanline = 0;
        self.prescan_row = 0;
        self.current_strip = None;
        let mode = self
            .passes
            .first()
            .ok_or(Error::InternalError("no output passes planned"))?
            .mode;
        self.post
            .as_mut()
            .ok_or(Error::InternalError("output without a postprocessor"))?
            .start_pass(mode)?;
        if self.current_pass()?.is_prescan {
            // Rows come from the in-memory arrays, so the histogram pass
            // runs to completion here.
            self.state = DecompressState::BufPost;
            if !self.run_prescan()? {
                return Ok(false);
            }
            self.advance_past_prescan()?;
        }
        self.state = DecompressState::Scanning;
        Ok(true)
    }

    /// End the current output pass, returning to `BufImage` so more input
    /// can be consumed or another pass started.
    pub fn finish_output(&mut self) -> Result<()> {
        self.state
            .require("finish_output", &[DecompressState::Scanning])?;
        if !self.buffered_image {
            return Err(Error::BadState {
                operation: "finish_output",
                state: self.state.name(),
            });
        }
        if self.output_scanline < self.height() {
            return Err(Error::BufferSizeMismatch {
                expected: self.height() as usize,
                actual: self.output_scanline as usize,
            });
        }
        if let Some(post) = self.post.as_mut() {
            post.finish_pass()?;
        }
        self.state = DecompressState::BufImage;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Coefficient access
    // -------------------------------------------------------------------------

    /// Decode the whole frame into its coefficient arrays and return
    /// them, for transcoding. `Ok(None)` means the source suspended.
    pub fn read_coefficients(&mut self) -> Result<Option<&mut [VirtualArray<DctBlock>]>> {
        if self.state == DecompressState::Ready {
            self.force_buffered = true;
            if self.coef.is_none() {
                self.build_pipeline(false)?;
            }
            self.state = DecompressState::ReadingCoefs;
        }
        self.state
            .require("read_coefficients", &[DecompressState::ReadingCoefs])?;
        if !self.consume_to_eoi()? {
            return Ok(None);
        }
        let coef = self
            .coef
            .as_mut()
            .ok_or(Error::InternalError("coefficient access without arrays"))?;
        // Rewind the array windows for the caller.
        coef.start_output_pass();
        let arrays = coef
            .arrays_mut()
            .ok_or(Error::InternalError("coefficient access without arrays"))?;
        Ok(Some(arrays))
    }

    // -------------------------------------------------------------------------
    // Finish
    // -------------------------------------------------------------------------

    /// Consume the rest of the datastream through the end-of-image marker
    /// and reset the session. Returns false on suspension.
    pub fn finish_decompress(&mut self) -> Result<bool> {
        self.state.require(
            "finish_decompress",
            &[
                DecompressState::Scanning,
                DecompressState::RawOk,
                DecompressState::BufImage,
                DecompressState::ReadingCoefs,
                DecompressState::Stopping,
            ],
        )?;
        match self.state {
            DecompressState::Scanning => {
                if self.output_scanline < self.height() {
                    return Err(Error::BufferSizeMismatch {
                        expected: self.height() as usize,
                        actual: self.output_scanline as usize,
                    });
                }
            }
            DecompressState::RawOk => {
                let geometry = self
                    .geometry
                    .ok_or(Error::InternalError("finish without a pipeline"))?;
                if self.raw_strips_done < geometry.mcu_rows {
                    return Err(Error::BufferSizeMismatch {
                        expected: geometry.mcu_rows as usize,
                        actual: self.raw_strips_done as usize,
                    });
                }
            }
            _ => {}
        }
        self.state = DecompressState::Stopping;
        if !self.input.eoi_reached() && !self.consume_to_eoi()? {
            return Ok(false);
        }
        if let Some(post) = self.post.as_mut() {
            post.finish_pass()?;
        }
        self.coef = None;
        self.main = None;
        self.post = None;
        self.geometry = None;
        self.passes.clear();
        self.output_started = false;
        self.state = DecompressState::Start;
        Ok(true)
    }
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Compressor;
    use crate::types::{QuantTable, Subsampling};

    fn compress_flat_gray(
        width: u32,
        height: u32,
        value: u8,
        configure: impl FnOnce(&mut Compressor<Vec<u8>>),
    ) -> Vec<u8> {
        let mut c = Compressor::new(Vec::new());
        c.set_image(width, height, ColorSpace::Grayscale).unwrap();
        c.set_quant_table(0, QuantTable::identity()).unwrap();
        configure(&mut c);
        c.start_compress().unwrap();
        let row = vec![value; width as usize];
        let refs: Vec<&[u8]> = (0..height).map(|_| row.as_slice()).collect();
        assert_eq!(c.write_scanlines(&refs).unwrap(), height as usize);
        assert!(c.finish_compress().unwrap());
        c.into_sink().unwrap()
    }

    fn decode_all(bytes: &[u8]) -> (Decompressor, Vec<Vec<u8>>) {
        let mut d = Decompressor::new();
        d.feed_data(bytes);
        d.finish_input();
        assert_eq!(d.read_header().unwrap(), InputStatus::HeaderReady);
        assert!(d.start_decompress().unwrap());
        let mut rows: Vec<Vec<u8>> =
            vec![vec![0u8; d.output_row_len()]; d.height() as usize];
        let mut refs: Vec<&mut [u8]> = rows.iter_mut().map(|r| r.as_mut_slice()).collect();
        assert_eq!(d.read_scanlines(&mut refs).unwrap(), rows.len());
        assert!(d.finish_decompress().unwrap());
        (d, rows)
    }

    #[test]
    fn test_sequential_gray_round_trip_exact() {
        // A flat image under identity quantization decodes exactly.
        let bytes = compress_flat_gray(16, 16, 100, |_| {});
        let (d, rows) = decode_all(&bytes);
        assert_eq!(d.width(), 16);
        assert_eq!(d.output_components(), 1);
        for row in &rows {
            assert!(row.iter().all(|&p| p == 100), "row was {:?}", row);
        }
    }

    #[test]
    fn test_odd_dimensions_round_trip() {
        let bytes = compress_flat_gray(13, 9, 200, |_| {});
        let (d, rows) = decode_all(&bytes);
        assert_eq!(d.height(), 9);
        assert_eq!(rows.len(), 9);
        assert_eq!(rows[0].len(), 13);
        for row in &rows {
            assert!(row.iter().all(|&p| p == 200));
        }
    }

    #[test]
    fn test_progressive_round_trip() {
        let bytes = compress_flat_gray(16, 16, 100, |c| {
            c.set_progressive(true).unwrap();
        });
        let mut d = Decompressor::new();
        d.feed_data(&bytes);
        d.finish_input();
        assert_eq!(d.read_header().unwrap(), InputStatus::HeaderReady);
        assert!(d.has_multiple_scans());
        assert!(d.start_decompress().unwrap());
        let mut rows: Vec<Vec<u8>> = vec![vec![0u8; 16]; 16];
        let mut refs: Vec<&mut [u8]> = rows.iter_mut().map(|r| r.as_mut_slice()).collect();
        assert_eq!(d.read_scanlines(&mut refs).unwrap(), 16);
        assert!(d.finish_decompress().unwrap());
        for row in &rows {
            assert!(row.iter().all(|&p| p == 100), "row was {:?}", row);
        }
    }

    #[test]
    fn test_color_round_trip_close() {
        let mut c = Compressor::new(Vec::new());
        c.set_image(16, 16, ColorSpace::Rgb).unwrap();
        c.set_quality(95).unwrap();
        c.set_subsampling(Subsampling::S444).unwrap();
        c.start_compress().unwrap();
        let row = [120u8, 130, 140].repeat(16);
        let refs: Vec<&[u8]> = (0..16).map(|_| row.as_slice()).collect();
        assert_eq!(c.write_scanlines(&refs).unwrap(), 16);
        assert!(c.finish_compress().unwrap());
        let bytes = c.into_sink().unwrap();

        let (d, rows) = decode_all(&bytes);
        assert_eq!(d.output_components(), 3);
        for row in &rows {
            for px in row.chunks_exact(3) {
                assert!((px[0] as i32 - 120).abs() <= 6, "r was {}", px[0]);
                assert!((px[1] as i32 - 130).abs() <= 6, "g was {}", px[1]);
                assert!((px[2] as i32 - 140).abs() <= 6, "b was {}", px[2]);
            }
        }
    }

    #[test]
    fn test_byte_at_a_time_matches_bulk() {
        let bytes = compress_flat_gray(16, 16, 100, |_| {});
        let (_, expected) = decode_all(&bytes);

        let mut d = Decompressor::new();
        let mut feed = bytes.iter();
        let mut feed_one = |d: &mut Decompressor| match feed.next() {
            Some(&b) => d.feed_data(&[b]),
            None => d.finish_input(),
        };
        loop {
            match d.read_header().unwrap() {
                InputStatus::HeaderReady => break,
                InputStatus::Suspended => feed_one(&mut d),
                other => panic!("unexpected status {other:?}"),
            }
        }
        while !d.start_decompress().unwrap() {
            feed_one(&mut d);
        }
        let mut rows: Vec<Vec<u8>> = vec![vec![0u8; 16]; 16];
        let mut done = 0;
        while done < 16 {
            let mut refs: Vec<&mut [u8]> =
                rows[done..].iter_mut().map(|r| r.as_mut_slice()).collect();
            let n = d.read_scanlines(&mut refs).unwrap();
            done += n;
            if n == 0 {
                feed_one(&mut d);
            }
        }
        while !d.finish_decompress().unwrap() {
            feed_one(&mut d);
        }
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_two_pass_palette_output() {
        // Two flat color halves quantize to a palette holding both colors.
        let mut c = Compressor::new(Vec::new());
        c.set_image(16, 16, ColorSpace::Rgb).unwrap();
        c.set_quality(95).unwrap();
        c.set_subsampling(Subsampling::S444).unwrap();
        c.start_compress().unwrap();
        let dark = [20u8, 30, 40].repeat(16);
        let light = [220u8, 210, 200].repeat(16);
        for i in 0..16 {
            let row: &[u8] = if i < 8 { &dark } else { &light };
            assert_eq!(c.write_scanlines(&[row]).unwrap(), 1);
        }
        assert!(c.finish_compress().unwrap());
        let bytes = c.into_sink().unwrap();

        let mut d = Decompressor::new();
        d.feed_data(&bytes);
        d.finish_input();
        assert_eq!(d.read_header().unwrap(), InputStatus::HeaderReady);
        d.set_quantize_colors(16).unwrap();
        assert!(d.start_decompress().unwrap());
        assert_eq!(d.output_components(), 1);
        let palette = d.palette().unwrap().to_vec();
        assert!(palette.len() >= 2 && palette.len() <= 16);

        let mut rows: Vec<Vec<u8>> = vec![vec![0u8; 16]; 16];
        let mut refs: Vec<&mut [u8]> = rows.iter_mut().map(|r| r.as_mut_slice()).collect();
        assert_eq!(d.read_scanlines(&mut refs).unwrap(), 16);
        assert!(d.finish_decompress().unwrap());

        let near = |px: [u8; 3], want: [u8; 3]| {
            px.iter()
                .zip(want)
                .all(|(&a, b)| (a as i32 - b as i32).abs() <= 24)
        };
        assert!(near(palette[rows[0][0] as usize], [20, 30, 40]));
        assert!(near(palette[rows[15][15] as usize], [220, 210, 200]));
    }

    #[test]
    fn test_raw_data_output() {
        let bytes = compress_flat_gray(16, 16, 100, |_| {});
        let mut d = Decompressor::new();
        d.feed_data(&bytes);
        d.finish_input();
        assert_eq!(d.read_header().unwrap(), InputStatus::HeaderReady);
        d.set_raw_data_out(true).unwrap();
        assert!(d.start_decompress().unwrap());

        let mut strip: Vec<Vec<u8>> = vec![vec![0u8; 16]; 8];
        for _ in 0..2 {
            let mut comp_rows: Vec<&mut [u8]> =
                strip.iter_mut().map(|r| r.as_mut_slice()).collect();
            assert!(d.read_raw_data(&mut [comp_rows.as_mut_slice()]).unwrap());
            assert!(strip.iter().all(|r| r.iter().all(|&p| p == 100)));
        }
        assert!(d.finish_decompress().unwrap());
    }

    #[test]
    fn test_buffered_image_mode() {
        let bytes = compress_flat_gray(16, 16, 100, |c| {
            c.set_progressive(true).unwrap();
        });
        let mut d = Decompressor::new();
        d.feed_data(&bytes);
        d.finish_input();
        assert_eq!(d.read_header().unwrap(), InputStatus::HeaderReady);
        d.set_buffered_image(true).unwrap();
        assert!(d.start_decompress().unwrap());

        // Drain the remaining scans, then run one full-quality pass.
        while !d.input_complete() {
            match d.consume_input().unwrap() {
                InputStatus::Eoi => break,
                InputStatus::Suspended => panic!("source was complete"),
                _ => {}
            }
        }
        assert!(d.start_output().unwrap());
        let mut rows: Vec<Vec<u8>> = vec![vec![0u8; 16]; 16];
        let mut refs: Vec<&mut [u8]> = rows.iter_mut().map(|r| r.as_mut_slice()).collect();
        assert_eq!(d.read_scanlines(&mut refs).unwrap(), 16);
        d.finish_output().unwrap();
        assert!(d.finish_decompress().unwrap());
        for row in &rows {
            assert!(row.iter().all(|&p| p == 100));
        }
    }

    #[test]
    fn test_read_coefficients() {
        let mut c = Compressor::new(Vec::new());
        c.set_image(16, 8, ColorSpace::Grayscale).unwrap();
        c.set_quant_table(0, QuantTable::identity()).unwrap();
        let arrays = c.write_coefficients().unwrap();
        let mut window = arrays[0].access(0, 1).unwrap();
        window.row_mut(0)[0][0] = -50;
        window.row_mut(0)[1][0] = 30;
        drop(window);
        assert!(c.finish_compress().unwrap());
        let bytes = c.into_sink().unwrap();

        let mut d = Decompressor::new();
        d.feed_data(&bytes);
        d.finish_input();
        assert_eq!(d.read_header().unwrap(), InputStatus::HeaderReady);
        let arrays = d.read_coefficients().unwrap().unwrap();
        let window = arrays[0].access(0, 1).unwrap();
        assert_eq!(window.row(0)[0][0], -50);
        assert_eq!(window.row(0)[1][0], 30);
        assert!(d.finish_decompress().unwrap());
    }

    #[test]
    fn test_state_guards() {
        let mut d = Decompressor::new();
        assert!(matches!(
            d.read_scanlines(&mut []),
            Err(Error::BadState { .. })
        ));
        assert!(matches!(d.start_decompress(), Err(Error::BadState { .. })));

        let bytes = compress_flat_gray(16, 16, 100, |_| {});
        d.feed_data(&bytes);
        d.finish_input();
        assert_eq!(d.read_header().unwrap(), InputStatus::HeaderReady);
        assert!(d.start_decompress().unwrap());
        // Output parameters are frozen once decompression starts.
        assert!(matches!(
            d.set_quantize_colors(8),
            Err(Error::BadState { .. })
        ));
        // Finishing with rows unread is an error.
        assert!(d.finish_decompress().is_err());
    }

    #[test]
    fn test_truncated_stream_still_finishes() {
        let bytes = compress_flat_gray(16, 16, 100, |_| {});
        let cut = bytes.len() - 3;
        let mut d = Decompressor::new();
        d.feed_data(&bytes[..cut]);
        d.finish_input();
        assert_eq!(d.read_header().unwrap(), InputStatus::HeaderReady);
        assert!(d.start_decompress().unwrap());
        let mut rows: Vec<Vec<u8>> = vec![vec![0u8; 16]; 16];
        let mut refs: Vec<&mut [u8]> = rows.iter_mut().map(|r| r.as_mut_slice()).collect();
        assert_eq!(d.read_scanlines(&mut refs).unwrap(), 16);
        assert!(d.finish_decompress().unwrap());
    }
}
