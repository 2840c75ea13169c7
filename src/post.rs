//! Decompression postprocessing: upsampling, color deconversion, and
//! optional color quantization.
//!
//! The controller turns one row at a time of the main buffer's component
//! strips into finished output rows. With no quantizer, or with the
//! one-pass quantizer, it runs purely stripwise (`PassThrough`). The
//! two-pass quantizer forces the multi-pass protocol: a `SaveAndPass`
//! prescan feeds the histogram while saving the deconverted rows into a
//! full-image array, then a `CrankDest` pass replays the saved rows
//! through the palette mapper without touching the earlier stages.

use crate::color::ColorDeconverter;
use crate::consts::DCTSIZE;
use crate::error::{Error, Result};
use crate::mainbuf::MainBuffer;
use crate::quantizer::ColorQuantStage;
use crate::sample::Upsampler;
use crate::types::{BufferMode, ColorSpace, ComponentInfo, FrameGeometry};
use crate::virtarr::{try_alloc_vec, VirtualArray};

/// Postprocessing controller for one decompression session.
pub struct PostController {
    deconverter: ColorDeconverter,
    upsamplers: Vec<Upsampler>,
    width: usize,
    out_stride: usize,
    mode: BufferMode,
    quantizer: Option<Box<dyn ColorQuantStage>>,
    /// Full-image deconverted rows, for the two-pass quantizer
    saved_rows: Option<VirtualArray<u8>>,
    /// Per-component full-resolution scratch rows
    upsampled: Vec<Vec<u8>>,
    /// Deconverted row scratch, when quantization follows
    pixel_row: Vec<u8>,
    /// Full-resolution rows per iMCU row
    rows_per_strip: usize,
}

impl PostController {
    /// Build the controller. A quantizer that needs a prescan triggers
    /// allocation of the full-image saved-row array.
    pub fn new(
        components: &[ComponentInfo],
        geometry: &FrameGeometry,
        internal: ColorSpace,
        output: ColorSpace,
        width: u32,
        height: u32,
        quantizer: Option<Box<dyn ColorQuantStage>>,
    ) -> Result<Self> {
        let deconverter = ColorDeconverter::select(internal, output)?;
        let pixel_stride = deconverter.output_components(components.len());
        if quantizer.is_some() && pixel_stride != 3 {
            return Err(Error::UnsupportedFeature(
                "color quantization requires RGB output",
            ));
        }
        let mut upsamplers = Vec::with_capacity(components.len());
        let mut upsampled = Vec::with_capacity(components.len());
        for comp in components {
            upsamplers.push(Upsampler::select(
                comp.h_samp_factor,
                comp.v_samp_factor,
                geometry.max_h_samp,
                geometry.max_v_samp,
            )?);
            upsampled.push(try_alloc_vec(0u8, width as usize)?);
        }
        let saved_rows = match &quantizer {
            Some(q) if q.needs_prescan() => Some(VirtualArray::new(
                width as usize * pixel_stride,
                height,
            )?),
            _ => None,
        };
        Ok(Self {
            deconverter,
            upsamplers,
            width: width as usize,
            out_stride: if quantizer.is_some() { 1 } else { pixel_stride },
            mode: BufferMode::PassThrough,
            quantizer,
            saved_rows,
            upsampled,
            pixel_row: try_alloc_vec(0u8, width as usize * pixel_stride)?,
            rows_per_strip: geometry.max_v_samp as usize * DCTSIZE,
        })
    }

    /// Bytes per finished output row.
    pub fn output_row_len(&self) -> usize {
        self.width * self.out_stride
    }

    /// Full-resolution rows covered by one iMCU row.
    pub fn rows_per_strip(&self) -> usize {
        self.rows_per_strip
    }

    /// True if an extra histogram pass over the image is still required
    /// before output rows can be produced.
    pub fn needs_prescan(&self) -> bool {
        self.quantizer.as_ref().is_some_and(|q| q.needs_prescan())
    }

    /// The quantizer palette, once built.
    pub fn palette(&self) -> Option<&[[u8; 3]]> {
        self.quantizer.as_ref().map(|q| q.palette())
    }

    /// Begin an output pass in the given mode.
    pub fn start_pass(&mut self, mode: BufferMode) -> Result<()> {
        match mode {
            BufferMode::PassThrough => {}
            BufferMode::SaveAndPass | BufferMode::CrankDest => {
                if self.saved_rows.is_none() {
                    return Err(Error::InternalError(
                        "buffered mode without a saved-row array",
                    ));
                }
            }
            BufferMode::SaveSource => {
                return Err(Error::InternalError("save-only pass in postprocessing"))
            }
        }
        self.mode = mode;
        if let Some(arr) = &mut self.saved_rows {
            arr.start_pass();
        }
        if let Some(q) = &mut self.quantizer {
            q.start_pass(mode == BufferMode::SaveAndPass)?;
        }
        Ok(())
    }

    /// End the current pass (the prescan builds the palette here).
    pub fn finish_pass(&mut self) -> Result<()> {
        if let Some(q) = &mut self.quantizer {
            q.finish_pass()?;
        }
        Ok(())
    }

    /// Produce output row `row` (absolute image row). `main` must hold the
    /// iMCU row covering it, except in a `CrankDest` pass where the saved
    /// rows are replayed and `main` is ignored. During a prescan `out` is
    /// not written.
    pub fn process_row(&mut self, main: &MainBuffer, row: u32, out: &mut [u8]) -> Result<()> {
        if out.len() != self.output_row_len() {
            return Err(Error::BufferSizeMismatch {
                expected: self.output_row_len(),
                actual: out.len(),
            });
        }
        match self.mode {
            BufferMode::PassThrough => {
                self.upsample_and_deconvert(main, row);
                match &mut self.quantizer {
                    Some(q) => q.quantize_row(&self.pixel_row, out),
                    None => out.copy_from_slice(&self.pixel_row),
                }
            }
            BufferMode::SaveAndPass => {
                self.upsample_and_deconvert(main, row);
                let arr = self.saved_rows.as_mut().expect("checked in start_pass");
                let mut window = arr.access(row, 1)?;
                window.row_mut(0).copy_from_slice(&self.pixel_row);
                let q = self.quantizer.as_mut().expect("prescan without quantizer");
                q.quantize_row(&self.pixel_row, out);
            }
            BufferMode::CrankDest => {
                let arr = self.saved_rows.as_mut().expect("checked in start_pass");
                let window = arr.access(row, 1)?;
                let q = self.quantizer.as_mut().expect("replay without quantizer");
                q.quantize_row(window.row(0), out);
            }
            BufferMode::SaveSource => {
                return Err(Error::InternalError("save-only pass in postprocessing"))
            }
        }
        Ok(())
    }

    fn upsample_and_deconvert(&mut self, main: &MainBuffer, row: u32) {
        let strip_row = row as usize % self.rows_per_strip;
        for (c, ups) in self.upsamplers.iter().enumerate() {
            let comp_row = ups.source_row(strip_row as u32) as usize;
            let strip = main.rows(c);
            let src = &strip[comp_row.min(strip.len() - 1)];
            ups.upsample_row(src, &mut self.upsampled[c]);
        }
        let inputs: Vec<&[u8]> = self.upsampled.iter().map(|r| r.as_slice()).collect();
        self.deconverter.convert_row(&inputs, &mut self.pixel_row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantizer::TwoPassQuantizer;
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

    fn ycc_420_frame(width: u32, height: u32) -> (Vec<ComponentInfo>, FrameGeometry) {
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
            ComponentInfo {
                component_id: 3,
                component_index: 2,
                h_samp_factor: 1,
                v_samp_factor: 1,
                ..Default::default()
            },
        ];
        let geom = finalize_frame_geometry(&mut comps, width, height);
        (comps, geom)
    }

    #[test]
    fn test_gray_to_rgb_pass_through() {
        let (comps, geom) = gray_frame(8, 8);
        let mut post = PostController::new(
            &comps,
            &geom,
            ColorSpace::Grayscale,
            ColorSpace::Rgb,
            8,
            8,
            None,
        )
        .unwrap();
        post.start_pass(BufferMode::PassThrough).unwrap();

        let mut main = MainBuffer::for_decompression(&comps).unwrap();
        main.rows_mut(0)[2].fill(77);
        main.set_ready();

        let mut out = vec![0u8; post.output_row_len()];
        post.process_row(&main, 2, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 77));
        assert_eq!(out.len(), 24);
    }

    #[test]
    fn test_420_upsampling_addresses_chroma_rows() {
        let (comps, geom) = ycc_420_frame(16, 16);
        let mut post = PostController::new(
            &comps,
            &geom,
            ColorSpace::YCbCr,
            ColorSpace::Rgb,
            16,
            16,
            None,
        )
        .unwrap();
        post.start_pass(BufferMode::PassThrough).unwrap();

        let mut main = MainBuffer::for_decompression(&comps).unwrap();
        for row in main.rows_mut(0) {
            row.fill(128);
        }
        for c in 1..3 {
            for row in main.rows_mut(c) {
                row.fill(128); // neutral chroma
            }
        }
        main.rows_mut(0)[5].fill(200);
        main.set_ready();

        let mut out = vec![0u8; post.output_row_len()];
        // Output row 5 reads luma row 5 and chroma row 2.
        post.process_row(&main, 5, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 200));
        post.process_row(&main, 4, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 128));
    }

    #[test]
    fn test_two_pass_quantization_over_saved_rows() {
        let (comps, geom) = gray_frame(8, 4);
        let quant = Box::new(TwoPassQuantizer::new(16).unwrap());
        let mut post = PostController::new(
            &comps,
            &geom,
            ColorSpace::Grayscale,
            ColorSpace::Rgb,
            8,
            4,
            Some(quant),
        )
        .unwrap();
        assert!(post.needs_prescan());
        assert_eq!(post.output_row_len(), 8); // palette indices

        let mut main = MainBuffer::for_decompression(&comps).unwrap();
        for (i, row) in main.rows_mut(0).iter_mut().enumerate() {
            row.fill(if i % 2 == 0 { 30 } else { 220 });
        }
        main.set_ready();

        post.start_pass(BufferMode::SaveAndPass).unwrap();
        let mut scratch = vec![0u8; 8];
        for row in 0..4 {
            post.process_row(&main, row, &mut scratch).unwrap();
        }
        post.finish_pass().unwrap();
        assert!(!post.needs_prescan());

        post.start_pass(BufferMode::CrankDest).unwrap();
        let mut dark = vec![0u8; 8];
        let mut light = vec![0u8; 8];
        post.process_row(&main, 0, &mut dark).unwrap();
        post.process_row(&main, 1, &mut light).unwrap();
        post.finish_pass().unwrap();

        let palette = post.palette().unwrap();
        assert!(palette[dark[0] as usize][0] < 128);
        assert!(palette[light[0] as usize][0] > 128);
    }

    #[test]
    fn test_row_length_checked() {
        let (comps, geom) = gray_frame(8, 8);
        let mut post = PostController::new(
            &comps,
            &geom,
            ColorSpace::Grayscale,
            ColorSpace::Grayscale,
            8,
            8,
            None,
        )
        .unwrap();
        post.start_pass(BufferMode::PassThrough).unwrap();
        let main = MainBuffer::for_decompression(&comps).unwrap();
        let mut out = vec![0u8; 7];
        assert!(post.process_row(&main, 0, &mut out).is_err());
    }
}
