//! Core type definitions shared by every pipeline stage.

use crate::consts::{div_round_up, DCTSIZE, DCTSIZE2, MAX_COMPS_IN_SCAN};

/// A single 8x8 block of DCT coefficients.
pub type DctBlock = [i16; DCTSIZE2];

// =============================================================================
// Color Spaces
// =============================================================================

/// Color space of image data entering or leaving the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    /// Grayscale (1 component)
    Grayscale,
    /// RGB (3 components, interleaved R, G, B)
    Rgb,
    /// YCbCr (3 components) - the internal coding color space
    #[default]
    YCbCr,
}

impl ColorSpace {
    /// Returns the number of components for this color space.
    pub const fn num_components(self) -> usize {
        match self {
            ColorSpace::Grayscale => 1,
            ColorSpace::Rgb | ColorSpace::YCbCr => 3,
        }
    }
}

// =============================================================================
// Buffering Modes
// =============================================================================

/// Operating mode of a two-sided buffer controller for one pass.
///
/// Every mode other than `PassThrough` requires the controller to own a
/// full-image virtual array; the master guarantees the modes are requested
/// in a legal order (a `CrankDest` pass only ever follows a pass that
/// populated the array).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMode {
    /// Plain stripwise operation: both halves run each call, transferring
    /// through a rolling window.
    #[default]
    PassThrough,
    /// Run the producer half only, saving its output into the virtual array.
    SaveSource,
    /// Run the consumer half only, replaying a previously saved array.
    CrankDest,
    /// Run both halves, simultaneously saving and forwarding output.
    SaveAndPass,
}

// =============================================================================
// DCT Method
// =============================================================================

/// Transform routine selection, resolved once per pass at `start_pass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DctMethod {
    /// Accurate fixed-point method (default)
    #[default]
    IntSlow,
    /// Floating-point method
    Float,
}

// =============================================================================
// Chroma Subsampling
// =============================================================================

/// Chroma subsampling mode used to derive component sampling factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subsampling {
    /// 4:4:4 - no subsampling
    S444,
    /// 4:2:2 - 2:1 horizontal
    S422,
    /// 4:2:0 - 2:1 horizontal and vertical (most common)
    #[default]
    S420,
    /// Grayscale - single component
    Gray,
}

impl Subsampling {
    /// Returns (h_samp_factor, v_samp_factor) for the luminance component.
    pub const fn luma_factors(self) -> (u8, u8) {
        match self {
            Subsampling::S444 | Subsampling::Gray => (1, 1),
            Subsampling::S422 => (2, 1),
            Subsampling::S420 => (2, 2),
        }
    }
}

// =============================================================================
// Scan Info
// =============================================================================

/// Describes one scan of a (possibly progressive) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanInfo {
    /// Number of components in this scan (1-4)
    pub comps_in_scan: u8,
    /// Component indices participating in this scan
    pub component_index: [u8; MAX_COMPS_IN_SCAN],
    /// Spectral selection start (0 for DC, 1-63 for AC)
    pub ss: u8,
    /// Spectral selection end
    pub se: u8,
    /// Successive approximation high bit
    pub ah: u8,
    /// Successive approximation low bit (point transform)
    pub al: u8,
}

impl ScanInfo {
    /// Full-spectrum sequential scan over `num_components` components.
    pub const fn sequential(num_components: u8) -> Self {
        Self {
            comps_in_scan: num_components,
            component_index: [0, 1, 2, 3],
            ss: 0,
            se: 63,
            ah: 0,
            al: 0,
        }
    }

    /// DC scan over all components (first scan of a progressive frame).
    pub const fn dc_scan(num_components: u8, al: u8) -> Self {
        Self {
            comps_in_scan: num_components,
            component_index: [0, 1, 2, 3],
            ss: 0,
            se: 0,
            ah: 0,
            al,
        }
    }

    /// AC scan for a single component.
    pub const fn ac_scan(component: u8, ss: u8, se: u8, ah: u8, al: u8) -> Self {
        Self {
            comps_in_scan: 1,
            component_index: [component, 0, 0, 0],
            ss,
            se,
            ah,
            al,
        }
    }

    /// DC refinement scan over all components.
    pub const fn dc_refine(num_components: u8, ah: u8, al: u8) -> Self {
        Self {
            comps_in_scan: num_components,
            component_index: [0, 1, 2, 3],
            ss: 0,
            se: 0,
            ah,
            al,
        }
    }

    /// Returns true if this scan codes only DC coefficients.
    pub const fn is_dc_scan(&self) -> bool {
        self.ss == 0
    }

    /// Returns true if this is a successive-approximation refinement scan.
    pub const fn is_refinement(&self) -> bool {
        self.ah != 0
    }
}

impl Default for ScanInfo {
    fn default() -> Self {
        Self::sequential(3)
    }
}

// =============================================================================
// Component Info
// =============================================================================

/// Per-component descriptor.
///
/// The identification and table-assignment fields are caller/bitstream
/// supplied; the geometry fields are derived once when the frame header is
/// finalized and are immutable afterwards (every downstream stage reads
/// them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentInfo {
    /// Component identifier in the frame header (1=Y, 2=Cb, 3=Cr)
    pub component_id: u8,
    /// Index in the frame's component array
    pub component_index: u8,
    /// Horizontal sampling factor (1-2)
    pub h_samp_factor: u8,
    /// Vertical sampling factor (1-2)
    pub v_samp_factor: u8,
    /// Quantization table slot (0-3)
    pub quant_tbl_no: u8,
    /// DC Huffman table slot (0-3)
    pub dc_tbl_no: u8,
    /// AC Huffman table slot (0-3)
    pub ac_tbl_no: u8,

    // Derived geometry, filled in by `finalize_frame_geometry`.
    /// Component width in samples after downsampling
    pub downsampled_width: u32,
    /// Component height in samples after downsampling
    pub downsampled_height: u32,
    /// Component width in whole blocks (including partial right edge)
    pub width_in_blocks: u32,
    /// Component height in whole blocks (including partial bottom edge)
    pub height_in_blocks: u32,
    /// Blocks per MCU, horizontally, for interleaved scans
    pub mcu_width: u32,
    /// Blocks per MCU, vertically, for interleaved scans
    pub mcu_height: u32,
}

impl ComponentInfo {
    /// Total blocks contributed by this component to one interleaved MCU.
    pub const fn mcu_blocks(&self) -> u32 {
        self.mcu_width * self.mcu_height
    }
}

/// Frame-wide geometry derived from the image dimensions and the components'
/// sampling factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameGeometry {
    /// Maximum horizontal sampling factor across components
    pub max_h_samp: u8,
    /// Maximum vertical sampling factor across components
    pub max_v_samp: u8,
    /// MCUs per MCU row (interleaved scans)
    pub mcus_per_row: u32,
    /// Number of MCU rows (interleaved scans)
    pub mcu_rows: u32,
}

/// Compute the derived geometry for every component and the frame.
///
/// Called exactly once per session, when the frame header is finalized;
/// afterwards the component descriptors are treated as immutable.
pub fn finalize_frame_geometry(
    components: &mut [ComponentInfo],
    width: u32,
    height: u32,
) -> FrameGeometry {
    let max_h = components.iter().map(|c| c.h_samp_factor).max().unwrap_or(1);
    let max_v = components.iter().map(|c| c.v_samp_factor).max().unwrap_or(1);

    for comp in components.iter_mut() {
        let h = comp.h_samp_factor as usize;
        let v = comp.v_samp_factor as usize;
        comp.downsampled_width =
            div_round_up(width as usize * h, max_h as usize) as u32;
        comp.downsampled_height =
            div_round_up(height as usize * v, max_v as usize) as u32;
        comp.width_in_blocks =
            div_round_up(comp.downsampled_width as usize, DCTSIZE) as u32;
        comp.height_in_blocks =
            div_round_up(comp.downsampled_height as usize, DCTSIZE) as u32;
        comp.mcu_width = h as u32;
        comp.mcu_height = v as u32;
    }

    FrameGeometry {
        max_h_samp: max_h,
        max_v_samp: max_v,
        mcus_per_row: div_round_up(width as usize, max_h as usize * DCTSIZE) as u32,
        mcu_rows: div_round_up(height as usize, max_v as usize * DCTSIZE) as u32,
    }
}

// =============================================================================
// Quantization Table
// =============================================================================

/// A quantization table with 64 coefficients in natural order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantTable {
    /// Quantization values in natural (row-major) order
    pub values: [u16; DCTSIZE2],
    /// True once this table has been written to the output datastream
    pub sent: bool,
}

impl QuantTable {
    /// Create a new quantization table from values.
    pub const fn new(values: [u16; DCTSIZE2]) -> Self {
        Self {
            values,
            sent: false,
        }
    }

    /// Identity table: all divisors 1 (lossless quantization).
    pub const fn identity() -> Self {
        Self::new([1; DCTSIZE2])
    }

    /// Create from a base table scaled by a percentage factor
    /// (100 = use table as-is).
    pub fn scaled(base: &[u16; DCTSIZE2], scale_factor: u32, force_baseline: bool) -> Self {
        let mut values = [0u16; DCTSIZE2];
        for i in 0..DCTSIZE2 {
            let mut temp = ((base[i] as u32) * scale_factor + 50) / 100;
            if temp == 0 {
                temp = 1;
            }
            if temp > 32767 {
                temp = 32767;
            }
            if force_baseline && temp > 255 {
                temp = 255;
            }
            values[i] = temp as u16;
        }
        Self {
            values,
            sent: false,
        }
    }

    /// Map a quality setting (1-100) to the conventional scaling percentage.
    pub fn quality_to_scale(quality: u8) -> u32 {
        let q = quality.clamp(1, 100) as u32;
        if q < 50 {
            5000 / q
        } else {
            200 - q * 2
        }
    }
}

impl Default for QuantTable {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colorspace_components() {
        assert_eq!(ColorSpace::Grayscale.num_components(), 1);
        assert_eq!(ColorSpace::Rgb.num_components(), 3);
        assert_eq!(ColorSpace::YCbCr.num_components(), 3);
    }

    #[test]
    fn test_scan_info_predicates() {
        let dc = ScanInfo::dc_scan(3, 1);
        assert!(dc.is_dc_scan());
        assert!(!dc.is_refinement());

        let ac = ScanInfo::ac_scan(0, 1, 63, 0, 0);
        assert!(!ac.is_dc_scan());

        let refine = ScanInfo::ac_scan(0, 1, 63, 1, 0);
        assert!(refine.is_refinement());
    }

    #[test]
    fn test_geometry_420() {
        let mut comps = [
            ComponentInfo {
                component_id: 1,
                component_index: 0,
                h_samp_factor: 2,
                v_samp_factor: 2,
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
        ];
        let geom = finalize_frame_geometry(&mut comps, 35, 21);
        assert_eq!(geom.max_h_samp, 2);
        assert_eq!(geom.max_v_samp, 2);
        assert_eq!(geom.mcus_per_row, 3); // ceil(35 / 16)
        assert_eq!(geom.mcu_rows, 2); // ceil(21 / 16)

        assert_eq!(comps[0].downsampled_width, 35);
        assert_eq!(comps[0].width_in_blocks, 5);
        assert_eq!(comps[1].downsampled_width, 18); // ceil(35 / 2)
        assert_eq!(comps[1].width_in_blocks, 3);
        assert_eq!(comps[1].downsampled_height, 11); // ceil(21 / 2)
        assert_eq!(comps[1].height_in_blocks, 2);
    }

    #[test]
    fn test_quality_scaling() {
        assert_eq!(QuantTable::quality_to_scale(50), 100);
        assert_eq!(QuantTable::quality_to_scale(100), 0);
        assert_eq!(QuantTable::quality_to_scale(25), 200);

        let base = [16u16; DCTSIZE2];
        let scaled = QuantTable::scaled(&base, 100, false);
        assert_eq!(scaled.values, base);
        let scaled = QuantTable::scaled(&base, 0, false);
        assert_eq!(scaled.values, [1u16; DCTSIZE2]); // clamped up to 1
        let high = [1000u16; DCTSIZE2];
        let scaled = QuantTable::scaled(&high, 100, true);
        assert_eq!(scaled.values, [255u16; DCTSIZE2]); // baseline clamp
    }
}
