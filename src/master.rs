//! Pass planning.
//!
//! The master decides, up front, how many passes a session needs and
//! which buffering mode each stage runs in, so the controllers themselves
//! stay pass-agnostic.
//!
//! Compression:
//! - sequential, fixed tables: one stripwise pass, straight to the sink
//! - sequential, optimized tables: a save-and-gather pass over the
//!   scanlines, then one crank pass emitting with the optimal tables
//! - progressive: a save-only pass over the scanlines, then a gather and
//!   an emit crank pass per scan (progressive scans always use optimal
//!   tables; the fixed baseline tables have no codes for the
//!   progressive-only symbols)
//!
//! Decompression output:
//! - direct (no quantizer, or the one-pass quantizer): one stripwise pass
//! - two-pass quantizer: a save-and-histogram prescan, then a replay pass
//!   mapping the saved rows through the palette

use crate::error::{Error, Result};
use crate::progressive::validate_script;
use crate::types::{BufferMode, ScanInfo};

/// One crank pass over the saved coefficient arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrankPass {
    /// Index into the scan script
    pub scan_index: usize,
    /// Gather statistics instead of emitting
    pub gather: bool,
}

/// Complete pass plan for a compression session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressPlan {
    /// Coefficient-controller mode while scanlines are being fed
    pub scanline_mode: BufferMode,
    /// Run the entropy stage in gather mode during the scanline pass
    pub scanline_gather: bool,
    /// Crank passes that run after the last scanline
    pub cranks: Vec<CrankPass>,
}

impl CompressPlan {
    /// True if the plan requires full-image coefficient arrays.
    pub fn needs_buffering(&self) -> bool {
        self.scanline_mode != BufferMode::PassThrough
    }
}

/// Plan a compression session over the given scan script.
pub fn plan_compression(
    progressive: bool,
    optimize_coding: bool,
    scans: &[ScanInfo],
    num_components: u8,
) -> Result<CompressPlan> {
    if scans.is_empty() {
        return Err(Error::InvalidScanScript {
            reason: "empty scan script",
        });
    }
    if progressive {
        validate_script(scans, num_components)?;
        let mut cranks = Vec::with_capacity(scans.len() * 2);
        for i in 0..scans.len() {
            cranks.push(CrankPass {
                scan_index: i,
                gather: true,
            });
            cranks.push(CrankPass {
                scan_index: i,
                gather: false,
            });
        }
        Ok(CompressPlan {
            scanline_mode: BufferMode::SaveSource,
            scanline_gather: false,
            cranks,
        })
    } else {
        if scans.len() != 1 {
            return Err(Error::InvalidScanScript {
                reason: "sequential frames take exactly one scan",
            });
        }
        if optimize_coding {
            Ok(CompressPlan {
                scanline_mode: BufferMode::SaveAndPass,
                scanline_gather: true,
                cranks: vec![CrankPass {
                    scan_index: 0,
                    gather: false,
                }],
            })
        } else {
            Ok(CompressPlan {
                scanline_mode: BufferMode::PassThrough,
                scanline_gather: false,
                cranks: Vec::new(),
            })
        }
    }
}

/// One output pass of a decompression session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPass {
    /// Postprocessing-controller mode for this pass
    pub mode: BufferMode,
    /// A dummy pass whose rows exist only to feed the histogram
    pub is_prescan: bool,
}

/// Plan the output passes of a decompression session.
pub fn plan_output(needs_prescan: bool) -> Vec<OutputPass> {
    if needs_prescan {
        vec![
            OutputPass {
                mode: BufferMode::SaveAndPass,
                is_prescan: true,
            },
            OutputPass {
                mode: BufferMode::CrankDest,
                is_prescan: false,
            },
        ]
    } else {
        vec![OutputPass {
            mode: BufferMode::PassThrough,
            is_prescan: false,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progressive::simple_progression;

    #[test]
    fn test_sequential_plain_is_single_pass() {
        let scans = [ScanInfo::sequential(3)];
        let plan = plan_compression(false, false, &scans, 3).unwrap();
        assert_eq!(plan.scanline_mode, BufferMode::PassThrough);
        assert!(!plan.needs_buffering());
        assert!(plan.cranks.is_empty());
    }

    #[test]
    fn test_sequential_optimized_gathers_then_emits() {
        let scans = [ScanInfo::sequential(3)];
        let plan = plan_compression(false, true, &scans, 3).unwrap();
        assert_eq!(plan.scanline_mode, BufferMode::SaveAndPass);
        assert!(plan.scanline_gather);
        assert_eq!(
            plan.cranks,
            vec![CrankPass {
                scan_index: 0,
                gather: false
            }]
        );
    }

    #[test]
    fn test_progressive_pairs_gather_and_emit_per_scan() {
        let scans = simple_progression(3);
        let plan = plan_compression(true, true, &scans, 3).unwrap();
        assert_eq!(plan.scanline_mode, BufferMode::SaveSource);
        assert_eq!(plan.cranks.len(), scans.len() * 2);
        for (i, pair) in plan.cranks.chunks(2).enumerate() {
            assert_eq!(pair[0], CrankPass { scan_index: i, gather: true });
            assert_eq!(pair[1], CrankPass { scan_index: i, gather: false });
        }
    }

    #[test]
    fn test_bad_scripts_rejected() {
        assert!(plan_compression(false, false, &[], 3).is_err());
        let two = [ScanInfo::sequential(3), ScanInfo::sequential(3)];
        assert!(plan_compression(false, false, &two, 3).is_err());
        // A progressive script missing its DC scan fails validation.
        let bad = [ScanInfo::ac_scan(0, 1, 63, 0, 0)];
        assert!(plan_compression(true, true, &bad, 1).is_err());
    }

    #[test]
    fn test_output_planning() {
        let direct = plan_output(false);
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].mode, BufferMode::PassThrough);

        let two_pass = plan_output(true);
        assert_eq!(two_pass.len(), 2);
        assert!(two_pass[0].is_prescan);
        assert_eq!(two_pass[1].mode, BufferMode::CrankDest);
    }
}
