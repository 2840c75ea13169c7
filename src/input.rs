//! Decompression input controller.
//!
//! Drives the marker reader and the per-scan entropy decoders, feeding
//! decoded coefficients into the coefficient controller. The controller
//! owns the cross-scan state: frame geometry finalization at the first
//! scan header, per-scan entropy decoder selection, successive-
//! approximation consistency tracking, and the handback of the marker
//! that terminated a scan's entropy data.
//!
//! A truncated datastream never fails here: missing entropy data decodes
//! as zero bits and a missing end-of-image marker is reported as a normal
//! end of input, with warnings.

use crate::coef::CoefDecoder;
use crate::consts::DCTSIZE2;
use crate::entropy::{EntropyDecodeStage, HuffDecoder};
use crate::error::{Error, Result};
use crate::io::ByteSource;
use crate::marker::{MarkerReader, ParsedHeader, ReadMarkersStatus};
use crate::progressive::ProgressiveDecoder;
use crate::types::{BufferMode, FrameGeometry, ScanInfo};

/// Outcome of one [`InputController::consume_input`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    /// Out of buffered input; feed more and call again.
    Suspended,
    /// The frame header and the first scan header are parsed.
    HeaderReady,
    /// One scan's entropy data is fully decoded.
    ScanDone,
    /// One iMCU row of samples was decoded into the main buffer
    /// (stripwise sessions only).
    StripReady,
    /// The end of the image (or of the input) was reached.
    Eoi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Markers,
    ScanSetup,
    ScanData,
    Finished,
}

/// Input-side pass controller for one decompression session.
pub struct InputController {
    markers: MarkerReader,
    phase: Phase,
    geometry: Option<FrameGeometry>,
    entropy: Option<Box<dyn EntropyDecodeStage>>,
    current_scan: Option<ScanInfo>,
    /// Successive-approximation level per component and coefficient
    levels: Vec<[Option<u8>; DCTSIZE2]>,
    scans_completed: u32,
    first_scan: Option<ScanInfo>,
    /// iMCU rows decoded so far in a stripwise scan
    strips_done: u32,
    eoi: bool,
}

impl InputController {
    pub fn new() -> Self {
        Self {
            markers: MarkerReader::new(),
            phase: Phase::Markers,
            geometry: None,
            entropy: None,
            current_scan: None,
            levels: Vec::new(),
            scans_completed: 0,
            first_scan: None,
            strips_done: 0,
            eoi: false,
        }
    }

    /// The parsed datastream header.
    pub fn header(&self) -> &ParsedHeader {
        &self.markers.header
    }

    /// Frame geometry, available once the header is ready.
    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.geometry
    }

    /// True once the end of the image has been consumed.
    pub fn eoi_reached(&self) -> bool {
        self.eoi
    }

    /// Completed entropy-coded scans so far.
    pub fn scans_completed(&self) -> u32 {
        self.scans_completed
    }

    /// True if a frame header was parsed (false for a tables-only stream).
    pub fn saw_frame(&self) -> bool {
        self.markers.saw_sof()
    }

    /// True if the frame cannot be decoded in a single stripwise pass:
    /// either it is progressive or its first scan covers only part of the
    /// components.
    pub fn has_multiple_scans(&self) -> bool {
        if self.markers.header.progressive {
            return true;
        }
        match &self.first_scan {
            Some(scan) => {
                (scan.comps_in_scan as usize) < self.markers.header.components.len()
            }
            None => false,
        }
    }

    /// Advance through markers until the first scan header (or the end of
    /// a tables-only stream). Returns `HeaderReady`, `Eoi`, or `Suspended`.
    pub fn read_header(&mut self, src: &mut ByteSource) -> Result<InputStatus> {
        match self.phase {
            Phase::Markers if self.first_scan.is_none() => {}
            Phase::Finished => return Ok(InputStatus::Eoi),
            _ => return Ok(InputStatus::HeaderReady),
        }
        match self.markers.read_markers(src)? {
            ReadMarkersStatus::Suspended => Ok(self.suspend_or_truncate(src)),
            ReadMarkersStatus::ReachedSos => {
                self.finish_header()?;
                Ok(InputStatus::HeaderReady)
            }
            ReadMarkersStatus::ReachedEoi => {
                self.eoi = true;
                self.phase = Phase::Finished;
                Ok(InputStatus::Eoi)
            }
        }
    }

    fn finish_header(&mut self) -> Result<()> {
        let header = &mut self.markers.header;
        let geom = crate::types::finalize_frame_geometry(
            &mut header.components,
            header.width,
            header.height,
        );
        self.geometry = Some(geom);
        self.levels = vec![[None; DCTSIZE2]; header.components.len()];
        self.first_scan = header.scan;
        self.phase = Phase::ScanSetup;
        Ok(())
    }

    /// Decode input through the end of the next scan (or the end of the
    /// image). The coefficient controller must already be in a save pass
    /// per scan; this controller starts one for each scan it decodes.
    pub fn consume_input(
        &mut self,
        src: &mut ByteSource,
        coef: &mut CoefDecoder,
    ) -> Result<InputStatus> {
        loop {
            match self.phase {
                Phase::Finished => return Ok(InputStatus::Eoi),
                Phase::Markers => match self.markers.read_markers(src)? {
                    ReadMarkersStatus::Suspended => {
                        let status = self.suspend_or_truncate(src);
                        return Ok(status);
                    }
                    ReadMarkersStatus::ReachedSos => {
                        self.phase = Phase::ScanSetup;
                    }
                    ReadMarkersStatus::ReachedEoi => {
                        self.eoi = true;
                        self.phase = Phase::Finished;
                        return Ok(InputStatus::Eoi);
                    }
                },
                Phase::ScanSetup => {
                    self.begin_scan(coef, BufferMode::SaveSource)?;
                    self.phase = Phase::ScanData;
                }
                Phase::ScanData => {
                    let scan = self
                        .current_scan
                        .ok_or(Error::InternalError("scan data without a scan"))?;
                    let entropy = self
                        .entropy
                        .as_mut()
                        .ok_or(Error::InternalError("scan data without a decoder"))?;
                    if !coef.consume_scan(&scan, entropy.as_mut(), src)? {
                        return Ok(InputStatus::Suspended);
                    }
                    self.end_scan();
                    return Ok(InputStatus::ScanDone);
                }
            }
        }
    }

    /// Stripwise variant of [`consume_input`](Self::consume_input):
    /// decode one iMCU row of the current scan and inverse-transform it
    /// straight into `main`. Only legal for frames where
    /// [`has_multiple_scans`](Self::has_multiple_scans) is false.
    pub fn decompress_strip(
        &mut self,
        src: &mut ByteSource,
        coef: &mut CoefDecoder,
        main: &mut crate::mainbuf::MainBuffer,
    ) -> Result<InputStatus> {
        loop {
            match self.phase {
                Phase::Finished => return Ok(InputStatus::Eoi),
                Phase::Markers => match self.markers.read_markers(src)? {
                    ReadMarkersStatus::Suspended => {
                        let status = self.suspend_or_truncate(src);
                        return Ok(status);
                    }
                    ReadMarkersStatus::ReachedSos => {
                        self.phase = Phase::ScanSetup;
                    }
                    ReadMarkersStatus::ReachedEoi => {
                        self.eoi = true;
                        self.phase = Phase::Finished;
                        return Ok(InputStatus::Eoi);
                    }
                },
                Phase::ScanSetup => {
                    self.begin_scan(coef, BufferMode::PassThrough)?;
                    self.phase = Phase::ScanData;
                }
                Phase::ScanData => {
                    let scan = self
                        .current_scan
                        .ok_or(Error::InternalError("scan data without a scan"))?;
                    let entropy = self
                        .entropy
                        .as_mut()
                        .ok_or(Error::InternalError("scan data without a decoder"))?;
                    if !coef.decompress_strip(&scan, entropy.as_mut(), src, main)? {
                        return Ok(InputStatus::Suspended);
                    }
                    self.strips_done += 1;
                    let rows = self
                        .geometry
                        .ok_or(Error::InternalError("scan data without geometry"))?
                        .mcu_rows;
                    if self.strips_done >= rows {
                        self.end_scan();
                    }
                    return Ok(InputStatus::StripReady);
                }
            }
        }
    }

    /// Scan epilogue shared by the save and stripwise paths.
    fn end_scan(&mut self) {
        if let Some(entropy) = self.entropy.as_mut() {
            if entropy.ran_out() {
                log::warn!("entropy data ended prematurely in scan");
            }
            if let Some(m) = entropy.take_pending_marker() {
                self.markers.inject_marker(m);
            }
        }
        self.entropy = None;
        self.current_scan = None;
        self.scans_completed += 1;
        self.phase = Phase::Markers;
    }

    fn begin_scan(&mut self, coef: &mut CoefDecoder, mode: BufferMode) -> Result<()> {
        let scan = self
            .markers
            .header
            .scan
            .ok_or(Error::InternalError("scan start without a scan header"))?;
        self.check_progression(&scan);
        let header = &self.markers.header;
        let entropy: Box<dyn EntropyDecodeStage> = if header.progressive {
            Box::new(ProgressiveDecoder::new(
                &header.components,
                &scan,
                &header.dc_tables,
                &header.ac_tables,
                header.restart_interval,
            )?)
        } else {
            Box::new(HuffDecoder::new(
                &header.components,
                &scan,
                &header.dc_tables,
                &header.ac_tables,
                header.restart_interval,
            )?)
        };
        coef.start_input_pass(mode)?;
        self.entropy = Some(entropy);
        self.current_scan = Some(scan);
        self.strips_done = 0;
        Ok(())
    }

    /// Track successive-approximation levels and warn on an inconsistent
    /// progression. Decoding proceeds regardless; a broken script yields
    /// bad pixels, not a failure.
    fn check_progression(&mut self, scan: &ScanInfo) {
        for ci in 0..scan.comps_in_scan as usize {
            let comp = scan.component_index[ci] as usize;
            let Some(levels) = self.levels.get_mut(comp) else {
                continue;
            };
            if scan.ss > 0 && levels[0].is_none() {
                log::warn!("AC scan for component {comp} before its DC scan");
            }
            for k in scan.ss as usize..=scan.se as usize {
                match (scan.ah, levels[k]) {
                    (0, Some(_)) => {
                        log::warn!("coefficient {k} of component {comp} sent twice");
                    }
                    (0, None) => {}
                    (ah, cur) if cur != Some(ah) => {
                        log::warn!(
                            "refinement of coefficient {k} of component {comp} \
                             skips a level"
                        );
                    }
                    _ => {}
                }
                levels[k] = Some(scan.al);
            }
        }
    }

    /// Distinguish waiting-for-input from a truncated stream.
    fn suspend_or_truncate(&mut self, src: &ByteSource) -> InputStatus {
        if src.is_finished() {
            log::warn!("premature end of datastream");
            self.eoi = true;
            self.phase = Phase::Finished;
            InputStatus::Eoi
        } else {
            InputStatus::Suspended
        }
    }
}

impl Default for InputController {
    fn default() -> Self {
        Self::new()
    }
}
