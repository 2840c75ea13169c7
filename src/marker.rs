//! Datastream marker writing and parsing.
//!
//! The writer side emits marker segments into the staging buffer of a
//! [`SinkWriter`]; a segment is pushed exactly once and the caller drains
//! afterwards, so suspension can never split or repeat a segment.
//!
//! The reader side consumes markers from a [`ByteSource`] with
//! segment-level atomicity: a segment is parsed only once all of its bytes
//! are buffered, otherwise the source is rewound to the segment start and
//! the call reports suspension. Damaged input is handled leniently where
//! resynchronization is possible: stray bytes between segments are skipped
//! and counted, unknown length-counted segments are skipped whole.

use crate::consts::{
    DCTSIZE2, JPEG_APP0, JPEG_COM, JPEG_DHT, JPEG_DQT, JPEG_DRI, JPEG_EOI, JPEG_NATURAL_ORDER,
    JPEG_RST0, JPEG_SOF0, JPEG_SOF1, JPEG_SOF2, JPEG_SOI, JPEG_SOS, JPEG_TEM, MAX_COMPONENTS,
    MAX_COMPS_IN_SCAN, NUM_HUFF_TBLS, NUM_QUANT_TBLS,
};
use crate::error::{Error, Result};
use crate::huffman::HuffTable;
use crate::io::{ByteSink, ByteSource, SinkWriter};
use crate::types::{ComponentInfo, QuantTable, ScanInfo};

// =============================================================================
// Writer side
// =============================================================================

/// Push `0xFF marker` into the staging buffer.
pub fn write_marker<S: ByteSink>(w: &mut SinkWriter<S>, marker: u8) {
    w.push_byte(0xFF);
    w.push_byte(marker);
}

/// Push a marker plus its two-byte segment length (`data_len` excludes the
/// length field itself). The caller follows with exactly `data_len` bytes.
pub fn write_marker_header<S: ByteSink>(w: &mut SinkWriter<S>, marker: u8, data_len: u16) {
    write_marker(w, marker);
    w.push_be16(data_len + 2);
}

/// Emit the JFIF APP0 identification segment (version 1.01, no density).
pub fn write_jfif_app0<S: ByteSink>(w: &mut SinkWriter<S>) {
    write_marker_header(w, JPEG_APP0, 14);
    w.push_bytes(b"JFIF\0");
    w.push_byte(1); // major version
    w.push_byte(1); // minor version
    w.push_byte(0); // density unit: none
    w.push_be16(1); // x density
    w.push_be16(1); // y density
    w.push_byte(0); // thumbnail width
    w.push_byte(0); // thumbnail height
}

/// Emit one DQT segment for a single table slot, marking it sent.
pub fn write_dqt<S: ByteSink>(w: &mut SinkWriter<S>, slot: u8, table: &mut QuantTable) {
    let precision = if table.values.iter().any(|&q| q > 255) {
        1u8
    } else {
        0
    };
    let data_len = 1 + DCTSIZE2 as u16 * (1 + precision as u16);
    write_marker_header(w, JPEG_DQT, data_len);
    w.push_byte((precision << 4) | slot);
    for &nat in JPEG_NATURAL_ORDER.iter() {
        let q = table.values[nat];
        if precision == 1 {
            w.push_be16(q);
        } else {
            w.push_byte(q as u8);
        }
    }
    table.sent = true;
}

/// Emit one DHT segment for a single table, marking it sent. `class` is
/// 0 for DC, 1 for AC.
pub fn write_dht<S: ByteSink>(w: &mut SinkWriter<S>, class: u8, slot: u8, table: &mut HuffTable) {
    let num_symbols = table.num_symbols() as u16;
    write_marker_header(w, JPEG_DHT, 1 + 16 + num_symbols);
    w.push_byte((class << 4) | slot);
    w.push_bytes(&table.bits[1..17]);
    w.push_bytes(&table.huffval[..num_symbols as usize]);
    table.sent = true;
}

/// Emit a DRI segment.
pub fn write_dri<S: ByteSink>(w: &mut SinkWriter<S>, restart_interval: u16) {
    write_marker_header(w, JPEG_DRI, 2);
    w.push_be16(restart_interval);
}

/// Emit the frame header. `progressive` selects SOF2 over SOF0; tables
/// wider than 8 bits force SOF1.
pub fn write_sof<S: ByteSink>(
    w: &mut SinkWriter<S>,
    progressive: bool,
    extended: bool,
    width: u32,
    height: u32,
    components: &[ComponentInfo],
) {
    let code = if progressive {
        JPEG_SOF2
    } else if extended {
        JPEG_SOF1
    } else {
        JPEG_SOF0
    };
    write_marker_header(w, code, 6 + 3 * components.len() as u16);
    w.push_byte(8); // sample precision
    w.push_be16(height as u16);
    w.push_be16(width as u16);
    w.push_byte(components.len() as u8);
    for comp in components {
        w.push_byte(comp.component_id);
        w.push_byte((comp.h_samp_factor << 4) | comp.v_samp_factor);
        w.push_byte(comp.quant_tbl_no);
    }
}

/// Emit a scan header.
pub fn write_sos<S: ByteSink>(
    w: &mut SinkWriter<S>,
    scan: &ScanInfo,
    components: &[ComponentInfo],
) {
    let n = scan.comps_in_scan as u16;
    write_marker_header(w, JPEG_SOS, 1 + 2 * n + 3);
    w.push_byte(n as u8);
    for i in 0..scan.comps_in_scan as usize {
        let comp = &components[scan.component_index[i] as usize];
        w.push_byte(comp.component_id);
        w.push_byte((comp.dc_tbl_no << 4) | comp.ac_tbl_no);
    }
    w.push_byte(scan.ss);
    w.push_byte(scan.se);
    w.push_byte((scan.ah << 4) | scan.al);
}

// =============================================================================
// Reader side
// =============================================================================

/// Outcome of a [`MarkerReader::read_markers`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMarkersStatus {
    /// Ran out of buffered input mid-header; call again after feeding more.
    Suspended,
    /// A complete scan header was parsed; entropy data follows.
    ReachedSos,
    /// The end-of-image marker was consumed.
    ReachedEoi,
}

enum Step {
    Continue,
    Suspend,
    Done(ReadMarkersStatus),
}

/// Everything the header markers of a datastream describe.
#[derive(Debug, Clone, Default)]
pub struct ParsedHeader {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// True for a progressive (SOF2) frame
    pub progressive: bool,
    /// Frame components in header order
    pub components: Vec<ComponentInfo>,
    /// Quantization table slots
    pub quant_tables: [Option<QuantTable>; NUM_QUANT_TBLS],
    /// DC Huffman table slots
    pub dc_tables: [Option<HuffTable>; NUM_HUFF_TBLS],
    /// AC Huffman table slots
    pub ac_tables: [Option<HuffTable>; NUM_HUFF_TBLS],
    /// Restart interval in MCUs; 0 = no restarts
    pub restart_interval: u32,
    /// The most recently parsed scan header
    pub scan: Option<ScanInfo>,
}

/// Incremental header parser.
#[derive(Debug, Default)]
pub struct MarkerReader {
    /// Parsed header contents, filled in as markers arrive
    pub header: ParsedHeader,
    saw_soi: bool,
    saw_sof: bool,
    /// Marker byte handed back by the entropy decoder, processed before
    /// scanning the source for the next marker
    injected: Option<u8>,
    /// Stray bytes skipped while hunting for a marker
    discarded_bytes: u64,
    /// Expected next restart marker number (0-7)
    next_restart_num: u8,
}

impl MarkerReader {
    /// Create a parser with no input consumed.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once SOI has been consumed.
    pub fn saw_soi(&self) -> bool {
        self.saw_soi
    }

    /// True once a frame header has been parsed.
    pub fn saw_sof(&self) -> bool {
        self.saw_sof
    }

    /// Stray input bytes skipped so far.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// Expected number of the next restart marker (0-7).
    pub fn next_restart_num(&self) -> u8 {
        self.next_restart_num
    }

    /// Advance the restart sequence after a consumed restart marker.
    pub fn bump_restart_num(&mut self) {
        self.next_restart_num = (self.next_restart_num + 1) & 7;
    }

    /// Hand over a marker byte captured downstream (by the entropy
    /// decoder), to be processed before scanning the source again.
    pub fn inject_marker(&mut self, marker: u8) {
        self.injected = Some(marker);
    }

    /// Consume markers until a scan header or EOI is reached, or input runs
    /// out. Safe to call repeatedly; a suspended call consumes nothing of
    /// the segment it could not finish.
    pub fn read_markers(&mut self, src: &mut ByteSource) -> Result<ReadMarkersStatus> {
        loop {
            match self.read_one_marker(src)? {
                Step::Continue => {}
                Step::Suspend => return Ok(ReadMarkersStatus::Suspended),
                Step::Done(status) => return Ok(status),
            }
        }
    }

    fn read_one_marker(&mut self, src: &mut ByteSource) -> Result<Step> {
        if !self.saw_soi {
            let mark = src.mark();
            let step = self.read_soi(src)?;
            if matches!(step, Step::Suspend) {
                src.rewind(mark)?;
            }
            return Ok(step);
        }
        // Marker hunting commits as it goes (skipped bytes never need
        // reprocessing); the found marker is parked in `injected` so a
        // suspended segment parse resumes without rescanning.
        let marker = match self.injected {
            Some(m) => m,
            None => match self.scan_for_marker(src) {
                Some(m) => {
                    self.injected = Some(m);
                    m
                }
                None => return Ok(Step::Suspend),
            },
        };

        let mark = src.mark();
        let step = self.dispatch_marker(marker, src)?;
        if matches!(step, Step::Suspend) {
            src.rewind(mark)?;
        } else {
            self.injected = None;
        }
        Ok(step)
    }

    /// The stream must open with SOI; anything else is unusable.
    fn read_soi(&mut self, src: &mut ByteSource) -> Result<Step> {
        let Some(b0) = src.next_byte() else {
            return Ok(Step::Suspend);
        };
        let Some(b1) = src.next_byte() else {
            return Ok(Step::Suspend);
        };
        if b0 != 0xFF || b1 != JPEG_SOI {
            return Err(Error::MalformedHeader("datastream does not start with SOI"));
        }
        log::trace!("SOI");
        self.saw_soi = true;
        Ok(Step::Continue)
    }

    /// Skip to the next `0xFF marker` pair, counting discarded bytes.
    /// Fill bytes (repeated 0xFF) are not counted as damage.
    fn scan_for_marker(&mut self, src: &mut ByteSource) -> Option<u8> {
        loop {
            let b = src.next_byte()?;
            if b != 0xFF {
                self.discarded_bytes += 1;
                continue;
            }
            // Consume fill bytes, then the marker code.
            loop {
                match src.next_byte()? {
                    0xFF => continue,
                    0x00 => {
                        // Stuffed zero outside entropy data: stray.
                        self.discarded_bytes += 2;
                        break;
                    }
                    m => return Some(m),
                }
            }
        }
    }

    fn dispatch_marker(&mut self, marker: u8, src: &mut ByteSource) -> Result<Step> {
        match marker {
            JPEG_SOI => Err(Error::MalformedHeader("duplicate SOI")),
            JPEG_SOF0 | JPEG_SOF1 | JPEG_SOF2 => self.read_sof(marker, src),
            JPEG_DQT => self.read_dqt(src),
            JPEG_DHT => self.read_dht(src),
            JPEG_DRI => self.read_dri(src),
            JPEG_SOS => self.read_sos(src),
            JPEG_EOI => {
                log::trace!("EOI");
                Ok(Step::Done(ReadMarkersStatus::ReachedEoi))
            }
            JPEG_TEM => Ok(Step::Continue),
            m if (JPEG_RST0..JPEG_RST0 + 8).contains(&m) => {
                // A restart marker does not belong between header segments.
                log::warn!("unexpected restart marker RST{}", m - JPEG_RST0);
                self.discarded_bytes += 2;
                Ok(Step::Continue)
            }
            m if (0xC3..=0xCF).contains(&m) && m != JPEG_DHT && m != 0xC8 => {
                Err(Error::UnsupportedFeature("unsupported SOF variant"))
            }
            _ => self.skip_segment(marker, src),
        }
    }

    /// Require a complete length-counted segment in the buffer; returns the
    /// payload length (excluding the length field).
    fn segment_len(&mut self, src: &mut ByteSource) -> Result<Option<usize>> {
        if src.remaining() < 2 {
            return Ok(None);
        }
        let hi = src.next_byte().unwrap_or(0) as usize;
        let lo = src.next_byte().unwrap_or(0) as usize;
        let len = (hi << 8) | lo;
        if len < 2 {
            return Err(Error::MalformedHeader("segment length below 2"));
        }
        if src.remaining() < len - 2 {
            return Ok(None); // caller rewinds
        }
        Ok(Some(len - 2))
    }

    fn skip_segment(&mut self, marker: u8, src: &mut ByteSource) -> Result<Step> {
        let Some(len) = self.segment_len(src)? else {
            return Ok(Step::Suspend);
        };
        log::trace!("skipping marker 0x{marker:02X}, {len} bytes");
        src.skip(len);
        Ok(Step::Continue)
    }

    fn read_sof(&mut self, marker: u8, src: &mut ByteSource) -> Result<Step> {
        let Some(len) = self.segment_len(src)? else {
            return Ok(Step::Suspend);
        };
        if self.saw_sof {
            return Err(Error::MalformedHeader("duplicate frame header"));
        }
        let take = |src: &mut ByteSource| {
            src.next_byte()
                .ok_or(Error::MalformedHeader("frame header truncated"))
        };
        let precision = take(src)?;
        if precision != 8 {
            return Err(Error::UnsupportedFeature("sample precision other than 8"));
        }
        let height = ((take(src)? as u32) << 8) | take(src)? as u32;
        let width = ((take(src)? as u32) << 8) | take(src)? as u32;
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions { width, height });
        }
        let num_comps = take(src)? as usize;
        if num_comps == 0 || num_comps > MAX_COMPONENTS {
            return Err(Error::MalformedHeader("bad component count"));
        }
        if len != 6 + 3 * num_comps {
            return Err(Error::MalformedHeader("frame header length mismatch"));
        }

        let mut components = Vec::with_capacity(num_comps);
        for index in 0..num_comps {
            let id = take(src)?;
            let samp = take(src)?;
            let (h, v) = (samp >> 4, samp & 0x0F);
            if !(1..=2).contains(&h) || !(1..=2).contains(&v) {
                return Err(Error::InvalidSamplingFactor { h, v });
            }
            let quant_tbl_no = take(src)?;
            if quant_tbl_no as usize >= NUM_QUANT_TBLS {
                return Err(Error::MalformedHeader("bad quantization table slot"));
            }
            components.push(ComponentInfo {
                component_id: id,
                component_index: index as u8,
                h_samp_factor: h,
                v_samp_factor: v,
                quant_tbl_no,
                ..Default::default()
            });
        }

        log::debug!(
            "SOF{}: {}x{}, {} components",
            marker - JPEG_SOF0,
            width,
            height,
            num_comps
        );
        self.header.width = width;
        self.header.height = height;
        self.header.progressive = marker == JPEG_SOF2;
        self.header.components = components;
        self.saw_sof = true;
        Ok(Step::Continue)
    }

    fn read_dqt(&mut self, src: &mut ByteSource) -> Result<Step> {
        let Some(mut len) = self.segment_len(src)? else {
            return Ok(Step::Suspend);
        };
        while len > 0 {
            let pq_tq = src
                .next_byte()
                .ok_or(Error::MalformedHeader("DQT truncated"))?;
            len -= 1;
            let precision = pq_tq >> 4;
            let slot = (pq_tq & 0x0F) as usize;
            if precision > 1 || slot >= NUM_QUANT_TBLS {
                return Err(Error::MalformedHeader("bad DQT precision or slot"));
            }
            let need = DCTSIZE2 * (1 + precision as usize);
            if len < need {
                return Err(Error::MalformedHeader("DQT truncated"));
            }
            let mut values = [0u16; DCTSIZE2];
            for &nat in JPEG_NATURAL_ORDER.iter() {
                let q = if precision == 1 {
                    let hi = src.next_byte().unwrap_or(0) as u16;
                    let lo = src.next_byte().unwrap_or(0) as u16;
                    (hi << 8) | lo
                } else {
                    src.next_byte().unwrap_or(0) as u16
                };
                values[nat] = q.max(1); // zero divisors are unusable
            }
            len -= need;
            log::trace!("DQT slot {slot}, {}-bit", 8 * (1 + precision));
            self.header.quant_tables[slot] = Some(QuantTable::new(values));
        }
        Ok(Step::Continue)
    }

    fn read_dht(&mut self, src: &mut ByteSource) -> Result<Step> {
        let Some(mut len) = self.segment_len(src)? else {
            return Ok(Step::Suspend);
        };
        while len > 0 {
            let tc_th = src
                .next_byte()
                .ok_or(Error::MalformedHeader("DHT truncated"))?;
            len -= 1;
            let class = tc_th >> 4;
            let slot = (tc_th & 0x0F) as usize;
            if class > 1 || slot >= NUM_HUFF_TBLS {
                return Err(Error::MalformedHeader("bad DHT class or slot"));
            }
            if len < 16 {
                return Err(Error::MalformedHeader("DHT truncated"));
            }
            let mut bits = [0u8; 17];
            let mut count = 0usize;
            for b in bits[1..].iter_mut() {
                *b = src.next_byte().unwrap_or(0);
                count += *b as usize;
            }
            len -= 16;
            if count > 256 || len < count {
                return Err(Error::MalformedHeader("bad DHT symbol count"));
            }
            let mut huffval = Vec::with_capacity(count);
            for _ in 0..count {
                huffval.push(src.next_byte().unwrap_or(0));
            }
            len -= count;
            log::trace!(
                "DHT {} slot {slot}, {count} symbols",
                if class == 0 { "DC" } else { "AC" }
            );
            let table = HuffTable::new(bits, huffval);
            if class == 0 {
                self.header.dc_tables[slot] = Some(table);
            } else {
                self.header.ac_tables[slot] = Some(table);
            }
        }
        Ok(Step::Continue)
    }

    fn read_dri(&mut self, src: &mut ByteSource) -> Result<Step> {
        let Some(len) = self.segment_len(src)? else {
            return Ok(Step::Suspend);
        };
        if len != 2 {
            return Err(Error::MalformedHeader("bad DRI length"));
        }
        let hi = src.next_byte().unwrap_or(0) as u32;
        let lo = src.next_byte().unwrap_or(0) as u32;
        self.header.restart_interval = (hi << 8) | lo;
        log::debug!("DRI: restart interval {}", self.header.restart_interval);
        Ok(Step::Continue)
    }

    fn read_sos(&mut self, src: &mut ByteSource) -> Result<Step> {
        let Some(len) = self.segment_len(src)? else {
            return Ok(Step::Suspend);
        };
        if !self.saw_sof {
            return Err(Error::MalformedHeader("SOS before SOF"));
        }
        let take = |src: &mut ByteSource| {
            src.next_byte()
                .ok_or(Error::MalformedHeader("scan header truncated"))
        };
        let n = take(src)? as usize;
        if n == 0 || n > MAX_COMPS_IN_SCAN || len != 1 + 2 * n + 3 {
            return Err(Error::MalformedHeader("bad scan component count"));
        }
        let mut component_index = [0u8; MAX_COMPS_IN_SCAN];
        for slot in component_index.iter_mut().take(n) {
            let id = take(src)?;
            let tables = take(src)?;
            let index = self
                .header
                .components
                .iter()
                .position(|c| c.component_id == id)
                .ok_or(Error::MalformedHeader("scan names unknown component"))?;
            let (dc, ac) = (tables >> 4, tables & 0x0F);
            if dc as usize >= NUM_HUFF_TBLS || ac as usize >= NUM_HUFF_TBLS {
                return Err(Error::MalformedHeader("bad scan table slot"));
            }
            self.header.components[index].dc_tbl_no = dc;
            self.header.components[index].ac_tbl_no = ac;
            *slot = index as u8;
        }
        let ss = take(src)?;
        let se = take(src)?;
        let a = take(src)?;
        let (ah, al) = (a >> 4, a & 0x0F);
        if ss > 63 || se > 63 || se < ss {
            return Err(Error::MalformedHeader("bad spectral selection"));
        }
        let scan = ScanInfo {
            comps_in_scan: n as u8,
            component_index,
            ss,
            se,
            ah,
            al,
        };
        log::debug!(
            "SOS: {n} components, Ss={ss} Se={se} Ah={ah} Al={al}"
        );
        self.header.scan = Some(scan);
        self.next_restart_num = 0;
        Ok(Step::Done(ReadMarkersStatus::ReachedSos))
    }
}
