//! Progressive-mode entropy coding and scan scripts.
//!
//! A progressive frame spreads each coefficient across several scans:
//! spectral selection sends disjoint zigzag bands, successive approximation
//! sends high-order bits first and refines one bit per later scan. The
//! coders here implement the four scan kinds (DC/AC x first/refinement)
//! with shared EOB-run accounting; the suspension contract matches the
//! sequential coders in [`entropy`](crate::entropy).

use crate::bitstream::{huff_extend, jpeg_nbits, BitWriter};
use crate::consts::{
    DCTSIZE2, JPEG_NATURAL_ORDER, JPEG_RST0, MAX_COMPS_IN_SCAN, NUM_HUFF_TBLS,
};
use crate::entropy::{
    magnitude_bits, read_restart_marker, DecoderState, EntropyDecodeStage, EntropyEncodeStage,
    McuLayout,
};
use crate::error::{Error, Result};
use crate::huffman::{DecodeTable, EncodeTable, FrequencyCounter, HuffTable};
use crate::io::{ByteSink, ByteSource};
use crate::marker::write_marker;
use crate::types::{ComponentInfo, DctBlock, ScanInfo};

/// Cap on correction bits buffered across MCUs while an EOB run is open.
const MAX_CORR_BITS: usize = 1000;

// =============================================================================
// Scan scripts
// =============================================================================

/// The conventional progression: DC with one point-transform bit, luma AC
/// split into two bands, chroma AC whole, then refinement passes.
pub fn simple_progression(num_components: u8) -> Vec<ScanInfo> {
    if num_components == 1 {
        return vec![
            ScanInfo::dc_scan(1, 1),
            ScanInfo::ac_scan(0, 1, 5, 0, 2),
            ScanInfo::ac_scan(0, 6, 63, 0, 2),
            ScanInfo::ac_scan(0, 1, 63, 2, 1),
            ScanInfo::dc_refine(1, 1, 0),
            ScanInfo::ac_scan(0, 1, 63, 1, 0),
        ];
    }
    vec![
        ScanInfo::dc_scan(num_components, 1),
        ScanInfo::ac_scan(0, 1, 5, 0, 2),
        ScanInfo::ac_scan(2, 1, 63, 0, 1),
        ScanInfo::ac_scan(1, 1, 63, 0, 1),
        ScanInfo::ac_scan(0, 6, 63, 0, 2),
        ScanInfo::ac_scan(0, 1, 63, 2, 1),
        ScanInfo::dc_refine(num_components, 1, 0),
        ScanInfo::ac_scan(2, 1, 63, 1, 0),
        ScanInfo::ac_scan(1, 1, 63, 1, 0),
        ScanInfo::ac_scan(0, 1, 63, 1, 0),
    ]
}

/// Check a scan script for structural validity and a legal successive
/// approximation sequence for every coefficient of every component.
pub fn validate_script(scans: &[ScanInfo], num_components: u8) -> Result<()> {
    let err = |reason| Err(Error::InvalidScanScript { reason });
    if scans.is_empty() {
        return err("empty script");
    }

    // Current point-transform level per (component, coefficient); None =
    // coefficient not yet sent.
    let mut level = vec![[None::<u8>; DCTSIZE2]; num_components as usize];

    for scan in scans {
        let n = scan.comps_in_scan as usize;
        if n == 0 || n > MAX_COMPS_IN_SCAN {
            return err("bad component count");
        }
        for &ci in &scan.component_index[..n] {
            if ci >= num_components {
                return err("component index out of range");
            }
        }
        if scan.is_dc_scan() {
            if scan.se != 0 {
                return err("DC scan must have Se = 0");
            }
        } else {
            if n != 1 {
                return err("AC scan must cover a single component");
            }
            if scan.ss > scan.se || scan.se > 63 {
                return err("bad spectral band");
            }
        }
        if scan.al > 13 {
            return err("point transform too large");
        }
        if scan.is_refinement() && scan.ah != scan.al + 1 {
            return err("refinement must lower the point transform by one");
        }

        for &ci in &scan.component_index[..n] {
            let comp_level = &mut level[ci as usize];
            for k in scan.ss..=scan.se {
                if scan.is_refinement() {
                    if comp_level[k as usize] != Some(scan.ah) {
                        return err("refinement out of sequence");
                    }
                } else {
                    if comp_level[k as usize].is_some() {
                        return err("coefficient sent twice");
                    }
                    if k > 0 && comp_level[0].is_none() {
                        return err("AC data before DC");
                    }
                }
                comp_level[k as usize] = Some(scan.al);
            }
        }
    }

    // Every component's DC must have been sent completely.
    for comp_level in &level {
        if comp_level[0] != Some(0) {
            return err("DC not sent to completion");
        }
    }
    Ok(())
}

// =============================================================================
// Encoder
// =============================================================================

#[derive(Debug)]
struct ProgEncComp {
    tbl_slot: usize,
    table: Option<EncodeTable>,
}

/// Progressive Huffman encoder for one scan of any of the four kinds.
#[derive(Debug)]
pub struct ProgressiveEncoder {
    scan: ScanInfo,
    layout: McuLayout,
    comps: Vec<ProgEncComp>,
    gather: bool,
    counts: [Option<Box<FrequencyCounter>>; NUM_HUFF_TBLS],
    dc_pred: [i32; MAX_COMPS_IN_SCAN],
    eobrun: u32,
    corr_bits: Vec<u8>,
    restart_interval: u32,
    restarts_to_go: u32,
    next_restart_num: u8,
}

impl ProgressiveEncoder {
    /// Set up the encoder for one progressive scan. DC-first scans use the
    /// components' DC tables, AC scans the single component's AC table; DC
    /// refinement needs no table at all.
    pub fn new(
        components: &[ComponentInfo],
        scan: &ScanInfo,
        dc_tables: &[Option<HuffTable>],
        ac_tables: &[Option<HuffTable>],
        restart_interval: u32,
        gather: bool,
    ) -> Result<Self> {
        let layout = McuLayout::for_scan(components, scan)?;
        let mut comps = Vec::new();
        let mut counts: [Option<Box<FrequencyCounter>>; NUM_HUFF_TBLS] = Default::default();
        let needs_table = !(scan.is_dc_scan() && scan.is_refinement());

        for ci in 0..scan.comps_in_scan as usize {
            let comp = &components[scan.component_index[ci] as usize];
            let (slot, pool) = if scan.is_dc_scan() {
                (comp.dc_tbl_no as usize, dc_tables)
            } else {
                (comp.ac_tbl_no as usize, ac_tables)
            };
            let table = if !needs_table {
                None
            } else if gather {
                if counts[slot].is_none() {
                    counts[slot] = Some(Box::new(FrequencyCounter::new()));
                }
                None
            } else {
                let t = pool
                    .get(slot)
                    .and_then(|t| t.as_ref())
                    .ok_or(Error::MissingHuffmanTable(slot))?;
                Some(EncodeTable::derive(t)?)
            };
            comps.push(ProgEncComp {
                tbl_slot: slot,
                table,
            });
        }

        Ok(Self {
            scan: *scan,
            layout,
            comps,
            gather,
            counts,
            dc_pred: [0; MAX_COMPS_IN_SCAN],
            eobrun: 0,
            corr_bits: Vec::new(),
            restart_interval,
            restarts_to_go: restart_interval,
            next_restart_num: 0,
        })
    }

    /// Gathered statistics for a table slot (gather mode only).
    pub fn counter(&self, slot: usize) -> Option<&FrequencyCounter> {
        self.counts[slot].as_deref()
    }

    fn emit_symbol<S: ByteSink>(
        &mut self,
        writer: &mut BitWriter<S>,
        ci: usize,
        symbol: u8,
    ) -> Result<()> {
        if self.gather {
            self.counts[self.comps[ci].tbl_slot]
                .as_mut()
                .expect("gather counters allocated")
                .record(symbol);
            return Ok(());
        }
        let table = self.comps[ci].table.as_ref().expect("emit tables derived");
        let size = table.size[symbol as usize];
        if size == 0 {
            return Err(Error::InternalError("symbol has no Huffman code"));
        }
        writer.put_bits(table.code[symbol as usize], size);
        Ok(())
    }

    fn emit_bits<S: ByteSink>(&mut self, writer: &mut BitWriter<S>, value: u32, bits: u8) {
        if !self.gather && bits > 0 {
            writer.put_bits(value, bits);
        }
    }

    /// Emit the pending EOB run and its buffered correction bits.
    fn emit_eobrun<S: ByteSink>(&mut self, writer: &mut BitWriter<S>, ci: usize) -> Result<()> {
        if self.eobrun == 0 {
            return Ok(());
        }
        let nbits = (31 - self.eobrun.leading_zeros()) as u8;
        if nbits > 14 {
            return Err(Error::InternalError("EOB run too long"));
        }
        self.emit_symbol(writer, ci, nbits << 4)?;
        if nbits > 0 {
            self.emit_bits(writer, self.eobrun & ((1 << nbits) - 1), nbits);
        }
        self.eobrun = 0;
        let bits = std::mem::take(&mut self.corr_bits);
        for b in bits {
            self.emit_bits(writer, b as u32, 1);
        }
        Ok(())
    }

    fn emit_restart<S: ByteSink>(&mut self, writer: &mut BitWriter<S>) -> Result<()> {
        if !self.scan.is_dc_scan() {
            self.emit_eobrun(writer, 0)?;
        }
        if !self.gather {
            writer.flush_bits();
            write_marker(writer.writer(), JPEG_RST0 + self.next_restart_num);
        }
        self.next_restart_num = (self.next_restart_num + 1) & 7;
        self.restarts_to_go = self.restart_interval;
        self.dc_pred = [0; MAX_COMPS_IN_SCAN];
        Ok(())
    }

    fn encode_dc_first<S: ByteSink>(
        &mut self,
        writer: &mut BitWriter<S>,
        block: &DctBlock,
        ci: usize,
    ) -> Result<()> {
        // DC is coded in the point-transformed domain, prediction included.
        let dc = (block[0] as i32) >> self.scan.al;
        let diff = dc - self.dc_pred[ci];
        self.dc_pred[ci] = dc;
        let nb = jpeg_nbits(diff);
        if nb > 11 {
            return Err(Error::InternalError("DC difference out of coding range"));
        }
        self.emit_symbol(writer, ci, nb)?;
        if nb > 0 {
            self.emit_bits(writer, magnitude_bits(diff, nb), nb);
        }
        Ok(())
    }

    fn encode_dc_refine<S: ByteSink>(&mut self, writer: &mut BitWriter<S>, block: &DctBlock) {
        self.emit_bits(writer, ((block[0] as i32) >> self.scan.al) as u32 & 1, 1);
    }

    fn encode_ac_first<S: ByteSink>(
        &mut self,
        writer: &mut BitWriter<S>,
        block: &DctBlock,
    ) -> Result<()> {
        let (ss, se, al) = (self.scan.ss as usize, self.scan.se as usize, self.scan.al);
        let mut r = 0u32;
        for k in ss..=se {
            let v = block[JPEG_NATURAL_ORDER[k]] as i32;
            let scaled = if v < 0 { -((-v) >> al) } else { v >> al };
            if scaled == 0 {
                r += 1;
                continue;
            }
            self.emit_eobrun(writer, 0)?;
            while r > 15 {
                self.emit_symbol(writer, 0, 0xF0)?;
                r -= 16;
            }
            let nb = jpeg_nbits(scaled);
            if nb > 10 {
                return Err(Error::InternalError("AC coefficient out of coding range"));
            }
            self.emit_symbol(writer, 0, ((r as u8) << 4) | nb)?;
            self.emit_bits(writer, magnitude_bits(scaled, nb), nb);
            r = 0;
        }
        if r > 0 {
            self.eobrun += 1;
            if self.eobrun == 0x7FFF {
                self.emit_eobrun(writer, 0)?;
            }
        }
        Ok(())
    }

    fn encode_ac_refine<S: ByteSink>(
        &mut self,
        writer: &mut BitWriter<S>,
        block: &DctBlock,
    ) -> Result<()> {
        let (ss, se, al) = (self.scan.ss as usize, self.scan.se as usize, self.scan.al);

        // Point-transformed magnitudes; remember the last newly-nonzero
        // position so trailing ZRLs can fold into the EOB run.
        let mut absval = [0i32; DCTSIZE2];
        let mut eob = 0usize;
        for k in ss..=se {
            let v = (block[JPEG_NATURAL_ORDER[k]] as i32).unsigned_abs() as i32 >> al;
            absval[k] = v;
            if v == 1 {
                eob = k;
            }
        }

        let mut r = 0u32;
        let mut br_bits: Vec<u8> = Vec::new();
        for k in ss..=se {
            let temp = absval[k];
            if temp == 0 {
                r += 1;
                continue;
            }
            while r > 15 && k <= eob {
                self.emit_eobrun(writer, 0)?;
                self.emit_symbol(writer, 0, 0xF0)?;
                r -= 16;
                for b in br_bits.drain(..) {
                    self.emit_bits(writer, b as u32, 1);
                }
            }
            // A previously-nonzero coefficient gets a correction bit only.
            if temp > 1 {
                br_bits.push((temp & 1) as u8);
                continue;
            }
            self.emit_eobrun(writer, 0)?;
            self.emit_symbol(writer, 0, ((r as u8) << 4) | 1)?;
            let sign = if (block[JPEG_NATURAL_ORDER[k]] as i32) < 0 {
                0
            } else {
                1
            };
            self.emit_bits(writer, sign, 1);
            for b in br_bits.drain(..) {
                self.emit_bits(writer, b as u32, 1);
            }
            r = 0;
        }
        if r > 0 || !br_bits.is_empty() {
            self.eobrun += 1;
            self.corr_bits.append(&mut br_bits);
            if self.eobrun == 0x7FFF || self.corr_bits.len() > MAX_CORR_BITS - DCTSIZE2 + 1 {
                self.emit_eobrun(writer, 0)?;
            }
        }
        Ok(())
    }
}

impl<S: ByteSink> EntropyEncodeStage<S> for ProgressiveEncoder {
    fn encode_mcu(&mut self, writer: &mut BitWriter<S>, blocks: &[&DctBlock]) -> Result<bool> {
        debug_assert_eq!(blocks.len(), self.layout.blocks_in_mcu());
        if !self.gather && !writer.drain()? {
            return Ok(false);
        }
        if self.restart_interval != 0 && self.restarts_to_go == 0 {
            self.emit_restart(writer)?;
        }
        match (self.scan.is_dc_scan(), self.scan.is_refinement()) {
            (true, false) => {
                for (b, block) in blocks.iter().enumerate() {
                    let ci = self.layout.comp_of_block(b);
                    self.encode_dc_first(writer, block, ci)?;
                }
            }
            (true, true) => {
                for block in blocks {
                    self.encode_dc_refine(writer, block);
                }
            }
            (false, false) => self.encode_ac_first(writer, blocks[0])?,
            (false, true) => self.encode_ac_refine(writer, blocks[0])?,
        }
        if self.restart_interval != 0 {
            self.restarts_to_go -= 1;
        }
        Ok(true)
    }

    fn finish_scan(&mut self, writer: &mut BitWriter<S>) -> Result<bool> {
        if !self.scan.is_dc_scan() {
            self.emit_eobrun(writer, 0)?;
        }
        if !self.gather {
            writer.flush_bits();
            if !writer.drain()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// =============================================================================
// Decoder
// =============================================================================

#[derive(Debug)]
struct ProgDecComp {
    table: Option<DecodeTable>,
}

/// Progressive Huffman decoder for one scan of any of the four kinds.
#[derive(Debug)]
pub struct ProgressiveDecoder {
    scan: ScanInfo,
    layout: McuLayout,
    comps: Vec<ProgDecComp>,
    state: DecoderState,
    restart_interval: u32,
}

impl ProgressiveDecoder {
    /// Set up the decoder for one progressive scan.
    pub fn new(
        components: &[ComponentInfo],
        scan: &ScanInfo,
        dc_tables: &[Option<HuffTable>],
        ac_tables: &[Option<HuffTable>],
        restart_interval: u32,
    ) -> Result<Self> {
        let layout = McuLayout::for_scan(components, scan)?;
        let needs_table = !(scan.is_dc_scan() && scan.is_refinement());
        let mut comps = Vec::new();
        for ci in 0..scan.comps_in_scan as usize {
            let comp = &components[scan.component_index[ci] as usize];
            let table = if !needs_table {
                None
            } else {
                let (slot, pool) = if scan.is_dc_scan() {
                    (comp.dc_tbl_no as usize, dc_tables)
                } else {
                    (comp.ac_tbl_no as usize, ac_tables)
                };
                let t = pool
                    .get(slot)
                    .and_then(|t| t.as_ref())
                    .ok_or(Error::MissingHuffmanTable(slot))?;
                Some(DecodeTable::derive(t)?)
            };
            comps.push(ProgDecComp { table });
        }
        Ok(Self {
            scan: *scan,
            layout,
            comps,
            state: DecoderState {
                restarts_to_go: restart_interval,
                ..Default::default()
            },
            restart_interval,
        })
    }

    fn decode_dc_first(
        &mut self,
        src: &mut ByteSource,
        block: &mut DctBlock,
        ci: usize,
    ) -> Option<()> {
        let table = self.comps[ci].table.as_ref().expect("DC table derived");
        let sym = table.decode_symbol(&mut self.state.reader, src)?;
        let s = sym & 15;
        let diff = if s > 0 {
            huff_extend(self.state.reader.get_bits(src, s as u32)?, s)
        } else {
            0
        };
        self.state.dc_pred[ci] += diff;
        block[0] = (self.state.dc_pred[ci] << self.scan.al)
            .clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        Some(())
    }

    fn decode_dc_refine(&mut self, src: &mut ByteSource, block: &mut DctBlock) -> Option<()> {
        if self.state.reader.get_bit(src)? != 0 {
            block[0] |= 1 << self.scan.al;
        }
        Some(())
    }

    fn decode_ac_first(&mut self, src: &mut ByteSource, block: &mut DctBlock) -> Option<()> {
        if self.state.eobrun > 0 {
            self.state.eobrun -= 1;
            return Some(());
        }
        let table = self.comps[0].table.as_ref().expect("AC table derived");
        let (se, al) = (self.scan.se as usize, self.scan.al);
        let mut k = self.scan.ss as usize;
        while k <= se {
            let rs = table.decode_symbol(&mut self.state.reader, src)?;
            let s = rs & 15;
            let r = (rs >> 4) as usize;
            if s != 0 {
                k += r;
                if k > se {
                    log::warn!("AC run overflows the band");
                    break;
                }
                let coef = huff_extend(self.state.reader.get_bits(src, s as u32)?, s);
                block[JPEG_NATURAL_ORDER[k]] =
                    (coef << al).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                k += 1;
            } else {
                if r != 15 {
                    self.state.eobrun = 1 << r;
                    if r > 0 {
                        self.state.eobrun += self.state.reader.get_bits(src, r as u32)?;
                    }
                    self.state.eobrun -= 1; // this block counts as one
                    break;
                }
                k += 16; // ZRL
            }
        }
        Some(())
    }

    fn decode_ac_refine(&mut self, src: &mut ByteSource, block: &mut DctBlock) -> Option<()> {
        let (se, al) = (self.scan.se as usize, self.scan.al);
        let p1 = 1i16 << al;
        let m1 = -1i16 << al;
        let mut k = self.scan.ss as usize;

        if self.state.eobrun == 0 {
            while k <= se {
                let table = self.comps[0].table.as_ref().expect("AC table derived");
                let rs = table.decode_symbol(&mut self.state.reader, src)?;
                let s = rs & 15;
                let mut r = (rs >> 4) as usize;
                let mut new_val = 0i16;
                if s != 0 {
                    if s != 1 {
                        log::warn!("invalid refinement symbol");
                    }
                    new_val = if self.state.reader.get_bit(src)? != 0 {
                        p1
                    } else {
                        m1
                    };
                } else if r != 15 {
                    self.state.eobrun = 1 << r;
                    if r > 0 {
                        self.state.eobrun += self.state.reader.get_bits(src, r as u32)?;
                    }
                    break; // the EOB-run tail below corrects this block
                }
                // Advance over r still-zero positions, sending correction
                // bits to every nonzero coefficient passed on the way.
                while k <= se {
                    let coef = &mut block[JPEG_NATURAL_ORDER[k]];
                    if *coef != 0 {
                        if self.state.reader.get_bit(src)? != 0 && (*coef & p1) == 0 {
                            *coef += if *coef >= 0 { p1 } else { m1 };
                        }
                    } else {
                        if r == 0 {
                            break;
                        }
                        r -= 1;
                    }
                    k += 1;
                }
                if new_val != 0 && k <= se {
                    block[JPEG_NATURAL_ORDER[k]] = new_val;
                }
                k += 1;
            }
        }

        if self.state.eobrun > 0 {
            // Within an EOB run, nonzero coefficients still receive
            // correction bits.
            while k <= se {
                let coef = &mut block[JPEG_NATURAL_ORDER[k]];
                if *coef != 0 {
                    if self.state.reader.get_bit(src)? != 0 && (*coef & p1) == 0 {
                        *coef += if *coef >= 0 { p1 } else { m1 };
                    }
                }
                k += 1;
            }
            self.state.eobrun -= 1;
        }
        Some(())
    }
}

impl EntropyDecodeStage for ProgressiveDecoder {
    fn decode_mcu(&mut self, src: &mut ByteSource, blocks: &mut [&mut DctBlock]) -> Result<bool> {
        debug_assert_eq!(blocks.len(), self.layout.blocks_in_mcu());
        let saved_state = self.state.clone();
        let mark = src.mark();
        // Refinement mutates coefficients in place; keep copies so a
        // suspended MCU can be undone.
        let saved_blocks: Vec<DctBlock> = blocks.iter().map(|b| **b).collect();

        let ok = (|| {
            if self.restart_interval != 0 && self.state.restarts_to_go == 0 {
                read_restart_marker(&mut self.state, src)?;
                self.state.restarts_to_go = self.restart_interval;
            }
            match (self.scan.is_dc_scan(), self.scan.is_refinement()) {
                (true, false) => {
                    for b in 0..blocks.len() {
                        let ci = self.layout.comp_of_block(b);
                        self.decode_dc_first(src, blocks[b], ci)?;
                    }
                }
                (true, true) => {
                    for block in blocks.iter_mut() {
                        self.decode_dc_refine(src, block)?;
                    }
                }
                (false, false) => self.decode_ac_first(src, blocks[0])?,
                (false, true) => self.decode_ac_refine(src, blocks[0])?,
            }
            Some(())
        })();

        match ok {
            Some(()) => {
                if self.restart_interval != 0 {
                    self.state.restarts_to_go -= 1;
                }
                Ok(true)
            }
            None => {
                self.state = saved_state;
                for (block, saved) in blocks.iter_mut().zip(saved_blocks) {
                    **block = saved;
                }
                src.rewind(mark)?;
                Ok(false)
            }
        }
    }

    fn take_pending_marker(&mut self) -> Option<u8> {
        self.state.reader.take_pending_marker()
    }

    fn ran_out(&self) -> bool {
        self.state.reader.ran_out()
    }
}
