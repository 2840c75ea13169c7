//! Sequential (baseline) Huffman entropy coding.
//!
//! Both directions operate one MCU at a time and are idempotent under
//! suspension: the encoder refuses to consume an MCU while previously
//! staged bytes are still waiting for sink capacity, and the decoder
//! snapshots its bit-reader state and source position before each MCU and
//! restores both if input runs out partway through.
//!
//! The encoder doubles as the statistics-gathering pass for Huffman
//! optimization: in gather mode it routes every symbol into frequency
//! counters instead of the bitstream.

use crate::bitstream::{huff_extend, jpeg_nbits, BitReader, BitWriter};
use crate::consts::{
    DCTSIZE2, JPEG_NATURAL_ORDER, JPEG_RST0, MAX_BLOCKS_IN_MCU, MAX_COMPS_IN_SCAN, NUM_HUFF_TBLS,
};
use crate::error::{Error, Result};
use crate::huffman::{DecodeTable, EncodeTable, FrequencyCounter, HuffTable};
use crate::io::{ByteSink, ByteSource};
use crate::marker::write_marker;
use crate::types::{ComponentInfo, DctBlock, ScanInfo};

// =============================================================================
// MCU layout
// =============================================================================

/// Mapping from block position within an MCU to the scan-component index
/// that owns it. For interleaved scans this follows the component order of
/// the scan header; a single-component scan has one block per MCU.
#[derive(Debug, Clone)]
pub struct McuLayout {
    block_comp: Vec<u8>,
}

impl McuLayout {
    /// Build the layout for a scan over the given frame components.
    pub fn for_scan(components: &[ComponentInfo], scan: &ScanInfo) -> Result<Self> {
        let mut block_comp = Vec::new();
        if scan.comps_in_scan == 1 {
            block_comp.push(0);
        } else {
            for ci in 0..scan.comps_in_scan as usize {
                let comp = &components[scan.component_index[ci] as usize];
                for _ in 0..comp.mcu_blocks() {
                    block_comp.push(ci as u8);
                }
            }
        }
        if block_comp.len() > MAX_BLOCKS_IN_MCU {
            return Err(Error::InvalidScanScript {
                reason: "MCU exceeds the 10-block limit",
            });
        }
        Ok(Self { block_comp })
    }

    /// Number of blocks in one MCU of this scan.
    pub fn blocks_in_mcu(&self) -> usize {
        self.block_comp.len()
    }

    /// Scan-component index owning block `b` of the MCU.
    pub fn comp_of_block(&self, b: usize) -> usize {
        self.block_comp[b] as usize
    }
}

// =============================================================================
// Stage traits
// =============================================================================

/// Entropy encoder for one scan.
pub trait EntropyEncodeStage<S: ByteSink> {
    /// Encode one MCU. Returns false (consuming nothing) if staged output
    /// is still waiting for sink capacity.
    fn encode_mcu(&mut self, writer: &mut BitWriter<S>, blocks: &[&DctBlock]) -> Result<bool>;

    /// End the scan: emit any held state and flush to a byte boundary.
    /// Returns false if the sink is full; call again later.
    fn finish_scan(&mut self, writer: &mut BitWriter<S>) -> Result<bool>;
}

/// Entropy decoder for one scan.
pub trait EntropyDecodeStage {
    /// Decode one MCU into `blocks`. Returns false (consuming nothing) if
    /// more input is needed.
    fn decode_mcu(&mut self, src: &mut ByteSource, blocks: &mut [&mut DctBlock]) -> Result<bool>;

    /// Take the scan-terminating marker encountered by the bit reader.
    fn take_pending_marker(&mut self) -> Option<u8>;

    /// True if zero bits were substituted for missing entropy data.
    fn ran_out(&self) -> bool;
}

// =============================================================================
// Encoder
// =============================================================================

#[derive(Debug)]
struct EncComp {
    dc_slot: usize,
    ac_slot: usize,
    dc: Option<EncodeTable>,
    ac: Option<EncodeTable>,
}

/// Sequential Huffman encoder (also the statistics-gathering pass).
#[derive(Debug)]
pub struct HuffEncoder {
    layout: McuLayout,
    comps: Vec<EncComp>,
    gather: bool,
    dc_counts: [Option<Box<FrequencyCounter>>; NUM_HUFF_TBLS],
    ac_counts: [Option<Box<FrequencyCounter>>; NUM_HUFF_TBLS],
    dc_pred: [i32; MAX_COMPS_IN_SCAN],
    restart_interval: u32,
    restarts_to_go: u32,
    next_restart_num: u8,
}

impl HuffEncoder {
    /// Set up the encoder for one sequential scan. In gather mode the
    /// Huffman tables may be absent; otherwise a missing table is fatal.
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
        let mut dc_counts: [Option<Box<FrequencyCounter>>; NUM_HUFF_TBLS] = Default::default();
        let mut ac_counts: [Option<Box<FrequencyCounter>>; NUM_HUFF_TBLS] = Default::default();

        for ci in 0..scan.comps_in_scan as usize {
            let comp = &components[scan.component_index[ci] as usize];
            let dc_slot = comp.dc_tbl_no as usize;
            let ac_slot = comp.ac_tbl_no as usize;
            let (dc, ac) = if gather {
                if dc_counts[dc_slot].is_none() {
                    dc_counts[dc_slot] = Some(Box::new(FrequencyCounter::new()));
                }
                if ac_counts[ac_slot].is_none() {
                    ac_counts[ac_slot] = Some(Box::new(FrequencyCounter::new()));
                }
                (None, None)
            } else {
                let dc = dc_tables
                    .get(dc_slot)
                    .and_then(|t| t.as_ref())
                    .ok_or(Error::MissingHuffmanTable(dc_slot))?;
                let ac = ac_tables
                    .get(ac_slot)
                    .and_then(|t| t.as_ref())
                    .ok_or(Error::MissingHuffmanTable(ac_slot))?;
                (Some(EncodeTable::derive(dc)?), Some(EncodeTable::derive(ac)?))
            };
            comps.push(EncComp {
                dc_slot,
                ac_slot,
                dc,
                ac,
            });
        }

        Ok(Self {
            layout,
            comps,
            gather,
            dc_counts,
            ac_counts,
            dc_pred: [0; MAX_COMPS_IN_SCAN],
            restart_interval,
            restarts_to_go: restart_interval,
            next_restart_num: 0,
        })
    }

    /// Gathered DC statistics for a table slot (gather mode only).
    pub fn dc_counter(&self, slot: usize) -> Option<&FrequencyCounter> {
        self.dc_counts[slot].as_deref()
    }

    /// Gathered AC statistics for a table slot (gather mode only).
    pub fn ac_counter(&self, slot: usize) -> Option<&FrequencyCounter> {
        self.ac_counts[slot].as_deref()
    }

    fn emit_restart<S: ByteSink>(&mut self, writer: &mut BitWriter<S>) {
        if !self.gather {
            writer.flush_bits();
            write_marker(writer.writer(), JPEG_RST0 + self.next_restart_num);
        }
        self.next_restart_num = (self.next_restart_num + 1) & 7;
        self.restarts_to_go = self.restart_interval;
        self.dc_pred = [0; MAX_COMPS_IN_SCAN];
    }

    fn emit_dc<S: ByteSink>(
        &mut self,
        writer: &mut BitWriter<S>,
        ci: usize,
        symbol: u8,
        value: i32,
    ) -> Result<()> {
        if self.gather {
            self.dc_counts[self.comps[ci].dc_slot]
                .as_mut()
                .expect("gather counters allocated")
                .record(symbol);
            return Ok(());
        }
        let table = self.comps[ci].dc.as_ref().expect("emit tables derived");
        let size = table.size[symbol as usize];
        if size == 0 {
            return Err(Error::InternalError("DC symbol has no Huffman code"));
        }
        writer.put_bits(table.code[symbol as usize], size);
        if symbol > 0 {
            writer.put_bits(magnitude_bits(value, symbol), symbol);
        }
        Ok(())
    }

    fn emit_ac<S: ByteSink>(
        &mut self,
        writer: &mut BitWriter<S>,
        ci: usize,
        symbol: u8,
        value: i32,
        value_bits: u8,
    ) -> Result<()> {
        if self.gather {
            self.ac_counts[self.comps[ci].ac_slot]
                .as_mut()
                .expect("gather counters allocated")
                .record(symbol);
            return Ok(());
        }
        let table = self.comps[ci].ac.as_ref().expect("emit tables derived");
        let size = table.size[symbol as usize];
        if size == 0 {
            return Err(Error::InternalError("AC symbol has no Huffman code"));
        }
        writer.put_bits(table.code[symbol as usize], size);
        if value_bits > 0 {
            writer.put_bits(magnitude_bits(value, value_bits), value_bits);
        }
        Ok(())
    }

    fn encode_one_block<S: ByteSink>(
        &mut self,
        writer: &mut BitWriter<S>,
        block: &DctBlock,
        ci: usize,
    ) -> Result<()> {
        let dc = block[0] as i32;
        let diff = dc - self.dc_pred[ci];
        self.dc_pred[ci] = dc;
        let nb = jpeg_nbits(diff);
        if nb > 11 {
            return Err(Error::InternalError("DC difference out of coding range"));
        }
        self.emit_dc(writer, ci, nb, diff)?;

        let mut run = 0u32;
        for k in 1..DCTSIZE2 {
            let v = block[JPEG_NATURAL_ORDER[k]] as i32;
            if v == 0 {
                run += 1;
                continue;
            }
            while run > 15 {
                self.emit_ac(writer, ci, 0xF0, 0, 0)?;
                run -= 16;
            }
            let s = jpeg_nbits(v);
            if s > 10 {
                return Err(Error::InternalError("AC coefficient out of coding range"));
            }
            self.emit_ac(writer, ci, ((run as u8) << 4) | s, v, s)?;
            run = 0;
        }
        if run > 0 {
            self.emit_ac(writer, ci, 0x00, 0, 0)?; // EOB
        }
        Ok(())
    }
}

impl<S: ByteSink> EntropyEncodeStage<S> for HuffEncoder {
    fn encode_mcu(&mut self, writer: &mut BitWriter<S>, blocks: &[&DctBlock]) -> Result<bool> {
        debug_assert_eq!(blocks.len(), self.layout.blocks_in_mcu());
        if !self.gather && !writer.drain()? {
            return Ok(false);
        }
        if self.restart_interval != 0 && self.restarts_to_go == 0 {
            self.emit_restart(writer);
        }
        for (b, block) in blocks.iter().enumerate() {
            let ci = self.layout.comp_of_block(b);
            self.encode_one_block(writer, block, ci)?;
        }
        if self.restart_interval != 0 {
            self.restarts_to_go -= 1;
        }
        Ok(true)
    }

    fn finish_scan(&mut self, writer: &mut BitWriter<S>) -> Result<bool> {
        if !self.gather {
            writer.flush_bits();
            if !writer.drain()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Low-order `bits` bits of the JPEG magnitude encoding of `value`.
#[inline]
pub(crate) fn magnitude_bits(value: i32, bits: u8) -> u32 {
    let mask = (1u32 << bits) - 1;
    if value < 0 {
        (value + (1 << bits) - 1) as u32 & mask
    } else {
        value as u32 & mask
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Resumable decoder state, snapshotted before each MCU.
#[derive(Debug, Clone, Default)]
pub(crate) struct DecoderState {
    pub reader: BitReader,
    pub dc_pred: [i32; MAX_COMPS_IN_SCAN],
    pub eobrun: u32,
    pub restarts_to_go: u32,
    pub next_restart_num: u8,
}

/// Consume the restart marker expected at the current position, resetting
/// `state` for the next interval. Returns `None` on suspension. A
/// scan-terminating marker found instead is parked back on the reader and
/// the remaining MCUs decode from substituted zero bits.
pub(crate) fn read_restart_marker(
    state: &mut DecoderState,
    src: &mut ByteSource,
) -> Option<()> {
    let marker = match state.reader.take_pending_marker() {
        Some(m) => Some(m),
        None => {
            // Anything still buffered is padding; drop it and look for the
            // marker directly in the source.
            state.reader.align();
            loop {
                let Some(b) = src.next_byte() else {
                    if src.is_finished() {
                        break None; // truncated: resync without a marker
                    }
                    return None;
                };
                if b != 0xFF {
                    continue; // stray byte, skip
                }
                match src.next_byte() {
                    None if src.is_finished() => break None,
                    None => return None,
                    Some(0x00) | Some(0xFF) => continue,
                    Some(m) => break Some(m),
                }
            }
        }
    };

    match marker {
        Some(m) if (JPEG_RST0..JPEG_RST0 + 8).contains(&m) => {
            let num = m - JPEG_RST0;
            if num != state.next_restart_num {
                log::warn!(
                    "restart marker RST{num} where RST{} was expected",
                    state.next_restart_num
                );
            }
            state.reader.reset();
            state.next_restart_num = (num + 1) & 7;
        }
        Some(m) => {
            // Scan ended early; leave the marker for the marker layer.
            log::warn!("marker 0x{m:02X} where a restart marker was expected");
            state.reader.reset();
            state.reader.set_pending_marker(m);
            state.next_restart_num = (state.next_restart_num + 1) & 7;
        }
        None => {
            log::warn!("input ended where a restart marker was expected");
            state.reader.reset();
            state.next_restart_num = (state.next_restart_num + 1) & 7;
        }
    }
    state.dc_pred = [0; MAX_COMPS_IN_SCAN];
    state.eobrun = 0;
    Some(())
}

#[derive(Debug)]
struct DecComp {
    dc: DecodeTable,
    ac: DecodeTable,
}

/// Sequential Huffman decoder.
#[derive(Debug)]
pub struct HuffDecoder {
    layout: McuLayout,
    comps: Vec<DecComp>,
    state: DecoderState,
    restart_interval: u32,
}

impl HuffDecoder {
    /// Set up the decoder for one sequential scan.
    pub fn new(
        components: &[ComponentInfo],
        scan: &ScanInfo,
        dc_tables: &[Option<HuffTable>],
        ac_tables: &[Option<HuffTable>],
        restart_interval: u32,
    ) -> Result<Self> {
        let layout = McuLayout::for_scan(components, scan)?;
        let mut comps = Vec::new();
        for ci in 0..scan.comps_in_scan as usize {
            let comp = &components[scan.component_index[ci] as usize];
            let dc = dc_tables
                .get(comp.dc_tbl_no as usize)
                .and_then(|t| t.as_ref())
                .ok_or(Error::MissingHuffmanTable(comp.dc_tbl_no as usize))?;
            let ac = ac_tables
                .get(comp.ac_tbl_no as usize)
                .and_then(|t| t.as_ref())
                .ok_or(Error::MissingHuffmanTable(comp.ac_tbl_no as usize))?;
            comps.push(DecComp {
                dc: DecodeTable::derive(dc)?,
                ac: DecodeTable::derive(ac)?,
            });
        }
        Ok(Self {
            layout,
            comps,
            state: DecoderState {
                restarts_to_go: restart_interval,
                ..Default::default()
            },
            restart_interval,
        })
    }

    fn decode_one_block(
        comps: &[DecComp],
        state: &mut DecoderState,
        src: &mut ByteSource,
        block: &mut DctBlock,
        ci: usize,
    ) -> Option<()> {
        block.fill(0);

        let sym = comps[ci].dc.decode_symbol(&mut state.reader, src)?;
        let s = sym & 15;
        let diff = if s > 0 {
            huff_extend(state.reader.get_bits(src, s as u32)?, s)
        } else {
            0
        };
        state.dc_pred[ci] += diff;
        block[0] = state.dc_pred[ci].clamp(i16::MIN as i32, i16::MAX as i32) as i16;

        let mut k = 1usize;
        while k < DCTSIZE2 {
            let rs = comps[ci].ac.decode_symbol(&mut state.reader, src)?;
            let r = (rs >> 4) as usize;
            let s = rs & 15;
            if s == 0 {
                if r != 15 {
                    break; // EOB
                }
                k += 16; // ZRL
                continue;
            }
            k += r;
            if k >= DCTSIZE2 {
                // Corrupt run length; drop the rest of the block.
                log::warn!("AC run overflows the block");
                break;
            }
            let coef = huff_extend(state.reader.get_bits(src, s as u32)?, s);
            block[JPEG_NATURAL_ORDER[k]] = coef as i16;
            k += 1;
        }
        Some(())
    }
}

impl EntropyDecodeStage for HuffDecoder {
    fn decode_mcu(&mut self, src: &mut ByteSource, blocks: &mut [&mut DctBlock]) -> Result<bool> {
        debug_assert_eq!(blocks.len(), self.layout.blocks_in_mcu());
        let saved_state = self.state.clone();
        let mark = src.mark();

        let ok = (|| {
            if self.restart_interval != 0 && self.state.restarts_to_go == 0 {
                read_restart_marker(&mut self.state, src)?;
                self.state.restarts_to_go = self.restart_interval;
            }
            for (b, block) in blocks.iter_mut().enumerate() {
                let ci = self.layout.comp_of_block(b);
                Self::decode_one_block(&self.comps, &mut self.state, src, block, ci)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ThrottledSink;

    fn gray_component() -> Vec<ComponentInfo> {
        vec![ComponentInfo {
            component_id: 1,
            h_samp_factor: 1,
            v_samp_factor: 1,
            mcu_width: 1,
            mcu_height: 1,
            ..Default::default()
        }]
    }

    fn std_tables() -> (Vec<Option<HuffTable>>, Vec<Option<HuffTable>>) {
        (
            vec![Some(HuffTable::std_dc_luma())],
            vec![Some(HuffTable::std_ac_luma())],
        )
    }

    fn test_blocks() -> Vec<DctBlock> {
        let mut blocks = Vec::new();
        let mut block = [0i16; DCTSIZE2];
        block[0] = 100;
        block[1] = -3;
        block[8] = 7;
        block[63] = 1;
        blocks.push(block);
        let mut block = [0i16; DCTSIZE2];
        block[0] = 90; // DC difference of -10 from the previous block
        blocks.push(block);
        blocks.push([0i16; DCTSIZE2]);
        blocks
    }

    fn encode_all(blocks: &[DctBlock], restart_interval: u32) -> Vec<u8> {
        let comps = gray_component();
        let scan = ScanInfo::sequential(1);
        let (dc, ac) = std_tables();
        let mut enc = HuffEncoder::new(&comps, &scan, &dc, &ac, restart_interval, false).unwrap();
        let mut writer = BitWriter::new(Vec::new());
        for block in blocks {
            assert!(enc.encode_mcu(&mut writer, &[block]).unwrap());
        }
        assert!(enc.finish_scan(&mut writer).unwrap());
        writer.into_sink().unwrap()
    }

    fn decode_all(bytes: &[u8], count: usize, restart_interval: u32) -> Vec<DctBlock> {
        let comps = gray_component();
        let scan = ScanInfo::sequential(1);
        let (dc, ac) = std_tables();
        let mut dec = HuffDecoder::new(&comps, &scan, &dc, &ac, restart_interval).unwrap();
        let mut src = ByteSource::from_bytes(bytes);
        let mut out = Vec::new();
        for _ in 0..count {
            let mut block = [0i16; DCTSIZE2];
            assert!(dec.decode_mcu(&mut src, &mut [&mut block]).unwrap());
            out.push(block);
        }
        out
    }

    #[test]
    fn test_sequential_round_trip() {
        let blocks = test_blocks();
        let bytes = encode_all(&blocks, 0);
        let decoded = decode_all(&bytes, blocks.len(), 0);
        assert_eq!(decoded, blocks);
    }

    #[test]
    fn test_round_trip_with_restarts() {
        let blocks = test_blocks();
        let bytes = encode_all(&blocks, 1);
        // Restart markers appear between MCUs.
        assert!(bytes
            .windows(2)
            .any(|w| w[0] == 0xFF && w[1] == JPEG_RST0));
        let decoded = decode_all(&bytes, blocks.len(), 1);
        assert_eq!(decoded, blocks);
    }

    /// Encoding through a throttled sink one grant at a time produces the
    /// same bytes as an unconstrained run.
    #[test]
    fn test_encoder_suspension_equivalence() {
        let blocks = test_blocks();
        let reference = encode_all(&blocks, 0);

        let comps = gray_component();
        let scan = ScanInfo::sequential(1);
        let (dc, ac) = std_tables();
        let mut enc = HuffEncoder::new(&comps, &scan, &dc, &ac, 0, false).unwrap();
        let mut writer = BitWriter::new(ThrottledSink::new());
        for block in &blocks {
            loop {
                if enc.encode_mcu(&mut writer, &[block]).unwrap() {
                    break;
                }
                writer.sink_mut().grant(1);
            }
        }
        while !enc.finish_scan(&mut writer).unwrap() {
            writer.sink_mut().grant(1);
        }
        assert_eq!(writer.into_sink().unwrap().into_bytes(), reference);
    }

    /// Decoding with input fed a byte at a time matches a one-shot decode.
    #[test]
    fn test_decoder_suspension_equivalence() {
        let blocks = test_blocks();
        let bytes = encode_all(&blocks, 1);
        let reference = decode_all(&bytes, blocks.len(), 1);

        let comps = gray_component();
        let scan = ScanInfo::sequential(1);
        let (dc, ac) = std_tables();
        let mut dec = HuffDecoder::new(&comps, &scan, &dc, &ac, 1).unwrap();
        let mut src = ByteSource::new();
        let mut feed = bytes.iter();
        let mut out = Vec::new();
        while out.len() < blocks.len() {
            let mut block = [0i16; DCTSIZE2];
            if dec.decode_mcu(&mut src, &mut [&mut block]).unwrap() {
                out.push(block);
            } else {
                match feed.next() {
                    Some(&b) => src.feed(&[b]),
                    None => src.finish(),
                }
            }
        }
        assert_eq!(out, reference);
    }

    /// A truncated scan decodes to completion with substituted data instead
    /// of failing.
    #[test]
    fn test_truncated_input_degrades() {
        let blocks = test_blocks();
        let bytes = encode_all(&blocks, 0);
        let truncated = &bytes[..2];

        let comps = gray_component();
        let scan = ScanInfo::sequential(1);
        let (dc, ac) = std_tables();
        let mut dec = HuffDecoder::new(&comps, &scan, &dc, &ac, 0).unwrap();
        let mut src = ByteSource::from_bytes(truncated);
        for _ in 0..blocks.len() {
            let mut block = [0i16; DCTSIZE2];
            assert!(dec.decode_mcu(&mut src, &mut [&mut block]).unwrap());
        }
        assert!(dec.ran_out());
    }

    /// Gather mode counts symbols and the resulting optimal tables encode
    /// the same data.
    #[test]
    fn test_gather_statistics_builds_usable_tables() {
        let blocks = test_blocks();
        let comps = gray_component();
        let scan = ScanInfo::sequential(1);
        let (dc, ac) = std_tables();

        let mut gatherer = HuffEncoder::new(&comps, &scan, &dc, &ac, 0, true).unwrap();
        let mut writer = BitWriter::new(Vec::new());
        for block in &blocks {
            assert!(gatherer.encode_mcu(&mut writer, &[block]).unwrap());
        }
        assert!(gatherer.finish_scan(&mut writer).unwrap());
        // Gather mode writes nothing.
        assert!(writer.into_sink().unwrap().is_empty());

        let opt_dc = gatherer.dc_counter(0).unwrap().build_table();
        let opt_ac = gatherer.ac_counter(0).unwrap().build_table();
        let dc_opt = vec![Some(opt_dc)];
        let ac_opt = vec![Some(opt_ac)];

        let mut enc = HuffEncoder::new(&comps, &scan, &dc_opt, &ac_opt, 0, false).unwrap();
        let mut writer = BitWriter::new(Vec::new());
        for block in &blocks {
            assert!(enc.encode_mcu(&mut writer, &[block]).unwrap());
        }
        assert!(enc.finish_scan(&mut writer).unwrap());
        let bytes = writer.into_sink().unwrap();

        let mut dec = HuffDecoder::new(&comps, &scan, &dc_opt, &ac_opt, 0).unwrap();
        let mut src = ByteSource::from_bytes(&bytes);
        for expected in &blocks {
            let mut block = [0i16; DCTSIZE2];
            assert!(dec.decode_mcu(&mut src, &mut [&mut block]).unwrap());
            assert_eq!(&block, expected);
        }
    }

    #[test]
    fn test_missing_table_rejected() {
        let comps = gray_component();
        let scan = ScanInfo::sequential(1);
        let dc: Vec<Option<HuffTable>> = vec![None];
        let ac: Vec<Option<HuffTable>> = vec![None];
        assert!(matches!(
            HuffEncoder::new(&comps, &scan, &dc, &ac, 0, false),
            Err(Error::MissingHuffmanTable(0))
        ));
        assert!(HuffDecoder::new(&comps, &scan, &dc, &ac, 0).is_err());
        // Gather mode needs no tables.
        assert!(HuffEncoder::new(&comps, &scan, &dc, &ac, 0, true).is_ok());
    }
}
