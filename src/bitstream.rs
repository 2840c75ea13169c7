//! Bit-level I/O for entropy coding.
//!
//! The writer accumulates bits in a 64-bit buffer and emits complete bytes
//! with JPEG 0xFF stuffing (0xFF -> 0xFF 0x00) into a staging
//! [`SinkWriter`]; draining the staging buffer is the only point that can
//! suspend. The reader performs the inverse: it unstuffs 0xFF 0x00 pairs,
//! stops at real markers (leaving them pending for the marker layer), and
//! substitutes zero bits once the entropy-coded segment ends, so truncated
//! input degrades instead of failing.

use crate::io::{ByteSink, ByteSource, SinkWriter};

/// Size of the bit accumulation buffer in bits.
const BIT_BUF_SIZE: i32 = 64;

// =============================================================================
// Writer
// =============================================================================

/// Bitstream writer with automatic 0xFF stuffing.
#[derive(Debug)]
pub struct BitWriter<S: ByteSink> {
    out: SinkWriter<S>,
    put_buffer: u64,
    free_bits: i32,
}

impl<S: ByteSink> BitWriter<S> {
    /// Wrap a sink in a bit writer.
    pub fn new(sink: S) -> Self {
        Self {
            out: SinkWriter::new(sink),
            put_buffer: 0,
            free_bits: BIT_BUF_SIZE,
        }
    }

    /// Write `size` bits (right-aligned in `code`) to the stream.
    #[inline]
    pub fn put_bits(&mut self, code: u32, size: u8) {
        debug_assert!(size >= 1 && size <= 26, "size must be 1-26 bits");
        debug_assert!((code as u64) < (1u64 << size), "code exceeds size bits");

        let size = size as i32;
        self.free_bits -= size;

        if self.free_bits < 0 {
            let overflow_bits = (-self.free_bits) as u32;
            self.put_buffer =
                (self.put_buffer << (size + self.free_bits)) | ((code as u64) >> overflow_bits);
            self.emit_full_buffer();
            self.free_bits += BIT_BUF_SIZE;
            self.put_buffer = (code as u64) & ((1u64 << overflow_bits) - 1);
        } else {
            self.put_buffer = (self.put_buffer << size) | (code as u64);
        }
    }

    /// Emit the full 64-bit buffer into staging with stuffing.
    fn emit_full_buffer(&mut self) {
        let buffer = self.put_buffer;
        // SWAR check: does any byte equal 0xFF?
        if buffer & 0x8080_8080_8080_8080 & !(buffer.wrapping_add(0x0101_0101_0101_0101)) != 0 {
            for i in (0..8).rev() {
                let byte = (buffer >> (i * 8)) as u8;
                self.out.push_byte(byte);
                if byte == 0xFF {
                    self.out.push_byte(0x00);
                }
            }
        } else {
            self.out.push_bytes(&buffer.to_be_bytes());
        }
    }

    /// Flush remaining bits, padding with 1-bits to the byte boundary (the
    /// JPEG padding rule; 1-bits cannot create a false marker prefix that
    /// 0x00 stuffing would not neutralize).
    pub fn flush_bits(&mut self) {
        let bits_in_buffer = BIT_BUF_SIZE - self.free_bits;
        if bits_in_buffer > 0 {
            let padding_bits = (8 - (bits_in_buffer % 8)) % 8;
            let total_bits = bits_in_buffer + padding_bits;
            let bytes_to_write = total_bits / 8;

            let mut buffer = self.put_buffer << (BIT_BUF_SIZE - bits_in_buffer);
            if padding_bits > 0 {
                let padding = ((1u64 << padding_bits) - 1) << (BIT_BUF_SIZE - total_bits);
                buffer |= padding;
            }
            for i in 0..bytes_to_write {
                let byte = (buffer >> (56 - i * 8)) as u8;
                self.out.push_byte(byte);
                if byte == 0xFF {
                    self.out.push_byte(0x00);
                }
            }
            self.put_buffer = 0;
            self.free_bits = BIT_BUF_SIZE;
        }
    }

    /// True if no partial bits are buffered (safe to write marker bytes).
    pub fn is_aligned(&self) -> bool {
        self.free_bits == BIT_BUF_SIZE
    }

    /// Access the staging writer for marker emission. The bit buffer must
    /// be byte-aligned.
    pub fn writer(&mut self) -> &mut SinkWriter<S> {
        debug_assert!(self.is_aligned(), "bit buffer not flushed");
        &mut self.out
    }

    /// Drain staged bytes into the sink; false means the sink is full.
    pub fn drain(&mut self) -> crate::Result<bool> {
        self.out.drain()
    }

    /// Access the underlying sink (legal at any bit position).
    pub fn sink_mut(&mut self) -> &mut S {
        self.out.sink_mut()
    }

    /// Bytes currently staged awaiting sink capacity.
    pub fn pending_len(&self) -> usize {
        self.out.pending_len()
    }

    /// Consume the writer, returning the sink (staging must be empty).
    pub fn into_sink(self) -> crate::Result<S> {
        self.out.into_sink()
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Outcome of trying to load one more entropy-coded byte.
enum LoadByte {
    /// A data byte (already unstuffed)
    Byte(u8),
    /// More input is needed; caller should suspend
    Suspended,
    /// The entropy-coded segment has ended (marker or truncation)
    End,
}

/// Bitstream reader with 0xFF unstuffing and marker-boundary detection.
///
/// When the segment ends (a real marker is encountered, or the source is
/// exhausted and finished), the reader switches to supplying zero bits and
/// sets [`ran_out`](Self::ran_out); the entropy decoder turns that into its
/// insufficient-data substitution policy. An encountered marker is held in
/// [`pending_marker`](Self::pending_marker) for the marker layer.
#[derive(Debug, Clone, Default)]
pub struct BitReader {
    bit_buf: u64,
    bit_count: u32,
    pending_marker: Option<u8>,
    ran_out: bool,
}

impl BitReader {
    /// Create a reader with an empty bit buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new entropy-coded segment (scan or restart interval).
    pub fn reset(&mut self) {
        self.bit_buf = 0;
        self.bit_count = 0;
        self.pending_marker = None;
        self.ran_out = false;
    }

    /// Discard any partial byte (used at restart boundaries).
    pub fn align(&mut self) {
        self.bit_buf = 0;
        self.bit_count = 0;
    }

    /// True once zero bits have been substituted for missing data.
    pub fn ran_out(&self) -> bool {
        self.ran_out
    }

    /// Marker byte encountered while filling, if any.
    pub fn pending_marker(&self) -> Option<u8> {
        self.pending_marker
    }

    /// Take the pending marker, clearing it.
    pub fn take_pending_marker(&mut self) -> Option<u8> {
        self.pending_marker.take()
    }

    /// Park a marker back on the reader (a restart handler that found a
    /// scan-terminating marker leaves it for the marker layer).
    pub(crate) fn set_pending_marker(&mut self, marker: u8) {
        self.pending_marker = Some(marker);
    }

    fn load_byte(&mut self, src: &mut ByteSource) -> LoadByte {
        if self.pending_marker.is_some() {
            return LoadByte::End;
        }
        loop {
            let mark = src.mark();
            let b = match src.next_byte() {
                Some(b) => b,
                None => {
                    return if src.is_finished() {
                        LoadByte::End
                    } else {
                        LoadByte::Suspended
                    };
                }
            };
            if b != 0xFF {
                return LoadByte::Byte(b);
            }
            match src.next_byte() {
                None => {
                    if src.is_finished() {
                        // Dangling 0xFF at end of input: truncated.
                        return LoadByte::End;
                    }
                    // Cannot classify the 0xFF yet; rewind so the pair is
                    // re-read intact after more input arrives.
                    let _ = src.rewind(mark);
                    return LoadByte::Suspended;
                }
                Some(0x00) => return LoadByte::Byte(0xFF),
                Some(0xFF) => {
                    // 0xFF fill byte before a marker; drop the first 0xFF
                    // and reconsider from the second.
                    let _ = src.rewind(mark);
                    src.skip(1);
                    continue;
                }
                Some(marker) => {
                    self.pending_marker = Some(marker);
                    return LoadByte::End;
                }
            }
        }
    }

    /// Ensure at least `n` bits are buffered. Returns false on suspension.
    fn ensure_bits(&mut self, src: &mut ByteSource, n: u32) -> bool {
        while self.bit_count < n {
            match self.load_byte(src) {
                LoadByte::Byte(b) => {
                    self.bit_buf = (self.bit_buf << 8) | b as u64;
                    self.bit_count += 8;
                }
                LoadByte::Suspended => return false,
                LoadByte::End => {
                    // Substitute zero bits for the rest of the segment.
                    self.ran_out = true;
                    self.bit_buf <<= 8;
                    self.bit_count += 8;
                }
            }
        }
        true
    }

    /// Read `n` bits (n >= 1). `None` means suspend and retry later.
    #[inline]
    pub fn get_bits(&mut self, src: &mut ByteSource, n: u32) -> Option<u32> {
        debug_assert!(n >= 1 && n <= 25);
        if !self.ensure_bits(src, n) {
            return None;
        }
        self.bit_count -= n;
        Some(((self.bit_buf >> self.bit_count) as u32) & ((1 << n) - 1))
    }

    /// Read a single bit.
    #[inline]
    pub fn get_bit(&mut self, src: &mut ByteSource) -> Option<u32> {
        self.get_bits(src, 1)
    }
}

/// Sign-extend `value` received as an `size`-bit magnitude per T.81 F.12.
#[inline]
pub fn huff_extend(value: u32, size: u8) -> i32 {
    if size == 0 {
        return 0;
    }
    if (value as i32) < (1 << (size - 1)) {
        value as i32 - (1 << size) + 1
    } else {
        value as i32
    }
}

/// Number of bits needed to represent `value` (the JPEG "category").
#[inline]
pub fn jpeg_nbits(value: i32) -> u8 {
    let magnitude = value.unsigned_abs();
    (32 - magnitude.leading_zeros()) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(writer: BitWriter<Vec<u8>>) -> Vec<u8> {
        let mut writer = writer;
        writer.flush_bits();
        assert!(writer.drain().unwrap());
        writer.into_sink().unwrap()
    }

    #[test]
    fn test_writer_basic_byte() {
        let mut w = BitWriter::new(Vec::new());
        w.put_bits(0b1010_1010, 8);
        assert_eq!(written(w), vec![0b1010_1010]);
    }

    #[test]
    fn test_writer_pads_with_ones() {
        let mut w = BitWriter::new(Vec::new());
        w.put_bits(0b10101, 5);
        assert_eq!(written(w), vec![0b1010_1111]);
    }

    #[test]
    fn test_writer_stuffs_ff() {
        let mut w = BitWriter::new(Vec::new());
        w.put_bits(0xFF, 8);
        assert_eq!(written(w), vec![0xFF, 0x00]);
    }

    #[test]
    fn test_writer_cross_boundary() {
        let mut w = BitWriter::new(Vec::new());
        w.put_bits(0b1111_0000_1111, 12);
        // 11110000 1111+1111 padding = F0 FF, stuffed
        assert_eq!(written(w), vec![0xF0, 0xFF, 0x00]);
    }

    #[test]
    fn test_writer_many_bits_matches_reader() {
        let mut w = BitWriter::new(Vec::new());
        for i in 0..200u32 {
            let size = ((i % 16) + 1) as u8;
            let code = (i.wrapping_mul(2654435761u32) >> 8) & ((1u32 << size) - 1);
            w.put_bits(code, size);
        }
        w.put_bits(0, 8); // terminate cleanly on a byte boundary w/ known data
        let bytes = written(w);

        let mut src = ByteSource::from_bytes(&bytes);
        let mut r = BitReader::new();
        for i in 0..200u32 {
            let size = (i % 16) + 1;
            let expected = (i.wrapping_mul(2654435761u32) >> 8) & ((1u32 << size) - 1);
            assert_eq!(r.get_bits(&mut src, size), Some(expected));
        }
    }

    #[test]
    fn test_reader_unstuffs_ff00() {
        let mut src = ByteSource::from_bytes(&[0xFF, 0x00, 0xAB]);
        let mut r = BitReader::new();
        assert_eq!(r.get_bits(&mut src, 8), Some(0xFF));
        assert_eq!(r.get_bits(&mut src, 8), Some(0xAB));
        assert!(!r.ran_out());
    }

    #[test]
    fn test_reader_stops_at_marker_and_zero_fills() {
        let mut src = ByteSource::from_bytes(&[0x12, 0xFF, 0xD9]);
        let mut r = BitReader::new();
        assert_eq!(r.get_bits(&mut src, 8), Some(0x12));
        assert_eq!(r.get_bits(&mut src, 8), Some(0x00));
        assert!(r.ran_out());
        assert_eq!(r.pending_marker(), Some(0xD9));
    }

    #[test]
    fn test_reader_suspends_without_input() {
        let mut src = ByteSource::new();
        src.feed(&[0b1100_0000]);
        let mut r = BitReader::new();
        assert_eq!(r.get_bits(&mut src, 2), Some(0b11));
        // 6 bits left; asking for 8 must suspend, not zero-fill.
        assert_eq!(r.get_bits(&mut src, 8), None);
        assert!(!r.ran_out());
        src.feed(&[0b0000_0001]);
        assert_eq!(r.get_bits(&mut src, 8), Some(0b0000_0000));
    }

    #[test]
    fn test_reader_suspends_on_split_ff_pair() {
        let mut src = ByteSource::new();
        src.feed(&[0xFF]);
        let mut r = BitReader::new();
        assert_eq!(r.get_bits(&mut src, 8), None);
        src.feed(&[0x00]);
        assert_eq!(r.get_bits(&mut src, 8), Some(0xFF));
    }

    #[test]
    fn test_reader_skips_ff_fill_bytes() {
        let mut src = ByteSource::from_bytes(&[0xFF, 0xFF, 0xD0]);
        let mut r = BitReader::new();
        assert_eq!(r.get_bits(&mut src, 8), Some(0));
        assert_eq!(r.pending_marker(), Some(0xD0));
    }

    #[test]
    fn test_huff_extend() {
        assert_eq!(huff_extend(0, 0), 0);
        assert_eq!(huff_extend(1, 1), 1);
        assert_eq!(huff_extend(0, 1), -1);
        assert_eq!(huff_extend(0b011, 3), -4);
        assert_eq!(huff_extend(0b100, 3), 4);
        assert_eq!(huff_extend(0b111, 3), 7);
    }

    #[test]
    fn test_jpeg_nbits() {
        assert_eq!(jpeg_nbits(0), 0);
        assert_eq!(jpeg_nbits(1), 1);
        assert_eq!(jpeg_nbits(-1), 1);
        assert_eq!(jpeg_nbits(255), 8);
        assert_eq!(jpeg_nbits(-256), 9);
    }
}
