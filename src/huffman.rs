//! Huffman table handling: the wire-format table model, derived tables for
//! encoding and decoding, the standard Annex K tables, and optimal table
//! construction from gathered symbol statistics (T.81 K.2/K.3).

use crate::bitstream::BitReader;
use crate::error::{Error, Result};
use crate::io::ByteSource;

/// Maximum Huffman code length allowed by the format.
const MAX_CODE_LEN: usize = 16;

/// A Huffman table as carried in the datastream (DHT payload form).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HuffTable {
    /// `bits[k]` = number of symbols with k-bit codes; `bits[0]` unused.
    pub bits: [u8; 17],
    /// Symbol values in order of increasing code length.
    pub huffval: Vec<u8>,
    /// True once this table has been written to the output datastream.
    pub sent: bool,
}

impl HuffTable {
    /// Create a table from bits counts and symbol values.
    pub fn new(bits: [u8; 17], huffval: Vec<u8>) -> Self {
        Self {
            bits,
            huffval,
            sent: false,
        }
    }

    /// Total number of symbols in this table.
    pub fn num_symbols(&self) -> usize {
        self.bits[1..].iter().map(|&b| b as usize).sum()
    }

    /// Standard DC luminance table (T.81 K.3.3.1).
    pub fn std_dc_luma() -> Self {
        Self::new(
            [0, 0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0],
            vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        )
    }

    /// Standard DC chrominance table.
    pub fn std_dc_chroma() -> Self {
        Self::new(
            [0, 0, 3, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0],
            vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        )
    }

    /// Standard AC luminance table.
    pub fn std_ac_luma() -> Self {
        Self::new(
            [0, 0, 2, 1, 3, 3, 2, 4, 3, 5, 5, 4, 4, 0, 0, 1, 0x7D],
            vec![
                0x01, 0x02, 0x03, 0x00, 0x04, 0x11, 0x05, 0x12, 0x21, 0x31, 0x41, 0x06, 0x13,
                0x51, 0x61, 0x07, 0x22, 0x71, 0x14, 0x32, 0x81, 0x91, 0xA1, 0x08, 0x23, 0x42,
                0xB1, 0xC1, 0x15, 0x52, 0xD1, 0xF0, 0x24, 0x33, 0x62, 0x72, 0x82, 0x09, 0x0A,
                0x16, 0x17, 0x18, 0x19, 0x1A, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2A, 0x34, 0x35,
                0x36, 0x37, 0x38, 0x39, 0x3A, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4A,
                0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5A, 0x63, 0x64, 0x65, 0x66, 0x67,
                0x68, 0x69, 0x6A, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7A, 0x83, 0x84,
                0x85, 0x86, 0x87, 0x88, 0x89, 0x8A, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98,
                0x99, 0x9A, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xB2, 0xB3,
                0xB4, 0xB5, 0xB6, 0xB7, 0xB8, 0xB9, 0xBA, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7,
                0xC8, 0xC9, 0xCA, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xE1,
                0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8, 0xE9, 0xEA, 0xF1, 0xF2, 0xF3, 0xF4,
                0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0xFA,
            ],
        )
    }

    /// Standard AC chrominance table.
    pub fn std_ac_chroma() -> Self {
        Self::new(
            [0, 0, 2, 1, 2, 4, 4, 3, 4, 7, 5, 4, 4, 0, 1, 2, 0x77],
            vec![
                0x00, 0x01, 0x02, 0x03, 0x11, 0x04, 0x05, 0x21, 0x31, 0x06, 0x12, 0x41, 0x51,
                0x07, 0x61, 0x71, 0x13, 0x22, 0x32, 0x81, 0x08, 0x14, 0x42, 0x91, 0xA1, 0xB1,
                0xC1, 0x09, 0x23, 0x33, 0x52, 0xF0, 0x15, 0x62, 0x72, 0xD1, 0x0A, 0x16, 0x24,
                0x34, 0xE1, 0x25, 0xF1, 0x17, 0x18, 0x19, 0x1A, 0x26, 0x27, 0x28, 0x29, 0x2A,
                0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49,
                0x4A, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5A, 0x63, 0x64, 0x65, 0x66,
                0x67, 0x68, 0x69, 0x6A, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7A, 0x82,
                0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8A, 0x92, 0x93, 0x94, 0x95, 0x96,
                0x97, 0x98, 0x99, 0x9A, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA,
                0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7, 0xB8, 0xB9, 0xBA, 0xC2, 0xC3, 0xC4, 0xC5,
                0xC6, 0xC7, 0xC8, 0xC9, 0xCA, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9,
                0xDA, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8, 0xE9, 0xEA, 0xF2, 0xF3, 0xF4,
                0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0xFA,
            ],
        )
    }
}

// =============================================================================
// Derived encode table
// =============================================================================

/// Per-symbol code/length lookup derived from a [`HuffTable`] for encoding
/// (T.81 C.1-C.3).
#[derive(Debug, Clone)]
pub struct EncodeTable {
    /// Code for each symbol value
    pub code: [u32; 256],
    /// Code length for each symbol value; 0 = symbol has no code
    pub size: [u8; 256],
}

impl EncodeTable {
    /// Derive the encode lookup from a wire-format table.
    pub fn derive(table: &HuffTable) -> Result<Self> {
        let (codes, sizes, symbols) = assign_codes(table)?;
        let mut out = Self {
            code: [0; 256],
            size: [0; 256],
        };
        for i in 0..symbols.len() {
            let sym = symbols[i] as usize;
            if out.size[sym] != 0 {
                return Err(Error::InvalidHuffmanTable); // duplicate symbol
            }
            out.code[sym] = codes[i];
            out.size[sym] = sizes[i];
        }
        Ok(out)
    }
}

// =============================================================================
// Derived decode table
// =============================================================================

/// Code-length-indexed decode lookup derived from a [`HuffTable`]
/// (the mincode/maxcode/valptr scheme of T.81 F.2.2.3).
#[derive(Debug, Clone)]
pub struct DecodeTable {
    mincode: [i32; MAX_CODE_LEN + 1],
    /// maxcode[l] = largest code of length l, or -1 if none
    maxcode: [i32; MAX_CODE_LEN + 1],
    valptr: [usize; MAX_CODE_LEN + 1],
    huffval: Vec<u8>,
}

impl DecodeTable {
    /// Derive the decode lookup from a wire-format table.
    pub fn derive(table: &HuffTable) -> Result<Self> {
        let (codes, sizes, symbols) = assign_codes(table)?;
        let mut mincode = [0i32; MAX_CODE_LEN + 1];
        let mut maxcode = [-1i32; MAX_CODE_LEN + 1];
        let mut valptr = [0usize; MAX_CODE_LEN + 1];

        let mut p = 0usize;
        for l in 1..=MAX_CODE_LEN {
            let count = table.bits[l] as usize;
            if count > 0 {
                valptr[l] = p;
                mincode[l] = codes[p] as i32;
                maxcode[l] = codes[p + count - 1] as i32;
                p += count;
            }
        }
        debug_assert_eq!(p, sizes.len());
        Ok(Self {
            mincode,
            maxcode,
            valptr,
            huffval: symbols,
        })
    }

    /// Decode one symbol, reading bits one at a time.
    ///
    /// Returns `None` on suspension. A code that matches nothing in the
    /// table (corrupt data) decodes as symbol 0, the standard leniency.
    pub fn decode_symbol(&self, reader: &mut BitReader, src: &mut ByteSource) -> Option<u8> {
        let mut code = reader.get_bit(src)? as i32;
        let mut l = 1usize;
        while l <= MAX_CODE_LEN && (self.maxcode[l] < 0 || code > self.maxcode[l]) {
            code = (code << 1) | reader.get_bit(src)? as i32;
            l += 1;
        }
        if l > MAX_CODE_LEN {
            return Some(0);
        }
        let idx = self.valptr[l] + (code - self.mincode[l]) as usize;
        Some(self.huffval.get(idx).copied().unwrap_or(0))
    }
}

/// Expand bits/huffval into parallel (code, size, symbol) lists in code
/// order (T.81 C.1/C.2), validating structure.
fn assign_codes(table: &HuffTable) -> Result<(Vec<u32>, Vec<u8>, Vec<u8>)> {
    let total = table.num_symbols();
    if total == 0 || total > 256 || table.huffval.len() < total {
        return Err(Error::InvalidHuffmanTable);
    }
    let mut sizes = Vec::with_capacity(total);
    for l in 1..=MAX_CODE_LEN {
        for _ in 0..table.bits[l] {
            sizes.push(l as u8);
        }
    }
    let mut codes = Vec::with_capacity(total);
    let mut code = 0u32;
    let mut si = sizes[0];
    for &size in &sizes {
        while size > si {
            code <<= 1;
            si += 1;
        }
        // The code must fit in `size` bits.
        if code >= (1u32 << size) {
            return Err(Error::InvalidHuffmanTable);
        }
        codes.push(code);
        code += 1;
    }
    Ok((codes, sizes, table.huffval[..total].to_vec()))
}

// =============================================================================
// Optimal table construction (statistics-gathering passes)
// =============================================================================

/// Symbol frequency accumulator for one table. Slot 256 is reserved to
/// guarantee every real symbol gets a code shorter than the maximum.
#[derive(Debug, Clone)]
pub struct FrequencyCounter {
    /// Observed symbol counts (slot 256 reserved)
    pub counts: [u32; 257],
}

impl Default for FrequencyCounter {
    fn default() -> Self {
        Self { counts: [0; 257] }
    }
}

impl FrequencyCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all counts.
    pub fn reset(&mut self) {
        self.counts = [0; 257];
    }

    /// Record one occurrence of `symbol`.
    #[inline]
    pub fn record(&mut self, symbol: u8) {
        self.counts[symbol as usize] += 1;
    }

    /// Build the optimal table for the gathered statistics (T.81 K.2, with
    /// the K.3 length-limiting adjustment).
    pub fn build_table(&self) -> HuffTable {
        let mut freq = self.counts;
        freq[256] = 1; // reserved: ensures no real symbol gets all-ones code

        let mut codesize = [0usize; 257];
        let mut others = [-1i32; 257];

        loop {
            // Find the two smallest nonzero frequencies; ties prefer the
            // higher symbol so short codes go to low symbols.
            let mut c1: i32 = -1;
            let mut v = u32::MAX;
            for (i, &f) in freq.iter().enumerate() {
                if f != 0 && f <= v {
                    v = f;
                    c1 = i as i32;
                }
            }
            let mut c2: i32 = -1;
            v = u32::MAX;
            for (i, &f) in freq.iter().enumerate() {
                if f != 0 && f <= v && i as i32 != c1 {
                    v = f;
                    c2 = i as i32;
                }
            }
            if c2 < 0 {
                break;
            }

            let (c1u, c2u) = (c1 as usize, c2 as usize);
            freq[c1u] += freq[c2u];
            freq[c2u] = 0;

            codesize[c1u] += 1;
            let mut i = c1u;
            while others[i] >= 0 {
                i = others[i] as usize;
                codesize[i] += 1;
            }
            others[i] = c2;
            codesize[c2u] += 1;
            let mut i = c2u;
            while others[i] >= 0 {
                i = others[i] as usize;
                codesize[i] += 1;
            }
        }

        // Count codes of each length (lengths up to 32 can occur).
        let mut bits_long = [0i32; 33];
        for &size in codesize.iter() {
            if size > 0 {
                bits_long[size.min(32)] += 1;
            }
        }

        // Length-limit to 16 bits: repeatedly move a pair of the longest
        // codes up (K.3).
        let mut i = 32;
        while i > MAX_CODE_LEN {
            while bits_long[i] > 0 {
                let mut j = i - 2;
                while bits_long[j] == 0 {
                    j -= 1;
                }
                bits_long[i] -= 2;
                bits_long[i - 1] += 1;
                bits_long[j + 1] += 2;
                bits_long[j] -= 1;
            }
            i -= 1;
        }

        // Remove the reserved symbol's code from the longest used length.
        let mut i = MAX_CODE_LEN;
        while i > 0 && bits_long[i] == 0 {
            i -= 1;
        }
        if i > 0 {
            bits_long[i] -= 1;
        }

        let mut bits = [0u8; 17];
        for l in 1..=MAX_CODE_LEN {
            bits[l] = bits_long[l] as u8;
        }

        // Symbols sorted by code length, then by value; the reserved
        // symbol 256 is excluded.
        let mut huffval = Vec::new();
        for size in 1..=MAX_CODE_LEN {
            for sym in 0..256usize {
                if codesize[sym] == size {
                    huffval.push(sym as u8);
                }
            }
        }

        HuffTable::new(bits, huffval)
    }
}
