//! Forward and inverse DCT with quantization.
//!
//! The integer path is the 8x8 Loeffler-Ligtenberg-Moshovitz transform in
//! 13-bit fixed point, split into a row pass and a column pass. The forward
//! transform leaves its output scaled up by a factor of 8, which the
//! quantization divisors fold back in. The float path computes the plain
//! separable DCT-II/DCT-III and exists for callers that prefer accuracy
//! over reproducibility across platforms.
//!
//! Blocks are stored in natural (row-major) order everywhere; zigzag
//! ordering is applied only when entropy coding walks a block.

use crate::consts::{DCTSIZE, DCTSIZE2};
use crate::types::{DctBlock, DctMethod, QuantTable};

const CONST_BITS: i32 = 13;
const PASS1_BITS: i32 = 2;

const FIX_0_298631336: i32 = 2446;
const FIX_0_390180644: i32 = 3196;
const FIX_0_541196100: i32 = 4433;
const FIX_0_765366865: i32 = 6270;
const FIX_0_899976223: i32 = 7373;
const FIX_1_175875602: i32 = 9633;
const FIX_1_501321110: i32 = 12299;
const FIX_1_847759065: i32 = 15137;
const FIX_1_961570560: i32 = 16069;
const FIX_2_053119869: i32 = 16819;
const FIX_2_562915447: i32 = 20995;
const FIX_3_072711026: i32 = 25172;

/// Rounding right shift.
#[inline]
fn descale(x: i64, n: i32) -> i32 {
    ((x + (1i64 << (n - 1))) >> n) as i32
}

#[inline]
fn mul(a: i32, b: i32) -> i64 {
    a as i64 * b as i64
}

/// Forward-transform and quantize one block of level-unshifted samples.
pub fn forward_block(method: DctMethod, samples: &[u8; DCTSIZE2], table: &QuantTable) -> DctBlock {
    match method {
        DctMethod::IntSlow => {
            let mut ws = [0i32; DCTSIZE2];
            for (w, &s) in ws.iter_mut().zip(samples.iter()) {
                *w = s as i32 - 128;
            }
            fdct_islow(&mut ws);
            quantize_scaled(&ws, table)
        }
        DctMethod::Float => {
            let coefs = fdct_float(samples);
            let mut block = [0i16; DCTSIZE2];
            for i in 0..DCTSIZE2 {
                let q = table.values[i] as f32;
                block[i] = (coefs[i] / q).round().clamp(-32768.0, 32767.0) as i16;
            }
            block
        }
    }
}

/// Dequantize and inverse-transform one block into level-shifted samples.
pub fn inverse_block(
    method: DctMethod,
    block: &DctBlock,
    table: &QuantTable,
    out: &mut [u8; DCTSIZE2],
) {
    match method {
        DctMethod::IntSlow => idct_islow(block, table, out),
        DctMethod::Float => idct_float(block, table, out),
    }
}

/// Divide the x8-scaled integer transform output by the quantization step,
/// rounding to nearest with ties away from zero.
fn quantize_scaled(ws: &[i32; DCTSIZE2], table: &QuantTable) -> DctBlock {
    let mut block = [0i16; DCTSIZE2];
    for i in 0..DCTSIZE2 {
        let q = (table.values[i] as i32) << 3;
        let x = ws[i];
        let v = if x < 0 {
            -((-x + (q >> 1)) / q)
        } else {
            (x + (q >> 1)) / q
        };
        block[i] = v.clamp(-32768, 32767) as i16;
    }
    block
}

/// Integer forward transform, in place. Input is level-shifted samples;
/// output is coefficients scaled up by 8.
fn fdct_islow(data: &mut [i32; DCTSIZE2]) {
    // Pass 1: process rows; results scaled up by sqrt(8) * 2^PASS1_BITS.
    for row in data.chunks_exact_mut(DCTSIZE) {
        let tmp0 = row[0] + row[7];
        let tmp7 = row[0] - row[7];
        let tmp1 = row[1] + row[6];
        let tmp6 = row[1] - row[6];
        let tmp2 = row[2] + row[5];
        let tmp5 = row[2] - row[5];
        let tmp3 = row[3] + row[4];
        let tmp4 = row[3] - row[4];

        let tmp10 = tmp0 + tmp3;
        let tmp13 = tmp0 - tmp3;
        let tmp11 = tmp1 + tmp2;
        let tmp12 = tmp1 - tmp2;

        row[0] = (tmp10 + tmp11) << PASS1_BITS;
        row[4] = (tmp10 - tmp11) << PASS1_BITS;

        let z1 = mul(tmp12 + tmp13, FIX_0_541196100);
        row[2] = descale(z1 + mul(tmp13, FIX_0_765366865), CONST_BITS - PASS1_BITS);
        row[6] = descale(z1 - mul(tmp12, FIX_1_847759065), CONST_BITS - PASS1_BITS);

        let z1 = tmp4 + tmp7;
        let z2 = tmp5 + tmp6;
        let z3 = tmp4 + tmp6;
        let z4 = tmp5 + tmp7;
        let z5 = mul(z3 + z4, FIX_1_175875602);

        let t4 = mul(tmp4, FIX_0_298631336);
        let t5 = mul(tmp5, FIX_2_053119869);
        let t6 = mul(tmp6, FIX_3_072711026);
        let t7 = mul(tmp7, FIX_1_501321110);
        let z1 = -mul(z1, FIX_0_899976223);
        let z2 = -mul(z2, FIX_2_562915447);
        let z3 = -mul(z3, FIX_1_961570560) + z5;
        let z4 = -mul(z4, FIX_0_390180644) + z5;

        row[7] = descale(t4 + z1 + z3, CONST_BITS - PASS1_BITS);
        row[5] = descale(t5 + z2 + z4, CONST_BITS - PASS1_BITS);
        row[3] = descale(t6 + z2 + z3, CONST_BITS - PASS1_BITS);
        row[1] = descale(t7 + z1 + z4, CONST_BITS - PASS1_BITS);
    }

    // Pass 2: process columns; remove the PASS1_BITS scaling but leave the
    // overall factor of 8.
    for c in 0..DCTSIZE {
        let col = |r: usize| data[r * DCTSIZE + c];

        let tmp0 = col(0) + col(7);
        let tmp7 = col(0) - col(7);
        let tmp1 = col(1) + col(6);
        let tmp6 = col(1) - col(6);
        let tmp2 = col(2) + col(5);
        let tmp5 = col(2) - col(5);
        let tmp3 = col(3) + col(4);
        let tmp4 = col(3) - col(4);

        let tmp10 = tmp0 + tmp3;
        let tmp13 = tmp0 - tmp3;
        let tmp11 = tmp1 + tmp2;
        let tmp12 = tmp1 - tmp2;

        data[c] = descale((tmp10 + tmp11) as i64, PASS1_BITS);
        data[4 * DCTSIZE + c] = descale((tmp10 - tmp11) as i64, PASS1_BITS);

        let z1 = mul(tmp12 + tmp13, FIX_0_541196100);
        data[2 * DCTSIZE + c] =
            descale(z1 + mul(tmp13, FIX_0_765366865), CONST_BITS + PASS1_BITS);
        data[6 * DCTSIZE + c] =
            descale(z1 - mul(tmp12, FIX_1_847759065), CONST_BITS + PASS1_BITS);

        let z1 = tmp4 + tmp7;
        let z2 = tmp5 + tmp6;
        let z3 = tmp4 + tmp6;
        let z4 = tmp5 + tmp7;
        let z5 = mul(z3 + z4, FIX_1_175875602);

        let t4 = mul(tmp4, FIX_0_298631336);
        let t5 = mul(tmp5, FIX_2_053119869);
        let t6 = mul(tmp6, FIX_3_072711026);
        let t7 = mul(tmp7, FIX_1_501321110);
        let z1 = -mul(z1, FIX_0_899976223);
        let z2 = -mul(z2, FIX_2_562915447);
        let z3 = -mul(z3, FIX_1_961570560) + z5;
        let z4 = -mul(z4, FIX_0_390180644) + z5;

        data[7 * DCTSIZE + c] = descale(t4 + z1 + z3, CONST_BITS + PASS1_BITS);
        data[5 * DCTSIZE + c] = descale(t5 + z2 + z4, CONST_BITS + PASS1_BITS);
        data[3 * DCTSIZE + c] = descale(t6 + z2 + z3, CONST_BITS + PASS1_BITS);
        data[DCTSIZE + c] = descale(t7 + z1 + z4, CONST_BITS + PASS1_BITS);
    }
}

#[inline]
fn clamp_sample(x: i32) -> u8 {
    (x + 128).clamp(0, 255) as u8
}

/// Integer inverse transform with dequantization folded into the column
/// pass.
fn idct_islow(block: &DctBlock, table: &QuantTable, out: &mut [u8; DCTSIZE2]) {
    let mut ws = [0i32; DCTSIZE2];

    // Pass 1: columns, dequantizing as we fetch.
    for c in 0..DCTSIZE {
        let deq = |r: usize| block[r * DCTSIZE + c] as i32 * table.values[r * DCTSIZE + c] as i32;

        // All-AC-zero column: the output is a constant.
        if (1..DCTSIZE).all(|r| block[r * DCTSIZE + c] == 0) {
            let dc = deq(0) << PASS1_BITS;
            for r in 0..DCTSIZE {
                ws[r * DCTSIZE + c] = dc;
            }
            continue;
        }

        let z2 = deq(2);
        let z3 = deq(6);
        let z1 = mul(z2 + z3, FIX_0_541196100);
        let tmp2 = z1 - mul(z3, FIX_1_847759065);
        let tmp3 = z1 + mul(z2, FIX_0_765366865);

        let z2 = deq(0);
        let z3 = deq(4);
        let tmp0 = ((z2 + z3) as i64) << CONST_BITS;
        let tmp1 = ((z2 - z3) as i64) << CONST_BITS;

        let tmp10 = tmp0 + tmp3;
        let tmp13 = tmp0 - tmp3;
        let tmp11 = tmp1 + tmp2;
        let tmp12 = tmp1 - tmp2;

        let t0 = deq(7);
        let t1 = deq(5);
        let t2 = deq(3);
        let t3 = deq(1);

        let z1 = t0 + t3;
        let z2 = t1 + t2;
        let z3 = t0 + t2;
        let z4 = t1 + t3;
        let z5 = mul(z3 + z4, FIX_1_175875602);

        let t0 = mul(t0, FIX_0_298631336);
        let t1 = mul(t1, FIX_2_053119869);
        let t2 = mul(t2, FIX_3_072711026);
        let t3 = mul(t3, FIX_1_501321110);
        let z1 = -mul(z1, FIX_0_899976223);
        let z2 = -mul(z2, FIX_2_562915447);
        let z3 = -mul(z3, FIX_1_961570560) + z5;
        let z4 = -mul(z4, FIX_0_390180644) + z5;

        let t0 = t0 + z1 + z3;
        let t1 = t1 + z2 + z4;
        let t2 = t2 + z2 + z3;
        let t3 = t3 + z1 + z4;

        ws[c] = descale(tmp10 + t3, CONST_BITS - PASS1_BITS);
        ws[7 * DCTSIZE + c] = descale(tmp10 - t3, CONST_BITS - PASS1_BITS);
        ws[DCTSIZE + c] = descale(tmp11 + t2, CONST_BITS - PASS1_BITS);
        ws[6 * DCTSIZE + c] = descale(tmp11 - t2, CONST_BITS - PASS1_BITS);
        ws[2 * DCTSIZE + c] = descale(tmp12 + t1, CONST_BITS - PASS1_BITS);
        ws[5 * DCTSIZE + c] = descale(tmp12 - t1, CONST_BITS - PASS1_BITS);
        ws[3 * DCTSIZE + c] = descale(tmp13 + t0, CONST_BITS - PASS1_BITS);
        ws[4 * DCTSIZE + c] = descale(tmp13 - t0, CONST_BITS - PASS1_BITS);
    }

    // Pass 2: rows, producing final level-shifted samples.
    for (r, row) in ws.chunks_exact(DCTSIZE).enumerate() {
        let o = &mut out[r * DCTSIZE..(r + 1) * DCTSIZE];

        let z2 = row[2];
        let z3 = row[6];
        let z1 = mul(z2 + z3, FIX_0_541196100);
        let tmp2 = z1 - mul(z3, FIX_1_847759065);
        let tmp3 = z1 + mul(z2, FIX_0_765366865);

        let tmp0 = ((row[0] + row[4]) as i64) << CONST_BITS;
        let tmp1 = ((row[0] - row[4]) as i64) << CONST_BITS;

        let tmp10 = tmp0 + tmp3;
        let tmp13 = tmp0 - tmp3;
        let tmp11 = tmp1 + tmp2;
        let tmp12 = tmp1 - tmp2;

        let t0 = row[7];
        let t1 = row[5];
        let t2 = row[3];
        let t3 = row[1];

        let z1 = t0 + t3;
        let z2 = t1 + t2;
        let z3 = t0 + t2;
        let z4 = t1 + t3;
        let z5 = mul(z3 + z4, FIX_1_175875602);

        let t0 = mul(t0, FIX_0_298631336);
        let t1 = mul(t1, FIX_2_053119869);
        let t2 = mul(t2, FIX_3_072711026);
        let t3 = mul(t3, FIX_1_501321110);
        let z1 = -mul(z1, FIX_0_899976223);
        let z2 = -mul(z2, FIX_2_562915447);
        let z3 = -mul(z3, FIX_1_961570560) + z5;
        let z4 = -mul(z4, FIX_0_390180644) + z5;

        let t0 = t0 + z1 + z3;
        let t1 = t1 + z2 + z4;
        let t2 = t2 + z2 + z3;
        let t3 = t3 + z1 + z4;

        let shift = CONST_BITS + PASS1_BITS + 3;
        o[0] = clamp_sample(descale(tmp10 + t3, shift));
        o[7] = clamp_sample(descale(tmp10 - t3, shift));
        o[1] = clamp_sample(descale(tmp11 + t2, shift));
        o[6] = clamp_sample(descale(tmp11 - t2, shift));
        o[2] = clamp_sample(descale(tmp12 + t1, shift));
        o[5] = clamp_sample(descale(tmp12 - t1, shift));
        o[3] = clamp_sample(descale(tmp13 + t0, shift));
        o[4] = clamp_sample(descale(tmp13 - t0, shift));
    }
}

// =============================================================================
// Float path
// =============================================================================

/// cos((2x+1) u pi / 16) * C(u) basis, C(0) = 1/sqrt(2).
fn dct_basis() -> [[f32; DCTSIZE]; DCTSIZE] {
    let mut basis = [[0.0f32; DCTSIZE]; DCTSIZE];
    for (u, row) in basis.iter_mut().enumerate() {
        let cu = if u == 0 {
            (0.5f32).sqrt()
        } else {
            1.0
        };
        for (x, b) in row.iter_mut().enumerate() {
            let angle = (2.0 * x as f32 + 1.0) * u as f32 * core::f32::consts::PI / 16.0;
            *b = 0.5 * cu * angle.cos();
        }
    }
    basis
}

/// Plain separable DCT-II on level-shifted samples, unscaled output.
fn fdct_float(samples: &[u8; DCTSIZE2]) -> [f32; DCTSIZE2] {
    let basis = dct_basis();
    let mut rows = [0.0f32; DCTSIZE2];
    for r in 0..DCTSIZE {
        for u in 0..DCTSIZE {
            let mut acc = 0.0;
            for x in 0..DCTSIZE {
                acc += (samples[r * DCTSIZE + x] as f32 - 128.0) * basis[u][x];
            }
            rows[r * DCTSIZE + u] = acc;
        }
    }
    let mut out = [0.0f32; DCTSIZE2];
    for c in 0..DCTSIZE {
        for v in 0..DCTSIZE {
            let mut acc = 0.0;
            for y in 0..DCTSIZE {
                acc += rows[y * DCTSIZE + c] * basis[v][y];
            }
            out[v * DCTSIZE + c] = acc;
        }
    }
    out
}

fn idct_float(block: &DctBlock, table: &QuantTable, out: &mut [u8; DCTSIZE2]) {
    let basis = dct_basis();
    let mut deq = [0.0f32; DCTSIZE2];
    for i in 0..DCTSIZE2 {
        deq[i] = block[i] as f32 * table.values[i] as f32;
    }
    let mut cols = [0.0f32; DCTSIZE2];
    for c in 0..DCTSIZE {
        for y in 0..DCTSIZE {
            let mut acc = 0.0;
            for v in 0..DCTSIZE {
                acc += deq[v * DCTSIZE + c] * basis[v][y];
            }
            cols[y * DCTSIZE + c] = acc;
        }
    }
    for r in 0..DCTSIZE {
        for x in 0..DCTSIZE {
            let mut acc = 0.0;
            for u in 0..DCTSIZE {
                acc += cols[r * DCTSIZE + u] * basis[u][x];
            }
            out[r * DCTSIZE + x] = (acc + 128.0).round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_table() -> QuantTable {
        QuantTable::identity()
    }

    #[test]
    fn test_flat_block_is_dc_only() {
        let samples = [200u8; DCTSIZE2];
        let table = identity_table();
        for method in [DctMethod::IntSlow, DctMethod::Float] {
            let block = forward_block(method, &samples, &table);
            assert_eq!(block[0], 8 * (200 - 128), "method {method:?}");
            assert!(block[1..].iter().all(|&c| c == 0), "method {method:?}");
        }
    }

    #[test]
    fn test_flat_block_round_trips_exactly() {
        let table = identity_table();
        for value in [0u8, 1, 127, 128, 200, 255] {
            let samples = [value; DCTSIZE2];
            for method in [DctMethod::IntSlow, DctMethod::Float] {
                let block = forward_block(method, &samples, &table);
                let mut out = [0u8; DCTSIZE2];
                inverse_block(method, &block, &table, &mut out);
                assert_eq!(out, samples, "value {value} method {method:?}");
            }
        }
    }

    #[test]
    fn test_gradient_round_trip_is_close() {
        let mut samples = [0u8; DCTSIZE2];
        for (i, s) in samples.iter_mut().enumerate() {
            *s = (i * 4) as u8;
        }
        let table = identity_table();
        for method in [DctMethod::IntSlow, DctMethod::Float] {
            let block = forward_block(method, &samples, &table);
            let mut out = [0u8; DCTSIZE2];
            inverse_block(method, &block, &table, &mut out);
            for (a, b) in samples.iter().zip(out.iter()) {
                let diff = (*a as i32 - *b as i32).abs();
                assert!(diff <= 2, "diff {diff} for method {method:?}");
            }
        }
    }

    #[test]
    fn test_int_and_float_agree_closely() {
        let mut samples = [0u8; DCTSIZE2];
        for (i, s) in samples.iter_mut().enumerate() {
            *s = ((i * 37) % 256) as u8;
        }
        let table = identity_table();
        let a = forward_block(DctMethod::IntSlow, &samples, &table);
        let b = forward_block(DctMethod::Float, &samples, &table);
        for i in 0..DCTSIZE2 {
            let diff = (a[i] as i32 - b[i] as i32).abs();
            assert!(diff <= 2, "coef {i}: int {} float {}", a[i], b[i]);
        }
    }

    #[test]
    fn test_quantization_divides_coefficients() {
        let samples = [200u8; DCTSIZE2];
        let mut table = QuantTable::identity();
        table.values[0] = 16;
        let block = forward_block(DctMethod::IntSlow, &samples, &table);
        // DC is 8*72 = 576 before quantization; 576/16 = 36.
        assert_eq!(block[0], 36);
    }

    #[test]
    fn test_inverse_clamps_to_sample_range() {
        let mut block = [0i16; DCTSIZE2];
        block[0] = 8 * 2000; // far outside sample range
        let table = identity_table();
        let mut out = [0u8; DCTSIZE2];
        inverse_block(DctMethod::IntSlow, &block, &table, &mut out);
        assert!(out.iter().all(|&s| s == 255));
        block[0] = -8 * 2000;
        inverse_block(DctMethod::IntSlow, &block, &table, &mut out);
        assert!(out.iter().all(|&s| s == 0));
    }
}
