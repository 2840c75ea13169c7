//! End-to-end round trips over the public session API.
//!
//! Streams produced with different coding options (progressive,
//! optimized tables, restart markers) carry the same coefficients, so
//! their decoded pixels must match exactly; those comparisons need no
//! tolerance. Only comparisons against the original source pixels are
//! approximate.

use pipejpeg::{
    ColorSpace, Compressor, Decompressor, InputStatus, QuantTable, Subsampling, ThrottledSink,
};

fn gradient_gray(width: usize, height: usize) -> Vec<u8> {
    let mut pixels = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let noise = ((x * 7 + y * 13) % 50) as u8;
            pixels[y * width + x] = ((x * 255 / width) as u8).saturating_add(noise);
        }
    }
    pixels
}

fn gradient_rgb(width: usize, height: usize) -> Vec<u8> {
    let mut rgb = vec![0u8; width * height * 3];
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) * 3;
            let noise = ((x * 7 + y * 13) % 50) as u8;
            rgb[idx] = ((x * 255 / width) as u8).saturating_add(noise);
            rgb[idx + 1] = ((y * 255 / height) as u8).saturating_add(noise);
            rgb[idx + 2] = (((x + y) * 255 / (width + height)) as u8).saturating_add(noise);
        }
    }
    rgb
}

fn compress(
    pixels: &[u8],
    width: u32,
    height: u32,
    color: ColorSpace,
    configure: impl FnOnce(&mut Compressor<Vec<u8>>),
) -> Vec<u8> {
    let mut c = Compressor::new(Vec::new());
    c.set_image(width, height, color).unwrap();
    configure(&mut c);
    c.start_compress().unwrap();
    let stride = width as usize * color.num_components();
    let rows: Vec<&[u8]> = pixels.chunks_exact(stride).collect();
    assert_eq!(c.write_scanlines(&rows).unwrap(), height as usize);
    assert!(c.finish_compress().unwrap());
    c.into_sink().unwrap()
}

fn decode(bytes: &[u8]) -> Vec<u8> {
    let mut d = Decompressor::new();
    d.feed_data(bytes);
    d.finish_input();
    assert_eq!(d.read_header().unwrap(), InputStatus::HeaderReady);
    assert!(d.start_decompress().unwrap());
    let stride = d.output_row_len();
    let height = d.height() as usize;
    let mut pixels = vec![0u8; stride * height];
    {
        let mut rows: Vec<&mut [u8]> = pixels.chunks_exact_mut(stride).collect();
        assert_eq!(d.read_scanlines(&mut rows).unwrap(), height);
    }
    assert!(d.finish_decompress().unwrap());
    pixels
}

#[test]
fn flat_gray_is_lossless_under_identity_tables() {
    let pixels = vec![100u8; 16 * 16];
    let bytes = compress(&pixels, 16, 16, ColorSpace::Grayscale, |c| {
        c.set_quant_table(0, QuantTable::identity()).unwrap();
    });
    assert_eq!(decode(&bytes), pixels);
}

#[test]
fn progressive_decodes_identically_to_baseline() {
    let pixels = gradient_gray(32, 24);
    let baseline = compress(&pixels, 32, 24, ColorSpace::Grayscale, |_| {});
    let progressive = compress(&pixels, 32, 24, ColorSpace::Grayscale, |c| {
        c.set_progressive(true).unwrap();
    });
    assert_ne!(baseline, progressive);
    assert_eq!(decode(&baseline), decode(&progressive));
}

#[test]
fn optimized_tables_decode_identically_to_fixed() {
    let pixels = gradient_rgb(35, 21);
    let plain = compress(&pixels, 35, 21, ColorSpace::Rgb, |_| {});
    let optimized = compress(&pixels, 35, 21, ColorSpace::Rgb, |c| {
        c.set_optimize_coding(true).unwrap();
    });
    assert_eq!(decode(&plain), decode(&optimized));
}

#[test]
fn restart_markers_decode_identically() {
    let pixels = gradient_rgb(48, 32);
    let plain = compress(&pixels, 48, 32, ColorSpace::Rgb, |_| {});
    let restarts = compress(&pixels, 48, 32, ColorSpace::Rgb, |c| {
        c.set_restart_interval(2).unwrap();
    });
    assert!(restarts.len() > plain.len());
    assert_eq!(decode(&plain), decode(&restarts));
}

#[test]
fn subsampling_modes_stay_close_to_flat_source() {
    let pixels = [90u8, 140, 190].repeat(32 * 32);
    for mode in [Subsampling::S444, Subsampling::S422, Subsampling::S420] {
        let bytes = compress(&pixels, 32, 32, ColorSpace::Rgb, |c| {
            c.set_quality(95).unwrap();
            c.set_subsampling(mode).unwrap();
        });
        let decoded = decode(&bytes);
        for px in decoded.chunks_exact(3) {
            assert!((px[0] as i32 - 90).abs() <= 8, "{mode:?}: r was {}", px[0]);
            assert!((px[1] as i32 - 140).abs() <= 8, "{mode:?}: g was {}", px[1]);
            assert!((px[2] as i32 - 190).abs() <= 8, "{mode:?}: b was {}", px[2]);
        }
    }
}

#[test]
fn throttled_sink_produces_identical_stream() {
    let pixels = gradient_rgb(24, 24);
    let reference = compress(&pixels, 24, 24, ColorSpace::Rgb, |_| {});

    let mut c = Compressor::new(ThrottledSink::new());
    c.set_image(24, 24, ColorSpace::Rgb).unwrap();
    c.start_compress().unwrap();
    let rows: Vec<&[u8]> = pixels.chunks_exact(24 * 3).collect();
    let mut done = 0;
    while done < rows.len() {
        let n = c.write_scanlines(&rows[done..]).unwrap();
        done += n;
        if n == 0 {
            c.sink_mut().grant(16);
        }
    }
    while !c.finish_compress().unwrap() {
        c.sink_mut().grant(16);
    }
    assert_eq!(c.into_sink().unwrap().into_bytes(), reference);
}

#[test]
fn chunked_decode_matches_bulk() {
    let pixels = gradient_gray(32, 24);
    let bytes = compress(&pixels, 32, 24, ColorSpace::Grayscale, |c| {
        c.set_progressive(true).unwrap();
    });
    let expected = decode(&bytes);

    let mut d = Decompressor::new();
    let mut chunks = bytes.chunks(7);
    let mut feed_one = |d: &mut Decompressor| match chunks.next() {
        Some(chunk) => d.feed_data(chunk),
        None => d.finish_input(),
    };
    loop {
        match d.read_header().unwrap() {
            InputStatus::HeaderReady => break,
            InputStatus::Suspended => feed_one(&mut d),
            other => panic!("unexpected status {other:?}"),
        }
    }
    while !d.start_decompress().unwrap() {
        feed_one(&mut d);
    }
    let mut decoded = vec![0u8; 32 * 24];
    let mut done = 0;
    while done < 24 {
        let mut rows: Vec<&mut [u8]> =
            decoded[done * 32..].chunks_exact_mut(32).collect();
        let n = d.read_scanlines(&mut rows).unwrap();
        done += n;
        if n == 0 {
            feed_one(&mut d);
        }
    }
    while !d.finish_decompress().unwrap() {
        feed_one(&mut d);
    }
    assert_eq!(decoded, expected);
}

#[test]
fn transcode_preserves_pixels_exactly() {
    let pixels = gradient_gray(16, 16);
    let source = compress(&pixels, 16, 16, ColorSpace::Grayscale, |_| {});
    let expected = decode(&source);

    let mut d = Decompressor::new();
    d.feed_data(&source);
    d.finish_input();
    assert_eq!(d.read_header().unwrap(), InputStatus::HeaderReady);

    let mut c = Compressor::new(Vec::new());
    c.set_image(16, 16, ColorSpace::Grayscale).unwrap();
    {
        let src_arrays = d.read_coefficients().unwrap().unwrap();
        let dst_arrays = c.write_coefficients().unwrap();
        for (src, dst) in src_arrays.iter_mut().zip(dst_arrays.iter_mut()) {
            let src_win = src.access(0, 2).unwrap();
            let mut dst_win = dst.access(0, 2).unwrap();
            for y in 0..2 {
                dst_win.row_mut(y).copy_from_slice(src_win.row(y));
            }
        }
    }
    assert!(d.finish_decompress().unwrap());
    assert!(c.finish_compress().unwrap());
    let transcoded = c.into_sink().unwrap();

    // Same coefficients and tables, so the decoded pixels are identical.
    assert_eq!(decode(&transcoded), expected);
}
