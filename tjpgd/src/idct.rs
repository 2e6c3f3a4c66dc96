//! Fixed-point AAN inverse DCT

const M13: i32 = (1.41421 * 4096.0) as i32;
const M2: i32 = (1.08239 * 4096.0) as i32;
const M4: i32 = (2.61313 * 4096.0) as i32;
const M5: i32 = (1.84776 * 4096.0) as i32;

/// One 8-point pass over `src[base + k * stride]`, results written back in place
#[inline(always)]
fn idct_1d(src: &mut [i32; 64], base: usize, stride: usize, dc_offset: i32) {
    let at = |k: usize| base + k * stride;

    // Even part
    let mut v0 = src[at(0)] + dc_offset;
    let mut v1 = src[at(2)];
    let mut v2 = src[at(4)];
    let mut v3 = src[at(6)];

    let t10 = v0 + v2;
    let t12 = v0 - v2;
    let mut t11 = (v1 - v3) * M13 >> 12;
    v3 += v1;
    t11 -= v3;
    v0 = t10 + v3;
    v3 = t10 - v3;
    v1 = t11 + t12;
    v2 = t12 - t11;

    // Odd part
    let mut v4 = src[at(7)];
    let mut v5 = src[at(1)];
    let mut v6 = src[at(5)];
    let mut v7 = src[at(3)];

    let t10 = v5 - v4;
    let t11 = v5 + v4;
    let t12 = v6 - v7;
    v7 += v6;
    v5 = (t11 - v7) * M13 >> 12;
    v7 += t11;
    let t13 = (t10 + t12) * M5 >> 12;
    v4 = t13 - (t10 * M2 >> 12);
    v6 = t13 - (t12 * M4 >> 12) - v7;
    v5 -= v6;
    v4 -= v5;

    src[at(0)] = v0 + v7;
    src[at(7)] = v0 - v7;
    src[at(1)] = v1 + v6;
    src[at(6)] = v1 - v6;
    src[at(2)] = v2 + v5;
    src[at(5)] = v2 - v5;
    src[at(3)] = v3 + v4;
    src[at(4)] = v3 - v4;
}

/// Inverse DCT of one dequantized block (raster order, Arai-prescaled).
/// Output samples are level shifted (+128) but not clipped.
pub fn block_idct(src: &mut [i32; 64], dst: &mut [i16]) {
    for col in 0..8 {
        idct_1d(src, col, 8, 0);
    }
    for row in 0..8 {
        // The DC offset removes the -128 level shift
        idct_1d(src, row * 8, 1, 128 << 8);
    }
    for (out, &v) in dst.iter_mut().zip(src.iter()) {
        *out = (v >> 8) as i16;
    }
}
