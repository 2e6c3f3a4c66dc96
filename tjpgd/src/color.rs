//! YCbCr to RGB888 conversion of one decoded MCU

const CVACC: i32 = 1024;
const CR_TO_R: i32 = (1.402 * CVACC as f32) as i32;
const CB_TO_G: i32 = (0.344 * CVACC as f32) as i32;
const CR_TO_G: i32 = (0.714 * CVACC as f32) as i32;
const CB_TO_B: i32 = (1.772 * CVACC as f32) as i32;

#[inline(always)]
fn clip(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert an MCU laid out as `mcu_w * mcu_h` Y blocks followed by one Cb and
/// one Cr block. Output rows are `mcu_w * 8` pixels wide.
pub fn mcu_to_rgb(mcu: &[i16], out: &mut [u8], mcu_w: usize, mcu_h: usize) {
    let (luma, chroma) = mcu.split_at(mcu_w * mcu_h * 64);
    let (cb_block, cr_block) = chroma.split_at(64);

    let mut o = 0;
    for y in 0..mcu_h * 8 {
        for x in 0..mcu_w * 8 {
            let block = (y / 8) * mcu_w + x / 8;
            let yy = luma[block * 64 + (y % 8) * 8 + x % 8] as i32;
            let c = (y / mcu_h) * 8 + x / mcu_w;
            let cb = cb_block[c] as i32 - 128;
            let cr = cr_block[c] as i32 - 128;

            out[o] = clip(yy + CR_TO_R * cr / CVACC);
            out[o + 1] = clip(yy - (CB_TO_G * cb + CR_TO_G * cr) / CVACC);
            out[o + 2] = clip(yy + CB_TO_B * cb / CVACC);
            o += 3;
        }
    }
}

/// Grayscale MCU (one 8x8 block), replicated into three channels
pub fn mcu_to_grayscale(mcu: &[i16], out: &mut [u8]) {
    for (px, &yy) in out.chunks_exact_mut(3).zip(mcu[..64].iter()) {
        let v = clip(yy as i32);
        px.fill(v);
    }
}
