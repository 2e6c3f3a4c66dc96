//! RGB888 to packed 16-bit pixels

use embedded_graphics::pixelcolor::{Bgr565, IntoStorage, Rgb565};
use serde::{Deserialize, Serialize};

/// Channel order of the packed pixels written to the panel.
///
/// The ST7789 expects BGR; RGB is kept for panels (or a rendering path)
/// that swap the channels somewhere else.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelOrder {
    /// `BBBBBGGG GGGRRRRR`
    #[default]
    Bgr565,
    /// `RRRRRGGG GGGBBBBB`
    Rgb565,
}

impl PixelOrder {
    #[inline(always)]
    pub fn pack(self, r: u8, g: u8, b: u8) -> u16 {
        match self {
            PixelOrder::Bgr565 => Bgr565::new(r >> 3, g >> 2, b >> 3).into_storage(),
            PixelOrder::Rgb565 => Rgb565::new(r >> 3, g >> 2, b >> 3).into_storage(),
        }
    }

    /// Pack a run of RGB888 triples into `out`, returns the number of pixels written
    pub fn pack_row(self, rgb: &[u8], out: &mut [u16]) -> usize {
        let mut n = 0;
        for (dst, px) in out.iter_mut().zip(rgb.chunks_exact(3)) {
            *dst = self.pack(px[0], px[1], px[2]);
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_matches_bit_layout() {
        for &(r, g, b) in &[(255u8, 0u8, 0u8), (0, 255, 0), (0, 0, 255), (200, 123, 37), (7, 3, 7)] {
            let rgb = ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3);
            let bgr = ((b as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (r as u16 >> 3);
            assert_eq!(PixelOrder::Rgb565.pack(r, g, b), rgb);
            assert_eq!(PixelOrder::Bgr565.pack(r, g, b), bgr);
        }
    }

    #[test]
    fn test_pure_colors() {
        assert_eq!(PixelOrder::Rgb565.pack(255, 0, 0), 0xF800);
        assert_eq!(PixelOrder::Bgr565.pack(255, 0, 0), 0x001F);
        assert_eq!(PixelOrder::Bgr565.pack(0, 0, 255), 0xF800);
        assert_eq!(PixelOrder::Rgb565.pack(0, 255, 0), 0x07E0);
    }

    #[test]
    fn test_pack_row_stops_at_shorter_side() {
        let rgb = [255, 255, 255, 0, 0, 0, 255, 0, 0];
        let mut out = [0u16; 2];
        assert_eq!(PixelOrder::Rgb565.pack_row(&rgb, &mut out), 2);
        assert_eq!(out, [0xFFFF, 0x0000]);
    }
}
