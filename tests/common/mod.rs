#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use powermon_display::{
    FrameBuffer, ImageApiConfig, ImageUploadCoordinator, LayerVisibility, ManualClock,
};

pub const RED: [u8; 3] = [220, 30, 30];
pub const GREEN: [u8; 3] = [30, 200, 40];
pub const BLUE: [u8; 3] = [20, 40, 210];

pub fn solid(width: u16, height: u16, rgb: [u8; 3]) -> Vec<u8> {
    rgb.iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 3)
        .collect()
}

/// Red ramps across, blue ramps down, green along the diagonal
pub fn gradient(width: u16, height: u16) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            rgb.push((x * 255 / (w - 1).max(1)) as u8);
            rgb.push(((x + y) * 255 / (w + h - 2).max(1)) as u8);
            rgb.push((y * 255 / (h - 1).max(1)) as u8);
        }
    }
    rgb
}

pub fn encode(rgb: &[u8], width: u16, height: u16, sampling: SamplingFactor) -> Vec<u8> {
    let mut out = Vec::new();
    let mut encoder = Encoder::new(&mut out, 95);
    encoder.set_sampling_factor(sampling);
    encoder.encode(rgb, width, height, ColorType::Rgb).unwrap();
    out
}

pub fn solid_jpeg(width: u16, height: u16, rgb: [u8; 3]) -> Vec<u8> {
    encode(&solid(width, height, rgb), width, height, SamplingFactor::F_2_2)
}

pub fn gray_jpeg(width: u16, height: u16, level: u8) -> Vec<u8> {
    let mut out = Vec::new();
    let encoder = Encoder::new(&mut out, 95);
    encoder
        .encode(&vec![level; width as usize * height as usize], width, height, ColorType::Luma)
        .unwrap();
    out
}

pub fn progressive_jpeg(width: u16, height: u16) -> Vec<u8> {
    let mut out = Vec::new();
    let mut encoder = Encoder::new(&mut out, 90);
    encoder.set_progressive(true);
    encoder
        .encode(&solid(width, height, RED), width, height, ColorType::Rgb)
        .unwrap();
    out
}

/// Headers intact, entropy-coded data cut short
pub fn truncated(jpeg: &[u8]) -> Vec<u8> {
    let sos = jpeg.windows(2).position(|w| w == [0xFF, 0xDA]).unwrap();
    jpeg[..sos + 20].to_vec()
}

/// Unpack a BGR565 pixel to its 5/6/5 bit channels (r, g, b)
pub fn bgr565_channels(pixel: u16) -> (u16, u16, u16) {
    (pixel & 0x1F, (pixel >> 5) & 0x3F, pixel >> 11)
}

pub fn assert_bgr565_close(pixel: u16, rgb: [u8; 3]) {
    let (r, g, b) = bgr565_channels(pixel);
    let expected = ((rgb[0] >> 3) as u16, (rgb[1] >> 2) as u16, (rgb[2] >> 3) as u16);
    assert!(
        r.abs_diff(expected.0) <= 1 && g.abs_diff(expected.1) <= 2 && b.abs_diff(expected.2) <= 1,
        "pixel {pixel:#06x} ({r},{g},{b}) not close to {expected:?}"
    );
}

pub struct Rig {
    pub coordinator: Arc<ImageUploadCoordinator>,
    pub panel: Arc<Mutex<FrameBuffer>>,
    pub widgets: LayerVisibility,
    pub clock: Arc<ManualClock>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(ImageApiConfig::default())
    }

    pub fn with_config(config: ImageApiConfig) -> Self {
        let panel = Arc::new(Mutex::new(FrameBuffer::new(config.lcd_width, config.lcd_height)));
        let widgets = LayerVisibility::new();
        let clock = Arc::new(ManualClock::new(0));
        let coordinator = ImageUploadCoordinator::new(config, Box::new(panel.clone()), Box::new(widgets.clone()))
            .unwrap()
            .with_clock(clock.clone());
        Self {
            coordinator: Arc::new(coordinator),
            panel,
            widgets,
            clock,
        }
    }

    pub fn pixel(&self, x: u16, y: u16) -> u16 {
        self.panel.lock().unwrap().pixel(x, y)
    }
}
