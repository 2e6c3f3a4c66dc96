//! Display collaborators: the pixel surface and the widget layer.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

use anyhow::{anyhow, Result};
use embedded_graphics::{
    pixelcolor::{raw::RawU16, PixelColor},
    prelude::*,
    primitives::Rectangle,
};

/// A panel that takes packed 16-bit pixels.
pub trait DisplaySurface {
    fn width(&self) -> u16;
    fn height(&self) -> u16;
    /// Region targeted by the following pixel writes, end coordinates inclusive
    fn set_window(&mut self, x0: u16, y0: u16, x1: u16, y1: u16) -> Result<()>;
    /// Blit `width * height` packed pixels with the top left corner at (x, y)
    fn write_row(&mut self, x: u16, y: u16, width: u16, height: u16, pixels: &[u16]) -> Result<()>;
    fn set_backlight(&mut self, percent: u8) -> Result<()>;
}

/// Hide/show the general UI so direct pixel writes are not overdrawn
pub trait ScreenLayer {
    fn obscure(&mut self);
    fn restore(&mut self);
}

impl<S: DisplaySurface> DisplaySurface for Arc<Mutex<S>> {
    fn width(&self) -> u16 {
        self.lock().unwrap_or_else(PoisonError::into_inner).width()
    }

    fn height(&self) -> u16 {
        self.lock().unwrap_or_else(PoisonError::into_inner).height()
    }

    fn set_window(&mut self, x0: u16, y0: u16, x1: u16, y1: u16) -> Result<()> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_window(x0, y0, x1, y1)
    }

    fn write_row(&mut self, x: u16, y: u16, width: u16, height: u16, pixels: &[u16]) -> Result<()> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_row(x, y, width, height, pixels)
    }

    fn set_backlight(&mut self, percent: u8) -> Result<()> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_backlight(percent)
    }
}

fn check_region(panel: (u16, u16), x: u16, y: u16, width: u16, height: u16, pixels: usize) -> Result<()> {
    if x as u32 + width as u32 > panel.0 as u32 || y as u32 + height as u32 > panel.1 as u32 {
        return Err(anyhow!(
            "region {width}x{height}@({x},{y}) outside of {}x{} panel",
            panel.0,
            panel.1
        ));
    }
    if pixels != width as usize * height as usize {
        return Err(anyhow!("error: pixels.len() != width*height ({pixels} != {width}*{height})"));
    }
    Ok(())
}

/// In-memory panel, used off-device and for checking what was drawn.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    width: u16,
    height: u16,
    pixels: Vec<u16>,
    window: Option<(u16, u16, u16, u16)>,
    backlight: u8,
    writes: usize,
}

impl FrameBuffer {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
            window: None,
            backlight: 100,
            writes: 0,
        }
    }

    pub fn pixel(&self, x: u16, y: u16) -> u16 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    pub fn row(&self, y: u16) -> &[u16] {
        let start = y as usize * self.width as usize;
        &self.pixels[start..start + self.width as usize]
    }

    pub fn fill(&mut self, color: u16) {
        self.pixels.fill(color);
    }

    pub fn window(&self) -> Option<(u16, u16, u16, u16)> {
        self.window
    }

    pub fn backlight(&self) -> u8 {
        self.backlight
    }

    /// Number of `write_row` calls that reached the panel
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl DisplaySurface for FrameBuffer {
    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn set_window(&mut self, x0: u16, y0: u16, x1: u16, y1: u16) -> Result<()> {
        if x0 > x1 || y0 > y1 || x1 >= self.width || y1 >= self.height {
            return Err(anyhow!("invalid window ({x0},{y0})-({x1},{y1})"));
        }
        self.window = Some((x0, y0, x1, y1));
        Ok(())
    }

    fn write_row(&mut self, x: u16, y: u16, width: u16, height: u16, pixels: &[u16]) -> Result<()> {
        check_region((self.width, self.height), x, y, width, height, pixels.len())?;
        for (row, line) in pixels.chunks_exact(width as usize).enumerate() {
            let start = (y as usize + row) * self.width as usize + x as usize;
            self.pixels[start..start + width as usize].copy_from_slice(line);
        }
        self.writes += 1;
        Ok(())
    }

    fn set_backlight(&mut self, percent: u8) -> Result<()> {
        self.backlight = percent.min(100);
        Ok(())
    }
}

/// Drives any embedded-graphics target with 16-bit colors, e.g. a mipidsi
/// display. Packed pixels are handed over as raw storage, so the caller's
/// pixel order has to match the color type of the target.
pub struct DrawTargetSurface<D> {
    target: D,
    backlight: u8,
    backlight_fn: Option<Box<dyn FnMut(u8) -> Result<()> + Send>>,
}

impl<D> DrawTargetSurface<D>
where
    D: DrawTarget,
    D::Color: PixelColor + From<RawU16>,
    D::Error: core::fmt::Debug,
{
    pub fn new(target: D) -> Self {
        Self {
            target,
            backlight: 100,
            backlight_fn: None,
        }
    }

    /// Hook for the PWM channel driving the backlight
    pub fn with_backlight<F>(mut self, backlight_fn: F) -> Self
    where
        F: FnMut(u8) -> Result<()> + Send + 'static,
    {
        self.backlight_fn = Some(Box::new(backlight_fn));
        self
    }

    pub fn target(&self) -> &D {
        &self.target
    }

    pub fn into_inner(self) -> D {
        self.target
    }

    fn panel_size(&self) -> (u16, u16) {
        let size = self.target.bounding_box().size;
        (size.width.min(u16::MAX as u32) as u16, size.height.min(u16::MAX as u32) as u16)
    }
}

impl<D> DisplaySurface for DrawTargetSurface<D>
where
    D: DrawTarget,
    D::Color: PixelColor + From<RawU16>,
    D::Error: core::fmt::Debug,
{
    fn width(&self) -> u16 {
        self.panel_size().0
    }

    fn height(&self) -> u16 {
        self.panel_size().1
    }

    fn set_window(&mut self, x0: u16, y0: u16, x1: u16, y1: u16) -> Result<()> {
        let (w, h) = self.panel_size();
        if x0 > x1 || y0 > y1 || x1 >= w || y1 >= h {
            return Err(anyhow!("invalid window ({x0},{y0})-({x1},{y1})"));
        }
        // embedded-graphics addresses every fill by its own rectangle
        Ok(())
    }

    fn write_row(&mut self, x: u16, y: u16, width: u16, height: u16, pixels: &[u16]) -> Result<()> {
        check_region(self.panel_size(), x, y, width, height, pixels.len())?;
        let area = Rectangle::new(
            Point::new(x as i32, y as i32),
            Size::new(width as u32, height as u32),
        );
        self.target
            .fill_contiguous(&area, pixels.iter().map(|&p| D::Color::from(RawU16::new(p))))
            .map_err(|err| anyhow!("draw error:{err:?}"))
    }

    fn set_backlight(&mut self, percent: u8) -> Result<()> {
        let percent = percent.min(100);
        if let Some(backlight_fn) = self.backlight_fn.as_mut() {
            backlight_fn(percent)?;
        }
        self.backlight = percent;
        Ok(())
    }
}

/// Visibility switch of the widget layer.
///
/// Clones share the flag: the image screen obscures and restores it, the
/// widget renderer checks `is_obscured()` before drawing a frame.
#[derive(Debug, Clone, Default)]
pub struct LayerVisibility {
    obscured: Arc<AtomicBool>,
}

impl LayerVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_obscured(&self) -> bool {
        self.obscured.load(Ordering::SeqCst)
    }
}

impl ScreenLayer for LayerVisibility {
    fn obscure(&mut self) {
        self.obscured.store(true, Ordering::SeqCst);
    }

    fn restore(&mut self) {
        self.obscured.store(false, Ordering::SeqCst);
    }
}
