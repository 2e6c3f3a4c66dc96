//! The screen shown while an uploaded image occupies the panel.

use log::info;

use crate::{
    display::{DisplaySurface, ScreenLayer},
    error::ImageApiError,
    pixel::PixelOrder,
    strip_decoder::{DecodedFragment, StripDecodeSession},
};

pub struct DirectImageScreen {
    surface: Box<dyn DisplaySurface + Send>,
    layer: Box<dyn ScreenLayer + Send>,
    session: StripDecodeSession,
    visible: bool,
    display_start_time: Option<u64>,
    display_timeout_ms: u64,
}

impl DirectImageScreen {
    pub fn new(
        surface: Box<dyn DisplaySurface + Send>,
        layer: Box<dyn ScreenLayer + Send>,
        display_timeout_ms: u64,
    ) -> Self {
        Self {
            surface,
            layer,
            session: StripDecodeSession::new(),
            visible: false,
            display_start_time: None,
            display_timeout_ms,
        }
    }

    /// Take over the panel. Keeps an already recorded start time.
    pub fn show(&mut self, now_ms: u64) {
        if !self.visible {
            self.layer.obscure();
            self.visible = true;
        }
        if self.display_start_time.is_none() {
            self.display_start_time = Some(now_ms);
        }
    }

    /// Give the panel back to the widget layer
    pub fn hide(&mut self) {
        self.session.end();
        self.display_start_time = None;
        if self.visible {
            self.visible = false;
            self.layer.restore();
            info!("Direct image hidden");
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// 0 disables the automatic dismiss
    pub fn set_timeout(&mut self, timeout_ms: u64) {
        self.display_timeout_ms = timeout_ms;
    }

    pub fn timeout_ms(&self) -> u64 {
        self.display_timeout_ms
    }

    pub fn set_start_time(&mut self, start_ms: u64) {
        self.display_start_time = Some(start_ms);
    }

    pub fn start_time(&self) -> Option<u64> {
        self.display_start_time
    }

    pub fn is_timeout_expired(&self, now_ms: u64) -> bool {
        match self.display_start_time {
            Some(start) if self.display_timeout_ms > 0 => now_ms.saturating_sub(start) >= self.display_timeout_ms,
            _ => false,
        }
    }

    pub fn begin_strip_session(&mut self, width: u16, height: u16) {
        self.session.begin(width, height);
    }

    pub fn decode_strip(&mut self, jpeg: &[u8], strip_index: u16, order: PixelOrder) -> Result<DecodedFragment, ImageApiError> {
        self.session
            .decode_fragment(self.surface.as_mut(), jpeg, strip_index, order)
    }

    pub fn end_strip_session(&mut self) {
        self.session.end();
    }

    pub fn session(&self) -> &StripDecodeSession {
        &self.session
    }

    pub fn surface_mut(&mut self) -> &mut (dyn DisplaySurface + Send) {
        self.surface.as_mut()
    }

    pub fn panel_size(&self) -> (u16, u16) {
        (self.surface.width(), self.surface.height())
    }
}
