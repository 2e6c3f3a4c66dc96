use anyhow::{anyhow, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::pixel::PixelOrder;

#[derive(Serialize, Deserialize, PartialEq, Clone, Copy, Debug, Default)]
pub enum DisplayColorOrder {
    /// RGB subpixel order.
    Rgb,
    /// BGR subpixel order.
    #[default]
    Bgr,
}

impl From<DisplayColorOrder> for PixelOrder {
    fn from(order: DisplayColorOrder) -> Self {
        match order {
            DisplayColorOrder::Rgb => PixelOrder::Rgb565,
            DisplayColorOrder::Bgr => PixelOrder::Bgr565,
        }
    }
}

impl From<PixelOrder> for DisplayColorOrder {
    fn from(order: PixelOrder) -> Self {
        match order {
            PixelOrder::Rgb565 => DisplayColorOrder::Rgb,
            PixelOrder::Bgr565 => DisplayColorOrder::Bgr,
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct ImageApiConfig {
    #[serde(default = "default_lcd_width")]
    pub lcd_width: u16,
    #[serde(default = "default_lcd_height")]
    pub lcd_height: u16,
    /// Largest whole-image upload accepted
    #[serde(default = "default_max_image_size")]
    pub max_image_size_bytes: usize,
    /// Free memory required on top of the upload itself
    #[serde(default = "default_decode_headroom")]
    pub decode_headroom_bytes: usize,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    /// How long a new upload waits for the one still receiving
    #[serde(default = "default_upload_wait_ms")]
    pub upload_wait_ms: u64,
    /// A receiving upload silent for this long is given up
    #[serde(default = "default_stale_upload_ms")]
    pub stale_upload_ms: u64,
    #[serde(default)]
    pub color_order: DisplayColorOrder,
    /// Leave rows drawn before a decode failure on screen
    #[serde(default = "default_keep_partial")]
    pub keep_partial_on_error: bool,
    /// Backlight level applied at start-up, 0-100
    #[serde(default = "default_brightness")]
    pub brightness: u8,
}

fn default_lcd_width() -> u16 { 240 }
fn default_lcd_height() -> u16 { 280 }
fn default_max_image_size() -> usize { 100 * 1024 }
fn default_decode_headroom() -> usize { 50 * 1024 }
fn default_timeout_ms() -> u64 { 10_000 }
fn default_max_timeout_ms() -> u64 { 24 * 60 * 60 * 1000 }
fn default_upload_wait_ms() -> u64 { 1000 }
fn default_stale_upload_ms() -> u64 { 5000 }
fn default_keep_partial() -> bool { true }
fn default_brightness() -> u8 { 100 }

impl Default for ImageApiConfig {
    fn default() -> Self {
        Self {
            lcd_width: default_lcd_width(),
            lcd_height: default_lcd_height(),
            max_image_size_bytes: default_max_image_size(),
            decode_headroom_bytes: default_decode_headroom(),
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            upload_wait_ms: default_upload_wait_ms(),
            stale_upload_ms: default_stale_upload_ms(),
            color_order: DisplayColorOrder::default(),
            keep_partial_on_error: default_keep_partial(),
            brightness: default_brightness(),
        }
    }
}

impl ImageApiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lcd_width == 0 || self.lcd_height == 0 {
            return Err(anyhow!("invalid panel size {}x{}", self.lcd_width, self.lcd_height));
        }
        if self.max_image_size_bytes == 0 {
            return Err(anyhow!("max_image_size_bytes must be nonzero"));
        }
        if self.default_timeout_ms > self.max_timeout_ms {
            return Err(anyhow!(
                "default_timeout_ms {} exceeds max_timeout_ms {}",
                self.default_timeout_ms,
                self.max_timeout_ms
            ));
        }
        if self.brightness > 100 {
            return Err(anyhow!("brightness {} out of range 0-100", self.brightness));
        }
        Ok(())
    }

    /// Requested dismiss timeout, `None` for the default. 0 means never.
    pub fn resolve_timeout(&self, requested_ms: Option<u64>) -> u64 {
        match requested_ms {
            None => self.default_timeout_ms,
            Some(ms) => ms.min(self.max_timeout_ms),
        }
    }

    pub fn pixel_order(&self) -> PixelOrder {
        self.color_order.into()
    }
}

pub fn parse_image_api_config(data: Vec<u8>) -> Result<ImageApiConfig> {
    let data_str = String::from_utf8(data)?;
    info!("Receive Data:{data_str}");
    let config = serde_json::from_str::<ImageApiConfig>(&data_str)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ImageApiConfig::default();
        assert_eq!((config.lcd_width, config.lcd_height), (240, 280));
        assert_eq!(config.max_image_size_bytes, 102_400);
        assert_eq!(config.decode_headroom_bytes, 51_200);
        assert_eq!(config.max_timeout_ms, 86_400_000);
        assert_eq!(config.pixel_order(), PixelOrder::Bgr565);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_json() {
        let config = parse_image_api_config(br#"{"lcd_height": 320, "color_order": "Rgb"}"#.to_vec()).unwrap();
        assert_eq!(config.lcd_height, 320);
        assert_eq!(config.lcd_width, 240);
        assert_eq!(config.pixel_order(), PixelOrder::Rgb565);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(parse_image_api_config(br#"{"lcd_width": 0}"#.to_vec()).is_err());
        assert!(parse_image_api_config(br#"{"default_timeout_ms": 90000000}"#.to_vec()).is_err());
        assert!(parse_image_api_config(b"not json".to_vec()).is_err());
    }

    #[test]
    fn test_resolve_timeout() {
        let config = ImageApiConfig::default();
        assert_eq!(config.resolve_timeout(None), 10_000);
        assert_eq!(config.resolve_timeout(Some(0)), 0);
        assert_eq!(config.resolve_timeout(Some(u64::MAX)), 86_400_000);
    }
}
