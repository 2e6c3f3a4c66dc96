//! Decodes JPEG strips straight onto the display surface.
//!
//! A session fixes the image size and keeps a vertical cursor. Each strip is
//! decoded on its own and written row by row at the cursor, so the only
//! memory in use is the decoder scratch and a single converted row.

use log::{error, info};
use tjpgd::{JpegDecoder, Rectangle, MAX_MCU_BUFFER_SIZE, MAX_WORK_BUFFER_SIZE};

use crate::{display::DisplaySurface, error::ImageApiError, pixel::PixelOrder};

/// Result of one decoded strip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFragment {
    pub width: u16,
    pub height: u16,
    /// Session cursor after this strip
    pub cursor: u16,
}

#[derive(Debug, Default)]
pub struct StripDecodeSession {
    width: u16,
    height: u16,
    cursor: u16,
    active: bool,
}

/// Working memory of one decode pass, dropped on every exit path
struct DecodeBuffers {
    mcu: Vec<i16>,
    work: Vec<u8>,
    line: Vec<u16>,
}

impl DecodeBuffers {
    fn allocate(line_width: u16) -> Result<Self, ImageApiError> {
        Ok(Self {
            mcu: try_alloc(MAX_MCU_BUFFER_SIZE, "decoder MCU buffer")?,
            work: try_alloc(MAX_WORK_BUFFER_SIZE, "decoder work buffer")?,
            line: try_alloc(line_width as usize, "line buffer")?,
        })
    }
}

fn try_alloc<T: Clone + Default>(len: usize, what: &str) -> Result<Vec<T>, ImageApiError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| {
        error!("Failed to allocate {what} ({len} elements)");
        ImageApiError::InsufficientResources(format!("failed to allocate {what}"))
    })?;
    buf.resize(len, T::default());
    Ok(buf)
}

impl StripDecodeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.cursor = 0;
        self.active = true;
        info!("Strip session started: {width}x{height}");
    }

    pub fn end(&mut self) {
        if self.active {
            info!("Strip session ended at Y={}", self.cursor);
        }
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    /// Rows of the image not drawn yet
    pub fn remaining(&self) -> u16 {
        self.height.saturating_sub(self.cursor)
    }

    /// Decode one strip and draw it at the cursor.
    ///
    /// On failure the cursor stays where it was; rows already written to the
    /// surface are not taken back.
    pub fn decode_fragment(
        &mut self,
        surface: &mut dyn DisplaySurface,
        jpeg: &[u8],
        strip_index: u16,
        order: PixelOrder,
    ) -> Result<DecodedFragment, ImageApiError> {
        if !self.active {
            return Err(ImageApiError::Decode("no active strip session".to_string()));
        }
        let mut buffers = DecodeBuffers::allocate(self.width)?;
        let DecodeBuffers { mcu, work, line } = &mut buffers;

        let mut offset = 0usize;
        let mut input = |buf: &mut [u8]| {
            let n = buf.len().min(jpeg.len() - offset);
            buf[..n].copy_from_slice(&jpeg[offset..offset + n]);
            offset += n;
            n
        };

        let mut decoder = JpegDecoder::new();
        if let Err(err) = decoder.prepare(&mut input) {
            error!("Strip {strip_index}: jd_prepare failed: {err}");
            return Err(err.into());
        }
        info!(
            "Strip {strip_index}: Y={}, {}x{}, {} bytes",
            self.cursor,
            decoder.width(),
            decoder.height(),
            jpeg.len()
        );

        let (panel_width, panel_height) = (surface.width() as u32, surface.height() as u32);
        let y_offset = self.cursor as u32;
        let mut fault: Option<String> = None;

        let result = decoder.decompress_with_buffers(&mut input, mcu, work, &mut |rgb: &[u8], rect: &Rectangle| {
            let line_width = rect.width() as usize;
            if line_width > line.len() {
                fault = Some(format!("block width {line_width} exceeds line buffer {}", line.len()));
                return false;
            }
            for (row, src) in rgb.chunks_exact(line_width * 3).enumerate() {
                let lcd_x = rect.left as u32;
                let lcd_y = y_offset + rect.top as u32 + row as u32;
                if lcd_x + line_width as u32 > panel_width || lcd_y >= panel_height {
                    fault = Some(format!(
                        "row {line_width}px at ({lcd_x},{lcd_y}) outside of {panel_width}x{panel_height} panel"
                    ));
                    return false;
                }
                order.pack_row(src, &mut line[..line_width]);
                if let Err(err) = surface.write_row(lcd_x as u16, lcd_y as u16, line_width as u16, 1, &line[..line_width]) {
                    fault = Some(format!("display write failed: {err:?}"));
                    return false;
                }
            }
            true
        });

        match result {
            Ok(()) => {
                self.cursor = self.cursor.saturating_add(decoder.height());
                Ok(DecodedFragment {
                    width: decoder.width(),
                    height: decoder.height(),
                    cursor: self.cursor,
                })
            }
            Err(tjpgd::Error::Interrupted) => {
                let reason = fault.unwrap_or_else(|| "decode interrupted".to_string());
                error!("Strip {strip_index}: {reason}");
                Err(ImageApiError::Decode(reason))
            }
            Err(err) => {
                error!("Strip {strip_index}: jd_decomp failed: {err}");
                Err(err.into())
            }
        }
    }
}
