//! Structural preflight of JPEG data.
//!
//! Walks the marker segments up to the start of scan, pulls the frame header
//! out and checks it against what the strip decoder can draw. Nothing is
//! allocated and nothing is decoded, so an upload can be turned away before
//! any buffer is committed or the screen is touched.

use log::warn;
use thiserror::Error;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const TEM: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEncoding {
    Baseline,
    Progressive,
    /// Extended sequential, lossless, arithmetic and the hierarchical frames
    Other(u8),
}

impl FrameEncoding {
    fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            0xC0 => Some(FrameEncoding::Baseline),
            0xC2 | 0xC6 | 0xCA | 0xCE => Some(FrameEncoding::Progressive),
            // C4 = DHT, C8 = JPG, CC = DAC
            0xC4 | 0xC8 | 0xCC => None,
            0xC1..=0xCF => Some(FrameEncoding::Other(marker)),
            _ => None,
        }
    }
}

/// What the frame header says about the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegFrameInfo {
    pub encoding: FrameEncoding,
    pub width: u16,
    pub height: u16,
    pub component_count: u8,
    /// (horizontal, vertical) sampling of the first three components
    pub sampling: [(u8, u8); 3],
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreflightError {
    #[error("no JPEG frame header found (missing SOI or SOF marker)")]
    NoFrameHeader,
    #[error("progressive encoding is not supported; use baseline JPEG")]
    Progressive,
    #[error("unsupported JPEG frame type SOF{0}; use baseline JPEG")]
    UnsupportedFrame(u8),
    #[error("width mismatch: expected {expected}, got {actual}")]
    WidthMismatch { expected: u16, actual: u16 },
    #[error("height mismatch: expected {expected}, got {actual}")]
    HeightMismatch { expected: u16, actual: u16 },
    #[error("strip height must be nonzero")]
    ZeroHeight,
    #[error("strip height {height} exceeds remaining image height {remaining}")]
    ExceedsRemaining { height: u16, remaining: u16 },
    #[error("strip height {height} exceeds panel height {panel}")]
    ExceedsPanel { height: u16, panel: u16 },
    #[error("unsupported component count {0}; expected 1 (grayscale) or 3 (YCbCr)")]
    ComponentCount(u8),
    #[error("unsupported chroma sampling {h}x{v} on component {component}; chroma must be 1x1")]
    ChromaSampling { component: u8, h: u8, v: u8 },
    #[error("unsupported luma subsampling {h}x{v}; supported are 1x1, 2x1 and 2x2")]
    LumaSampling { h: u8, v: u8 },
}

enum HeightRule {
    /// Whole image: exactly one panel high
    Exact { panel: u16 },
    Fragment { remaining: u16, panel: u16 },
}

/// Find the frame header. `None` when the data is not a JPEG or ends before a
/// frame header shows up.
pub fn scan_frame_header(data: &[u8]) -> Option<JpegFrameInfo> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != SOI {
        return None;
    }
    let mut pos = 2;
    loop {
        if *data.get(pos)? != 0xFF {
            return None;
        }
        while *data.get(pos)? == 0xFF {
            pos += 1;
        }
        let marker = data[pos];
        pos += 1;

        match marker {
            TEM | 0xD0..=0xD7 => continue,
            SOS | EOI => return None,
            _ => {}
        }

        let length = u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]) as usize;
        if length < 2 {
            return None;
        }
        let segment = data.get(pos + 2..pos + length)?;
        if let Some(encoding) = FrameEncoding::from_marker(marker) {
            return parse_frame_header(encoding, segment);
        }
        pos += length;
    }
}

fn parse_frame_header(encoding: FrameEncoding, segment: &[u8]) -> Option<JpegFrameInfo> {
    if segment.len() < 6 {
        return None;
    }
    let height = u16::from_be_bytes([segment[1], segment[2]]);
    let width = u16::from_be_bytes([segment[3], segment[4]]);
    let component_count = segment[5];
    let components = segment.get(6..6 + component_count as usize * 3)?;

    let mut sampling = [(0, 0); 3];
    for (slot, comp) in sampling.iter_mut().zip(components.chunks_exact(3)) {
        *slot = (comp[1] >> 4, comp[1] & 0x0F);
    }
    Some(JpegFrameInfo {
        encoding,
        width,
        height,
        component_count,
        sampling,
    })
}

/// Preflight for a whole image, which must cover the panel exactly
pub fn validate_full_frame(data: &[u8], expected_width: u16, panel_height: u16) -> Result<JpegFrameInfo, PreflightError> {
    validate(data, expected_width, HeightRule::Exact { panel: panel_height })
}

/// Preflight for one strip of an image being drawn top to bottom
pub fn validate_fragment(
    data: &[u8],
    expected_width: u16,
    remaining_height: u16,
    panel_height: u16,
) -> Result<JpegFrameInfo, PreflightError> {
    validate(
        data,
        expected_width,
        HeightRule::Fragment {
            remaining: remaining_height,
            panel: panel_height,
        },
    )
}

fn validate(data: &[u8], expected_width: u16, rule: HeightRule) -> Result<JpegFrameInfo, PreflightError> {
    let info = scan_frame_header(data).ok_or(PreflightError::NoFrameHeader)?;
    let result = check(&info, expected_width, rule);
    if let Err(err) = &result {
        warn!("JPEG preflight rejected {}x{} image: {err}", info.width, info.height);
    }
    result.map(|_| info)
}

fn check(info: &JpegFrameInfo, expected_width: u16, rule: HeightRule) -> Result<(), PreflightError> {
    match info.encoding {
        FrameEncoding::Baseline => {}
        FrameEncoding::Progressive => return Err(PreflightError::Progressive),
        FrameEncoding::Other(marker) => return Err(PreflightError::UnsupportedFrame(marker & 0x0F)),
    }

    if info.width != expected_width {
        return Err(PreflightError::WidthMismatch {
            expected: expected_width,
            actual: info.width,
        });
    }

    let height = info.height;
    match rule {
        HeightRule::Exact { panel } => {
            if height != panel {
                return Err(PreflightError::HeightMismatch {
                    expected: panel,
                    actual: height,
                });
            }
        }
        HeightRule::Fragment { remaining, panel } => {
            if height == 0 {
                return Err(PreflightError::ZeroHeight);
            }
            if height > remaining {
                return Err(PreflightError::ExceedsRemaining { height, remaining });
            }
            if height > panel {
                return Err(PreflightError::ExceedsPanel { height, panel });
            }
        }
    }

    match info.component_count {
        1 => Ok(()),
        3 => {
            for (component, &(h, v)) in info.sampling.iter().enumerate().skip(1) {
                if (h, v) != (1, 1) {
                    return Err(PreflightError::ChromaSampling {
                        component: component as u8 + 1,
                        h,
                        v,
                    });
                }
            }
            match info.sampling[0] {
                (1, 1) | (2, 1) | (2, 2) => Ok(()),
                (h, v) => Err(PreflightError::LumaSampling { h, v }),
            }
        }
        n => Err(PreflightError::ComponentCount(n)),
    }
}
