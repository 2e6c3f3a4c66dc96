//! Result codes and geometry shared by the decoder

use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Decoder result codes, one per TJpgDec `JRESULT` failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The output callback asked to stop
    Interrupted,
    /// The input ran dry or the stream is truncated
    Input,
    /// A caller buffer or the segment buffer is too small
    InsufficientMemory,
    /// Bad call sequence or argument
    Parameter,
    /// The stream violates the JPEG syntax
    FormatError,
    /// Valid JPEG, but a layout this decoder does not handle
    UnsupportedFormat,
    /// Valid JPEG, but not baseline DCT
    UnsupportedStandard,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::Interrupted => "decoding interrupted by output callback",
            Error::Input => "unexpected end of input",
            Error::InsufficientMemory => "insufficient working memory",
            Error::Parameter => "invalid parameter",
            Error::FormatError => "malformed JPEG data",
            Error::UnsupportedFormat => "unsupported JPEG format",
            Error::UnsupportedStandard => "unsupported JPEG standard (baseline only)",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Inclusive pixel rectangle of a decoded block, in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    pub left: u16,
    pub right: u16,
    pub top: u16,
    pub bottom: u16,
}

impl Rectangle {
    pub fn new(left: u16, right: u16, top: u16, bottom: u16) -> Self {
        Self { left, right, top, bottom }
    }

    pub fn width(&self) -> u16 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> u16 {
        self.bottom - self.top + 1
    }
}

/// Luma sampling layouts the decoder accepts (chroma is always 1x1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingFactor {
    /// 1x1, MCU is 8x8
    Yuv444,
    /// 2x1, MCU is 16x8
    Yuv422,
    /// 2x2, MCU is 16x16
    Yuv420,
}

impl SamplingFactor {
    pub fn from_factor(h: u8, v: u8) -> Option<Self> {
        match (h, v) {
            (1, 1) => Some(Self::Yuv444),
            (2, 1) => Some(Self::Yuv422),
            (2, 2) => Some(Self::Yuv420),
            _ => None,
        }
    }

    /// MCU width in blocks
    pub fn mcu_width(&self) -> u8 {
        match self {
            Self::Yuv444 => 1,
            Self::Yuv422 | Self::Yuv420 => 2,
        }
    }

    /// MCU height in blocks
    pub fn mcu_height(&self) -> u8 {
        match self {
            Self::Yuv444 | Self::Yuv422 => 1,
            Self::Yuv420 => 2,
        }
    }
}
