//! tjpgd - Tiny JPEG Decompressor
//!
//! A streaming baseline JPEG decoder for displays with very little RAM.
//! Input is pulled through a callback in small chunks and every decoded
//! block is pushed to an output callback as RGB888, so the whole image is
//! never held in memory.
//!
//! Based on: TJpgDec R0.03 (C)ChaN, 2021

#![cfg_attr(not(feature = "std"), no_std)]

mod types;
mod tables;
mod input;
mod huffman;
mod idct;
mod color;
mod decoder;

pub use types::{Result, Error, Rectangle, SamplingFactor};
pub use input::InputCallback;
pub use decoder::{JpegDecoder, OutputCallback};

/// Size of stream input buffer
pub const BUFFER_SIZE: usize = 512;

/// Largest header segment (DHT, DQT, SOF, SOS) the decoder accepts
pub const SEGMENT_BUFFER_SIZE: usize = 1024;

/// MCU coefficient buffer large enough for any supported sampling (4 Y + Cb + Cr blocks)
pub const MAX_MCU_BUFFER_SIZE: usize = (4 + 2) * 64;

/// RGB888 work buffer large enough for a 16x16 MCU
pub const MAX_WORK_BUFFER_SIZE: usize = 16 * 16 * 3;
