//! Decode a JPEG file from disk through the streaming API
//!
//! cargo run -p tjpgd --example basic -- photo.jpg

use std::io::Read;

use tjpgd::{JpegDecoder, MAX_MCU_BUFFER_SIZE, MAX_WORK_BUFFER_SIZE};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).ok_or("usage: basic <file.jpg>")?;
    let mut file = std::fs::File::open(&path)?;

    // Reads go straight to the file, 512 bytes at a time
    let mut input = |buf: &mut [u8]| file.read(buf).unwrap_or(0);

    let mut decoder = JpegDecoder::new();
    decoder.prepare(&mut input)?;

    println!("Image size: {}x{}", decoder.width(), decoder.height());
    println!("Components: {}", decoder.components());
    println!("Sampling: {:?}", decoder.sampling());

    let mut mcu_buffer = [0i16; MAX_MCU_BUFFER_SIZE];
    let mut work_buffer = [0u8; MAX_WORK_BUFFER_SIZE];
    let mut blocks = 0usize;
    let mut pixels = 0usize;

    decoder.decompress_with_buffers(
        &mut input,
        &mut mcu_buffer,
        &mut work_buffer,
        &mut |rgb, rect| {
            blocks += 1;
            pixels += rgb.len() / 3;
            if blocks == 1 {
                println!(
                    "First block: ({}, {}) to ({}, {})",
                    rect.left, rect.top, rect.right, rect.bottom
                );
            }
            true
        },
    )?;

    println!("Decompression complete: {blocks} blocks, {pixels} pixels");
    Ok(())
}
