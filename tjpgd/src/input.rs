//! Byte-level input pulled through the caller's input callback

use crate::types::{Error, Result};
use crate::BUFFER_SIZE;

/// Input callback: fill the slice and return the number of bytes written.
/// Returning 0 signals the end of the stream.
pub type InputCallback<'a> = &'a mut dyn FnMut(&mut [u8]) -> usize;

/// Stream input buffer, kept by the decoder between `prepare` and
/// `decompress` so bytes read ahead during header parsing are not lost
pub struct InputWindow {
    buf: [u8; BUFFER_SIZE],
    pos: usize,
    len: usize,
}

impl Default for InputWindow {
    fn default() -> Self {
        Self {
            buf: [0; BUFFER_SIZE],
            pos: 0,
            len: 0,
        }
    }
}

pub struct ByteReader<'w, 'a> {
    window: &'w mut InputWindow,
    input: InputCallback<'a>,
}

impl<'w, 'a> ByteReader<'w, 'a> {
    pub fn new(window: &'w mut InputWindow, input: InputCallback<'a>) -> Self {
        Self { window, input }
    }

    pub fn next_byte(&mut self) -> Result<u8> {
        if self.window.pos >= self.window.len {
            let n = (self.input)(&mut self.window.buf);
            if n == 0 {
                return Err(Error::Input);
            }
            self.window.len = n.min(BUFFER_SIZE);
            self.window.pos = 0;
        }
        let byte = self.window.buf[self.window.pos];
        self.window.pos += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let hi = self.next_byte()?;
        let lo = self.next_byte()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        for byte in out.iter_mut() {
            *byte = self.next_byte()?;
        }
        Ok(())
    }

    pub fn skip(&mut self, mut count: usize) -> Result<()> {
        while count > 0 {
            let buffered = self.window.len - self.window.pos;
            if buffered == 0 {
                self.next_byte()?;
                count -= 1;
                continue;
            }
            let n = buffered.min(count);
            self.window.pos += n;
            count -= n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked<'d>(data: &'d [u8], chunk: usize) -> impl FnMut(&mut [u8]) -> usize + 'd {
        let mut offset = 0;
        move |buf: &mut [u8]| {
            let n = chunk.min(buf.len()).min(data.len() - offset);
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            offset += n;
            n
        }
    }

    #[test]
    fn test_reads_across_refills() {
        let data = [0xFF, 0xD8, 0x12, 0x34, 0x56, 0x78, 0x9A];
        let mut input = chunked(&data, 3);
        let mut window = InputWindow::default();
        let mut reader = ByteReader::new(&mut window, &mut input);

        assert_eq!(reader.read_u16().unwrap(), 0xFFD8);
        reader.skip(2).unwrap();
        let mut out = [0u8; 2];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(out, [0x56, 0x78]);
        assert_eq!(reader.next_byte().unwrap(), 0x9A);
        assert_eq!(reader.next_byte(), Err(Error::Input));
    }
}
