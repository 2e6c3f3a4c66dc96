//! Huffman decoding implementation

use crate::input::ByteReader;
use crate::types::{Error, Result};

/// Huffman table for DC or AC component
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    /// Number of codes for each bit length (1-16 bits)
    bits: [u8; 16],
    /// First canonical code of each bit length
    min_code: [u32; 16],
    /// Index into `data` of the first symbol of each bit length
    val_offset: [u16; 16],
    /// Decoded data corresponding to each code word
    data: heapless::Vec<u8, 256>,
}

impl HuffmanTable {
    /// Create Huffman table from the raw DHT counts and symbols
    pub fn create(bits: &[u8], values: &[u8]) -> Result<Self> {
        if bits.len() != 16 {
            return Err(Error::FormatError);
        }

        let total_codes: usize = bits.iter().map(|&b| b as usize).sum();
        if values.len() != total_codes {
            return Err(Error::FormatError);
        }

        let mut table = Self {
            bits: [0; 16],
            min_code: [0; 16],
            val_offset: [0; 16],
            data: heapless::Vec::new(),
        };
        table.bits.copy_from_slice(bits);
        table
            .data
            .extend_from_slice(values)
            .map_err(|_| Error::FormatError)?;

        let mut code = 0u32;
        let mut index = 0u16;
        for (len, &count) in bits.iter().enumerate() {
            table.min_code[len] = code;
            table.val_offset[len] = index;
            code += count as u32;
            index += count as u16;
            // Codes of this length must fit in len+1 bits
            if code > 1 << (len + 1) {
                return Err(Error::FormatError);
            }
            code <<= 1;
        }

        Ok(table)
    }

    /// Extract Huffman decoded value from bit stream
    pub fn decode(&self, bits: &mut BitStream) -> Result<u8> {
        let mut code = 0u32;
        for len in 0..16 {
            code = (code << 1) | bits.read_bit()? as u32;
            let count = self.bits[len] as u32;
            if count > 0 && code >= self.min_code[len] && code - self.min_code[len] < count {
                let idx = self.val_offset[len] as usize + (code - self.min_code[len]) as usize;
                return Ok(self.data[idx]);
            }
        }
        Err(Error::FormatError)
    }
}

/// Bit reader over entropy-coded data with byte stuffing handling
pub struct BitStream<'w, 'a> {
    reader: ByteReader<'w, 'a>,
    current: u8,
    bits_left: u8,
    marker_found: Option<u8>,
}

impl<'w, 'a> BitStream<'w, 'a> {
    pub fn new(reader: ByteReader<'w, 'a>) -> Self {
        Self {
            reader,
            current: 0,
            bits_left: 0,
            marker_found: None,
        }
    }

    /// Read a single bit
    pub fn read_bit(&mut self) -> Result<u8> {
        if self.bits_left == 0 {
            self.refill()?;
        }
        self.bits_left -= 1;
        Ok((self.current >> self.bits_left) & 1)
    }

    /// Read multiple bits (up to 16)
    pub fn read_bits(&mut self, count: usize) -> Result<u16> {
        if count > 16 {
            return Err(Error::Parameter);
        }
        let mut result = 0u16;
        for _ in 0..count {
            result = (result << 1) | self.read_bit()? as u16;
        }
        Ok(result)
    }

    fn refill(&mut self) -> Result<()> {
        // Stalled on a marker: feed stuff bits until the caller resyncs
        if self.marker_found.is_some() {
            self.current = 0xFF;
            self.bits_left = 8;
            return Ok(());
        }

        let byte = self.reader.next_byte()?;
        if byte == 0xFF {
            let next = self.reader.next_byte()?;
            if next != 0x00 {
                self.marker_found = Some(next);
            }
        }
        self.current = byte;
        self.bits_left = 8;
        Ok(())
    }

    /// Discard the padding bits and consume the expected RSTn marker
    pub fn sync_restart(&mut self, sequence: u8) -> Result<()> {
        self.bits_left = 0;
        let marker = match self.marker_found.take() {
            Some(marker) => marker,
            None => {
                if self.reader.next_byte()? != 0xFF {
                    return Err(Error::FormatError);
                }
                let mut marker = self.reader.next_byte()?;
                while marker == 0xFF {
                    marker = self.reader.next_byte()?;
                }
                marker
            }
        };
        if marker != 0xD0 + (sequence & 0x07) {
            return Err(Error::FormatError);
        }
        Ok(())
    }
}
