//! Main JPEG decoder implementation

use crate::color;
use crate::huffman::{BitStream, HuffmanTable};
use crate::idct::block_idct;
use crate::input::{ByteReader, InputCallback, InputWindow};
use crate::tables::{ARAI_SCALE_FACTOR, ZIGZAG};
use crate::types::{Error, Rectangle, Result, SamplingFactor};
use crate::SEGMENT_BUFFER_SIZE;

/// JPEG marker codes
mod markers {
    pub const SOI: u8 = 0xD8; // Start of Image
    pub const SOF0: u8 = 0xC0; // Start of Frame (Baseline)
    pub const DHT: u8 = 0xC4; // Define Huffman Table
    pub const DAC: u8 = 0xCC; // Define Arithmetic Conditioning
    pub const JPG: u8 = 0xC8; // Reserved extension
    pub const DQT: u8 = 0xDB; // Define Quantization Table
    pub const DRI: u8 = 0xDD; // Define Restart Interval
    pub const SOS: u8 = 0xDA; // Start of Scan
    pub const EOI: u8 = 0xD9; // End of Image
}

/// Output callback: receives RGB888 pixels of one block and its rectangle.
/// Return `false` to abort decoding with [`Error::Interrupted`].
pub type OutputCallback<'a> = &'a mut dyn FnMut(&[u8], &Rectangle) -> bool;

/// Main JPEG decoder structure
pub struct JpegDecoder {
    // Image dimensions
    width: u16,
    height: u16,

    // Component information
    num_components: u8,
    sampling: SamplingFactor,

    // Huffman tables by table id
    huff_dc: [Option<HuffmanTable>; 2],
    huff_ac: [Option<HuffmanTable>; 2],
    // DC/AC table ids per component, from SOS
    huff_ids: [(u8, u8); 3],

    // Quantization tables, Arai-prescaled, raster order
    qtables: [Option<[i32; 64]>; 4],
    qtable_ids: [u8; 3], // For Y, Cb, Cr

    // DC predictors for each component
    dc_values: [i16; 3],

    restart_interval: u16,

    // Bytes read ahead while parsing headers; scan data starts here
    window: InputWindow,
    prepared: bool,
}

impl JpegDecoder {
    /// Create a new JPEG decoder
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            num_components: 0,
            sampling: SamplingFactor::Yuv444,
            huff_dc: [None, None],
            huff_ac: [None, None],
            huff_ids: [(0, 0); 3],
            qtables: [None; 4],
            qtable_ids: [0; 3],
            dc_values: [0; 3],
            restart_interval: 0,
            window: InputWindow::default(),
            prepared: false,
        }
    }

    /// Parse the JPEG headers up to the start of scan, pulling bytes through `input`
    pub fn prepare(&mut self, input: InputCallback) -> Result<()> {
        *self = Self::new();
        let mut window = InputWindow::default();
        let mut reader = ByteReader::new(&mut window, input);
        let mut segment = [0u8; SEGMENT_BUFFER_SIZE];

        if reader.next_byte()? != 0xFF || reader.next_byte()? != markers::SOI {
            return Err(Error::FormatError);
        }

        loop {
            if reader.next_byte()? != 0xFF {
                return Err(Error::FormatError);
            }
            // Any number of fill bytes may precede the marker code
            let mut marker = reader.next_byte()?;
            while marker == 0xFF {
                marker = reader.next_byte()?;
            }
            if marker == markers::EOI {
                return Err(Error::FormatError);
            }

            let length = reader.read_u16()?;
            if length < 2 {
                return Err(Error::FormatError);
            }
            let seg_len = (length - 2) as usize;

            match marker {
                markers::SOF0 | markers::DHT | markers::DQT | markers::DRI | markers::SOS => {
                    if seg_len > segment.len() {
                        return Err(Error::InsufficientMemory);
                    }
                    let data = &mut segment[..seg_len];
                    reader.read_exact(data)?;
                    match marker {
                        markers::SOF0 => self.parse_sof(data)?,
                        markers::DHT => self.parse_dht(data)?,
                        markers::DQT => self.parse_dqt(data)?,
                        markers::DRI => self.parse_dri(data)?,
                        _ => {
                            self.parse_sos(data)?;
                            break;
                        }
                    }
                }
                // Progressive, lossless, hierarchical and arithmetic frames
                0xC1..=0xCF if marker != markers::JPG && marker != markers::DAC => {
                    return Err(Error::UnsupportedStandard);
                }
                _ => reader.skip(seg_len)?,
            }
        }

        drop(reader);
        self.window = window;
        self.prepared = true;
        Ok(())
    }

    /// Parse Start of Frame
    fn parse_sof(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 6 {
            return Err(Error::FormatError);
        }

        if data[0] != 8 {
            return Err(Error::UnsupportedFormat);
        }

        self.height = u16::from_be_bytes([data[1], data[2]]);
        self.width = u16::from_be_bytes([data[3], data[4]]);
        self.num_components = data[5];

        if self.width == 0 || self.height == 0 {
            return Err(Error::FormatError);
        }
        if self.num_components != 1 && self.num_components != 3 {
            return Err(Error::UnsupportedStandard);
        }

        let expected_len = 6 + self.num_components as usize * 3;
        if data.len() < expected_len {
            return Err(Error::FormatError);
        }

        for i in 0..self.num_components as usize {
            let comp_start = 6 + i * 3;
            let sampling_factor = data[comp_start + 1];
            let qtable_id = data[comp_start + 2];

            if qtable_id > 3 {
                return Err(Error::FormatError);
            }
            self.qtable_ids[i] = qtable_id;

            if self.num_components == 1 {
                // A single-component scan is never interleaved: one block per MCU
                self.sampling = SamplingFactor::Yuv444;
            } else if i == 0 {
                self.sampling = SamplingFactor::from_factor(sampling_factor >> 4, sampling_factor & 0x0F)
                    .ok_or(Error::UnsupportedFormat)?;
            } else if sampling_factor != 0x11 {
                return Err(Error::UnsupportedFormat);
            }
        }

        Ok(())
    }

    /// Parse Define Huffman Table
    fn parse_dht(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            if data.len() < 17 {
                return Err(Error::FormatError);
            }

            let table_info = data[0];
            let class = table_info >> 4; // 0=DC, 1=AC
            let id = (table_info & 0x0F) as usize;
            if class > 1 || id > 1 {
                return Err(Error::FormatError);
            }

            let bits = &data[1..17];
            let num_codes: usize = bits.iter().map(|&b| b as usize).sum();
            if data.len() < 17 + num_codes {
                return Err(Error::FormatError);
            }

            let table = HuffmanTable::create(bits, &data[17..17 + num_codes])?;
            if class == 0 {
                self.huff_dc[id] = Some(table);
            } else {
                self.huff_ac[id] = Some(table);
            }

            data = &data[17 + num_codes..];
        }

        Ok(())
    }

    /// Parse Define Quantization Table
    fn parse_dqt(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let table_info = data[0];
            let precision = table_info >> 4;
            let id = (table_info & 0x0F) as usize;
            if id > 3 || precision > 1 {
                return Err(Error::FormatError);
            }

            let entry_size = precision as usize + 1;
            let table_len = 1 + 64 * entry_size;
            if data.len() < table_len {
                return Err(Error::FormatError);
            }

            // Zigzag order in the stream; stored in raster order with the Arai scale applied
            let mut table = [0i32; 64];
            for (i, &zi) in ZIGZAG.iter().enumerate() {
                let zi = zi as usize;
                let q = if precision == 0 {
                    data[1 + i] as i32
                } else {
                    u16::from_be_bytes([data[1 + i * 2], data[2 + i * 2]]) as i32
                };
                table[zi] = q * ARAI_SCALE_FACTOR[zi] as i32;
            }
            self.qtables[id] = Some(table);

            data = &data[table_len..];
        }

        Ok(())
    }

    /// Parse Define Restart Interval
    fn parse_dri(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 2 {
            return Err(Error::FormatError);
        }
        self.restart_interval = u16::from_be_bytes([data[0], data[1]]);
        Ok(())
    }

    /// Parse Start of Scan
    fn parse_sos(&mut self, data: &[u8]) -> Result<()> {
        if self.num_components == 0 {
            // No frame header before the scan
            return Err(Error::FormatError);
        }
        if data.is_empty() {
            return Err(Error::FormatError);
        }

        // Only single-scan interleaved images are handled
        let num_components = data[0] as usize;
        if num_components != self.num_components as usize {
            return Err(Error::UnsupportedStandard);
        }
        if data.len() < 1 + num_components * 2 {
            return Err(Error::FormatError);
        }

        for i in 0..num_components {
            let selector = data[2 + i * 2];
            let (dc_id, ac_id) = (selector >> 4, selector & 0x0F);
            if dc_id > 1 || ac_id > 1 {
                return Err(Error::FormatError);
            }
            if self.huff_dc[dc_id as usize].is_none() || self.huff_ac[ac_id as usize].is_none() {
                return Err(Error::FormatError);
            }
            if self.qtables[self.qtable_ids[i] as usize].is_none() {
                return Err(Error::FormatError);
            }
            self.huff_ids[i] = (dc_id, ac_id);
        }

        Ok(())
    }

    /// Decompress the scan with caller-provided working buffers.
    ///
    /// `input` must continue the byte stream handed to [`JpegDecoder::prepare`].
    /// `mcu_buffer` needs at least [`JpegDecoder::mcu_buffer_size`] elements and
    /// `work_buffer` at least [`JpegDecoder::work_buffer_size`] bytes.
    ///
    /// # Example
    /// ```ignore
    /// let mut decoder = JpegDecoder::new();
    /// decoder.prepare(&mut input)?;
    ///
    /// let mut mcu_buf = [0i16; tjpgd::MAX_MCU_BUFFER_SIZE];
    /// let mut work_buf = [0u8; tjpgd::MAX_WORK_BUFFER_SIZE];
    ///
    /// decoder.decompress_with_buffers(
    ///     &mut input,
    ///     &mut mcu_buf,
    ///     &mut work_buf,
    ///     &mut |rgb, rect| { /* output */ true },
    /// )?;
    /// ```
    pub fn decompress_with_buffers(
        &mut self,
        input: InputCallback,
        mcu_buffer: &mut [i16],
        work_buffer: &mut [u8],
        output: OutputCallback,
    ) -> Result<()> {
        if !self.prepared {
            return Err(Error::Parameter);
        }
        if mcu_buffer.len() < self.mcu_buffer_size() || work_buffer.len() < self.work_buffer_size() {
            return Err(Error::InsufficientMemory);
        }
        self.prepared = false;
        self.dc_values = [0; 3];

        let mcu_width = self.sampling.mcu_width() as usize;
        let mcu_height = self.sampling.mcu_height() as usize;

        let mut window = core::mem::take(&mut self.window);
        let mut bitstream = BitStream::new(ByteReader::new(&mut window, input));

        let mut restart_counter = 0u16;
        let mut restart_sequence = 0u8;

        for mcu_y in (0..self.height).step_by(mcu_height * 8) {
            for mcu_x in (0..self.width).step_by(mcu_width * 8) {
                if self.restart_interval > 0 {
                    if restart_counter == self.restart_interval {
                        bitstream.sync_restart(restart_sequence)?;
                        restart_sequence = (restart_sequence + 1) & 0x07;
                        self.dc_values = [0; 3];
                        restart_counter = 0;
                    }
                    restart_counter += 1;
                }

                self.decode_mcu(&mut bitstream, mcu_buffer, mcu_width, mcu_height)?;
                self.output_mcu(mcu_buffer, work_buffer, mcu_x, mcu_y, mcu_width, mcu_height, output)?;
            }
        }

        Ok(())
    }

    /// Calculate required MCU buffer size (in i16 elements)
    pub fn mcu_buffer_size(&self) -> usize {
        let blocks = self.sampling.mcu_width() as usize * self.sampling.mcu_height() as usize;
        (blocks + 2) * 64
    }

    /// Calculate required work buffer size (in bytes)
    pub fn work_buffer_size(&self) -> usize {
        let mcu_width = self.sampling.mcu_width() as usize;
        let mcu_height = self.sampling.mcu_height() as usize;
        mcu_width * 8 * mcu_height * 8 * 3
    }

    fn decode_mcu(
        &mut self,
        bitstream: &mut BitStream,
        buffer: &mut [i16],
        mcu_width: usize,
        mcu_height: usize,
    ) -> Result<()> {
        let num_y_blocks = mcu_width * mcu_height;
        let mut tmp = [0i32; 64];

        for i in 0..num_y_blocks {
            self.decode_block(bitstream, &mut tmp, 0)?;
            block_idct(&mut tmp, &mut buffer[i * 64..(i + 1) * 64]);
        }

        if self.num_components == 3 {
            for component in 1..3 {
                let offset = (num_y_blocks + component - 1) * 64;
                self.decode_block(bitstream, &mut tmp, component)?;
                block_idct(&mut tmp, &mut buffer[offset..offset + 64]);
            }
        }

        Ok(())
    }

    /// Huffman-decode one block of `component` and dequantize it into `tmp`
    fn decode_block(&mut self, bitstream: &mut BitStream, tmp: &mut [i32; 64], component: usize) -> Result<()> {
        let qtable = self.qtables[self.qtable_ids[component] as usize]
            .as_ref()
            .ok_or(Error::FormatError)?;
        let (dc_id, ac_id) = self.huff_ids[component];
        let dc_table = self.huff_dc[dc_id as usize].as_ref().ok_or(Error::FormatError)?;
        let ac_table = self.huff_ac[ac_id as usize].as_ref().ok_or(Error::FormatError)?;

        // DC: difference from the previous block of the same component
        let dc_len = dc_table.decode(bitstream)? as usize;
        if dc_len > 11 {
            return Err(Error::FormatError);
        }
        let dc_diff = if dc_len > 0 {
            extend(bitstream.read_bits(dc_len)?, dc_len)
        } else {
            0
        };
        let dc = self.dc_values[component].wrapping_add(dc_diff as i16);
        self.dc_values[component] = dc;

        tmp[0] = (dc as i32 * qtable[0]) >> 8;
        tmp[1..].fill(0);

        // AC: run-length coded, zigzag order
        let mut z = 1;
        while z < 64 {
            let symbol = ac_table.decode(bitstream)?;
            let zero_run = (symbol >> 4) as usize;
            let ac_len = (symbol & 0x0F) as usize;

            if ac_len == 0 {
                if zero_run != 15 {
                    break; // EOB
                }
                z += 16; // ZRL
                continue;
            }

            z += zero_run;
            if z >= 64 {
                return Err(Error::FormatError);
            }

            let value = extend(bitstream.read_bits(ac_len)?, ac_len);
            let i = ZIGZAG[z] as usize;
            tmp[i] = (value * qtable[i]) >> 8;
            z += 1;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn output_mcu(
        &self,
        mcu_buffer: &[i16],
        work_buffer: &mut [u8],
        x: u16,
        y: u16,
        mcu_width: usize,
        mcu_height: usize,
        output: OutputCallback,
    ) -> Result<()> {
        let mcu_pixel_width = mcu_width * 8;
        let mcu_pixel_height = mcu_height * 8;

        // Clip the block at the right and bottom image edges
        let out_width = mcu_pixel_width.min((self.width - x) as usize);
        let out_height = mcu_pixel_height.min((self.height - y) as usize);

        let rect = Rectangle::new(
            x,
            x + out_width as u16 - 1,
            y,
            y + out_height as u16 - 1,
        );

        if self.num_components == 3 {
            color::mcu_to_rgb(mcu_buffer, work_buffer, mcu_width, mcu_height);
        } else {
            color::mcu_to_grayscale(mcu_buffer, work_buffer);
        }

        // Squeeze out the truncated columns so rows are contiguous
        if out_width < mcu_pixel_width {
            let mut s = 0usize;
            let mut d = 0usize;
            for _ in 0..out_height {
                work_buffer.copy_within(s..s + out_width * 3, d);
                s += mcu_pixel_width * 3;
                d += out_width * 3;
            }
        }

        if !output(&work_buffer[..out_width * out_height * 3], &rect) {
            return Err(Error::Interrupted);
        }

        Ok(())
    }

    /// Get image width
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Get image height
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Get number of components
    pub fn components(&self) -> u8 {
        self.num_components
    }

    pub fn sampling(&self) -> SamplingFactor {
        self.sampling
    }

    pub fn restart_interval(&self) -> u16 {
        self.restart_interval
    }
}

impl Default for JpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sign-extend a `bits`-wide magnitude category value
fn extend(value: u16, bits: usize) -> i32 {
    let value = value as i32;
    if value < 1 << (bits - 1) {
        value - (1 << bits) + 1
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice_input<'d>(data: &'d [u8]) -> impl FnMut(&mut [u8]) -> usize + 'd {
        let mut offset = 0;
        move |buf: &mut [u8]| {
            let n = buf.len().min(data.len() - offset);
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            offset += n;
            n
        }
    }

    #[test]
    fn test_extend() {
        assert_eq!(extend(0b0, 1), -1);
        assert_eq!(extend(0b1, 1), 1);
        assert_eq!(extend(0b010, 3), -5);
        assert_eq!(extend(0b110, 3), 6);
    }

    #[test]
    fn test_rejects_missing_soi() {
        let data = [0x00, 0x11, 0x22];
        let mut decoder = JpegDecoder::new();
        assert_eq!(decoder.prepare(&mut slice_input(&data)), Err(Error::FormatError));
    }

    #[test]
    fn test_rejects_progressive_frame() {
        let data = [0xFF, 0xD8, 0xFF, 0xC2, 0x00, 0x02];
        let mut decoder = JpegDecoder::new();
        assert_eq!(decoder.prepare(&mut slice_input(&data)), Err(Error::UnsupportedStandard));
    }

    #[test]
    fn test_skips_fill_bytes_and_app_segments() {
        // SOI, APP0 with 2 payload bytes, fill bytes, then EOI before any scan
        let data = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0xAA, 0xBB, 0xFF, 0xFF, 0xD9];
        let mut decoder = JpegDecoder::new();
        assert_eq!(decoder.prepare(&mut slice_input(&data)), Err(Error::FormatError));
    }

    #[test]
    fn test_truncated_header() {
        let data = [0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x43, 0x00];
        let mut decoder = JpegDecoder::new();
        assert_eq!(decoder.prepare(&mut slice_input(&data)), Err(Error::Input));
    }

    #[test]
    fn test_decompress_requires_prepare() {
        let mut decoder = JpegDecoder::new();
        let mut mcu = [0i16; crate::MAX_MCU_BUFFER_SIZE];
        let mut work = [0u8; crate::MAX_WORK_BUFFER_SIZE];
        let result = decoder.decompress_with_buffers(&mut slice_input(&[]), &mut mcu, &mut work, &mut |_, _| true);
        assert_eq!(result, Err(Error::Parameter));
    }
}
