//! Stream filters needed to read document structure.
//!
//! Cross-reference streams and object streams are almost always FlateDecode
//! with a PNG predictor, so those are the only filters implemented here.
//! Content and image streams are never decoded by the pipeline; the writers
//! copy them verbatim.

use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// Upper bound on decoded stream size.
const MAX_DECOMPRESSED_SIZE: usize = 100 * 1024 * 1024;

/// Decode parameters for stream decoders.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 2 = TIFF, 10-15 = PNG)
    pub predictor: i64,
    /// Number of columns (width in samples)
    pub columns: usize,
    /// Number of color components per sample
    pub colors: usize,
    /// Bits per component
    pub bits_per_component: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl DecodeParams {
    fn pixel_bytes_per_row(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Run `data` through the named filters, then undo any predictor.
pub fn decode_stream_with_params(
    data: &[u8],
    filters: &[String],
    params: Option<&DecodeParams>,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for filter_name in filters {
        current = match filter_name.as_str() {
            "FlateDecode" | "Fl" => flate_decode(&current)?,
            other => return Err(Error::UnsupportedFilter(other.to_string())),
        };

        if current.len() > MAX_DECOMPRESSED_SIZE {
            return Err(Error::Decode(format!(
                "decompressed size {} bytes exceeds limit {} bytes",
                current.len(),
                MAX_DECOMPRESSED_SIZE
            )));
        }
    }

    match params {
        Some(params) if params.predictor != 1 => decode_predictor(&current, params),
        _ => Ok(current),
    }
}

/// Inflate zlib data, falling back to raw deflate for broken headers.
pub fn flate_decode(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    match ZlibDecoder::new(input).read_to_end(&mut output) {
        Ok(_) => Ok(output),
        Err(e) if !output.is_empty() => {
            log::warn!("FlateDecode partial recovery: {} bytes before error: {}", output.len(), e);
            Ok(output)
        },
        Err(e) => {
            log::debug!("Zlib decode failed ({}), trying raw deflate", e);
            output.clear();
            DeflateDecoder::new(input)
                .read_to_end(&mut output)
                .map_err(|e| Error::Decode(format!("FlateDecode failed: {}", e)))?;
            Ok(output)
        },
    }
}

/// Reverse a TIFF (2) or PNG (10-15) predictor.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => decode_tiff_predictor(data, params),
        10..=15 => decode_png_predictor(data, params),
        other => Err(Error::Decode(format!("Unsupported predictor: {}", other))),
    }
}

fn decode_tiff_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row_len = params.pixel_bytes_per_row();
    if row_len == 0 || data.len() % row_len != 0 {
        return Err(Error::Decode(format!(
            "Data length {} is not a multiple of row size {}",
            data.len(),
            row_len
        )));
    }

    let bpp = params.bytes_per_pixel();
    let mut output = Vec::with_capacity(data.len());
    for row in data.chunks(row_len) {
        let row_start = output.len();
        for (i, &byte) in row.iter().enumerate() {
            let left = if i >= bpp { output[row_start + i - bpp] } else { 0 };
            output.push(byte.wrapping_add(left));
        }
    }
    Ok(output)
}

fn decode_png_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let pixel_bytes = params.pixel_bytes_per_row();
    let row_len = pixel_bytes + 1;
    if data.len() % row_len != 0 {
        return Err(Error::Decode(format!(
            "Data length {} is not a multiple of row size {}",
            data.len(),
            row_len
        )));
    }

    let bpp = params.bytes_per_pixel();
    let mut output: Vec<u8> = Vec::with_capacity(data.len() / row_len * pixel_bytes);
    let mut previous = vec![0u8; pixel_bytes];

    for row in data.chunks(row_len) {
        let tag = row[0];
        let mut current = vec![0u8; pixel_bytes];

        for i in 0..pixel_bytes {
            let raw = row[i + 1];
            let left = if i >= bpp { current[i - bpp] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bpp { previous[i - bpp] } else { 0 };

            current[i] = match tag {
                0 => raw,
                1 => raw.wrapping_add(left),
                2 => raw.wrapping_add(up),
                3 => raw.wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => raw.wrapping_add(paeth(left, up, up_left)),
                _ => return Err(Error::Decode(format!("Invalid PNG predictor tag: {}", tag))),
            };
        }

        output.extend_from_slice(&current);
        previous = current;
    }

    Ok(output)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
