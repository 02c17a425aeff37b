//! ByteRange calculation for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the signature value begins
//! - `offset2` = byte offset where the signature value ends
//! - `length2` = remaining bytes to end of file
//!
//! The signature value is a hex-encoded string within `<` and `>` delimiters.
//! The ByteRange array itself is written before its values are known, so it
//! is reserved with a fixed width and patched in place with space padding.

use crate::error::{Error, Result};
use crate::writer::hex_upper;

/// Digits reserved for each patched ByteRange value.
pub const BYTE_RANGE_DIGITS: usize = 10;

/// Calculator for PDF signature byte ranges.
#[derive(Debug, Clone, Copy)]
pub struct ByteRangeCalculator {
    /// Size of the placeholder for the signature value (hex digits + 2 for angle brackets)
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Create a calculator reserving `reserve` bytes for the DER container.
    ///
    /// The placeholder size is `reserve * 2 + 2`: hex-encoded, inside angle
    /// brackets.
    pub fn new(reserve: usize) -> Self {
        Self {
            placeholder_size: reserve * 2 + 2,
        }
    }

    /// Get the placeholder size (for the /Contents value).
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Largest container, in bytes, that fits the placeholder.
    pub fn capacity(&self) -> usize {
        (self.placeholder_size - 2) / 2
    }

    /// Zero-filled `/Contents` value.
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size - 2))
    }

    /// Fixed-width `/ByteRange` value written before the offsets are known.
    pub fn byte_range_placeholder() -> String {
        let zeros = "0".repeat(BYTE_RANGE_DIGITS);
        format!("[0 {} {} {}]", zeros, zeros, zeros)
    }

    /// Calculate the ByteRange array given the position of the /Contents value.
    ///
    /// `contents_offset` is the offset of the opening `<`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let before_sig = contents_offset as i64;
        let after_sig_start = (contents_offset + self.placeholder_size) as i64;
        let after_sig_len = file_size as i64 - after_sig_start;

        [0, before_sig, after_sig_start, after_sig_len]
    }

    /// Format a ByteRange array as a PDF array string.
    pub fn format_byte_range(byte_range: &[i64; 4]) -> String {
        format!("[{} {} {} {}]", byte_range[0], byte_range[1], byte_range[2], byte_range[3])
    }

    /// Overwrite the reserved ByteRange array at `offset` (its `[`), padding
    /// with spaces to the reserved width.
    pub fn patch_byte_range(pdf_data: &mut [u8], offset: usize, byte_range: &[i64; 4]) -> Result<()> {
        let width = Self::byte_range_placeholder().len();
        let end = offset + width;
        if end > pdf_data.len() || pdf_data[offset] != b'[' || pdf_data[end - 1] != b']' {
            return Err(Error::Signing(format!("no ByteRange placeholder at offset {}", offset)));
        }

        let formatted = Self::format_byte_range(byte_range);
        if formatted.len() > width {
            return Err(Error::Signing(format!("ByteRange {} exceeds the reserved width", formatted)));
        }
        let mut padded = formatted.into_bytes();
        padded.resize(width, b' ');
        pdf_data[offset..end].copy_from_slice(&padded);
        Ok(())
    }

    /// The two signed ranges as slices.
    pub fn signed_ranges<'a>(pdf_data: &'a [u8], byte_range: &[i64; 4]) -> Result<[&'a [u8]; 2]> {
        if byte_range.iter().any(|v| *v < 0) {
            return Err(Error::InvalidPdf(format!("ByteRange has negative values: {:?}", byte_range)));
        }
        let offset1 = byte_range[0] as usize;
        let length1 = byte_range[1] as usize;
        let offset2 = byte_range[2] as usize;
        let length2 = byte_range[3] as usize;

        if offset1 + length1 > pdf_data.len() {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range exceeds file size: {} + {} > {}",
                offset1,
                length1,
                pdf_data.len()
            )));
        }
        if offset2 + length2 > pdf_data.len() {
            return Err(Error::InvalidPdf(format!(
                "ByteRange second range exceeds file size: {} + {} > {}",
                offset2,
                length2,
                pdf_data.len()
            )));
        }

        Ok([
            &pdf_data[offset1..offset1 + length1],
            &pdf_data[offset2..offset2 + length2],
        ])
    }

    /// Extract the bytes to be signed from a PDF file.
    ///
    /// This returns the concatenation of the two ranges specified by ByteRange.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        Ok(Self::signed_ranges(pdf_data, byte_range)?.concat())
    }

    /// Check that a ByteRange covers the entire document except the
    /// signature value.
    ///
    /// A valid ByteRange starts at offset 0, ends at the file size and leaves
    /// exactly one gap.
    pub fn validate_byte_range(byte_range: &[i64; 4], file_size: usize) -> Result<()> {
        let [offset1, length1, offset2, length2] = *byte_range;

        if offset1 != 0 {
            return Err(Error::InvalidPdf(format!("ByteRange must start at 0, got {}", offset1)));
        }

        let expected_end = file_size as i64;
        let actual_end = offset2 + length2;
        if actual_end != expected_end {
            return Err(Error::InvalidPdf(format!(
                "ByteRange must end at file size {}, got {}",
                expected_end, actual_end
            )));
        }

        if length1 < 0 || length2 < 0 || length1 >= offset2 {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range ({}) overlaps with second range start ({})",
                length1, offset2
            )));
        }

        Ok(())
    }

    /// Find the /Contents value position in a signature dictionary.
    ///
    /// This searches for `/Contents <` within 4 KiB of `sig_dict_offset` and
    /// returns the offset of the opening angle bracket.
    pub fn find_contents_offset(pdf_data: &[u8], sig_dict_offset: usize) -> Option<usize> {
        Self::find_value_offset(pdf_data, sig_dict_offset, b"/Contents", b'<')
    }

    /// Find the `[` of the `/ByteRange` array within 4 KiB of `sig_dict_offset`.
    pub fn find_byte_range_offset(pdf_data: &[u8], sig_dict_offset: usize) -> Option<usize> {
        Self::find_value_offset(pdf_data, sig_dict_offset, b"/ByteRange", b'[')
    }

    fn find_value_offset(pdf_data: &[u8], start: usize, key: &[u8], opener: u8) -> Option<usize> {
        let search_end = (start + 4096).min(pdf_data.len());
        let window = pdf_data.get(start..search_end)?;

        let mut pos = 0;
        while pos + key.len() < window.len() {
            if window[pos..].starts_with(key) {
                for (i, byte) in window.iter().enumerate().skip(pos + key.len()) {
                    if *byte == opener {
                        return Some(start + i);
                    }
                    if !matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
                        break;
                    }
                }
            }
            pos += 1;
        }

        None
    }

    /// Write a DER container into the placeholder at `contents_offset`,
    /// zero-padding the remaining hex digits.
    ///
    /// # Errors
    ///
    /// [`Error::PlaceholderTooSmall`] when the container does not fit.
    pub fn insert_signature(&self, pdf_data: &mut [u8], contents_offset: usize, container: &[u8]) -> Result<()> {
        if container.len() > self.capacity() {
            return Err(Error::PlaceholderTooSmall {
                required: container.len(),
                reserved: self.capacity(),
            });
        }

        if contents_offset + self.placeholder_size > pdf_data.len() {
            return Err(Error::Signing("signature insertion would exceed file bounds".to_string()));
        }
        if pdf_data[contents_offset] != b'<' || pdf_data[contents_offset + self.placeholder_size - 1] != b'>' {
            return Err(Error::Signing(format!("no /Contents placeholder at offset {}", contents_offset)));
        }

        let mut sig_value = Vec::with_capacity(self.placeholder_size);
        sig_value.push(b'<');
        sig_value.extend_from_slice(hex_upper(container).as_bytes());
        sig_value.resize(self.placeholder_size - 1, b'0');
        sig_value.push(b'>');

        pdf_data[contents_offset..contents_offset + self.placeholder_size].copy_from_slice(&sig_value);
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        Self::new(8192)
    }
}
