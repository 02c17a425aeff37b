//! PDF object parser.
//!
//! Builds [`Object`] values from lexer tokens. Indirect references
//! (`10 0 R`) are recognised by look-ahead after an integer, and a
//! dictionary followed by `stream` becomes a stream object.

use crate::error::{Error, Result};
use crate::lexer::{bare_keyword, token, Token};
use crate::object::{Object, ObjectRef, PdfDict};
use nom::IResult;

/// Deepest array/dictionary nesting accepted in one object.
pub const MAX_NESTING_DEPTH: u32 = 256;

fn fail(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Decode escape sequences in the raw bytes of a literal string.
///
/// Handles the single-character escapes, octal `\ddd`, and line
/// continuations. Unknown escapes keep the backslash.
///
/// ```
/// # use pdf_sealer::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"a\\(b\\)\\101"), b"a(b)A");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            out.push(raw[i]);
            i += 1;
            continue;
        }

        let escaped = raw[i + 1];
        i += 2;
        match escaped {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'(' | b')' | b'\\' => out.push(escaped),
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut value = (escaped - b'0') as u32;
                let mut taken = 1;
                while taken < 3 {
                    match raw.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            i += 1;
                            taken += 1;
                        },
                        _ => break,
                    }
                }
                out.push((value & 0xFF) as u8);
            },
            other => {
                out.push(b'\\');
                out.push(other);
            },
        }
    }

    out
}

/// Decode a hex string body; whitespace is ignored and an odd final digit is
/// padded with zero.
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let nibble = |c: u8| -> Result<u8> {
        (c as char)
            .to_digit(16)
            .map(|d| d as u8)
            .ok_or_else(|| Error::ParseError {
                offset: 0,
                reason: format!("Invalid hex digit '{}'", c as char),
            })
    };

    digits
        .chunks(2)
        .map(|pair| -> Result<u8> {
            let high = nibble(pair[0])?;
            let low = match pair.get(1) {
                Some(&c) => nibble(c)?,
                None => 0,
            };
            Ok(high << 4 | low)
        })
        .collect()
}

/// Parse one PDF object.
///
/// ```
/// use pdf_sealer::parser::parse_object;
///
/// let (_, obj) = parse_object(b"<< /Type /Page /Parent 3 0 R >>").unwrap();
/// assert!(obj.has_type("Page"));
/// ```
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_nested(input, 0)
}

fn parse_nested(input: &[u8], depth: u32) -> IResult<&[u8], Object> {
    if depth > MAX_NESTING_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::TooLarge)));
    }
    let (rest, tok) = token(input)?;

    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Integer(id) => {
            if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if id >= 0 && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(id as u32, gen as u16))));
                    }
                }
            }
            Ok((rest, Object::Integer(id)))
        },
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string_escapes(raw)))),
        Token::HexString(raw) => decode_hex(raw)
            .map(|bytes| (rest, Object::String(bytes)))
            .map_err(|_| nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::HexDigit))),
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::ArrayStart => parse_array(rest, depth + 1),
        Token::DictStart => {
            let (after_dict, dict) = parse_dictionary(rest, depth + 1)?;
            match token(after_dict) {
                Ok((stream_start, Token::StreamStart)) => {
                    let (after_stream, data) = parse_stream_data(stream_start, &dict)?;
                    Ok((
                        after_stream,
                        Object::Stream {
                            dict,
                            data: bytes::Bytes::copy_from_slice(data),
                        },
                    ))
                },
                _ => Ok((after_dict, Object::Dictionary(dict))),
            }
        },
        _ => Err(fail(input, nom::error::ErrorKind::Tag)),
    }
}

fn parse_array(input: &[u8], depth: u32) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    let mut remaining = input;

    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(remaining) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_nested(remaining, depth)?;
        items.push(item);
        remaining = rest;
    }
}

fn parse_dictionary(input: &[u8], depth: u32) -> IResult<&[u8], PdfDict> {
    let mut dict = PdfDict::new();
    let mut remaining = input;

    loop {
        let (rest, tok) = token(remaining)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_nested(rest, depth)?;
                // A null value is equivalent to an absent entry
                if !value.is_null() {
                    dict.insert(key, value);
                }
                remaining = rest;
            },
            _ => return Err(fail(remaining, nom::error::ErrorKind::Tag)),
        }
    }
}

/// Read stream bytes after the `stream` keyword.
///
/// A direct `/Length` is trusted when `endstream` follows it; otherwise the
/// data runs to the next `endstream` minus its preceding end-of-line.
fn parse_stream_data<'a>(input: &'a [u8], dict: &PdfDict) -> IResult<&'a [u8], &'a [u8]> {
    let body = if let Some(rest) = input.strip_prefix(b"\r\n") {
        rest
    } else if let Some(rest) = input.strip_prefix(b"\n").or_else(|| input.strip_prefix(b"\r")) {
        rest
    } else {
        log::warn!("No end-of-line after stream keyword");
        input
    };

    if let Some(length) = dict.get("Length").and_then(|l| l.as_integer()) {
        let length = length.max(0) as usize;
        if length <= body.len() {
            if let Ok((rest, Token::StreamEnd)) = token(&body[length..]) {
                return Ok((rest, &body[..length]));
            }
        }
        log::debug!("Stream /Length {} does not end at endstream, scanning", length);
    }

    let pos = find_keyword(body, b"endstream").ok_or_else(|| fail(body, nom::error::ErrorKind::Eof))?;
    let mut end = pos;
    if end > 0 && body[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && body[end - 1] == b'\r' {
        end -= 1;
    }
    Ok((&body[pos + b"endstream".len()..], &body[..end]))
}

/// Position of the first occurrence of `keyword` in `haystack`.
pub fn find_keyword(haystack: &[u8], keyword: &[u8]) -> Option<usize> {
    haystack
        .windows(keyword.len())
        .position(|window| window == keyword)
}

/// Parse `id gen obj <object> endobj`.
///
/// A missing `endobj` is tolerated with a warning.
pub fn parse_indirect_object(input: &[u8]) -> IResult<&[u8], (ObjectRef, Object)> {
    let (rest, id) = match token(input)? {
        (rest, Token::Integer(id)) if id >= 0 => (rest, id as u32),
        _ => return Err(fail(input, nom::error::ErrorKind::Digit)),
    };
    let (rest, gen) = match token(rest)? {
        (rest, Token::Integer(gen)) if (0..=u16::MAX as i64).contains(&gen) => (rest, gen as u16),
        _ => return Err(fail(input, nom::error::ErrorKind::Digit)),
    };
    let rest = match token(rest)? {
        (rest, Token::ObjStart) => rest,
        _ => return Err(fail(input, nom::error::ErrorKind::Tag)),
    };

    let (rest, object) = parse_object(rest)?;
    let rest = match token(rest) {
        Ok((after, Token::ObjEnd)) => after,
        _ => {
            log::warn!("Object {} {} is missing endobj", id, gen);
            rest
        },
    };

    Ok((rest, (ObjectRef::new(id, gen), object)))
}

/// Parse a `trailer << ... >>` section.
pub fn parse_trailer(input: &[u8]) -> IResult<&[u8], PdfDict> {
    let (rest, _) = bare_keyword(input, "trailer")?;
    let (rest, tok) = token(rest)?;
    if tok != Token::DictStart {
        return Err(fail(input, nom::error::ErrorKind::Tag));
    }
    parse_dictionary(rest, 1)
}

/// Convert a nom failure into a crate error positioned relative to `base`.
pub(crate) fn to_parse_error(base: &[u8], err: nom::Err<nom::error::Error<&[u8]>>) -> Error {
    match err {
        nom::Err::Failure(e) if e.code == nom::error::ErrorKind::TooLarge => {
            Error::RecursionLimitExceeded(MAX_NESTING_DEPTH)
        },
        nom::Err::Error(e) | nom::Err::Failure(e) => Error::ParseError {
            offset: base.len().saturating_sub(e.input.len()),
            reason: format!("{:?}", e.code),
        },
        nom::Err::Incomplete(_) => Error::ParseError {
            offset: base.len(),
            reason: "unexpected end of input".to_string(),
        },
    }
}
