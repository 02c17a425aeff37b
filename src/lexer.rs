//! PDF tokenizer.
//!
//! Splits raw document bytes into numbers, strings, names, keywords and
//! delimiters. Whitespace (space, \t, \r, \n, \0, \f) and `%` comments
//! between tokens are skipped.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, one_of},
    combinator::{map, opt, recognize, value},
    sequence::{delimited, pair, preceded},
    IResult,
};

/// Token types recognized by the lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (42, -123)
    Integer(i64),
    /// Real number (3.14, -.5)
    Real(f64),
    /// Raw literal string contents; escapes are decoded by the parser
    LiteralString(&'a [u8]),
    /// Raw hex string contents, whitespace included
    HexString(&'a [u8]),
    /// Name with `#xx` escapes decoded
    Name(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
    /// `obj`
    ObjStart,
    /// `endobj`
    ObjEnd,
    /// `stream`
    StreamStart,
    /// `endstream`
    StreamEnd,
    /// `R`
    R,
}

/// PDF whitespace characters.
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// PDF delimiter characters.
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip any run of whitespace and comments.
pub fn skip_ws(input: &[u8]) -> IResult<&[u8], ()> {
    let mut remaining = input;
    loop {
        let (rest, _) = take_while(is_whitespace)(remaining)?;
        remaining = rest;
        match comment(remaining) {
            Ok((rest, _)) => remaining = rest,
            Err(_) => return Ok((remaining, ())),
        }
    }
}

fn number_error(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
}

fn digits(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(|c: u8| c.is_ascii_digit())(input)
}

fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) =
        recognize(pair(opt(one_of("+-")), pair(digits, opt(preceded(char('.'), digits)))))(input)?;

    let text = std::str::from_utf8(text).map_err(|_| number_error(input))?;
    let unsigned = text.trim_start_matches(&['+', '-'][..]);
    if unsigned.is_empty() || unsigned == "." {
        return Err(number_error(input));
    }

    if text.contains('.') {
        // Rust rejects "5." and "-.5" style forms; normalise before parsing
        let mut normalised = text.replace("-.", "-0.").replace("+.", "0.");
        if normalised.starts_with('.') {
            normalised.insert(0, '0');
        }
        if normalised.ends_with('.') {
            normalised.push('0');
        }
        let num: f64 = normalised.parse().map_err(|_| number_error(input))?;
        Ok((rest, Token::Real(num)))
    } else {
        let num: i64 = text.parse().map_err(|_| number_error(input))?;
        Ok((rest, Token::Integer(num)))
    }
}

/// Literal string with balanced parentheses; `\` escapes the next byte.
fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0;

    while pos < body.len() {
        match body[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[pos + 1..], Token::LiteralString(&body[..pos])));
                }
                pos += 1;
            },
            _ => pos += 1,
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)))
}

fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    delimited(
        char('<'),
        map(
            take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)),
            Token::HexString,
        ),
        char('>'),
    )(input)
}

/// Decode `#xx` escapes in a raw name. Malformed escapes are kept literally.
///
/// ```
/// # use pdf_sealer::lexer::decode_name_escapes;
/// assert_eq!(decode_name_escapes(b"A#20B"), "A B");
/// assert_eq!(decode_name_escapes(b"Adobe.PPKLite"), "Adobe.PPKLite");
/// ```
pub fn decode_name_escapes(raw: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                bytes.push(byte);
                i += 3;
                continue;
            }
        }
        bytes.push(raw[i]);
        i += 1;
    }
    String::from_utf8(bytes)
        .unwrap_or_else(|e| e.into_bytes().iter().map(|&b| b as char).collect())
}

fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(
            take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c)),
            |raw: &[u8]| Token::Name(decode_name_escapes(raw)),
        ),
    )(input)
}

/// Keywords must not run into a following regular character (`nullx`).
fn keyword<'a>(word: &'static [u8], tok: Token<'a>) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], Token<'a>> {
    move |input: &'a [u8]| {
        let (rest, _) = tag(word)(input)?;
        match rest.first() {
            Some(&c) if !is_whitespace(c) && !is_delimiter(c) => Err(nom::Err::Error(
                nom::error::Error::new(input, nom::error::ErrorKind::Tag),
            )),
            _ => Ok((rest, tok.clone())),
        }
    }
}

fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        keyword(b"false", Token::False),
        keyword(b"true", Token::True),
        keyword(b"null", Token::Null),
        keyword(b"obj", Token::ObjStart),
        keyword(b"endobj", Token::ObjEnd),
        keyword(b"endstream", Token::StreamEnd),
        keyword(b"stream", Token::StreamStart),
        keyword(b"R", Token::R),
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
    ))(input)
}

/// Parse one token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, _) = skip_ws(input)?;
    alt((parse_keyword, parse_name, parse_number, parse_literal_string, parse_hex_string))(input)
}

/// Parse a bare keyword such as `trailer` or `xref` that is not a value token.
pub fn bare_keyword<'a>(input: &'a [u8], word: &'static str) -> IResult<&'a [u8], ()> {
    let (input, _) = skip_ws(input)?;
    let (rest, found) = take_while1(|c: u8| c.is_ascii_alphabetic())(input)?;
    if found == word.as_bytes() {
        Ok((rest, ()))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)))
    }
}
