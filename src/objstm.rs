//! Object streams (`/Type /ObjStm`).
//!
//! The decoded stream starts with `/N` pairs of integers (object number and
//! offset relative to `/First`), followed by the objects themselves.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::Object;
use crate::parser::parse_object;

/// Parse an object stream into `(object number, object)` pairs in stream order.
///
/// Members that fail to parse are skipped with a warning so that one bad
/// entry does not hide the rest of the stream.
pub fn parse_object_stream(stream: &Object) -> Result<Vec<(u32, Object)>> {
    let dict = match stream {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: other.type_name().to_string(),
            })
        },
    };

    let n = dict
        .get("N")
        .and_then(|o| o.as_integer())
        .filter(|n| (0..=1_000_000).contains(n))
        .ok_or_else(|| Error::InvalidPdf("object stream has no valid /N".to_string()))?
        as usize;
    let first = dict
        .get("First")
        .and_then(|o| o.as_integer())
        .filter(|f| *f >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream has no valid /First".to_string()))?
        as usize;

    let decoded = stream.decode_stream_data()?;
    if decoded.len() < first {
        return Err(Error::InvalidPdf(format!(
            "object stream data is {} bytes but /First is {}",
            decoded.len(),
            first
        )));
    }

    let (header, body) = decoded.split_at(first);
    let mut members = Vec::with_capacity(n);
    let mut cursor = header;

    for _ in 0..n {
        let (rest, id) = match token(cursor) {
            Ok((rest, Token::Integer(id))) if id >= 0 => (rest, id as u32),
            _ => break,
        };
        let (rest, offset) = match token(rest) {
            Ok((rest, Token::Integer(off))) if off >= 0 => (rest, off as usize),
            _ => break,
        };
        cursor = rest;

        match body.get(offset..).map(parse_object) {
            Some(Ok((_, object))) => members.push((id, object)),
            Some(Err(e)) => log::warn!("Object {} in object stream failed to parse: {:?}", id, e),
            None => log::warn!("Object {} offset {} is outside the object stream", id, offset),
        }
    }

    if members.len() < n {
        log::debug!("Object stream declared {} objects, read {}", n, members.len());
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PdfDict;

    fn objstm(header: &str, body: &str) -> Object {
        let mut dict = PdfDict::new();
        dict.insert("Type".into(), Object::name("ObjStm"));
        dict.insert("N".into(), Object::Integer(2));
        dict.insert("First".into(), Object::Integer(header.len() as i64));
        Object::stream(dict, format!("{}{}", header, body).into_bytes())
    }

    #[test]
    fn test_parse_members() {
        let stream = objstm("10 0 11 14 ", "<< /A 1 >>    [1 2 3]");
        let members = parse_object_stream(&stream).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].0, 10);
        assert!(members[0].1.as_dict().is_some());
        assert_eq!(members[1].0, 11);
        assert_eq!(members[1].1.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_out_of_range_member_is_skipped() {
        let stream = objstm("10 0 11 99 ", "<< /A 1 >>");
        let members = parse_object_stream(&stream).unwrap();
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn test_not_a_stream() {
        assert!(parse_object_stream(&Object::Null).is_err());
    }
}
