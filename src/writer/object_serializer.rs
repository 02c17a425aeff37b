//! PDF object serialization.
//!
//! Output is deterministic: dictionary keys are written in sorted order so
//! that re-processing the same input yields byte-identical files.

use crate::object::{Object, PdfDict};

/// Serializer for PDF objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Whether to use compact formatting (minimal whitespace)
    compact: bool,
}

impl ObjectSerializer {
    /// Create a new object serializer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact serializer (minimal whitespace).
    pub fn compact() -> Self {
        Self { compact: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an indirect object definition:
    /// `{id} {gen} obj\n{object}\nendobj\n`.
    pub fn serialize_indirect(&self, id: u32, gen: u16, obj: &Object) -> Vec<u8> {
        let mut buf = format!("{} {} obj\n", id, gen).into_bytes();
        self.write_object(&mut buf, obj);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    fn write_object(&self, w: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => w.extend_from_slice(b"null"),
            Object::Boolean(b) => w.extend_from_slice(if *b { b"true" } else { b"false" }),
            Object::Integer(i) => w.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => write_real(w, *r),
            Object::String(s) => write_string(w, s),
            Object::Name(n) => write_name(w, n),
            Object::Array(items) => {
                w.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        w.push(b' ');
                    }
                    self.write_object(w, item);
                }
                w.push(b']');
            },
            Object::Dictionary(dict) => self.write_dictionary(w, dict),
            Object::Stream { dict, data } => {
                let mut dict = dict.clone();
                dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
                self.write_dictionary(w, &dict);
                w.extend_from_slice(b"\nstream\n");
                w.extend_from_slice(data);
                w.extend_from_slice(b"\nendstream");
            },
            Object::Reference(r) => w.extend_from_slice(format!("{} {} R", r.id, r.gen).as_bytes()),
        }
    }

    fn write_dictionary(&self, w: &mut Vec<u8>, dict: &PdfDict) {
        w.extend_from_slice(b"<<");

        let mut keys: Vec<&String> = dict.keys().collect();
        keys.sort();

        for key in keys {
            w.extend_from_slice(if self.compact { b" " } else { b"\n  " });
            write_name(w, key);
            w.push(b' ');
            self.write_object(w, &dict[key]);
        }

        w.extend_from_slice(if self.compact || dict.is_empty() { b" >>" } else { b"\n>>" });
    }
}

/// Reals with up to five decimals, trailing zeros trimmed.
fn write_real(w: &mut Vec<u8>, value: f64) {
    if !value.is_finite() {
        w.push(b'0');
    } else if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        w.extend_from_slice((value as i64).to_string().as_bytes());
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        w.extend_from_slice(if trimmed == "-0" { "0" } else { trimmed }.as_bytes());
    }
}

/// Literal syntax for printable text, hex syntax for anything else.
fn write_string(w: &mut Vec<u8>, data: &[u8]) {
    let printable = data
        .iter()
        .all(|&b| matches!(b, b'\n' | b'\r' | b'\t' | 0x20..=0x7E));

    if printable {
        w.push(b'(');
        for &byte in data {
            match byte {
                b'(' | b')' | b'\\' => w.extend_from_slice(&[b'\\', byte]),
                b'\n' => w.extend_from_slice(b"\\n"),
                b'\r' => w.extend_from_slice(b"\\r"),
                b'\t' => w.extend_from_slice(b"\\t"),
                _ => w.push(byte),
            }
        }
        w.push(b')');
    } else {
        w.push(b'<');
        w.extend_from_slice(hex_upper(data).as_bytes());
        w.push(b'>');
    }
}

/// `#xx`-escape every byte outside the regular-character set.
fn write_name(w: &mut Vec<u8>, name: &str) {
    w.push(b'/');
    for byte in name.bytes() {
        if byte > 0x20 && byte < 0x7F && byte != b'#' && !crate::lexer::is_delimiter(byte) {
            w.push(byte);
        } else {
            w.extend_from_slice(format!("#{:02X}", byte).as_bytes());
        }
    }
}

/// Upper-case hex encoding.
pub fn hex_upper(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRef;
    use crate::parser::parse_object;

    fn ser(obj: &Object) -> String {
        String::from_utf8(ObjectSerializer::compact().serialize(obj)).unwrap()
    }

    #[test]
    fn test_primitives() {
        assert_eq!(ser(&Object::Null), "null");
        assert_eq!(ser(&Object::Boolean(true)), "true");
        assert_eq!(ser(&Object::Integer(-42)), "-42");
        assert_eq!(ser(&Object::Real(3.0)), "3");
        assert_eq!(ser(&Object::Real(0.125)), "0.125");
        assert_eq!(ser(&Object::Real(f64::NAN)), "0");
        assert_eq!(ser(&Object::Reference(ObjectRef::new(5, 0))), "5 0 R");
    }

    #[test]
    fn test_strings() {
        assert_eq!(ser(&Object::text("a(b)\\")), "(a\\(b\\)\\\\)");
        assert_eq!(ser(&Object::String(vec![0x00, 0xFF])), "<00FF>");
    }

    #[test]
    fn test_name_escaping() {
        assert_eq!(ser(&Object::name("A B")), "/A#20B");
        assert_eq!(ser(&Object::name("Adobe.PPKLite")), "/Adobe.PPKLite");
        assert_eq!(ser(&Object::name("a/b#")), "/a#2Fb#23");
    }

    #[test]
    fn test_dictionary_is_sorted() {
        let mut dict = PdfDict::new();
        dict.insert("Zeta".into(), Object::Integer(1));
        dict.insert("Alpha".into(), Object::Integer(2));
        assert_eq!(ser(&Object::Dictionary(dict)), "<< /Alpha 2 /Zeta 1 >>");
    }

    #[test]
    fn test_stream_length_is_rewritten() {
        let mut dict = PdfDict::new();
        dict.insert("Length".into(), Object::Integer(999));
        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"abc"),
        };
        let out = ser(&stream);
        assert!(out.starts_with("<< /Length 3 >>\nstream\nabc\nendstream"));
    }

    #[test]
    fn test_output_parses_back() {
        let mut dict = PdfDict::new();
        dict.insert("Kids".into(), Object::Array(vec![Object::Reference(ObjectRef::new(3, 0))]));
        dict.insert("Title".into(), Object::text("Quarterly (draft)"));
        dict.insert("Weird Name".into(), Object::Real(-1.5));
        let original = Object::Dictionary(dict);

        let bytes = ObjectSerializer::new().serialize(&original);
        let (_, parsed) = parse_object(&bytes).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_indirect() {
        let out = ObjectSerializer::compact().serialize_indirect(7, 0, &Object::Integer(1));
        assert_eq!(out, b"7 0 obj\n1\nendobj\n");
    }
}
