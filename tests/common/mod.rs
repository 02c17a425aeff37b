//! Shared fixtures for integration tests.

#![allow(dead_code)]

use pdf_sealer::document::PdfDocument;
use pdf_sealer::object::{Object, ObjectRef};
use pdf_sealer::parser::parse_object;
use pdf_sealer::signatures::{IdentityIssuer, SignerIdentity};
use pdf_sealer::writer::PdfWriter;
use std::io::Write;
use std::sync::{Arc, OnceLock};

/// Build a document from `(id, source)` pairs; object 1 must be the catalog.
pub fn build_pdf(objects: &[(u32, &str)], streams: &[(u32, &[u8])]) -> Vec<u8> {
    let mut writer = PdfWriter::new((1, 4));
    for (id, source) in objects {
        let (_, object) = parse_object(source.as_bytes()).expect("fixture object parses");
        writer.set_object(ObjectRef::new(*id, 0), object);
    }
    for (id, data) in streams {
        writer.set_object(ObjectRef::new(*id, 0), Object::stream(Default::default(), data.to_vec()));
    }
    writer.set_trailer_entry("Root", Object::Reference(ObjectRef::new(1, 0)));
    writer.finish()
}

/// Letter-sized page with one line of body text.
pub fn one_page_pdf() -> Vec<u8> {
    build_pdf(
        &[
            (1, "<< /Type /Catalog /Pages 2 0 R >>"),
            (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 612 792] >>"),
            (3, "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>"),
        ],
        &[(4, &b"BT /F0 12 Tf 72 720 Td (Quarterly report) Tj ET"[..])],
    )
}

/// Two pages, each with its own content stream.
pub fn two_page_pdf() -> Vec<u8> {
    build_pdf(
        &[
            (1, "<< /Type /Catalog /Pages 2 0 R >>"),
            (2, "<< /Type /Pages /Kids [3 0 R 5 0 R] /Count 2 /MediaBox [0 0 595 842] >>"),
            (3, "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>"),
            (5, "<< /Type /Page /Parent 2 0 R /Contents 6 0 R >>"),
        ],
        &[
            (4, &b"BT /F0 12 Tf 72 720 Td (Page one) Tj ET"[..]),
            (6, &b"BT /F0 12 Tf 72 720 Td (Page two) Tj ET"[..]),
        ],
    )
}

/// Page whose content stream is Flate compressed.
pub fn compressed_page_pdf() -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(b"BT /F0 12 Tf 72 720 Td (Compressed body) Tj ET")
        .expect("compress fixture");
    let compressed = encoder.finish().expect("compress fixture");

    let mut writer = PdfWriter::new((1, 5));
    for (id, source) in [
        (1, "<< /Type /Catalog /Pages 2 0 R >>"),
        (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 612 792] >>"),
        (3, "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>"),
    ] {
        let (_, object) = parse_object(source.as_bytes()).expect("fixture object parses");
        writer.set_object(ObjectRef::new(id, 0), object);
    }
    let (_, header) = parse_object(b"<< /Filter /FlateDecode >>").expect("fixture object parses");
    let header = header.as_dict().cloned().unwrap_or_default();
    writer.set_object(ObjectRef::new(4, 0), Object::stream(header, compressed));
    writer.set_trailer_entry("Root", Object::Reference(ObjectRef::new(1, 0)));
    writer.finish()
}

/// Catalog with an empty page tree.
pub fn zero_page_pdf() -> Vec<u8> {
    build_pdf(
        &[
            (1, "<< /Type /Catalog /Pages 2 0 R >>"),
            (2, "<< /Type /Pages /Kids [] /Count 0 >>"),
        ],
        &[],
    )
}

/// Serialize objects by hand with a classic xref table, bypassing the
/// parser so fixtures may hold structures it would refuse.
pub fn raw_pdf(objects: &[(u32, String)]) -> Vec<u8> {
    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (id, body) in objects {
        offsets.push((*id, out.len()));
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
    }
    let size = objects.iter().map(|(id, _)| *id).max().unwrap_or(0) + 1;
    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", size).as_bytes());
    for id in 1..size {
        let line = match offsets.iter().find(|(oid, _)| *oid == id) {
            Some((_, offset)) => format!("{:010} 00000 n \n", offset),
            None => "0000000000 65535 f \n".to_string(),
        };
        out.extend_from_slice(line.as_bytes());
    }
    out.extend_from_slice(
        format!("trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", size, xref_at).as_bytes(),
    );
    out
}

/// One page whose dictionary carries an array nested `depth` levels deep.
pub fn deeply_nested_pdf(depth: usize) -> Vec<u8> {
    let junk = format!("{}1{}", "[".repeat(depth), "]".repeat(depth));
    raw_pdf(&[
        (1, "<< /Type /Catalog /Pages 2 0 R >>".to_string()),
        (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 612 792] >>".to_string()),
        (3, format!("<< /Type /Page /Parent 2 0 R /Contents 4 0 R /Junk {} >>", junk)),
        (4, "<< /Length 2 >>\nstream\nq \nendstream".to_string()),
    ])
}

/// Decoded content of a page, streams joined with newlines.
pub fn page_content(pdf: &[u8], page_index: usize) -> String {
    let mut doc = PdfDocument::from_bytes(pdf.to_vec()).expect("document parses");
    let page = doc.page_refs().expect("page tree")[page_index];
    let page_obj = doc.load_object(page).expect("page loads");
    let contents = page_obj.as_dict().expect("page dict")["Contents"].clone();
    let parts = match contents {
        Object::Array(items) => items,
        other => vec![other],
    };
    let mut text = String::new();
    for part in parts {
        let stream = doc.resolve(&part).expect("content resolves");
        let data = stream.decode_stream_data().expect("content decodes");
        text.push_str(&String::from_utf8_lossy(&data));
        text.push('\n');
    }
    text
}

/// One issued identity per test binary; RSA key generation is slow.
pub fn shared_identity() -> Arc<SignerIdentity> {
    static IDENTITY: OnceLock<Arc<SignerIdentity>> = OnceLock::new();
    IDENTITY
        .get_or_init(|| Arc::new(IdentityIssuer::new().issue("Integration Signer").expect("issue identity")))
        .clone()
}

/// DER of the shared identity's certificate.
pub fn shared_certificate_der() -> Vec<u8> {
    use der::Encode;
    shared_identity().certificate_chain()[0]
        .to_der()
        .expect("certificate encodes")
}
