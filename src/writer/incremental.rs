//! Incremental updates.
//!
//! Appends new and replacement objects after the original bytes, followed
//! by a cross-reference section with one subsection per object and a
//! trailer whose `/Prev` points at the previous section. The original bytes
//! are copied unchanged.

use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef, PdfDict};
use crate::writer::object_serializer::ObjectSerializer;
use std::collections::BTreeMap;

/// Objects queued for an incremental update of one document.
#[derive(Debug)]
pub struct IncrementalUpdate<'a> {
    base: &'a [u8],
    prev_xref: usize,
    trailer: PdfDict,
    next_id: u32,
    bodies: Vec<(ObjectRef, Vec<u8>)>,
}

/// Result of [`IncrementalUpdate::finish`].
#[derive(Debug, Clone)]
pub struct IncrementalOutput {
    /// Complete file: original bytes plus the appended section
    pub bytes: Vec<u8>,
    /// Offset of each appended object header in `bytes`
    pub offsets: BTreeMap<u32, usize>,
    /// Offset of the appended cross-reference section
    pub xref_offset: usize,
}

impl<'a> IncrementalUpdate<'a> {
    /// Start an update on top of `doc`'s original bytes.
    ///
    /// # Errors
    ///
    /// Fails when the document has no usable `startxref`, since the new
    /// section could not be chained to the old one.
    pub fn new(doc: &'a PdfDocument) -> Result<Self> {
        let prev_xref = match doc.startxref() {
            Some(offset) if !doc.xref().is_reconstructed() => offset,
            _ => {
                return Err(Error::InvalidPdf(
                    "cannot append an update to a document without a valid startxref".to_string(),
                ))
            },
        };

        let mut trailer = PdfDict::new();
        for key in ["Root", "Info", "ID"] {
            if let Some(value) = doc.trailer().get(key) {
                trailer.insert(key.to_string(), value.clone());
            }
        }

        Ok(Self {
            base: doc.bytes(),
            prev_xref,
            trailer,
            next_id: doc.max_object_id() + 1,
            bodies: Vec::new(),
        })
    }

    /// Reserve a new object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let obj_ref = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        obj_ref
    }

    /// Queue an object (new or replacing an existing number).
    pub fn put_object(&mut self, obj_ref: ObjectRef, object: &Object) {
        let body = ObjectSerializer::new().serialize(object);
        self.put_raw(obj_ref, body);
    }

    /// Queue an object whose body is already serialized.
    ///
    /// Used when the caller needs exact control over the bytes, such as
    /// fixed-width placeholders that are patched after writing.
    pub fn put_raw(&mut self, obj_ref: ObjectRef, body: Vec<u8>) {
        self.bodies.retain(|(r, _)| r.id != obj_ref.id);
        self.bodies.push((obj_ref, body));
    }

    /// Append the queued objects, xref section and trailer.
    pub fn finish(self) -> Result<IncrementalOutput> {
        if self.bodies.is_empty() {
            return Err(Error::InvalidPdf("incremental update has no objects".to_string()));
        }

        let mut out = Vec::with_capacity(self.base.len() + 4096);
        out.extend_from_slice(self.base);
        if !out.ends_with(b"\n") {
            out.push(b'\n');
        }

        let mut offsets = BTreeMap::new();
        let mut entries = Vec::with_capacity(self.bodies.len());
        for (obj_ref, body) in &self.bodies {
            offsets.insert(obj_ref.id, out.len());
            entries.push((obj_ref.id, out.len(), obj_ref.gen));
            out.extend_from_slice(format!("{} {} obj\n", obj_ref.id, obj_ref.gen).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }

        let xref_offset = out.len();
        out.extend_from_slice(b"xref\n");
        entries.sort_by_key(|(id, _, _)| *id);
        for (id, offset, gen) in &entries {
            out.extend_from_slice(format!("{} 1\n{:010} {:05} n \n", id, offset, gen).as_bytes());
        }

        let max_written = entries.iter().map(|(id, _, _)| *id).max().unwrap_or(0);
        let size = self.next_id.max(max_written + 1);
        let mut trailer = self.trailer;
        trailer.insert("Size".to_string(), Object::Integer(size as i64));
        trailer.insert("Prev".to_string(), Object::Integer(self.prev_xref as i64));

        out.extend_from_slice(b"trailer\n");
        out.extend_from_slice(&ObjectSerializer::new().serialize(&Object::Dictionary(trailer)));
        out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        log::debug!(
            "Incremental update: {} objects appended after {} original bytes",
            entries.len(),
            self.base.len()
        );

        Ok(IncrementalOutput {
            bytes: out,
            offsets,
            xref_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PdfWriter;

    fn base_pdf() -> Vec<u8> {
        let mut writer = PdfWriter::new((1, 4));
        let mut catalog = PdfDict::new();
        catalog.insert("Type".into(), Object::name("Catalog"));
        catalog.insert("Pages".into(), Object::Reference(ObjectRef::new(2, 0)));
        writer.set_object(ObjectRef::new(1, 0), Object::Dictionary(catalog));
        let mut pages = PdfDict::new();
        pages.insert("Type".into(), Object::name("Pages"));
        pages.insert("Kids".into(), Object::Array(vec![]));
        pages.insert("Count".into(), Object::Integer(0));
        writer.set_object(ObjectRef::new(2, 0), Object::Dictionary(pages));
        writer.set_trailer_entry("Root", Object::Reference(ObjectRef::new(1, 0)));
        writer.finish()
    }

    #[test]
    fn test_original_bytes_preserved() {
        let base = base_pdf();
        let doc = PdfDocument::from_bytes(base.clone()).unwrap();
        let mut update = IncrementalUpdate::new(&doc).unwrap();
        let new_ref = update.allocate();
        assert_eq!(new_ref, ObjectRef::new(3, 0));
        update.put_object(new_ref, &Object::text("appended"));
        let output = update.finish().unwrap();

        assert_eq!(&output.bytes[..base.len()], &base[..]);
        assert!(output.offsets[&3] >= base.len());
    }

    #[test]
    fn test_update_chains_to_previous_section() {
        let base = base_pdf();
        let doc = PdfDocument::from_bytes(base).unwrap();
        let prev = doc.startxref().unwrap();

        let mut update = IncrementalUpdate::new(&doc).unwrap();
        let mut catalog = PdfDict::new();
        catalog.insert("Type".into(), Object::name("Catalog"));
        catalog.insert("Pages".into(), Object::Reference(ObjectRef::new(2, 0)));
        catalog.insert("Marker".into(), Object::Boolean(true));
        update.put_object(ObjectRef::new(1, 0), &Object::Dictionary(catalog));
        let output = update.finish().unwrap();

        let mut reloaded = PdfDocument::from_bytes(output.bytes).unwrap();
        assert_eq!(reloaded.startxref(), Some(output.xref_offset));
        assert_eq!(reloaded.catalog().unwrap().get("Marker"), Some(&Object::Boolean(true)));
        // Object 2 still comes from the original section
        assert_eq!(reloaded.page_count().unwrap(), 0);
        let text = String::from_utf8_lossy(reloaded.bytes()).into_owned();
        assert!(text.contains(&format!("/Prev {}", prev)));
    }

    #[test]
    fn test_empty_update_is_rejected() {
        let doc = PdfDocument::from_bytes(base_pdf()).unwrap();
        let update = IncrementalUpdate::new(&doc).unwrap();
        assert!(update.finish().is_err());
    }
}
