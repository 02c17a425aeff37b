//! Full document rewrite.
//!
//! Emits every object once, in object-number order, followed by a fresh
//! classic cross-reference table. Used after stamping, before any signature
//! exists, so no previously written byte needs to be preserved.

use crate::document::PdfDocument;
use crate::object::{Object, ObjectRef, PdfDict};
use crate::writer::object_serializer::ObjectSerializer;
use std::collections::BTreeMap;

/// Trailer keys carried over from the source document.
const CARRIED_TRAILER_KEYS: [&str; 3] = ["Root", "Info", "ID"];

/// Assembles a complete PDF file from a set of indirect objects.
#[derive(Debug, Clone)]
pub struct PdfWriter {
    version: (u8, u8),
    objects: BTreeMap<u32, (u16, Object)>,
    trailer: PdfDict,
}

impl PdfWriter {
    /// Create an empty writer for the given header version.
    pub fn new(version: (u8, u8)) -> Self {
        Self {
            version,
            objects: BTreeMap::new(),
            trailer: PdfDict::new(),
        }
    }

    /// Seed a writer with every live object of `doc` and its trailer
    /// `/Root`, `/Info` and `/ID`.
    ///
    /// Objects from object streams are written as ordinary objects.
    pub fn from_document(doc: &mut PdfDocument) -> Self {
        let mut writer = Self::new(doc.version());
        for (obj_ref, object) in doc.live_objects() {
            writer.set_object(obj_ref, object);
        }
        for key in CARRIED_TRAILER_KEYS {
            if let Some(value) = doc.trailer().get(key) {
                writer.trailer.insert(key.to_string(), value.clone());
            }
        }
        writer
    }

    /// Insert or replace an object.
    pub fn set_object(&mut self, obj_ref: ObjectRef, object: Object) {
        self.objects.insert(obj_ref.id, (obj_ref.gen, object));
    }

    /// Add an object under the next free object number.
    pub fn add_object(&mut self, object: Object) -> ObjectRef {
        let id = self.objects.keys().next_back().map_or(1, |last| last + 1);
        self.objects.insert(id, (0, object));
        ObjectRef::new(id, 0)
    }

    /// Current object, if any.
    pub fn object(&self, obj_ref: ObjectRef) -> Option<&Object> {
        self.objects.get(&obj_ref.id).map(|(_, object)| object)
    }

    /// Set a trailer entry (`/Size` is always computed).
    pub fn set_trailer_entry(&mut self, key: &str, value: Object) {
        self.trailer.insert(key.to_string(), value);
    }

    /// Serialize the whole file.
    pub fn finish(self) -> Vec<u8> {
        let serializer = ObjectSerializer::new();
        let mut out = format!("%PDF-{}.{}\n", self.version.0, self.version.1).into_bytes();
        // Binary marker comment so transfer tools treat the file as binary
        out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

        let mut offsets: BTreeMap<u32, (usize, u16)> = BTreeMap::new();
        for (id, (gen, object)) in &self.objects {
            offsets.insert(*id, (out.len(), *gen));
            out.extend_from_slice(&serializer.serialize_indirect(*id, *gen, object));
        }

        let size = self.objects.keys().next_back().map_or(1, |last| last + 1);
        let xref_offset = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for id in 1..size {
            match offsets.get(&id) {
                Some((offset, gen)) => {
                    out.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes())
                },
                None => out.extend_from_slice(b"0000000000 00000 f \n"),
            }
        }

        let mut trailer = self.trailer;
        trailer.insert("Size".to_string(), Object::Integer(size as i64));
        out.extend_from_slice(b"trailer\n");
        out.extend_from_slice(&serializer.serialize(&Object::Dictionary(trailer)));
        out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        log::debug!("Full rewrite: {} objects, {} bytes", self.objects.len(), out.len());
        out
    }
}
