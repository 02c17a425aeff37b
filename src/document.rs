//! In-memory PDF document.
//!
//! Holds the original file bytes together with the resolved cross-reference
//! table. Objects are parsed on demand and cached; the original bytes are
//! never modified, which is what allows incremental updates to be appended
//! after them.

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::object::{Object, ObjectRef, PdfDict};
use crate::parser::{parse_indirect_object, to_parse_error};
use crate::xref::{self, CrossRefTable, XRefEntry};
use std::collections::{HashMap, HashSet};

/// Maximum depth for page tree traversal and reference chains.
const MAX_RECURSION_DEPTH: u32 = 64;

/// How far into the file the `%PDF-` marker may appear.
const HEADER_SEARCH_WINDOW: usize = 1024;

/// A parsed PDF document backed by its original bytes.
///
/// ```
/// use pdf_sealer::document::PdfDocument;
///
/// assert!(PdfDocument::from_bytes(b"plain text".to_vec()).is_err());
/// ```
pub struct PdfDocument {
    data: Vec<u8>,
    version: (u8, u8),
    xref: CrossRefTable,
    object_cache: HashMap<ObjectRef, Object>,
    objstm_cache: HashMap<u32, Vec<(u32, Object)>>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("version", &self.version)
            .field("len", &self.data.len())
            .field("xref_entries", &self.xref.len())
            .field("cached_objects", &self.object_cache.len())
            .finish_non_exhaustive()
    }
}

impl PdfDocument {
    /// Parse a document from its complete bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyDocument`] for zero-length input
    /// - [`Error::InvalidHeader`] when no `%PDF-` marker is found
    /// - xref and parse errors when no catalog can be located
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() {
            return Err(Error::EmptyDocument);
        }

        let version = parse_header(&data)?;
        let xref = xref::load(&data)?;
        log::debug!(
            "Loaded PDF {}.{}: {} bytes, {} xref entries{}",
            version.0,
            version.1,
            data.len(),
            xref.len(),
            if xref.is_reconstructed() { " (reconstructed)" } else { "" }
        );

        Ok(Self {
            data,
            version,
            xref,
            object_cache: HashMap::new(),
            objstm_cache: HashMap::new(),
        })
    }

    /// Original file bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the document and return its original bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Header version (major, minor).
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Merged trailer dictionary.
    pub fn trailer(&self) -> &PdfDict {
        self.xref.trailer()
    }

    /// Cross-reference table.
    pub fn xref(&self) -> &CrossRefTable {
        &self.xref
    }

    /// Offset of the newest xref section, used as `/Prev` by incremental updates.
    pub fn startxref(&self) -> Option<usize> {
        self.xref.startxref()
    }

    /// Highest object number in use.
    pub fn max_object_id(&self) -> u32 {
        self.xref.max_id()
    }

    /// Whether the trailer names an encryption dictionary.
    pub fn is_encrypted(&self) -> bool {
        self.trailer().contains_key("Encrypt")
    }

    /// Load an indirect object.
    pub fn load_object(&mut self, obj_ref: ObjectRef) -> Result<Object> {
        if let Some(cached) = self.object_cache.get(&obj_ref) {
            return Ok(cached.clone());
        }

        let object = match self.xref.get(obj_ref.id).copied() {
            Some(XRefEntry::InUse { offset, .. }) => self.load_uncompressed(obj_ref, offset)?,
            Some(XRefEntry::Compressed { stream_id, .. }) => self.load_compressed(obj_ref, stream_id)?,
            Some(XRefEntry::Free) | None => {
                return Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen));
            },
        };

        self.object_cache.insert(obj_ref, object.clone());
        Ok(object)
    }

    fn load_uncompressed(&self, obj_ref: ObjectRef, offset: usize) -> Result<Object> {
        let parsed = self
            .data
            .get(offset..)
            .and_then(|input| parse_indirect_object(input).ok())
            .map(|(_, parsed)| parsed);

        match parsed {
            Some((found, object)) if found.id == obj_ref.id => Ok(object),
            _ => {
                log::warn!("Object {} not at recorded offset {}, scanning", obj_ref, offset);
                self.scan_for_object(obj_ref)
            },
        }
    }

    /// Find the last `id gen obj` header for an object anywhere in the file.
    fn scan_for_object(&self, obj_ref: ObjectRef) -> Result<Object> {
        let header = format!("{} {} obj", obj_ref.id, obj_ref.gen);
        let needle = header.as_bytes();
        let mut found = None;
        for (pos, window) in self.data.windows(needle.len()).enumerate() {
            let at_line_start = pos == 0 || matches!(self.data[pos - 1], b'\n' | b'\r' | b' ');
            if window == needle && at_line_start {
                found = Some(pos);
            }
        }

        let pos = found.ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;
        let input = &self.data[pos..];
        let (_, (_, object)) = parse_indirect_object(input).map_err(|e| to_parse_error(input, e))?;
        Ok(object)
    }

    fn load_compressed(&mut self, obj_ref: ObjectRef, stream_id: u32) -> Result<Object> {
        if !self.objstm_cache.contains_key(&stream_id) {
            if !matches!(self.xref.get(stream_id), Some(XRefEntry::InUse { .. })) {
                return Err(Error::InvalidPdf(format!(
                    "object stream {} is not stored directly",
                    stream_id
                )));
            }
            let stream = self.load_object(ObjectRef::new(stream_id, 0))?;
            let members = crate::objstm::parse_object_stream(&stream)?;
            self.objstm_cache.insert(stream_id, members);
        }

        self.objstm_cache
            .get(&stream_id)
            .and_then(|members| members.iter().find(|(id, _)| *id == obj_ref.id))
            .map(|(_, object)| object.clone())
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))
    }

    /// Follow references until a direct object is reached.
    ///
    /// References to missing or free objects resolve to `Null`.
    pub fn resolve(&mut self, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        let mut seen = HashSet::new();

        while let Object::Reference(r) = current {
            if !seen.insert(r) {
                return Err(Error::CircularReference(r));
            }
            if seen.len() as u32 > MAX_RECURSION_DEPTH {
                return Err(Error::RecursionLimitExceeded(MAX_RECURSION_DEPTH));
            }
            current = match self.load_object(r) {
                Ok(object) => object,
                Err(Error::ObjectNotFound(..)) => {
                    log::debug!("Reference {} points at a missing object", r);
                    Object::Null
                },
                Err(e) => return Err(e),
            };
        }

        Ok(current)
    }

    /// Reference to the document catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer()
            .get("Root")
            .and_then(|r| r.as_reference())
            .ok_or_else(|| Error::InvalidPdf("Trailer missing /Root reference".to_string()))
    }

    /// The document catalog dictionary.
    pub fn catalog(&mut self) -> Result<PdfDict> {
        let root = self.catalog_ref()?;
        match self.load_object(root)? {
            Object::Dictionary(dict) => Ok(dict),
            other => Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// References of every page in document order.
    pub fn page_refs(&mut self) -> Result<Vec<ObjectRef>> {
        let pages_root = self
            .catalog()?
            .get("Pages")
            .and_then(|p| p.as_reference())
            .ok_or_else(|| Error::InvalidPdf("Catalog missing /Pages reference".to_string()))?;

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(pages_root, 0, &mut visited, &mut pages)?;
        Ok(pages)
    }

    fn collect_pages(
        &mut self,
        node_ref: ObjectRef,
        depth: u32,
        visited: &mut HashSet<ObjectRef>,
        pages: &mut Vec<ObjectRef>,
    ) -> Result<()> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded(MAX_RECURSION_DEPTH));
        }
        if !visited.insert(node_ref) {
            return Err(Error::CircularReference(node_ref));
        }

        let node = self.load_object(node_ref)?;
        let dict = node.as_dict().ok_or_else(|| Error::InvalidObjectType {
            expected: "Dictionary".to_string(),
            found: node.type_name().to_string(),
        })?;

        let kids = dict.get("Kids").cloned();
        let is_page = match dict.get("Type").and_then(|t| t.as_name()) {
            Some("Page") => true,
            Some("Pages") => false,
            _ => kids.is_none(),
        };

        if is_page {
            pages.push(node_ref);
            return Ok(());
        }

        let kids = match kids {
            Some(kids) => self.resolve(&kids)?,
            None => return Ok(()),
        };
        for kid in kids.as_array().map(|k| k.as_slice()).unwrap_or_default() {
            match kid.as_reference() {
                Some(kid_ref) => self.collect_pages(kid_ref, depth + 1, visited, pages)?,
                None => log::warn!("Ignoring direct object in /Kids of {}", node_ref),
            }
        }
        Ok(())
    }

    /// Number of pages.
    pub fn page_count(&mut self) -> Result<usize> {
        Ok(self.page_refs()?.len())
    }

    /// Look up a page attribute, walking `/Parent` links for inheritable keys.
    pub fn inherited_attribute(&mut self, page: ObjectRef, key: &str) -> Result<Option<Object>> {
        let mut current = Some(page);
        let mut seen = HashSet::new();

        while let Some(node_ref) = current {
            if !seen.insert(node_ref) || seen.len() as u32 > MAX_RECURSION_DEPTH {
                return Err(Error::CircularReference(node_ref));
            }
            let node = self.load_object(node_ref)?;
            let dict = match node.as_dict() {
                Some(dict) => dict,
                None => return Ok(None),
            };
            if let Some(value) = dict.get(key) {
                return self.resolve(value).map(Some);
            }
            current = dict.get("Parent").and_then(|p| p.as_reference());
        }

        Ok(None)
    }

    /// Page bounds from `/MediaBox` (inherited), falling back to US Letter.
    pub fn media_box(&mut self, page: ObjectRef) -> Result<Rect> {
        let rect = self
            .inherited_attribute(page, "MediaBox")?
            .and_then(|mb| mb.as_array().and_then(|arr| Rect::from_pdf_array(arr)));
        Ok(rect.unwrap_or_else(|| {
            log::warn!("Page {} has no usable /MediaBox, assuming Letter", page);
            Rect::letter()
        }))
    }

    /// Whether a signature field in the AcroForm already carries a value.
    pub fn has_signature(&mut self) -> Result<bool> {
        Ok(!self.signature_values()?.is_empty())
    }

    /// Values (`/V`) of every signature field in the AcroForm, resolved.
    ///
    /// Field types are inherited from parent fields.
    pub fn signature_values(&mut self) -> Result<Vec<Object>> {
        let acroform = match self.catalog()?.get("AcroForm") {
            Some(obj) => self.resolve(obj)?,
            None => return Ok(Vec::new()),
        };
        let fields = match acroform.as_dict().and_then(|d| d.get("Fields")) {
            Some(obj) => self.resolve(obj)?,
            None => return Ok(Vec::new()),
        };

        let mut stack: Vec<(Object, Option<String>, u32)> = fields
            .as_array()
            .map(|arr| arr.iter().rev().map(|f| (f.clone(), None, 0)).collect())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        let mut values = Vec::new();

        while let Some((field, parent_type, depth)) = stack.pop() {
            if let Some(r) = field.as_reference() {
                if !seen.insert(r) {
                    continue;
                }
            }
            if depth > MAX_RECURSION_DEPTH {
                return Err(Error::RecursionLimitExceeded(MAX_RECURSION_DEPTH));
            }

            let field = self.resolve(&field)?;
            let dict = match field.as_dict() {
                Some(dict) => dict,
                None => continue,
            };
            let field_type = dict
                .get("FT")
                .and_then(|t| t.as_name())
                .map(str::to_string)
                .or(parent_type);

            if field_type.as_deref() == Some("Sig") {
                if let Some(value) = dict.get("V") {
                    let value = self.resolve(value)?;
                    if !value.is_null() {
                        values.push(value);
                    }
                }
            }
            if let Some(kids) = dict.get("Kids").and_then(|k| k.as_array()) {
                for kid in kids.iter().rev() {
                    stack.push((kid.clone(), field_type.clone(), depth + 1));
                }
            }
        }

        Ok(values)
    }

    /// Every live object except cross-reference and object streams, in
    /// object-number order. Objects that fail to load are skipped.
    pub fn live_objects(&mut self) -> Vec<(ObjectRef, Object)> {
        let mut objects = Vec::new();
        for id in self.xref.live_ids() {
            let gen = match self.xref.get(id) {
                Some(XRefEntry::InUse { gen, .. }) => *gen,
                _ => 0,
            };
            let obj_ref = ObjectRef::new(id, gen);
            match self.load_object(obj_ref) {
                Ok(object) if object.has_type("XRef") || object.has_type("ObjStm") => {},
                Ok(object) => objects.push((obj_ref, object)),
                Err(e) => log::warn!("Dropping unreadable object {}: {}", obj_ref, e),
            }
        }
        objects
    }
}

/// Locate `%PDF-M.m` within the first kilobyte and return the version.
pub fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(HEADER_SEARCH_WINDOW)];
    let pos = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| {
            Error::InvalidHeader(String::from_utf8_lossy(&window[..window.len().min(8)]).into_owned())
        })?;

    let version = &data[pos + 5..data.len().min(pos + 8)];
    match version {
        [major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok((major - b'0', minor - b'0'))
        },
        _ => {
            log::warn!("Unreadable PDF version after header, assuming 1.4");
            Ok((1, 4))
        },
    }
}
