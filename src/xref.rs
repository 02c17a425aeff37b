//! Cross-reference resolution.
//!
//! Maps object numbers to their location in the file. Classic tables,
//! cross-reference streams and hybrid files are read by following the
//! `/Prev` chain from the last `startxref`; entries from newer sections win.
//! When no usable table exists the file is scanned for object headers.

use crate::error::{Error, Result};
use crate::lexer::{is_whitespace, token, Token};
use crate::object::{Object, PdfDict};
use crate::parser::{parse_indirect_object, parse_trailer, to_parse_error};
use std::collections::{HashMap, HashSet};

/// Maximum number of sections followed through `/Prev`.
const MAX_XREF_CHAIN: usize = 100;

/// How far back from the end of file `startxref` is searched for.
const STARTXREF_WINDOW: usize = 2048;

/// Location of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Object number is unused
    Free,
    /// Object stored directly at a byte offset
    InUse {
        /// Byte offset of the `n g obj` header
        offset: usize,
        /// Generation number
        gen: u16,
    },
    /// Object stored inside an object stream
    Compressed {
        /// Object number of the containing object stream
        stream_id: u32,
        /// Index within the object stream
        index: u32,
    },
}

/// Cross-reference table merged across every section of the file.
#[derive(Debug, Clone, Default)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: PdfDict,
    startxref: Option<usize>,
    reconstructed: bool,
}

impl CrossRefTable {
    /// Look up an entry.
    pub fn get(&self, id: u32) -> Option<&XRefEntry> {
        self.entries.get(&id)
    }

    /// Merged trailer dictionary.
    pub fn trailer(&self) -> &PdfDict {
        &self.trailer
    }

    /// Offset of the newest cross-reference section, if the file declared one.
    pub fn startxref(&self) -> Option<usize> {
        self.startxref
    }

    /// Whether the table was rebuilt by scanning.
    pub fn is_reconstructed(&self) -> bool {
        self.reconstructed
    }

    /// Number of entries, free ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Object numbers of every in-use or compressed entry, ascending.
    pub fn live_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| !matches!(e, XRefEntry::Free))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Highest object number mentioned anywhere in the table or trailer.
    pub fn max_id(&self) -> u32 {
        let from_entries = self.entries.keys().copied().max().unwrap_or(0);
        let from_size = self
            .trailer
            .get("Size")
            .and_then(|s| s.as_integer())
            .map(|s| s.saturating_sub(1).max(0) as u32)
            .unwrap_or(0);
        from_entries.max(from_size)
    }

    /// Merge an older section: existing (newer) entries are kept.
    fn merge_older(&mut self, entries: HashMap<u32, XRefEntry>, trailer: PdfDict) {
        for (id, entry) in entries {
            self.entries.entry(id).or_insert(entry);
        }
        for (key, value) in trailer {
            if key != "Prev" && key != "XRefStm" {
                self.trailer.entry(key).or_insert(value);
            }
        }
    }
}

/// Find the byte offset recorded after the last `startxref` keyword.
pub fn find_startxref(data: &[u8]) -> Result<usize> {
    let window_start = data.len().saturating_sub(STARTXREF_WINDOW);
    let tail = &data[window_start..];
    let pos = tail
        .windows(b"startxref".len())
        .rposition(|w| w == b"startxref")
        .ok_or(Error::InvalidXref)?;

    match token(&tail[pos + b"startxref".len()..]) {
        Ok((_, Token::Integer(offset))) if offset >= 0 && (offset as usize) < data.len() => {
            Ok(offset as usize)
        },
        _ => Err(Error::InvalidXref),
    }
}

/// Load the cross-reference table, rebuilding it by scan when necessary.
pub fn load(data: &[u8]) -> Result<CrossRefTable> {
    match load_chain(data) {
        Ok(table) if table.trailer.contains_key("Root") => Ok(table),
        Ok(_) => {
            log::warn!("Trailer has no /Root, reconstructing cross-reference table");
            reconstruct(data)
        },
        Err(e) => {
            log::warn!("Cross-reference table unreadable ({}), reconstructing", e);
            reconstruct(data)
        },
    }
}

fn load_chain(data: &[u8]) -> Result<CrossRefTable> {
    let start = find_startxref(data)?;
    let mut table = CrossRefTable {
        startxref: Some(start),
        ..Default::default()
    };

    let mut visited = HashSet::new();
    let mut next = Some(start);
    let mut depth = 0;

    while let Some(offset) = next.take() {
        if !visited.insert(offset) {
            log::warn!("Cross-reference /Prev loop at offset {}", offset);
            break;
        }
        if depth >= MAX_XREF_CHAIN {
            log::warn!("Cross-reference chain longer than {}, stopping", MAX_XREF_CHAIN);
            break;
        }

        let section = match parse_section(data, offset) {
            Ok(section) => section,
            // The newest section must be readable; older ones are best effort
            Err(e) if depth == 0 => return Err(e),
            Err(e) => {
                log::warn!("Skipping unreadable older xref section at {}: {}", offset, e);
                break;
            },
        };
        depth += 1;

        log::debug!(
            "Xref section at {}: {} entries (prev: {:?})",
            offset,
            section.entries.len(),
            section.trailer.get("Prev")
        );

        next = section
            .trailer
            .get("Prev")
            .and_then(|p| p.as_integer())
            .filter(|p| *p >= 0)
            .map(|p| p as usize);

        // Hybrid file: the companion stream sits between this table and /Prev
        let hybrid = section
            .trailer
            .get("XRefStm")
            .and_then(|p| p.as_integer())
            .filter(|p| *p >= 0)
            .map(|p| p as usize);

        table.merge_older(section.entries, section.trailer);

        if let Some(stm_offset) = hybrid {
            match parse_xref_stream(data, stm_offset) {
                Ok(stream_section) => table.merge_older(stream_section.entries, PdfDict::new()),
                Err(e) => log::warn!("Ignoring unreadable /XRefStm at {}: {}", stm_offset, e),
            }
        }
    }

    Ok(table)
}

struct Section {
    entries: HashMap<u32, XRefEntry>,
    trailer: PdfDict,
}

fn parse_section(data: &[u8], offset: usize) -> Result<Section> {
    if offset >= data.len() {
        return Err(Error::InvalidXref);
    }
    let at = skip_whitespace(data, offset);
    if data[at..].starts_with(b"xref") {
        parse_classic(data, at + b"xref".len())
    } else {
        parse_xref_stream(data, at)
    }
}

fn skip_whitespace(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() && is_whitespace(data[pos]) {
        pos += 1;
    }
    pos
}

/// Read an unsigned decimal number after optional whitespace.
fn read_uint(data: &[u8], pos: &mut usize) -> Option<u64> {
    *pos = skip_whitespace(data, *pos);
    let start = *pos;
    while *pos < data.len() && data[*pos].is_ascii_digit() {
        *pos += 1;
    }
    std::str::from_utf8(&data[start..*pos]).ok()?.parse().ok()
}

fn parse_classic(data: &[u8], mut pos: usize) -> Result<Section> {
    let mut entries = HashMap::new();

    loop {
        let probe = skip_whitespace(data, pos);
        if data[probe..].starts_with(b"trailer") {
            let (_, trailer) =
                parse_trailer(&data[probe..]).map_err(|e| to_parse_error(&data[probe..], e))?;
            return Ok(Section { entries, trailer });
        }

        let first = read_uint(data, &mut pos).ok_or(Error::InvalidXref)?;
        let count = read_uint(data, &mut pos).ok_or(Error::InvalidXref)?;

        for i in 0..count {
            let offset = read_uint(data, &mut pos).ok_or(Error::InvalidXref)?;
            let gen = read_uint(data, &mut pos).ok_or(Error::InvalidXref)?;
            pos = skip_whitespace(data, pos);
            let kind = *data.get(pos).ok_or(Error::InvalidXref)?;
            pos += 1;

            let id = (first + i) as u32;
            let entry = match kind {
                b'n' if offset > 0 => XRefEntry::InUse {
                    offset: offset as usize,
                    gen: gen as u16,
                },
                b'n' | b'f' => XRefEntry::Free,
                _ => return Err(Error::InvalidXref),
            };
            // Within one section the first occurrence counts
            entries.entry(id).or_insert(entry);
        }
    }
}

fn parse_xref_stream(data: &[u8], offset: usize) -> Result<Section> {
    let input = data.get(offset..).ok_or(Error::InvalidXref)?;
    let (_, (_, object)) = parse_indirect_object(input).map_err(|e| to_parse_error(input, e))?;

    if !object.has_type("XRef") {
        return Err(Error::InvalidXref);
    }
    let dict = object.as_dict().ok_or(Error::InvalidXref)?.clone();

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|w| w.as_array())
        .ok_or(Error::InvalidXref)?
        .iter()
        .map(|w| w.as_integer().unwrap_or(0).max(0) as usize)
        .collect();
    if widths.len() != 3 {
        return Err(Error::InvalidXref);
    }

    let size = dict.get("Size").and_then(|s| s.as_integer()).unwrap_or(0);
    let index: Vec<i64> = match dict.get("Index").and_then(|i| i.as_array()) {
        Some(arr) => arr.iter().filter_map(|o| o.as_integer()).collect(),
        None => vec![0, size],
    };

    let decoded = object.decode_stream_data()?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(Error::InvalidXref);
    }

    let mut entries = HashMap::new();
    let mut rows = decoded.chunks_exact(row_len);
    for range in index.chunks(2) {
        let (first, count) = match range {
            [first, count] => (*first, *count),
            _ => break,
        };
        for i in 0..count.max(0) {
            let row = match rows.next() {
                Some(row) => row,
                None => break,
            };
            let (a, rest) = row.split_at(widths[0]);
            let (b, c) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { read_be(a) };
            let entry = match kind {
                0 => XRefEntry::Free,
                1 => XRefEntry::InUse {
                    offset: read_be(b) as usize,
                    gen: read_be(c) as u16,
                },
                2 => XRefEntry::Compressed {
                    stream_id: read_be(b) as u32,
                    index: read_be(c) as u32,
                },
                other => {
                    log::debug!("Ignoring xref stream entry of type {}", other);
                    continue;
                },
            };
            entries.entry((first + i) as u32).or_insert(entry);
        }
    }

    Ok(Section {
        entries,
        trailer: dict,
    })
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Rebuild the table by scanning for `n g obj` headers at line starts.
///
/// Later definitions of the same object number win. The trailer is the last
/// `trailer` dictionary in the file, or a cross-reference stream dictionary,
/// or is synthesised from the catalog found during the scan.
pub fn reconstruct(data: &[u8]) -> Result<CrossRefTable> {
    let mut table = CrossRefTable {
        reconstructed: true,
        ..Default::default()
    };
    let mut catalog = None;
    let mut xref_stream_trailer = None;
    let mut object_streams = Vec::new();

    let mut pos = 0;
    while pos < data.len() {
        let line_start = pos == 0 || matches!(data[pos - 1], b'\n' | b'\r');
        if line_start && data[pos].is_ascii_digit() {
            if let Ok((rest, (obj_ref, object))) = parse_indirect_object(&data[pos..]) {
                table.entries.insert(
                    obj_ref.id,
                    XRefEntry::InUse {
                        offset: pos,
                        gen: obj_ref.gen,
                    },
                );
                if object.has_type("Catalog") {
                    catalog = Some(obj_ref);
                } else if object.has_type("XRef") {
                    xref_stream_trailer = object.as_dict().cloned();
                } else if object.has_type("ObjStm") {
                    object_streams.push((obj_ref.id, object));
                }
                pos = data.len() - rest.len();
                continue;
            }
        }
        pos += 1;
    }

    for (stream_id, stream) in &object_streams {
        match crate::objstm::parse_object_stream(stream) {
            Ok(members) => {
                for (index, (id, object)) in members.into_iter().enumerate() {
                    if object.has_type("Catalog") && catalog.is_none() {
                        catalog = Some(crate::object::ObjectRef::new(id, 0));
                    }
                    table.entries.entry(id).or_insert(XRefEntry::Compressed {
                        stream_id: *stream_id,
                        index: index as u32,
                    });
                }
            },
            Err(e) => log::warn!("Skipping unreadable object stream {}: {}", stream_id, e),
        }
    }

    if let Some(pos) = data.windows(b"trailer".len()).rposition(|w| w == b"trailer") {
        if let Ok((_, trailer)) = parse_trailer(&data[pos..]) {
            table.trailer = trailer;
        }
    }
    if table.trailer.is_empty() {
        if let Some(dict) = xref_stream_trailer {
            table.trailer = dict;
        }
    }

    let root_is_valid = table
        .trailer
        .get("Root")
        .and_then(|r| r.as_reference())
        .is_some_and(|r| table.entries.contains_key(&r.id));
    if !root_is_valid {
        let root = catalog.ok_or_else(|| Error::InvalidPdf("no catalog found".to_string()))?;
        table.trailer.insert("Root".to_string(), Object::Reference(root));
    }

    for key in ["Prev", "XRefStm", "W", "Index", "Type", "Length", "Filter", "DecodeParms"] {
        table.trailer.remove(key);
    }
    let size = table.entries.keys().copied().max().map_or(1, |m| m + 1);
    table.trailer.insert("Size".to_string(), Object::Integer(size as i64));

    if table.entries.is_empty() {
        return Err(Error::InvalidXref);
    }

    log::info!("Reconstructed cross-reference table with {} objects", table.entries.len());
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classic_pdf() -> Vec<u8> {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let o1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let o2 = pdf.len();
        pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
        let xref = pdf.len();
        pdf.extend_from_slice(
            format!(
                "xref\n0 3\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                o1, o2, xref
            )
            .as_bytes(),
        );
        pdf
    }

    #[test]
    fn test_find_startxref() {
        let pdf = classic_pdf();
        let offset = find_startxref(&pdf).unwrap();
        assert!(pdf[offset..].starts_with(b"xref"));
    }

    #[test]
    fn test_classic_table() {
        let pdf = classic_pdf();
        let table = load(&pdf).unwrap();
        assert!(!table.is_reconstructed());
        assert_eq!(table.get(0), Some(&XRefEntry::Free));
        assert!(matches!(table.get(1), Some(XRefEntry::InUse { gen: 0, .. })));
        assert_eq!(table.live_ids(), vec![1, 2]);
        assert_eq!(table.max_id(), 2);
    }

    #[test]
    fn test_prev_chain_newest_wins() {
        let mut pdf = classic_pdf();
        let first_xref = find_startxref(&pdf).unwrap();
        let new_offset = pdf.len();
        pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 /Updated true >>\nendobj\n");
        let xref = pdf.len();
        pdf.extend_from_slice(
            format!(
                "xref\n2 1\n{:010} 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R /Prev {} >>\nstartxref\n{}\n%%EOF\n",
                new_offset, first_xref, xref
            )
            .as_bytes(),
        );

        let table = load(&pdf).unwrap();
        assert_eq!(
            table.get(2),
            Some(&XRefEntry::InUse {
                offset: new_offset,
                gen: 0
            })
        );
        assert!(matches!(table.get(1), Some(XRefEntry::InUse { .. })));
        assert!(!table.trailer().contains_key("Prev"));
    }

    #[test]
    fn test_xref_stream() {
        let mut pdf = b"%PDF-1.5\n".to_vec();
        let o1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let xref = pdf.len();
        // Rows: type(1) offset(2) gen(1)
        let mut rows = vec![0u8, 0, 0, 0xFF];
        rows.extend_from_slice(&[1, (o1 >> 8) as u8, (o1 & 0xFF) as u8, 0]);
        rows.extend_from_slice(&[1, (xref >> 8) as u8, (xref & 0xFF) as u8, 0]);
        pdf.extend_from_slice(
            format!(
                "2 0 obj\n<< /Type /XRef /Size 3 /W [1 2 1] /Root 1 0 R /Length {} >>\nstream\n",
                rows.len()
            )
            .as_bytes(),
        );
        pdf.extend_from_slice(&rows);
        pdf.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref).as_bytes());

        let table = load(&pdf).unwrap();
        assert!(!table.is_reconstructed());
        assert_eq!(table.get(1), Some(&XRefEntry::InUse { offset: o1, gen: 0 }));
        assert!(table.trailer().contains_key("Root"));
    }

    #[test]
    fn test_reconstruct_on_bad_offset() {
        let mut pdf = classic_pdf();
        // Point startxref at an ordinary object instead of the table
        let pos = pdf.windows(9).rposition(|w| w == b"startxref").unwrap();
        pdf.truncate(pos);
        pdf.extend_from_slice(b"startxref\n9\n%%EOF\n");

        let table = load(&pdf).unwrap();
        assert!(table.is_reconstructed());
        assert_eq!(table.live_ids(), vec![1, 2]);
        assert_eq!(
            table.trailer().get("Root").and_then(|r| r.as_reference()),
            Some(crate::object::ObjectRef::new(1, 0))
        );
    }

    #[test]
    fn test_garbage_fails() {
        assert!(load(b"not a pdf at all").is_err());
    }
}
