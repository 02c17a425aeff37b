//! Visual stamping.
//!
//! Appends a two-line attestation ("DIGITALLY SIGNED BY <NAME>" and the
//! signing date) to the first page and rewrites the whole document. The
//! existing page content is wrapped in `q`/`Q` so that any graphics state it
//! leaves behind cannot move or recolor the overlay.

use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::object::{Object, PdfDict};
use crate::writer::{ContentStreamBuilder, PdfWriter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placement and styling of the stamp overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StampConfig {
    /// Horizontal offset of both lines from the page's lower-left corner
    pub x: f32,
    /// Vertical offset of the title line from the page's lower-left corner
    pub y: f32,
    /// Distance between the title baseline and the date baseline
    pub line_gap: f32,
    /// Title font size (Helvetica-Bold)
    pub title_size: f32,
    /// Date line font size (Helvetica)
    pub detail_size: f32,
    /// Title fill color (RGB, 0-1)
    pub title_color: [f32; 3],
    /// Date line fill color (RGB, 0-1)
    pub detail_color: [f32; 3],
    /// chrono format string for the date line
    pub date_format: String,
}

impl Default for StampConfig {
    fn default() -> Self {
        Self {
            x: 50.0,
            y: 100.0,
            line_gap: 15.0,
            title_size: 14.0,
            detail_size: 10.0,
            title_color: [1.0, 0.0, 0.0],
            detail_color: [0.0, 0.0, 0.0],
            date_format: "%Y-%m-%d %H:%M:%S UTC".to_string(),
        }
    }
}

/// Font resources added to the stamped page.
const TITLE_FONT: (&str, &str) = ("SealF1", "Helvetica-Bold");
const DETAIL_FONT: (&str, &str) = ("SealF2", "Helvetica");

/// Stamps the first page of a document.
#[derive(Debug, Clone, Default)]
pub struct VisualStamper {
    config: StampConfig,
}

impl VisualStamper {
    /// Create a stamper with the given placement.
    pub fn new(config: StampConfig) -> Self {
        Self { config }
    }

    /// Placement in use.
    pub fn config(&self) -> &StampConfig {
        &self.config
    }

    /// Title line text for a signer.
    pub fn title_line(signer_name: &str) -> String {
        format!("DIGITALLY SIGNED BY {}", signer_name.to_uppercase())
    }

    /// Date line text for a timestamp.
    pub fn date_line(&self, timestamp: &DateTime<Utc>) -> String {
        format!("Date: {}", timestamp.format(&self.config.date_format))
    }

    /// Return a complete new document with the overlay on page 1.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyDocument`] for zero bytes or zero pages
    /// - [`Error::UnsupportedDocument`] when the input is not a readable,
    ///   unencrypted, page-structured PDF
    pub fn stamp(&self, document: &[u8], signer_name: &str, timestamp: &DateTime<Utc>) -> Result<Vec<u8>> {
        if document.is_empty() {
            return Err(Error::EmptyDocument);
        }

        let mut doc = PdfDocument::from_bytes(document.to_vec()).map_err(unsupported)?;
        if doc.is_encrypted() {
            return Err(Error::UnsupportedDocument("document is encrypted".to_string()));
        }

        let pages = doc.page_refs().map_err(unsupported)?;
        let page_ref = *pages.first().ok_or(Error::EmptyDocument)?;
        let media_box = doc.media_box(page_ref).map_err(unsupported)?;
        let resources = doc
            .inherited_attribute(page_ref, "Resources")
            .map_err(unsupported)?
            .unwrap_or_else(|| Object::Dictionary(PdfDict::new()));
        let fonts = match resources.as_dict().and_then(|r| r.get("Font")) {
            Some(font) => doc.resolve(font).map_err(unsupported)?,
            None => Object::Dictionary(PdfDict::new()),
        };

        let mut writer = PdfWriter::from_document(&mut doc);
        let mut page = writer
            .object(page_ref)
            .and_then(|p| p.as_dict())
            .cloned()
            .ok_or_else(|| Error::UnsupportedDocument(format!("page {} is not a dictionary", page_ref)))?;

        // Fonts
        let mut font_dict = fonts.as_dict().cloned().unwrap_or_default();
        let title_font = unique_resource_name(&font_dict, TITLE_FONT.0);
        font_dict.insert(title_font.clone(), Object::Reference(writer.add_object(type1_font(TITLE_FONT.1))));
        let detail_font = unique_resource_name(&font_dict, DETAIL_FONT.0);
        font_dict.insert(detail_font.clone(), Object::Reference(writer.add_object(type1_font(DETAIL_FONT.1))));

        let mut resource_dict = resources.as_dict().cloned().unwrap_or_default();
        resource_dict.insert("Font".to_string(), Object::Dictionary(font_dict));
        page.insert("Resources".to_string(), Object::Dictionary(resource_dict));

        // Content: [q] existing... [Q overlay]
        let overlay = self.overlay_content(&media_box, signer_name, timestamp, &title_font, &detail_font);
        let mut contents = Vec::new();
        let existing = existing_contents(&mut writer, page.get("Contents"));
        if !existing.is_empty() {
            contents.push(Object::Reference(writer.add_object(Object::stream(PdfDict::new(), b"q\n".to_vec()))));
            contents.extend(existing);
        }
        let mut overlay_bytes = if contents.is_empty() { Vec::new() } else { b"Q\n".to_vec() };
        overlay_bytes.extend_from_slice(&overlay);
        contents.push(Object::Reference(writer.add_object(Object::stream(PdfDict::new(), overlay_bytes))));
        page.insert("Contents".to_string(), Object::Array(contents));

        // MediaBox and Rotate stay inherited; only inline what we changed
        writer.set_object(page_ref, Object::Dictionary(page));

        log::debug!("Stamped page {} of {} for '{}'", page_ref, pages.len(), signer_name);
        Ok(writer.finish())
    }

    fn overlay_content(
        &self,
        media_box: &Rect,
        signer_name: &str,
        timestamp: &DateTime<Utc>,
        title_font: &str,
        detail_font: &str,
    ) -> Vec<u8> {
        let cfg = &self.config;
        let (x, y) = clamp_into(media_box, cfg.x, cfg.y, cfg.title_size);
        let [tr, tg, tb] = cfg.title_color;
        let [dr, dg, db] = cfg.detail_color;

        let mut builder = ContentStreamBuilder::new();
        builder
            .save_state()
            .begin_text()
            .set_font(title_font, cfg.title_size)
            .set_fill_color(tr, tg, tb)
            .move_text(x, y)
            .show_text(encode_win_ansi(&Self::title_line(signer_name)))
            .set_font(detail_font, cfg.detail_size)
            .set_fill_color(dr, dg, db)
            .move_text(0.0, -cfg.line_gap)
            .show_text(encode_win_ansi(&self.date_line(timestamp)))
            .end_text()
            .restore_state();
        builder.build()
    }
}

/// Reclassify object-layer failures as an unsupported document.
fn unsupported(err: Error) -> Error {
    match err {
        Error::EmptyDocument | Error::UnsupportedDocument(_) => err,
        other => Error::UnsupportedDocument(other.to_string()),
    }
}

fn type1_font(base_font: &str) -> Object {
    let mut font = PdfDict::new();
    font.insert("Type".to_string(), Object::name("Font"));
    font.insert("Subtype".to_string(), Object::name("Type1"));
    font.insert("BaseFont".to_string(), Object::name(base_font));
    font.insert("Encoding".to_string(), Object::name("WinAnsiEncoding"));
    Object::Dictionary(font)
}

fn unique_resource_name(existing: &PdfDict, base: &str) -> String {
    let mut name = base.to_string();
    let mut n = 1;
    while existing.contains_key(&name) {
        name = format!("{}_{}", base, n);
        n += 1;
    }
    name
}

/// Existing `/Contents` as a list of references; inline streams are moved
/// into new objects.
fn existing_contents(writer: &mut PdfWriter, contents: Option<&Object>) -> Vec<Object> {
    let items = match contents {
        None | Some(Object::Null) => return Vec::new(),
        Some(Object::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            Object::Reference(_) => Some(item),
            stream @ Object::Stream { .. } => Some(Object::Reference(writer.add_object(stream))),
            other => {
                log::warn!("Dropping non-stream /Contents entry of type {}", other.type_name());
                None
            },
        })
        .collect()
}

/// Offset the configured position by the page origin, pulling it back inside
/// the page when the page is too small.
fn clamp_into(media_box: &Rect, x: f32, y: f32, font_size: f32) -> (f32, f32) {
    let max_x = (media_box.width - font_size).max(0.0);
    let max_y = (media_box.height - font_size).max(0.0);
    let cx = x.clamp(0.0, max_x);
    let cy = y.clamp(0.0, max_y);
    if (cx, cy) != (x, y) {
        log::warn!(
            "Stamp position ({}, {}) outside {}x{} page, using ({}, {})",
            x,
            y,
            media_box.width,
            media_box.height,
            cx,
            cy
        );
    }
    (media_box.x + cx, media_box.y + cy)
}

/// Encode text for a WinAnsi simple font; characters outside Latin-1
/// become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRef;
    use chrono::TimeZone;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    fn one_page_pdf(media_box: &str) -> Vec<u8> {
        let mut writer = PdfWriter::new((1, 4));
        let mut catalog = PdfDict::new();
        catalog.insert("Type".into(), Object::name("Catalog"));
        catalog.insert("Pages".into(), Object::Reference(ObjectRef::new(2, 0)));
        writer.set_object(ObjectRef::new(1, 0), Object::Dictionary(catalog));
        let (_, pages) = crate::parser::parse_object(
            format!("<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox {} >>", media_box).as_bytes(),
        )
        .unwrap();
        writer.set_object(ObjectRef::new(2, 0), pages);
        let (_, page) =
            crate::parser::parse_object(b"<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>").unwrap();
        writer.set_object(ObjectRef::new(3, 0), page);
        writer.set_object(
            ObjectRef::new(4, 0),
            Object::stream(PdfDict::new(), b"BT /F0 12 Tf 72 720 Td (Body) Tj ET".to_vec()),
        );
        writer.set_trailer_entry("Root", Object::Reference(ObjectRef::new(1, 0)));
        writer.finish()
    }

    fn page_content(bytes: &[u8]) -> String {
        let mut doc = PdfDocument::from_bytes(bytes.to_vec()).unwrap();
        let page = doc.page_refs().unwrap()[0];
        let page_obj = doc.load_object(page).unwrap();
        let contents = page_obj.as_dict().unwrap()["Contents"].clone();
        let mut text = String::new();
        for item in contents.as_array().unwrap() {
            let stream = doc.resolve(item).unwrap();
            text.push_str(&String::from_utf8_lossy(&stream.decode_stream_data().unwrap()));
        }
        text
    }

    #[test]
    fn test_title_and_date_lines() {
        let stamper = VisualStamper::default();
        assert_eq!(VisualStamper::title_line("alice"), "DIGITALLY SIGNED BY ALICE");
        assert_eq!(stamper.date_line(&timestamp()), "Date: 2024-03-01 12:30:00 UTC");
    }

    #[test]
    fn test_stamp_adds_overlay_after_existing_content() {
        let input = one_page_pdf("[0 0 612 792]");
        let output = VisualStamper::default().stamp(&input, "alice", &timestamp()).unwrap();
        let content = page_content(&output);

        let body = content.find("(Body) Tj").unwrap();
        let title = content.find("(DIGITALLY SIGNED BY ALICE) Tj").unwrap();
        assert!(body < title);
        assert!(content.starts_with("q\n"));
        assert!(content.contains("/SealF1 14 Tf\n1 0 0 rg\n50 100 Td"));
        assert!(content.contains("/SealF2 10 Tf\n0 0 0 rg\n0 -15 Td\n(Date: 2024-03-01 12:30:00 UTC) Tj"));
        assert_eq!(content.matches("BT").count(), 2);
    }

    #[test]
    fn test_fonts_are_registered() {
        let input = one_page_pdf("[0 0 612 792]");
        let output = VisualStamper::default().stamp(&input, "bob", &timestamp()).unwrap();
        let mut doc = PdfDocument::from_bytes(output).unwrap();
        let page = doc.page_refs().unwrap()[0];
        let resources = doc.inherited_attribute(page, "Resources").unwrap().unwrap();
        let fonts = resources.as_dict().unwrap()["Font"].as_dict().unwrap().clone();
        let bold = doc.resolve(&fonts["SealF1"]).unwrap();
        assert_eq!(bold.as_dict().unwrap()["BaseFont"], Object::name("Helvetica-Bold"));
    }

    #[test]
    fn test_offset_media_box() {
        let input = one_page_pdf("[100 200 712 992]");
        let output = VisualStamper::default().stamp(&input, "carol", &timestamp()).unwrap();
        assert!(page_content(&output).contains("150 300 Td"));
    }

    #[test]
    fn test_small_page_clamps_position() {
        let input = one_page_pdf("[0 0 40 60]");
        let output = VisualStamper::default().stamp(&input, "dave", &timestamp()).unwrap();
        assert!(page_content(&output).contains("26 46 Td"));
    }

    #[test]
    fn test_empty_and_garbage_input() {
        let stamper = VisualStamper::default();
        assert!(matches!(stamper.stamp(b"", "x", &timestamp()), Err(Error::EmptyDocument)));
        assert!(matches!(
            stamper.stamp(b"definitely not a pdf", "x", &timestamp()),
            Err(Error::UnsupportedDocument(_))
        ));
    }

    #[test]
    fn test_win_ansi_encoding() {
        assert_eq!(encode_win_ansi("Zoë"), b"Zo\xEB");
        assert_eq!(encode_win_ansi("Иван"), b"????");
    }

    #[test]
    fn test_unique_resource_name() {
        let mut fonts = PdfDict::new();
        fonts.insert("SealF1".into(), Object::Null);
        assert_eq!(unique_resource_name(&fonts, "SealF1"), "SealF1_1");
        assert_eq!(unique_resource_name(&fonts, "SealF2"), "SealF2");
    }
}
