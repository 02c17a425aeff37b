//! Signature embedding.
//!
//! Embedding runs in two halves around the signature generator:
//!
//! 1. [`SignatureEmbedder::prepare`] appends an incremental update holding a
//!    signature dictionary with fixed-width `/ByteRange` and `/Contents`
//!    placeholders plus the signature field, patches the ByteRange and
//!    digests everything outside `/Contents`.
//! 2. [`PreparedSignature::finish`] writes the DER container into the
//!    `/Contents` placeholder. No other byte changes, so the digest from step
//!    1 stays valid for the final file.

use super::byterange::ByteRangeCalculator;
use super::identity::SignerIdentity;
use super::signer;
use super::types::{DigestAlgorithm, SignOptions, SignatureEnvelope, MAX_SIGNATURE_RESERVE};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef, PdfDict};
use crate::writer::{IncrementalUpdate, ObjectSerializer, PdfWriter};
use chrono::{DateTime, Utc};

/// Widget flags: Print (4) + Locked (128).
const SIGNATURE_WIDGET_FLAGS: i64 = 132;

/// AcroForm flags: SignaturesExist (1) + AppendOnly (2).
const SIG_FLAGS: i64 = 3;

/// A document with its signature placeholders in place, ready for the
/// container.
#[derive(Debug, Clone)]
pub struct PreparedSignature {
    bytes: Vec<u8>,
    contents_offset: usize,
    byte_range: [i64; 4],
    digest: Vec<u8>,
    calculator: ByteRangeCalculator,
}

impl PreparedSignature {
    /// Digest over both ByteRange segments; this is what gets signed.
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// ByteRange written into the signature dictionary.
    pub fn byte_range(&self) -> [i64; 4] {
        self.byte_range
    }

    /// File bytes with the `/Contents` placeholder still zero-filled.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Fill the placeholder with `container` and return the final file.
    ///
    /// # Errors
    ///
    /// [`Error::PlaceholderTooSmall`] if the container does not fit.
    pub fn finish(mut self, container: &[u8]) -> Result<Vec<u8>> {
        self.calculator
            .insert_signature(&mut self.bytes, self.contents_offset, container)?;
        Ok(self.bytes)
    }
}

/// Output of [`SignatureEmbedder::embed`].
#[derive(Debug, Clone)]
pub struct EmbeddedSignature {
    /// Final signed file
    pub bytes: Vec<u8>,
    /// SHA-256 digest of the ByteRange segments
    pub digest: Vec<u8>,
    /// ByteRange of the embedded signature
    pub byte_range: [i64; 4],
    /// The envelope written into `/Contents`
    pub envelope: SignatureEnvelope,
}

/// Adds a detached CMS signature to a document by incremental update.
#[derive(Debug, Clone, Default)]
pub struct SignatureEmbedder {
    options: SignOptions,
}

impl SignatureEmbedder {
    /// Create an embedder with the given options.
    pub fn new(options: SignOptions) -> Self {
        Self { options }
    }

    /// Signing options in use.
    pub fn options(&self) -> &SignOptions {
        &self.options
    }

    /// Sign `stamped` with `identity` and embed the signature.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyDocument`] for zero bytes or zero pages
    /// - [`Error::UnsupportedDocument`] for unreadable or encrypted input
    /// - [`Error::AlreadySigned`] when a signature value already exists
    /// - [`Error::Signing`] and [`Error::PlaceholderTooSmall`] from the
    ///   signing half
    pub fn embed(
        &self,
        stamped: &[u8],
        identity: &SignerIdentity,
        signer_name: &str,
        reason: &str,
    ) -> Result<EmbeddedSignature> {
        let prepared = self.prepare(stamped, signer_name, reason, Utc::now())?;
        let envelope = signer::sign(prepared.digest(), identity)?;
        let digest = prepared.digest.clone();
        let byte_range = prepared.byte_range;
        let bytes = prepared.finish(&envelope.signature_bytes)?;

        log::debug!(
            "Embedded {}-byte signature, ByteRange {}",
            envelope.signature_bytes.len(),
            ByteRangeCalculator::format_byte_range(&byte_range)
        );
        Ok(EmbeddedSignature {
            bytes,
            digest,
            byte_range,
            envelope,
        })
    }

    /// Append the signature objects and compute the digest to sign.
    pub fn prepare(
        &self,
        stamped: &[u8],
        signer_name: &str,
        reason: &str,
        signing_time: DateTime<Utc>,
    ) -> Result<PreparedSignature> {
        if stamped.is_empty() {
            return Err(Error::EmptyDocument);
        }
        if self.options.signature_reserve > MAX_SIGNATURE_RESERVE {
            return Err(Error::Config(format!(
                "signature_reserve {} exceeds {} bytes",
                self.options.signature_reserve, MAX_SIGNATURE_RESERVE
            )));
        }
        let mut doc = PdfDocument::from_bytes(stamped.to_vec()).map_err(unreadable)?;
        if doc.is_encrypted() {
            return Err(Error::UnsupportedDocument("document is encrypted".to_string()));
        }
        if doc.has_signature().map_err(unreadable)? {
            return Err(Error::AlreadySigned);
        }
        if doc.startxref().is_none() || doc.xref().is_reconstructed() {
            log::warn!("Cross-reference data was rebuilt; rewriting before the signature update");
            let rewritten = PdfWriter::from_document(&mut doc).finish();
            doc = PdfDocument::from_bytes(rewritten).map_err(unreadable)?;
        }

        let page_ref = *doc
            .page_refs()
            .map_err(unreadable)?
            .first()
            .ok_or(Error::EmptyDocument)?;
        let mut page = load_dict(&mut doc, page_ref)?;
        let catalog_ref = doc.catalog_ref().map_err(unreadable)?;
        let mut catalog = doc.catalog().map_err(unreadable)?;

        let (acroform_ref, mut acroform) = match catalog.get("AcroForm") {
            Some(Object::Reference(r)) => (Some(*r), load_dict(&mut doc, *r)?),
            Some(Object::Dictionary(d)) => (None, d.clone()),
            _ => (None, PdfDict::new()),
        };
        let mut fields = resolved_array(&mut doc, acroform.get("Fields"))?;
        let mut annots = resolved_array(&mut doc, page.get("Annots"))?;

        let calculator = ByteRangeCalculator::new(self.options.signature_reserve);
        let mut update = IncrementalUpdate::new(&doc)?;
        let sig_ref = update.allocate();
        let field_ref = update.allocate();

        update.put_raw(
            sig_ref,
            self.signature_dictionary(&calculator, signer_name, reason, signing_time),
        );

        let mut field = PdfDict::new();
        field.insert("Type".to_string(), Object::name("Annot"));
        field.insert("Subtype".to_string(), Object::name("Widget"));
        field.insert("FT".to_string(), Object::name("Sig"));
        field.insert("T".to_string(), Object::text(&format!("Signature{}", fields.len() + 1)));
        field.insert("V".to_string(), Object::Reference(sig_ref));
        field.insert("F".to_string(), Object::Integer(SIGNATURE_WIDGET_FLAGS));
        field.insert("Rect".to_string(), Object::Array(vec![Object::Integer(0); 4]));
        field.insert("P".to_string(), Object::Reference(page_ref));
        update.put_object(field_ref, &Object::Dictionary(field));

        annots.push(Object::Reference(field_ref));
        page.insert("Annots".to_string(), Object::Array(annots));
        update.put_object(page_ref, &Object::Dictionary(page));

        fields.push(Object::Reference(field_ref));
        acroform.insert("Fields".to_string(), Object::Array(fields));
        acroform.insert("SigFlags".to_string(), Object::Integer(SIG_FLAGS));
        match acroform_ref {
            Some(r) => update.put_object(r, &Object::Dictionary(acroform)),
            None => {
                catalog.insert("AcroForm".to_string(), Object::Dictionary(acroform));
                update.put_object(catalog_ref, &Object::Dictionary(catalog));
            },
        }

        let output = update.finish()?;
        let mut bytes = output.bytes;
        let sig_offset = output
            .offsets
            .get(&sig_ref.id)
            .copied()
            .ok_or_else(|| Error::Signing("signature dictionary was not written".to_string()))?;
        let contents_offset = ByteRangeCalculator::find_contents_offset(&bytes, sig_offset)
            .ok_or_else(|| Error::Signing("/Contents placeholder not found".to_string()))?;
        let range_offset = ByteRangeCalculator::find_byte_range_offset(&bytes, sig_offset)
            .ok_or_else(|| Error::Signing("/ByteRange placeholder not found".to_string()))?;

        let byte_range = calculator.calculate_byte_range(bytes.len(), contents_offset);
        ByteRangeCalculator::patch_byte_range(&mut bytes, range_offset, &byte_range)?;
        let digest = DigestAlgorithm::Sha256
            .digest_parts(&ByteRangeCalculator::signed_ranges(&bytes, &byte_range)?);

        Ok(PreparedSignature {
            bytes,
            contents_offset,
            byte_range,
            digest,
            calculator,
        })
    }

    /// Signature dictionary body with both placeholders, written by hand so
    /// their byte widths are fixed.
    fn signature_dictionary(
        &self,
        calculator: &ByteRangeCalculator,
        signer_name: &str,
        reason: &str,
        signing_time: DateTime<Utc>,
    ) -> Vec<u8> {
        let serializer = ObjectSerializer::compact();
        let text = |value: &str| String::from_utf8_lossy(&serializer.serialize(&Object::text(value))).into_owned();

        let mut dict = String::from("<<\n");
        dict.push_str("/Type /Sig\n");
        dict.push_str("/Filter /Adobe.PPKLite\n");
        dict.push_str(&format!("/SubFilter /{}\n", self.options.sub_filter.as_pdf_name()));
        dict.push_str(&format!("/ByteRange {}\n", ByteRangeCalculator::byte_range_placeholder()));
        dict.push_str(&format!("/Contents {}\n", calculator.generate_placeholder()));
        dict.push_str(&format!("/Name {}\n", text(signer_name)));
        dict.push_str(&format!("/Reason {}\n", text(reason)));
        dict.push_str(&format!("/Location {}\n", text(&self.options.location)));
        if let Some(contact) = &self.options.contact_info {
            dict.push_str(&format!("/ContactInfo {}\n", text(contact)));
        }
        dict.push_str(&format!("/M {}\n", text(&format_pdf_date(&signing_time))));
        dict.push_str(">>");
        dict.into_bytes()
    }
}

/// Format a timestamp as a PDF date string.
pub fn format_pdf_date(time: &DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

fn unreadable(err: Error) -> Error {
    match err {
        Error::EmptyDocument | Error::UnsupportedDocument(_) => err,
        other => Error::UnsupportedDocument(other.to_string()),
    }
}

fn load_dict(doc: &mut PdfDocument, obj_ref: ObjectRef) -> Result<PdfDict> {
    match doc.load_object(obj_ref).map_err(unreadable)? {
        Object::Dictionary(dict) => Ok(dict),
        other => Err(Error::UnsupportedDocument(format!(
            "object {} is a {}, expected a dictionary",
            obj_ref,
            other.type_name()
        ))),
    }
}

fn resolved_array(doc: &mut PdfDocument, value: Option<&Object>) -> Result<Vec<Object>> {
    match value {
        Some(obj) => Ok(doc
            .resolve(obj)
            .map_err(unreadable)?
            .as_array()
            .cloned()
            .unwrap_or_default()),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::identity::IdentityIssuer;
    use chrono::TimeZone;
    use std::sync::OnceLock;

    fn identity() -> &'static SignerIdentity {
        static IDENTITY: OnceLock<SignerIdentity> = OnceLock::new();
        IDENTITY.get_or_init(|| IdentityIssuer::new().issue("embedder test").unwrap())
    }

    fn one_page_pdf() -> Vec<u8> {
        let mut writer = PdfWriter::new((1, 7));
        let (_, catalog) = crate::parser::parse_object(b"<< /Type /Catalog /Pages 2 0 R >>").unwrap();
        writer.set_object(ObjectRef::new(1, 0), catalog);
        let (_, pages) =
            crate::parser::parse_object(b"<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 612 792] >>")
                .unwrap();
        writer.set_object(ObjectRef::new(2, 0), pages);
        let (_, page) = crate::parser::parse_object(b"<< /Type /Page /Parent 2 0 R >>").unwrap();
        writer.set_object(ObjectRef::new(3, 0), page);
        writer.set_trailer_entry("Root", Object::Reference(ObjectRef::new(1, 0)));
        writer.finish()
    }

    fn signing_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    #[test]
    fn test_prepare_preserves_original_bytes() {
        let input = one_page_pdf();
        let prepared = SignatureEmbedder::default()
            .prepare(&input, "Alice", "Approval", signing_time())
            .unwrap();
        assert_eq!(&prepared.bytes()[..input.len()], &input[..]);

        let br = prepared.byte_range();
        assert!(ByteRangeCalculator::validate_byte_range(&br, prepared.bytes().len()).is_ok());
        assert_eq!(prepared.bytes()[br[1] as usize], b'<');
        assert_eq!(prepared.bytes()[br[2] as usize - 1], b'>');
    }

    #[test]
    fn test_signature_dictionary_fields() {
        let prepared = SignatureEmbedder::default()
            .prepare(&one_page_pdf(), "Alice", "Approval", signing_time())
            .unwrap();
        let text = String::from_utf8_lossy(prepared.bytes());
        assert!(text.contains("/SubFilter /adbe.pkcs7.detached"));
        assert!(text.contains("/Name (Alice)"));
        assert!(text.contains("/Reason (Approval)"));
        assert!(text.contains("/Location (SecureSign System)"));
        assert!(text.contains("/M (D:20240506070809+00'00')"));
    }

    #[test]
    fn test_digest_survives_finish() {
        let embedder = SignatureEmbedder::default();
        let prepared = embedder
            .prepare(&one_page_pdf(), "Alice", "Approval", signing_time())
            .unwrap();
        let digest = prepared.digest().to_vec();
        let br = prepared.byte_range();
        let final_bytes = prepared.finish(&[0x30, 0x03, 0x02, 0x01, 0x01]).unwrap();

        let recomputed =
            DigestAlgorithm::Sha256.digest_parts(&ByteRangeCalculator::signed_ranges(&final_bytes, &br).unwrap());
        assert_eq!(digest, recomputed);
    }

    #[test]
    fn test_signature_field_is_registered() {
        let result = SignatureEmbedder::default()
            .embed(&one_page_pdf(), identity(), "Alice", "Approval")
            .unwrap();
        let mut doc = PdfDocument::from_bytes(result.bytes).unwrap();
        assert!(doc.has_signature().unwrap());
        let catalog = doc.catalog().unwrap();
        let acroform = catalog["AcroForm"].as_dict().unwrap();
        assert_eq!(acroform["SigFlags"], Object::Integer(3));
        assert_eq!(doc.page_count().unwrap(), 1);
    }

    #[test]
    fn test_second_signature_is_rejected() {
        let embedder = SignatureEmbedder::default();
        let signed = embedder.embed(&one_page_pdf(), identity(), "Alice", "Approval").unwrap();
        assert!(matches!(
            embedder.embed(&signed.bytes, identity(), "Bob", "Approval"),
            Err(Error::AlreadySigned)
        ));
    }

    #[test]
    fn test_undersized_placeholder() {
        let embedder = SignatureEmbedder::new(SignOptions::default().with_signature_reserve(64));
        let result = embedder.embed(&one_page_pdf(), identity(), "Alice", "Approval");
        assert!(matches!(result, Err(Error::PlaceholderTooSmall { reserved: 64, .. })));
    }

    #[test]
    fn test_oversized_reserve_is_rejected() {
        let embedder = SignatureEmbedder::new(SignOptions::default().with_signature_reserve(usize::MAX));
        let result = embedder.embed(&one_page_pdf(), identity(), "Alice", "Approval");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_input() {
        let result = SignatureEmbedder::default().embed(b"", identity(), "Alice", "Approval");
        assert!(matches!(result, Err(Error::EmptyDocument)));
    }

    #[test]
    fn test_pdf_date_format() {
        assert_eq!(format_pdf_date(&signing_time()), "D:20240506070809+00'00'");
    }
}
