//! PDF signature verification.
//!
//! Checks, for each signature dictionary in the AcroForm:
//!
//! 1. the ByteRange starts at 0, leaves one gap and ends at the file size
//! 2. the message-digest signed attribute equals the digest of both ranges
//! 3. the RSA signature over the DER signed attributes verifies against the
//!    signer certificate
//! 4. the signer certificate is signed by its issuer (itself when
//!    self-signed)
//!
//! Trust is explicit: a certificate is trusted only when it, or a member of
//! its embedded chain, is byte-identical to a configured root.

use super::byterange::ByteRangeCalculator;
use super::identity::certificate_public_key;
use super::types::{
    DigestAlgorithm, SignatureInfo, SignatureSubFilter, VerificationResult, VerificationStatus,
};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::Object;
use chrono::{DateTime, Utc};
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use const_oid::ObjectIdentifier;
use der::asn1::OctetString;
use der::{Decode, Encode, SliceReader};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::RsaPublicKey;
use sha2::{Sha256, Sha384, Sha512};
use signature::Verifier;
use x509_cert::Certificate;

/// Verifier for PDF digital signatures.
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    /// Trusted root certificates (DER-encoded)
    trusted_roots: Vec<Vec<u8>>,
}

impl SignatureVerifier {
    /// Create a new signature verifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trusted root certificate.
    pub fn add_trusted_root(&mut self, cert_der: Vec<u8>) {
        self.trusted_roots.push(cert_der);
    }

    /// Add multiple trusted root certificates.
    pub fn add_trusted_roots(&mut self, certs: Vec<Vec<u8>>) {
        self.trusted_roots.extend(certs);
    }

    /// Trust every certificate of a PEM bundle.
    pub fn add_trusted_pem(&mut self, pem: &str) -> Result<usize> {
        let certs = Certificate::load_pem_chain(pem.as_bytes())
            .map_err(|e| Error::CryptoProvider(format!("unreadable trusted certificates: {}", e)))?;
        for cert in &certs {
            self.trusted_roots.push(cert.to_der()?);
        }
        Ok(certs.len())
    }

    /// Verify every signature in a document.
    ///
    /// Returns an empty list for documents without signatures.
    pub fn verify_document(&self, pdf_data: &[u8]) -> Result<Vec<VerificationResult>> {
        let mut doc = PdfDocument::from_bytes(pdf_data.to_vec())?;
        let values = doc.signature_values()?;
        log::debug!("Found {} signature value(s)", values.len());
        values.iter().map(|sig_dict| self.verify(pdf_data, sig_dict)).collect()
    }

    /// Extract signature information from a signature dictionary.
    pub fn extract_signature_info(&self, sig_dict: &Object) -> Result<SignatureInfo> {
        let dict = match sig_dict {
            Object::Dictionary(d) => d,
            _ => return Err(Error::InvalidPdf("Signature must be a dictionary".to_string())),
        };

        let text = |key: &str| dict.get(key).and_then(|v| v.as_text());
        let mut info = SignatureInfo {
            signer_name: text("Name"),
            signing_time: text("M"),
            reason: text("Reason"),
            location: text("Location"),
            sub_filter: dict
                .get("SubFilter")
                .and_then(|s| s.as_name())
                .and_then(SignatureSubFilter::from_pdf_name),
            ..SignatureInfo::default()
        };

        if let Some(Object::Array(byte_range)) = dict.get("ByteRange") {
            info.byte_range = byte_range.iter().filter_map(|obj| obj.as_integer()).collect();
        }
        info.covers_whole_document = info.byte_range.len() == 4;

        Ok(info)
    }

    /// Verify one signature dictionary against the file it came from.
    ///
    /// Structural and cryptographic failures are reported in the result with
    /// [`VerificationStatus::Invalid`], not as errors.
    pub fn verify(&self, pdf_data: &[u8], sig_dict: &Object) -> Result<VerificationResult> {
        let mut result = VerificationResult {
            signature_info: self.extract_signature_info(sig_dict)?,
            ..VerificationResult::default()
        };

        let parsed = match result.signature_info.byte_range.as_slice() {
            [a, b, c, d] => Some([*a, *b, *c, *d]),
            _ => None,
        };
        let byte_range: [i64; 4] = match parsed {
            Some(byte_range) => byte_range,
            None => return Ok(invalid(result, "Invalid ByteRange: expected 4 elements")),
        };
        if let Err(e) = ByteRangeCalculator::validate_byte_range(&byte_range, pdf_data.len()) {
            result.document_modified = byte_range[2] + byte_range[3] < pdf_data.len() as i64;
            result.signature_info.covers_whole_document = false;
            return Ok(invalid(result, &format!("ByteRange validation failed: {}", e)));
        }

        let contents = match sig_dict.as_dict().and_then(|d| d.get("Contents")).and_then(|c| c.as_string()) {
            Some(contents) => contents,
            None => return Ok(invalid(result, "Signature dictionary has no /Contents")),
        };
        let ranges = ByteRangeCalculator::signed_ranges(pdf_data, &byte_range)?;

        match self.verify_pkcs7(contents, &ranges) {
            Ok(checked) => {
                result.digest_matches = checked.digest_matches;
                result.signature_valid = checked.signature_valid;
                result.chain_valid = checked.chain_valid;
                result.certificate_expired = checked.expired;
                result.certificate_trusted = self.is_trusted(&checked.chain_der);
                result.signature_info.certificate_cn = checked.common_name;
                result.signature_info.certificate_issuer = checked.issuer;
                result.signature_info.valid_from = checked.valid_from;
                result.signature_info.valid_to = checked.valid_to;
            },
            Err(e) => return Ok(invalid(result, &format!("Signature verification failed: {}", e))),
        }

        let status = if !(result.digest_matches && result.signature_valid && result.chain_valid) {
            if !result.digest_matches {
                result.messages.push("Document digest does not match the signed digest".to_string());
            }
            if !result.signature_valid {
                result.messages.push("Signature does not verify against the certificate".to_string());
            }
            if !result.chain_valid {
                result.messages.push("Certificate signature does not verify".to_string());
            }
            VerificationStatus::Invalid
        } else if !result.certificate_trusted {
            result.messages.push("Certificate is not trusted".to_string());
            VerificationStatus::Unknown
        } else if result.certificate_expired {
            result.messages.push("Certificate is outside its validity period".to_string());
            VerificationStatus::ValidWithWarnings
        } else {
            VerificationStatus::Valid
        };
        result.status = status;

        Ok(result)
    }

    /// Decode the CMS container and run the cryptographic checks.
    fn verify_pkcs7(&self, contents: &[u8], ranges: &[&[u8]]) -> Result<CertificateCheck> {
        // /Contents is zero-padded past the DER value
        let mut reader = SliceReader::new(contents)?;
        let content_info = ContentInfo::decode(&mut reader)?;
        if content_info.content_type != const_oid::db::rfc5911::ID_SIGNED_DATA {
            return Err(Error::Signing(format!(
                "unexpected content type {}",
                content_info.content_type
            )));
        }
        let signed_data: SignedData = content_info.content.decode_as()?;
        let signer_info = signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or_else(|| Error::Signing("no signer info".to_string()))?;

        let certificates: Vec<Certificate> = signed_data
            .certificates
            .iter()
            .flat_map(|set| set.0.iter())
            .filter_map(|choice| match choice {
                CertificateChoices::Certificate(cert) => Some(cert.clone()),
                _ => None,
            })
            .collect();
        let signer_cert = find_signer_certificate(signer_info, &certificates)?;

        let algorithm = DigestAlgorithm::from_oid(&signer_info.digest_alg.oid).ok_or_else(|| {
            Error::Signing(format!("unsupported digest algorithm {}", signer_info.digest_alg.oid))
        })?;
        let computed = algorithm.digest_parts(ranges);

        let signed_attrs = signer_info
            .signed_attrs
            .as_ref()
            .ok_or_else(|| Error::Signing("signer info has no signed attributes".to_string()))?;
        let message_digest = signed_attrs
            .iter()
            .find(|attr| attr.oid == const_oid::db::rfc5911::ID_MESSAGE_DIGEST)
            .and_then(|attr| attr.values.iter().next())
            .ok_or_else(|| Error::Signing("message-digest attribute missing".to_string()))?
            .decode_as::<OctetString>()?;

        let public_key = certificate_public_key(signer_cert)?;
        let signature_valid = verify_rsa(
            &public_key,
            algorithm,
            &signed_attrs.to_der()?,
            signer_info.signature.as_bytes(),
        );

        let issuer = certificates
            .iter()
            .find(|c| c.tbs_certificate.subject == signer_cert.tbs_certificate.issuer)
            .unwrap_or(signer_cert);
        let chain_valid = verify_certificate_signature(signer_cert, issuer);

        let signer_der = signer_cert.to_der()?;
        let mut chain_der = vec![signer_der.clone()];
        for cert in &certificates {
            let der = cert.to_der()?;
            if der != signer_der {
                chain_der.push(der);
            }
        }

        let mut check = CertificateCheck {
            digest_matches: message_digest.as_bytes() == computed.as_slice(),
            signature_valid,
            chain_valid,
            chain_der,
            ..CertificateCheck::default()
        };
        describe_certificate(&signer_der, &mut check);
        Ok(check)
    }

    /// Whether any certificate of the chain is a configured root.
    fn is_trusted(&self, chain_der: &[Vec<u8>]) -> bool {
        chain_der.iter().any(|cert| self.trusted_roots.iter().any(|root| root == cert))
    }

    /// Quick check if a signature appears valid (without cryptographic verification).
    pub fn quick_check(&self, sig_dict: &Object) -> Result<bool> {
        let info = self.extract_signature_info(sig_dict)?;
        Ok(info.byte_range.len() == 4 && info.sub_filter.is_some())
    }
}

/// Certificate information gathered during verification.
#[derive(Debug, Default)]
struct CertificateCheck {
    digest_matches: bool,
    signature_valid: bool,
    chain_valid: bool,
    expired: bool,
    chain_der: Vec<Vec<u8>>,
    common_name: Option<String>,
    issuer: Option<String>,
    valid_from: Option<String>,
    valid_to: Option<String>,
}

fn invalid(mut result: VerificationResult, message: &str) -> VerificationResult {
    result.status = VerificationStatus::Invalid;
    result.messages.push(message.to_string());
    result
}

fn find_signer_certificate<'a>(signer_info: &SignerInfo, certificates: &'a [Certificate]) -> Result<&'a Certificate> {
    let found = match &signer_info.sid {
        SignerIdentifier::IssuerAndSerialNumber(isn) => certificates.iter().find(|c| {
            c.tbs_certificate.issuer == isn.issuer && c.tbs_certificate.serial_number == isn.serial_number
        }),
        SignerIdentifier::SubjectKeyIdentifier(_) => certificates.first(),
    };
    found.ok_or_else(|| Error::Signing("signer certificate not included in the envelope".to_string()))
}

fn verify_rsa(key: &RsaPublicKey, algorithm: DigestAlgorithm, message: &[u8], signature: &[u8]) -> bool {
    let signature = match Signature::try_from(signature) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    let key = key.clone();
    match algorithm {
        DigestAlgorithm::Sha256 => VerifyingKey::<Sha256>::new(key).verify(message, &signature).is_ok(),
        DigestAlgorithm::Sha384 => VerifyingKey::<Sha384>::new(key).verify(message, &signature).is_ok(),
        DigestAlgorithm::Sha512 => VerifyingKey::<Sha512>::new(key).verify(message, &signature).is_ok(),
    }
}

/// Digest used by an `sha*WithRSAEncryption` certificate signature.
fn rsa_signature_digest(oid: &ObjectIdentifier) -> Option<DigestAlgorithm> {
    use const_oid::db::rfc5912::{
        SHA_256_WITH_RSA_ENCRYPTION, SHA_384_WITH_RSA_ENCRYPTION, SHA_512_WITH_RSA_ENCRYPTION,
    };
    [
        (SHA_256_WITH_RSA_ENCRYPTION, DigestAlgorithm::Sha256),
        (SHA_384_WITH_RSA_ENCRYPTION, DigestAlgorithm::Sha384),
        (SHA_512_WITH_RSA_ENCRYPTION, DigestAlgorithm::Sha512),
    ]
    .into_iter()
    .find(|(known, _)| known == oid)
    .map(|(_, algorithm)| algorithm)
}

fn verify_certificate_signature(cert: &Certificate, issuer: &Certificate) -> bool {
    let algorithm = match rsa_signature_digest(&cert.signature_algorithm.oid) {
        Some(algorithm) => algorithm,
        None => return false,
    };
    let (key, tbs, signature) = match (
        certificate_public_key(issuer),
        cert.tbs_certificate.to_der(),
        cert.signature.as_bytes(),
    ) {
        (Ok(key), Ok(tbs), Some(signature)) => (key, tbs, signature),
        _ => return false,
    };
    verify_rsa(&key, algorithm, &tbs, signature)
}

fn describe_certificate(cert_der: &[u8], check: &mut CertificateCheck) {
    let cert = match x509_parser::parse_x509_certificate(cert_der) {
        Ok((_, cert)) => cert,
        Err(e) => {
            log::warn!("x509-parser could not read the signer certificate: {}", e);
            return;
        },
    };

    check.common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    check.issuer = Some(cert.issuer().to_string());
    let to_rfc3339 = |ts: i64| DateTime::<Utc>::from_timestamp(ts, 0).map(|t| t.to_rfc3339());
    check.valid_from = to_rfc3339(cert.validity().not_before.timestamp());
    check.valid_to = to_rfc3339(cert.validity().not_after.timestamp());
    check.expired = !cert.validity().is_valid();
}
