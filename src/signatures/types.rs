//! Digital signature types and data structures.

use const_oid::ObjectIdentifier;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Digest algorithm of a signature.
///
/// New signatures always use SHA-256; the others are recognised when
/// verifying envelopes produced elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// SHA-256 (default)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Algorithm OID.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha256 => const_oid::db::rfc5912::ID_SHA_256,
            DigestAlgorithm::Sha384 => const_oid::db::rfc5912::ID_SHA_384,
            DigestAlgorithm::Sha512 => const_oid::db::rfc5912::ID_SHA_512,
        }
    }

    /// Look up an algorithm by OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [DigestAlgorithm::Sha256, DigestAlgorithm::Sha384, DigestAlgorithm::Sha512]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Hash a sequence of byte slices as one message.
    pub fn digest_parts<P: AsRef<[u8]>>(&self, parts: &[P]) -> Vec<u8> {
        fn run<D: Digest, P: AsRef<[u8]>>(parts: &[P]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part.as_ref());
            }
            hasher.finalize().to_vec()
        }

        match self {
            DigestAlgorithm::Sha256 => run::<Sha256, P>(parts),
            DigestAlgorithm::Sha384 => run::<Sha384, P>(parts),
            DigestAlgorithm::Sha512 => run::<Sha512, P>(parts),
        }
    }
}

/// Signature sub-filter type (signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    Pkcs7Detached,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    CadesDetached,
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            _ => None,
        }
    }
}

/// Options for signing a PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignOptions {
    /// Signature sub-filter (format)
    pub sub_filter: SignatureSubFilter,
    /// Reason for signing
    pub reason: String,
    /// Location where the document was signed
    pub location: String,
    /// Contact information
    pub contact_info: Option<String>,
    /// Bytes reserved for the DER signature container
    pub signature_reserve: usize,
}

/// Largest accepted signature reserve (1 MiB).
pub const MAX_SIGNATURE_RESERVE: usize = 1024 * 1024;

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            sub_filter: SignatureSubFilter::Pkcs7Detached,
            reason: "Digital Signature by SecureSign".to_string(),
            location: "SecureSign System".to_string(),
            contact_info: None,
            signature_reserve: 8192,
        }
    }
}

impl SignOptions {
    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Set contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Set the container reserve in bytes.
    pub fn with_signature_reserve(mut self, bytes: usize) -> Self {
        self.signature_reserve = bytes;
        self
    }
}

/// A detached CMS signature and the certificate that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct SignatureEnvelope {
    /// Digest algorithm of the signed content
    pub digest_algorithm: DigestAlgorithm,
    /// DER-encoded signer certificate
    pub signer_certificate: Vec<u8>,
    /// DER-encoded ContentInfo (SignedData)
    pub signature_bytes: Vec<u8>,
}

impl std::fmt::Debug for SignatureEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureEnvelope")
            .field("digest_algorithm", &self.digest_algorithm)
            .field("signer_certificate", &format!("{} bytes", self.signer_certificate.len()))
            .field("signature_bytes", &format!("{} bytes", self.signature_bytes.len()))
            .finish()
    }
}

/// Information about an existing signature in a PDF.
#[derive(Debug, Clone, Default)]
pub struct SignatureInfo {
    /// Signer name from the signature dictionary
    pub signer_name: Option<String>,
    /// Signing time (`/M`) as written in the dictionary
    pub signing_time: Option<String>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Signature sub-filter type
    pub sub_filter: Option<SignatureSubFilter>,
    /// Whether the signature covers the whole document
    pub covers_whole_document: bool,
    /// Byte range of the signed data
    pub byte_range: Vec<i64>,
    /// Certificate subject common name
    pub certificate_cn: Option<String>,
    /// Certificate issuer
    pub certificate_issuer: Option<String>,
    /// Certificate validity start
    pub valid_from: Option<String>,
    /// Certificate validity end
    pub valid_to: Option<String>,
}

/// Result of signature verification.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// Overall verification status
    pub status: VerificationStatus,
    /// Signature information
    pub signature_info: SignatureInfo,
    /// Verification messages (errors, warnings)
    pub messages: Vec<String>,
    /// Whether the message-digest attribute matches the ByteRange digest
    pub digest_matches: bool,
    /// Whether the RSA signature over the signed attributes verifies
    pub signature_valid: bool,
    /// Whether the signer certificate's own signature verifies
    pub chain_valid: bool,
    /// Whether bytes were appended after the signed range
    pub document_modified: bool,
    /// Whether the certificate is trusted
    pub certificate_trusted: bool,
    /// Whether the certificate has expired
    pub certificate_expired: bool,
}

impl Default for VerificationResult {
    fn default() -> Self {
        Self {
            status: VerificationStatus::Unknown,
            signature_info: SignatureInfo::default(),
            messages: Vec::new(),
            digest_matches: false,
            signature_valid: false,
            chain_valid: false,
            document_modified: false,
            certificate_trusted: false,
            certificate_expired: false,
        }
    }
}

/// Verification status of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    /// Signature is valid
    Valid,
    /// Signature is invalid (cryptographically)
    Invalid,
    /// Signature validity is unknown (e.g., untrusted certificate)
    Unknown,
    /// Signature is valid but the certificate is outside its validity period
    ValidWithWarnings,
}

impl VerificationStatus {
    /// Check if the status indicates a valid signature.
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationStatus::Valid)
    }

    /// Check if the status indicates any form of validity (including warnings).
    pub fn is_ok(&self) -> bool {
        matches!(self, VerificationStatus::Valid | VerificationStatus::ValidWithWarnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_algorithm_names() {
        assert_eq!(DigestAlgorithm::Sha256.name(), "SHA-256");
        assert_eq!(DigestAlgorithm::Sha512.name(), "SHA-512");
    }

    #[test]
    fn test_digest_algorithm_oid_lookup() {
        let oid = DigestAlgorithm::Sha384.oid();
        assert_eq!(oid.to_string(), "2.16.840.1.101.3.4.2.2");
        assert_eq!(DigestAlgorithm::from_oid(&oid), Some(DigestAlgorithm::Sha384));
    }

    #[test]
    fn test_digest_parts_matches_single_message() {
        let whole = DigestAlgorithm::Sha256.digest_parts(&[b"hello world"]);
        let split = DigestAlgorithm::Sha256.digest_parts(&[&b"hello"[..], &b" world"[..]]);
        assert_eq!(whole, split);
        assert_eq!(whole.len(), 32);
        assert_eq!(DigestAlgorithm::Sha512.digest_parts(&[b""]).len(), 64);
    }

    #[test]
    fn test_sub_filter_names() {
        assert_eq!(SignatureSubFilter::Pkcs7Detached.as_pdf_name(), "adbe.pkcs7.detached");
        assert_eq!(
            SignatureSubFilter::from_pdf_name("adbe.pkcs7.detached"),
            Some(SignatureSubFilter::Pkcs7Detached)
        );
        assert_eq!(SignatureSubFilter::from_pdf_name("adbe.x509.rsa_sha1"), None);
    }

    #[test]
    fn test_sign_options_default() {
        let opts = SignOptions::default();
        assert_eq!(opts.sub_filter, SignatureSubFilter::Pkcs7Detached);
        assert_eq!(opts.reason, "Digital Signature by SecureSign");
        assert_eq!(opts.location, "SecureSign System");
        assert_eq!(opts.signature_reserve, 8192);
    }

    #[test]
    fn test_sign_options_builder() {
        let opts = SignOptions::default()
            .with_reason("Test signing")
            .with_location("Test City")
            .with_signature_reserve(512);
        assert_eq!(opts.reason, "Test signing");
        assert_eq!(opts.location, "Test City");
        assert_eq!(opts.signature_reserve, 512);
    }

    #[test]
    fn test_verification_status() {
        assert!(VerificationStatus::Valid.is_valid());
        assert!(!VerificationStatus::Invalid.is_valid());
        assert!(VerificationStatus::ValidWithWarnings.is_ok());
        assert!(!VerificationStatus::Unknown.is_ok());
    }

    #[test]
    fn test_envelope_debug_hides_bytes() {
        let envelope = SignatureEnvelope {
            digest_algorithm: DigestAlgorithm::Sha256,
            signer_certificate: vec![1, 2, 3],
            signature_bytes: vec![0; 10],
        };
        let debug = format!("{:?}", envelope);
        assert!(debug.contains("3 bytes"));
        assert!(debug.contains("10 bytes"));
    }
}
