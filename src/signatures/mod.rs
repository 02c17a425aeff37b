//! PDF digital signatures.
//!
//! ## Signing flow
//!
//! ```text
//! stamped bytes
//!     ↓
//! [SignatureEmbedder::prepare]  incremental update with placeholders,
//!     ↓                         ByteRange patched, digest computed
//! [sign] (digest, SignerIdentity) → SignatureEnvelope (detached CMS)
//!     ↓
//! [PreparedSignature::finish]   container written into /Contents
//!     ↓
//! signed bytes
//! ```
//!
//! ## Signature Types Supported
//!
//! - PKCS#7 detached signatures (adbe.pkcs7.detached), SHA-256 with RSA
//!
//! ## Example
//!
//! ```no_run
//! use pdf_sealer::signatures::{IdentityIssuer, SignOptions, SignatureEmbedder, SignatureVerifier};
//!
//! # fn main() -> pdf_sealer::Result<()> {
//! let stamped = std::fs::read("stamped.pdf")?;
//! let identity = IdentityIssuer::new().issue("Alice")?;
//!
//! let embedder = SignatureEmbedder::new(SignOptions::default());
//! let signed = embedder.embed(&stamped, &identity, "Alice", "Approval")?;
//!
//! let mut verifier = SignatureVerifier::new();
//! verifier.add_trusted_root(signed.envelope.signer_certificate.clone());
//! let results = verifier.verify_document(&signed.bytes)?;
//! assert!(results[0].status.is_valid());
//! # Ok(())
//! # }
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - RFC 5652 - Cryptographic Message Syntax

mod byterange;
mod embedder;
mod identity;
mod signer;
mod types;
mod verifier;

pub use byterange::{ByteRangeCalculator, BYTE_RANGE_DIGITS};
pub use embedder::{format_pdf_date, EmbeddedSignature, PreparedSignature, SignatureEmbedder};
pub use identity::{IdentityIssuer, IdentitySource, SignerIdentity};
pub use signer::sign;
pub use types::{
    DigestAlgorithm, SignOptions, MAX_SIGNATURE_RESERVE, SignatureEnvelope, SignatureInfo, SignatureSubFilter,
    VerificationResult, VerificationStatus,
};
pub use verifier::SignatureVerifier;
