//! CMS signature generation.
//!
//! Produces a detached SignedData envelope for a precomputed SHA-256 digest.
//! The digest is carried in the message-digest signed attribute; the content
//! itself is not encapsulated.

use super::identity::SignerIdentity;
use super::types::{DigestAlgorithm, SignatureEnvelope};
use crate::error::{Error, Result};
use cms::builder::{create_signing_time_attribute, SignedDataBuilder, SignerInfoBuilder};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::signed_data::{EncapsulatedContentInfo, SignerIdentifier};
use der::Encode;
use rsa::pkcs1v15::SigningKey;
use sha2::Sha256;
use spki::AlgorithmIdentifierOwned;

/// Sign a SHA-256 digest with `identity`, returning a detached CMS envelope.
///
/// # Errors
///
/// [`Error::Signing`] when the digest has the wrong length, the identity's
/// certificate chain is empty, the key does not match the leaf certificate,
/// or CMS encoding fails.
pub fn sign(digest: &[u8], identity: &SignerIdentity) -> Result<SignatureEnvelope> {
    let algorithm = DigestAlgorithm::Sha256;
    if digest.len() != 32 {
        return Err(Error::Signing(format!(
            "expected a {} digest of 32 bytes, got {}",
            algorithm.name(),
            digest.len()
        )));
    }

    identity.check_key_matches()?;
    let leaf = identity
        .leaf()
        .ok_or_else(|| Error::Signing("signer identity has an empty certificate chain".to_string()))?;

    let digest_algorithm = AlgorithmIdentifierOwned {
        oid: algorithm.oid(),
        parameters: None,
    };
    let content_info = EncapsulatedContentInfo {
        econtent_type: const_oid::db::rfc5911::ID_DATA,
        econtent: None,
    };
    let signer = SigningKey::<Sha256>::new(identity.private_key().clone());
    let sid = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
        issuer: leaf.tbs_certificate.issuer.clone(),
        serial_number: leaf.tbs_certificate.serial_number.clone(),
    });

    let mut signer_info = SignerInfoBuilder::new(
        &signer,
        sid,
        digest_algorithm.clone(),
        &content_info,
        Some(digest),
    )
    .map_err(cms_error)?;
    signer_info
        .add_signed_attribute(create_signing_time_attribute().map_err(cms_error)?)
        .map_err(cms_error)?;

    let mut builder = SignedDataBuilder::new(&content_info);
    builder.add_digest_algorithm(digest_algorithm).map_err(cms_error)?;
    for cert in identity.certificate_chain() {
        builder
            .add_certificate(CertificateChoices::Certificate(cert.clone()))
            .map_err(cms_error)?;
    }
    builder
        .add_signer_info::<SigningKey<Sha256>, rsa::pkcs1v15::Signature>(signer_info)
        .map_err(cms_error)?;
    let signed_data = builder.build().map_err(cms_error)?;

    let envelope = SignatureEnvelope {
        digest_algorithm: algorithm,
        signer_certificate: leaf.to_der()?,
        signature_bytes: signed_data.to_der()?,
    };
    log::debug!("Built CMS envelope of {} bytes", envelope.signature_bytes.len());
    Ok(envelope)
}

fn cms_error(err: cms::builder::Error) -> Error {
    Error::Signing(format!("CMS encoding failed: {:?}", err))
}
