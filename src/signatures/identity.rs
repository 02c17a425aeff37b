//! Signer identities.
//!
//! A [`SignerIdentity`] pairs an RSA private key with the certificate chain
//! that binds it to a subject. Identities are either loaded once from PEM at
//! startup or issued on demand as self-signed certificates by
//! [`IdentityIssuer`].

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use der::asn1::{GeneralizedTime, UtcTime};
use der::{Decode, Encode, EncodePem};
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use spki::SubjectPublicKeyInfoOwned;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::ext::pkix::{BasicConstraints, KeyUsage, KeyUsages};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};
use x509_cert::Certificate;

/// Seconds in the issued validity window.
const VALIDITY_SECS: u64 = 365 * 24 * 60 * 60;

/// 2050-01-01T00:00:00Z, the first instant UTCTime cannot express.
const UTC_TIME_LIMIT: u64 = 2_524_608_000;

/// Private key plus certificate chain, leaf first.
#[derive(Clone)]
pub struct SignerIdentity {
    private_key: RsaPrivateKey,
    certificate_chain: Vec<Certificate>,
}

impl std::fmt::Debug for SignerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerIdentity")
            .field("subject", &self.subject())
            .field("private_key", &"[REDACTED]")
            .field("chain", &format!("{} certificates", self.certificate_chain.len()))
            .finish()
    }
}

impl SignerIdentity {
    /// Assemble an identity without checking that key and chain agree.
    ///
    /// [`crate::signatures::sign`] performs that check before use.
    pub fn from_parts(private_key: RsaPrivateKey, certificate_chain: Vec<Certificate>) -> Self {
        Self {
            private_key,
            certificate_chain,
        }
    }

    /// Load a long-lived identity from a PEM private key (PKCS#8 or PKCS#1)
    /// and a PEM certificate chain, leaf first.
    ///
    /// # Errors
    ///
    /// [`Error::CryptoProvider`] when either PEM cannot be decoded, the
    /// chain is empty or the key does not belong to the leaf certificate.
    pub fn from_pem(key_pem: &str, chain_pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(key_pem))
            .map_err(|e| Error::CryptoProvider(format!("unreadable private key: {}", e)))?;
        let certificate_chain = Certificate::load_pem_chain(chain_pem.as_bytes())
            .map_err(|e| Error::CryptoProvider(format!("unreadable certificate chain: {}", e)))?;

        let identity = Self::from_parts(private_key, certificate_chain);
        identity
            .check_key_matches()
            .map_err(|e| Error::CryptoProvider(e.to_string()))?;
        Ok(identity)
    }

    /// [`SignerIdentity::from_pem`] reading both files.
    pub fn from_pem_files(key_path: impl AsRef<Path>, cert_path: impl AsRef<Path>) -> Result<Self> {
        let key_pem = std::fs::read_to_string(key_path.as_ref())?;
        let chain_pem = std::fs::read_to_string(cert_path.as_ref())?;
        Self::from_pem(&key_pem, &chain_pem)
    }

    /// Export as `(PKCS#8 private key PEM, certificate chain PEM)`.
    pub fn to_pem(&self) -> Result<(String, String)> {
        let key_pem = self
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::CryptoProvider(format!("private key export failed: {}", e)))?;
        let mut chain_pem = String::new();
        for cert in &self.certificate_chain {
            chain_pem.push_str(&cert.to_pem(LineEnding::LF)?);
        }
        Ok((key_pem.to_string(), chain_pem))
    }

    /// The private key.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// Certificates, leaf first.
    pub fn certificate_chain(&self) -> &[Certificate] {
        &self.certificate_chain
    }

    /// The signer's own certificate.
    pub fn leaf(&self) -> Option<&Certificate> {
        self.certificate_chain.first()
    }

    /// Leaf subject in RFC 4514 form.
    pub fn subject(&self) -> Option<String> {
        self.leaf().map(|cert| cert.tbs_certificate.subject.to_string())
    }

    /// Start of the leaf validity window.
    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.leaf().and_then(|cert| to_chrono(&cert.tbs_certificate.validity.not_before))
    }

    /// End of the leaf validity window.
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.leaf().and_then(|cert| to_chrono(&cert.tbs_certificate.validity.not_after))
    }

    /// Whether `at` falls inside the leaf validity window.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        match (self.not_before(), self.not_after()) {
            (Some(start), Some(end)) => start <= at && at <= end,
            _ => false,
        }
    }

    /// Fail unless the chain is non-empty and the key matches the leaf.
    pub(crate) fn check_key_matches(&self) -> Result<()> {
        let leaf = self
            .leaf()
            .ok_or_else(|| Error::Signing("signer identity has an empty certificate chain".to_string()))?;
        let cert_key = certificate_public_key(leaf)?;
        if cert_key != self.private_key.to_public_key() {
            return Err(Error::Signing(
                "private key does not match the signer certificate".to_string(),
            ));
        }
        Ok(())
    }
}

/// RSA public key of a certificate.
pub(crate) fn certificate_public_key(cert: &Certificate) -> Result<RsaPublicKey> {
    let spki_der = cert.tbs_certificate.subject_public_key_info.to_der()?;
    RsaPublicKey::from_public_key_der(&spki_der)
        .map_err(|e| Error::Signing(format!("certificate key is not RSA: {}", e)))
}

fn to_chrono(time: &Time) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(time.to_unix_duration().as_secs() as i64, 0)
}

fn asn1_time(unix_secs: u64) -> Result<Time> {
    let duration = Duration::from_secs(unix_secs);
    Ok(if unix_secs < UTC_TIME_LIMIT {
        Time::UtcTime(UtcTime::from_unix_duration(duration)?)
    } else {
        Time::GeneralTime(GeneralizedTime::from_unix_duration(duration)?)
    })
}

/// Escape an RDN attribute value for RFC 4514 string form.
fn escape_rdn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let edge_space = c == ' ' && (i == 0 || i == last);
        if matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') || edge_space || (i == 0 && c == '#') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Issues self-signed signer identities.
#[derive(Debug, Clone)]
pub struct IdentityIssuer {
    key_bits: usize,
    organization: Option<String>,
}

impl Default for IdentityIssuer {
    fn default() -> Self {
        Self {
            key_bits: 2048,
            organization: Some("SecureSign".to_string()),
        }
    }
}

impl IdentityIssuer {
    /// Issuer with the default 2048-bit key size.
    pub fn new() -> Self {
        Self::default()
    }

    /// Organization (`O=`) added to every subject; `None` omits it.
    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization;
        self
    }

    /// Generate a keypair and a self-signed certificate for `common_name`,
    /// valid from now for exactly 365 days.
    ///
    /// # Errors
    ///
    /// [`Error::CryptoProvider`] if key generation or self-signing fails.
    pub fn issue(&self, common_name: &str) -> Result<SignerIdentity> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, self.key_bits)?;
        let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key.clone());

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::CryptoProvider(format!("system clock before epoch: {}", e)))?
            .as_secs();
        let validity = Validity {
            not_before: asn1_time(now)?,
            not_after: asn1_time(now + VALIDITY_SECS)?,
        };

        let mut subject = format!("CN={}", escape_rdn_value(common_name));
        if let Some(org) = &self.organization {
            subject.push_str(&format!(",O={}", escape_rdn_value(org)));
        }
        let subject = Name::from_str(&subject)
            .map_err(|e| Error::CryptoProvider(format!("invalid subject '{}': {}", subject, e)))?;

        let public_key_der = private_key
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| Error::CryptoProvider(format!("public key encoding failed: {}", e)))?;
        let spki = SubjectPublicKeyInfoOwned::from_der(public_key_der.as_bytes())
            .map_err(|e| Error::CryptoProvider(format!("public key encoding failed: {}", e)))?;

        let mut builder = CertificateBuilder::new(
            Profile::Manual { issuer: None },
            random_serial(&mut rng)?,
            validity,
            subject,
            spki,
            &signing_key,
        )
        .map_err(cert_error)?;
        builder
            .add_extension(&KeyUsage(KeyUsages::DigitalSignature | KeyUsages::NonRepudiation))
            .map_err(cert_error)?;
        builder
            .add_extension(&BasicConstraints {
                ca: false,
                path_len_constraint: None,
            })
            .map_err(cert_error)?;
        let certificate = builder.build::<rsa::pkcs1v15::Signature>().map_err(cert_error)?;

        log::debug!("Issued self-signed identity for '{}'", common_name);
        Ok(SignerIdentity::from_parts(private_key, vec![certificate]))
    }
}

fn cert_error(err: x509_cert::builder::Error) -> Error {
    Error::CryptoProvider(format!("certificate build failed: {}", err))
}

/// Positive 160-bit serial without a leading zero octet.
fn random_serial(rng: &mut impl RngCore) -> Result<SerialNumber> {
    let mut bytes = [0u8; 20];
    rng.fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0x7F) | 0x40;
    SerialNumber::new(&bytes).map_err(|e| Error::CryptoProvider(format!("invalid serial: {}", e)))
}

/// Where the orchestrator gets signer identities from.
#[derive(Debug, Clone)]
pub enum IdentitySource {
    /// One identity loaded at startup and shared by every job
    Static(std::sync::Arc<SignerIdentity>),
    /// A fresh self-signed identity per job, named after the requester
    Ephemeral(IdentityIssuer),
}

impl IdentitySource {
    /// Identity to sign a job requested by `requested_by`.
    pub fn identity_for(&self, requested_by: &str) -> Result<std::sync::Arc<SignerIdentity>> {
        match self {
            IdentitySource::Static(identity) => Ok(identity.clone()),
            IdentitySource::Ephemeral(issuer) => issuer.issue(requested_by).map(std::sync::Arc::new),
        }
    }

    /// Whether identities are issued per job.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, IdentitySource::Ephemeral(_))
    }
}
