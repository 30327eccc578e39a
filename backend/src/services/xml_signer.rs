//! Enveloped XML digital signature for tax documents
//!
//! Signs a composed document with the key pair from a PKCS#12 bundle:
//! exclusive canonicalization, SHA-256 digest, RSA-SHA256 signature. The
//! `ds:Signature` block is placed inside the document's empty
//! `ext:ExtensionContent` element, so removing it (enveloped-signature
//! transform) gives back exactly the bytes that were digested.

use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::X509;
use sha2::{Digest, Sha256};
use shared::{NS_DS, SIGNATURE_SLOT};
use thiserror::Error;

use super::canonical::{canonicalize, CanonicalError};
use crate::error::AppError;

const C14N_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Id of the signature element, referenced from `cac:Signature`
pub const SIGNATURE_ID: &str = "SignatureSP";

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Invalid certificate credentials: {0}")]
    InvalidCredentials(String),

    #[error("Cannot read certificate bundle: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document has no signature slot")]
    MissingSignatureSlot,

    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    #[error("Cryptographic failure: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

impl From<SigningError> for AppError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::InvalidCredentials(msg) => AppError::InvalidCredentials(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Private key and certificate extracted from a PKCS#12 bundle
pub struct SigningIdentity {
    key: PKey<Private>,
    certificate: X509,
}

impl SigningIdentity {
    /// Open a PKCS#12 bundle. Fails when the password is wrong, the bundle
    /// is corrupt, or it lacks either the private key or the certificate.
    pub fn from_pkcs12(der: &[u8], password: &str) -> Result<Self, SigningError> {
        let bundle = Pkcs12::from_der(der)
            .map_err(|e| SigningError::InvalidCredentials(format!("Invalid PKCS#12 bundle: {e}")))?;

        let parsed = bundle.parse2(password).map_err(|e| {
            SigningError::InvalidCredentials(format!("Wrong password or corrupted bundle: {e}"))
        })?;

        let key = parsed.pkey.ok_or_else(|| {
            SigningError::InvalidCredentials("Bundle contains no private key".into())
        })?;
        let certificate = parsed.cert.ok_or_else(|| {
            SigningError::InvalidCredentials("Bundle contains no certificate".into())
        })?;

        Ok(Self { key, certificate })
    }

    /// Certificate as base64 DER: the PEM body without header, footer or newlines
    pub fn certificate_base64(&self) -> Result<String, SigningError> {
        let pem = self.certificate.to_pem()?;
        let pem = String::from_utf8_lossy(&pem);
        Ok(pem
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .map(str::trim)
            .collect())
    }

    fn sign_bytes(&self, data: &[u8]) -> Result<Vec<u8>, SigningError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// Signing identity opened once at startup; a wrong password or a broken
/// bundle stops the server before it takes requests
pub struct CertificateBundle {
    identity: SigningIdentity,
}

impl CertificateBundle {
    /// Open a bundle from its DER bytes
    pub fn open(der: &[u8], password: &str) -> Result<Self, SigningError> {
        Ok(Self {
            identity: SigningIdentity::from_pkcs12(der, password)?,
        })
    }

    /// Read and open a bundle from disk
    pub fn load(path: &str, password: &str) -> Result<Self, SigningError> {
        Self::open(&std::fs::read(path)?, password)
    }

    pub fn sign(&self, xml: &str) -> Result<String, SigningError> {
        sign_with(xml, &self.identity)
    }
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("subject", &self.identity.certificate.subject_name())
            .finish_non_exhaustive()
    }
}

/// Sign a document with the given PKCS#12 bundle
pub fn sign(xml: &str, certificate: &[u8], password: &str) -> Result<String, SigningError> {
    let identity = SigningIdentity::from_pkcs12(certificate, password)?;
    sign_with(xml, &identity)
}

/// Sign a document with an already opened identity
pub fn sign_with(xml: &str, identity: &SigningIdentity) -> Result<String, SigningError> {
    let slot = xml.find(SIGNATURE_SLOT).ok_or(SigningError::MissingSignatureSlot)?;

    let digest = STANDARD.encode(Sha256::digest(canonicalize(xml)?.as_bytes()));
    let signed_info = signed_info(&digest);
    let signature_value = STANDARD.encode(identity.sign_bytes(canonicalize(&signed_info)?.as_bytes())?);
    let certificate = identity.certificate_base64()?;

    let signature = format!(
        "<ds:Signature xmlns:ds=\"{NS_DS}\" Id=\"{SIGNATURE_ID}\">{signed_info}\
         <ds:SignatureValue>{signature_value}</ds:SignatureValue>\
         <ds:KeyInfo><ds:X509Data><ds:X509Certificate>{certificate}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>\
         </ds:Signature>"
    );

    // Insert right after the opening tag of the extension element
    let insert_at = slot + SIGNATURE_SLOT.find("</").unwrap_or(0);
    let mut signed = String::with_capacity(xml.len() + signature.len());
    signed.push_str(&xml[..insert_at]);
    signed.push_str(&signature);
    signed.push_str(&xml[insert_at..]);

    Ok(signed)
}

fn signed_info(digest: &str) -> String {
    format!(
        "<ds:SignedInfo xmlns:ds=\"{NS_DS}\">\
         <ds:CanonicalizationMethod Algorithm=\"{C14N_EXCLUSIVE}\"></ds:CanonicalizationMethod>\
         <ds:SignatureMethod Algorithm=\"{RSA_SHA256}\"></ds:SignatureMethod>\
         <ds:Reference URI=\"\">\
         <ds:Transforms>\
         <ds:Transform Algorithm=\"{ENVELOPED_SIGNATURE}\"></ds:Transform>\
         <ds:Transform Algorithm=\"{C14N_EXCLUSIVE}\"></ds:Transform>\
         </ds:Transforms>\
         <ds:DigestMethod Algorithm=\"{DIGEST_SHA256}\"></ds:DigestMethod>\
         <ds:DigestValue>{digest}</ds:DigestValue>\
         </ds:Reference>\
         </ds:SignedInfo>"
    )
}
