//! RSA key material: the private-key oracle, the certificate-backed public
//! key, and key-spec resolution for verification.

use std::fmt;
use std::fs;
use std::path::Path;

use der::referenced::OwnedToRef;
use der::Decode;
use log::debug;
use pkcs8::DecodePrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use x509_cert::Certificate;

use crate::codec;
use crate::error::Error;
use crate::tree::Element;
use crate::DSIG_NS;

/// The private-key bearer. Either an in-process RSA key parsed from PEM or a
/// remote signer (hardware token, network service) that is handed the padded
/// block and returns the signature block.
pub enum KeyOracle {
    Pem(RsaPrivateKey),
    Token {
        modulus_bits: usize,
        signer: Box<dyn Fn(&[u8]) -> Result<Vec<u8>, Error> + Send + Sync>,
    },
}

impl fmt::Debug for KeyOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOracle::Pem(_) => f.write_str("KeyOracle::Pem"),
            KeyOracle::Token { modulus_bits, .. } => f
                .debug_struct("KeyOracle::Token")
                .field("modulus_bits", modulus_bits)
                .finish(),
        }
    }
}

impl KeyOracle {
    /// Loads an RSA private key from a PEM file (PKCS#8 or PKCS#1 armor).
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let pem = fs::read_to_string(path).map_err(|e| {
            Error::io(format!("unable to read private key {}: {}", path.display(), e))
        })?;
        Self::from_pem(&pem)
    }

    pub fn from_pem(pem: &str) -> Result<Self, Error> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| Error::key_resolution(format!("unable to parse RSA private key: {}", e)))?;
        Ok(KeyOracle::Pem(key))
    }

    /// Wraps an external signing callable, e.g. a PKCS#11 token session.
    pub fn token(
        modulus_bits: usize,
        signer: impl Fn(&[u8]) -> Result<Vec<u8>, Error> + Send + Sync + 'static,
    ) -> Self {
        KeyOracle::Token {
            modulus_bits,
            signer: Box::new(signer),
        }
    }

    /// Raises `block` to the private exponent modulo `n`, returning a block
    /// of the modulus length.
    pub fn apply_private(&self, block: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            KeyOracle::Pem(key) => {
                let c = BigUint::from_bytes_be(block);
                let m = c.modpow(key.d(), key.n());
                Ok(left_pad(&m.to_bytes_be(), key.size()))
            }
            KeyOracle::Token { signer, .. } => signer(block),
        }
    }

    pub fn modulus_bits(&self) -> usize {
        match self {
            KeyOracle::Pem(key) => key.n().bits(),
            KeyOracle::Token { modulus_bits, .. } => *modulus_bits,
        }
    }
}

/// Public half used for verification, extracted from an X.509 certificate.
#[derive(Debug, Clone)]
pub struct VerifyKey {
    key: RsaPublicKey,
}

impl VerifyKey {
    pub fn from_cert_pem(pem: &str) -> Result<Self, Error> {
        let der = pem_certificate_der(pem)?;
        let cert = Certificate::from_der(&der)
            .map_err(|e| Error::crypto(format!("unable to parse X.509 certificate: {}", e)))?;
        let spki = cert.tbs_certificate.subject_public_key_info.owned_to_ref();
        let key = RsaPublicKey::try_from(spki)
            .map_err(|e| Error::crypto(format!("certificate does not carry an RSA key: {}", e)))?;
        Ok(VerifyKey { key })
    }

    /// Raises `block` to the public exponent modulo `n`, returning a block
    /// of the modulus length.
    pub fn apply_public(&self, block: &[u8]) -> Result<Vec<u8>, Error> {
        let c = BigUint::from_bytes_be(block);
        let m = c.modpow(self.key.e(), self.key.n());
        Ok(left_pad(&m.to_bytes_be(), self.key.size()))
    }

    pub fn modulus_bits(&self) -> usize {
        self.key.n().bits()
    }
}

fn left_pad(bytes: &[u8], width: usize) -> Vec<u8> {
    if bytes.len() >= width {
        return bytes.to_vec();
    }
    let mut out = vec![0u8; width - bytes.len()];
    out.extend_from_slice(bytes);
    out
}

const PEM_CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

/// Base64 body of the first CERTIFICATE block, whitespace stripped.
pub fn pem_certificate_body(pem: &str) -> Result<String, Error> {
    let start = pem
        .find(PEM_CERT_BEGIN)
        .ok_or_else(|| Error::key_resolution("missing BEGIN CERTIFICATE armor"))?
        + PEM_CERT_BEGIN.len();
    let end = pem[start..]
        .find(PEM_CERT_END)
        .ok_or_else(|| Error::key_resolution("missing END CERTIFICATE armor"))?;
    Ok(pem[start..start + end]
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect())
}

/// DER bytes of the first CERTIFICATE block.
pub fn pem_certificate_der(pem: &str) -> Result<Vec<u8>, Error> {
    codec::b64_decode(&pem_certificate_body(pem)?)
}

/// Resolves a verification key spec against a signature element.
///
/// The spec is tried as a filesystem path to a PEM certificate, then as a
/// colon-separated hex SHA-1 fingerprint matched against the signature's
/// embedded `X509Certificate` values, and finally as a literal PEM block.
/// `sig_scope` carries the namespace bindings in scope above the signature.
pub fn resolve_cert(
    sig: &Element,
    sig_scope: &[crate::tree::NsBinding],
    key_spec: &str,
) -> Result<String, Error> {
    let data = if Path::new(key_spec).is_file() {
        Some(fs::read_to_string(key_spec).map_err(|e| {
            Error::io(format!("unable to read certificate {}: {}", key_spec, e))
        })?)
    } else if key_spec.contains(':') {
        find_matching_cert(sig, sig_scope, key_spec)
            .map(|body| format!("{}\n{}\n{}", PEM_CERT_BEGIN, body, PEM_CERT_END))
    } else {
        Some(key_spec.to_string())
    };
    data.ok_or_else(|| Error::key_resolution("unable to find anything useful to verify with"))
}

/// First embedded certificate whose DER SHA-1 matches the fingerprint
/// (colons stripped, case-insensitive).
fn find_matching_cert(
    sig: &Element,
    sig_scope: &[crate::tree::NsBinding],
    fingerprint: &str,
) -> Option<String> {
    let want = fingerprint.to_lowercase().replace(':', "");
    for cd in sig.find_descendants(DSIG_NS, "X509Certificate", sig_scope) {
        let text = match cd.text.as_deref() {
            Some(text) => text,
            None => continue,
        };
        let der = match codec::b64_decode(text) {
            Ok(der) => der,
            Err(_) => continue,
        };
        let got = hex::encode(codec::sha1(&der));
        debug!("embedded certificate fingerprint {}", got);
        if got == want {
            return Some(text.to_string());
        }
    }
    None
}
