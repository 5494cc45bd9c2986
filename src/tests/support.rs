//! Shared test helpers: a throwaway RSA identity (key plus self-signed
//! certificate) and temp-file plumbing for path-based key specs.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use der::Encode;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

use crate::codec;

pub struct TestIdentity {
    pub key: RsaPrivateKey,
    pub key_pem: String,
    pub cert_pem: String,
    pub cert_der: Vec<u8>,
}

static IDENTITY: OnceLock<TestIdentity> = OnceLock::new();

/// Process-wide 1024-bit identity; generating one per test would dominate
/// the suite's runtime.
pub fn identity() -> &'static TestIdentity {
    IDENTITY.get_or_init(|| generate(1024))
}

pub fn generate(bits: usize) -> TestIdentity {
    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, bits).expect("rsa key generation");

    let spki_der = key
        .to_public_key()
        .to_public_key_der()
        .expect("spki encoding");
    let spki = SubjectPublicKeyInfoOwned::try_from(spki_der.as_bytes()).expect("spki decoding");
    let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.clone());
    let builder = CertificateBuilder::new(
        Profile::Root,
        SerialNumber::new(&[1]).expect("serial number"),
        Validity::from_now(Duration::from_secs(3600)).expect("validity"),
        Name::from_str("CN=xmldsig test,O=example").expect("subject"),
        spki,
        &signer,
    )
    .expect("certificate builder");
    let cert = builder
        .build::<rsa::pkcs1v15::Signature>()
        .expect("self-signed certificate");

    let cert_der = cert.to_der().expect("certificate encoding");
    let cert_pem = pem_wrap(&cert_der);
    let key_pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .expect("key encoding")
        .to_string();
    TestIdentity {
        key,
        key_pem,
        cert_pem,
        cert_der,
    }
}

fn pem_wrap(der: &[u8]) -> String {
    let b64 = codec::b64_encode(der);
    let lines: Vec<&str> = b64
        .as_bytes()
        .chunks(64)
        .map(|chunk| std::str::from_utf8(chunk).expect("ascii"))
        .collect();
    format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
        lines.join("\n")
    )
}

static COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn write_temp(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "xmldsig-{}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed),
        name
    ));
    fs::write(&path, contents).expect("write temp file");
    path
}

pub fn cert_path() -> PathBuf {
    write_temp("cert.pem", &identity().cert_pem)
}

pub fn key_path() -> PathBuf {
    write_temp("key.pem", &identity().key_pem)
}

pub const SAML_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

pub const ASSERTION: &str = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="a1" Version="2.0" IssueInstant="2024-05-14T10:00:00Z"><saml:Issuer>https://idp.example.org</saml:Issuer><saml:Subject><saml:NameID>alice@example.org</saml:NameID></saml:Subject></saml:Assertion>"#;
