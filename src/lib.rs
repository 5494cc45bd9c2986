//! # xmldsig - Enveloped XML digital signatures
//!
//! Creation and verification of enveloped RSA-SHA1 signatures over XML
//! documents, as used by identity-federation formats (SAML assertions and
//! metadata) where signed XML is the interchange format.
//!
//! ## Features
//!
//! - Enveloped-signature transform plus inclusive and exclusive
//!   canonicalization (with or without comments)
//! - Reference dereferencing by document root or ID attribute, with a
//!   configurable ID-attribute list
//! - PKCS#1 v1.5 signature blocks built and checked byte-for-byte
//! - Verification keys resolved from a certificate file, an embedded
//!   certificate matched by SHA-1 fingerprint, or a PEM literal
//! - Private keys from PEM files or an external signing callable
//!   (hardware token, remote signer)
//!
//! ## Example
//!
//! ```rust,ignore
//! use xmldsig::{Document, KeyOracle, SignatureTemplate};
//!
//! fn main() -> Result<(), xmldsig::Error> {
//!     let mut doc: Document = std::fs::read_to_string("assertion.xml")?.parse()?;
//!     xmldsig::add_enveloped_signature(&mut doc, &SignatureTemplate::default());
//!
//!     let key = KeyOracle::from_pem_file("signer-key.pem")?;
//!     xmldsig::sign(&mut doc, &key, "signer-cert.pem")?;
//!     println!("{}", doc.to_xml());
//!
//!     xmldsig::verify(&doc, "signer-cert.pem")?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod keys;
pub mod signature;
pub mod tree;

#[cfg(test)]
mod tests;

/// XML digital signature namespace; emitted elements bind it to `ds`.
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

pub use error::{Error, ErrorKind};
pub use keys::{KeyOracle, VerifyKey};
pub use signature::{
    add_enveloped_signature, pkcs1_v15_pad, sign, verify, SignatureContext, SignatureTemplate,
    ALGORITHM_DIGEST_SHA1, ALGORITHM_DIGEST_SHA256, ALGORITHM_SIGNATURE_RSA_SHA1,
    TRANSFORM_C14N_EXCLUSIVE, TRANSFORM_C14N_EXCLUSIVE_WITH_COMMENTS, TRANSFORM_C14N_INCLUSIVE,
    TRANSFORM_ENVELOPED_SIGNATURE,
};
pub use tree::{Document, Element, Node};
