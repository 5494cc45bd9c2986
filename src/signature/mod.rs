//! The signing and verification engine.
//!
//! Orchestrates reference processing, `SignedInfo` canonicalization, PKCS#1
//! v1.5 block construction and the key oracle, and builds the `Signature`
//! template for the enveloped-signature flow.

use std::fs;
use std::path::Path;

use log::debug;
use rsa::BigUint;

use crate::codec;
use crate::error::Error;
use crate::keys::{self, KeyOracle, VerifyKey};
use crate::tree::{resolve_prefix, Document, Element, Node, NsBinding};
use crate::DSIG_NS;

pub(crate) mod reference;

pub const TRANSFORM_ENVELOPED_SIGNATURE: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const TRANSFORM_C14N_EXCLUSIVE_WITH_COMMENTS: &str =
    "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";
pub const TRANSFORM_C14N_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n";
pub const TRANSFORM_C14N_INCLUSIVE: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";

pub const ALGORITHM_DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const ALGORITHM_DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const ALGORITHM_SIGNATURE_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";

pub(crate) const EXC_C14N_NS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// ASN.1 DigestInfo prefix for SHA-1, prepended to the digest before padding.
const SHA1_DIGEST_INFO_PREFIX: [u8; 15] = [
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2B, 0x0E, 0x03, 0x02, 0x1A, 0x05, 0x00, 0x04, 0x14,
];

/// PKCS#1 v1.5 block type 01: `01 | FF.. | 00 | DigestInfo | digest`.
///
/// `key_bits` is the modulus bit length plus one; the block length comes out
/// as `key_bits/8 - 1`, one octet shorter than the modulus. Callers on both
/// the sign and verify paths must pass the same convention or the
/// reconstructed blocks will not agree.
pub fn pkcs1_v15_pad(digest: &[u8], key_bits: usize) -> Result<Vec<u8>, Error> {
    let padded_size = (key_bits / 8)
        .checked_sub(1)
        .ok_or_else(|| Error::crypto("key too small to pad"))?;
    let asn_len = SHA1_DIGEST_INFO_PREFIX.len() + digest.len();
    let pad_size = padded_size
        .checked_sub(asn_len + 2)
        .ok_or_else(|| Error::crypto("key too small for padded digest"))?;
    let mut block = Vec::with_capacity(padded_size);
    block.push(0x01);
    block.extend(std::iter::repeat(0xffu8).take(pad_size));
    block.push(0x00);
    block.extend_from_slice(&SHA1_DIGEST_INFO_PREFIX);
    block.extend_from_slice(digest);
    debug_assert_eq!(block.len(), padded_size);
    Ok(block)
}

/// Shape of the `Signature` template inserted by
/// [`SignatureContext::add_enveloped_signature`].
#[derive(Debug, Clone)]
pub struct SignatureTemplate {
    pub c14n_method: String,
    pub digest_algorithm: String,
    pub transforms: Vec<String>,
}

impl Default for SignatureTemplate {
    fn default() -> Self {
        SignatureTemplate {
            c14n_method: TRANSFORM_C14N_INCLUSIVE.to_string(),
            digest_algorithm: ALGORITHM_DIGEST_SHA1.to_string(),
            transforms: vec![
                TRANSFORM_ENVELOPED_SIGNATURE.to_string(),
                TRANSFORM_C14N_EXCLUSIVE_WITH_COMMENTS.to_string(),
            ],
        }
    }
}

/// Engine configuration threaded through signing and verification. The only
/// state is the list of attribute names that identify elements for
/// same-document references.
#[derive(Debug, Clone)]
pub struct SignatureContext {
    id_attributes: Vec<String>,
}

impl Default for SignatureContext {
    fn default() -> Self {
        SignatureContext::new()
    }
}

impl SignatureContext {
    pub fn new() -> Self {
        SignatureContext {
            id_attributes: vec!["ID".to_string(), "id".to_string()],
        }
    }

    /// Replaces the ID-attribute search list; names are tried in order.
    pub fn set_id_attributes(&mut self, names: Vec<String>) {
        self.id_attributes = names;
    }

    pub fn id_attributes(&self) -> &[String] {
        &self.id_attributes
    }

    /// Inserts an enveloped-signature template as the first child of the
    /// document element. `sign` fills it in afterwards.
    pub fn add_enveloped_signature(&self, doc: &mut Document, template: &SignatureTemplate) {
        let mut signature = dsig_el("Signature");
        signature.set_attr("xmlns:ds", DSIG_NS);
        {
            let si = signature.push_element(dsig_el("SignedInfo"));
            let mut cm = dsig_el("CanonicalizationMethod");
            cm.set_attr("Algorithm", &template.c14n_method);
            si.push_element(cm);
            let mut sm = dsig_el("SignatureMethod");
            sm.set_attr("Algorithm", ALGORITHM_SIGNATURE_RSA_SHA1);
            si.push_element(sm);
            let mut reference = dsig_el("Reference");
            reference.set_attr("URI", "");
            {
                let transforms = reference.push_element(dsig_el("Transforms"));
                for uri in &template.transforms {
                    let mut tr = dsig_el("Transform");
                    tr.set_attr("Algorithm", uri);
                    transforms.push_element(tr);
                }
            }
            let mut dm = dsig_el("DigestMethod");
            dm.set_attr("Algorithm", &template.digest_algorithm);
            reference.push_element(dm);
            reference.push_element(dsig_el("DigestValue"));
            si.push_element(reference);
        }
        doc.root.children.insert(0, Node::Element(signature));
    }

    /// Signs every `ds:Signature` in the document in place: populates the
    /// `DigestValue`s, then inserts `SignatureValue` and `KeyInfo` siblings
    /// after `SignedInfo`. The private key comes from the oracle; the public
    /// half and the embedded certificate come from `cert_file`.
    pub fn sign(
        &self,
        doc: &mut Document,
        key: &KeyOracle,
        cert_file: impl AsRef<Path>,
    ) -> Result<(), Error> {
        let cert_file = cert_file.as_ref();
        let cert_pem = fs::read_to_string(cert_file).map_err(|e| {
            Error::io(format!(
                "unable to read certificate {}: {}",
                cert_file.display(),
                e
            ))
        })?;
        let vk = VerifyKey::from_cert_pem(&cert_pem)?;
        let cert_body = keys::pem_certificate_body(&cert_pem)?;

        let sig_paths = doc.root.descendant_paths(DSIG_NS, "Signature", &[]);
        for (sig_path, sig_scope) in sig_paths {
            check_signature_method(element_at(&doc.root, &sig_path)?, &sig_scope)?;
            reference::process_references(doc, &sig_path, &self.id_attributes)?;

            let (si_rel, si_scope) = locate_signed_info(element_at(&doc.root, &sig_path)?, &sig_scope)?;
            let (sv_b64, prefix) = {
                let sig = element_at(&doc.root, &sig_path)?;
                let si = element_at(sig, &si_rel)?;
                let si_bytes = canonical_signed_info_bytes(si, &si_scope)?;
                // Round-trip the digest through base64 so the exact bytes
                // that verification will rebuild are the ones padded here.
                let digest_b64 = codec::b64_encode(&codec::sha1(&si_bytes));
                debug!("SignedInfo digest: {}", digest_b64);
                let digest = codec::b64_decode(&digest_b64)?;
                let padded = pkcs1_v15_pad(&digest, vk.modulus_bits() + 1)?;
                let sv_b64 = codec::b64_encode(&key.apply_private(&padded)?);
                (sv_b64, si.name.prefix.clone())
            };

            let full: Vec<usize> = [sig_path.as_slice(), si_rel.as_slice()].concat();
            let (si_idx, parent_path) = match full.split_last() {
                Some((last, init)) => (*last, init.to_vec()),
                None => return Err(Error::malformed("SignedInfo cannot be the document root")),
            };
            let scope = doc
                .root
                .scope_at(&parent_path, &[])
                .ok_or_else(|| Error::malformed("SignedInfo parent path out of range"))?;
            let needs_decl =
                resolve_prefix(&scope, prefix.as_deref().unwrap_or("")).as_deref() != Some(DSIG_NS);

            let mut sv_el = prefixed_el(&prefix, "SignatureValue");
            sv_el.set_text(&sv_b64);
            let mut key_info = prefixed_el(&prefix, "KeyInfo");
            if needs_decl {
                let decl = match &prefix {
                    Some(p) => format!("xmlns:{}", p),
                    None => "xmlns".to_string(),
                };
                sv_el.set_attr(&decl, DSIG_NS);
                key_info.set_attr(&decl, DSIG_NS);
            }
            {
                let x509_data = key_info.push_element(prefixed_el(&prefix, "X509Data"));
                let mut cert_el = prefixed_el(&prefix, "X509Certificate");
                cert_el.set_text(&cert_body);
                x509_data.push_element(cert_el);
            }

            let parent = doc
                .root
                .elem_at_mut(&parent_path)
                .ok_or_else(|| Error::malformed("SignedInfo parent path out of range"))?;
            parent.children.insert(si_idx + 1, Node::Element(sv_el));
            parent.children.insert(si_idx + 2, Node::Element(key_info));
        }
        Ok(())
    }

    /// Verifies every `ds:Signature` in the document against the key spec
    /// (certificate path, fingerprint, or PEM literal). The caller's tree is
    /// not mutated; all recomputation happens on an internal copy.
    pub fn verify(&self, doc: &Document, key_spec: &str) -> Result<bool, Error> {
        let mut work = doc.clone();
        let sig_paths = work.root.descendant_paths(DSIG_NS, "Signature", &[]);
        for (sig_path, sig_scope) in sig_paths {
            let (sv, pem) = {
                let sig = element_at(&work.root, &sig_path)?;
                check_signature_method(sig, &sig_scope)?;
                let sv = sig
                    .find_text(DSIG_NS, "SignatureValue", &sig_scope)
                    .ok_or_else(|| Error::malformed("no SignatureValue"))?
                    .to_string();
                let pem = keys::resolve_cert(sig, &sig_scope, key_spec)?;
                (sv, pem)
            };
            let vk = VerifyKey::from_cert_pem(&pem)?;
            debug!("key size: {} bits", vk.modulus_bits());
            let expected_block = vk.apply_public(&codec::b64_decode(&sv)?)?;
            let expected = codec::int_to_minimal_be_bytes(&BigUint::from_bytes_be(&expected_block));

            reference::process_references(&mut work, &sig_path, &self.id_attributes)?;

            let sig = element_at(&work.root, &sig_path)?;
            let (si_rel, si_scope) = locate_signed_info(sig, &sig_scope)?;
            let si = element_at(sig, &si_rel)?;
            let si_bytes = canonical_signed_info_bytes(si, &si_scope)?;
            let digest = codec::sha1(&si_bytes);
            let actual = pkcs1_v15_pad(&digest, vk.modulus_bits() + 1)?;

            if expected != actual {
                return Err(Error::verification("signature validation failed"));
            }
        }
        Ok(true)
    }
}

/// Signs with a fresh default context. See [`SignatureContext::sign`].
pub fn sign(doc: &mut Document, key: &KeyOracle, cert_file: impl AsRef<Path>) -> Result<(), Error> {
    SignatureContext::new().sign(doc, key, cert_file)
}

/// Verifies with a fresh default context. See [`SignatureContext::verify`].
pub fn verify(doc: &Document, key_spec: &str) -> Result<bool, Error> {
    SignatureContext::new().verify(doc, key_spec)
}

/// Inserts the default enveloped-signature template.
pub fn add_enveloped_signature(doc: &mut Document, template: &SignatureTemplate) {
    SignatureContext::new().add_enveloped_signature(doc, template)
}

fn dsig_el(local: &str) -> Element {
    Element::new(&format!("ds:{}", local))
}

fn prefixed_el(prefix: &Option<String>, local: &str) -> Element {
    match prefix {
        Some(p) => Element::new(&format!("{}:{}", p, local)),
        None => Element::new(local),
    }
}

fn element_at<'a>(base: &'a Element, path: &[usize]) -> Result<&'a Element, Error> {
    base.elem_at(path)
        .ok_or_else(|| Error::malformed("element path out of range"))
}

fn locate_signed_info(
    sig: &Element,
    sig_scope: &[NsBinding],
) -> Result<(Vec<usize>, Vec<NsBinding>), Error> {
    sig.descendant_paths(DSIG_NS, "SignedInfo", sig_scope)
        .into_iter()
        .next()
        .ok_or_else(|| Error::malformed("no SignedInfo"))
}

fn canonical_signed_info_bytes(si: &Element, si_scope: &[NsBinding]) -> Result<Vec<u8>, Error> {
    let cm = si
        .find_descendant(DSIG_NS, "CanonicalizationMethod", si_scope)
        .ok_or_else(|| Error::missing_method("no CanonicalizationMethod"))?;
    let cm_alg = reference::algorithm_uri(cm)
        .ok_or_else(|| Error::missing_method("no CanonicalizationMethod algorithm"))?;
    let transformed = reference::apply_transform(
        &cm_alg,
        reference::Transformed::Tree(reference::Subtree {
            root: si.clone(),
            scope_ns: si_scope.to_vec(),
        }),
        &[],
    )?;
    match transformed {
        reference::Transformed::Bytes(bytes) => Ok(bytes),
        reference::Transformed::Tree(_) => Err(Error::malformed(
            "CanonicalizationMethod is not a canonicalization transform",
        )),
    }
}

fn check_signature_method(sig: &Element, sig_scope: &[NsBinding]) -> Result<(), Error> {
    if let Some(sm) = sig.find_descendant(DSIG_NS, "SignatureMethod", sig_scope) {
        if let Some(alg) = reference::algorithm_uri(sm) {
            if alg != ALGORITHM_SIGNATURE_RSA_SHA1 {
                return Err(Error::unknown_algorithm(format!(
                    "unsupported signature algorithm {}",
                    alg
                )));
            }
        }
    }
    Ok(())
}
