//! Tests for reference dereferencing and the transform pipeline, including
//! the failure taxonomy for unknown URIs and incomplete transform chains.

use crate::codec;
use crate::signature::reference::{
    apply_transform, dereference, inclusive_prefix_list, Transformed,
};
use crate::tree::Document;
use crate::{
    sign, verify, ErrorKind, KeyOracle, DSIG_NS, TRANSFORM_ENVELOPED_SIGNATURE,
};

use super::support;

fn transform_xml(algorithm: &str) -> String {
    format!(r#"<ds:Transform Algorithm="{}"/>"#, algorithm)
}

/// One enveloped signature over the whole document with the given reference
/// URI, transform elements and digest algorithm. `signature_value` adds a
/// `SignatureValue` so the document is also usable on the verify path.
fn doc_with_signature(
    uri: &str,
    transforms: &str,
    digest_alg: &str,
    signature_value: Option<&str>,
) -> Document {
    let sv = signature_value
        .map(|sv| format!("<ds:SignatureValue>{}</ds:SignatureValue>", sv))
        .unwrap_or_default();
    let xml = format!(
        r#"<t:Doc xmlns:t="urn:test" ID="top"><t:Body>hello</t:Body><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:SignatureMethod Algorithm="http://www.w3.org/2000/09/xmldsig#rsa-sha1"/><ds:Reference URI="{uri}"><ds:Transforms>{transforms}</ds:Transforms><ds:DigestMethod Algorithm="{digest}"/><ds:DigestValue/></ds:Reference></ds:SignedInfo>{sv}</ds:Signature></t:Doc>"#,
        uri = uri,
        transforms = transforms,
        digest = digest_alg,
        sv = sv,
    );
    Document::parse(&xml).unwrap()
}

fn default_transforms() -> String {
    format!(
        "{}{}",
        transform_xml(TRANSFORM_ENVELOPED_SIGNATURE),
        transform_xml("http://www.w3.org/2001/10/xml-exc-c14n#")
    )
}

const SHA1_URI: &str = "http://www.w3.org/2000/09/xmldsig#sha1";

fn id_attributes() -> Vec<String> {
    vec!["ID".to_string(), "id".to_string()]
}

#[test]
fn enveloped_signature_splices_tail_onto_previous_sibling() {
    let doc = Document::parse(
        r#"<r xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><a/><ds:Signature></ds:Signature> tail<b/></r>"#,
    )
    .unwrap();
    let subtree = dereference(&doc, Some(""), &id_attributes()).unwrap();
    let out = apply_transform(TRANSFORM_ENVELOPED_SIGNATURE, Transformed::Tree(subtree), &[])
        .unwrap();
    let root = match out {
        Transformed::Tree(subtree) => subtree.root,
        Transformed::Bytes(_) => panic!("expected a tree"),
    };
    assert_eq!(root.children.len(), 2);
    let a = root.children[0].as_element().unwrap();
    assert_eq!(a.name.local, "a");
    assert_eq!(a.tail.as_deref(), Some(" tail"));
}

#[test]
fn enveloped_signature_splices_tail_onto_parent_text() {
    let doc = Document::parse(
        r#"<r xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:Signature/>x<b/></r>"#,
    )
    .unwrap();
    let subtree = dereference(&doc, Some("#"), &id_attributes()).unwrap();
    let out = apply_transform(TRANSFORM_ENVELOPED_SIGNATURE, Transformed::Tree(subtree), &[])
        .unwrap();
    let root = match out {
        Transformed::Tree(subtree) => subtree.root,
        Transformed::Bytes(_) => panic!("expected a tree"),
    };
    assert_eq!(root.text.as_deref(), Some("x"));
    assert_eq!(root.children.len(), 1);
}

#[test]
fn unknown_transform_fails_sign_and_verify() {
    let key = KeyOracle::from_pem_file(support::key_path()).unwrap();
    let cert = support::cert_path();

    let mut doc = doc_with_signature("", &transform_xml("urn:example:xslt"), SHA1_URI, None);
    let err = sign(&mut doc, &key, &cert).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownTransform);
    assert!(err.message().contains("unknown or unimplemented transform"));

    let doc = doc_with_signature("", &transform_xml("urn:example:xslt"), SHA1_URI, Some("AAAA"));
    let err = verify(&doc, &support::identity().cert_pem).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownTransform);
    assert!(err.message().contains("urn:example:xslt"));
}

#[test]
fn non_fragment_reference_uri_is_rejected() {
    let key = KeyOracle::from_pem_file(support::key_path()).unwrap();
    let mut doc = doc_with_signature(
        "http://example.org/detached.xml",
        &default_transforms(),
        SHA1_URI,
        None,
    );
    let err = sign(&mut doc, &key, support::cert_path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadReference);
    assert!(err.message().contains("unknown reference"));
}

#[test]
fn dangling_id_reference_is_rejected() {
    let key = KeyOracle::from_pem_file(support::key_path()).unwrap();
    let mut doc = doc_with_signature("#nope", &default_transforms(), SHA1_URI, None);
    let err = sign(&mut doc, &key, support::cert_path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadReference);
    assert!(err.message().contains("#nope"));
}

#[test]
fn missing_digest_method_is_fatal() {
    let xml = r#"<t:Doc xmlns:t="urn:test"><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:Reference URI=""><ds:Transforms><ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/><ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/></ds:Transforms><ds:DigestValue/></ds:Reference></ds:SignedInfo></ds:Signature></t:Doc>"#;
    let mut doc = Document::parse(xml).unwrap();
    let key = KeyOracle::from_pem_file(support::key_path()).unwrap();
    let err = sign(&mut doc, &key, support::cert_path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingMethod);
    assert!(err.message().contains("DigestMethod"));
}

#[test]
fn transform_chain_must_end_in_canonicalization() {
    let key = KeyOracle::from_pem_file(support::key_path()).unwrap();
    let mut doc = doc_with_signature(
        "",
        &transform_xml(TRANSFORM_ENVELOPED_SIGNATURE),
        SHA1_URI,
        None,
    );
    let err = sign(&mut doc, &key, support::cert_path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Malformed);
    assert!(err.message().contains("canonical bytes"));
}

#[test]
fn sha256_reference_digests_are_supported() {
    let key = KeyOracle::from_pem_file(support::key_path()).unwrap();
    let mut doc = doc_with_signature(
        "",
        &default_transforms(),
        "http://www.w3.org/2001/04/xmlenc#sha256",
        None,
    );
    sign(&mut doc, &key, support::cert_path()).unwrap();
    let dv = doc.root.find_text(DSIG_NS, "DigestValue", &[]).unwrap();
    assert_eq!(codec::b64_decode(dv).unwrap().len(), 32);
}

#[test]
fn prefix_list_is_read_from_the_transform() {
    let xml = r#"<ds:Transform xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"><ec:InclusiveNamespaces xmlns:ec="http://www.w3.org/2001/10/xml-exc-c14n#" PrefixList="saml xs"/></ds:Transform>"#;
    let doc = Document::parse(xml).unwrap();
    assert_eq!(
        inclusive_prefix_list(&doc.root, &[]),
        vec!["saml".to_string(), "xs".to_string()]
    );
}
