//! Reference dereferencing, the transform pipeline and digest population.

use log::debug;

use crate::codec;
use crate::error::Error;
use crate::tree::c14n::{canonicalize, C14nOptions};
use crate::tree::{Document, Element, NsBinding};
use crate::DSIG_NS;

use super::{
    EXC_C14N_NS, TRANSFORM_C14N_EXCLUSIVE, TRANSFORM_C14N_EXCLUSIVE_WITH_COMMENTS,
    TRANSFORM_C14N_INCLUSIVE, TRANSFORM_ENVELOPED_SIGNATURE,
};

/// A dereferenced subtree detached from its document, together with the
/// namespace bindings that were in scope above it.
pub(crate) struct Subtree {
    pub root: Element,
    pub scope_ns: Vec<NsBinding>,
}

/// Value flowing through a transform chain: a node-set until a
/// canonicalization transform turns it into bytes.
pub(crate) enum Transformed {
    Tree(Subtree),
    Bytes(Vec<u8>),
}

/// `Algorithm` attribute with any trailing `#` stripped.
pub(crate) fn algorithm_uri(el: &Element) -> Option<String> {
    el.attr("Algorithm")
        .map(|uri| uri.trim_end_matches('#').to_string())
}

pub(crate) fn apply_transform(
    uri: &str,
    input: Transformed,
    inclusive_prefixes: &[String],
) -> Result<Transformed, Error> {
    match uri {
        TRANSFORM_ENVELOPED_SIGNATURE => enveloped_signature(require_tree(input)?),
        TRANSFORM_C14N_EXCLUSIVE_WITH_COMMENTS => {
            c14n_transform(require_tree(input)?, true, true, inclusive_prefixes)
        }
        TRANSFORM_C14N_EXCLUSIVE => {
            c14n_transform(require_tree(input)?, true, false, inclusive_prefixes)
        }
        TRANSFORM_C14N_INCLUSIVE => c14n_transform(require_tree(input)?, false, false, &[]),
        other => Err(Error::unknown_transform(format!(
            "unknown or unimplemented transform {}",
            other
        ))),
    }
}

fn require_tree(input: Transformed) -> Result<Subtree, Error> {
    match input {
        Transformed::Tree(subtree) => Ok(subtree),
        Transformed::Bytes(_) => Err(Error::malformed(
            "transform applied after canonicalization already produced bytes",
        )),
    }
}

/// Removes the first `ds:Signature` descendant, splicing its tail onto the
/// preceding sibling (or the parent's text when it is the first child).
fn enveloped_signature(mut subtree: Subtree) -> Result<Transformed, Error> {
    let (path, _) = subtree
        .root
        .descendant_paths(DSIG_NS, "Signature", &subtree.scope_ns)
        .into_iter()
        .next()
        .ok_or_else(|| Error::malformed("enveloped-signature: no Signature element to remove"))?;
    let (last, init) = match path.split_last() {
        Some(split) => split,
        None => return Err(Error::malformed("enveloped-signature: empty removal path")),
    };
    subtree
        .root
        .elem_at_mut(init)
        .and_then(|parent| parent.remove_child(*last))
        .ok_or_else(|| Error::malformed("enveloped-signature: removal path out of range"))?;
    Ok(Transformed::Tree(subtree))
}

fn c14n_transform(
    subtree: Subtree,
    exclusive: bool,
    with_comments: bool,
    inclusive_prefixes: &[String],
) -> Result<Transformed, Error> {
    let bytes = canonicalize(
        &subtree.root,
        &subtree.scope_ns,
        &C14nOptions {
            exclusive,
            with_comments,
            inclusive_prefixes,
        },
    )?;
    Ok(Transformed::Bytes(bytes))
}

/// `InclusiveNamespaces/@PrefixList` of a `Transform` element, split on
/// ASCII whitespace.
pub(crate) fn inclusive_prefix_list(tr: &Element, tr_scope: &[NsBinding]) -> Vec<String> {
    tr.find_descendant(EXC_C14N_NS, "InclusiveNamespaces", tr_scope)
        .and_then(|el| el.attr("PrefixList"))
        .map(|list| list.split_ascii_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Dereferences a `Reference` URI against the document. Empty, missing or
/// `#` selects a copy of the whole document; `#id` selects the identified
/// element inside a copy. Anything else is unsupported.
pub(crate) fn dereference(
    doc: &Document,
    uri: Option<&str>,
    id_attributes: &[String],
) -> Result<Subtree, Error> {
    match uri {
        None | Some("") | Some("#") => Ok(Subtree {
            root: doc.root.clone(),
            scope_ns: Vec::new(),
        }),
        Some(u) if u.starts_with('#') => {
            let id = &u[1..];
            for attr in id_attributes {
                debug!("looking for #{} using id attribute '{}'", id, attr);
                if let Some((path, scope)) = doc.root.id_paths(attr, id, &[]).into_iter().next() {
                    let el = doc
                        .root
                        .elem_at(&path)
                        .ok_or_else(|| Error::malformed("dereference path out of range"))?;
                    return Ok(Subtree {
                        root: el.clone(),
                        scope_ns: scope,
                    });
                }
            }
            Err(Error::bad_reference(format!(
                "unable to dereference Reference URI='{}'",
                u
            )))
        }
        Some(u) => Err(Error::bad_reference(format!("unknown reference {}", u))),
    }
}

/// Runs every `Reference` under the signature at `sig_path`: dereference,
/// transform chain, digest, and write-back into `DigestValue`.
pub(crate) fn process_references(
    doc: &mut Document,
    sig_path: &[usize],
    id_attributes: &[String],
) -> Result<(), Error> {
    let sig_scope = doc
        .root
        .scope_at(sig_path, &[])
        .ok_or_else(|| Error::malformed("signature path out of range"))?;
    let sig = doc
        .root
        .elem_at(sig_path)
        .ok_or_else(|| Error::malformed("signature path out of range"))?;
    let ref_paths: Vec<Vec<usize>> = sig
        .descendant_paths(DSIG_NS, "Reference", &sig_scope)
        .into_iter()
        .map(|(rel, _)| [sig_path, rel.as_slice()].concat())
        .collect();

    for ref_path in ref_paths {
        let (dv_path, digest) = {
            let ref_scope = doc
                .root
                .scope_at(&ref_path, &[])
                .ok_or_else(|| Error::malformed("reference path out of range"))?;
            let ref_el = doc
                .root
                .elem_at(&ref_path)
                .ok_or_else(|| Error::malformed("reference path out of range"))?;
            let uri = ref_el.attr("URI").map(str::to_string);
            let transforms: Vec<(Element, Vec<NsBinding>)> = ref_el
                .descendant_paths(DSIG_NS, "Transform", &ref_scope)
                .into_iter()
                .filter_map(|(rel, scope)| ref_el.elem_at(&rel).map(|el| (el.clone(), scope)))
                .collect();
            let dm = ref_el
                .find_descendant(DSIG_NS, "DigestMethod", &ref_scope)
                .ok_or_else(|| Error::missing_method("unable to find DigestMethod"))?;
            let dm_alg = algorithm_uri(dm)
                .ok_or_else(|| Error::missing_method("DigestMethod has no Algorithm"))?;
            let hash_name = dm_alg.splitn(2, '#').nth(1).map(str::to_string).ok_or_else(|| {
                Error::unknown_algorithm(format!("malformed digest algorithm {}", dm_alg))
            })?;
            let dv_rel = ref_el
                .descendant_paths(DSIG_NS, "DigestValue", &ref_scope)
                .into_iter()
                .next()
                .map(|(rel, _)| rel)
                .ok_or_else(|| Error::malformed("unable to find DigestValue"))?;

            let mut data = Transformed::Tree(dereference(doc, uri.as_deref(), id_attributes)?);
            for (tr, tr_scope) in &transforms {
                let tr_alg = algorithm_uri(tr)
                    .ok_or_else(|| Error::missing_method("Transform has no Algorithm"))?;
                let prefixes = inclusive_prefix_list(tr, tr_scope);
                data = apply_transform(&tr_alg, data, &prefixes)?;
            }
            let bytes = match data {
                Transformed::Bytes(bytes) => bytes,
                Transformed::Tree(_) => {
                    return Err(Error::malformed(
                        "reference transforms did not produce canonical bytes",
                    ))
                }
            };
            debug!("using hash algorithm {}", hash_name);
            let digest = codec::b64_encode(&codec::digest_by_name(&hash_name, &bytes)?);
            debug!("digest for {:?}: {}", uri, digest);
            ([ref_path.as_slice(), dv_rel.as_slice()].concat(), digest)
        };
        let dv = doc
            .root
            .elem_at_mut(&dv_path)
            .ok_or_else(|| Error::malformed("DigestValue path out of range"))?;
        dv.text = Some(digest);
    }
    Ok(())
}
