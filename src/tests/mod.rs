//! Unit tests for the document tree, canonicalizer, reference processor and
//! the signing/verification engine.

mod support;

mod reference;
