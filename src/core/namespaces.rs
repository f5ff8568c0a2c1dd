//! Namespace registry
//!
//! Prefix→URI table with insertion order preserved, since declaration order on
//! the framing root follows registration order. A fixed set of prefixes is
//! reserved: each may be re-registered only against its canonical URI.

use lazy_static::lazy_static;

use crate::core::error::{MarkupError, Result};

/// Canonical URI of the main markup namespace (default, unprefixed)
pub const SRC_NS_URI: &str = "http://www.sdml.info/srcML/src";
/// Canonical URI of the preprocessor namespace
pub const CPP_NS_URI: &str = "http://www.sdml.info/srcML/cpp";
/// Canonical URI of the debug/error namespace
pub const ERR_NS_URI: &str = "http://www.sdml.info/srcML/srcerr";
/// Canonical URI of the literal markup namespace
pub const LITERAL_NS_URI: &str = "http://www.sdml.info/srcML/literal";
/// Canonical URI of the operator markup namespace
pub const OPERATOR_NS_URI: &str = "http://www.sdml.info/srcML/operator";
/// Canonical URI of the type-modifier markup namespace
pub const MODIFIER_NS_URI: &str = "http://www.sdml.info/srcML/modifier";
/// Canonical URI of the position markup namespace
pub const POSITION_NS_URI: &str = "http://www.sdml.info/srcML/position";
/// Canonical URI of the differencing namespace
pub const SRCDIFF_NS_URI: &str = "http://www.sdml.info/srcDiff";

lazy_static! {
    /// Reserved prefixes and the only URI each may be bound to.
    /// The empty prefix is the default namespace and is pinned to src.
    static ref RESERVED_PREFIXES: Vec<(&'static str, &'static str)> = vec![
        ("", SRC_NS_URI),
        ("src", SRC_NS_URI),
        ("cpp", CPP_NS_URI),
        ("err", ERR_NS_URI),
        ("lit", LITERAL_NS_URI),
        ("op", OPERATOR_NS_URI),
        ("type", MODIFIER_NS_URI),
        ("pos", POSITION_NS_URI),
        ("srcdiff", SRCDIFF_NS_URI),
    ];
}

/// Canonical URI for a reserved prefix, if the prefix is reserved
pub fn reserved_uri(prefix: &str) -> Option<&'static str> {
    RESERVED_PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, uri)| *uri)
}

/// Strip a single trailing slash; URIs compare in this normalized form
pub fn normalize_uri(uri: &str) -> String {
    match uri.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => uri.to_string(),
    }
}

/// One prefix→URI binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Prefix, empty for the default namespace
    pub prefix: String,
    pub uri: String,
}

/// Insertion-ordered namespace table
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    items: Vec<Namespace>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-seeded the way a fresh archive starts: src as the default
    /// namespace and the cpp prefix.
    pub fn standard() -> Self {
        let mut reg = Self::new();
        reg.set("", SRC_NS_URI);
        reg.set("cpp", CPP_NS_URI);
        reg
    }

    /// Register or update a binding. Re-registering a prefix replaces its URI;
    /// re-registering a URI under a new prefix moves the URI to that prefix.
    ///
    /// Reserved-prefix conflicts are not rejected here: they are stored and
    /// fail at archive open, so a misconfigured archive can still be inspected.
    pub fn set(&mut self, prefix: &str, uri: &str) {
        let uri = normalize_uri(uri);
        if let Some(existing) = self.items.iter_mut().find(|n| n.uri == uri) {
            existing.prefix = prefix.to_string();
            return;
        }
        if let Some(existing) = self.items.iter_mut().find(|n| n.prefix == prefix) {
            existing.uri = uri;
            return;
        }
        self.items.push(Namespace {
            prefix: prefix.to_string(),
            uri,
        });
    }

    /// Check every binding against the reserved table; called at archive open
    pub fn validate_reserved(&self) -> Result<()> {
        for ns in &self.items {
            if let Some(canonical) = reserved_uri(&ns.prefix) {
                if ns.uri != canonical {
                    return Err(MarkupError::NamespaceConflict {
                        prefix: ns.prefix.clone(),
                        uri: ns.uri.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn uri_for(&self, prefix: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|n| n.prefix == prefix)
            .map(|n| n.uri.as_str())
    }

    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        let uri = normalize_uri(uri);
        self.items
            .iter()
            .find(|n| n.uri == uri)
            .map(|n| n.prefix.as_str())
    }

    pub fn contains_uri(&self, uri: &str) -> bool {
        self.prefix_for(uri).is_some()
    }

    /// Bindings in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Namespace> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Merge a binding seen at inner scope against this outer registry.
    ///
    /// Returns `None` when the binding is absorbed (absent, or present with
    /// the same URI), or `Some(ns)` when the prefix exists with a different
    /// URI and the binding must stay declared on the inner element.
    pub fn merge(&mut self, prefix: &str, uri: &str) -> Option<Namespace> {
        let uri = normalize_uri(uri);
        match self.uri_for(prefix) {
            None => {
                self.set(prefix, &uri);
                None
            }
            Some(existing) if existing == uri => None,
            Some(_) => Some(Namespace {
                prefix: prefix.to_string(),
                uri,
            }),
        }
    }
}
