//! Typed option flags driving emitter and reader behavior
//!
//! The historical format carried these as a bitset and serialized the subset
//! that survives a round trip into an `options="A,B,…"` attribute on the root
//! element. Here the flags are a plain struct; the name-list form exists only
//! at the XML boundary. Flag names the decoder does not recognize are kept
//! verbatim so they survive a read/write cycle untouched.

/// Option flags recognized by the translator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionFlags {
    /// Emit the `<?xml …?>` declaration
    pub xml_decl: bool,
    /// Emit namespace declarations on the framing root
    pub namespace_decl: bool,
    /// Position markup (pos namespace, pos:tabs attribute)
    pub position: bool,
    /// Preprocessor markup (cpp namespace)
    pub cpp: bool,
    /// Markup the contents of `#if 0` regions
    pub cpp_markup_if0: bool,
    /// Leave `#else` regions as raw text
    pub cpp_text_else: bool,
    /// Line-level markup
    pub line: bool,
    /// Emit a per-unit content hash attribute
    pub hash: bool,
    /// Force full-archive framing even for a single input
    pub full_archive: bool,
    /// Record the source encoding on the root element
    pub store_encoding: bool,
    /// Literal markup (lit namespace, `<literal type="…">`)
    pub literal: bool,
    /// Operator markup (op namespace)
    pub operator: bool,
    /// Type-modifier markup (type namespace)
    pub modifier: bool,
    /// Debug markup (err namespace)
    pub debug: bool,
    /// Flag names seen on input that we do not recognize; preserved verbatim
    pub unknown: Vec<String>,
}

impl Default for OptionFlags {
    fn default() -> Self {
        Self {
            xml_decl: true,
            namespace_decl: true,
            position: false,
            cpp: false,
            cpp_markup_if0: false,
            cpp_text_else: false,
            line: false,
            hash: true,
            full_archive: false,
            store_encoding: false,
            literal: false,
            operator: false,
            modifier: false,
            debug: false,
            unknown: Vec::new(),
        }
    }
}

/// Flags whose names appear in the root `options` attribute.
/// XMLDECL and NAMESPACEDECL describe the document itself; the CPP and LINE
/// flags matter to anyone re-parsing the markup.
const ATTR_FLAGS: &[&str] = &[
    "XMLDECL",
    "NAMESPACEDECL",
    "CPP_TEXT_ELSE",
    "CPP_MARKUP_IF0",
    "LINE",
];

impl OptionFlags {
    /// Value for the root `options` attribute, or `None` when nothing needs recording.
    ///
    /// Only deviations from the defaults plus preserved unknown names are written.
    pub fn to_attribute(&self) -> Option<String> {
        let mut names: Vec<&str> = Vec::new();
        for &name in ATTR_FLAGS {
            let set = match name {
                "XMLDECL" => false, // recorded implicitly by the declaration itself
                "NAMESPACEDECL" => false,
                "CPP_TEXT_ELSE" => self.cpp_text_else,
                "CPP_MARKUP_IF0" => self.cpp_markup_if0,
                "LINE" => self.line,
                _ => false,
            };
            if set {
                names.push(name);
            }
        }
        let mut all: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        all.extend(self.unknown.iter().cloned());
        if all.is_empty() {
            None
        } else {
            Some(all.join(","))
        }
    }

    /// Decode a root `options` attribute into this flag set.
    ///
    /// Unrecognized names are preserved in `unknown` rather than dropped.
    pub fn apply_attribute(&mut self, value: &str) {
        for name in value.split(',').filter(|s| !s.is_empty()) {
            match name {
                "XMLDECL" => self.xml_decl = true,
                "NAMESPACEDECL" => self.namespace_decl = true,
                "CPP_TEXT_ELSE" => self.cpp_text_else = true,
                "CPP_MARKUP_IF0" => self.cpp_markup_if0 = true,
                "LINE" => self.line = true,
                other => {
                    if !self.unknown.iter().any(|u| u == other) {
                        self.unknown.push(other.to_string());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = OptionFlags::default();
        assert!(opts.xml_decl);
        assert!(opts.namespace_decl);
        assert!(opts.hash);
        assert!(!opts.full_archive);
        assert!(!opts.position);
    }

    #[test]
    fn test_attribute_empty_for_defaults() {
        assert_eq!(OptionFlags::default().to_attribute(), None);
    }

    #[test]
    fn test_attribute_names() {
        let opts = OptionFlags {
            line: true,
            cpp_markup_if0: true,
            ..Default::default()
        };
        assert_eq!(opts.to_attribute().unwrap(), "CPP_MARKUP_IF0,LINE");
    }

    #[test]
    fn test_apply_attribute() {
        let mut opts = OptionFlags::default();
        opts.apply_attribute("CPP_TEXT_ELSE,LINE");
        assert!(opts.cpp_text_else);
        assert!(opts.line);
    }

    #[test]
    fn test_unknown_flags_round_trip() {
        let mut opts = OptionFlags::default();
        opts.apply_attribute("LINE,FUTURE_FLAG");
        assert_eq!(opts.unknown, vec!["FUTURE_FLAG".to_string()]);
        assert_eq!(opts.to_attribute().unwrap(), "LINE,FUTURE_FLAG");
    }

    #[test]
    fn test_unknown_not_duplicated() {
        let mut opts = OptionFlags::default();
        opts.apply_attribute("FUTURE_FLAG");
        opts.apply_attribute("FUTURE_FLAG");
        assert_eq!(opts.unknown.len(), 1);
    }
}
