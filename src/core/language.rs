//! Supported source languages and filename-based detection

use std::collections::HashMap;

use crate::core::error::{MarkupError, Result};

/// Source languages the translator accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    C,
    Cpp,
    CSharp,
    Java,
}

impl Language {
    /// Canonical attribute value written into the markup
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "C",
            Language::Cpp => "C++",
            Language::CSharp => "C#",
            Language::Java => "Java",
        }
    }

    /// Parse a user-supplied language name
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "C" | "c" => Ok(Language::C),
            "C++" | "c++" | "CPP" | "cpp" | "cxx" => Ok(Language::Cpp),
            "C#" | "c#" | "csharp" | "C#.NET" => Ok(Language::CSharp),
            "Java" | "java" => Ok(Language::Java),
            other => Err(MarkupError::UnknownLanguage(other.to_string())),
        }
    }

    /// Default extension table, before any caller registrations
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "c" | "h" => Some(Language::C),
            "cpp" | "cc" | "cxx" | "c++" | "hpp" | "hxx" | "hh" | "tcc" => Some(Language::Cpp),
            "cs" => Some(Language::CSharp),
            "java" | "aj" => Some(Language::Java),
            _ => None,
        }
    }

    /// Whether preprocessor markup applies (cpp namespace on units)
    pub fn has_preprocessor(&self) -> bool {
        !matches!(self, Language::Java)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extension→language table: caller registrations overlay the defaults
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    registered: HashMap<String, Language>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ext` (without the dot) for `lang`. Re-registration replaces.
    pub fn register(&mut self, ext: &str, lang: Language) -> Result<()> {
        if ext.is_empty() || ext.contains('.') {
            return Err(MarkupError::invalid_argument(format!(
                "bad extension '{ext}'"
            )));
        }
        self.registered.insert(ext.to_string(), lang);
        Ok(())
    }

    /// Look up the language for a filename, registrations first
    pub fn language_for(&self, filename: &str) -> Option<Language> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())?;
        self.registered
            .get(ext)
            .copied()
            .or_else(|| Language::from_extension(ext))
    }
}
