//! Markup token stream: the contract between language grammars and the
//! XML emitter, plus the built-in statement-level producer.

pub mod grammar;
pub mod token;

pub use grammar::{GrammarConfig, SourceTokenizer};
pub use token::{ElementKind, MarkupNs, MarkupToken, TokenProducer};
