//! srcmark - lossless source ↔ markup-XML translation
//!
//! This library translates C, C++, C# and Java source code into an XML form
//! that annotates the byte stream with syntactic structure, and translates
//! that XML back to source. Every source byte survives the round trip:
//! concatenating the text content of a unit element reproduces the input
//! exactly, whitespace, comments and line endings included.
//!
//! # Architecture
//!
//! The crate follows the "Library-First" pattern:
//! - **lib.rs** (this file): pure logic, no CLI concerns
//! - **bin/srcmark.rs**: thin wrapper that drives the library
//!
//! Modules:
//! - `core`: archives, units, options, namespaces, languages, errors
//! - `io`: the byte source/sink adapter (paths, handles, memory, callbacks)
//! - `markup`: the token-stream contract and the built-in producer
//! - `xml`: the streaming emitter and the streaming reader
//! - `pipeline`: the bounded parse/write queues for parallel translation

pub mod core;
pub mod io;
pub mod markup;
pub mod pipeline;
pub mod xml;

pub use crate::core::{
    decide_framing, Archive, HashAlgorithm, Language, MarkupError, Namespace, NamespaceRegistry,
    OptionFlags, Result, SpliceOffsets, Transform, TranslateConfig, Unit,
};
pub use crate::io::{sniff_format, ByteSink, ByteSource, StreamFormat};
pub use crate::pipeline::{translate_inputs, UnitInput, WriteStats};
pub use crate::xml::{source_from_markup, RootInfo, UnitReader};

/// Library version, mirrored into the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
