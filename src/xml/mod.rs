//! The two XML paths: the streaming emitter that turns token streams into
//! markup documents, and the streaming reader that turns markup documents
//! back into units.

pub mod emitter;
pub mod reader;

pub use emitter::{emit_unit_fragment, EmitConfig, Framing, XmlEmitter};
pub use reader::{source_from_markup, RootInfo, UnitReader};
