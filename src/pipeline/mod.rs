//! Parallel translation pipeline
//!
//! Producers schedule per-unit parse requests into a bounded queue; a worker
//! pool translates them; the write queue restores arrival order and drains
//! into the archive sink. Unit order in the output equals input order unless
//! relaxed ordering is explicitly requested.

pub mod parse_queue;
pub mod write_queue;

pub use parse_queue::{ParseQueue, ParseRequest};
pub use write_queue::{WriteHandle, WriteQueue, WriteStats};

use crate::core::archive::Archive;
use crate::core::error::Result;
use crate::core::unit::Unit;

/// A pending input: unit metadata plus the source bytes to translate
pub struct UnitInput {
    pub unit: Unit,
    pub source: Vec<u8>,
}

/// Translate a batch of inputs through the full pipeline into an archive
/// that is already open for writing. Consumes the archive's writer role.
pub fn translate_inputs(
    archive: &mut Archive,
    inputs: Vec<UnitInput>,
    jobs: usize,
    relaxed_order: bool,
) -> Result<WriteStats> {
    let config = archive.translate_config();
    let emitter = archive.take_writer()?;
    let queue = WriteQueue::new(emitter, !relaxed_order, jobs.max(1) + 1);
    let mut parse = ParseQueue::new(jobs, config, queue.handle());
    for input in inputs {
        parse.schedule(input.unit, input.source)?;
    }
    parse.wait()?;
    queue.stop()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::language::Language;
    use crate::core::Archive;

    #[test]
    fn test_translate_inputs_end_to_end() {
        let mut archive = Archive::new();
        archive.disable_hash().unwrap();
        archive.enable_full_archive().unwrap();
        let buffer = archive.write_open_memory().unwrap();

        let inputs: Vec<UnitInput> = (0..6)
            .map(|i| {
                let mut unit = Unit::new();
                unit.set_language(Language::C);
                unit.set_filename(format!("f{i}.c"));
                UnitInput {
                    unit,
                    source: format!("v{i};\n").into_bytes(),
                }
            })
            .collect();

        let stats = translate_inputs(&mut archive, inputs, 3, false).unwrap();
        assert_eq!(stats.units_written, 6);

        let xml = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(xml.starts_with("<?xml "));
        for i in 0..6 {
            assert!(xml.contains(&format!("filename=\"f{i}.c\"")));
        }
    }
}
