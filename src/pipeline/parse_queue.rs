//! Bounded parse scheduling across a worker pool
//!
//! Producers turn inputs into `ParseRequest`s and schedule them; a fixed pool
//! of workers runs the grammar and the emitter per request and forwards the
//! result to the write queue. The channel is bounded at max-threads + 1, so
//! `schedule` blocks when every worker is busy and one request is staged.
//!
//! Workers exit when the channel closes; `wait` drops the sender and joins
//! the pool, returning once every scheduled request has been accepted by the
//! write queue.

use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use log::debug;

use crate::core::archive::TranslateConfig;
use crate::core::error::{MarkupError, Result};
use crate::core::unit::Unit;

use super::write_queue::WriteHandle;

/// One unit of work: a source buffer plus the unit metadata it belongs to.
/// The arrival index is assigned at schedule time and drives output order.
#[derive(Clone)]
pub struct ParseRequest {
    pub index: u64,
    pub unit: Unit,
    pub source: Vec<u8>,
    /// Error attached by the worker; the writer surfaces it in order
    pub status: Option<MarkupError>,
}

/// Fixed worker pool fed through a bounded channel
pub struct ParseQueue {
    tx: Option<Sender<ParseRequest>>,
    workers: Vec<JoinHandle<()>>,
    next_index: u64,
}

impl ParseQueue {
    /// Default worker count when the caller does not configure one
    pub const DEFAULT_THREADS: usize = 4;

    pub fn new(threads: usize, config: TranslateConfig, writer: WriteHandle) -> Self {
        let threads = threads.max(1);
        let (tx, rx) = bounded::<ParseRequest>(threads + 1);
        let mut workers = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let rx = rx.clone();
            let config = config.clone();
            let writer = writer.clone();
            workers.push(std::thread::spawn(move || {
                while let Ok(mut request) = rx.recv() {
                    debug!("worker {worker_id}: unit {}", request.index);
                    if let Err(e) = config.translate(&mut request.unit, &request.source) {
                        request.status = Some(e);
                    }
                    writer.push(request);
                }
            }));
        }
        Self {
            tx: Some(tx),
            workers,
            next_index: 0,
        }
    }

    /// Queue a unit for translation; blocks while the queue is full.
    /// Returns the arrival index assigned to the request.
    pub fn schedule(&mut self, unit: Unit, source: Vec<u8>) -> Result<u64> {
        let index = self.next_index;
        let request = ParseRequest {
            index,
            unit,
            source,
            status: None,
        };
        self.tx
            .as_ref()
            .ok_or_else(|| MarkupError::invalid_io_operation("parse queue already drained"))?
            .send(request)
            .map_err(|_| MarkupError::invalid_io_operation("parse workers are gone"))?;
        self.next_index += 1;
        Ok(index)
    }

    /// Drain: no more scheduling; returns once all scheduled requests have
    /// been handed to the write queue
    pub fn wait(mut self) -> Result<()> {
        self.tx.take();
        for worker in self.workers.drain(..) {
            worker
                .join()
                .map_err(|_| MarkupError::parse("parse worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ParseQueue {
    fn drop(&mut self) {
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::language::Language;
    use crate::core::Archive;
    use crate::pipeline::write_queue::WriteQueue;

    fn pipeline_archive() -> (Archive, crate::io::MemoryBuffer) {
        let mut archive = Archive::new();
        archive.disable_hash().unwrap();
        archive.enable_full_archive().unwrap();
        let buffer = archive.write_open_memory().unwrap();
        (archive, buffer)
    }

    #[test]
    fn test_parallel_translation_preserves_order() {
        let (mut archive, buffer) = pipeline_archive();
        let config = archive.translate_config();
        let emitter = archive.take_writer().unwrap();
        let queue = WriteQueue::new(emitter, true, 5);
        let mut parse = ParseQueue::new(4, config, queue.handle());

        let count = 24;
        for i in 0..count {
            let mut unit = Unit::new();
            unit.set_language(Language::C);
            unit.set_filename(format!("u{i:02}.c"));
            // vary the body size so completion order differs from arrival order
            let body = format!("{}x{i};\n", "/* pad */ ".repeat((count - i) % 7));
            parse.schedule(unit, body.into_bytes()).unwrap();
        }
        parse.wait().unwrap();
        let stats = queue.stop().unwrap();
        assert_eq!(stats.units_written, count);
        assert_eq!(stats.errors, 0);

        let xml = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let positions: Vec<usize> = (0..count)
            .map(|i| xml.find(&format!("filename=\"u{i:02}.c\"")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_arrival_indices_are_sequential() {
        let (mut archive, _buffer) = pipeline_archive();
        let config = archive.translate_config();
        let emitter = archive.take_writer().unwrap();
        let queue = WriteQueue::new(emitter, true, 5);
        let mut parse = ParseQueue::new(2, config, queue.handle());
        for i in 0..3u64 {
            let mut unit = Unit::new();
            unit.set_language(Language::Java);
            let index = parse.schedule(unit, b"x;\n".to_vec()).unwrap();
            assert_eq!(index, i);
        }
        parse.wait().unwrap();
        queue.stop().unwrap();
    }

    #[test]
    fn test_unset_language_forwarded_not_dropped() {
        let (mut archive, buffer) = pipeline_archive();
        let config = archive.translate_config();
        let emitter = archive.take_writer().unwrap();
        let queue = WriteQueue::new(emitter, true, 5);
        let mut parse = ParseQueue::new(2, config, queue.handle());

        let mut good = Unit::new();
        good.set_language(Language::C);
        good.set_filename("good.c");
        parse.schedule(good, b"a;\n".to_vec()).unwrap();

        let mut bad = Unit::new();
        bad.set_filename("mystery.zzz");
        parse.schedule(bad, b"b;\n".to_vec()).unwrap();

        parse.wait().unwrap();
        let stats = queue.stop().unwrap();
        assert_eq!(stats.units_written, 1);
        assert_eq!(stats.errors, 1);
        let xml = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(xml.contains("good.c"));
        assert!(!xml.contains("mystery.zzz"));
    }
}
