//! Ordered drain of completed parse requests into the archive
//!
//! Workers finish units in whatever order the scheduler and the sources
//! dictate; the write queue restores input order. A min-heap keyed by arrival
//! index holds early finishers until the next expected index shows up. In
//! relaxed mode units go out in completion order instead.
//!
//! Backpressure: a push beyond the configured backlog threshold blocks the
//! pushing worker until the writer catches up, so the parse queue cannot
//! outrun the sink. The request is inserted before the wait, which keeps the
//! next expected index reachable and the drain free of deadlocks.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::warn;

use crate::core::error::{MarkupError, Result};
use crate::io::ByteSink;
use crate::xml::emitter::{Framing, XmlEmitter};

use super::parse_queue::ParseRequest;

/// Outcome of a drained pipeline
#[derive(Debug, Default)]
pub struct WriteStats {
    pub units_written: usize,
    pub errors: usize,
    /// First fatal error; the writer stops emitting after it
    pub fatal: Option<MarkupError>,
}

struct OrderedRequest(ParseRequest);

impl PartialEq for OrderedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.0.index == other.0.index
    }
}

impl Eq for OrderedRequest {}

impl PartialOrd for OrderedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedRequest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.index.cmp(&other.0.index)
    }
}

enum Backlog {
    /// Input order restored via arrival index
    Strict(BinaryHeap<Reverse<OrderedRequest>>),
    /// Completion order
    Relaxed(VecDeque<ParseRequest>),
}

impl Backlog {
    fn len(&self) -> usize {
        match self {
            Backlog::Strict(heap) => heap.len(),
            Backlog::Relaxed(queue) => queue.len(),
        }
    }

    fn push(&mut self, request: ParseRequest) {
        match self {
            Backlog::Strict(heap) => heap.push(Reverse(OrderedRequest(request))),
            Backlog::Relaxed(queue) => queue.push_back(request),
        }
    }

    /// Next request the writer may emit. In strict mode only the expected
    /// index is ready; once the queue is closed the remainder drains in
    /// index order.
    fn pop_ready(&mut self, next_expected: u64, closed: bool) -> Option<ParseRequest> {
        match self {
            Backlog::Strict(heap) => match heap.peek() {
                Some(Reverse(top)) if top.0.index == next_expected || closed => {
                    Some(heap.pop().unwrap().0 .0)
                }
                _ => None,
            },
            Backlog::Relaxed(queue) => queue.pop_front(),
        }
    }
}

struct QueueState {
    backlog: Backlog,
    next_expected: u64,
    closed: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    cond: Condvar,
    threshold: usize,
    errors: AtomicUsize,
}

/// Producer side handed to workers
#[derive(Clone)]
pub struct WriteHandle {
    shared: Arc<Shared>,
}

impl WriteHandle {
    /// Insert a completed request and apply backpressure
    pub fn push(&self, request: ParseRequest) {
        let mut state = self.shared.state.lock().unwrap();
        state.backlog.push(request);
        self.shared.cond.notify_all();
        while state.backlog.len() > self.shared.threshold && !state.closed {
            state = self.shared.cond.wait(state).unwrap();
        }
    }
}

/// Writer side: owns the emitter on a dedicated thread
pub struct WriteQueue {
    shared: Arc<Shared>,
    writer: Option<JoinHandle<WriteStats>>,
}

impl WriteQueue {
    /// Spawn the writer thread. `strict` restores arrival order; threshold
    /// should be at least max-threads + 1.
    pub fn new(mut emitter: XmlEmitter<ByteSink>, strict: bool, threshold: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                backlog: if strict {
                    Backlog::Strict(BinaryHeap::new())
                } else {
                    Backlog::Relaxed(VecDeque::new())
                },
                next_expected: 0,
                closed: false,
            }),
            cond: Condvar::new(),
            threshold,
            errors: AtomicUsize::new(0),
        });

        let writer_shared = Arc::clone(&shared);
        let writer = std::thread::spawn(move || {
            let mut stats = WriteStats::default();
            let solo = emitter.framing() == Framing::Solo;
            loop {
                let request = {
                    let mut state = writer_shared.state.lock().unwrap();
                    loop {
                        let next = state.next_expected;
                        let closed = state.closed;
                        if let Some(request) = state.backlog.pop_ready(next, closed) {
                            state.next_expected = request.index + 1;
                            writer_shared.cond.notify_all();
                            break Some(request);
                        }
                        if closed {
                            break None;
                        }
                        state = writer_shared.cond.wait(state).unwrap();
                    }
                };
                let Some(request) = request else { break };

                if let Some(status) = request.status {
                    writer_shared.errors.fetch_add(1, Ordering::SeqCst);
                    stats.errors += 1;
                    if status.is_fatal_for_archive(solo) {
                        if stats.fatal.is_none() {
                            stats.fatal = Some(status);
                        }
                    } else {
                        warn!(
                            "skipping unit {}: {status}",
                            request.unit.filename().unwrap_or("<input>")
                        );
                    }
                    continue;
                }
                if stats.fatal.is_some() {
                    continue;
                }
                match emitter.write_unit(&request.unit) {
                    Ok(()) => stats.units_written += 1,
                    Err(e) => {
                        writer_shared.errors.fetch_add(1, Ordering::SeqCst);
                        stats.errors += 1;
                        stats.fatal = Some(e);
                    }
                }
            }
            if stats.fatal.is_none() {
                if let Err(e) = emitter.close().and_then(|_| emitter.into_inner().finish()) {
                    stats.errors += 1;
                    stats.fatal = Some(e);
                }
            }
            stats
        });

        Self {
            shared,
            writer: Some(writer),
        }
    }

    pub fn handle(&self) -> WriteHandle {
        WriteHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of requests that carried or produced an error so far
    pub fn error_count(&self) -> usize {
        self.shared.errors.load(Ordering::SeqCst)
    }

    /// Close the queue, flush the remaining in-order requests, close the
    /// archive's outer element and the sink
    pub fn stop(mut self) -> Result<WriteStats> {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
            self.shared.cond.notify_all();
        }
        let writer = self
            .writer
            .take()
            .ok_or_else(|| MarkupError::invalid_io_operation("write queue already stopped"))?;
        writer
            .join()
            .map_err(|_| MarkupError::parse("writer thread panicked"))
    }
}
