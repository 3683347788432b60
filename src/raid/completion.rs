//! Completion Barrier
//!
//! N-of-N barrier used to fan out asynchronous stripe requests and block
//! until every one of them has answered. The issuer calls
//! [`CompletionBarrier::increment`] before firing each request, the
//! transport calls [`CompletionBarrier::handle_response`] from whatever
//! thread completes it, and the issuer finally calls
//! [`CompletionBarrier::wait_ok`].
//!
//! The barrier is generic over what it keeps from the responses: reads
//! keep every payload and the range of every failed chunk
//! ([`ChunkOutcome`]), writes only need to know whether anything failed
//! ([`FlagOutcome`]).
//!
//! A barrier must be drained (`wait_ok`) before it is `reset` and reused
//! for the next group.

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::Result;

// =============================================================================
// Chunk
// =============================================================================

/// Identity of one request, echoed back on completion.
///
/// `offset` is whatever key the issuer uses to place the answer: a
/// file-relative byte offset on the normal read path, a block index when
/// a whole group is being read for reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub len: usize,
}

impl Chunk {
    pub fn new(offset: u64, len: usize) -> Self {
        Self { offset, len }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// What a barrier accumulates from its responses
pub trait Outcome: Default + Send {
    /// Payload delivered by a successful request
    type Payload: Send;

    /// Record one response, returning whether it succeeded
    fn record(&mut self, chunk: Chunk, response: Result<Self::Payload>) -> bool;
}

/// Read responses: payloads by chunk plus failed ranges
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    /// Successfully read chunks
    pub chunks: Vec<(Chunk, Bytes)>,
    /// Failed chunks, `offset -> len`
    pub errors: BTreeMap<u64, usize>,
}

impl Outcome for ChunkOutcome {
    type Payload = Bytes;

    fn record(&mut self, chunk: Chunk, response: Result<Bytes>) -> bool {
        match response {
            Ok(data) => {
                self.chunks.push((chunk, data));
                true
            }
            Err(e) => {
                debug!("Chunk at {} ({} bytes) failed: {}", chunk.offset, chunk.len, e);
                self.errors.insert(chunk.offset, chunk.len);
                false
            }
        }
    }
}

/// Write responses: a single aggregate flag
#[derive(Debug, Default)]
pub struct FlagOutcome {
    failed: bool,
}

impl FlagOutcome {
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl Outcome for FlagOutcome {
    type Payload = ();

    fn record(&mut self, chunk: Chunk, response: Result<()>) -> bool {
        if let Err(e) = response {
            debug!("Write at {} ({} bytes) failed: {}", chunk.offset, chunk.len, e);
            self.failed = true;
        }
        !self.failed
    }
}

// =============================================================================
// Barrier
// =============================================================================

#[derive(Debug, Default)]
struct BarrierState<O> {
    issued: usize,
    completed: usize,
    failed: bool,
    outcome: O,
}

/// Counting completion barrier with an accumulated outcome
#[derive(Debug, Default)]
pub struct CompletionBarrier<O: Outcome> {
    state: Mutex<BarrierState<O>>,
    done: Condvar,
}

/// Barrier collecting read payloads and failed ranges
pub type ReadHandler = CompletionBarrier<ChunkOutcome>;

/// Barrier collecting an aggregate write status
pub type WriteHandler = CompletionBarrier<FlagOutcome>;

impl<O: Outcome> CompletionBarrier<O> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState::default()),
            done: Condvar::new(),
        }
    }

    /// Register one more expected response
    pub fn increment(&self) {
        self.state.lock().issued += 1;
    }

    /// Deliver a response; may be called from any thread
    pub fn handle_response(&self, chunk: Chunk, response: Result<O::Payload>) {
        let mut state = self.state.lock();
        if !state.outcome.record(chunk, response) {
            state.failed = true;
        }
        state.completed += 1;
        drop(state);
        self.done.notify_all();
    }

    /// Block until every registered request has answered.
    ///
    /// Returns `true` if none of them failed.
    pub fn wait_ok(&self) -> bool {
        let mut state = self.state.lock();
        while state.completed < state.issued {
            self.done.wait(&mut state);
        }
        !state.failed
    }

    /// Clear counters and outcome. Only valid once drained.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.completed >= state.issued, "reset with requests in flight");
        *state = BarrierState::default();
    }

    /// Take the accumulated outcome, leaving an empty one behind
    pub fn take_outcome(&self) -> O {
        std::mem::take(&mut self.state.lock().outcome)
    }

    /// Requests registered but not yet answered
    pub fn in_flight(&self) -> usize {
        let state = self.state.lock();
        state.issued.saturating_sub(state.completed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_empty_barrier_is_ok() {
        let handler = ReadHandler::new();
        assert!(handler.wait_ok());
        assert_eq!(handler.in_flight(), 0);
    }

    #[test]
    fn test_read_handler_collects_payloads_and_errors() {
        let handler = ReadHandler::new();
        handler.increment();
        handler.increment();

        handler.handle_response(Chunk::new(0, 4), Ok(Bytes::from_static(b"abcd")));
        handler.handle_response(
            Chunk::new(64, 16),
            Err(Error::transport("mem://x", "timeout")),
        );

        assert!(!handler.wait_ok());
        let outcome = handler.take_outcome();
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.errors.get(&64), Some(&16));
    }

    #[test]
    fn test_reset_clears_failure() {
        let handler = WriteHandler::new();
        handler.increment();
        handler.handle_response(Chunk::new(0, 1), Err(Error::NotOpen));
        assert!(!handler.wait_ok());

        handler.reset();
        handler.increment();
        handler.handle_response(Chunk::new(0, 1), Ok(()));
        assert!(handler.wait_ok());
    }

    #[test]
    fn test_write_flag_is_sticky() {
        let handler = WriteHandler::new();
        for _ in 0..3 {
            handler.increment();
        }
        handler.handle_response(Chunk::new(0, 1), Err(Error::NotOpen));
        handler.handle_response(Chunk::new(1, 1), Ok(()));
        handler.handle_response(Chunk::new(2, 1), Ok(()));

        assert!(!handler.wait_ok());
        assert!(handler.take_outcome().failed());
    }

    #[test]
    fn test_completions_from_other_threads() {
        let handler = Arc::new(ReadHandler::new());
        let mut workers = Vec::new();

        for i in 0..16u64 {
            handler.increment();
            let h = Arc::clone(&handler);
            workers.push(thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(16 - i));
                h.handle_response(Chunk::new(i, 1), Ok(Bytes::from(vec![i as u8])));
            }));
        }

        assert!(handler.wait_ok());
        assert_eq!(handler.take_outcome().chunks.len(), 16);

        for w in workers {
            w.join().unwrap();
        }
    }
}
