//! Asynchronous Dispatch Adapter
//!
//! Wraps a blocking transport so its asynchronous requests run on a tokio
//! blocking pool. Completions are delivered from pool threads, the engine
//! keeps waiting on its completion barriers.
//!
//! ```text
//!  RaidFile ──read_async──▶ AsyncDispatch ──spawn_blocking──▶ inner.read
//!     ▲                                                          │
//!     └──────────── handler.handle_response ◀────────────────────┘
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;

use crate::domain::{OpenRequest, SharedTransport, StripeTransport};
use crate::error::{Error, Result};
use crate::raid::completion::{Chunk, CompletionBarrier, Outcome, ReadHandler, WriteHandler};

/// Delivers an error if the request is dropped before it ran, so a
/// shutting down pool cannot leave a barrier waiting forever
struct Pending<O: Outcome> {
    handler: Option<Arc<CompletionBarrier<O>>>,
    chunk: Chunk,
    url: String,
}

impl<O: Outcome> Pending<O> {
    fn new(handler: Arc<CompletionBarrier<O>>, chunk: Chunk, url: &str) -> Self {
        Self {
            handler: Some(handler),
            chunk,
            url: url.to_string(),
        }
    }

    fn complete(mut self, response: Result<O::Payload>) {
        if let Some(handler) = self.handler.take() {
            handler.handle_response(self.chunk, response);
        }
    }
}

impl<O: Outcome> Drop for Pending<O> {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.handle_response(
                self.chunk,
                Err(Error::transport(&self.url, "request dropped before completion")),
            );
        }
    }
}

/// Transport whose asynchronous requests complete on a tokio pool
#[derive(Debug)]
pub struct AsyncDispatch<T: StripeTransport + 'static> {
    inner: Arc<T>,
    handle: Handle,
}

impl<T: StripeTransport + 'static> AsyncDispatch<T> {
    pub fn new(inner: T, handle: Handle) -> Self {
        Self {
            inner: Arc::new(inner),
            handle,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: StripeTransport + 'static> AsyncDispatch<T> {
    /// Wrap every transport onto the same pool
    pub fn wrap_all(transports: Vec<T>, handle: &Handle) -> Vec<SharedTransport> {
        transports
            .into_iter()
            .map(|t| Arc::new(AsyncDispatch::new(t, handle.clone())) as SharedTransport)
            .collect()
    }
}

impl<T: StripeTransport + 'static> StripeTransport for AsyncDispatch<T> {
    fn url(&self) -> &str {
        self.inner.url()
    }

    fn open(&self, request: &OpenRequest) -> Result<()> {
        self.inner.open(request)
    }

    fn read(&self, offset: u64, len: usize) -> Result<Bytes> {
        self.inner.read(offset, len)
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.write(offset, data)
    }

    fn read_async(&self, offset: u64, len: usize, chunk: Chunk, handler: Arc<ReadHandler>) {
        let inner = Arc::clone(&self.inner);
        let pending = Pending::new(handler, chunk, self.inner.url());
        self.handle.spawn_blocking(move || {
            let response = inner.read(offset, len);
            pending.complete(response);
        });
    }

    fn write_async(&self, offset: u64, data: Bytes, chunk: Chunk, handler: Arc<WriteHandler>) {
        let inner = Arc::clone(&self.inner);
        let pending = Pending::new(handler, chunk, self.inner.url());
        self.handle.spawn_blocking(move || {
            let response = inner.write(offset, &data);
            pending.complete(response);
        });
    }

    fn truncate(&self, size: u64) -> Result<()> {
        self.inner.truncate(size)
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn stat(&self) -> Result<u64> {
        self.inner.stat()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }

    fn remove(&self) -> Result<()> {
        self.inner.remove()
    }
}

// =============================================================================
// Tests
// =============================================================================
