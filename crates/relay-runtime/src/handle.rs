//! Reference-counted queue handle ownership.

use crate::error::QueueError;
use crate::provider::{HandleKind, NativeQueueProvider, RawQueueHandle};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An opaque, reference-counted capability to an open queue.
///
/// The underlying native handle is released exactly once: on the first
/// explicit [`close`](QueueHandle::close), or when the last clone drops.
/// A closed handle is invalid; [`raw`](QueueHandle::raw) refuses to hand
/// out the token afterward.
#[derive(Clone)]
pub struct QueueHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    raw: RawQueueHandle,
    kind: HandleKind,
    provider: Arc<dyn NativeQueueProvider>,
    closed: AtomicBool,
}

impl QueueHandle {
    /// Wrap a freshly opened native handle.
    pub fn new(
        raw: RawQueueHandle,
        kind: HandleKind,
        provider: Arc<dyn NativeQueueProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                raw,
                kind,
                provider,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The native token, or `HandleClosed` after close.
    pub fn raw(&self) -> Result<RawQueueHandle, QueueError> {
        if self.is_closed() {
            return Err(QueueError::HandleClosed);
        }
        Ok(self.inner.raw)
    }

    /// Whether this handle supports completion binding.
    pub fn kind(&self) -> HandleKind {
        self.inner.kind
    }

    /// True once the handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the native handle. Idempotent, safe concurrent with in-flight
    /// operations: the provider fails those fast with a cancellation.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.provider.close_queue(self.inner.raw);
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.provider.close_queue(self.raw);
        }
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("raw", &self.inner.raw)
            .field("kind", &self.inner.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
