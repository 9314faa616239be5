//! Shared connection state for one queue: lazy handle acquisition, stale
//! recovery, and the cached transactional flag.

use crate::error::QueueError;
use crate::handle::QueueHandle;
use crate::name::QueueName;
use crate::provider::{AccessMode, HandleKind, NativeQueueProvider};
use std::sync::{Mutex, OnceLock, RwLock};
use std::sync::Arc;
use tracing::{debug, warn};

/// Owns at most one read handle and one write handle for a queue.
///
/// Handles are acquired lazily and thread-safely on first use. Reads of an
/// already-valid handle take only a shared lock (fast path); acquisition is
/// serialized by a dedicated mutex so concurrent first uses open one handle.
///
/// Stale-handle recovery is transparent: operations that observe a stale
/// status call [`invalidate_read`](QueueConnection::invalidate_read) (or
/// the write twin) and the next access reopens. Callers only ever see a
/// fatal error if reacquisition itself fails.
pub struct QueueConnection {
    name: QueueName,
    provider: Arc<dyn NativeQueueProvider>,
    read: RwLock<Option<QueueHandle>>,
    write: RwLock<Option<QueueHandle>>,
    acquire: Mutex<()>,
    transactional: OnceLock<bool>,
}

impl QueueConnection {
    pub fn new(name: QueueName, provider: Arc<dyn NativeQueueProvider>) -> Self {
        Self {
            name,
            provider,
            read: RwLock::new(None),
            write: RwLock::new(None),
            acquire: Mutex::new(()),
            transactional: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn provider(&self) -> &Arc<dyn NativeQueueProvider> {
        &self.provider
    }

    /// The read handle, opening it if necessary.
    pub fn read_handle(&self) -> Result<QueueHandle, QueueError> {
        self.handle(&self.read, AccessMode::Receive, "open read handle")
    }

    /// The write handle, opening it if necessary.
    pub fn write_handle(&self) -> Result<QueueHandle, QueueError> {
        self.handle(&self.write, AccessMode::Send, "open write handle")
    }

    /// Whether the queue is transactional. Queried once, cached thereafter.
    pub fn is_transactional(&self) -> Result<bool, QueueError> {
        if let Some(value) = self.transactional.get() {
            return Ok(*value);
        }
        let value = self
            .provider
            .is_transactional(&self.name)
            .map_err(|status| QueueError::provider(status, "query transactional nature"))?;
        Ok(*self.transactional.get_or_init(|| value))
    }

    /// Close the read handle. Idempotent; safe concurrent with in-flight
    /// operations, which the provider fails fast with a cancellation.
    pub fn close_read(&self) {
        if let Some(handle) = self.read.write().expect("connection lock poisoned").take() {
            handle.close();
        }
    }

    /// Close the write handle. Idempotent.
    pub fn close_write(&self) {
        if let Some(handle) = self.write.write().expect("connection lock poisoned").take() {
            handle.close();
        }
    }

    /// Close both handles.
    pub fn close(&self) {
        self.close_read();
        self.close_write();
    }

    /// Drop a read handle observed stale so the next access reopens.
    pub fn invalidate_read(&self) {
        warn!(queue = %self.name, "read handle is stale, reopening on next use");
        self.close_read();
    }

    /// Drop a write handle observed stale so the next access reopens.
    pub fn invalidate_write(&self) {
        warn!(queue = %self.name, "write handle is stale, reopening on next use");
        self.close_write();
    }

    fn handle(
        &self,
        slot: &RwLock<Option<QueueHandle>>,
        access: AccessMode,
        operation: &'static str,
    ) -> Result<QueueHandle, QueueError> {
        // Fast path: a valid cached handle needs no exclusive lock.
        if let Some(handle) = Self::cached(slot) {
            return Ok(handle);
        }

        let _guard = self.acquire.lock().expect("connection lock poisoned");
        if let Some(handle) = Self::cached(slot) {
            return Ok(handle);
        }

        let opened = self
            .provider
            .open_queue(&self.name, access)
            .map_err(|status| QueueError::provider(status, operation))?;
        let handle = QueueHandle::new(opened.handle, opened.kind, Arc::clone(&self.provider));

        // One-time registration with the asynchronous completion mechanism,
        // kernel-backed read handles only.
        if access == AccessMode::Receive && opened.kind == HandleKind::Kernel {
            let status = self.provider.bind_completion(opened.handle);
            if status.is_fatal() {
                handle.close();
                return Err(QueueError::provider(status, "bind completion"));
            }
        }

        debug!(queue = %self.name, ?access, "opened queue handle");
        *slot.write().expect("connection lock poisoned") = Some(handle.clone());
        Ok(handle)
    }

    fn cached(slot: &RwLock<Option<QueueHandle>>) -> Option<QueueHandle> {
        let guard = slot.read().expect("connection lock poisoned");
        guard.as_ref().filter(|h| !h.is_closed()).cloned()
    }
}

impl Drop for QueueConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
