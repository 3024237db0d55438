use foldhash::fast::RandomState;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::oneshot;

use crate::{Error, Receiver, Result, msg::Response};

/// Pending-call table of one duplex connection.
///
/// Assigns connection-scoped call ids (never reused) and parks a one-shot
/// slot per outstanding call until the matching response arrives or the
/// connection closes.
#[derive(Default)]
pub struct Waiter {
    index: AtomicU64,
    closed: AtomicBool,
    id_map: dashmap::DashMap<u64, oneshot::Sender<Result<Response>>, RandomState>,
}

/// Removes the pending entry when its receiver is dropped unfulfilled, so a
/// caller that gives up (timeout, cancelled future) leaves nothing behind.
pub struct WaiterCleaner<'a> {
    waiter: &'a Waiter,
    call_id: u64,
}

impl Drop for WaiterCleaner<'_> {
    fn drop(&mut self) {
        self.waiter.remove(self.call_id);
    }
}

impl Waiter {
    /// Allocates a fresh call id and the receiver its response is posted to.
    pub fn alloc(&self) -> (u64, Receiver<'_>) {
        let call_id = self.index.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if self.closed.load(Ordering::Acquire) {
            let _ = tx.send(Err(Error::kind(crate::ErrorKind::ConnectionClosed)));
        } else {
            self.id_map.insert(call_id, tx);
        }
        (
            call_id,
            Receiver::new(
                rx,
                WaiterCleaner {
                    waiter: self,
                    call_id,
                },
            ),
        )
    }

    /// Fulfils the pending call `call_id`. Returns false when no caller is
    /// waiting for it (unknown id, already answered, or abandoned).
    pub fn post(&self, call_id: u64, result: Result<Response>) -> bool {
        if let Some((_, tx)) = self.id_map.remove(&call_id) {
            let _ = tx.send(result);
            true
        } else {
            false
        }
    }

    /// Fails every outstanding call with `err`; later allocations fail
    /// immediately.
    pub fn close(&self, err: &Error) {
        self.closed.store(true, Ordering::Release);
        let call_ids: Vec<u64> = self.id_map.iter().map(|entry| *entry.key()).collect();
        for call_id in call_ids {
            self.post(call_id, Err(err.clone()));
        }
    }

    #[must_use]
    pub fn contains_call_id(&self, call_id: u64) -> bool {
        self.id_map.contains_key(&call_id)
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.id_map.len()
    }

    fn remove(&self, call_id: u64) {
        self.id_map.remove(&call_id);
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("pending", &self.id_map.len())
            .finish()
    }
}
