use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// Cancellation token for one connection attempt.
///
/// Created not-aborted. `abort()` is idempotent and never un-aborts. The
/// attempt that registered the handle checks it after every await and unwinds
/// without further side effects once it is set.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Per-controller set of in-flight attempt handles.
///
/// Mutated only at attempt start, attempt end, and teardown. Teardown closes
/// the registry: every outstanding handle is aborted and any handle minted
/// afterwards is born aborted, which is the sole mechanism keeping an
/// orphaned transport connection from outliving its owning scope.
#[derive(Debug, Default)]
pub struct AbortRegistry {
    handles: Mutex<HashMap<Uuid, AbortHandle>>,
    closed: AtomicBool,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a handle for a new attempt and track it until the attempt ends.
    /// On a closed registry the handle comes back already aborted, so the
    /// attempt unwinds at its first check.
    pub fn register(&self) -> (Uuid, AbortHandle) {
        let id = Uuid::new_v4();
        let handle = AbortHandle::new();
        let mut handles = self.handles.lock().unwrap();
        if self.closed.load(Ordering::SeqCst) {
            handle.abort();
        } else {
            handles.insert(id, handle.clone());
        }
        (id, handle)
    }

    /// Drop a handle once its attempt has completed or been cancelled.
    pub fn complete(&self, id: &Uuid) {
        self.handles.lock().unwrap().remove(id);
    }

    /// Abort every outstanding attempt. The registry stays open; a later
    /// attempt can register normally.
    pub fn abort_all(&self) {
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.values() {
            handle.abort();
        }
        handles.clear();
    }

    /// Abort every outstanding attempt and latch the registry shut. The
    /// `closed` flag is flipped under the handle lock so a concurrent
    /// `register` either lands in the drain or observes the latch.
    pub fn close(&self) {
        let mut handles = self.handles.lock().unwrap();
        self.closed.store(true, Ordering::SeqCst);
        for handle in handles.values() {
            handle.abort();
        }
        handles.clear();
    }

    pub fn outstanding(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}
