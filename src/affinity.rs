//! Thread-affinity registry for the automation runtime.
//!
//! The runtime must be initialized once on every thread that touches host
//! objects. The registry records which threads have done so; the set only
//! shrinks when the session that owns it tears down.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use thiserror::Error;

use crate::host::{AutomationRuntime, HostError};

#[derive(Debug, Error)]
pub enum AffinityError {
    #[error("Failed to initialize automation runtime: {0}")]
    Initialize(#[source] HostError),
}

pub struct ThreadAffinityRegistry {
    runtime: Arc<dyn AutomationRuntime>,
    threads: Mutex<HashSet<ThreadId>>,
}

impl ThreadAffinityRegistry {
    pub fn new(runtime: Arc<dyn AutomationRuntime>) -> Self {
        Self {
            runtime,
            threads: Mutex::new(HashSet::new()),
        }
    }

    /// Initialize the runtime for the calling thread unless already done.
    ///
    /// Check and insert happen under one lock, so concurrent callers on
    /// different threads each initialize exactly once. A failed
    /// initialization leaves the thread unrecorded and can be retried.
    pub fn ensure_initialized(&self) -> Result<(), AffinityError> {
        let id = thread::current().id();
        let mut threads = self.threads.lock().expect("affinity lock poisoned");
        if threads.contains(&id) {
            return Ok(());
        }
        self.runtime
            .initialize_thread()
            .map_err(AffinityError::Initialize)?;
        threads.insert(id);
        tracing::debug!(thread = ?id, count = threads.len(), "Initialized automation runtime");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        let id = thread::current().id();
        self.threads
            .lock()
            .expect("affinity lock poisoned")
            .contains(&id)
    }

    pub fn initialized_thread_count(&self) -> usize {
        self.threads.lock().expect("affinity lock poisoned").len()
    }

    /// Undo the calling thread's initialization, if it was recorded.
    pub(crate) fn release_current_thread(&self) -> bool {
        let id = thread::current().id();
        let removed = self
            .threads
            .lock()
            .expect("affinity lock poisoned")
            .remove(&id);
        if removed {
            self.runtime.uninitialize_thread();
            tracing::debug!(thread = ?id, "Released automation runtime");
        }
        removed
    }

    pub(crate) fn runtime(&self) -> &dyn AutomationRuntime {
        self.runtime.as_ref()
    }
}

impl std::fmt::Debug for ThreadAffinityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadAffinityRegistry")
            .field("threads", &self.initialized_thread_count())
            .finish()
    }
}
