//! Fake transactional resource for exercising atomic dispatch.

use std::sync::{Arc, Mutex};

use chronicle_core::dispatcher::{Transaction, TransactionalUnit};
use chronicle_core::error::HandlerError;

#[derive(Debug, Default)]
struct ResourceState {
    committed: Vec<String>,
    begun: u32,
    commits: u32,
    rollbacks: u32,
    reject_next_commit: bool,
}

/// A resource event handlers write to.
///
/// Writes go through a [`FakeTransaction`] begun on the resource and only
/// become visible on commit. Clones share the same state, so a test can hand
/// one clone to the dispatcher and keep another for assertions.
#[derive(Debug, Clone, Default)]
pub struct FakeTransactionalResource {
    state: Arc<Mutex<ResourceState>>,
}

impl FakeTransactionalResource {
    /// Create an empty resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` outside any transaction, making it visible at once.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn write(&self, value: impl Into<String>) {
        self.state.lock().unwrap().committed.push(value.into());
    }

    /// Makes the next commit fail.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn reject_next_commit(&self) {
        self.state.lock().unwrap().reject_next_commit = true;
    }

    /// Values that were committed.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn committed(&self) -> Vec<String> {
        self.state.lock().unwrap().committed.clone()
    }

    /// Number of transactions begun.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn begun(&self) -> u32 {
        self.state.lock().unwrap().begun
    }

    /// Number of successful commits.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn commits(&self) -> u32 {
        self.state.lock().unwrap().commits
    }

    /// Number of rollbacks.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn rollbacks(&self) -> u32 {
        self.state.lock().unwrap().rollbacks
    }
}

impl TransactionalUnit for FakeTransactionalResource {
    fn begin(&self) -> Result<Box<dyn Transaction>, HandlerError> {
        self.state.lock().unwrap().begun += 1;
        Ok(Box::new(FakeTransaction {
            state: Arc::clone(&self.state),
            staged: Mutex::new(Vec::new()),
        }))
    }
}

/// An open transaction on a [`FakeTransactionalResource`].
#[derive(Debug)]
pub struct FakeTransaction {
    state: Arc<Mutex<ResourceState>>,
    staged: Mutex<Vec<String>>,
}

impl FakeTransaction {
    /// Stages `value` until the transaction commits.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn write(&self, value: impl Into<String>) {
        self.staged.lock().unwrap().push(value.into());
    }
}

impl Transaction for FakeTransaction {
    fn commit(self: Box<Self>) -> Result<(), HandlerError> {
        let Self { state, staged } = *self;
        let staged = staged.into_inner().unwrap();
        let mut state = state.lock().unwrap();
        if state.reject_next_commit {
            state.reject_next_commit = false;
            return Err(HandlerError::msg("commit rejected"));
        }
        state.committed.extend(staged);
        state.commits += 1;
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        self.state.lock().unwrap().rollbacks += 1;
    }
}
