//! Object store in memory

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

use parking_lot::Mutex;
use snafu::{OptionExt, ensure};

use super::{
    BlobHandle, InjectedSnafu, NotFoundSnafu, ObjectStore, Result, SizeMismatchSnafu,
    StoreState, UnavailableSnafu,
};
use crate::common::utils::hash::{HashMap, new_hash_map};

/// Object store that keeps the blobs in a hash map. Failures can be injected to test
/// the retry and the rollback of the spill
#[derive(Debug)]
pub struct InMemoryObjectStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    state: Mutex<StoreState>,
    passing_writes: AtomicUsize,
    failing_writes: AtomicUsize,
    failing_reads: AtomicUsize,
}

impl InMemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(new_hash_map()),
            state: Mutex::new(StoreState::Good),
            passing_writes: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
            failing_reads: AtomicUsize::new(0),
        }
    }

    /// The next `n` writes fail with retryable error
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next_writes_after(0, n);
    }

    /// The next `passing` writes succeed, then `n` writes fail with retryable error
    pub fn fail_next_writes_after(&self, passing: usize, n: usize) {
        self.passing_writes.store(passing, Relaxed);
        self.failing_writes.store(n, Relaxed);
    }

    /// The next `n` reads fail with retryable error
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Relaxed);
    }

    /// Override the reported state. Writes and reads are refused while it is `Bad`
    pub fn set_state(&self, state: StoreState) {
        *self.state.lock() = state;
    }

    /// Number of blobs in the store
    pub fn num_blobs(&self) -> usize {
        self.blobs.lock().len()
    }

    /// Returns true if the store has the blob with given key
    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().contains_key(key)
    }

    /// Overwrite the content of an existing blob, used to simulate corruption
    pub fn corrupt(&self, key: &str, f: impl FnOnce(&mut Vec<u8>)) {
        if let Some(bytes) = self.blobs.lock().get_mut(key) {
            f(bytes);
        }
    }

    fn check_available(&self) -> Result<()> {
        if let StoreState::Bad(reason) = &*self.state.lock() {
            return UnavailableSnafu {
                reason: reason.clone(),
            }
            .fail();
        }
        Ok(())
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrement the counter if it is positive. Returns true if it was positive
fn consume_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Relaxed, Relaxed, |remain| remain.checked_sub(1))
        .is_ok()
}

impl ObjectStore for InMemoryObjectStore {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<BlobHandle> {
        self.check_available()?;
        ensure!(
            consume_failure(&self.passing_writes) || !consume_failure(&self.failing_writes),
            InjectedSnafu {
                operation: "write",
                key
            }
        );
        self.blobs.lock().insert(key.to_string(), bytes.to_vec());
        Ok(BlobHandle::new(key.to_string(), bytes.len()))
    }

    fn read(&self, handle: &BlobHandle) -> Result<Vec<u8>> {
        self.check_available()?;
        ensure!(
            !consume_failure(&self.failing_reads),
            InjectedSnafu {
                operation: "read",
                key: handle.key()
            }
        );
        let bytes = self
            .blobs
            .lock()
            .get(handle.key())
            .cloned()
            .context(NotFoundSnafu { key: handle.key() })?;
        ensure!(
            bytes.len() == handle.size(),
            SizeMismatchSnafu {
                key: handle.key(),
                expect: handle.size(),
                actual: bytes.len()
            }
        );
        Ok(bytes)
    }

    fn delete(&self, handle: &BlobHandle) -> Result<()> {
        self.check_available()?;
        self.blobs
            .lock()
            .remove(handle.key())
            .map(|_| ())
            .context(NotFoundSnafu { key: handle.key() })
    }

    fn state(&self) -> StoreState {
        self.state.lock().clone()
    }
}
