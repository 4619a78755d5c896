//! A simple, volatile, in-memory implementation of [`KVStore`].

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use grandpa_rs::pluggables::{KVGet, KVStore, KVWriteError, WriteBatch};

/// An in-memory implementation of [`KVStore`]. Clones share the same storage, so a test can keep a clone
/// to inspect what was written, or to make later writes fail.
#[derive(Clone)]
pub(crate) struct MemDB {
    map: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemDB {
    /// Create a new, empty `MemDB`.
    pub(crate) fn new() -> MemDB {
        MemDB {
            map: Arc::new(Mutex::new(HashMap::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every following call to `write` fail (or succeed again).
    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KVStore for MemDB {
    type WriteBatch = MemWriteBatch;

    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), KVWriteError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KVWriteError {
                reason: String::from("MemDB is set to fail writes"),
            });
        }

        let mut map = self.map.lock().unwrap();
        for (key, value) in wb.insertions {
            map.insert(key, value);
        }
        for key in wb.deletions {
            map.remove(&key);
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.map.lock().unwrap().clear();
    }
}

impl KVGet for MemDB {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.lock().unwrap().get(key).cloned()
    }
}

// A simple implementation of [`WriteBatch`].
pub(crate) struct MemWriteBatch {
    insertions: HashMap<Vec<u8>, Vec<u8>>,
    deletions: HashSet<Vec<u8>>,
}

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch {
            insertions: HashMap::new(),
            deletions: HashSet::new(),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        let _ = self.deletions.remove(key);
        self.insertions.insert(key.to_vec(), value.to_vec());
    }

    fn delete(&mut self, key: &[u8]) {
        let _ = self.insertions.remove(key);
        self.deletions.insert(key.to_vec());
    }
}
