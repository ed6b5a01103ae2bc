use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Tables with a migration currently in flight in this process
#[derive(Debug, Clone, Default)]
pub struct TableLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` if someone else holds it.
    pub fn try_acquire(&self, key: &str) -> Option<TableLockGuard> {
        let mut active = self.lock();
        if !active.insert(key.to_string()) {
            return None;
        }
        Some(TableLockGuard {
            locks: self.clone(),
            key: key.to_string(),
        })
    }

    #[cfg(test)]
    pub fn is_locked(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the table on drop
#[derive(Debug)]
pub struct TableLockGuard {
    locks: TableLocks,
    key: String,
}

impl Drop for TableLockGuard {
    fn drop(&mut self) {
        self.locks.lock().remove(&self.key);
    }
}
