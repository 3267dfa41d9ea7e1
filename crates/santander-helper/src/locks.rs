//! Lock table that keeps two operations from writing overlapping paths.
//!
//! Two paths overlap when they are equal or one contains the other. A guard
//! holds every touched path of one operation and releases them on drop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

#[derive(Default)]
pub(crate) struct DestinationLocks {
    table: Mutex<LockTable>,
    released: Notify,
}

#[derive(Default)]
struct LockTable {
    next_id: u64,
    held: HashMap<u64, Vec<PathBuf>>,
}

impl LockTable {
    fn conflicts(&self, paths: &[PathBuf]) -> bool {
        self.held
            .values()
            .flatten()
            .any(|held| paths.iter().any(|path| overlaps(held, path)))
    }
}

pub(crate) struct DestinationGuard {
    locks: Arc<DestinationLocks>,
    id: u64,
}

impl DestinationLocks {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `paths` if nothing overlapping is held.
    pub(crate) fn try_acquire(self: &Arc<Self>, paths: &[PathBuf]) -> Option<DestinationGuard> {
        let mut table = self.lock_table();
        if table.conflicts(paths) {
            return None;
        }
        let id = table.next_id;
        table.next_id += 1;
        table.held.insert(id, paths.to_vec());
        drop(table);
        Some(DestinationGuard {
            locks: Arc::clone(self),
            id,
        })
    }

    /// Wait until `paths` can be claimed. The flag reports whether the caller
    /// had to wait.
    pub(crate) async fn acquire(self: &Arc<Self>, paths: &[PathBuf]) -> (DestinationGuard, bool) {
        let mut waited = false;
        loop {
            let mut notified = pin!(self.released.notified());
            let _ = notified.as_mut().enable();
            if let Some(guard) = self.try_acquire(paths) {
                return (guard, waited);
            }
            waited = true;
            notified.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn held_count(&self) -> usize {
        self.lock_table().held.len()
    }

    fn lock_table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DestinationGuard {
    fn drop(&mut self) {
        self.locks.lock_table().held.remove(&self.id);
        self.locks.released.notify_waiters();
    }
}

fn overlaps(left: &Path, right: &Path) -> bool {
    left.starts_with(right) || right.starts_with(left)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn paths(values: &[&str]) -> Vec<PathBuf> {
        values.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn nested_and_equal_paths_overlap() {
        assert!(overlaps(Path::new("/var/a"), Path::new("/var/a")));
        assert!(overlaps(Path::new("/var/a"), Path::new("/var/a/b")));
        assert!(overlaps(Path::new("/var/a/b"), Path::new("/var/a")));
        assert!(!overlaps(Path::new("/var/a"), Path::new("/var/ab")));
    }

    #[test]
    fn disjoint_claims_coexist_and_release_on_drop() {
        let locks = DestinationLocks::new();
        let first = locks.try_acquire(&paths(&["/var/a"]));
        let second = locks.try_acquire(&paths(&["/var/b"]));
        assert!(first.is_some() && second.is_some());
        assert!(locks.try_acquire(&paths(&["/var/a/inner"])).is_none());
        assert_eq!(locks.held_count(), 2);

        drop(first);
        assert!(locks.try_acquire(&paths(&["/var/a/inner"])).is_some());
        drop(second);
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test]
    async fn waiter_proceeds_once_the_holder_releases() {
        let locks = DestinationLocks::new();
        let holder = locks.try_acquire(&paths(&["/var/out"]));
        assert!(holder.is_some());

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let (guard, waited) = locks.acquire(&paths(&["/var/out"])).await;
                drop(guard);
                waited
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(holder);

        let waited = timeout(Duration::from_secs(5), waiter)
            .await
            .map(|joined| joined.unwrap_or(false))
            .unwrap_or(false);
        assert!(waited);
    }
}
