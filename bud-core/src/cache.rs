//! Memoization of evaluated keys.
//!
//! Locking is per key. Computing a key marks its cell as in progress and releases the lock,
//! so a definition can evaluate other keys, on this thread or any other, while concurrent
//! requests for the same key wait for the first one to finish. Waiting for a key that is,
//! transitively, waiting for the waiter fails with [`BuildError::Cycle`].

use std::sync::Arc;

use bud_types::KeyPath;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::waits::WaitGraph;
use crate::{AnyValue, BuildError, BuildResult};

#[derive(Default)]
pub(crate) struct ConfCache {
    cells: DashMap<KeyPath, Arc<CacheCell>>,
    waits: WaitGraph,
}

#[derive(Default)]
struct CacheCell {
    state: Mutex<CellState>,
    ready: Condvar,
}

#[derive(Default)]
enum CellState {
    #[default]
    Unresolved,
    InProgress,
    Resolved(AnyValue),
}

/// Puts a cell back to unresolved unless the computation finished, e.g. when it panics.
struct InProgressGuard<'a> {
    cell: &'a CacheCell,
    resolved: Option<AnyValue>,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.cell.state.lock();
        *state = match self.resolved.take() {
            Some(value) => CellState::Resolved(value),
            None => CellState::Unresolved,
        };
        drop(state);
        self.cell.ready.notify_all();
    }
}

impl ConfCache {
    /// Returns the cached value for `key`, or runs `compute` to produce one.
    ///
    /// `chain` are the keys being computed by the caller, outermost first. Failures are not
    /// cached, the next request for `key` runs `compute` again.
    pub(crate) fn get_or_compute(
        &self,
        key: &KeyPath,
        chain: &[KeyPath],
        compute: impl FnOnce() -> BuildResult<AnyValue>,
    ) -> BuildResult<AnyValue> {
        // Clone the cell out so the map's shard lock isn't held while computing.
        let entry = self.cells.entry(key.clone()).or_default();
        let cell = Arc::clone(entry.value());
        drop(entry);

        let mut state = cell.state.lock();
        let mut waiting = false;
        loop {
            match &*state {
                CellState::Resolved(value) => {
                    tracing::trace!(%key, "cache hit");
                    let value = Arc::clone(value);
                    if waiting {
                        self.waits.stop_waiting(chain, key);
                    }
                    return Ok(value);
                }
                CellState::InProgress if !waiting => {
                    if let Err(path) = self.waits.start_waiting(chain, key) {
                        let mut cycle = chain.to_vec();
                        cycle.extend(path);
                        return Err(BuildError::Cycle {
                            key: key.clone(),
                            chain: cycle,
                        });
                    }
                    waiting = true;
                }
                CellState::InProgress => cell.ready.wait(&mut state),
                CellState::Unresolved => break,
            }
        }
        if waiting {
            self.waits.stop_waiting(chain, key);
        }
        *state = CellState::InProgress;
        drop(state);

        tracing::trace!(%key, "cache miss");
        let mut guard = InProgressGuard {
            cell: &cell,
            resolved: None,
        };
        let value = compute()?;
        guard.resolved = Some(Arc::clone(&value));
        Ok(value)
    }

    /// The value of `key`, if it was computed already.
    pub(crate) fn resolved(&self, key: &KeyPath) -> Option<AnyValue> {
        let cell = Arc::clone(self.cells.get(key)?.value());
        let state = cell.state.lock();
        match &*state {
            CellState::Resolved(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_resolved(&self, key: &KeyPath) -> bool {
        self.resolved(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::BuildError;

    fn key(raw: &str) -> KeyPath {
        KeyPath::new(raw)
    }

    #[test]
    fn computes_once() {
        let cache = ConfCache::default();
        let count = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_compute(&key("/A"), &[], || {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(42u32) as AnyValue)
                })
                .unwrap();
            assert_eq!(value.downcast_ref::<u32>(), Some(&42));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(cache.is_resolved(&key("/A")));
    }

    #[test]
    fn failures_are_retried() {
        let cache = ConfCache::default();
        let err = cache.get_or_compute(&key("/A"), &[], || {
            Err(BuildError::IllegalState("first try".to_string()))
        });
        assert!(err.is_err());
        assert!(!cache.is_resolved(&key("/A")));

        let value = cache
            .get_or_compute(&key("/A"), &[], || Ok(Arc::new(1u8) as AnyValue))
            .unwrap();
        assert_eq!(value.downcast_ref::<u8>(), Some(&1));
    }

    #[test]
    fn concurrent_requests_share_one_computation() {
        let cache = Arc::new(ConfCache::default());
        let count = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for _ in 0..8 {
                let cache = Arc::clone(&cache);
                let count = Arc::clone(&count);
                s.spawn(move || {
                    cache
                        .get_or_compute(&key("/Slow"), &[], || {
                            count.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(Arc::new(7u64) as AnyValue)
                        })
                        .unwrap()
                });
            }
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
