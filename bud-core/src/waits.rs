//! Which evaluations are blocked on which other ones.
//!
//! A key being computed on another thread (or a task being run by another future) is waited
//! for. If what we wait for is itself, transitively, waiting for us, the wait would never end,
//! so it's reported as a cycle instead.

use std::collections::{HashMap, HashSet};

use bud_types::KeyPath;
use parking_lot::Mutex;

#[derive(Default)]
pub(crate) struct WaitGraph {
    edges: Mutex<HashMap<KeyPath, Vec<KeyPath>>>,
}

impl WaitGraph {
    /// Record that every one of `waiters` is blocked until `on` finishes.
    ///
    /// If `on` is already blocked on one of `waiters`, nothing is recorded and the path from
    /// `on` to that waiter is returned instead.
    pub(crate) fn start_waiting(
        &self,
        waiters: &[KeyPath],
        on: &KeyPath,
    ) -> Result<(), Vec<KeyPath>> {
        if waiters.is_empty() {
            return Ok(());
        }
        let mut edges = self.edges.lock();
        if let Some(path) = path_to(&edges, on, waiters) {
            return Err(path);
        }
        for waiter in waiters {
            edges.entry(waiter.clone()).or_default().push(on.clone());
        }
        Ok(())
    }

    /// Undo one [`WaitGraph::start_waiting`] of `waiters` on `on`.
    pub(crate) fn stop_waiting(&self, waiters: &[KeyPath], on: &KeyPath) {
        let mut edges = self.edges.lock();
        for waiter in waiters {
            let Some(targets) = edges.get_mut(waiter) else {
                continue;
            };
            if let Some(idx) = targets.iter().position(|target| target == on) {
                targets.swap_remove(idx);
            }
            if targets.is_empty() {
                edges.remove(waiter);
            }
        }
    }
}

/// Path from `from` to any of `targets`, both ends included.
fn path_to(
    edges: &HashMap<KeyPath, Vec<KeyPath>>,
    from: &KeyPath,
    targets: &[KeyPath],
) -> Option<Vec<KeyPath>> {
    let mut visited = HashSet::new();
    let mut pending = vec![vec![from.clone()]];
    while let Some(path) = pending.pop() {
        let Some(last) = path.last() else {
            continue;
        };
        if targets.contains(last) {
            return Some(path);
        }
        if !visited.insert(last.clone()) {
            continue;
        }
        for next in edges.get(last).into_iter().flatten() {
            let mut longer = path.clone();
            longer.push(next.clone());
            pending.push(longer);
        }
    }
    None
}
