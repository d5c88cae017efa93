use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::scheduler::ScheduledAction;
use crate::{Scheduler, Subscription};

/// A [`Scheduler`] whose clock only moves when told to.
///
/// Actions run on the thread that advances the clock, so tests can step through time
/// deterministically.
#[derive(Default)]
pub struct VirtualTimeScheduler {
    state: Mutex<VirtualState>,
}

#[derive(Default)]
struct VirtualState {
    now: Duration,
    seq: u64,
    queue: BinaryHeap<ScheduledAction>,
}

impl VirtualTimeScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(VirtualTimeScheduler::default())
    }

    pub fn advance_by(&self, delta: Duration) {
        let target = self.now() + delta;
        self.advance_to(target);
    }

    /// Run every action due at or before `target`, including ones scheduled along the way.
    pub fn advance_to(&self, target: Duration) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.peek() {
                    Some(next) if next.due <= target => {
                        state.now = state.now.max(next.due);
                        state.queue.pop()
                    }
                    _ => None,
                }
            };
            match next {
                Some(action) => action.run(),
                None => break,
            }
        }

        let mut state = self.state.lock();
        state.now = state.now.max(target);
    }

    /// Number of actions waiting for the clock, cancelled ones included.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Scheduler for VirtualTimeScheduler {
    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn schedule_after(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) -> Subscription {
        let mut state = self.state.lock();
        state.seq += 1;
        let (action, subscription) = ScheduledAction::new(state.now + delay, state.seq, action);
        state.queue.push(action);
        subscription
    }
}
