use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};

use crate::Subscription;

/// Something that runs actions, possibly at a later point in time.
pub trait Scheduler: Send + Sync + 'static {
    /// Time elapsed since this scheduler was created.
    fn now(&self) -> Duration;

    /// Run `action` once `delay` has elapsed. Unsubscribing the returned [`Subscription`]
    /// before then cancels it.
    fn schedule_after(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) -> Subscription;

    /// Run `action` as soon as possible, after anything already due.
    fn schedule(&self, action: Box<dyn FnOnce() + Send>) -> Subscription {
        self.schedule_after(Duration::ZERO, action)
    }
}

pub type SchedulerRef = Arc<dyn Scheduler>;

/// A queued action, ordered by when it's due and then by when it was queued.
pub(crate) struct ScheduledAction {
    pub(crate) due: Duration,
    pub(crate) seq: u64,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) action: Box<dyn FnOnce() + Send>,
}

impl ScheduledAction {
    pub(crate) fn new(
        due: Duration,
        seq: u64,
        action: Box<dyn FnOnce() + Send>,
    ) -> (Self, Subscription) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_ = Arc::clone(&cancelled);
        let subscription = Subscription::from_fn(move || cancelled_.store(true, Ordering::SeqCst));
        let action = ScheduledAction {
            due,
            seq,
            cancelled,
            action,
        };
        (action, subscription)
    }

    pub(crate) fn run(self) {
        if !self.cancelled.load(Ordering::SeqCst) {
            (self.action)();
        }
    }
}

impl PartialEq for ScheduledAction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for ScheduledAction {}

impl PartialOrd for ScheduledAction {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledAction {
    /// Reversed, so [`BinaryHeap`] pops the earliest action first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A [`Scheduler`] that runs every action serially on one dedicated thread.
pub struct EventLoopScheduler {
    tx: channel::Sender<ScheduledAction>,
    seq: parking_lot::Mutex<u64>,
    start: Instant,
    thread: ThreadId,
    name: String,
}

impl EventLoopScheduler {
    /// Spawn a new event loop thread named `name`.
    pub fn new(name: impl Into<String>) -> Result<Self, std::io::Error> {
        let name = name.into();
        let (tx, rx) = channel::unbounded();
        let start = Instant::now();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_event_loop(rx, start))?;
        tracing::debug!(%name, "started event loop");

        Ok(EventLoopScheduler {
            tx,
            seq: parking_lot::Mutex::new(0),
            start,
            thread: handle.thread().id(),
            name,
        })
    }

    /// Id of the thread that runs every action of this scheduler.
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }
}

impl Scheduler for EventLoopScheduler {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn schedule_after(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) -> Subscription {
        // Sequence numbers are handed out under the same lock as sending, so the loop sees
        // actions in the order they were numbered.
        let mut seq = self.seq.lock();
        *seq += 1;
        let (action, subscription) = ScheduledAction::new(self.now() + delay, *seq, action);
        if self.tx.send(action).is_err() {
            tracing::warn!(name = %self.name, "event loop is gone, dropping action");
        }
        subscription
    }
}

impl fmt::Debug for EventLoopScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopScheduler")
            .field("name", &self.name)
            .field("thread", &self.thread)
            .finish()
    }
}

fn run_event_loop(rx: channel::Receiver<ScheduledAction>, start: Instant) {
    let mut queue: BinaryHeap<ScheduledAction> = BinaryHeap::new();
    let mut connected = true;

    loop {
        let now = start.elapsed();
        while queue.peek().is_some_and(|next| next.due <= now) {
            if let Some(next) = queue.pop() {
                next.run();
            }
        }

        let received = match (queue.peek(), connected) {
            (None, false) => return,
            (Some(next), true) => rx.recv_timeout(next.due.saturating_sub(start.elapsed())),
            (None, true) => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            (Some(next), false) => {
                std::thread::sleep(next.due.saturating_sub(start.elapsed()));
                continue;
            }
        };

        match received {
            Ok(action) => queue.push(action),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => connected = false,
        }
    }
}
