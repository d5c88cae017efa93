use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle used to cancel a subscription and release everything it holds.
///
/// Clones refer to the same subscription. Unsubscribing runs every registered teardown
/// exactly once, anything added after that is torn down immediately.
#[derive(Clone, Default)]
pub struct Subscription {
    inner: Arc<Mutex<SubscriptionState>>,
}

#[derive(Default)]
struct SubscriptionState {
    closed: bool,
    teardowns: Vec<Teardown>,
}

enum Teardown {
    Fn(Box<dyn FnOnce() + Send>),
    Child(Subscription),
}

impl Teardown {
    fn run(self) {
        match self {
            Teardown::Fn(f) => f(),
            Teardown::Child(child) => child.unsubscribe(),
        }
    }
}

impl Subscription {
    pub fn new() -> Self {
        Subscription::default()
    }

    /// A [`Subscription`] that is already closed.
    pub fn closed() -> Self {
        let subscription = Subscription::new();
        subscription.unsubscribe();
        subscription
    }

    /// A [`Subscription`] that runs `f` when unsubscribed.
    pub fn from_fn(f: impl FnOnce() + Send + 'static) -> Self {
        let subscription = Subscription::new();
        subscription.add_fn(f);
        subscription
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Run `f` when this subscription gets unsubscribed.
    pub fn add_fn(&self, f: impl FnOnce() + Send + 'static) {
        self.add_teardown(Teardown::Fn(Box::new(f)));
    }

    /// Unsubscribe `child` when this subscription gets unsubscribed.
    pub fn add(&self, child: Subscription) {
        if Arc::ptr_eq(&self.inner, &child.inner) {
            return;
        }
        self.add_teardown(Teardown::Child(child));
    }

    fn add_teardown(&self, teardown: Teardown) {
        let mut state = self.inner.lock();
        if state.closed {
            drop(state);
            teardown.run();
        } else {
            state.teardowns.push(teardown);
        }
    }

    pub fn unsubscribe(&self) {
        let teardowns = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.teardowns)
        };
        for teardown in teardowns {
            teardown.run();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Subscription")
            .field("closed", &state.closed)
            .field("teardowns", &state.teardowns.len())
            .finish()
    }
}
