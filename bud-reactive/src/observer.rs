use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Item, StreamError, Subscription};

/// Receives the events of an [`crate::Observable`].
///
/// A well behaved stream calls `on_next` zero or more times, followed by at most one of
/// `on_error` or `on_complete`. [`Subscriber`] enforces that on behalf of every observer.
pub trait Observer<T>: Send + Sync + 'static {
    fn on_next(&self, value: T);
    fn on_error(&self, error: StreamError);
    fn on_complete(&self);
}

/// An [`Observer`] built out of closures.
pub struct FnObserver<N, E, C> {
    next: N,
    error: E,
    complete: C,
}

impl<N, E, C> FnObserver<N, E, C> {
    pub fn new(next: N, error: E, complete: C) -> Self {
        FnObserver {
            next,
            error,
            complete,
        }
    }
}

impl<T, N, E, C> Observer<T> for FnObserver<N, E, C>
where
    N: Fn(T) + Send + Sync + 'static,
    E: Fn(StreamError) + Send + Sync + 'static,
    C: Fn() + Send + Sync + 'static,
{
    fn on_next(&self, value: T) {
        (self.next)(value)
    }

    fn on_error(&self, error: StreamError) {
        (self.error)(error)
    }

    fn on_complete(&self) {
        (self.complete)()
    }
}

/// The producing side of a subscription, handed to the subscribe function of an
/// [`crate::Observable`].
///
/// Drops events once the stream has terminated or was unsubscribed, and unsubscribes
/// automatically after a terminal event.
pub struct Subscriber<T> {
    inner: Arc<SubscriberInner<T>>,
}

struct SubscriberInner<T> {
    observer: Box<dyn Observer<T>>,
    stopped: AtomicBool,
    subscription: Subscription,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Subscriber {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Item> Subscriber<T> {
    pub fn new(observer: impl Observer<T>) -> Self {
        Subscriber {
            inner: Arc::new(SubscriberInner {
                observer: Box::new(observer),
                stopped: AtomicBool::new(false),
                subscription: Subscription::new(),
            }),
        }
    }

    /// A subscriber for an upstream source that hands values to `on_next`, and forwards
    /// terminal events to `downstream`.
    ///
    /// Unsubscribing `downstream` also unsubscribes the returned subscriber.
    pub fn forwarding<U: Item>(
        downstream: &Subscriber<U>,
        on_next: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        let on_error = downstream.clone();
        let on_complete = downstream.clone();
        Subscriber::child_of(
            downstream,
            FnObserver::new(
                on_next,
                move |err| on_error.error(err),
                move || on_complete.complete(),
            ),
        )
    }

    /// A subscriber for `observer` that gets unsubscribed along with `parent`.
    pub fn child_of<U: Item>(parent: &Subscriber<U>, observer: impl Observer<T>) -> Self {
        let child = Subscriber::new(observer);
        parent.subscription().add(child.subscription().clone());
        child
    }

    pub fn next(&self, value: T) {
        if !self.is_closed() {
            self.inner.observer.on_next(value);
        }
    }

    pub fn error(&self, error: StreamError) {
        if self.stop() {
            self.inner.observer.on_error(error);
            self.inner.subscription.unsubscribe();
        }
    }

    pub fn complete(&self) {
        if self.stop() {
            self.inner.observer.on_complete();
            self.inner.subscription.unsubscribe();
        }
    }

    /// Returns `true` if this call moved the subscriber into the stopped state.
    fn stop(&self) -> bool {
        !self.inner.subscription.is_closed()
            && self
                .inner
                .stopped
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    /// True once a terminal event was delivered or the subscription was cancelled.
    pub fn is_closed(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst) || self.inner.subscription.is_closed()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.inner.subscription
    }

    /// Run `f` when this subscriber gets unsubscribed.
    pub fn add_teardown(&self, f: impl FnOnce() + Send + 'static) {
        self.inner.subscription.add_fn(f);
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("stopped", &self.inner.stopped.load(Ordering::SeqCst))
            .field("subscription", &self.inner.subscription)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, Recorder};

    #[test]
    fn nothing_is_delivered_after_complete() {
        let recorder = Recorder::new();
        let subscriber = Subscriber::new(recorder.clone());
        subscriber.next(1);
        subscriber.complete();
        subscriber.next(2);
        subscriber.error(StreamError::msg("late"));
        subscriber.complete();

        assert_eq!(recorder.events(), vec![Event::Next(1), Event::Complete]);
        assert!(subscriber.subscription().is_closed());
    }

    #[test]
    fn nothing_is_delivered_after_unsubscribe() {
        let recorder = Recorder::new();
        let subscriber = Subscriber::new(recorder.clone());
        subscriber.subscription().unsubscribe();
        subscriber.next(1);
        subscriber.complete();
        assert!(recorder.events().is_empty());
    }
}
