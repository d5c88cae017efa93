use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::channel;

use crate::observer::FnObserver;
use crate::{Item, Observer, SchedulerRef, StreamError, Subscriber, Subscription};

type SubscribeFn<T> = dyn Fn(Subscriber<T>) + Send + Sync;

/// A push-based stream of `T`s.
///
/// Nothing happens until someone subscribes, and every subscription runs the stream from the
/// start of its subscribe function.
pub struct Observable<T> {
    subscribe_fn: Arc<SubscribeFn<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Observable {
            subscribe_fn: Arc::clone(&self.subscribe_fn),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observable<{}>", std::any::type_name::<T>())
    }
}

/// Events sent from a subscription to a thread that's blocked on it.
enum Event<T> {
    Next(T),
    Error(StreamError),
    Complete,
}

impl<T: Item> Observable<T> {
    /// Create an [`Observable`] from a function that produces events into a [`Subscriber`].
    ///
    /// The function should register any cleanup with [`Subscriber::add_teardown`].
    pub fn create(subscribe_fn: impl Fn(Subscriber<T>) + Send + Sync + 'static) -> Self {
        Observable {
            subscribe_fn: Arc::new(subscribe_fn),
        }
    }

    /// Emits `value` then completes.
    pub fn just(value: T) -> Self {
        Observable::create(move |subscriber| {
            subscriber.next(value.clone());
            subscriber.complete();
        })
    }

    /// Emits every element of `values` then completes.
    pub fn from_iter(values: impl IntoIterator<Item = T>) -> Self {
        let values: Arc<Vec<T>> = Arc::new(values.into_iter().collect());
        Observable::create(move |subscriber| {
            for value in values.iter() {
                if subscriber.is_closed() {
                    return;
                }
                subscriber.next(value.clone());
            }
            subscriber.complete();
        })
    }

    /// Completes immediately.
    pub fn empty() -> Self {
        Observable::create(|subscriber| subscriber.complete())
    }

    /// Never emits anything, never terminates.
    pub fn never() -> Self {
        Observable::create(|_| ())
    }

    /// Fails immediately with `error`.
    pub fn throw(error: StreamError) -> Self {
        Observable::create(move |subscriber| subscriber.error(error.clone()))
    }

    pub fn subscribe(&self, observer: impl Observer<T>) -> Subscription {
        let subscriber = Subscriber::new(observer);
        let subscription = subscriber.subscription().clone();
        self.subscribe_with(subscriber);
        subscription
    }

    /// Subscribe with an existing [`Subscriber`], used when chaining operators.
    pub fn subscribe_with(&self, subscriber: Subscriber<T>) {
        (self.subscribe_fn)(subscriber)
    }

    /// Subscribe with a closure for every value, logging errors.
    pub fn for_each(&self, on_next: impl Fn(T) + Send + Sync + 'static) -> Subscription {
        self.subscribe(FnObserver::new(
            on_next,
            |err| tracing::warn!(%err, "stream failed"),
            || (),
        ))
    }

    pub fn map<U: Item>(&self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Observable<U> {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::create(move |downstream: Subscriber<U>| {
            let f = Arc::clone(&f);
            let next = downstream.clone();
            source.subscribe_with(Subscriber::forwarding(&downstream, move |value| {
                next.next(f(value))
            }));
        })
    }

    /// Like [`Observable::map`], but an `Err` terminates the stream with that error.
    pub fn try_map<U: Item>(
        &self,
        f: impl Fn(T) -> Result<U, anyhow::Error> + Send + Sync + 'static,
    ) -> Observable<U> {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::create(move |downstream: Subscriber<U>| {
            let f = Arc::clone(&f);
            let next = downstream.clone();
            source.subscribe_with(Subscriber::forwarding(&downstream, move |value| {
                match f(value) {
                    Ok(mapped) => next.next(mapped),
                    Err(err) => next.error(StreamError::new(err)),
                }
            }));
        })
    }

    pub fn filter(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Observable<T> {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        Observable::create(move |downstream: Subscriber<T>| {
            let predicate = Arc::clone(&predicate);
            let next = downstream.clone();
            source.subscribe_with(Subscriber::forwarding(&downstream, move |value| {
                if predicate(&value) {
                    next.next(value);
                }
            }));
        })
    }

    /// Emits the first `count` values then completes, unsubscribing from the source.
    pub fn take(&self, count: usize) -> Observable<T> {
        let source = self.clone();
        Observable::create(move |downstream: Subscriber<T>| {
            if count == 0 {
                downstream.complete();
                return;
            }
            let seen = AtomicUsize::new(0);
            let next = downstream.clone();
            source.subscribe_with(Subscriber::forwarding(&downstream, move |value| {
                let seen = seen.fetch_add(1, Ordering::SeqCst) + 1;
                if seen <= count {
                    next.next(value);
                }
                if seen == count {
                    next.complete();
                }
            }));
        })
    }

    /// Interleaves the values of every source, completing once all of them complete.
    pub fn merge(sources: Vec<Observable<T>>) -> Observable<T> {
        let sources = Arc::new(sources);
        Observable::create(move |downstream: Subscriber<T>| {
            if sources.is_empty() {
                downstream.complete();
                return;
            }
            let remaining = Arc::new(AtomicUsize::new(sources.len()));
            for source in sources.iter() {
                let next = downstream.clone();
                let error = downstream.clone();
                let complete = downstream.clone();
                let remaining = Arc::clone(&remaining);
                let observer = FnObserver::new(
                    move |value| next.next(value),
                    move |err| error.error(err),
                    move || {
                        if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                            complete.complete();
                        }
                    },
                );
                if downstream.is_closed() {
                    return;
                }
                source.subscribe_with(Subscriber::child_of(&downstream, observer));
            }
        })
    }

    pub fn merge_with(&self, other: Observable<T>) -> Observable<T> {
        Observable::merge(vec![self.clone(), other])
    }

    /// Emits everything from `self`, then everything from `next`.
    ///
    /// `next` is only subscribed once `self` completes, and not at all if the subscription
    /// was cancelled before that.
    pub fn concat(&self, next: Observable<T>) -> Observable<T> {
        let first = self.clone();
        Observable::create(move |downstream: Subscriber<T>| {
            let on_next = downstream.clone();
            let on_error = downstream.clone();
            let on_complete = downstream.clone();
            let next = next.clone();
            let observer = FnObserver::new(
                move |value| on_next.next(value),
                move |err| on_error.error(err),
                move || {
                    if on_complete.is_closed() {
                        return;
                    }
                    let forward = on_complete.clone();
                    next.subscribe_with(Subscriber::forwarding(&on_complete, move |value| {
                        forward.next(value)
                    }));
                },
            );
            first.subscribe_with(Subscriber::child_of(&downstream, observer));
        })
    }

    /// Re-emit every event on `scheduler`, preserving their order.
    pub fn observe_on(&self, scheduler: SchedulerRef) -> Observable<T> {
        let source = self.clone();
        Observable::create(move |downstream: Subscriber<T>| {
            let (on_next, on_error, on_complete) =
                (downstream.clone(), downstream.clone(), downstream.clone());
            let (next_sched, error_sched, complete_sched) =
                (scheduler.clone(), scheduler.clone(), scheduler.clone());
            let observer = FnObserver::new(
                move |value: T| {
                    let on_next = on_next.clone();
                    next_sched.schedule(Box::new(move || on_next.next(value)));
                },
                move |err| {
                    let on_error = on_error.clone();
                    error_sched.schedule(Box::new(move || on_error.error(err)));
                },
                move || {
                    let on_complete = on_complete.clone();
                    complete_sched.schedule(Box::new(move || on_complete.complete()));
                },
            );
            source.subscribe_with(Subscriber::child_of(&downstream, observer));
        })
    }

    /// Block the current thread until the first value.
    ///
    /// # Errors
    /// * If the stream fails, or completes without producing anything.
    pub fn wait_first(&self) -> Result<T, StreamError> {
        let rx = self.take(1).events();
        match rx.recv() {
            Ok(Event::Next(value)) => Ok(value),
            Ok(Event::Error(err)) => Err(err),
            Ok(Event::Complete) | Err(_) => Err(StreamError::msg(
                "stream completed without producing a value",
            )),
        }
    }

    /// Block the current thread until the stream completes, returning the last value.
    pub fn wait_last(&self) -> Result<T, StreamError> {
        let mut values = self.wait_all()?;
        values
            .pop()
            .ok_or_else(|| StreamError::msg("stream completed without producing a value"))
    }

    /// Block the current thread until the stream completes, returning every value.
    pub fn wait_all(&self) -> Result<Vec<T>, StreamError> {
        let rx = self.events();
        let mut values = Vec::new();
        loop {
            match rx.recv() {
                Ok(Event::Next(value)) => values.push(value),
                Ok(Event::Error(err)) => return Err(err),
                Ok(Event::Complete) | Err(_) => return Ok(values),
            }
        }
    }

    fn events(&self) -> channel::Receiver<Event<T>> {
        let (tx, rx) = channel::unbounded();
        let (tx_error, tx_complete) = (tx.clone(), tx.clone());
        self.subscribe(FnObserver::new(
            move |value| {
                let _ = tx.send(Event::Next(value));
            },
            move |err| {
                let _ = tx_error.send(Event::Error(err));
            },
            move || {
                let _ = tx_complete.send(Event::Complete);
            },
        ));
        rx
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::testing::{Event as Recorded, Recorder};

    #[test]
    fn from_iter_then_map_and_filter() {
        let values = Observable::from_iter(1..=6)
            .filter(|v| v % 2 == 0)
            .map(|v| v * 10)
            .wait_all()
            .unwrap();
        assert_eq!(values, vec![20, 40, 60]);
    }

    #[test]
    fn try_map_terminates_on_error() {
        let recorder = Recorder::new();
        Observable::from_iter([1, 2, 3])
            .try_map(|v| {
                if v == 2 {
                    anyhow::bail!("no twos")
                }
                Ok(v)
            })
            .subscribe(recorder.clone());
        assert_eq!(
            recorder.events(),
            vec![Recorded::Next(1), Recorded::Error("no twos".to_string())]
        );
    }

    #[test]
    fn take_stops_the_source() {
        let values = Observable::from_iter(0..100).take(3).wait_all().unwrap();
        assert_eq!(values, vec![0, 1, 2]);
        assert_eq!(
            Observable::<u8>::never().take(0).wait_all().unwrap(),
            vec![]
        );
    }

    #[test]
    fn concat_does_not_subscribe_next_when_cancelled_early() {
        let subscribed = Arc::new(AtomicBool::new(false));
        let subscribed_ = Arc::clone(&subscribed);
        let rest = Observable::create(move |subscriber: Subscriber<i32>| {
            subscribed_.store(true, Ordering::SeqCst);
            subscriber.next(2);
        });

        let first = Observable::just(1)
            .concat(rest.clone())
            .wait_first()
            .unwrap();
        assert_eq!(first, 1);
        assert!(!subscribed.load(Ordering::SeqCst));

        let recorder = Recorder::new();
        Observable::just(1)
            .concat(rest)
            .subscribe(recorder.clone());
        assert!(subscribed.load(Ordering::SeqCst));
        assert_eq!(recorder.values(), vec![1, 2]);
    }

    #[test]
    fn merge_completes_after_all_sources() {
        let recorder = Recorder::new();
        Observable::merge(vec![
            Observable::from_iter([1, 2]),
            Observable::empty(),
            Observable::just(3),
        ])
        .subscribe(recorder.clone());
        assert_eq!(recorder.values(), vec![1, 2, 3]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn unsubscribing_runs_source_teardown() {
        let torn_down = Arc::new(AtomicBool::new(false));
        let torn_down_ = Arc::clone(&torn_down);
        let source = Observable::create(move |subscriber: Subscriber<i32>| {
            let torn_down = Arc::clone(&torn_down_);
            subscriber.add_teardown(move || torn_down.store(true, Ordering::SeqCst));
        });

        let subscription = source.map(|v| v + 1).filter(|_| true).for_each(|_| ());
        assert!(!torn_down.load(Ordering::SeqCst));
        subscription.unsubscribe();
        assert!(torn_down.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_first_of_empty_fails() {
        assert!(Observable::<i32>::empty().wait_first().is_err());
        assert!(
            Observable::<i32>::throw(StreamError::msg("boom"))
                .wait_last()
                .is_err()
        );
    }
}
