//! Helpers for testing code built on streams.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::{Item, Observable, Observer, SchedulerRef, StreamError, Subscriber};

/// An event seen by a [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<T> {
    Next(T),
    /// The error's message.
    Error(String),
    Complete,
}

/// An [`Observer`] that records everything it sees.
pub struct Recorder<T> {
    events: Arc<Mutex<Vec<Event<T>>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Recorder {
            events: Arc::clone(&self.events),
        }
    }
}

impl<T: Item> Default for Recorder<T> {
    fn default() -> Self {
        Recorder::new()
    }
}

impl<T: Item> Recorder<T> {
    pub fn new() -> Self {
        Recorder {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<Event<T>> {
        self.events.lock().clone()
    }

    /// Just the values, in the order they arrived.
    pub fn values(&self) -> Vec<T> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Next(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_completed(&self) -> bool {
        self.events
            .lock()
            .iter()
            .any(|event| matches!(event, Event::Complete))
    }

    pub fn error(&self) -> Option<String> {
        self.events.lock().iter().find_map(|event| match event {
            Event::Error(msg) => Some(msg.clone()),
            _ => None,
        })
    }
}

impl<T: Item> Observer<T> for Recorder<T> {
    fn on_next(&self, value: T) {
        self.events.lock().push(Event::Next(value));
    }

    fn on_error(&self, error: StreamError) {
        self.events.lock().push(Event::Error(error.to_string()));
    }

    fn on_complete(&self) {
        self.events.lock().push(Event::Complete);
    }
}

/// A source whose events are pushed by hand to everyone currently subscribed.
pub struct Subject<T> {
    subscribers: Arc<Mutex<Vec<Subscriber<T>>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Subject {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T: Item> Default for Subject<T> {
    fn default() -> Self {
        Subject::new()
    }
}

impl<T: Item> Subject<T> {
    pub fn new() -> Self {
        Subject {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn observable(&self) -> Observable<T> {
        let subscribers = Arc::clone(&self.subscribers);
        Observable::create(move |subscriber| subscribers.lock().push(subscriber))
    }

    fn live(&self) -> Vec<Subscriber<T>> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| !subscriber.is_closed());
        subscribers.clone()
    }

    pub fn next(&self, value: T) {
        for subscriber in self.live() {
            subscriber.next(value.clone());
        }
    }

    pub fn error(&self, error: StreamError) {
        for subscriber in self.live() {
            subscriber.error(error.clone());
        }
    }

    pub fn complete(&self) {
        for subscriber in self.live() {
            subscriber.complete();
        }
    }

    /// Number of subscribers that haven't been closed.
    pub fn subscriber_count(&self) -> usize {
        self.live().len()
    }
}

/// A source that emits each `(at, value)` once `scheduler`'s clock reaches `at`, then
/// completes at `complete_at`.
pub fn timeline<T: Item>(
    scheduler: SchedulerRef,
    events: Vec<(Duration, T)>,
    complete_at: Duration,
) -> Observable<T> {
    let events = Arc::new(events);
    Observable::create(move |subscriber: Subscriber<T>| {
        let now = scheduler.now();
        for (at, value) in events.iter() {
            let subscriber_ = subscriber.clone();
            let value = value.clone();
            let timer = scheduler.schedule_after(
                at.saturating_sub(now),
                Box::new(move || subscriber_.next(value)),
            );
            subscriber.subscription().add(timer);
        }
        let subscriber_ = subscriber.clone();
        let timer = scheduler.schedule_after(
            complete_at.saturating_sub(now),
            Box::new(move || subscriber_.complete()),
        );
        subscriber.subscription().add(timer);
    })
}
