use std::sync::Arc;

use parking_lot::Mutex;

use crate::observer::FnObserver;
use crate::{Item, Observable, Subscriber};

struct Latest<T> {
    values: Vec<Option<T>>,
    completed: usize,
}

impl<T: Item> Observable<T> {
    /// Joins `sources` in order, emitting the latest value of every source whenever any one
    /// of them produces a new value, once each has produced at least one.
    ///
    /// Completes when every source completed, or as soon as a source completes without ever
    /// producing a value since then nothing can be emitted anymore. Joining no sources emits
    /// a single empty `Vec`.
    pub fn combine_latest(sources: Vec<Observable<T>>) -> Observable<Vec<T>> {
        let sources = Arc::new(sources);
        Observable::create(move |downstream: Subscriber<Vec<T>>| {
            if sources.is_empty() {
                downstream.next(Vec::new());
                downstream.complete();
                return;
            }

            let latest = Arc::new(Mutex::new(Latest {
                values: vec![None; sources.len()],
                completed: 0,
            }));

            for (idx, source) in sources.iter().enumerate() {
                if downstream.is_closed() {
                    return;
                }

                let on_next = {
                    let latest = Arc::clone(&latest);
                    let downstream = downstream.clone();
                    move |value: T| {
                        // Emitting under the lock keeps the last emission the most recent state.
                        let mut latest = latest.lock();
                        latest.values[idx] = Some(value);
                        let combined: Option<Vec<T>> = latest.values.iter().cloned().collect();
                        if let Some(combined) = combined {
                            downstream.next(combined);
                        }
                    }
                };
                let on_error = {
                    let downstream = downstream.clone();
                    move |err| downstream.error(err)
                };
                let on_complete = {
                    let latest = Arc::clone(&latest);
                    let downstream = downstream.clone();
                    let total = sources.len();
                    move || {
                        let done = {
                            let mut latest = latest.lock();
                            latest.completed += 1;
                            latest.completed == total || latest.values[idx].is_none()
                        };
                        if done {
                            downstream.complete();
                        }
                    }
                };

                source.subscribe_with(Subscriber::child_of(
                    &downstream,
                    FnObserver::new(on_next, on_error, on_complete),
                ));
            }
        })
    }
}
