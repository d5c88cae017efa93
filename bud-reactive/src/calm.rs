//! Operators that wait for a noisy stream to settle down.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::observer::FnObserver;
use crate::{Item, Observable, SchedulerRef, Subscriber, Subscription};

/// State of one calming subscription.
struct Calming<T> {
    /// Value waiting for `period` to pass without another one arriving.
    pending: Option<T>,
    timer: Option<Subscription>,
    /// Bumped on every value, a timer only fires for the value it was started for.
    generation: u64,
    /// Let the next value through without waiting.
    pass_next: bool,
}

impl<T> Calming<T> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.unsubscribe();
        }
    }
}

impl<T: Item> Observable<T> {
    /// Emits a value only once `period` passes without another value arriving.
    ///
    /// When the source completes, the value still waiting for calm is emitted first.
    pub fn skip_until_calm(&self, period: Duration, scheduler: SchedulerRef) -> Observable<T> {
        self.calm(period, scheduler, false)
    }

    /// Emits the first value right away, every later value goes through
    /// [`Observable::skip_until_calm`].
    pub fn calm_after_first(&self, period: Duration, scheduler: SchedulerRef) -> Observable<T> {
        self.calm(period, scheduler, true)
    }

    fn calm(&self, period: Duration, scheduler: SchedulerRef, pass_first: bool) -> Observable<T> {
        let source = self.clone();
        Observable::create(move |downstream: Subscriber<T>| {
            let calming = Arc::new(Mutex::new(Calming {
                pending: None,
                timer: None,
                generation: 0,
                pass_next: pass_first,
            }));

            let on_next = {
                let calming = Arc::clone(&calming);
                let downstream = downstream.clone();
                let scheduler = scheduler.clone();
                move |value: T| {
                    let mut state = calming.lock();
                    state.cancel_timer();
                    state.generation += 1;

                    if state.pass_next {
                        state.pass_next = false;
                        state.pending = None;
                        drop(state);
                        downstream.next(value);
                        return;
                    }

                    state.pending = Some(value);
                    let generation = state.generation;
                    let calming_ = Arc::clone(&calming);
                    let downstream = downstream.clone();
                    let timer = scheduler.schedule_after(
                        period,
                        Box::new(move || {
                            let value = {
                                let mut state = calming_.lock();
                                if state.generation != generation {
                                    return;
                                }
                                state.timer = None;
                                state.pending.take()
                            };
                            if let Some(value) = value {
                                tracing::trace!("stream calmed down");
                                downstream.next(value);
                            }
                        }),
                    );
                    state.timer = Some(timer);
                }
            };
            let on_error = {
                let calming = Arc::clone(&calming);
                let downstream = downstream.clone();
                move |err| {
                    {
                        let mut state = calming.lock();
                        state.cancel_timer();
                        state.pending = None;
                    }
                    downstream.error(err);
                }
            };
            let on_complete = {
                let calming = Arc::clone(&calming);
                let downstream = downstream.clone();
                move || {
                    let value = {
                        let mut state = calming.lock();
                        state.cancel_timer();
                        state.pending.take()
                    };
                    if let Some(value) = value {
                        downstream.next(value);
                    }
                    downstream.complete();
                }
            };

            downstream.add_teardown(move || calming.lock().cancel_timer());
            source.subscribe_with(Subscriber::child_of(
                &downstream,
                FnObserver::new(on_next, on_error, on_complete),
            ));
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::VirtualTimeScheduler;
    use crate::testing::{Recorder, timeline};

    fn ticks(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Three bursts of values: `0, 1, 2` at ticks 10, 20, 30, then `10, 11` at ticks 110, 120,
    /// then `20` at tick 210 right before completing.
    fn three_bursts(scheduler: &Arc<VirtualTimeScheduler>) -> Observable<u64> {
        timeline(
            scheduler.clone(),
            vec![
                (ticks(10), 0),
                (ticks(20), 1),
                (ticks(30), 2),
                (ticks(110), 10),
                (ticks(120), 11),
                (ticks(210), 20),
            ],
            ticks(210),
        )
    }

    #[test]
    fn skip_until_calm_of_empty_is_empty() {
        let scheduler = VirtualTimeScheduler::new();
        let recorder = Recorder::new();
        Observable::<u64>::empty()
            .skip_until_calm(ticks(100), scheduler.clone())
            .subscribe(recorder.clone());
        assert!(recorder.values().is_empty());
        assert!(recorder.is_completed());
    }

    #[test]
    fn skip_until_calm_flushes_last_value_on_completion() {
        let scheduler = VirtualTimeScheduler::new();
        let events = (0..5).map(|i| (ticks(10 * (i + 1)), i)).collect();
        let recorder = Recorder::new();
        timeline(scheduler.clone(), events, ticks(50))
            .skip_until_calm(ticks(100), scheduler.clone())
            .subscribe(recorder.clone());

        scheduler.advance_by(ticks(9001));
        assert_eq!(recorder.values(), vec![4]);
    }

    #[test]
    fn skip_until_calm_skips_bursts() {
        let scheduler = VirtualTimeScheduler::new();
        let recorder = Recorder::new();
        three_bursts(&scheduler)
            .skip_until_calm(ticks(20), scheduler.clone())
            .subscribe(recorder.clone());

        scheduler.advance_by(ticks(9001));
        assert_eq!(recorder.values(), vec![2, 11, 20]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn skip_until_calm_skips_nothing_when_values_are_far_apart() {
        let scheduler = VirtualTimeScheduler::new();
        let events = (0..10).map(|i| (ticks(10 * (i + 1)), i)).collect();
        let recorder = Recorder::new();
        timeline(scheduler.clone(), events, ticks(1000))
            .skip_until_calm(ticks(1), scheduler.clone())
            .take(3)
            .subscribe(recorder.clone());

        scheduler.advance_by(ticks(9001));
        assert_eq!(recorder.values(), vec![0, 1, 2]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn calm_after_first_of_empty_is_empty() {
        let scheduler = VirtualTimeScheduler::new();
        let recorder = Recorder::new();
        Observable::<u64>::empty()
            .calm_after_first(ticks(100), scheduler.clone())
            .subscribe(recorder.clone());

        scheduler.advance_by(ticks(9001));
        assert!(recorder.values().is_empty());
        assert!(recorder.is_completed());
    }

    #[test]
    fn calm_after_first_emits_first_right_away() {
        let scheduler = VirtualTimeScheduler::new();
        let events = (0..5).map(|i| (ticks(10 * (i + 1)), i)).collect();
        let recorder = Recorder::new();
        timeline(scheduler.clone(), events, ticks(50))
            .calm_after_first(ticks(100), scheduler.clone())
            .subscribe(recorder.clone());

        scheduler.advance_by(ticks(15));
        assert_eq!(recorder.values(), vec![0]);
    }

    #[test]
    fn calm_after_first_then_calms_bursts() {
        let scheduler = VirtualTimeScheduler::new();
        let recorder = Recorder::new();
        three_bursts(&scheduler)
            .calm_after_first(ticks(20), scheduler.clone())
            .subscribe(recorder.clone());

        scheduler.advance_by(ticks(9001));
        assert_eq!(recorder.values(), vec![0, 2, 11, 20]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn unsubscribing_cancels_the_timer() {
        let scheduler = VirtualTimeScheduler::new();
        let recorder = Recorder::new();
        let subscription = timeline(scheduler.clone(), vec![(ticks(1), 1)], ticks(1000))
            .skip_until_calm(ticks(20), scheduler.clone())
            .subscribe(recorder.clone());

        scheduler.advance_by(ticks(5));
        subscription.unsubscribe();
        scheduler.advance_by(ticks(100));
        assert!(recorder.values().is_empty());
    }
}
