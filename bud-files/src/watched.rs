use std::fmt;
use std::sync::Arc;

use bud_reactive::{Item, Observable};
use parking_lot::Mutex;

type SnapshotFn<T> = dyn Fn() -> Vec<T> + Send + Sync;

/// A collection of resources that can also tell when it changes.
///
/// Reading the [`WatchedResource::snapshot`] never watches anything. [`WatchedResource::watch`]
/// produces this resource once right away, and again every time something changes, so
/// consumers always re-read the latest snapshot instead of getting deltas.
pub struct WatchedResource<T> {
    snapshot: Arc<SnapshotFn<T>>,
    changes: Observable<T>,
}

impl<T> Clone for WatchedResource<T> {
    fn clone(&self) -> Self {
        WatchedResource {
            snapshot: Arc::clone(&self.snapshot),
            changes: self.changes.clone(),
        }
    }
}

impl<T: Item> WatchedResource<T> {
    /// A resource whose contents are produced by `snapshot` every time they're read, and whose
    /// changes are announced by `changes`.
    pub fn new(
        snapshot: impl Fn() -> Vec<T> + Send + Sync + 'static,
        changes: Observable<T>,
    ) -> Self {
        WatchedResource {
            snapshot: Arc::new(snapshot),
            changes,
        }
    }

    /// A resource with fixed contents.
    pub fn from_values(values: Vec<T>, changes: Observable<T>) -> Self {
        WatchedResource::new(move || values.clone(), changes)
    }

    /// A resource that is empty and never changes.
    pub fn empty() -> Self {
        WatchedResource::new(Vec::new, Observable::empty())
    }

    /// A single resource that holds the latest value produced by `source`.
    ///
    /// It's empty until watched, since watching is what subscribes to `source`.
    pub fn latest_of(source: Observable<T>) -> Self {
        let latest: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let read = Arc::clone(&latest);
        let changes = source.map(move |value: T| {
            *latest.lock() = Some(value.clone());
            value
        });
        let snapshot = move || read.lock().iter().cloned().collect::<Vec<_>>();
        WatchedResource::new(snapshot, changes)
    }

    /// The current contents of this resource.
    pub fn snapshot(&self) -> Vec<T> {
        (self.snapshot)()
    }

    /// Notifications of what changed.
    pub fn changes(&self) -> &Observable<T> {
        &self.changes
    }

    /// Contents of both resources, changes of either.
    pub fn expand_with(&self, other: &WatchedResource<T>) -> WatchedResource<T> {
        let (this, other_snapshot) = (Arc::clone(&self.snapshot), Arc::clone(&other.snapshot));
        WatchedResource::new(
            move || {
                let mut all = this();
                all.extend(other_snapshot());
                all
            },
            self.changes.merge_with(other.changes.clone()),
        )
    }

    /// Only the resources, and changes to resources, matching `predicate`.
    pub fn with_filter(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> WatchedResource<T> {
        let predicate = Arc::new(predicate);
        let snapshot = Arc::clone(&self.snapshot);
        let snapshot_predicate = Arc::clone(&predicate);
        WatchedResource::new(
            move || {
                let mut values = snapshot();
                values.retain(|value| snapshot_predicate(value));
                values
            },
            self.changes.filter(move |value| predicate(value)),
        )
    }

    /// Produces this resource right away, then once per change.
    ///
    /// The change stream is only subscribed to once something asks for more than the first
    /// observation.
    pub fn watch(&self) -> Observable<WatchedResource<T>> {
        let this = self.clone();
        Observable::just(self.clone()).concat(self.changes.map(move |_| this.clone()))
    }

    /// True if both handles refer to the same resource.
    pub fn ptr_eq(&self, other: &WatchedResource<T>) -> bool {
        Arc::ptr_eq(&self.snapshot, &other.snapshot)
    }
}

impl<T> fmt::Debug for WatchedResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatchedResource<{}>", std::any::type_name::<T>())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use bud_reactive::Subscriber;
    use bud_reactive::testing::Recorder;

    use super::*;

    fn resources(values: &[i32], changes: Observable<i32>) -> WatchedResource<i32> {
        WatchedResource::from_values(values.to_vec(), changes)
    }

    #[test]
    fn expand_with_concatenates_snapshots() {
        let expanded = resources(&[42], Observable::empty())
            .expand_with(&resources(&[9001], Observable::empty()));
        assert_eq!(expanded.snapshot(), vec![42, 9001]);
    }

    #[test]
    fn with_filter_filters_the_snapshot() {
        let filtered = resources(&[42], Observable::empty()).with_filter(|v| *v != 42);
        assert!(filtered.snapshot().is_empty());
    }

    #[test]
    fn watching_produces_the_first_observation() {
        let watched = resources(&[42], Observable::empty());
        let observed = watched.watch().wait_all().unwrap();
        assert_eq!(observed.len(), 1);
        assert!(observed[0].ptr_eq(&watched));
    }

    #[test]
    fn does_not_subscribe_to_changes_when_only_the_first_observation_is_needed() {
        let subscribed = Arc::new(AtomicBool::new(false));
        let subscribed_ = Arc::clone(&subscribed);
        let changes = Observable::create(move |_: Subscriber<i32>| {
            subscribed_.store(true, Ordering::SeqCst);
        });

        let first = resources(&[42], changes).watch().wait_first().unwrap();
        assert_eq!(first.snapshot(), vec![42]);
        assert!(!subscribed.load(Ordering::SeqCst));
    }

    #[test]
    fn produces_one_observation_per_change() {
        let watched = resources(&[42], Observable::just(42));
        assert_eq!(watched.watch().wait_all().unwrap().len(), 2);
    }

    #[test]
    fn with_filter_filters_changes() {
        let filtered = resources(&[42], Observable::just(42)).with_filter(|v| *v != 42);
        assert_eq!(filtered.watch().wait_all().unwrap().len(), 1);
    }

    #[test]
    fn expand_with_does_not_duplicate_the_first_observation() {
        let expanded = resources(&[42], Observable::empty())
            .expand_with(&resources(&[9001], Observable::empty()));
        let observed = expanded.watch().wait_all().unwrap();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].snapshot(), vec![42, 9001]);
    }

    #[test]
    fn expand_with_merges_changes() {
        let expanded = resources(&[42], Observable::just(1))
            .expand_with(&resources(&[9001], Observable::just(1)));
        assert_eq!(expanded.watch().wait_all().unwrap().len(), 3);
    }

    #[test]
    fn latest_of_is_empty_until_watched() {
        let latest = WatchedResource::latest_of(Observable::just(42));
        assert!(latest.snapshot().is_empty());

        latest.watch().wait_last().unwrap();
        assert_eq!(latest.snapshot(), vec![42]);
        assert_eq!(latest.snapshot(), vec![42]);
    }

    #[test]
    fn latest_of_keeps_the_last_value() {
        let latest =
            WatchedResource::latest_of(Observable::just(42).concat(Observable::just(9001)));
        let recorder = Recorder::new();
        latest.watch().subscribe(recorder.clone());
        assert_eq!(latest.snapshot(), vec![9001]);
        assert_eq!(recorder.values().len(), 3);
    }

    #[test]
    fn latest_of_never_does_not_block() {
        let latest = WatchedResource::latest_of(Observable::<i32>::never());
        assert!(latest.snapshot().is_empty());
        assert_eq!(
            latest.watch().wait_first().unwrap().snapshot(),
            Vec::<i32>::new()
        );
    }
}
