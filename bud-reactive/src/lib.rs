//! A small push-based stream library.
//!
//! Only what the build pipeline needs: [`Observable`]s that are subscribed to with an
//! [`Observer`], cancelled by dropping out through their [`Subscription`], and a handful of
//! operators (merge, concat, calming, combine latest) that run on a [`Scheduler`].
//!
//! Streams are not restartable, every subscription observes events from "now" on.

use std::sync::Arc;

mod calm;
mod combine;
mod observable;
mod observer;
mod scheduler;
mod subscription;
pub mod testing;
mod virtual_time;

pub use observable::Observable;
pub use observer::{FnObserver, Observer, Subscriber};
pub use scheduler::{EventLoopScheduler, Scheduler, SchedulerRef};
pub use subscription::Subscription;
pub use virtual_time::VirtualTimeScheduler;

/// Values that can flow through an [`Observable`].
pub trait Item: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Item for T {}

/// Terminal error of a stream.
///
/// Cheap to clone so one failure can be handed to every subscriber of a combined stream.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{inner:#}")]
pub struct StreamError {
    inner: Arc<anyhow::Error>,
}

impl StreamError {
    pub fn new(err: anyhow::Error) -> Self {
        StreamError {
            inner: Arc::new(err),
        }
    }

    pub fn msg(msg: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        StreamError::new(anyhow::Error::msg(msg))
    }

    /// The underlying error, e.g. to `downcast_ref` it.
    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }
}

impl From<anyhow::Error> for StreamError {
    fn from(err: anyhow::Error) -> Self {
        StreamError::new(err)
    }
}
