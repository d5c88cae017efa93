use std::path::Path;
use std::sync::Arc;

use bud_reactive::Observable;

use crate::InOut;

/// A stage that settled sources flow through before they become a project's input.
///
/// [`SourceProcessor::process`] is called once when the pipeline is assembled, the stream it
/// returns runs on the project's pipeline scheduler.
pub trait SourceProcessor: Send + Sync + 'static {
    fn process(&self, sources: Observable<InOut>) -> Observable<InOut>;
}

impl<F> SourceProcessor for F
where
    F: Fn(Observable<InOut>) -> Observable<InOut> + Send + Sync + 'static,
{
    fn process(&self, sources: Observable<InOut>) -> Observable<InOut> {
        self(sources)
    }
}

pub type SourceProcessorRef = Arc<dyn SourceProcessor>;

/// Returns `true` for source files that should be left out.
pub type SourceFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;
