//! Keys every project defines, see [`crate::project`] for their defaults.

use std::path::PathBuf;
use std::time::Duration;

use bud_core::Key;
use bud_files::{Files, FilesObservatoryRef};
use bud_reactive::{Observable, SchedulerRef};

use crate::{InOut, SourceFilter, SourceProcessorRef};

/// Name of the directory, inside the project directory, that builds write into.
pub const BUILD_DIR_NAME: &str = "build";
pub const DEFAULT_CALMING_PERIOD: Duration = Duration::from_millis(300);
pub const DEFAULT_VERSION: &str = "0.0.1";

pub static PROJECT_ID: Key<String> = Key::from_static("ProjectId");
pub static PROJECT_DIR: Key<PathBuf> = Key::from_static("ProjectDir");
/// Where outputs and generated files go, deleted by [`CLEAN`].
pub static BUILD_DIR: Key<PathBuf> = Key::from_static("BuildDir");
pub static VERSION: Key<String> = Key::from_static("Version");
/// Deletes [`BUILD_DIR`].
pub static CLEAN: Key<()> = Key::from_static("Clean");

/// Paths to other projects, relative to this one (e.g. `../A`) or absolute (e.g. `/A`).
pub static DEPENDENCIES: Key<Vec<String>> = Key::from_static("Dependencies");
/// Latest [`OUTPUT`] of every dependency, concatenated in declaration order.
pub static DEPENDENCIES_INPUT: Key<Observable<InOut>> = Key::from_static("DependenciesInput");

/// Scheduler shared by every project that doesn't set its own [`BUILD_PIPELINE_SCHEDULER`].
pub static PIPELINE_SCHEDULER: Key<SchedulerRef> = Key::from_static("/PipelineScheduler");
/// Scheduler that calming, processing, and merging of this project runs on.
pub static BUILD_PIPELINE_SCHEDULER: Key<SchedulerRef> = Key::from_static("BuildPipelineScheduler");
/// Scheduler that expensive work, like compiling, runs on.
pub static WORKER_SCHEDULER: Key<SchedulerRef> = Key::from_static("WorkerScheduler");

pub static FILES_OBSERVATORY: Key<FilesObservatoryRef> = Key::from_static("FilesObservatory");
/// How long sources have to stay unchanged before they're built again.
pub static WATCHED_FILES_CALMING_PERIOD: Key<Duration> =
    Key::from_static("WatchedFilesCalmingPeriod");

/// Every source descriptor, see [`crate::ProjectConf::add_sources`].
pub static SOURCE_INCLUDES: Key<Vec<Files>> = Key::from_static("SourceIncludes");
pub static SOURCE_EXCLUDE_FILTERS: Key<Vec<SourceFilter>> =
    Key::from_static("SourceExcludeFilters");
/// [`SOURCE_INCLUDES`] combined, without excluded files.
pub static SOURCES: Key<Files> = Key::from_static("Sources");
pub static SOURCE_PROCESSORS: Key<Vec<SourceProcessorRef>> =
    Key::from_static("SourceProcessors");
/// Settled [`SOURCES`] after every [`SOURCE_PROCESSORS`] ran, in order.
pub static PROCESSED_SOURCES: Key<Observable<InOut>> = Key::from_static("ProcessedSources");

/// [`DEPENDENCIES_INPUT`] followed by [`PROCESSED_SOURCES`].
pub static INPUT: Key<Observable<InOut>> = Key::from_static("Input");
/// [`INPUT`] unless overridden.
pub static BUILD: Key<Observable<InOut>> = Key::from_static("Build");
/// [`BUILD`] unless overridden, what dependent projects see.
pub static OUTPUT: Key<Observable<InOut>> = Key::from_static("Output");
