//! Projects, their sources, and the reactive pipeline from sources to output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bud_core::{BuildContext, BuildResult, Conf, Key};
use bud_files::{Files, FilesObservatoryRef, LocalFilesObservatory};
use bud_reactive::{EventLoopScheduler, Observable, SchedulerRef};

use crate::keys::*;
use crate::{InOut, SourceFilter, SourceProcessor, SourceProcessorRef};

/// A project with id `id`, living in `dir`.
///
/// Every key of the project is defined in scope `id` with `init`, so anything added before
/// or after can override it. Instructions added to the returned [`Conf`] land in scope `id`.
pub fn project(dir: impl Into<PathBuf>, id: &str) -> Conf {
    Conf::new()
        .in_scope(id)
        .init_value(&PROJECT_DIR, dir.into())
        .init_value(&PROJECT_ID, id.to_string())
        .init(&BUILD_DIR, |ctx| Ok(ctx.get(&PROJECT_DIR)?.join(BUILD_DIR_NAME)))
        .init_value(&VERSION, DEFAULT_VERSION.to_string())
        .init(&CLEAN, clean)
        .init_value(&DEPENDENCIES, Vec::new())
        .init(&DEPENDENCIES_INPUT, dependencies_input)
        .init(&FILES_OBSERVATORY, |_| {
            Ok(Arc::new(LocalFilesObservatory::new()) as FilesObservatoryRef)
        })
        .init(&BUILD_PIPELINE_SCHEDULER, pipeline_scheduler)
        .init(&WORKER_SCHEDULER, |ctx| {
            event_loop(&format!("bud-worker-{}", ctx.get(&PROJECT_ID)?))
        })
        .init_value(&WATCHED_FILES_CALMING_PERIOD, DEFAULT_CALMING_PERIOD)
        .init_value(&SOURCE_INCLUDES, Vec::new())
        .init_value(&SOURCE_EXCLUDE_FILTERS, Vec::new())
        .init(&SOURCES, sources)
        .init_value(&SOURCE_PROCESSORS, Vec::new())
        .init(&PROCESSED_SOURCES, processed_sources)
        .init(&INPUT, input)
        .init(&BUILD, |ctx| ctx.get(&INPUT))
        .init(&OUTPUT, |ctx| ctx.get(&BUILD))
}

/// Every project in `confs`, each keeping its own scope.
pub fn projects<'a>(confs: impl IntoIterator<Item = &'a Conf>) -> Conf {
    Conf::new().add_all(confs)
}

/// Declaring a project's sources, processors, and dependencies.
pub trait ProjectConf {
    /// Files under `subdir` of the project directory (or the project directory itself) that
    /// match `glob`.
    fn add_sources(&self, subdir: Option<&str>, glob: &str, recursive: bool) -> Conf;

    /// A single file, relative to the project directory unless absolute.
    fn add_source_file(&self, path: impl Into<PathBuf>) -> Conf;

    /// Several files, relative to the project directory unless absolute.
    fn add_source_files<P: Into<PathBuf>>(&self, paths: impl IntoIterator<Item = P>) -> Conf;

    /// Leave out every source under any of `subdirs` of the project directory.
    fn exclude_source_dirs<S: Into<PathBuf>>(&self, subdirs: impl IntoIterator<Item = S>)
    -> Conf;

    /// Leave out every source for which `exclude` returns `true`.
    fn add_source_exclude_filter(
        &self,
        exclude: impl Fn(&Path) -> bool + Send + Sync + 'static,
    ) -> Conf;

    fn add_source_processor(&self, processor: impl SourceProcessor) -> Conf;

    /// Depend on the [`OUTPUT`] of every project in `paths`, e.g. `../A`.
    fn add_dependencies<S: Into<String>>(&self, paths: impl IntoIterator<Item = S>) -> Conf;
}

impl ProjectConf for Conf {
    fn add_sources(&self, subdir: Option<&str>, glob: &str, recursive: bool) -> Conf {
        let subdir = subdir.map(PathBuf::from);
        let glob = glob.to_string();
        self.modify(&SOURCE_INCLUDES, move |ctx, mut includes| {
            let project_dir = ctx.get(&PROJECT_DIR)?;
            let dir = match &subdir {
                Some(subdir) => project_dir.join(subdir),
                None => project_dir,
            };
            let files = ctx
                .get(&FILES_OBSERVATORY)?
                .observe_dir(&dir, &glob, recursive)?;
            includes.push(files);
            Ok(includes)
        })
    }

    fn add_source_file(&self, path: impl Into<PathBuf>) -> Conf {
        self.add_source_files([path])
    }

    fn add_source_files<P: Into<PathBuf>>(&self, paths: impl IntoIterator<Item = P>) -> Conf {
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        self.modify(&SOURCE_INCLUDES, move |ctx, mut includes| {
            let project_dir = ctx.get(&PROJECT_DIR)?;
            let absolute: Vec<PathBuf> = paths.iter().map(|path| project_dir.join(path)).collect();
            includes.push(ctx.get(&FILES_OBSERVATORY)?.watch_files(&absolute)?);
            Ok(includes)
        })
    }

    fn exclude_source_dirs<S: Into<PathBuf>>(
        &self,
        subdirs: impl IntoIterator<Item = S>,
    ) -> Conf {
        let subdirs: Vec<PathBuf> = subdirs.into_iter().map(Into::into).collect();
        self.modify(&SOURCE_EXCLUDE_FILTERS, move |ctx, mut filters| {
            let project_dir = ctx.get(&PROJECT_DIR)?;
            let excluded: Vec<PathBuf> = subdirs
                .iter()
                .map(|dir| resolved(&project_dir.join(dir)))
                .collect();
            filters.push(Arc::new(move |path: &Path| {
                excluded.iter().any(|dir| path.starts_with(dir))
            }));
            Ok(filters)
        })
    }

    fn add_source_exclude_filter(
        &self,
        exclude: impl Fn(&Path) -> bool + Send + Sync + 'static,
    ) -> Conf {
        let exclude: SourceFilter = Arc::new(exclude);
        self.add_to(&SOURCE_EXCLUDE_FILTERS, [exclude])
    }

    fn add_source_processor(&self, processor: impl SourceProcessor) -> Conf {
        let processor: SourceProcessorRef = Arc::new(processor);
        self.add_to(&SOURCE_PROCESSORS, [processor])
    }

    fn add_dependencies<S: Into<String>>(&self, paths: impl IntoIterator<Item = S>) -> Conf {
        self.add_to(&DEPENDENCIES, paths.into_iter().map(Into::into))
    }
}

fn event_loop(name: &str) -> BuildResult<SchedulerRef> {
    let scheduler = EventLoopScheduler::new(name)
        .with_context(|| format!("failed to start event loop '{name}'"))?;
    Ok(Arc::new(scheduler))
}

fn pipeline_scheduler(ctx: &BuildContext) -> BuildResult<SchedulerRef> {
    if let Some(shared) = ctx.try_get(&PIPELINE_SCHEDULER)? {
        return Ok(shared);
    }
    event_loop(&format!("bud-pipeline-{}", ctx.get(&PROJECT_ID)?))
}

/// Every include, minus the build directory and anything an exclude filter matches.
fn sources(ctx: &BuildContext) -> BuildResult<Files> {
    let includes = ctx.get(&SOURCE_INCLUDES)?;
    let combined = match includes.split_first() {
        None => Files::empty(),
        Some((first, rest)) => rest
            .iter()
            .fold(first.clone(), |sources, include| sources.expand_with(include)),
    };

    let build_dir = resolved(&ctx.get(&BUILD_DIR)?);
    let filters = ctx.get(&SOURCE_EXCLUDE_FILTERS)?;
    Ok(combined.with_filter(move |path| {
        !path.starts_with(&build_dir) && !filters.iter().any(|exclude| exclude(path.as_path()))
    }))
}

/// `path` the way observatories report it: absolute, with symlinks of its existing ancestors
/// resolved.
fn resolved(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            resolved(parent).join(name)
        }
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

fn processed_sources(ctx: &BuildContext) -> BuildResult<Observable<InOut>> {
    let scheduler = ctx.get(&BUILD_PIPELINE_SCHEDULER)?;
    let calming_period = ctx.get(&WATCHED_FILES_CALMING_PERIOD)?;
    let project = ctx.get(&PROJECT_ID)?;

    let settled = ctx
        .get(&SOURCES)?
        .watch()
        .observe_on(scheduler.clone())
        .calm_after_first(calming_period, scheduler)
        .map(move |files: Files| {
            let files = files.timestamped();
            tracing::debug!(%project, files = files.len(), "sources settled");
            InOut::new(files)
        });

    let processors = ctx.get(&SOURCE_PROCESSORS)?;
    Ok(processors
        .iter()
        .fold(settled, |sources, processor| processor.process(sources)))
}

fn dependencies_input(ctx: &BuildContext) -> BuildResult<Observable<InOut>> {
    let scheduler = ctx.get(&BUILD_PIPELINE_SCHEDULER)?;
    let outputs = ctx
        .get(&DEPENDENCIES)?
        .iter()
        .map(|dependency| {
            let output = ctx.get(&Key::nest(dependency, &OUTPUT))?;
            Ok(output.observe_on(scheduler.clone()))
        })
        .collect::<BuildResult<Vec<_>>>()?;
    Ok(combine(outputs))
}

fn input(ctx: &BuildContext) -> BuildResult<Observable<InOut>> {
    Ok(combine(vec![
        ctx.get(&DEPENDENCIES_INPUT)?,
        ctx.get(&PROCESSED_SOURCES)?,
    ]))
}

/// Latest value of every stream, concatenated in order, whenever any of them changes.
pub fn combine(streams: Vec<Observable<InOut>>) -> Observable<InOut> {
    Observable::combine_latest(streams).map(|parts| InOut::merge(&parts))
}

fn clean(ctx: &BuildContext) -> BuildResult<()> {
    let build_dir = ctx.get(&BUILD_DIR)?;
    match std::fs::remove_dir_all(&build_dir) {
        Ok(()) => tracing::info!(?build_dir, "cleaned"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
        Err(err) => {
            return Err(anyhow::Error::new(err)
                .context(format!("failed to delete '{}'", build_dir.display()))
                .into());
        }
    }
    Ok(())
}
