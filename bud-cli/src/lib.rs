//! The `bud` command line tool.
//!
//! Loads a [`BuildDescription`] and evaluates keys of it, e.g. `bud A/Input B/Clean`. Streams
//! print their first observation, or every one of them with `--watch`. Commands that aren't
//! keys run the task of the same name, e.g. `bud A/publish`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bud_build::InOut;
use bud_build::keys::PIPELINE_SCHEDULER;
use bud_core::{AnyValue, Conf, KeyPath, Tasker};
use bud_files::Files;
use bud_reactive::{EventLoopScheduler, Observable, SchedulerRef};

pub mod defs;
mod description;

pub use description::{BuildDescription, ProjectDescription};

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "bud", version, about = "Builds projects out of watched sources.")]
pub struct Cli {
    /// Directory containing the build description.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
    /// Override a config, e.g. `--config calming_period=50ms`.
    #[arg(long = "config", value_name = "NAME=VALUE")]
    pub configs: Vec<String>,
    /// Print every observation of streams instead of only the first.
    #[arg(long)]
    pub watch: bool,
    /// Keys to evaluate, e.g. `A/Input`.
    #[arg(required = true)]
    pub commands: Vec<String>,
}

/// Run `cli`, handing every line of output to `print`.
pub fn run(cli: &Cli, print: impl Fn(String) + Send + Sync + 'static) -> anyhow::Result<()> {
    let configs = defs::all();
    configs.apply_env()?;
    for config in &cli.configs {
        let Some((name, value)) = config.split_once('=') else {
            anyhow::bail!("expected NAME=VALUE, got '{config}'");
        };
        configs.try_update(name.trim(), value.trim())?;
    }
    tracing::debug!(%configs, "configured");

    let path = cli.dir.join(defs::BUILD_FILENAME.read(&configs).as_str());
    let description = BuildDescription::load(&path)?;

    let scheduler = EventLoopScheduler::new("bud-pipeline")
        .context("failed to start the pipeline scheduler")?;
    let scheduler: SchedulerRef = Arc::new(scheduler);
    let conf = description
        .to_conf(&cli.dir, defs::CALMING_PERIOD.read(&configs))?
        .add(&Conf::new().set_value(&PIPELINE_SCHEDULER, scheduler));
    let tasker = Tasker::new(description.tasks()?, conf.to_compiled()?);

    let watch = cli.watch || defs::WATCH.read(&configs);
    execute(&tasker, &cli.commands, watch, print)
}

/// Evaluate every one of `commands`, in order, as a key of the configuration of `tasker` or
/// else as one of its tasks.
///
/// With `watch`, streams are printed until all of them complete, which for streams of
/// watched sources is never.
pub fn execute(
    tasker: &Tasker,
    commands: &[String],
    watch: bool,
    print: impl Fn(String) + Send + Sync + 'static,
) -> anyhow::Result<()> {
    let print = Arc::new(print);
    let mut watched = Vec::new();

    for command in commands {
        let key = KeyPath::new(command);
        let task = KeyPath::new(command.trim_start_matches('/'));
        let (value, type_name) = match tasker.conf().try_get_dyn(&key)? {
            Some(found) => found,
            None => match tasker.tasks().type_name(&task) {
                Some(type_name) => {
                    let value = run_task(tasker, &task)
                        .with_context(|| format!("'{command}' failed"))?;
                    (value, type_name)
                }
                None => anyhow::bail!("'{command}' is not defined"),
            },
        };
        match render(&value) {
            Some(Rendered::Value(text)) => print(text),
            Some(Rendered::Stream(stream)) if watch => {
                let command = command.clone();
                watched.push(stream.map(move |text| format!("{command}:\n{text}")));
            }
            Some(Rendered::Stream(stream)) => {
                let text = stream
                    .wait_first()
                    .with_context(|| format!("'{command}' failed"))?;
                print(text);
            }
            None => print(format!("<{type_name}>")),
        }
    }

    if !watched.is_empty() {
        let print = Arc::clone(&print);
        Observable::merge(watched)
            .map(move |text| print(text))
            .wait_all()
            .context("watch failed")?;
    }
    Ok(())
}

fn run_task(tasker: &Tasker, name: &KeyPath) -> anyhow::Result<AnyValue> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the task runtime")?;
    Ok(runtime.block_on(tasker.get_dyn(name))?)
}

enum Rendered {
    Value(String),
    Stream(Observable<String>),
}

fn render(value: &AnyValue) -> Option<Rendered> {
    let value = value.as_ref();
    if let Some(stream) = value.downcast_ref::<Observable<InOut>>() {
        return Some(Rendered::Stream(stream.map(|files| files.to_string())));
    }

    let text = if let Some(files) = value.downcast_ref::<InOut>() {
        files.to_string()
    } else if let Some(files) = value.downcast_ref::<Files>() {
        join_lines(files.snapshot().iter().map(|path| path.display()))
    } else if let Some(text) = value.downcast_ref::<String>() {
        text.clone()
    } else if let Some(path) = value.downcast_ref::<PathBuf>() {
        path.display().to_string()
    } else if let Some(texts) = value.downcast_ref::<Vec<String>>() {
        texts.join("\n")
    } else if let Some(paths) = value.downcast_ref::<Vec<PathBuf>>() {
        join_lines(paths.iter().map(|path| path.display()))
    } else if let Some(flag) = value.downcast_ref::<bool>() {
        flag.to_string()
    } else if let Some(period) = value.downcast_ref::<std::time::Duration>() {
        format!("{period:?}")
    } else if value.downcast_ref::<()>().is_some() {
        "done".to_string()
    } else {
        return None;
    };
    Some(Rendered::Value(text))
}

fn join_lines(lines: impl Iterator<Item = impl std::fmt::Display>) -> String {
    lines
        .map(|line| line.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests;
