//! Packaging a project's output and publishing the package, as [`Tasks`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bud_core::{BuildContext, BuildResult, Conf, Key, Tasker, Tasks};
use bud_reactive::{FnObserver, Item, Observable, StreamError};
use bud_types::Timestamped;
use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::keys::{BUILD_DIR, DEPENDENCIES, OUTPUT, PROJECT_DIR, PROJECT_ID, VERSION};
use crate::packages::PackageReference;

/// What a package says about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub id: String,
    pub version: String,
    /// Other projects, at the version they had when this one was packaged.
    pub dependencies: Vec<PackageReference>,
}

/// Bundles files into a package inside `output_dir`, returning the path of the package.
pub trait Packager: Send + Sync + 'static {
    fn package(
        &self,
        metadata: &PackageMetadata,
        files: &[Timestamped<PathBuf>],
        base_dir: &Path,
        output_dir: &Path,
    ) -> anyhow::Result<PathBuf>;
}

/// Uploads a package, returning whether the package was accepted.
pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, package: &Path, url: &str, api_key: Option<&str>) -> anyhow::Result<bool>;
}

pub type PackagerRef = Arc<dyn Packager>;
pub type PublisherRef = Arc<dyn Publisher>;

pub static PACKAGER: Key<PackagerRef> = Key::from_static("Packager");
pub static PUBLISHER: Key<PublisherRef> = Key::from_static("Publisher");
pub static PACKAGE_OUTPUT_DIR: Key<PathBuf> = Key::from_static("PackageOutputDir");
/// Paths inside the package are relative to this directory.
pub static PACKAGE_BASE_DIR: Key<PathBuf> = Key::from_static("PackageBaseDir");
pub static PACKAGE_METADATA: Key<PackageMetadata> = Key::from_static("PackageMetadata");
pub static PUBLISH_URL: Key<String> = Key::from_static("PublishUrl");
pub static PUBLISH_API_KEY: Key<String> = Key::from_static("PublishApiKey");

/// Name of the packaging task of a project, see [`publishing_tasks`].
pub static PACKAGE: Key<PathBuf> = Key::from_static("package");
/// Name of the publishing task of a project, see [`publishing_tasks`].
pub static PUBLISH: Key<bool> = Key::from_static("publish");

/// Defaults for packaging a [`crate::project`].
pub fn publishing_support() -> Conf {
    Conf::new()
        .init(&PACKAGE_OUTPUT_DIR, |ctx| Ok(ctx.get(&BUILD_DIR)?.join("package")))
        .init(&PACKAGE_BASE_DIR, |ctx| ctx.get(&PROJECT_DIR))
        .init(&PACKAGE_METADATA, package_metadata)
}

fn package_metadata(ctx: &BuildContext) -> BuildResult<PackageMetadata> {
    let dependencies = ctx
        .get(&DEPENDENCIES)?
        .iter()
        .map(|dependency| {
            Ok(PackageReference {
                id: ctx.get(&Key::nest(dependency, &PROJECT_ID))?,
                version: ctx.get(&Key::nest(dependency, &VERSION))?,
            })
        })
        .collect::<BuildResult<Vec<_>>>()?;
    Ok(PackageMetadata {
        id: ctx.get(&PROJECT_ID)?,
        version: ctx.get(&VERSION)?,
        dependencies,
    })
}

/// The tasks `{project}/package` and `{project}/publish`, the latter depending on the former.
pub fn publishing_tasks(project: &str) -> BuildResult<Tasks> {
    let package = Key::nest(project, &PACKAGE);
    let publish = Key::nest(project, &PUBLISH);

    let id = project.to_string();
    let tasks = Tasks::new().set(&package, move |tasker: Tasker| {
        let ctx = tasker.conf().in_scope(&id);
        async move {
            let stream = ctx.get(&OUTPUT)?;
            let output = first_value(&stream)
                .await
                .context("project has no output to package")?;
            let packager = ctx.get(&PACKAGER)?;
            let metadata = ctx.get(&PACKAGE_METADATA)?;
            let base_dir = ctx.get(&PACKAGE_BASE_DIR)?;
            let output_dir = ctx.get(&PACKAGE_OUTPUT_DIR)?;
            let path = packager
                .package(&metadata, output.files(), &base_dir, &output_dir)
                .with_context(|| format!("failed to package '{}'", metadata.id))?;
            tracing::info!(package = ?path, files = output.len(), "packaged");
            Ok(path)
        }
    })?;

    let id = project.to_string();
    let package_ = package.clone();
    let tasks = tasks.set(&publish, move |tasker: Tasker| {
        let ctx = tasker.conf().in_scope(&id);
        let package = tasker.get(&package_);
        async move {
            let package = package.await?;
            let url = ctx.get(&PUBLISH_URL)?;
            let api_key = ctx.try_get(&PUBLISH_API_KEY)?;
            let accepted = ctx
                .get(&PUBLISHER)?
                .publish(&package, &url, api_key.as_deref())
                .with_context(|| format!("failed to publish '{}' to {url}", package.display()))?;
            if accepted {
                tracing::info!(?package, %url, "published");
            } else {
                tracing::warn!(?package, %url, "package was rejected");
            }
            Ok(accepted)
        }
    })?;

    Ok(tasks.add_dependencies(publish.path(), [package.path()]))
}

/// The first value of `stream`, without blocking the executor.
async fn first_value<T: Item>(stream: &Observable<T>) -> Result<T, StreamError> {
    let (tx, rx) = oneshot::channel();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let send = move |result: Result<T, StreamError>| {
        if let Some(tx) = tx.lock().take() {
            let _ = tx.send(result);
        }
    };
    let (on_error, on_complete) = (send.clone(), send.clone());

    let subscription = stream.take(1).subscribe(FnObserver::new(
        move |value| send(Ok(value)),
        move |err| on_error(Err(err)),
        move || on_complete(Err(StreamError::msg("stream completed without producing a value"))),
    ));
    let result = rx
        .await
        .unwrap_or_else(|_| Err(StreamError::msg("stream was dropped")));
    subscription.unsubscribe();
    result
}
