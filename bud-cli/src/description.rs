//! The `Bud.toml` build description.
//!
//! ```toml
//! [projects.A]
//! sources = ["src"]
//! filter = "*.cs"
//!
//! [projects.B]
//! dir = "tests"
//! sources = ["."]
//! exclude = ["fixtures"]
//! dependencies = ["A"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bud_build::keys::WATCHED_FILES_CALMING_PERIOD;
use bud_build::{ProjectConf, project, projects, publishing_support, publishing_tasks};
use bud_core::{Conf, Tasks};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildDescription {
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectDescription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectDescription {
    /// Directory of the project, relative to the build description. Defaults to the id.
    pub dir: Option<PathBuf>,
    /// Subdirectories whose files matching `filter` are sources, `"."` for the project
    /// directory itself.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Glob that files under `sources` have to match.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Individual source files, relative to the project directory.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Subdirectories that never contain sources.
    #[serde(default)]
    pub exclude: Vec<PathBuf>,
    /// Ids of other projects in the same description.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_filter() -> String {
    "*".to_string()
}

impl BuildDescription {
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        BuildDescription::from_toml(&contents)
            .with_context(|| format!("invalid build description '{}'", path.display()))
    }

    /// Every project, with directories relative to `root`.
    pub fn to_conf(&self, root: &Path, calming_period: Duration) -> anyhow::Result<Conf> {
        let confs = self
            .projects
            .iter()
            .map(|(id, description)| {
                self.project_conf(root, id, description)
                    .map(|conf| conf.set_value(&WATCHED_FILES_CALMING_PERIOD, calming_period))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(projects(&confs))
    }

    /// The `package` and `publish` tasks of every project.
    pub fn tasks(&self) -> anyhow::Result<Tasks> {
        self.projects.keys().try_fold(Tasks::new(), |tasks, id| {
            Ok(tasks.extend(&publishing_tasks(id)?))
        })
    }

    fn project_conf(
        &self,
        root: &Path,
        id: &str,
        description: &ProjectDescription,
    ) -> anyhow::Result<Conf> {
        if id.is_empty() || id == "." || id == ".." || id.contains('/') {
            anyhow::bail!("invalid project id '{id}'");
        }
        if let Some(unknown) = description
            .dependencies
            .iter()
            .find(|dependency| !self.projects.contains_key(dependency.as_str()))
        {
            anyhow::bail!("project '{id}' depends on '{unknown}', which is not defined");
        }

        let dir = root.join(description.dir.as_deref().unwrap_or(Path::new(id)));
        let mut conf = project(dir, id).add(&publishing_support());
        for source in &description.sources {
            let subdir = (source != ".").then_some(source.as_str());
            conf = conf.add_sources(subdir, &description.filter, true);
        }
        if !description.files.is_empty() {
            conf = conf.add_source_files(description.files.clone());
        }
        if !description.exclude.is_empty() {
            conf = conf.exclude_source_dirs(description.exclude.clone());
        }
        Ok(conf.add_dependencies(
            description
                .dependencies
                .iter()
                .map(|dependency| format!("/{dependency}")),
        ))
    }
}
