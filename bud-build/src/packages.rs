//! Resolving package references into assemblies, cached in the build directory.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bud_core::{BuildContext, BuildResult, Conf, Key};
use bud_ore::hash::Xxh3Hasher;

use crate::keys::BUILD_DIR;

/// Name of the cache file, inside the build directory, of resolved assemblies.
pub const RESOLVED_ASSEMBLIES_FILE: &str = "resolved_assemblies";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageReference {
    pub id: String,
    pub version: String,
}

impl PackageReference {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        PackageReference {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// Downloads packages into `cache_dir` and finds the assemblies they provide.
pub trait AssemblyResolver: Send + Sync + 'static {
    fn resolve(
        &self,
        references: &[PackageReference],
        cache_dir: &Path,
    ) -> anyhow::Result<Vec<PathBuf>>;
}

pub type AssemblyResolverRef = Arc<dyn AssemblyResolver>;

pub static PACKAGE_REFERENCES: Key<Vec<PackageReference>> = Key::from_static("PackageReferences");
pub static ASSEMBLY_RESOLVER: Key<AssemblyResolverRef> = Key::from_static("AssemblyResolver");
/// Assemblies of every [`PACKAGE_REFERENCES`], only resolved again when those change.
pub static RESOLVED_ASSEMBLIES: Key<Vec<PathBuf>> = Key::from_static("ResolvedAssemblies");

/// Package references for a [`crate::project`]; the [`ASSEMBLY_RESOLVER`] has to be set
/// separately.
pub fn package_references_support() -> Conf {
    Conf::new()
        .init_value(&PACKAGE_REFERENCES, Vec::new())
        .init(&RESOLVED_ASSEMBLIES, resolve_assemblies)
}

fn resolve_assemblies(ctx: &BuildContext) -> BuildResult<Vec<PathBuf>> {
    let references = ctx.get(&PACKAGE_REFERENCES)?;
    let build_dir = ctx.get(&BUILD_DIR)?;
    let cache_file = build_dir.join(RESOLVED_ASSEMBLIES_FILE);

    let lines = lines_or_cache(&cache_file, &hash_references(&references), || {
        if references.is_empty() {
            return Ok(Vec::new());
        }
        let cache_dir = build_dir.join("cache");
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("failed to create '{}'", cache_dir.display()))?;
        let resolver = ctx.get(&ASSEMBLY_RESOLVER)?;
        let assemblies = resolver.resolve(&references, &cache_dir).with_context(|| {
            let references: Vec<_> = references.iter().map(ToString::to_string).collect();
            format!("could not resolve packages: {}", references.join(", "))
        })?;
        Ok(assemblies
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect())
    })?;
    Ok(lines.into_iter().map(PathBuf::from).collect())
}

/// Digest of a set of references, independent of their order.
pub fn hash_references(references: &[PackageReference]) -> String {
    let mut sorted: Vec<_> = references.iter().collect();
    sorted.sort();
    let mut hasher = Xxh3Hasher::new();
    for reference in sorted {
        hasher.update_str(&reference.id);
        hasher.update_str(&reference.version);
    }
    hasher.hex_digest()
}

/// Lines cached in `file` if its first line is `hash`, otherwise the lines from `fallback`,
/// which get cached under `hash`.
pub fn lines_or_cache(
    file: &Path,
    hash: &str,
    fallback: impl FnOnce() -> anyhow::Result<Vec<String>>,
) -> anyhow::Result<Vec<String>> {
    match fs::read_to_string(file) {
        Ok(contents) => {
            let mut lines = contents.lines();
            if lines.next() == Some(hash) {
                tracing::debug!(?file, "cache hit");
                return Ok(lines.map(str::to_string).collect());
            }
            tracing::debug!(?file, "cache is stale");
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", file.display()));
        }
    }

    let lines = fallback()?;
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create '{}'", parent.display()))?;
    }
    let mut contents = hash.to_string();
    for line in &lines {
        contents.push('\n');
        contents.push_str(line);
    }
    fs::write(file, contents).with_context(|| format!("failed to write '{}'", file.display()))?;
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::project;

    struct CountingResolver {
        calls: AtomicUsize,
        assemblies: Vec<PathBuf>,
    }

    impl AssemblyResolver for CountingResolver {
        fn resolve(
            &self,
            _: &[PackageReference],
            cache_dir: &Path,
        ) -> anyhow::Result<Vec<PathBuf>> {
            assert!(cache_dir.is_dir());
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.assemblies.clone())
        }
    }

    struct FailingResolver;

    impl AssemblyResolver for FailingResolver {
        fn resolve(&self, _: &[PackageReference], _: &Path) -> anyhow::Result<Vec<PathBuf>> {
            anyhow::bail!("no network")
        }
    }

    fn resolved(
        dir: &Path,
        references: Vec<PackageReference>,
        resolver: AssemblyResolverRef,
    ) -> BuildResult<Vec<PathBuf>> {
        project(dir, "A")
            .add(&package_references_support())
            .set_value(&PACKAGE_REFERENCES, references)
            .set_value(&ASSEMBLY_RESOLVER, resolver)
            .get(&Key::new("A/ResolvedAssemblies"))
    }

    #[test]
    fn resolves_once_per_set_of_references() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            assemblies: vec![PathBuf::from("Foo.dll"), PathBuf::from("Bar.dll")],
        });
        let references = vec![
            PackageReference::new("Foo", "1.0.1"),
            PackageReference::new("Bar", "2.0.0"),
        ];

        let first = resolved(dir.path(), references.clone(), resolver.clone()).unwrap();
        assert_eq!(
            first,
            vec![PathBuf::from("Foo.dll"), PathBuf::from("Bar.dll")]
        );

        let mut reordered = references.clone();
        reordered.reverse();
        let second = resolved(dir.path(), reordered, resolver.clone()).unwrap();
        assert_eq!(second, first);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        let cache_file = dir.path().join("build").join(RESOLVED_ASSEMBLIES_FILE);
        let cached = fs::read_to_string(cache_file).unwrap();
        let lines: Vec<_> = cached.lines().collect();
        assert_eq!(
            lines,
            vec![hash_references(&references).as_str(), "Foo.dll", "Bar.dll"]
        );

        let changed = vec![PackageReference::new("Foo", "1.0.2")];
        resolved(dir.path(), changed, resolver.clone()).unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reads_assemblies_from_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let references = vec![PackageReference::new("Foo", "1.0.1")];
        let cache_file = dir.path().join("build").join(RESOLVED_ASSEMBLIES_FILE);
        fs::create_dir_all(cache_file.parent().unwrap()).unwrap();
        let contents = format!("{}\nMoo.dll\nZoo.dll", hash_references(&references));
        fs::write(&cache_file, contents).unwrap();

        let assemblies = resolved(dir.path(), references, Arc::new(FailingResolver)).unwrap();
        assert_eq!(
            assemblies,
            vec![PathBuf::from("Moo.dll"), PathBuf::from("Zoo.dll")]
        );
    }

    #[test]
    fn no_references_need_no_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let assemblies = resolved(dir.path(), Vec::new(), Arc::new(FailingResolver)).unwrap();
        assert!(assemblies.is_empty());
    }

    #[test]
    fn resolver_failures_name_the_packages() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolved(
            dir.path(),
            vec![PackageReference::new("Foo", "1.0.1")],
            Arc::new(FailingResolver),
        )
        .unwrap_err();
        let message = format!("{:#}", anyhow::Error::new(err));
        assert!(message.contains("Foo@1.0.1"), "{message}");
        assert!(message.contains("no network"), "{message}");
        let cache_file = dir.path().join("build").join(RESOLVED_ASSEMBLIES_FILE);
        assert!(!cache_file.exists());
    }
}
