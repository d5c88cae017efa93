//! File based rules, in the spirit of `make`.
//!
//! A [`Rule`] produces one output file from some input files. [`execute`] runs the recipe of
//! a rule only if its output is missing or older than one of its inputs, after bringing every
//! input that is itself the output of a rule up to date.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bud_types::modified_time;

/// Writes `output` out of `inputs`, both absolute.
pub type Recipe = Arc<dyn Fn(&[PathBuf], &Path) -> anyhow::Result<()> + Send + Sync>;

/// How to make `output` out of `inputs`, paths are relative to the directory passed to
/// [`execute`].
#[derive(Clone)]
pub struct Rule {
    pub output: PathBuf,
    pub inputs: Vec<PathBuf>,
    pub recipe: Recipe,
}

impl Rule {
    pub fn new<P: Into<PathBuf>>(
        output: impl Into<PathBuf>,
        recipe: impl Fn(&[PathBuf], &Path) -> anyhow::Result<()> + Send + Sync + 'static,
        inputs: impl IntoIterator<Item = P>,
    ) -> Self {
        Rule {
            output: output.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            recipe: Arc::new(recipe),
        }
    }

    /// A rule with a single input.
    pub fn single(
        output: impl Into<PathBuf>,
        recipe: impl Fn(&Path, &Path) -> anyhow::Result<()> + Send + Sync + 'static,
        input: impl Into<PathBuf>,
    ) -> Self {
        let input: PathBuf = input.into();
        Rule::new(
            output,
            move |inputs, output| recipe(inputs[0].as_path(), output),
            [input],
        )
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("output", &self.output)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MakeError {
    #[error("no rule to make '{}'", .0.display())]
    MissingRule(PathBuf),
    #[error("more than one rule makes '{}'", .0.display())]
    DuplicateRule(PathBuf),
    #[error("'{}' depends on itself", .0.display())]
    Cycle(PathBuf),
    #[error("failed to make '{}'", .output.display())]
    Recipe {
        output: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Bring every one of `targets` up to date in `dir`.
///
/// Every target needs a rule, which is checked before any recipe runs.
pub fn execute<P: AsRef<Path>>(
    targets: impl IntoIterator<Item = P>,
    dir: &Path,
    rules: &[Rule],
) -> Result<(), MakeError> {
    let mut by_output = HashMap::with_capacity(rules.len());
    for rule in rules {
        if by_output.insert(rule.output.as_path(), rule).is_some() {
            return Err(MakeError::DuplicateRule(rule.output.clone()));
        }
    }

    let targets: Vec<PathBuf> = targets
        .into_iter()
        .map(|t| t.as_ref().to_path_buf())
        .collect();
    if let Some(missing) = targets.iter().find(|t| !by_output.contains_key(t.as_path())) {
        return Err(MakeError::MissingRule(missing.clone()));
    }

    let mut make = Make {
        dir,
        rules: by_output,
        done: HashSet::new(),
        in_progress: Vec::new(),
    };
    for target in &targets {
        make.update(target)?;
    }
    Ok(())
}

struct Make<'a> {
    dir: &'a Path,
    rules: HashMap<&'a Path, &'a Rule>,
    done: HashSet<PathBuf>,
    in_progress: Vec<PathBuf>,
}

impl Make<'_> {
    fn update(&mut self, output: &Path) -> Result<(), MakeError> {
        if self.done.contains(output) {
            return Ok(());
        }
        if self.in_progress.iter().any(|p| p == output) {
            return Err(MakeError::Cycle(output.to_path_buf()));
        }
        let rule = *self
            .rules
            .get(output)
            .ok_or_else(|| MakeError::MissingRule(output.to_path_buf()))?;

        self.in_progress.push(output.to_path_buf());
        for input in &rule.inputs {
            if self.rules.contains_key(input.as_path()) {
                self.update(input)?;
            } else if !self.dir.join(input).exists() {
                return Err(MakeError::MissingRule(input.clone()));
            }
        }
        self.in_progress.pop();

        let output_path = self.dir.join(output);
        let inputs: Vec<PathBuf> = rule.inputs.iter().map(|i| self.dir.join(i)).collect();
        if is_stale(&output_path, &inputs) {
            tracing::debug!(output = ?output_path, "running recipe");
            (rule.recipe)(&inputs, &output_path).map_err(|source| MakeError::Recipe {
                output: output.to_path_buf(),
                source,
            })?;
        } else {
            tracing::trace!(output = ?output_path, "up to date");
        }
        self.done.insert(output.to_path_buf());
        Ok(())
    }
}

fn is_stale(output: &Path, inputs: &[PathBuf]) -> bool {
    let Some(output_time) = modified_time(output) else {
        return true;
    };
    inputs
        .iter()
        .any(|input| modified_time(input).is_some_and(|time| time > output_time))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn remove_spaces(input: &Path, output: &Path) -> anyhow::Result<()> {
        fs::write(output, fs::read_to_string(input)?.replace(' ', ""))?;
        Ok(())
    }

    fn uppercase(input: &Path, output: &Path) -> anyhow::Result<()> {
        fs::write(output, fs::read_to_string(input)?.to_uppercase())?;
        Ok(())
    }

    fn join_with_and(inputs: &[PathBuf], output: &Path) -> anyhow::Result<()> {
        let contents = inputs
            .iter()
            .map(fs::read_to_string)
            .collect::<Result<Vec<_>, _>>()?;
        fs::write(output, contents.join(" and "))?;
        Ok(())
    }

    fn counting(runs: &Arc<AtomicUsize>) -> impl Fn(&Path, &Path) -> anyhow::Result<()> + use<> {
        let runs = Arc::clone(runs);
        move |_: &Path, _: &Path| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn runs_the_recipe_when_the_output_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("foo.in");
        fs::write(&input, "This is Sparta!").unwrap();

        let rules = [Rule::single("foo.out", remove_spaces, "foo.in")];
        execute(["foo.out"], dir.path(), &rules).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("foo.out")).unwrap(),
            "ThisisSparta!"
        );
    }

    #[test]
    fn skips_the_recipe_when_the_output_is_newer() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("foo.in");
        let output = dir.path().join("foo.out");
        fs::write(&input, "").unwrap();
        fs::write(&output, "").unwrap();
        let older = modified_time(&output).unwrap() - Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&input)
            .unwrap()
            .set_modified(older)
            .unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let rules = [Rule::single("foo.out", counting(&runs), "foo.in")];
        execute(["foo.out"], dir.path(), &rules).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runs_the_recipe_when_an_input_is_newer() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("foo.in");
        let output = dir.path().join("foo.out");
        fs::write(&input, "a b").unwrap();
        fs::write(&output, "stale").unwrap();
        let older = modified_time(&input).unwrap() - Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&output)
            .unwrap()
            .set_modified(older)
            .unwrap();

        let rules = [Rule::single("foo.out", remove_spaces, "foo.in")];
        execute(["foo.out"], dir.path(), &rules).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "ab");
    }

    #[test]
    fn targets_without_rules_fail() {
        let err = execute(["invalid.out"], Path::new("/foo/bar"), &[]).unwrap_err();
        assert!(matches!(err, MakeError::MissingRule(_)));
        assert!(err.to_string().contains("'invalid.out'"));
    }

    #[test]
    fn missing_rules_are_found_before_any_recipe_runs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("foo.in"), "").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let rules = [Rule::single("foo.out", counting(&runs), "foo.in")];

        let err = execute(["foo.out", "bar.out"], dir.path(), &rules).unwrap_err();
        assert!(err.to_string().contains("'bar.out'"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runs_dependent_recipes_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("foo"), "foo bar").unwrap();

        let rules = [
            Rule::single("foo.upper", uppercase, "foo"),
            Rule::single("foo.nospace", remove_spaces, "foo"),
            Rule::new("foo.joined", join_with_and, ["foo.upper", "foo.nospace"]),
        ];
        execute(["foo.joined"], dir.path(), &rules).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("foo.joined")).unwrap(),
            "FOO BAR and foobar"
        );
    }

    #[test]
    fn no_targets_run_nothing() {
        let runs = Arc::new(AtomicUsize::new(0));
        let rules = [Rule::single("foo.out", counting(&runs), "foo.in")];
        execute(Vec::<&str>::new(), Path::new("/foo/bar"), &rules).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cycles_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let rules = [
            Rule::single("a", counting(&runs), "b"),
            Rule::single("b", counting(&runs), "a"),
        ];
        let err = execute(["a"], dir.path(), &rules).unwrap_err();
        let MakeError::Cycle(path) = &err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(path, Path::new("a"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
