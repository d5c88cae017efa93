//! Compiling a project's input into a single output file.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bud_core::{BuildContext, BuildResult, Conf, Key};
use bud_reactive::Observable;
use bud_types::Timestamped;

use crate::keys::{BUILD, BUILD_DIR, BUILD_PIPELINE_SCHEDULER, DEPENDENCIES_INPUT};
use crate::keys::{PROCESSED_SOURCES, PROJECT_ID, WORKER_SCHEDULER};
use crate::packages::RESOLVED_ASSEMBLIES;
use crate::{InOut, combine};

/// Everything a [`Compiler`] gets to work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileInput {
    pub sources: Vec<Timestamped<PathBuf>>,
    pub references: Vec<Timestamped<PathBuf>>,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub diagnostics: Vec<String>,
    pub elapsed: Duration,
    pub output_path: PathBuf,
    pub success: bool,
    pub timestamp: SystemTime,
    /// What dependent projects should reference, if anything.
    pub exported_reference: Option<PathBuf>,
}

/// Turns sources into an output file.
///
/// Implementations should report problems in the sources through
/// [`CompileOutput::diagnostics`], an `Err` means the compiler itself failed.
pub trait Compiler: Send + Sync + 'static {
    fn compile(&self, input: &CompileInput) -> anyhow::Result<CompileOutput>;
}

impl<F> Compiler for F
where
    F: Fn(&CompileInput) -> anyhow::Result<CompileOutput> + Send + Sync + 'static,
{
    fn compile(&self, input: &CompileInput) -> anyhow::Result<CompileOutput> {
        self(input)
    }
}

pub type CompilerRef = Arc<dyn Compiler>;

/// A compilation that produced errors.
#[derive(Debug, Clone)]
pub struct CompileFailed {
    pub output_path: PathBuf,
    pub diagnostics: Vec<String>,
}

impl fmt::Display for CompileFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to compile '{}'", self.output_path.display())?;
        for diagnostic in &self.diagnostics {
            write!(f, "\n  {diagnostic}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileFailed {}

pub static COMPILER: Key<CompilerRef> = Key::from_static("Compiler");
/// Where the compiler writes its output.
pub static OUTPUT_PATH: Key<PathBuf> = Key::from_static("OutputPath");
/// Files the sources get compiled against.
pub static ASSEMBLY_REFERENCES: Key<Observable<InOut>> = Key::from_static("AssemblyReferences");
/// One [`CompileOutput`] per change of the processed sources or [`ASSEMBLY_REFERENCES`].
pub static COMPILE: Key<Observable<CompileOutput>> = Key::from_static("Compile");

/// Compiles the project's sources with [`COMPILER`], making the compiled file its [`BUILD`].
///
/// Meant to be added to a [`crate::project`], the [`COMPILER`] has to be set separately.
pub fn compile_support() -> Conf {
    Conf::new()
        .init(&OUTPUT_PATH, |ctx| {
            let id = ctx.get(&PROJECT_ID)?;
            Ok(ctx.get(&BUILD_DIR)?.join(format!("{id}.out")))
        })
        .init(&ASSEMBLY_REFERENCES, assembly_references)
        .init(&COMPILE, compile)
        .modify(&BUILD, |ctx, _| {
            Ok(ctx.get(&COMPILE)?.try_map(|output| {
                if !output.success {
                    return Err(CompileFailed {
                        output_path: output.output_path,
                        diagnostics: output.diagnostics,
                    }
                    .into());
                }
                Ok(InOut::from_paths([output.output_path]))
            }))
        })
}

/// Outputs of dependencies, followed by resolved package assemblies if there are any.
fn assembly_references(ctx: &BuildContext) -> BuildResult<Observable<InOut>> {
    let dependencies = ctx.get(&DEPENDENCIES_INPUT)?;
    match ctx.try_get(&RESOLVED_ASSEMBLIES)? {
        Some(assemblies) => {
            let assemblies = InOut::from_paths(assemblies);
            Ok(combine(vec![dependencies, Observable::just(assemblies)]))
        }
        None => Ok(dependencies),
    }
}

fn compile(ctx: &BuildContext) -> BuildResult<Observable<CompileOutput>> {
    let compiler = ctx.get(&COMPILER)?;
    let output_path = ctx.get(&OUTPUT_PATH)?;
    let worker = ctx.get(&WORKER_SCHEDULER)?;
    let pipeline = ctx.get(&BUILD_PIPELINE_SCHEDULER)?;

    // Dependencies are references, not sources.
    let sources = ctx.get(&PROCESSED_SOURCES)?;
    let references = ctx.get(&ASSEMBLY_REFERENCES)?;

    Ok(Observable::combine_latest(vec![sources, references])
        .observe_on(worker)
        .try_map(move |parts| {
            let input = CompileInput {
                sources: parts[0].files().to_vec(),
                references: parts[1].files().to_vec(),
                output_path: output_path.clone(),
            };
            let start = Instant::now();
            let output = compiler.compile(&input)?;
            tracing::info!(
                output = ?input.output_path,
                success = output.success,
                elapsed = ?start.elapsed(),
                "compiled"
            );
            Ok(output)
        })
        .observe_on(pipeline))
}
