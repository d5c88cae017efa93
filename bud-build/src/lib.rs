//! Projects built out of watched sources.
//!
//! [`project`] defines, in its own scope, a reactive pipeline: sources are watched, calmed,
//! run through processors, and combined with the outputs of dependencies into an input. The
//! input becomes the project's build, and that its output, unless something like
//! [`compile_support`] says otherwise.
//!
//! ```text
//!  Sources --watch/calm--> ProcessedSources --+
//!                                             +--> Input --> Build --> Output
//!  Dependencies/Output ---> DependenciesInput +
//! ```

mod compile;
mod inout;
pub mod keys;
pub mod make;
mod packages;
mod processor;
mod project;
mod publish;

pub use compile::{
    ASSEMBLY_REFERENCES, COMPILE, COMPILER, CompileFailed, CompileInput, CompileOutput, Compiler,
    CompilerRef, OUTPUT_PATH, compile_support,
};
pub use inout::InOut;
pub use packages::{
    ASSEMBLY_RESOLVER, AssemblyResolver, AssemblyResolverRef, PACKAGE_REFERENCES,
    PackageReference, RESOLVED_ASSEMBLIES, RESOLVED_ASSEMBLIES_FILE, hash_references,
    lines_or_cache, package_references_support,
};
pub use processor::{SourceFilter, SourceProcessor, SourceProcessorRef};
pub use project::{ProjectConf, combine, project, projects};
pub use publish::{
    PACKAGE, PACKAGE_BASE_DIR, PACKAGE_METADATA, PACKAGE_OUTPUT_DIR, PACKAGER, PUBLISH,
    PUBLISH_API_KEY, PUBLISH_URL, PUBLISHER, PackageMetadata, Packager, PackagerRef, Publisher,
    PublisherRef, publishing_support, publishing_tasks,
};
