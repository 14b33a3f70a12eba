//! Crate root: wires together the compilation pipeline.
//!
//! The stages are small and composable:
//! - `source` loads an already parsed tree and its rule list.
//! - `rules` maps node tags to rule names, and `hooks` maps rule names to the
//!   `codegen` handlers that lower each construct.
//! - `context` holds the state one compilation threads through the handlers.
//! - `runtime` is the array library generated programs link against; its
//!   `layout` module is the record layout both sides agree on.
//! - `error` centralises the error types shared by the other modules.

pub mod ast;
pub mod codegen;
pub mod context;
pub mod error;
pub mod hooks;
pub mod rules;
pub mod runtime;
pub mod source;
pub mod ty;

pub use error::{CodegenError, CodegenResult, HookError, RuntimeError, SourceError};
pub use source::{JsonSource, ParseSource, ParsedProgram};

use codegen::Codegen;
use hooks::HookTable;

/// Output settings for [`generate_assembly`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
  /// When set, every line is annotated with `# <source_name>:<line>`.
  pub source_name: Option<String>,
  /// Column the annotations are aligned to.
  pub comment_column: usize,
}

impl Default for CompileOptions {
  fn default() -> Self {
    Self {
      source_name: None,
      comment_column: 40,
    }
  }
}

/// Compile a parsed program into AT&T assembly.
pub fn generate_assembly(
  program: &mut ParsedProgram,
  options: &CompileOptions,
) -> CodegenResult<String> {
  let hooks = HookTable::standard();
  let mut codegen = Codegen::new(&mut program.ast, &program.rules, &hooks);
  codegen.dispatch(program.root)?;
  let context = codegen.into_context();
  Ok(context.render(options.source_name.as_deref(), options.comment_column))
}
