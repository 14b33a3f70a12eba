//! Shared error types used across the compilation pipeline.
//!
//! Handlers raise a [`CodegenError`]; every dispatch boundary it crosses on the
//! way out appends a call site, so the error that reaches the front end is a
//! [`HookError`] carrying a backtrace through the rules being generated.

use snafu::Snafu;
use std::fmt;
use std::path::PathBuf;

use crate::ty::ValueKind;

pub type CodegenResult<T> = Result<T, HookError>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CodegenError {
  #[snafu(display("unable to locate hook for: {name}"))]
  HookNotFound { name: String },

  #[snafu(display("rule \"{rule}\" cannot be generated from a terminal node"))]
  TerminalNode { rule: String },

  #[snafu(display("variable \"{name}\" is used before it was ever assigned"))]
  UndefinedVariable { name: String },

  #[snafu(display("GTFO outside of any loop"))]
  BreakOutsideLoop,

  #[snafu(display("malformed expression: {reason}"))]
  MalformedExpression { reason: String },

  #[snafu(display("grammar does not define rule \"{name}\""))]
  RuleNotFound { name: String },

  #[snafu(display("rule tag {tag} is outside the registry ({count} rules)"))]
  UnknownRuleTag { tag: u32, count: usize },

  #[snafu(display(
    "variable \"{name}\" has {declared} dimension(s) but is used with {used} subscript(s)"
  ))]
  DimensionMismatch {
    name: String,
    declared: usize,
    used: usize,
  },

  #[snafu(display(
    "array \"{name}\" holds {existing:?} elements and cannot also store {stored:?}"
  ))]
  MixedElementKinds {
    name: String,
    existing: ValueKind,
    stored: ValueKind,
  },
}

/// One frame of the generation backtrace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
  pub rule: String,
  pub line: u32,
}

/// A [`CodegenError`] annotated with every rule it propagated through,
/// innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookError {
  pub error: CodegenError,
  pub calls: Vec<CallSite>,
}

impl HookError {
  /// Record that the error passed through `rule` at source line `line`.
  pub fn called_by(mut self, rule: impl Into<String>, line: u32) -> Self {
    self.calls.push(CallSite {
      rule: rule.into(),
      line,
    });
    self
  }

  /// Numbered call stack, one frame per line.
  pub fn backtrace(&self) -> String {
    let width = self.calls.len().to_string().len();
    let mut out = String::new();
    for (i, call) in self.calls.iter().enumerate() {
      out.push_str(&format!(
        " {:>width$}: {}/{}\n",
        i + 1,
        call.rule,
        call.line
      ));
    }
    out
  }
}

impl fmt::Display for HookError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.error)
  }
}

impl std::error::Error for HookError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    Some(&self.error)
  }
}

impl From<CodegenError> for HookError {
  fn from(error: CodegenError) -> Self {
    Self {
      error,
      calls: Vec::new(),
    }
  }
}

/// Failures of the array runtime's Rust-native API.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RuntimeError {
  #[snafu(display("NULL variable"))]
  MissingVariable,

  #[snafu(display("dimension {index} is out of range for a {count}-dimensional variable"))]
  DimensionOutOfRange { index: i64, count: i64 },

  #[snafu(display("dimension length {length} is negative"))]
  NegativeLength { length: i64 },

  #[snafu(display("could not allocate memory: {bytes} bytes"))]
  AllocationFailure { bytes: usize },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Failures loading an AST document.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SourceError {
  #[snafu(display("could not read {}: {source}", path.display()))]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },

  #[snafu(display("invalid AST document: {source}"))]
  Json { source: serde_json::Error },

  #[snafu(display("node on line {line} has rule tag {tag}, which the rule list does not define"))]
  UnknownTag { tag: u32, line: u32 },

  #[snafu(display("node on line {line} has both children and a value"))]
  MixedNode { line: u32 },
}
