//! Rule names and the registry that maps grammar tags onto them.
//!
//! The grammar numbers its rules; the registry is the read-only table that
//! turns a node's tag back into the rule name hooks are keyed on. It is built
//! once per run and handed to the generator explicitly.

use std::fmt;

use crate::error::{CodegenResult, RuleNotFoundSnafu, UnknownRuleTagSnafu};

/// Every rule the code generator knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
  Program,
  Fork,
  Assignment,
  Declaration,
  SelfAssignment,
  Array,
  Word,
  Constant,
  Str,
  Boolean,
  Operator,
  Expr,
  CondExpr,
  Conditional,
  Loop,
  Brk,
  Output,
  Noop,
  Comment,
  Include,
}

impl Rule {
  pub const ALL: [Rule; 20] = [
    Rule::Program,
    Rule::Fork,
    Rule::Assignment,
    Rule::Declaration,
    Rule::SelfAssignment,
    Rule::Array,
    Rule::Word,
    Rule::Constant,
    Rule::Str,
    Rule::Boolean,
    Rule::Operator,
    Rule::Expr,
    Rule::CondExpr,
    Rule::Conditional,
    Rule::Loop,
    Rule::Brk,
    Rule::Output,
    Rule::Noop,
    Rule::Comment,
    Rule::Include,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Rule::Program => "program",
      Rule::Fork => "fork",
      Rule::Assignment => "assignment",
      Rule::Declaration => "declaration",
      Rule::SelfAssignment => "self_assignment",
      Rule::Array => "array",
      Rule::Word => "word",
      Rule::Constant => "constant",
      Rule::Str => "string",
      Rule::Boolean => "boolean",
      Rule::Operator => "operator",
      Rule::Expr => "expr",
      Rule::CondExpr => "condexpr",
      Rule::Conditional => "conditional",
      Rule::Loop => "loop",
      Rule::Brk => "brk",
      Rule::Output => "output",
      Rule::Noop => "noop",
      Rule::Comment => "comment",
      Rule::Include => "include",
    }
  }

  pub fn from_name(name: &str) -> Option<Rule> {
    Rule::ALL.into_iter().find(|rule| rule.name() == name)
  }
}

impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Immutable tag -> rule name table produced alongside the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRegistry {
  names: Vec<String>,
}

impl RuleRegistry {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// Registry whose tags follow the order of [`Rule::ALL`].
  pub fn standard() -> Self {
    Self::new(Rule::ALL.iter().map(|rule| rule.name()))
  }

  pub fn name_of(&self, tag: u32) -> CodegenResult<&str> {
    match self.names.get(tag as usize) {
      Some(name) => Ok(name.as_str()),
      None => Err(
        UnknownRuleTagSnafu {
          tag,
          count: self.names.len(),
        }
        .build()
        .into(),
      ),
    }
  }

  pub fn tag_of(&self, name: &str) -> CodegenResult<u32> {
    self
      .names
      .iter()
      .position(|candidate| candidate == name)
      .map(|index| index as u32)
      .ok_or_else(|| RuleNotFoundSnafu { name }.build().into())
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}
