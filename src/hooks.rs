//! Rule name -> code generation handler table.
//!
//! Which handler runs for a node is decided by the node's rule, looked up
//! here; the standard table covers every [`Rule`] that produces code, and new
//! rules are supported by registering another handler.

use std::collections::HashMap;
use std::fmt;

use crate::codegen::{self, Hook};
use crate::error::{CodegenResult, HookNotFoundSnafu};
use crate::rules::Rule;

#[derive(Clone, Default)]
pub struct HookTable {
  hooks: HashMap<Rule, Hook>,
}

impl fmt::Debug for HookTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_set().entries(self.hooks.keys()).finish()
  }
}

impl HookTable {
  pub fn empty() -> Self {
    Self::default()
  }

  /// Table with a handler for every code-producing rule.
  pub fn standard() -> Self {
    let mut table = Self::empty();
    table.register(Rule::Program, codegen::program);
    table.register(Rule::Fork, codegen::fork);
    table.register(Rule::Noop, codegen::noop);
    table.register(Rule::Comment, codegen::noop);
    table.register(Rule::Include, codegen::noop);
    table.register(Rule::Assignment, codegen::assignment);
    table.register(Rule::Declaration, codegen::declaration);
    table.register(Rule::SelfAssignment, codegen::self_assignment);
    table.register(Rule::Array, codegen::arrays::array);
    table.register(Rule::Constant, codegen::expr::constant);
    table.register(Rule::Str, codegen::expr::string);
    table.register(Rule::Boolean, codegen::expr::boolean);
    table.register(Rule::Expr, codegen::expr::expr);
    table.register(Rule::CondExpr, codegen::expr::condexpr);
    table.register(Rule::Output, codegen::expr::output);
    table.register(Rule::Conditional, codegen::control::conditional);
    table.register(Rule::Loop, codegen::control::loop_block);
    table.register(Rule::Brk, codegen::control::brk);
    table
  }

  /// Install `hook` for `rule`, returning the handler it replaces.
  pub fn register(&mut self, rule: Rule, hook: Hook) -> Option<Hook> {
    self.hooks.insert(rule, hook)
  }

  /// Handler for the rule called `name`.
  pub fn search(&self, name: &str) -> CodegenResult<Hook> {
    Rule::from_name(name)
      .and_then(|rule| self.hooks.get(&rule).copied())
      .ok_or_else(|| HookNotFoundSnafu { name }.build().into())
  }
}
