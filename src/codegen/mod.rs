//! Code generation: lower the AST into AT&T x86-64 assembly.
//!
//! The emitter is a stack machine driven by the hook table: every node is
//! handed to the handler registered for its rule, which appends instructions
//! to the [`Context`] and reports what it left in `%rax` as an [`Operand`].
//! Expression temporaries are pushed on the machine stack; variables live in
//! stack slots that hold a pointer to their runtime record.

pub mod arrays;
pub mod control;
pub mod expr;

use log::debug;

use crate::ast::{Ast, NodeId, Payload};
use crate::context::{Context, Flag};
use crate::error::{
  CodegenResult, DimensionMismatchSnafu, MalformedExpressionSnafu, MixedElementKindsSnafu,
  TerminalNodeSnafu, UndefinedVariableSnafu,
};
use crate::hooks::HookTable;
use crate::rules::{Rule, RuleRegistry};
use crate::runtime::layout::TYPE_OFFSET;
use crate::ty::ValueKind;

/// Code generation handler for one rule.
pub type Hook = for<'a> fn(&mut Codegen<'a>, NodeId) -> CodegenResult<Operand>;

/// What a handler left behind in `%rax`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
  /// Statements leave nothing.
  None,
  /// A plain value of the given compile-time kind.
  Value(ValueKind),
  /// The address of a storage cell of a variable.
  Array(ArrayRef),
}

/// A variable reference after some number of subscripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayRef {
  pub name: String,
  /// Dimensions the variable was allocated with.
  pub dimensions: usize,
  /// Subscripts applied so far.
  pub level: usize,
}

impl ArrayRef {
  /// Fails unless every dimension has been subscripted, i.e. the cell holds a
  /// value rather than a lower level.
  pub fn ensure_leaf(&self) -> CodegenResult<()> {
    if self.level != self.dimensions {
      return DimensionMismatchSnafu {
        name: self.name.clone(),
        declared: self.dimensions,
        used: self.level,
      }
      .fail()
      .map_err(Into::into);
    }
    Ok(())
  }
}

pub struct Codegen<'a> {
  ast: &'a mut Ast,
  rules: &'a RuleRegistry,
  hooks: &'a HookTable,
  ctx: Context,
}

impl<'a> Codegen<'a> {
  pub fn new(ast: &'a mut Ast, rules: &'a RuleRegistry, hooks: &'a HookTable) -> Self {
    Self {
      ast,
      rules,
      hooks,
      ctx: Context::new(),
    }
  }

  pub fn context(&self) -> &Context {
    &self.ctx
  }

  pub fn context_mut(&mut self) -> &mut Context {
    &mut self.ctx
  }

  pub fn into_context(self) -> Context {
    self.ctx
  }

  /// Generate code for `node` with the handler registered for its rule.
  ///
  /// Errors leaving a handler are annotated with the node's rule and line, so
  /// a failure deep in the tree reports the whole chain of rules above it.
  pub fn dispatch(&mut self, node: NodeId) -> CodegenResult<Operand> {
    let (tag, line) = {
      let node = self.ast.node(node);
      (node.tag, node.line)
    };
    let rule = self.rules.name_of(tag)?.to_string();
    let hook = self.hooks.search(&rule)?;
    debug!("generating {rule} at line {line}");

    let previous = self.ctx.enter_line(line);
    let result = hook(self, node);
    self.ctx.leave_line(previous);
    result.map_err(|err| err.called_by(rule, line))
  }

  /// Children of a node whose rule needs them.
  fn branch_children(&self, node: NodeId) -> CodegenResult<Vec<NodeId>> {
    let n = self.ast.node(node);
    if n.is_terminal() {
      let rule = self.rules.name_of(n.tag)?.to_string();
      return TerminalNodeSnafu { rule }.fail().map_err(Into::into);
    }
    Ok(self.ast.children(node).to_vec())
  }

  /// Whether `node` was produced by `rule`.
  fn is_rule(&self, node: NodeId, rule: Rule) -> bool {
    self
      .rules
      .name_of(self.ast.node(node).tag)
      .is_ok_and(|name| name == rule.name())
  }

  /// Turn whatever `operand` left in `%rax` into a plain value.
  fn load_value(&mut self, operand: Operand) -> CodegenResult<ValueKind> {
    match operand {
      Operand::Value(kind) => Ok(kind),
      Operand::Array(array) => {
        array.ensure_leaf()?;
        self.ctx.emit("mov (%rax), %rax");
        Ok(ValueKind::Noob)
      }
      Operand::None => MalformedExpressionSnafu {
        reason: "statement used where a value is expected",
      }
      .fail()
      .map_err(Into::into),
    }
  }

  /// Dispatch `node` in a read context and leave its value in `%rax`.
  fn eval_value(&mut self, node: NodeId) -> CodegenResult<ValueKind> {
    let operand = self.dispatch(node)?;
    self.load_value(operand)
  }

  /// Load the record pointer of variable `name` into `%reg`.
  fn load_variable(&mut self, name: &str, reg: &str) -> CodegenResult<()> {
    let offset = self
      .ctx
      .slot_offset(name)
      .ok_or_else(|| UndefinedVariableSnafu { name }.build())?;
    self.ctx.emit(format!("mov {offset}(%rsp), %{reg}"));
    Ok(())
  }

  /// Build `target = target <op> operand` out of copies of the given nodes.
  fn desugar_self_assignment(
    &mut self,
    node: NodeId,
    target: NodeId,
    op: NodeId,
    operand: Option<NodeId>,
  ) -> CodegenResult<NodeId> {
    let assignment_tag = self.rules.tag_of(Rule::Assignment.name())?;
    let expr_tag = self.rules.tag_of(Rule::Expr.name())?;
    let line = self.ast.node(node).line;

    let operand = match operand {
      Some(operand) => self.ast.deep_copy(operand),
      None => {
        let constant_tag = self.rules.tag_of(Rule::Constant.name())?;
        let one = self.ast.create(constant_tag, line, true);
        self.ast.set_payload(one, Payload::Integer(1));
        one
      }
    };
    let lhs = self.ast.deep_copy(target);
    let op = self.ast.deep_copy(op);
    let expr = self.ast.create(expr_tag, line, false);
    for child in [lhs, op, operand] {
      self.ast.append_child(expr, child);
    }

    let target = self.ast.deep_copy(target);
    let assignment = self.ast.create(assignment_tag, line, false);
    self.ast.append_child(assignment, target);
    self.ast.append_child(assignment, expr);
    debug!("lowered self-assignment at line {line} into {assignment:?}");
    Ok(assignment)
  }
}

/// Program entry: sets up `main` and its frame, then runs every statement.
pub fn program(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  let children = cg.branch_children(node)?;
  cg.ctx.emit_header("    .section .note.GNU-stack,\"\",@progbits");
  cg.ctx.emit_header("    .data");
  cg.ctx.emit(".text");
  cg.ctx.emit(".globl main");
  cg.ctx.emit_label("main");
  cg.ctx.emit("push %rbp");
  cg.ctx.emit("mov %rsp, %rbp");

  cg.ctx.push_control_scope(Rule::Program.name());
  cg.ctx.push_variable_scope(Rule::Program.name());
  for child in children {
    cg.dispatch(child)?;
  }
  let locals = cg.ctx.pop_variable_scope();
  cg.ctx.emit_release(locals);
  cg.ctx.pop_control_scope();

  cg.ctx.emit("mov %rbp, %rsp");
  cg.ctx.emit("pop %rbp");
  cg.ctx.emit("mov $0, %rax");
  cg.ctx.emit("ret");
  Ok(Operand::None)
}

/// Statement sequence; stops at the first failing child.
pub fn fork(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  for child in cg.branch_children(node)? {
    cg.dispatch(child)?;
  }
  Ok(Operand::None)
}

pub fn noop(_cg: &mut Codegen<'_>, _node: NodeId) -> CodegenResult<Operand> {
  Ok(Operand::None)
}

pub fn assignment(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  store(cg, node, false)
}

pub fn declaration(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  store(cg, node, true)
}

/// `x R x <op> y` shorthand, generated as that full assignment.
pub fn self_assignment(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  let children = cg.branch_children(node)?;
  let (target, op, operand) = match children.as_slice() {
    [target, op] => (*target, *op, None),
    [target, op, operand] => (*target, *op, Some(*operand)),
    _ => {
      return MalformedExpressionSnafu {
        reason: "self-assignment takes a target, an operator and an optional operand",
      }
      .fail()
      .map_err(Into::into);
    }
  };
  let assignment = cg.desugar_self_assignment(node, target, op, operand)?;
  cg.dispatch(assignment)
}

fn store(cg: &mut Codegen<'_>, node: NodeId, declare: bool) -> CodegenResult<Operand> {
  let children = cg.branch_children(node)?;
  let (target, value) = match children.as_slice() {
    [target, value] => (*target, Some(*value)),
    [target] if declare => (*target, None),
    _ => {
      return MalformedExpressionSnafu {
        reason: "assignment takes a target and a value",
      }
      .fail()
      .map_err(Into::into);
    }
  };

  cg.ctx.set_flag(Flag::LValue, true);
  cg.ctx.set_flag(Flag::Declare, declare);
  let target = cg.dispatch(target);
  cg.ctx.set_flag(Flag::LValue, false);
  cg.ctx.set_flag(Flag::Declare, false);
  cg.ctx.take_pending_dimensions();
  let dest = match target? {
    Operand::Array(dest) => dest,
    _ => {
      return MalformedExpressionSnafu {
        reason: "assignment target is not a variable",
      }
      .fail()
      .map_err(Into::into);
    }
  };
  let Some(value) = value else {
    return Ok(Operand::None);
  };
  dest.ensure_leaf()?;

  cg.ctx.push_temp("rax");
  let source = cg.dispatch(value)?;
  let copied_from = match &source {
    Operand::Array(array) => Some(array.name.clone()),
    _ => None,
  };
  let kind = cg.load_value(source)?;
  cg.ctx.pop_temp("rcx");

  let stored = match &copied_from {
    Some(source) => cg.ctx.lookup(source).map_or(ValueKind::Noob, |s| s.kind),
    None => kind,
  };
  check_element_kind(cg, &dest, stored)?;
  cg.ctx.emit("mov %rax, (%rcx)");

  // The destination record's tag follows the stored value.
  if let Some(source) = copied_from {
    cg.load_variable(&source, "rsi")?;
    cg.ctx.emit(format!("mov {TYPE_OFFSET}(%rsi), %rsi"));
    cg.load_variable(&dest.name, "rdx")?;
    cg.ctx.emit(format!("mov %rsi, {TYPE_OFFSET}(%rdx)"));
  } else if kind.is_known() {
    cg.load_variable(&dest.name, "rdx")?;
    cg.ctx.emit(format!("movq ${}, {TYPE_OFFSET}(%rdx)", kind.tag()));
  }
  if stored.is_known() {
    cg.ctx.record_kind(&dest.name, stored);
  }
  Ok(Operand::None)
}

/// Every element of an array shares the record's one type tag, so an array
/// cannot hold values of two known kinds.
fn check_element_kind(
  cg: &Codegen<'_>,
  dest: &ArrayRef,
  stored: ValueKind,
) -> CodegenResult<()> {
  if dest.dimensions == 0 || !stored.is_known() {
    return Ok(());
  }
  match cg.ctx.lookup(&dest.name).map(|symbol| symbol.kind) {
    Some(existing) if existing.is_known() && existing != stored => {
      MixedElementKindsSnafu {
        name: dest.name.clone(),
        existing,
        stored,
      }
      .fail()
      .map_err(Into::into)
    }
    _ => Ok(()),
  }
}
