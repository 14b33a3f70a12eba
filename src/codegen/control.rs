//! Conditionals, loops and GTFO.
//!
//! Each construct takes a fresh label number `N` and derives its labels from
//! the control scope it pushes: `.LloopN` / `.LloopN_end` for loops and
//! `.LcondNelse` / `.LcondN_end` for conditionals. Branch and loop bodies
//! also get their own variable scope, whose locals are dropped at the exit.

use log::debug;

use super::{Codegen, Operand};
use crate::ast::{NodeId, Payload};
use crate::error::{BreakOutsideLoopSnafu, CodegenResult, MalformedExpressionSnafu};

const LOOP_PREFIX: &str = "loop";

pub fn conditional(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  let children = cg.branch_children(node)?;
  let (condition, then, otherwise) = match children.as_slice() {
    [condition, then] => (*condition, *then, None),
    [condition, then, otherwise] => (*condition, *then, Some(*otherwise)),
    _ => {
      return MalformedExpressionSnafu {
        reason: "conditional takes a condition, a branch and an optional else branch",
      }
      .fail()
      .map_err(Into::into);
    }
  };

  let scope = format!("cond{}", cg.ctx.next_label());
  cg.ctx.push_control_scope(scope.clone());
  cg.eval_value(condition)?;
  cg.ctx.emit("cmp $0, %rax");
  cg.ctx.emit(format!("je .L{scope}else"));
  branch(cg, format!("{scope}then"), then)?;
  cg.ctx.emit(format!("jmp .L{scope}_end"));
  cg.ctx.emit_label(&format!(".L{scope}else"));
  if let Some(otherwise) = otherwise {
    branch(cg, format!("{scope}else"), otherwise)?;
  }
  cg.ctx.emit_label(&format!(".L{scope}_end"));
  cg.ctx.pop_control_scope();
  Ok(Operand::None)
}

fn branch(cg: &mut Codegen<'_>, scope: String, body: NodeId) -> CodegenResult<()> {
  cg.ctx.push_control_scope(scope.clone());
  cg.ctx.push_variable_scope(scope);
  cg.dispatch(body)?;
  let locals = cg.ctx.pop_variable_scope();
  cg.ctx.emit_release(locals);
  cg.ctx.pop_control_scope();
  Ok(())
}

/// `IM IN YR <label> ... IM OUTTA YR <label>`: repeats until GTFO.
pub fn loop_block(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  let children = cg.branch_children(node)?;
  let (label, body) = match children.as_slice() {
    [label, body] => (Some(*label), *body),
    [body] => (None, *body),
    _ => {
      return MalformedExpressionSnafu {
        reason: "loop takes an optional label and a body",
      }
      .fail()
      .map_err(Into::into);
    }
  };

  let scope = format!("{LOOP_PREFIX}{}", cg.ctx.next_label());
  if let Some(name) = label.and_then(|label| cg.ast.payload(label)).and_then(Payload::as_text) {
    debug!("loop {name} uses labels .L{scope}");
  }

  cg.ctx.push_control_scope(scope.clone());
  cg.ctx.push_variable_scope(scope.clone());
  cg.ctx.emit_label(&format!(".L{scope}"));
  cg.dispatch(body)?;
  let locals = cg.ctx.pop_variable_scope();
  cg.ctx.emit_release(locals);
  cg.ctx.emit(format!("jmp .L{scope}"));
  cg.ctx.emit_label(&format!(".L{scope}_end"));
  cg.ctx.pop_control_scope();
  Ok(Operand::None)
}

/// GTFO: leave the innermost enclosing loop.
pub fn brk(cg: &mut Codegen<'_>, _node: NodeId) -> CodegenResult<Operand> {
  let Some(scope) = cg
    .ctx
    .find_control_scope(|name| name.starts_with(LOOP_PREFIX))
    .map(str::to_string)
  else {
    return BreakOutsideLoopSnafu.fail().map_err(Into::into);
  };
  let locals = cg.ctx.depth_through(&scope).unwrap_or(0);
  cg.ctx.emit_release(locals);
  cg.ctx.emit(format!("jmp .L{scope}_end"));
  Ok(Operand::None)
}
