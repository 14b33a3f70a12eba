//! Variable references and subscripts.
//!
//! An `array` node is either a bare name (`[word]`) or a subscript of another
//! array node (`[array, index]`), so `x[i][j]` nests with the name innermost.
//! Both forms leave the address of a storage cell in `%rax`: the name form
//! yields the record's root cell, and each subscript steps one level down.
//! Under an assignment target, a name that is not yet visible is allocated and
//! every subscript grows its dimension when the index is past the end.

use log::debug;

use super::{ArrayRef, Codegen, Operand};
use crate::ast::{NodeId, Payload};
use crate::context::Flag;
use crate::error::{
  CodegenResult, DimensionMismatchSnafu, MalformedExpressionSnafu, UndefinedVariableSnafu,
};
use crate::runtime::layout::{DIM_SIZE, DIMS_OFFSET, VALUES_OFFSET};
use crate::ty::ValueKind;

pub fn array(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  let children = cg.branch_children(node)?;
  match children.as_slice() {
    [word] => named(cg, *word),
    [inner, index] => subscript(cg, node, *inner, *index),
    _ => MalformedExpressionSnafu {
      reason: "array reference takes a name, or an array and one subscript",
    }
    .fail()
    .map_err(Into::into),
  }
}

fn variable_name(cg: &Codegen<'_>, word: NodeId) -> CodegenResult<String> {
  if !cg.ast.node(word).is_terminal() {
    return MalformedExpressionSnafu {
      reason: "variable name is not a word",
    }
    .fail()
    .map_err(Into::into);
  }
  match cg.ast.payload(word).and_then(Payload::as_text) {
    Some(name) => Ok(name.to_string()),
    None => MalformedExpressionSnafu {
      reason: "variable name carries no text",
    }
    .fail()
    .map_err(Into::into),
  }
}

fn named(cg: &mut Codegen<'_>, word: NodeId) -> CodegenResult<Operand> {
  let name = variable_name(cg, word)?;
  let l_value = cg.ctx.flag(Flag::LValue);
  let dimensions = cg.ctx.take_pending_dimensions();
  // Declarations only look at the active scope, so they shadow.
  let visible = if cg.ctx.flag(Flag::Declare) {
    cg.ctx.symbol(&name).is_some()
  } else {
    cg.ctx.lookup(&name).is_some()
  };
  if !visible {
    if !l_value {
      return UndefinedVariableSnafu { name }.fail().map_err(Into::into);
    }
    allocate(cg, &name, dimensions);
  }

  let Some(symbol) = cg.ctx.lookup(&name).cloned() else {
    return UndefinedVariableSnafu { name }.fail().map_err(Into::into);
  };
  cg.load_variable(&name, "rax")?;
  cg.ctx.emit(format!("lea {VALUES_OFFSET}(%rax), %rdi"));
  cg.ctx.emit("mov $0, %rsi");
  cg.ctx.emit_call("validx");
  Ok(Operand::Array(ArrayRef {
    name,
    dimensions: symbol.dimensions,
    level: 0,
  }))
}

/// Create the runtime record for `name` and push it as a local.
fn allocate(cg: &mut Codegen<'_>, name: &str, dimensions: usize) {
  debug!("allocating {name} with {dimensions} dimension(s)");
  cg.ctx.emit(format!("mov ${}, %rdi", ValueKind::Noob.tag()));
  cg.ctx.emit(format!("mov ${dimensions}, %rsi"));
  cg.ctx.emit_call("varalloc");
  cg.ctx.push_local("rax", name, dimensions);
}

/// Number of subscripts applied by the array node `node`.
fn subscript_depth(cg: &Codegen<'_>, node: NodeId) -> usize {
  let mut depth = 0;
  let mut current = node;
  while let [inner, _] = cg.ast.children(current) {
    depth += 1;
    current = *inner;
  }
  depth
}

fn subscript(
  cg: &mut Codegen<'_>,
  node: NodeId,
  inner: NodeId,
  index: NodeId,
) -> CodegenResult<Operand> {
  let l_value = cg.ctx.flag(Flag::LValue);
  if l_value {
    let depth = subscript_depth(cg, node);
    cg.ctx.set_pending_dimensions(depth);
  }

  let base = match cg.dispatch(inner)? {
    Operand::Array(base) => base,
    _ => {
      return MalformedExpressionSnafu {
        reason: "only variables can be subscripted",
      }
      .fail()
      .map_err(Into::into);
    }
  };
  if base.level >= base.dimensions {
    return DimensionMismatchSnafu {
      name: base.name,
      declared: base.dimensions,
      used: base.level + 1,
    }
    .fail()
    .map_err(Into::into);
  }

  cg.ctx.push_temp("rax");
  // The subscript itself is always read, never allocated.
  let declare = cg.ctx.set_flag(Flag::Declare, false);
  cg.ctx.set_flag(Flag::LValue, false);
  let index_value = cg.eval_value(index);
  cg.ctx.set_flag(Flag::LValue, l_value);
  cg.ctx.set_flag(Flag::Declare, declare);
  index_value?;

  cg.ctx.push_temp("rax");
  if l_value {
    emit_growth(cg, &base)?;
  }
  cg.ctx.pop_temp("rsi");
  cg.ctx.pop_temp("rax");
  cg.ctx.emit("mov (%rax), %rdi");
  cg.ctx.emit_call("validx");

  Ok(Operand::Array(ArrayRef {
    level: base.level + 1,
    ..base
  }))
}

/// Grow dimension `array.level` to hold the index in `%rax` when it is out of
/// range. Must run before the cell at that level is read.
fn emit_growth(cg: &mut Codegen<'_>, array: &ArrayRef) -> CodegenResult<()> {
  let label = cg.ctx.next_label();
  let grow = format!(".Lgrow{label}");
  let done = format!(".Lgrow{label}_done");
  let size_offset = array.level as i64 * DIM_SIZE;

  cg.load_variable(&array.name, "rdi")?;
  cg.ctx.emit(format!("mov {DIMS_OFFSET}(%rdi), %rcx"));
  cg.ctx.emit("test %rcx, %rcx");
  cg.ctx.emit(format!("je {grow}"));
  cg.ctx.emit(format!("cmp %rax, {size_offset}(%rcx)"));
  cg.ctx.emit(format!("jg {done}"));
  cg.ctx.emit_label(&grow);
  cg.ctx.emit(format!("mov ${}, %rsi", array.level));
  cg.ctx.emit("lea 1(%rax), %rdx");
  cg.ctx.emit_call("vardimalloc");
  cg.ctx.emit_label(&done);
  Ok(())
}
