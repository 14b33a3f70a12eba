//! Literals, operator expressions and VISIBLE.

use super::{Codegen, Operand};
use crate::ast::{NodeId, Payload};
use crate::context::Context;
use crate::error::{CodegenResult, MalformedExpressionSnafu};
use crate::rules::Rule;
use crate::runtime::layout::TYPE_OFFSET;
use crate::ty::ValueKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Mod,
  Eq,
  Ne,
  Lt,
  Gt,
  And,
  Or,
  Xor,
}

impl BinaryOp {
  pub fn from_code(code: char) -> Option<Self> {
    Some(match code {
      '+' => BinaryOp::Add,
      '-' => BinaryOp::Sub,
      '*' => BinaryOp::Mul,
      '/' => BinaryOp::Div,
      '%' => BinaryOp::Mod,
      '=' => BinaryOp::Eq,
      '!' => BinaryOp::Ne,
      '<' => BinaryOp::Lt,
      '>' => BinaryOp::Gt,
      '&' => BinaryOp::And,
      '|' => BinaryOp::Or,
      '^' => BinaryOp::Xor,
      _ => return None,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Neg,
  Not,
}

impl UnaryOp {
  pub fn from_code(code: char) -> Option<Self> {
    match code {
      '-' => Some(UnaryOp::Neg),
      '!' => Some(UnaryOp::Not),
      _ => None,
    }
  }
}

fn malformed<T>(reason: impl Into<String>) -> CodegenResult<T> {
  MalformedExpressionSnafu {
    reason: reason.into(),
  }
  .fail()
  .map_err(Into::into)
}

pub fn constant(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  let Some(value) = cg.ast.payload(node).and_then(Payload::as_integer) else {
    return malformed("integer literal without a value");
  };
  cg.ctx.emit(format!("mov ${value}, %rax"));
  Ok(Operand::Value(ValueKind::Integer))
}

/// String literal: stored in the data section, its address loaded.
pub fn string(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  let Some(text) = cg.ast.payload(node).and_then(Payload::as_text) else {
    return malformed("string literal without text");
  };
  let escaped = escape_string(text);
  let label = format!(".Lstr{}", cg.ctx.next_label());
  cg.ctx.emit_header(format!("{label}:"));
  cg.ctx.emit_header(format!("    .string \"{escaped}\""));
  cg.ctx.emit(format!("lea {label}(%rip), %rax"));
  Ok(Operand::Value(ValueKind::String))
}

/// WIN / FAIL, arriving either as text or as an integer flag.
pub fn boolean(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  let value = match cg.ast.payload(node) {
    Some(Payload::Integer(value)) => *value != 0,
    Some(Payload::Text(text)) if text == "WIN" => true,
    Some(Payload::Text(text)) if text == "FAIL" => false,
    _ => return malformed("boolean literal is neither WIN nor FAIL"),
  };
  cg.ctx.emit(format!("mov ${}, %rax", i64::from(value)));
  Ok(Operand::Value(ValueKind::Integer))
}

pub fn expr(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  match cg.branch_children(node)?.as_slice() {
    [only] => cg.dispatch(*only),
    [op, operand] => unary(cg, *op, *operand),
    [lhs, op, rhs] => binary(cg, *lhs, *op, *rhs),
    _ => malformed("expression takes one to three children"),
  }
}

/// Like [`expr`], but the result is always a 0/1 truth value.
pub fn condexpr(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  match cg.branch_children(node)?.as_slice() {
    [only] => {
      cg.eval_value(*only)?;
      emit_truth(&mut cg.ctx, "rax", "al");
      cg.ctx.emit("movzbq %al, %rax");
      Ok(Operand::Value(ValueKind::Integer))
    }
    [op, operand] => unary(cg, *op, *operand),
    [lhs, op, rhs] => binary(cg, *lhs, *op, *rhs),
    _ => malformed("condition takes one to three children"),
  }
}

/// VISIBLE: print every child, then end the line.
pub fn output(cg: &mut Codegen<'_>, node: NodeId) -> CodegenResult<Operand> {
  for child in cg.branch_children(node)? {
    match cg.dispatch(child)? {
      Operand::Array(array) => {
        array.ensure_leaf()?;
        cg.ctx.emit("mov (%rax), %rsi");
        cg.load_variable(&array.name, "rdi")?;
        cg.ctx.emit(format!("mov {TYPE_OFFSET}(%rdi), %rdi"));
      }
      Operand::Value(kind) => {
        cg.ctx.emit("mov %rax, %rsi");
        cg.ctx.emit(format!("mov ${}, %rdi", kind.tag()));
      }
      Operand::None => return malformed("VISIBLE argument produces no value"),
    }
    cg.ctx.emit_call("lolprint");
  }
  cg.ctx.emit_call("lolnewline");
  Ok(Operand::None)
}

fn operator_code(cg: &Codegen<'_>, node: NodeId) -> CodegenResult<char> {
  if !cg.is_rule(node, Rule::Operator) {
    return malformed("missing operator");
  }
  let text = cg.ast.payload(node).and_then(Payload::as_text).unwrap_or("");
  let mut chars = text.chars();
  match (chars.next(), chars.next()) {
    (Some(code), None) => Ok(code),
    _ => malformed(format!("operator \"{text}\" is not a single character")),
  }
}

fn unary(cg: &mut Codegen<'_>, op: NodeId, operand: NodeId) -> CodegenResult<Operand> {
  let code = operator_code(cg, op)?;
  let Some(op) = UnaryOp::from_code(code) else {
    return malformed(format!("'{code}' is not a unary operator"));
  };
  cg.eval_value(operand)?;
  match op {
    UnaryOp::Neg => cg.ctx.emit("neg %rax"),
    UnaryOp::Not => {
      cg.ctx.emit("cmp $0, %rax");
      cg.ctx.emit("sete %al");
      cg.ctx.emit("movzbq %al, %rax");
    }
  }
  Ok(Operand::Value(ValueKind::Integer))
}

fn binary(cg: &mut Codegen<'_>, lhs: NodeId, op: NodeId, rhs: NodeId) -> CodegenResult<Operand> {
  let code = operator_code(cg, op)?;
  let Some(op) = BinaryOp::from_code(code) else {
    return malformed(format!("'{code}' is not a binary operator"));
  };
  cg.eval_value(lhs)?;
  cg.ctx.push_temp("rax");
  cg.eval_value(rhs)?;
  cg.ctx.emit("mov %rax, %rcx");
  cg.ctx.pop_temp("rax");
  emit_binary(&mut cg.ctx, op);
  Ok(Operand::Value(ValueKind::Integer))
}

/// `%rax = %rax <op> %rcx`.
fn emit_binary(ctx: &mut Context, op: BinaryOp) {
  match op {
    BinaryOp::Add => ctx.emit("add %rcx, %rax"),
    BinaryOp::Sub => ctx.emit("sub %rcx, %rax"),
    BinaryOp::Mul => ctx.emit("imul %rcx, %rax"),
    BinaryOp::Div => {
      ctx.emit("cqo");
      ctx.emit("idiv %rcx");
    }
    BinaryOp::Mod => {
      ctx.emit("cqo");
      ctx.emit("idiv %rcx");
      ctx.emit("mov %rdx, %rax");
    }
    BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt => {
      let set = match op {
        BinaryOp::Eq => "sete",
        BinaryOp::Ne => "setne",
        BinaryOp::Lt => "setl",
        _ => "setg",
      };
      ctx.emit("cmp %rcx, %rax");
      ctx.emit(format!("{set} %al"));
      ctx.emit("movzbq %al, %rax");
    }
    BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
      let combine = match op {
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        _ => "xor",
      };
      emit_truth(ctx, "rax", "al");
      emit_truth(ctx, "rcx", "cl");
      ctx.emit(format!("{combine} %cl, %al"));
      ctx.emit("movzbq %al, %rax");
    }
  }
}

/// Set the low byte `%byte` of `%reg` to whether `%reg` is non-zero.
fn emit_truth(ctx: &mut Context, reg: &str, byte: &str) {
  ctx.emit(format!("cmp $0, %{reg}"));
  ctx.emit(format!("setne %{byte}"));
}

/// Escape `text` for a `.string` directive.
fn escape_string(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for byte in text.bytes() {
    match byte {
      b'"' => out.push_str("\\\""),
      b'\\' => out.push_str("\\\\"),
      b'\n' => out.push_str("\\n"),
      b'\t' => out.push_str("\\t"),
      0x20..=0x7e => out.push(byte as char),
      _ => out.push_str(&format!("\\{byte:03o}")),
    }
  }
  out
}
