#![allow(dead_code)]

//! Shared helpers: a tree builder for hand-written programs and a small
//! interpreter for the x86-64 subset the generator emits.
//!
//! The interpreter runs on a real, 16-byte aligned buffer used as the machine
//! stack, so the pointers generated code passes around are ordinary host
//! addresses and runtime calls go straight to the crate's runtime library.
//! Only `lolprint` and `lolnewline` are replaced, to capture output.

use std::collections::HashMap;

use lolcc::ast::{Ast, NodeId, Payload};
use lolcc::rules::{Rule, RuleRegistry};
use lolcc::runtime::{self, Value, Variable};
use lolcc::{CompileOptions, HookError, ParsedProgram, generate_assembly};

// ── Tree builder ─────────────────────────────────────────────

pub struct Tree {
  pub ast: Ast,
  pub rules: RuleRegistry,
  line: u32,
}

impl Default for Tree {
  fn default() -> Self {
    Self::new()
  }
}

impl Tree {
  pub fn new() -> Self {
    Self {
      ast: Ast::new(),
      rules: RuleRegistry::standard(),
      line: 1,
    }
  }

  pub fn tag(&self, rule: Rule) -> u32 {
    self.rules.tag_of(rule.name()).unwrap()
  }

  /// Source line given to the nodes built next.
  pub fn at(&mut self, line: u32) -> &mut Self {
    self.line = line;
    self
  }

  pub fn branch(&mut self, rule: Rule, children: &[NodeId]) -> NodeId {
    let node = self.ast.create(self.tag(rule), self.line, false);
    for child in children {
      self.ast.append_child(node, *child);
    }
    node
  }

  pub fn leaf(&mut self, rule: Rule, payload: Option<Payload>) -> NodeId {
    let node = self.ast.create(self.tag(rule), self.line, true);
    if let Some(payload) = payload {
      self.ast.set_payload(node, payload);
    }
    node
  }

  pub fn word(&mut self, name: &str) -> NodeId {
    self.leaf(Rule::Word, Some(Payload::Text(name.into())))
  }

  pub fn var(&mut self, name: &str) -> NodeId {
    let word = self.word(name);
    self.branch(Rule::Array, &[word])
  }

  /// `base[index]`.
  pub fn index(&mut self, base: NodeId, index: NodeId) -> NodeId {
    self.branch(Rule::Array, &[base, index])
  }

  /// `name[i][j]...` with literal subscripts.
  pub fn element(&mut self, name: &str, indices: &[i64]) -> NodeId {
    let mut node = self.var(name);
    for &i in indices {
      let i = self.int(i);
      node = self.index(node, i);
    }
    node
  }

  pub fn int(&mut self, value: i64) -> NodeId {
    self.leaf(Rule::Constant, Some(Payload::Integer(value)))
  }

  pub fn string(&mut self, text: &str) -> NodeId {
    self.leaf(Rule::Str, Some(Payload::Text(text.into())))
  }

  pub fn boolean(&mut self, value: bool) -> NodeId {
    let text = if value { "WIN" } else { "FAIL" };
    self.leaf(Rule::Boolean, Some(Payload::Text(text.into())))
  }

  pub fn op(&mut self, code: char) -> NodeId {
    self.leaf(Rule::Operator, Some(Payload::operator(code)))
  }

  pub fn binary(&mut self, lhs: NodeId, code: char, rhs: NodeId) -> NodeId {
    let op = self.op(code);
    self.branch(Rule::Expr, &[lhs, op, rhs])
  }

  pub fn unary(&mut self, code: char, operand: NodeId) -> NodeId {
    let op = self.op(code);
    self.branch(Rule::Expr, &[op, operand])
  }

  pub fn cond(&mut self, lhs: NodeId, code: char, rhs: NodeId) -> NodeId {
    let op = self.op(code);
    self.branch(Rule::CondExpr, &[lhs, op, rhs])
  }

  pub fn assign(&mut self, target: NodeId, value: NodeId) -> NodeId {
    self.branch(Rule::Assignment, &[target, value])
  }

  pub fn declare(&mut self, target: NodeId, value: NodeId) -> NodeId {
    self.branch(Rule::Declaration, &[target, value])
  }

  /// Declaration without an initial value.
  pub fn declare_empty(&mut self, target: NodeId) -> NodeId {
    self.branch(Rule::Declaration, &[target])
  }

  /// `target <op>= operand`, or `target <op>= 1` without an operand.
  pub fn update(&mut self, target: NodeId, code: char, operand: Option<NodeId>) -> NodeId {
    let op = self.op(code);
    let mut children = vec![target, op];
    children.extend(operand);
    self.branch(Rule::SelfAssignment, &children)
  }

  pub fn output(&mut self, items: &[NodeId]) -> NodeId {
    self.branch(Rule::Output, items)
  }

  pub fn block(&mut self, statements: &[NodeId]) -> NodeId {
    self.branch(Rule::Fork, statements)
  }

  pub fn looped(&mut self, label: &str, statements: &[NodeId]) -> NodeId {
    let label = self.word(label);
    let body = self.block(statements);
    self.branch(Rule::Loop, &[label, body])
  }

  pub fn brk(&mut self) -> NodeId {
    self.leaf(Rule::Brk, None)
  }

  pub fn conditional(&mut self, condition: NodeId, then: &[NodeId], otherwise: Option<&[NodeId]>) -> NodeId {
    let then = self.block(then);
    let mut children = vec![condition, then];
    if let Some(otherwise) = otherwise {
      children.push(self.block(otherwise));
    }
    self.branch(Rule::Conditional, &children)
  }

  pub fn program(&mut self, statements: &[NodeId]) -> NodeId {
    let body = self.block(statements);
    self.branch(Rule::Program, &[body])
  }

  pub fn finish(self, root: NodeId) -> ParsedProgram {
    ParsedProgram {
      ast: self.ast,
      root,
      rules: self.rules,
    }
  }
}

pub fn compile(tree: Tree, root: NodeId) -> Result<String, HookError> {
  let mut program = tree.finish(root);
  generate_assembly(&mut program, &CompileOptions::default())
}

/// Compile and run, returning what the program printed.
pub fn run_program(tree: Tree, root: NodeId) -> String {
  let asm = compile(tree, root).unwrap_or_else(|err| panic!("{err}\n{}", err.backtrace()));
  let run = Machine::load(&asm).run();
  assert_eq!(run.exit, 0, "program exit status");
  run.stdout
}

// ── Interpreter ──────────────────────────────────────────────

const STACK_BYTES: usize = 1 << 20;
const STEP_LIMIT: usize = 2_000_000;
const CLOBBERED: i64 = 0x0bad_f00d;

#[derive(Debug, Clone, PartialEq)]
enum Operand {
  Imm(i64),
  Reg(String),
  Mem { base: String, disp: i64 },
  Rip(String),
  Label(String),
}

#[derive(Debug, Clone)]
struct Instr {
  op: String,
  args: Vec<Operand>,
}

#[derive(Debug)]
pub struct Run {
  pub stdout: String,
  pub exit: i64,
  /// Number of runtime calls made.
  pub calls: usize,
}

pub struct Machine {
  code: Vec<Instr>,
  labels: HashMap<String, usize>,
  data: HashMap<String, Vec<u8>>,
  regs: HashMap<String, i64>,
  cmp: (i64, i64),
  // Kept alive for the pointers generated code holds into it.
  _stack: Vec<u128>,
  stack_top: i64,
}

fn parse_reg(text: &str) -> String {
  text.trim_start_matches('%').to_string()
}

fn parse_operand(text: &str) -> Operand {
  let text = text.trim();
  if let Some(imm) = text.strip_prefix('$') {
    return Operand::Imm(imm.parse().unwrap_or_else(|_| panic!("bad immediate {text}")));
  }
  if text.starts_with('%') {
    return Operand::Reg(parse_reg(text));
  }
  if let Some(open) = text.find('(') {
    let base = &text[open + 1..text.len() - 1];
    let disp = &text[..open];
    if base == "%rip" {
      return Operand::Rip(disp.to_string());
    }
    let disp = if disp.is_empty() { 0 } else { disp.parse().unwrap() };
    return Operand::Mem {
      base: parse_reg(base),
      disp,
    };
  }
  Operand::Label(text.to_string())
}

fn unescape(text: &str) -> Vec<u8> {
  let bytes = text.as_bytes();
  let mut out = Vec::new();
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] != b'\\' {
      out.push(bytes[i]);
      i += 1;
      continue;
    }
    match bytes[i + 1] {
      b'n' => out.push(b'\n'),
      b't' => out.push(b'\t'),
      b'0'..=b'7' => {
        let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap();
        out.push(u8::from_str_radix(digits, 8).unwrap());
        i += 4;
        continue;
      }
      other => out.push(other),
    }
    i += 2;
  }
  out
}

impl Machine {
  pub fn load(asm: &str) -> Self {
    let mut code = Vec::new();
    let mut labels = HashMap::new();
    let mut data = HashMap::new();
    let mut pending_label: Option<String> = None;

    for raw in asm.lines() {
      let raw = raw.trim();
      if raw.starts_with(".string ") {
        let (Some(open), Some(close)) = (raw.find('"'), raw.rfind('"')) else {
          panic!("unterminated string literal: {raw}");
        };
        let mut bytes = unescape(&raw[open + 1..close]);
        bytes.push(0);
        let label = pending_label.take().expect(".string without a label");
        data.insert(label, bytes);
        continue;
      }
      let line = match raw.find('#') {
        Some(pos) => &raw[..pos],
        None => raw,
      }
      .trim();
      if line.is_empty() {
        continue;
      }
      if let Some(label) = line.strip_suffix(':') {
        labels.insert(label.to_string(), code.len());
        pending_label = Some(label.to_string());
        continue;
      }
      if line.starts_with('.') {
        continue;
      }
      let (op, rest) = line.split_once(' ').unwrap_or((line, ""));
      let args = if rest.is_empty() {
        Vec::new()
      } else {
        rest.split(',').map(parse_operand).collect()
      };
      code.push(Instr {
        op: op.to_string(),
        args,
      });
    }

    let mut stack = vec![0u128; STACK_BYTES / 16];
    let base = stack.as_mut_ptr() as i64;
    let stack_top = base + STACK_BYTES as i64;
    Self {
      code,
      labels,
      data,
      regs: HashMap::new(),
      cmp: (0, 0),
      _stack: stack,
      stack_top,
    }
  }

  fn reg(&self, name: &str) -> i64 {
    match name {
      "al" => self.reg("rax") & 0xff,
      "cl" => self.reg("rcx") & 0xff,
      _ => self.regs.get(name).copied().unwrap_or(CLOBBERED),
    }
  }

  fn set_reg(&mut self, name: &str, value: i64) {
    match name {
      "al" => {
        let rax = (self.reg("rax") & !0xff) | (value & 0xff);
        self.regs.insert("rax".into(), rax);
      }
      "cl" => {
        let rcx = (self.reg("rcx") & !0xff) | (value & 0xff);
        self.regs.insert("rcx".into(), rcx);
      }
      _ => {
        self.regs.insert(name.to_string(), value);
      }
    }
  }

  fn address(&self, operand: &Operand) -> i64 {
    match operand {
      Operand::Mem { base, disp } => self.reg(base) + disp,
      Operand::Rip(label) => self
        .data
        .get(label)
        .map(|bytes| bytes.as_ptr() as i64)
        .unwrap_or_else(|| panic!("unknown data label {label}")),
      other => panic!("{other:?} is not a memory operand"),
    }
  }

  fn read(&self, operand: &Operand) -> i64 {
    match operand {
      Operand::Imm(value) => *value,
      Operand::Reg(name) => self.reg(name),
      Operand::Mem { .. } => {
        let addr = self.address(operand);
        assert!(addr != 0 && addr % 8 == 0, "bad load from {addr:#x}");
        unsafe { *(addr as *const i64) }
      }
      other => panic!("cannot read {other:?}"),
    }
  }

  fn write(&mut self, operand: &Operand, value: i64) {
    match operand {
      Operand::Reg(name) => self.set_reg(name, value),
      Operand::Mem { .. } => {
        let addr = self.address(operand);
        assert!(addr != 0 && addr % 8 == 0, "bad store to {addr:#x}");
        unsafe { *(addr as *mut i64) = value };
      }
      other => panic!("cannot write {other:?}"),
    }
  }

  fn push(&mut self, value: i64) {
    let rsp = self.reg("rsp") - 8;
    self.set_reg("rsp", rsp);
    unsafe { *(rsp as *mut i64) = value };
  }

  fn pop(&mut self) -> i64 {
    let rsp = self.reg("rsp");
    let value = unsafe { *(rsp as *const i64) };
    self.set_reg("rsp", rsp + 8);
    value
  }

  fn jump(&self, operand: &Operand) -> usize {
    match operand {
      Operand::Label(label) => *self
        .labels
        .get(label)
        .unwrap_or_else(|| panic!("jump to unknown label {label}")),
      other => panic!("bad jump target {other:?}"),
    }
  }

  fn call(&mut self, function: &str, stdout: &mut String) {
    let rsp = self.reg("rsp");
    assert_eq!(rsp % 16, 0, "call {function} with a misaligned stack");
    let (rdi, rsi, rdx) = (self.reg("rdi"), self.reg("rsi"), self.reg("rdx"));
    let result = match function {
      "varalloc" => runtime::varalloc(rdi, rsi) as i64,
      "vardimalloc" => {
        unsafe { runtime::vardimalloc(rdi as *mut Variable, rsi, rdx) };
        CLOBBERED
      }
      "validx" => runtime::validx(rdi as *mut Value, rsi) as i64,
      "lolprint" => {
        stdout.push_str(&unsafe { runtime::format_value(rdi, rsi) });
        CLOBBERED
      }
      "lolnewline" => {
        stdout.push('\n');
        CLOBBERED
      }
      other => panic!("call to unknown function {other}"),
    };
    for reg in ["rcx", "rdx", "rsi", "rdi", "r8", "r9", "r10", "r11"] {
      self.set_reg(reg, CLOBBERED);
    }
    self.set_reg("rax", result);
  }

  /// Run from `main` until it returns.
  pub fn run(mut self) -> Run {
    // As if `main` had just been called: the return address is on the stack.
    let entry_rsp = self.stack_top - 8;
    self.set_reg("rsp", entry_rsp);
    let mut pc = *self.labels.get("main").expect("no main label");
    let mut stdout = String::new();
    let mut calls = 0;

    for _ in 0..STEP_LIMIT {
      let instr = self.code[pc].clone();
      pc += 1;
      let args = &instr.args;
      match instr.op.as_str() {
        "push" => {
          let value = self.read(&args[0]);
          self.push(value);
        }
        "pop" => {
          let value = self.pop();
          self.write(&args[0], value);
        }
        "mov" | "movq" => {
          let value = self.read(&args[0]);
          self.write(&args[1], value);
        }
        "movzbq" => {
          let value = self.read(&args[0]) & 0xff;
          self.write(&args[1], value);
        }
        "lea" => {
          let addr = self.address(&args[0]);
          self.write(&args[1], addr);
        }
        "add" | "sub" | "imul" | "and" | "or" | "xor" => {
          let src = self.read(&args[0]);
          let dst = self.read(&args[1]);
          let value = match instr.op.as_str() {
            "add" => dst.wrapping_add(src),
            "sub" => dst.wrapping_sub(src),
            "imul" => dst.wrapping_mul(src),
            "and" => dst & src,
            "or" => dst | src,
            _ => dst ^ src,
          };
          self.write(&args[1], value);
        }
        "neg" => {
          let value = self.read(&args[0]).wrapping_neg();
          self.write(&args[0], value);
        }
        "cqo" => {
          let rdx = if self.reg("rax") < 0 { -1 } else { 0 };
          self.set_reg("rdx", rdx);
        }
        "idiv" => {
          let divisor = self.read(&args[0]);
          let dividend = self.reg("rax");
          self.set_reg("rax", dividend / divisor);
          self.set_reg("rdx", dividend % divisor);
        }
        "cmp" => self.cmp = (self.read(&args[1]), self.read(&args[0])),
        "test" => self.cmp = (self.read(&args[1]) & self.read(&args[0]), 0),
        "sete" | "setne" | "setl" | "setg" => {
          let (lhs, rhs) = self.cmp;
          let holds = match instr.op.as_str() {
            "sete" => lhs == rhs,
            "setne" => lhs != rhs,
            "setl" => lhs < rhs,
            _ => lhs > rhs,
          };
          self.write(&args[0], i64::from(holds));
        }
        "je" | "jg" | "jmp" => {
          let (lhs, rhs) = self.cmp;
          let taken = match instr.op.as_str() {
            "je" => lhs == rhs,
            "jg" => lhs > rhs,
            _ => true,
          };
          if taken {
            pc = self.jump(&args[0]);
          }
        }
        "call" => {
          let Operand::Label(function) = &args[0] else {
            panic!("indirect call");
          };
          calls += 1;
          self.call(function, &mut stdout);
        }
        "ret" => {
          assert_eq!(self.reg("rsp"), entry_rsp, "stack is unbalanced at return");
          return Run {
            stdout,
            exit: self.reg("rax"),
            calls,
          };
        }
        other => panic!("unsupported instruction {other}"),
      }
    }
    panic!("program did not finish within {STEP_LIMIT} steps");
  }
}
