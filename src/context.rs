//! Mutable state threaded through one compilation.
//!
//! Two scope stacks are tracked independently: control scopes name the
//! constructs branch labels are derived from (`program`, `loop3`, `cond1then`),
//! while variable scopes select the symbol table new locals go into. Locals are
//! pushed onto the machine stack as they are first assigned, so recorded
//! offsets are relative to the top of the scope's locals and every older
//! local moves one word further away when a new one arrives.

use std::collections::HashMap;

use log::debug;

use crate::runtime::layout::WORD;
use crate::ty::ValueKind;

/// Momentary evaluation signals set by a parent before dispatching a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
  /// The subtree is an assignment target.
  LValue,
  /// The target belongs to a declaration and may shadow outer variables.
  Declare,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
  pub kind: ValueKind,
  /// Byte offset of the slot holding the `Variable*`, from the top of the
  /// owning scope's locals.
  pub offset: i64,
  pub dimensions: usize,
}

/// One emitted line and the source line it was generated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
  pub text: String,
  pub source_line: u32,
}

#[derive(Debug, Default)]
pub struct Context {
  label_counter: usize,
  control_scopes: Vec<String>,
  variable_scopes: Vec<String>,
  symbols: HashMap<String, HashMap<String, Symbol>>,
  frame_depth: HashMap<String, i64>,
  flags: HashMap<Flag, bool>,
  /// Words of expression temporaries currently pushed.
  temp_depth: i64,
  pending_dimensions: Option<usize>,
  current_line: u32,
  header: Vec<Line>,
  body: Vec<Line>,
}

impl Context {
  pub fn new() -> Self {
    Self::default()
  }

  /// A number never handed out before in this compilation.
  pub fn next_label(&mut self) -> usize {
    let label = self.label_counter;
    self.label_counter += 1;
    label
  }

  // ── Control scopes ───────────────────────────────────────

  pub fn push_control_scope(&mut self, name: impl Into<String>) {
    self.control_scopes.push(name.into());
  }

  pub fn pop_control_scope(&mut self) -> Option<String> {
    self.control_scopes.pop()
  }

  pub fn control_scopes(&self) -> &[String] {
    &self.control_scopes
  }

  /// Innermost control scope satisfying `pred`; the stack is left untouched.
  pub fn find_control_scope(&self, pred: impl Fn(&str) -> bool) -> Option<&str> {
    self
      .control_scopes
      .iter()
      .rev()
      .map(String::as_str)
      .find(|name| pred(name))
  }

  // ── Variable scopes and symbols ──────────────────────────

  pub fn push_variable_scope(&mut self, selector: impl Into<String>) {
    let selector = selector.into();
    self.symbols.insert(selector.clone(), HashMap::new());
    self.frame_depth.insert(selector.clone(), 0);
    self.variable_scopes.push(selector);
  }

  /// Close the innermost variable scope, returning the bytes of locals it
  /// owned. The caller emits the matching stack release.
  pub fn pop_variable_scope(&mut self) -> i64 {
    let Some(selector) = self.variable_scopes.pop() else {
      return 0;
    };
    self.symbols.remove(&selector);
    let depth = self.frame_depth.remove(&selector).unwrap_or(0);
    debug!("closing variable scope {selector}, releasing {depth} bytes");
    depth
  }

  pub fn active_variable_scope(&self) -> Option<&str> {
    self.variable_scopes.last().map(String::as_str)
  }

  pub fn frame_depth(&self, selector: &str) -> i64 {
    self.frame_depth.get(selector).copied().unwrap_or(0)
  }

  /// Symbol `name` in the active scope only.
  pub fn symbol(&self, name: &str) -> Option<&Symbol> {
    let scope = self.active_variable_scope()?;
    self.symbols.get(scope)?.get(name)
  }

  /// Symbol `name` in the innermost scope that defines it.
  pub fn lookup(&self, name: &str) -> Option<&Symbol> {
    self
      .variable_scopes
      .iter()
      .rev()
      .find_map(|scope| self.symbols.get(scope)?.get(name))
  }

  /// Current `%rsp`-relative byte offset of the slot holding `name`.
  pub fn slot_offset(&self, name: &str) -> Option<i64> {
    let mut above = self.temp_depth * WORD;
    for scope in self.variable_scopes.iter().rev() {
      if let Some(symbol) = self.symbols.get(scope).and_then(|table| table.get(name)) {
        return Some(symbol.offset + above);
      }
      above += self.frame_depth(scope);
    }
    None
  }

  /// Record a freshly pushed local in the active scope.
  ///
  /// Re-declaring a name already present in the scope keeps its slot.
  pub fn declare_local(&mut self, name: &str, dimensions: usize) -> i64 {
    debug_assert_eq!(self.temp_depth, 0, "locals are pushed between statements");
    let Some(scope) = self.variable_scopes.last().cloned() else {
      return 0;
    };
    let table = self.symbols.entry(scope.clone()).or_default();
    if let Some(existing) = table.get(name) {
      return existing.offset;
    }
    for symbol in table.values_mut() {
      symbol.offset += WORD;
    }
    table.insert(
      name.to_string(),
      Symbol {
        kind: ValueKind::Noob,
        offset: 0,
        dimensions,
      },
    );
    *self.frame_depth.entry(scope.clone()).or_insert(0) += WORD;
    debug!("allocated {name} ({dimensions} dimension(s)) in scope {scope}");
    0
  }

  /// Note the compile-time kind last stored into `name`.
  pub fn record_kind(&mut self, name: &str, kind: ValueKind) {
    for scope in self.variable_scopes.iter().rev() {
      if let Some(symbol) = self.symbols.get_mut(scope).and_then(|t| t.get_mut(name)) {
        symbol.kind = kind;
        return;
      }
    }
  }

  /// Bytes of locals owned by every scope from the innermost out to and
  /// including `selector`.
  pub fn depth_through(&self, selector: &str) -> Option<i64> {
    let mut total = 0;
    for scope in self.variable_scopes.iter().rev() {
      total += self.frame_depth(scope);
      if scope == selector {
        return Some(total);
      }
    }
    None
  }

  /// Words pushed since the frame was set up.
  pub fn stack_words(&self) -> i64 {
    let locals: i64 = self.frame_depth.values().sum();
    locals / WORD + self.temp_depth
  }

  // ── Flags and auxiliary results ──────────────────────────

  /// Set `flag`, returning its previous value.
  pub fn set_flag(&mut self, flag: Flag, value: bool) -> bool {
    self.flags.insert(flag, value).unwrap_or(false)
  }

  pub fn flag(&self, flag: Flag) -> bool {
    self.flags.get(&flag).copied().unwrap_or(false)
  }

  /// Dimension count the next allocated variable should get. The outermost
  /// subscript of a target sets it first and wins.
  pub fn set_pending_dimensions(&mut self, dimensions: usize) {
    self.pending_dimensions.get_or_insert(dimensions);
  }

  pub fn take_pending_dimensions(&mut self) -> usize {
    self.pending_dimensions.take().unwrap_or(0)
  }

  // ── Emission ─────────────────────────────────────────────

  /// Make `line` the source line attached to emitted instructions, returning
  /// the previous one. Line 0 keeps the current attribution.
  pub fn enter_line(&mut self, line: u32) -> u32 {
    let previous = self.current_line;
    if line != 0 {
      self.current_line = line;
    }
    previous
  }

  pub fn leave_line(&mut self, previous: u32) {
    self.current_line = previous;
  }

  pub fn emit(&mut self, text: impl Into<String>) {
    self.body.push(Line {
      text: format!("    {}", text.into()),
      source_line: self.current_line,
    });
  }

  pub fn emit_label(&mut self, label: &str) {
    self.body.push(Line {
      text: format!("{label}:"),
      source_line: self.current_line,
    });
  }

  pub fn emit_header(&mut self, text: impl Into<String>) {
    self.header.push(Line {
      text: text.into(),
      source_line: self.current_line,
    });
  }

  /// Push `%reg` as an expression temporary.
  pub fn push_temp(&mut self, reg: &str) {
    self.emit(format!("push %{reg}"));
    self.temp_depth += 1;
  }

  pub fn pop_temp(&mut self, reg: &str) {
    self.emit(format!("pop %{reg}"));
    self.temp_depth -= 1;
  }

  /// Push `%reg` as a new local of the active scope.
  pub fn push_local(&mut self, reg: &str, name: &str, dimensions: usize) -> i64 {
    self.emit(format!("push %{reg}"));
    self.declare_local(name, dimensions)
  }

  /// Call `function` with the stack aligned to 16 bytes; the caller removes
  /// any padding afterwards.
  pub fn emit_call(&mut self, function: &str) {
    let padded = self.stack_words() % 2 != 0;
    if padded {
      self.emit(format!("sub ${WORD}, %rsp"));
    }
    self.emit(format!("call {function}"));
    if padded {
      self.emit(format!("add ${WORD}, %rsp"));
    }
  }

  /// Drop `bytes` of locals from the machine stack.
  pub fn emit_release(&mut self, bytes: i64) {
    if bytes > 0 {
      self.emit(format!("add ${bytes}, %rsp"));
    }
  }

  pub fn header_lines(&self) -> &[Line] {
    &self.header
  }

  pub fn body_lines(&self) -> &[Line] {
    &self.body
  }

  /// Final assembly text: header, a blank separator, then the body. With a
  /// source name every line is padded to `column` and tagged `# file:line`.
  pub fn render(&self, source_name: Option<&str>, column: usize) -> String {
    let format_line = |line: &Line| match source_name {
      Some(file) if line.source_line > 0 => {
        let pad = column.saturating_sub(line.text.len()).max(1);
        format!("{}{:pad$}# {file}:{}", line.text, "", line.source_line)
      }
      _ => line.text.clone(),
    };
    let header: Vec<String> = self.header.iter().map(format_line).collect();
    let body: Vec<String> = self.body.iter().map(format_line).collect();
    format!("{}\n\n{}\n", header.join("\n"), body.join("\n"))
  }
}
