//! Where the AST comes from.
//!
//! Lexing and parsing LOLCODE happen outside this crate; whatever does it hands
//! over a [`ParsedProgram`] through [`ParseSource`]. The one implementation
//! shipped here reads the tree from a JSON document:
//!
//! ```json
//! {
//!   "rules": ["program", "fork", "..."],
//!   "root": {"type": 0, "line": 1, "children": [
//!     {"type": 7, "line": 2, "value": 5}
//!   ]}
//! }
//! ```
//!
//! A node with `children` is non-terminal; a node without is terminal and may
//! carry a `value` (integer or string).

use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;
use snafu::{ResultExt, ensure};

use crate::ast::{Ast, NodeId, Payload};
use crate::error::{IoSnafu, JsonSnafu, MixedNodeSnafu, SourceError, UnknownTagSnafu};
use crate::rules::RuleRegistry;

/// A tree ready for code generation, with the registry its tags refer to.
#[derive(Debug, Clone)]
pub struct ParsedProgram {
  pub ast: Ast,
  pub root: NodeId,
  pub rules: RuleRegistry,
}

pub trait ParseSource {
  fn parse(self) -> Result<ParsedProgram, SourceError>;
}

#[derive(Debug, Deserialize)]
struct Document {
  rules: Vec<String>,
  root: RawNode,
}

#[derive(Debug, Deserialize)]
struct RawNode {
  #[serde(rename = "type")]
  tag: u32,
  #[serde(default)]
  line: u32,
  children: Option<Vec<RawNode>>,
  value: Option<Payload>,
}

/// AST document in JSON form.
#[derive(Debug, Clone)]
pub struct JsonSource {
  text: String,
}

impl JsonSource {
  pub fn new(text: impl Into<String>) -> Self {
    Self { text: text.into() }
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SourceError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).context(IoSnafu { path })?;
    Ok(Self::new(text))
  }
}

impl ParseSource for JsonSource {
  fn parse(self) -> Result<ParsedProgram, SourceError> {
    let document: Document = serde_json::from_str(&self.text).context(JsonSnafu)?;
    let rules = RuleRegistry::new(document.rules);
    let mut ast = Ast::new();
    let root = build(&mut ast, document.root, rules.len())?;
    debug!("loaded {} nodes over {} rules", ast.len(), rules.len());
    Ok(ParsedProgram { ast, root, rules })
  }
}

fn build(ast: &mut Ast, raw: RawNode, rule_count: usize) -> Result<NodeId, SourceError> {
  let RawNode {
    tag,
    line,
    children,
    value,
  } = raw;
  ensure!((tag as usize) < rule_count, UnknownTagSnafu { tag, line });
  match (children, value) {
    (Some(_), Some(_)) => MixedNodeSnafu { line }.fail(),
    (Some(children), None) => {
      let id = ast.create(tag, line, false);
      for child in children {
        let child = build(ast, child, rule_count)?;
        ast.append_child(id, child);
      }
      Ok(id)
    }
    (None, value) => {
      let id = ast.create(tag, line, true);
      if let Some(value) = value {
        ast.set_payload(id, value);
      }
      Ok(id)
    }
  }
}
