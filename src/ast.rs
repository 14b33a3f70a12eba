//! Arena-backed abstract syntax tree handed over by the parser.
//!
//! Nodes carry no language semantics: a numeric rule tag, the source line and
//! either an ordered list of child nodes or, for terminals, a single raw
//! payload whose meaning is fixed by the rule that produced it. Nodes are never
//! removed; the whole arena is dropped at the end of a compilation.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::rules::RuleRegistry;

/// Index of a node inside its [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// Raw value attached to a terminal node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
  Integer(i64),
  Text(String),
}

impl Payload {
  /// Operators travel as one-character text.
  pub fn operator(op: char) -> Self {
    Self::Text(op.to_string())
  }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Payload::Integer(value) => Some(*value),
      Payload::Text(_) => None,
    }
  }

  pub fn as_text(&self) -> Option<&str> {
    match self {
      Payload::Text(text) => Some(text),
      Payload::Integer(_) => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
  Branch(Vec<NodeId>),
  Leaf(Option<Payload>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
  pub tag: u32,
  /// 1-based source line, 0 when synthetic or unknown.
  pub line: u32,
  pub body: NodeBody,
}

impl Node {
  pub fn is_terminal(&self) -> bool {
    matches!(self.body, NodeBody::Leaf(_))
  }
}

#[derive(Debug, Default, Clone)]
pub struct Ast {
  nodes: Vec<Node>,
}

impl Ast {
  pub fn new() -> Self {
    Self::default()
  }

  /// Allocate a fresh, childless node.
  pub fn create(&mut self, tag: u32, line: u32, terminal: bool) -> NodeId {
    let id = NodeId(self.nodes.len() as u32);
    let body = if terminal {
      NodeBody::Leaf(None)
    } else {
      NodeBody::Branch(Vec::new())
    };
    self.nodes.push(Node { tag, line, body });
    id
  }

  /// Append `child` to a non-terminal node, preserving order.
  pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
    match &mut self.nodes[parent.index()].body {
      NodeBody::Branch(children) => children.push(child),
      NodeBody::Leaf(_) => panic!("terminal node {parent:?} cannot own child nodes"),
    }
  }

  /// Attach the raw value of a terminal node.
  pub fn set_payload(&mut self, node: NodeId, payload: Payload) {
    match &mut self.nodes[node.index()].body {
      NodeBody::Leaf(slot) => *slot = Some(payload),
      NodeBody::Branch(_) => panic!("non-terminal node {node:?} cannot hold a payload"),
    }
  }

  pub fn node(&self, id: NodeId) -> &Node {
    &self.nodes[id.index()]
  }

  /// Children of a non-terminal; empty for terminals.
  pub fn children(&self, id: NodeId) -> &[NodeId] {
    match &self.node(id).body {
      NodeBody::Branch(children) => children,
      NodeBody::Leaf(_) => &[],
    }
  }

  pub fn payload(&self, id: NodeId) -> Option<&Payload> {
    match &self.node(id).body {
      NodeBody::Leaf(payload) => payload.as_ref(),
      NodeBody::Branch(_) => None,
    }
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Clone the subtree rooted at `id` into freshly allocated nodes.
  pub fn deep_copy(&mut self, id: NodeId) -> NodeId {
    let Node { tag, line, body } = self.node(id).clone();
    match body {
      NodeBody::Leaf(payload) => {
        let copy = self.create(tag, line, true);
        if let Some(payload) = payload {
          self.set_payload(copy, payload);
        }
        copy
      }
      NodeBody::Branch(children) => {
        let copy = self.create(tag, line, false);
        for child in children {
          let child_copy = self.deep_copy(child);
          self.append_child(copy, child_copy);
        }
        copy
      }
    }
  }

  /// Indented dump of the tree, one node per line.
  pub fn dump(&self, root: NodeId, rules: &RuleRegistry) -> String {
    let mut out = String::new();
    self.dump_into(&mut out, root, rules, 0);
    out
  }

  fn dump_into(&self, out: &mut String, id: NodeId, rules: &RuleRegistry, indent: usize) {
    let node = self.node(id);
    let name = rules.name_of(node.tag).unwrap_or("?");
    let _ = write!(out, "{:indent$}{name} (line {})", "", node.line);
    match &node.body {
      NodeBody::Leaf(Some(Payload::Integer(value))) => {
        let _ = writeln!(out, ": {value}");
      }
      NodeBody::Leaf(Some(Payload::Text(text))) => {
        let _ = writeln!(out, ": {text:?}");
      }
      NodeBody::Leaf(None) => out.push('\n'),
      NodeBody::Branch(children) => {
        out.push('\n');
        for child in children {
          self.dump_into(out, *child, rules, indent + 2);
        }
      }
    }
  }
}
