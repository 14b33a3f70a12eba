/// Representation a value has at run time, as far as the compiler can tell.
///
/// The discriminant doubles as the type tag stored in a runtime `Variable`
/// record, so the numbering is part of the runtime ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
  /// Untyped (NOOB) or only known at run time, e.g. an element read.
  Noob,
  Integer,
  String,
  Float,
}

impl ValueKind {
  pub fn tag(self) -> i64 {
    match self {
      ValueKind::Noob => 0,
      ValueKind::Integer => 1,
      ValueKind::String => 2,
      ValueKind::Float => 3,
    }
  }

  pub fn from_tag(tag: i64) -> Self {
    match tag {
      1 => ValueKind::Integer,
      2 => ValueKind::String,
      3 => ValueKind::Float,
      _ => ValueKind::Noob,
    }
  }

  pub fn is_known(self) -> bool {
    !matches!(self, ValueKind::Noob)
  }
}
