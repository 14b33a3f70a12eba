//! Byte layout of the runtime records, as seen by generated code.
//!
//! The generator never hard-codes an offset: it uses these constants, which
//! are derived from the `#[repr(C)]` definitions the runtime itself is built
//! from.

use std::mem::{offset_of, size_of};

use super::{Value, Variable};

/// Width of a pointer, and of every stack slot the generator pushes.
pub const WORD: i64 = size_of::<*mut Value>() as i64;

pub const TYPE_OFFSET: i64 = offset_of!(Variable, var_type) as i64;
pub const DIMS_OFFSET: i64 = offset_of!(Variable, dims) as i64;
pub const VALUES_OFFSET: i64 = offset_of!(Variable, values) as i64;

/// Size of one entry of the dimension-size vector.
pub const DIM_SIZE: i64 = size_of::<i64>() as i64;
