//! Array runtime linked into every compiled program.
//!
//! A LOLCODE variable is a heap [`Variable`] record whose storage is a tree of
//! [`Value`] cells: each dimension is one level of nesting, and a cell at a
//! non-leaf level points at the contiguous cells of the next level. Generated
//! code only ever touches this memory through the `extern "C"` entry points
//! below and the offsets in [`layout`].
//!
//! A variable with no dimensions is a scalar; its value lives directly in the
//! record's `values` field, so `&record.values` is the cell generated code
//! reads and writes.

use std::alloc::{self, Layout};
use std::ffi::{CStr, c_char};
use std::fmt;
use std::io::Write;
use std::ptr;

use log::trace;

use crate::error::{
  AllocationFailureSnafu, DimensionOutOfRangeSnafu, MissingVariableSnafu, NegativeLengthSnafu,
  RuntimeError, RuntimeResult,
};
use crate::ty::ValueKind;

pub mod layout;

/// One storage cell.
#[repr(C)]
#[derive(Clone, Copy)]
pub union Value {
  pub integer: i64,
  pub string: *const c_char,
  pub float: f64,
  pub array: *mut Value,
}

impl Value {
  pub const ZERO: Value = Value { integer: 0 };
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Every field is 8 plain bytes, so reading the integer view is always defined.
    write!(f, "Value({:#x})", unsafe { self.integer })
  }
}

/// Runtime record behind every variable.
///
/// Field order and widths are fixed: generated code addresses them through
/// [`layout`].
#[repr(C)]
#[derive(Debug)]
pub struct Variable {
  pub var_type: i64,
  pub dim_count: i64,
  /// `dim_count` entries, allocated on the first [`Variable::grow_dimension`].
  pub dims: *mut i64,
  pub values: *mut Value,
}

impl Variable {
  pub fn new(var_type: i64, dim_count: i64) -> Self {
    Self {
      var_type,
      dim_count,
      dims: ptr::null_mut(),
      values: ptr::null_mut(),
    }
  }

  pub fn kind(&self) -> ValueKind {
    ValueKind::from_tag(self.var_type)
  }

  /// Recorded dimension sizes; empty until the first dimension is grown.
  pub fn dims(&self) -> &[i64] {
    if self.dims.is_null() {
      &[]
    } else {
      unsafe { std::slice::from_raw_parts(self.dims, self.dim_count as usize) }
    }
  }

  /// The cell holding a scalar's value, and whose `array` view is the first
  /// storage level of an array.
  pub fn root_cell(&mut self) -> *mut Value {
    ptr::addr_of_mut!(self.values).cast::<Value>()
  }

  /// Set dimension `dim` to `new_length` cells and rebuild the storage so
  /// every cell above it owns a level of the new size.
  ///
  /// Levels whose size did not change are not moved. If an allocation fails
  /// the storage is leaked and the variable is left empty.
  pub fn grow_dimension(&mut self, dim: i64, new_length: i64) -> RuntimeResult<()> {
    if dim < 0 || dim >= self.dim_count {
      return DimensionOutOfRangeSnafu {
        index: dim,
        count: self.dim_count,
      }
      .fail();
    }
    if new_length < 0 {
      return NegativeLengthSnafu { length: new_length }.fail();
    }

    let count = self.dim_count as usize;
    if self.dims.is_null() {
      trace!("vardimalloc: allocating size vector for {count} dimension(s)");
      let layout = Layout::array::<i64>(count).map_err(|_| allocation_failure(count, 8))?;
      let dims = unsafe { alloc::alloc_zeroed(layout) }.cast::<i64>();
      if dims.is_null() {
        return AllocationFailureSnafu {
          bytes: layout.size(),
        }
        .fail();
      }
      self.dims = dims;
    }

    let old = self.dims().to_vec();
    let mut new = old.clone();
    new[dim as usize] = new_length;

    let slot = ptr::addr_of_mut!(self.values);
    if let Err(err) = unsafe { resize_level(slot, &old, &new) } {
      self.values = ptr::null_mut();
      unsafe { ptr::write_bytes(self.dims, 0, count) };
      return Err(err);
    }
    unsafe { *self.dims.add(dim as usize) = new_length };
    trace!("vardimalloc: var.vals@{:p} dims={new:?}", self.values);
    Ok(())
  }

  /// Cell addressed by `indices`, one per dimension.
  ///
  /// # Safety
  /// Indices are not checked in release builds; an index outside the
  /// recorded sizes yields a dangling pointer, exactly as generated code does.
  pub unsafe fn element_ptr(&mut self, indices: &[i64]) -> *mut Value {
    debug_assert_eq!(
      indices.len() as i64,
      self.dim_count,
      "subscript count must match the dimension count"
    );
    let dims = self.dims;
    let mut cell = self.root_cell();
    for (level, &i) in indices.iter().enumerate() {
      if cfg!(debug_assertions) {
        let size = if dims.is_null() { 0 } else { unsafe { *dims.add(level) } };
        assert!(
          (0..size).contains(&i),
          "index {i} out of bounds for dimension {level} of size {size}"
        );
      }
      cell = index(unsafe { (*cell).array }, i);
    }
    cell
  }
}

impl Drop for Variable {
  fn drop(&mut self) {
    if self.dim_count <= 0 || self.dims.is_null() {
      return;
    }
    let dims = self.dims().to_vec();
    unsafe { free_level(self.values, &dims) };
    if let Ok(layout) = Layout::array::<i64>(dims.len()) {
      unsafe { alloc::dealloc(self.dims.cast(), layout) };
    }
  }
}

/// Address of cell `i` in a storage level. Pure pointer arithmetic: `i` is
/// never checked against the level's size.
pub fn index(values: *mut Value, i: i64) -> *mut Value {
  debug_assert!(!values.is_null(), "indexing into unallocated storage");
  values.wrapping_offset(i as isize)
}

/// Text `lolprint` writes for a raw value of the given type tag.
///
/// # Safety
/// For string tags `raw` must be null or point at a NUL-terminated string.
pub unsafe fn format_value(var_type: i64, raw: i64) -> String {
  match ValueKind::from_tag(var_type) {
    ValueKind::String if raw == 0 => String::new(),
    ValueKind::String => unsafe { CStr::from_ptr(raw as *const c_char) }
      .to_string_lossy()
      .into_owned(),
    ValueKind::Float => f64::from_bits(raw as u64).to_string(),
    ValueKind::Integer | ValueKind::Noob => raw.to_string(),
  }
}

fn allocation_failure(len: usize, width: usize) -> RuntimeError {
  AllocationFailureSnafu {
    bytes: len.saturating_mul(width),
  }
  .build()
}

fn cells_layout(len: usize) -> RuntimeResult<Layout> {
  Layout::array::<Value>(len).map_err(|_| allocation_failure(len, size_of::<Value>()))
}

/// Resize the level stored in `*slot` from `old[0]` to `new[0]` cells, then
/// recurse into every cell for the remaining dimensions.
unsafe fn resize_level(slot: *mut *mut Value, old: &[i64], new: &[i64]) -> RuntimeResult<()> {
  let (Some(&old_len), Some(&new_len)) = (old.first(), new.first()) else {
    return Ok(());
  };
  let current = unsafe { *slot };
  let old_len = if current.is_null() { 0 } else { old_len as usize };
  let new_len = new_len as usize;

  for i in new_len..old_len {
    unsafe { free_level((*current.add(i)).array, &old[1..]) };
  }

  let resized = if new_len == old_len {
    current
  } else if new_len == 0 {
    unsafe { alloc::dealloc(current.cast(), cells_layout(old_len)?) };
    ptr::null_mut()
  } else if current.is_null() {
    trace!("dimalloc: allocating {new_len} cell(s)");
    let layout = cells_layout(new_len)?;
    let fresh = unsafe { alloc::alloc_zeroed(layout) }.cast::<Value>();
    if fresh.is_null() {
      return AllocationFailureSnafu {
        bytes: layout.size(),
      }
      .fail();
    }
    fresh
  } else {
    trace!("dimalloc: resizing {old_len} -> {new_len} cell(s)");
    let new_size = cells_layout(new_len)?.size();
    let moved =
      unsafe { alloc::realloc(current.cast(), cells_layout(old_len)?, new_size) }.cast::<Value>();
    if moved.is_null() {
      return AllocationFailureSnafu { bytes: new_size }.fail();
    }
    if new_len > old_len {
      unsafe { ptr::write_bytes(moved.add(old_len), 0, new_len - old_len) };
    }
    moved
  };
  unsafe { *slot = resized };

  for i in 0..new_len {
    let cell = unsafe { resized.add(i) };
    unsafe { resize_level(ptr::addr_of_mut!((*cell).array), &old[1..], &new[1..])? };
  }
  Ok(())
}

unsafe fn free_level(values: *mut Value, dims: &[i64]) {
  let Some(&len) = dims.first() else {
    return;
  };
  if values.is_null() || len <= 0 {
    return;
  }
  for i in 0..len as usize {
    unsafe { free_level((*values.add(i)).array, &dims[1..]) };
  }
  if let Ok(layout) = Layout::array::<Value>(len as usize) {
    unsafe { alloc::dealloc(values.cast(), layout) };
  }
}

fn fatal(origin: &str, err: &RuntimeError) -> ! {
  eprintln!("{origin}: {err}");
  std::process::abort()
}

/// Allocate a new variable record with no storage yet.
#[unsafe(no_mangle)]
pub extern "C" fn varalloc(var_type: i64, dim_count: i64) -> *mut Variable {
  let var = Box::into_raw(Box::new(Variable::new(var_type, dim_count)));
  trace!("varalloc: var@{var:p} type={var_type} dims={dim_count}");
  var
}

/// C entry point of [`Variable::grow_dimension`]; any failure aborts.
///
/// # Safety
/// `var` must be null or a pointer obtained from [`varalloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vardimalloc(var: *mut Variable, dim_num: i64, new_length: i64) {
  let result = match unsafe { var.as_mut() } {
    Some(var) => var.grow_dimension(dim_num, new_length),
    None => MissingVariableSnafu.fail(),
  };
  if let Err(err) = result {
    fatal("vardimalloc", &err);
  }
}

/// C entry point of [`index`].
#[unsafe(no_mangle)]
pub extern "C" fn validx(values: *mut Value, index: i64) -> *mut Value {
  trace!("validx: val@{values:p}[{index}]");
  self::index(values, index)
}

/// Print one value without a trailing newline.
///
/// # Safety
/// See [`format_value`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lolprint(var_type: i64, raw: i64) {
  let text = unsafe { format_value(var_type, raw) };
  let mut stdout = std::io::stdout().lock();
  let _ = stdout.write_all(text.as_bytes());
  let _ = stdout.flush();
}

#[unsafe(no_mangle)]
pub extern "C" fn lolnewline() {
  let mut stdout = std::io::stdout().lock();
  let _ = stdout.write_all(b"\n");
  let _ = stdout.flush();
}
