//! Field declarations and their storage (§3 "DataField"/"AutoField", §4.5
//! "Distributed and lazy fields").
//!
//! Grounded on `internal/FieldDeclaration.h`, `DataField.h`, `AutoField.h`,
//! `DistributedField.{h,cpp}` and `LazyField.{h,cpp}`. The original is a
//! small inheritance chain (`FieldDeclaration` → `DataField` →
//! `DistributedField` → `LazyField`, with `AutoField` as a sibling of
//! `DataField`) dispatched through `read`/`write` virtuals. Four storage
//! shapes is a closed set, so it becomes one `FieldKind` enum rather than
//! a trait object per field.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::error::Result;
use crate::stream::{BufferedOutStream, MappedInStream};
use crate::types::FieldType;
use crate::value::Value;

/// A field's storage discipline.
///
/// - `Data`: present in the base schema version that introduced the owning
///   pool; stored densely, one slot per object in declaration order, read
///   eagerly as part of the parallel parse (§4.5).
/// - `Auto`: transient; never read from or written to a file, but still
///   occupies a field id slot so a same-named file field is detected as a
///   collision rather than silently shadowed (`AutoField`'s note on RTTI).
/// - `Distributed`: added by a later schema version than the one that
///   introduced the pool, so existing instances predate the field; stored
///   as a dense array shifted by `first_id` for the instances the owning
///   file version knows about, plus a side map for instances created at
///   runtime after that.
/// - `Lazy`: as `Distributed`, but the dense array's bytes are not decoded
///   until first access (`LazyField::ensureIsLoaded`).
pub enum FieldKind {
	Data(Mutex<Vec<Value>>),
	Auto,
	Distributed(RwLock<DistributedStorage>),
	Lazy(RwLock<LazyStorage>),
}

pub struct DistributedStorage {
	pub first_id: i32,
	pub dense: Vec<Value>,
	pub overflow: HashMap<i32, Value>,
}

impl DistributedStorage {
	pub fn new(first_id: i32, count: usize) -> Self {
		Self { first_id, dense: vec![Value::Null; count], overflow: HashMap::new() }
	}

	pub fn get(&self, id: i32) -> Value {
		let offset = id - self.first_id;
		if offset >= 0 && (offset as usize) < self.dense.len() {
			self.dense[offset as usize].clone()
		} else {
			self.overflow.get(&id).cloned().unwrap_or(Value::Null)
		}
	}

	pub fn set(&mut self, id: i32, value: Value) {
		let offset = id - self.first_id;
		if offset >= 0 && (offset as usize) < self.dense.len() {
			self.dense[offset as usize] = value;
		} else {
			self.overflow.insert(id, value);
		}
	}
}

/// Like [`DistributedStorage`], but the dense part starts out as an
/// unparsed byte range and is only materialized into `Value`s by
/// `load_from`, mirroring `LazyField::load`.
pub struct LazyStorage {
	pub backing: DistributedStorage,
	pub pending: Option<(usize, usize)>,
}

impl LazyStorage {
	pub fn new(first_id: i32, count: usize) -> Self {
		Self { backing: DistributedStorage::new(first_id, count), pending: None }
	}

	pub fn is_loaded(&self) -> bool {
		self.pending.is_none()
	}
}

bitflags::bitflags! {
	/// Per-field restriction taxonomy (Design Note "Restriction checks").
	/// The original parses these off a `T_class`/`F`-adjacent attribute
	/// extension that this runtime doesn't decode (§6 Non-goal: custom
	/// attributes are read as a bare `attrCount` and skipped); restrictions
	/// are instead something an embedding program attaches at schema-build
	/// time and that [`crate::writer::write`] checks during flush.
	#[derive(Debug, Clone, Copy, Default)]
	pub struct Restriction: u8 {
		const NON_NULL = 0b0_0001;
		const DEFAULT = 0b0_0010;
		const RANGE = 0b0_0100;
		const CONSTANT_LENGTH_POINTER = 0b0_1000;
		const CODED = 0b1_0000;
	}
}

pub struct FieldDeclaration {
	pub field_id: u32,
	pub name: std::sync::Arc<str>,
	pub field_type: FieldType,
	pub kind: FieldKind,
	pub restrictions: Restriction,
}

impl FieldDeclaration {
	pub fn new_data(field_id: u32, name: std::sync::Arc<str>, field_type: FieldType, count: usize) -> Self {
		Self { field_id, name, field_type, kind: FieldKind::Data(Mutex::new(vec![Value::Null; count])), restrictions: Restriction::empty() }
	}

	pub fn new_auto(field_id: u32, name: std::sync::Arc<str>, field_type: FieldType) -> Self {
		Self { field_id, name, field_type, kind: FieldKind::Auto, restrictions: Restriction::empty() }
	}

	pub fn new_distributed(field_id: u32, name: std::sync::Arc<str>, field_type: FieldType, first_id: i32, count: usize) -> Self {
		Self {
			field_id,
			name,
			field_type,
			kind: FieldKind::Distributed(RwLock::new(DistributedStorage::new(first_id, count))),
			restrictions: Restriction::empty(),
		}
	}

	pub fn new_lazy(field_id: u32, name: std::sync::Arc<str>, field_type: FieldType, first_id: i32, count: usize) -> Self {
		Self { field_id, name, field_type, kind: FieldKind::Lazy(RwLock::new(LazyStorage::new(first_id, count))), restrictions: Restriction::empty() }
	}

	/// Attaches a restriction set at schema-build time (builder-style, so
	/// existing `new_*` call sites are unaffected).
	pub fn with_restrictions(mut self, restrictions: Restriction) -> Self {
		self.restrictions = restrictions;
		self
	}

	/// The local index of the first null slot in `[0, total)`, if
	/// `NON_NULL` is meant to hold there. Only `Data` storage is checked:
	/// `Distributed`/`Lazy` fields are a later-schema-version concept the
	/// original's restriction checks never applied to either.
	pub fn first_null_in_range(&self, total: usize) -> Option<usize> {
		match &self.kind {
			FieldKind::Data(v) => v.lock().unwrap().iter().take(total).position(Value::is_null),
			_ => None,
		}
	}

	/// Keeps only the values at `kept_old_indices` (old local index), in
	/// that order, discarding the rest — the field-storage counterpart of
	/// [`crate::pool::Pool::compact_and_renumber`]'s slot compaction, so a
	/// field's dense values stay aligned with their object's new local
	/// index once tombstoned slots are dropped. Only `Data` storage needs
	/// this: `Distributed`/`Lazy` storage is keyed by real object id
	/// rather than book position, so a tombstoned object's stale entry is
	/// simply unreachable afterward rather than needing to be relocated.
	pub fn compact(&self, kept_old_indices: &[u32]) {
		if let FieldKind::Data(v) = &self.kind {
			let mut v = v.lock().unwrap();
			let compacted = kept_old_indices.iter().map(|&i| v.get(i as usize).cloned().unwrap_or(Value::Null)).collect();
			*v = compacted;
		}
	}

	pub fn get(&self, local_index: usize, object_id: i32) -> Value {
		match &self.kind {
			FieldKind::Data(v) => v.lock().unwrap().get(local_index).cloned().unwrap_or(Value::Null),
			FieldKind::Auto => Value::Null,
			FieldKind::Distributed(d) => d.read().unwrap().get(object_id),
			FieldKind::Lazy(l) => {
				let guard = l.read().unwrap();
				debug_assert!(guard.is_loaded(), "lazy field must be loaded before access");
				guard.backing.get(object_id)
			}
		}
	}

	pub fn set(&self, local_index: usize, object_id: i32, value: Value) {
		match &self.kind {
			FieldKind::Data(v) => {
				let mut v = v.lock().unwrap();
				if local_index >= v.len() {
					v.resize(local_index + 1, Value::Null);
				}
				v[local_index] = value;
			}
			FieldKind::Auto => {}
			FieldKind::Distributed(d) => d.write().unwrap().set(object_id, value),
			FieldKind::Lazy(l) => {
				let mut guard = l.write().unwrap();
				debug_assert!(guard.is_loaded(), "lazy field must be loaded before access");
				guard.backing.set(object_id, value);
			}
		}
	}

	/// Decodes the byte range left pending by the parser into `Value`s, the
	/// Rust counterpart of `LazyField::load`. A no-op for anything but an
	/// unloaded lazy field.
	pub fn ensure_loaded(&self, decode: impl FnOnce(&mut MappedInStream) -> Result<Vec<Value>>, mut stream: MappedInStream) -> Result<()> {
		if let FieldKind::Lazy(l) = &self.kind {
			let mut guard = l.write().unwrap();
			if !guard.is_loaded() {
				let values = decode(&mut stream)?;
				for (i, v) in values.into_iter().enumerate() {
					if i < guard.backing.dense.len() {
						guard.backing.dense[i] = v;
					}
				}
				guard.pending = None;
			}
		}
		Ok(())
	}

	/// Writes this field's data for the contiguous range `[first, last)`,
	/// `first`/`last` being 0-based positions into the field's own dense
	/// array (the same convention [`crate::parser::blocks::read_field_block`]
	/// reads into). Returns `true` iff every written value was the type's
	/// default, matching `DataField::write`'s "all default" suppression
	/// signal used by the writer to skip emitting the field block entirely.
	pub fn write_range(&self, first: usize, last: usize, out: &mut BufferedOutStream, write_one: impl Fn(&Value, &mut BufferedOutStream) -> bool) -> bool {
		let mut all_default = true;
		match &self.kind {
			FieldKind::Data(v) => {
				let v = v.lock().unwrap();
				for value in v.iter().take(last).skip(first) {
					all_default &= write_one(value, out);
				}
			}
			FieldKind::Auto => {}
			FieldKind::Distributed(d) => {
				let d = d.read().unwrap();
				for local in first..last {
					let value = d.get(d.first_id + local as i32);
					all_default &= write_one(&value, out);
				}
			}
			FieldKind::Lazy(l) => {
				let guard = l.read().unwrap();
				for local in first..last {
					let value = guard.backing.get(guard.backing.first_id + local as i32);
					all_default &= write_one(&value, out);
				}
			}
		}
		all_default
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn distributed_storage_routes_by_offset_from_first_id() {
		let mut storage = DistributedStorage::new(10, 3);
		storage.set(10, Value::I32(1));
		storage.set(12, Value::I32(3));
		storage.set(20, Value::I32(99));
		assert!(matches!(storage.get(10), Value::I32(1)));
		assert!(matches!(storage.get(20), Value::I32(99)));
		assert!(matches!(storage.get(999), Value::Null));
	}

	#[test]
	fn data_field_set_grows_dense_storage() {
		let field = FieldDeclaration::new_data(1, std::sync::Arc::from("x"), FieldType::I32, 0);
		field.set(5, 0, Value::I32(7));
		assert!(matches!(field.get(5, 0), Value::I32(7)));
	}
}
