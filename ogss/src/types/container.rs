//! Container hull types: array, list, set, map (§3 "Hull type", §4.6
//! "Container merge", §4.7 "writeHull").
//!
//! Grounded on `fieldTypes/{ArrayType,ListType,SetType,MapType}.h`'s shared
//! `SingleArgumentType`/`ContainerType` base: `idMap`/`IDs` bookkeeping plus
//! a `deps`/`maxDeps` pair used by the writer's dependency-ordered hull
//! emission. The four container kinds share one Rust struct — the original
//! only needs four classes because C++ templates monomorphize per element
//! type; our elements are already type-erased [`crate::value::Value`]s, so
//! kind alone is enough to pick the read/write loop shape.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use nohash_hasher::IntMap;

use crate::types::{FieldType, Kcc};
use crate::value::Value;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum ContainerKind {
	Array = 0,
	List = 1,
	Set = 2,
	Map = 3,
}

impl ContainerKind {
	pub fn from_u2(bits: u32) -> Self {
		match bits {
			0 => Self::Array,
			1 => Self::List,
			2 => Self::Set,
			3 => Self::Map,
			_ => unreachable!("kind is masked to 2 bits"),
		}
	}

	pub fn write_tag(self) -> u8 {
		self as u32 as u8
	}
}

/// The payload of one container instance. Sets and maps are kept as plain
/// vectors rather than hash-based collections: `Value` embeds `f32`/`f64`,
/// which have no total `Eq`/`Hash`, and the spec's storage model only
/// requires faithful preservation and traversal of contents, not the
/// uniqueness guarantees a generated, element-typed `Set<T>` would enforce
/// (that enforcement belongs to the out-of-scope generated builder layer).
#[derive(Debug, Default, Clone)]
pub enum ContainerData {
	#[default]
	Array(Vec<Value>),
	List(std::collections::VecDeque<Value>),
	Set(Vec<Value>),
	Map(Vec<(Value, Value)>),
}

impl ContainerData {
	pub fn len(&self) -> usize {
		match self {
			Self::Array(v) => v.len(),
			Self::List(v) => v.len(),
			Self::Set(v) => v.len(),
			Self::Map(v) => v.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn new_for(kind: ContainerKind) -> Self {
		match kind {
			ContainerKind::Array => Self::Array(Vec::new()),
			ContainerKind::List => Self::List(std::collections::VecDeque::new()),
			ContainerKind::Set => Self::Set(Vec::new()),
			ContainerKind::Map => Self::Map(Vec::new()),
		}
	}
}

pub type ContainerHandle = Arc<Mutex<ContainerData>>;

/// Shared hull bookkeeping (§3 "Hull type"): the ordinal→instance map, the
/// reverse instance→ordinal map (by pointer identity, since two distinct
/// container instances may be structurally equal), and the write-time
/// dependency counters.
///
/// Grounded on `fieldTypes/HullType.h`'s `idMap`/`IDs`/`deps`/`maxDeps`.
pub struct HullType {
	/// `id_map[0]` is an unused sentinel; ordinals are 1-based.
	id_map: Mutex<Vec<ContainerHandle>>,
	ids: Mutex<IntMap<usize, i32>>,
	max_deps: AtomicU32,
	deps: AtomicI64,
	field_id: AtomicU32,
}

impl Default for HullType {
	fn default() -> Self {
		Self::new()
	}
}

impl HullType {
	pub fn new() -> Self {
		Self {
			id_map: Mutex::new(vec![Arc::new(Mutex::new(ContainerData::Array(Vec::new())))]),
			ids: Mutex::new(IntMap::default()),
			max_deps: AtomicU32::new(0),
			deps: AtomicI64::new(0),
			field_id: AtomicU32::new(0),
		}
	}

	pub fn known_size(&self) -> usize {
		self.id_map.lock().unwrap().len() - 1
	}

	pub fn get(&self, id: i32) -> Option<ContainerHandle> {
		if id <= 0 {
			return None;
		}
		self.id_map.lock().unwrap().get(id as usize).cloned()
	}

	/// Returns the stable ordinal of `handle`, assigning a fresh one by
	/// pointer identity on first sight. Thread-safe, matching `HullType::id`.
	pub fn id_of(&self, handle: &ContainerHandle) -> i32 {
		let key = Arc::as_ptr(handle) as usize;
		let mut ids = self.ids.lock().unwrap();
		if let Some(&id) = ids.get(&key) {
			return id;
		}
		let mut id_map = self.id_map.lock().unwrap();
		let id = id_map.len() as i32;
		id_map.push(handle.clone());
		ids.insert(key, id);
		id
	}

	pub fn allocate(&self, count: usize, kind: ContainerKind) {
		let mut id_map = self.id_map.lock().unwrap();
		id_map.reserve(count);
		for _ in 0..count {
			id_map.push(Arc::new(Mutex::new(ContainerData::new_for(kind))));
		}
	}

	/// Handles for every instance allocated since `known_size` was last
	/// `since`, in ordinal order. Used by the parser to hand a freshly
	/// `allocate`d run of instances to a hull-read task without re-deriving
	/// which ordinals are new.
	pub fn instances_since(&self, since: usize) -> Vec<ContainerHandle> {
		self.id_map.lock().unwrap()[since + 1..].to_vec()
	}

	/// Forgets every ordinal assignment at the start of a write, matching
	/// `HullType::resetIDs`.
	pub fn reset_ids(&self) {
		self.ids.lock().unwrap().clear();
		*self.id_map.lock().unwrap() = vec![Arc::new(Mutex::new(ContainerData::Array(Vec::new())))];
	}

	pub fn max_deps(&self) -> u32 {
		self.max_deps.load(Ordering::Relaxed)
	}

	pub fn bump_max_deps(&self) {
		self.max_deps.fetch_add(1, Ordering::Relaxed);
	}

	pub fn arm_deps(&self) {
		self.deps.store(self.max_deps() as i64, Ordering::SeqCst);
	}

	/// Decrements the live dependency counter; `true` once it reaches zero,
	/// meaning every writable consumer has been emitted and this hull must
	/// now be written itself.
	pub fn decrement_deps(&self) -> bool {
		self.deps.fetch_sub(1, Ordering::SeqCst) == 1
	}

	pub fn field_id(&self) -> u32 {
		self.field_id.load(Ordering::Relaxed)
	}

	pub fn set_field_id(&self, id: u32) {
		self.field_id.store(id, Ordering::Relaxed);
	}
}

/// A container hull type: kind, element type(s), KCC (if known at compile
/// time), and the shared hull bookkeeping.
pub struct ContainerType {
	pub type_id: u32,
	pub kind: ContainerKind,
	pub base1: FieldType,
	/// second base, only present for maps (the value type).
	pub base2: Option<FieldType>,
	/// `None` for containers the file introduced that are unknown at
	/// compile time ("unknown containers receive boxed bases", §4.6).
	pub kcc: Option<Kcc>,
	pub hull: HullType,
}

impl ContainerType {
	pub fn new(type_id: u32, kind: ContainerKind, base1: FieldType, base2: Option<FieldType>, kcc: Option<Kcc>) -> Self {
		Self { type_id, kind, base1, base2, kcc, hull: HullType::new() }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_is_stable_across_lookups() {
		let hull = HullType::new();
		let handle: ContainerHandle = Arc::new(Mutex::new(ContainerData::Array(vec![Value::I32(1)])));
		let id1 = hull.id_of(&handle);
		let id2 = hull.id_of(&handle);
		assert_eq!(id1, id2);
		assert!(Arc::ptr_eq(&hull.get(id1).unwrap(), &handle));
	}

	#[test]
	fn distinct_instances_get_distinct_ids() {
		let hull = HullType::new();
		let a: ContainerHandle = Arc::new(Mutex::new(ContainerData::Array(vec![])));
		let b: ContainerHandle = Arc::new(Mutex::new(ContainerData::Array(vec![])));
		assert_ne!(hull.id_of(&a), hull.id_of(&b));
	}
}
