//! Shared state-initializer data (§4.4): the unified type graph that both
//! the [`creator`] (empty state) and the parser build into, indexed by a
//! single State-Initialized Field Array.
//!
//! Grounded on the shared fields of `internal/AbstractPool.h` and
//! `fieldTypes/FieldType.h`'s static-type registration: in the original,
//! `SIFA` is a raw `FieldType**` sized to the number of compile-time known
//! types and filled in by generated code; here it is a plain `Vec` because
//! there is no codegen step; the "generated pool builder" the spec
//! describes is instead a [`crate::state::creator::SchemaDef`] value the
//! embedding program constructs once.

pub mod creator;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::pool::Pool;
use crate::strings::StringPool;
use crate::types::container::ContainerType;
use crate::types::enums::EnumPool;
use crate::types::{FieldType, FIRST_DYNAMIC_TID};

/// What a field id, read off an HD block header, resolves to. Field ids
/// are never stored on disk explicitly (§6's `F` block carries only
/// `nameID | typeID | attrCount`); both reader and writer re-derive the
/// same deterministic numbering by walking classes then containers in
/// the same merged order (§4.4, §4.5), so this map only needs to be
/// rebuilt locally, not persisted.
#[derive(Debug, Clone, Copy)]
pub enum FieldTarget {
	Data { pool_index: usize, field_index: usize },
	Hull { container_index: usize },
	StringHull,
}

/// One compile-time-known type slot, addressable by position
/// (`nsID`/"SIFA index" in the original).
pub enum SifaEntry {
	Builtin(FieldType),
	Class(usize),
	Container(usize),
	Enum(usize),
}

/// The unified pool/container/enum/string graph, shared by the empty-state
/// [`creator::build`] path and by the parser's merge (§4.6).
pub struct TypeRegistry {
	pub pools: Vec<Pool>,
	pub containers: Vec<ContainerType>,
	pub enums: Vec<EnumPool>,
	pub strings: StringPool,
	pub sifa: Vec<SifaEntry>,
	/// Monotonic; starts at 1 because field id 0 is reserved for the
	/// string hull's own tail block.
	next_field_id: AtomicU32,
	next_type_id: AtomicU32,
	pub field_targets: Mutex<HashMap<u32, FieldTarget>>,
}

impl TypeRegistry {
	pub fn empty(strings: StringPool) -> Self {
		let mut sifa = Vec::with_capacity(10);
		for builtin in [
			FieldType::Bool,
			FieldType::I8,
			FieldType::I16,
			FieldType::I32,
			FieldType::I64,
			FieldType::V64,
			FieldType::F32,
			FieldType::F64,
			FieldType::AnyRef,
			FieldType::String,
		] {
			sifa.push(SifaEntry::Builtin(builtin));
		}
		Self {
			pools: Vec::new(),
			containers: Vec::new(),
			enums: Vec::new(),
			strings,
			sifa,
			next_field_id: AtomicU32::new(1),
			next_type_id: AtomicU32::new(FIRST_DYNAMIC_TID),
			field_targets: Mutex::new(HashMap::new()),
		}
	}

	pub fn register_field_target(&self, field_id: u32, target: FieldTarget) {
		self.field_targets.lock().unwrap().insert(field_id, target);
	}

	pub fn resolve_field_target(&self, field_id: u32) -> Option<FieldTarget> {
		if field_id == 0 {
			return Some(FieldTarget::StringHull);
		}
		self.field_targets.lock().unwrap().get(&field_id).copied()
	}

	/// Walks containers in merged order and assigns a field id to every
	/// one with `max_deps > 0`, continuing the counter left off by the
	/// class fields. Must run after [`Self::fix_container_max_deps`].
	pub fn assign_hull_field_ids(&mut self) {
		for (i, container) in self.containers.iter().enumerate() {
			if container.hull.max_deps() > 0 {
				let id = self.claim_field_id();
				container.hull.set_field_id(id);
				self.field_targets.get_mut().unwrap().insert(id, FieldTarget::Hull { container_index: i });
			}
		}
	}

	pub fn claim_type_id(&self) -> u32 {
		self.next_type_id.fetch_add(1, Ordering::SeqCst)
	}

	pub fn claim_field_id(&self) -> u32 {
		self.next_field_id.fetch_add(1, Ordering::SeqCst)
	}

	/// Bumps `max_deps` on the hull that backs `field_type`, if any
	/// (containers and the string pool). A no-op for scalar/class/enum
	/// fields, which are not hull-backed.
	pub fn bump_hull_deps(&self, field_type: FieldType) {
		match field_type {
			FieldType::Container(tid) => {
				if let Some(container) = self.container_by_type_id(tid) {
					container.hull.bump_max_deps();
				}
			}
			FieldType::String => self.strings.bump_max_deps(),
			_ => {}
		}
	}

	pub fn container_by_type_id(&self, type_id: u32) -> Option<&ContainerType> {
		self.containers.iter().find(|c| c.type_id == type_id)
	}

	/// Resolves a wire type id to the [`FieldType`] it denotes, searching
	/// builtins then classes then containers then enums (§6 "Type ID
	/// table": builtins are fixed, everything else is assigned in
	/// definition order, so a linear scan over each category is exact,
	/// if not the fastest possible lookup).
	pub fn field_type_for_type_id(&self, tid: u32) -> Option<FieldType> {
		match tid {
			0 => Some(FieldType::Bool),
			1 => Some(FieldType::I8),
			2 => Some(FieldType::I16),
			3 => Some(FieldType::I32),
			4 => Some(FieldType::I64),
			5 => Some(FieldType::V64),
			6 => Some(FieldType::F32),
			7 => Some(FieldType::F64),
			8 => Some(FieldType::AnyRef),
			9 => Some(FieldType::String),
			_ => {
				if self.pools.iter().any(|p| p.type_id == tid) {
					Some(FieldType::Class(tid))
				} else if self.containers.iter().any(|c| c.type_id == tid) {
					Some(FieldType::Container(tid))
				} else if self.enums.iter().any(|e| e.type_id == tid) {
					Some(FieldType::Enum(tid))
				} else {
					None
				}
			}
		}
	}

	pub fn pool_by_name(&self, name: &str) -> Option<&Pool> {
		self.pools.iter().find(|p| &*p.name == name)
	}

	/// §4.4 `fix_container_max_deps`: propagates dependency counts outward
	/// from consumer fields through the container DAG. Must run after
	/// every container's own `max_deps` has been set by its direct field
	/// consumers, hence the reverse-construction-order walk (a container's
	/// bases are always constructed before it, mirroring the KCC/UCC
	/// ordering guarantee).
	pub fn fix_container_max_deps(&self) {
		for container in self.containers.iter().rev() {
			if container.hull.max_deps() > 0 {
				self.bump_hull_deps(container.base1);
				if let Some(base2) = container.base2 {
					self.bump_hull_deps(base2);
				}
			}
		}
	}
}
