//! Class pools (§3 "Pool"/"BasePool", §4.4 "allocateInstances", §4.6
//! "Type merge").
//!
//! Grounded on `internal/AbstractPool.h`: the type-independent half of a
//! pool (super/base links, `THH`, `bpo`, deleted/static counts) lives here
//! as plain fields rather than a non-generic base class, since Rust has no
//! use for `AbstractPool` as a separate type from `Pool` once the per-T
//! instance storage the C++ split them over becomes the reflective
//! [`crate::value::Value`] columns in [`field::FieldDeclaration`].

pub mod book;
pub mod field;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use field::FieldDeclaration;

/// `id > 0`: a persistent slot, valid in both the known and file
/// perspective. `id < 0`: a new object, local to the current write's
/// sub-pool numbering. `id == 0`: tombstoned/deleted (§3 "Object identity
/// model").
pub type ObjectId = i32;

/// One object slot: just the identity and a deleted flag, matching
/// `api::Object`'s minimal footprint — field data lives in the owning
/// pool's [`FieldDeclaration`]s, indexed by the same local position.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectSlot {
	pub id: ObjectId,
}

pub struct Pool {
	pub type_id: u32,
	pub name: Arc<str>,
	/// Index into the owning registry's pool list, or `None` at the root.
	pub super_index: Option<usize>,
	/// Index of the base (root ancestor) pool; a pool is its own base.
	pub base_index: usize,
	/// Distance from the base pool, used to test sub/super relationships
	/// without walking the chain (`AbstractPool::THH`).
	pub thh: u32,

	slots: Mutex<book::Book<ObjectSlot>>,
	deleted_count: AtomicU32,
	/// Count of instances known from the last read/write, i.e. excluding
	/// objects created afterward at runtime (`staticDataInstances`).
	static_data_instances: AtomicI32,
	/// This pool's offset into its base pool's unified numbering
	/// (`AbstractPool::bpo`), recomputed at the start of every write.
	bpo: AtomicI32,

	pub fields: Mutex<Vec<FieldDeclaration>>,
}

impl Pool {
	pub fn new(type_id: u32, name: Arc<str>, super_index: Option<usize>, base_index: usize, thh: u32) -> Self {
		Self {
			type_id,
			name,
			super_index,
			base_index,
			thh,
			slots: Mutex::new(book::Book::new()),
			deleted_count: AtomicU32::new(0),
			static_data_instances: AtomicI32::new(0),
			bpo: AtomicI32::new(0),
			fields: Mutex::new(Vec::new()),
		}
	}

	pub fn is_subtype_of(&self, other: &Pool) -> bool {
		self.base_index == other.base_index && self.thh >= other.thh
	}

	/// Reserves `count` fresh, contiguous object slots and returns the
	/// index of the first one. Parallel-safe: each caller gets a disjoint
	/// range (`AbstractPool::allocateInstances`' block parallelism).
	pub fn allocate_block(&self, count: usize, first_id: ObjectId) -> u32 {
		let mut slots = self.slots.lock().unwrap();
        let first = slots.reserve_block(count);
		for i in 0..count as u32 {
			if let Some(slot) = slots.get_mut(first + i) {
				slot.id = first_id + i as i32;
			}
		}
		first
	}

	/// Allocates one new runtime instance, local to the current write
	/// (negative id, per the identity model).
	pub fn make(&self, next_new_id: &AtomicI32) -> ObjectId {
		let id = -next_new_id.fetch_add(1, Ordering::SeqCst);
		let mut slots = self.slots.lock().unwrap();
		let idx = slots.next();
		slots.get_mut(idx).unwrap().id = id;
		id
	}

	pub fn free(&self, slot_index: u32) {
		let mut slots = self.slots.lock().unwrap();
		if let Some(slot) = slots.get_mut(slot_index) {
			slot.id = 0;
		}
		slots.free(slot_index);
		self.deleted_count.fetch_add(1, Ordering::Relaxed);
	}

	pub fn deleted_count(&self) -> u32 {
		self.deleted_count.load(Ordering::Relaxed)
	}

	pub fn static_size(&self) -> i32 {
		self.static_data_instances.load(Ordering::Relaxed)
	}

	pub fn set_static_size(&self, v: i32) {
		self.static_data_instances.store(v, Ordering::Relaxed);
	}

	pub fn bpo(&self) -> i32 {
		self.bpo.load(Ordering::Relaxed)
	}

	pub fn set_bpo(&self, v: i32) {
		self.bpo.store(v, Ordering::Relaxed);
	}

	pub fn slot_count(&self) -> usize {
		self.slots.lock().unwrap().len()
	}

	/// Finds the slot currently holding `id`, by linear scan. `id == 0`
	/// never matches (it is the tombstone marker, not a real object's id).
	/// Used by [`crate::file::File::contains`]/`free`, which only run at
	/// flush/user-call granularity rather than in a per-object hot loop.
	pub fn slot_index_of(&self, id: ObjectId) -> Option<u32> {
		if id == 0 {
			return None;
		}
		let slots = self.slots.lock().unwrap();
		slots.as_slice().iter().position(|s| s.id == id).map(|i| i as u32)
	}

	/// Count of slots that are neither tombstoned (`id == 0`) nor freed —
	/// every object this pool would still write if flushed right now.
	pub fn live_count(&self) -> usize {
		self.slots.lock().unwrap().as_slice().iter().filter(|s| s.id != 0).count()
	}

	/// Drops tombstoned slots from the book and assigns final persistent
	/// ids to any survivor still negative (runtime-created this write),
	/// numbering from `tail` onward — the writer's "walk all live objects,
	/// book-free any tombstoned objects" compaction (§4.7). Resets
	/// `deleted_count` to zero and `static_data_instances` to the survivor
	/// count, since both describe the pool's *next* on-disk state once
	/// this compaction lands. Returns the new tail, the kept slots' old
	/// local indices in their new order (for
	/// [`field::FieldDeclaration::compact`] to permute dense field storage
	/// the same way), and the id remap table for class-ref rewriting.
	pub fn compact_and_renumber(&self, mut tail: i32) -> (i32, Vec<u32>, HashMap<ObjectId, ObjectId>) {
		let mut slots = self.slots.lock().unwrap();
		let old: Vec<ObjectSlot> = slots.as_slice().to_vec();
		let mut kept_old_indices = Vec::with_capacity(old.len());
		let mut new_slots = Vec::with_capacity(old.len());
		let mut remap = HashMap::new();
		for (old_index, slot) in old.iter().enumerate() {
			if slot.id == 0 {
				continue;
			}
			let new_id = if slot.id < 0 {
				tail += 1;
				remap.insert(slot.id, tail);
				tail
			} else {
				slot.id
			};
			kept_old_indices.push(old_index as u32);
			new_slots.push(ObjectSlot { id: new_id });
		}
		let live_count = new_slots.len();
		slots.reset_with(new_slots);
		drop(slots);
		self.deleted_count.store(0, Ordering::Relaxed);
		self.static_data_instances.store(live_count as i32, Ordering::Relaxed);
		(tail, kept_old_indices, remap)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn subtype_check_requires_shared_base_and_greater_or_equal_depth() {
		let root = Pool::new(10, Arc::from("Base"), None, 0, 0);
		let child = Pool::new(11, Arc::from("Child"), Some(0), 0, 1);
		let unrelated = Pool::new(12, Arc::from("Other"), None, 1, 0);
		assert!(child.is_subtype_of(&root));
		assert!(!root.is_subtype_of(&child));
		assert!(!child.is_subtype_of(&unrelated));
	}

	#[test]
	fn allocate_block_assigns_contiguous_ids() {
		let pool = Pool::new(10, Arc::from("Base"), None, 0, 0);
		let first = pool.allocate_block(4, 1);
		assert_eq!(pool.slot_count(), 4);
		assert_eq!(first, 0);
	}
}
