//! Write-time `bpo`/id compaction (§4.7 "compress").
//!
//! Grounded on `internal/Writer.cpp`'s static `Writer::compress`: before any
//! T/F/HD bytes are emitted, every base-pool subtree recomputes its
//! sub-pools' `bpo` offsets and `cachedSize`s (the same reverse
//! accumulation the parser runs in `parser::parse`, just run again here
//! because a program may have allocated or changed sizes since the file was
//! read), assigns persistent ids to any object created at runtime since (a
//! negative id, per §3 "Object identity model"), and book-frees any
//! tombstoned object (`id == 0`, set by [`crate::file::File::free`]) via the
//! same `allObjects()`-style walk the original runs, so a freed object's
//! slot and field value are dropped from the file entirely rather than
//! merely skipped.
//!
//! `Value::Ref` fields typed `Class(tid)` are remapped to their subtree's
//! fresh id, if one was assigned, by the caller (`writer::write_value`)
//! using the table this returns. `AnyRef` fields are not remapped (the
//! stored `pool` tag is the ambiguous constant `TID_ANY_REF`, not a specific
//! class, so there is no subtree to look the old id up in) — a known,
//! documented simplification.

use std::collections::HashMap;

use crate::pool::ObjectId;
use crate::state::TypeRegistry;

/// Keyed by the subtree's base pool index; `HashMap<old_id, new_id>`,
/// populated only for pools that had runtime-created (negative-id) objects.
pub type RemapTable = HashMap<usize, HashMap<ObjectId, ObjectId>>;

/// Recomputes `bpo`/cached sizes across every base-pool subtree and assigns
/// final ids to runtime-created objects. Returns the per-pool dynamic size
/// (indexed the same way `parser::parse`'s `cached_size` is) and the remap
/// table for any subtree that had new objects.
pub fn compress(registry: &TypeRegistry) -> (Vec<i32>, RemapTable) {
	let mut cached_size = vec![0i32; registry.pools.len()];
	let mut remaps = RemapTable::new();

	let mut subtrees: Vec<Vec<usize>> = Vec::new();
	for (i, p) in registry.pools.iter().enumerate() {
		if p.super_index.is_none() {
			let mut members: Vec<usize> = registry.pools.iter().enumerate().filter(|(_, q)| q.base_index == i).map(|(j, _)| j).collect();
			members.sort_unstable();
			subtrees.push(members);
		}
	}

	for subtree in &subtrees {
		// Tombstoned slots (`id == 0`) never reach the file, so a pool's
		// contribution to this write's size is its *live* count, not its
		// last-known `static_size()` — this is also what makes
		// `cachedSize_new = staticSize() - deletedCount` (§4.7) come out
		// right in the common case where every tombstone sits inside the
		// pool's originally-declared range.
		let mut next_offset = 0i32;
		let mut bpos = vec![0i32; subtree.len()];
		for (k, &pi) in subtree.iter().enumerate() {
			bpos[k] = next_offset;
			let own_live = registry.pools[pi].live_count() as i32;
			cached_size[pi] = own_live;
			next_offset += own_live;
		}
		// reverse-accumulate into supers, identical to the parser's size
		// propagation: a subtype's dynamic size folds into its super's.
		for &pi in subtree.iter().rev() {
			if let Some(si) = registry.pools[pi].super_index {
				let size = cached_size[pi];
				cached_size[si] += size;
			}
		}

		let mut tail = next_offset;
		let mut subtree_remap: HashMap<ObjectId, ObjectId> = HashMap::new();
		for &pi in subtree {
			let pool = &registry.pools[pi];
			let (new_tail, kept_old_indices, remap) = pool.compact_and_renumber(tail);
			tail = new_tail;
			subtree_remap.extend(remap);
			for field in pool.fields.lock().unwrap().iter() {
				field.compact(&kept_old_indices);
			}
		}
		if !subtree_remap.is_empty() {
			remaps.insert(subtree[0], subtree_remap);
		}

		for (k, &pi) in subtree.iter().enumerate() {
			registry.pools[pi].set_bpo(bpos[k]);
		}
	}

	(cached_size, remaps)
}

/// Looks up the final id for a `Class(tid)`-typed reference, consulting the
/// remap table for that class's subtree. Ids that were never renumbered
/// (everything but a freshly `make`d object) pass through unchanged.
pub fn remap_class_ref(registry: &TypeRegistry, tid: u32, id: ObjectId, remaps: &RemapTable) -> ObjectId {
	if id == 0 {
		return 0;
	}
	let Some(pool_index) = registry.pools.iter().position(|p| p.type_id == tid) else {
		return id;
	};
	let base_index = registry.pools[pool_index].base_index;
	remaps.get(&base_index).and_then(|m| m.get(&id)).copied().unwrap_or(id)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	fn single_pool_registry() -> TypeRegistry {
		let strings = crate::strings::StringPool::from_literals(&[]);
		let mut registry = TypeRegistry::empty(strings);
		let pool = crate::pool::Pool::new(10, Arc::from("N"), None, 0, 0);
		pool.set_static_size(2);
		pool.allocate_block(2, 1);
		registry.pools.push(pool);
		registry
	}

	#[test]
	fn compress_recomputes_bpo_for_a_single_base_pool() {
		let registry = single_pool_registry();
		let (cached_size, _remaps) = compress(&registry);
		assert_eq!(cached_size[0], 2);
		assert_eq!(registry.pools[0].bpo(), 0);
	}

	#[test]
	fn compress_assigns_final_ids_to_new_objects() {
		let registry = single_pool_registry();
		let next_new_id = std::sync::atomic::AtomicI32::new(0);
		let new_id = registry.pools[0].make(&next_new_id);
		assert!(new_id < 0);

		let (_cached_size, remaps) = compress(&registry);
		let base_index = registry.pools[0].base_index;
		let table = remaps.get(&base_index).expect("a subtree with a new object has a remap entry");
		let mapped = *table.get(&new_id).unwrap();
		assert!(mapped > 0);
		assert_eq!(remap_class_ref(&registry, registry.pools[0].type_id, new_id, &remaps), mapped);
	}

	#[test]
	fn unrenumbered_ids_pass_through_remap_unchanged() {
		let registry = single_pool_registry();
		let (_cached_size, remaps) = compress(&registry);
		assert_eq!(remap_class_ref(&registry, registry.pools[0].type_id, 1, &remaps), 1);
		assert_eq!(remap_class_ref(&registry, registry.pools[0].type_id, 0, &remaps), 0);
	}
}
