//! Parser driver (§4.6): reads the guard, the `S`/`T`/`F` blocks, merges
//! the file's type graph against the compile-time [`SchemaDef`], then
//! dispatches the `HD` block stream into field/hull storage.
//!
//! Grounded on §4.6's prose directly (no single original source file lays
//! out the whole pipeline better than the spec itself; `merge` and
//! `blocks` already carry their own per-algorithm grounding). The
//! sequential/parallel split follows `concurrent::Pool::runAll` via
//! [`crate::concurrency::run_all`], gated by [`blocks::SEQ_PARSER_LIMIT`]
//! exactly as §4.6 "Sequential vs parallel" describes.

pub mod blocks;
pub mod merge;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::concurrency;
use crate::error::{Error, Result};
use crate::state::creator::{sifa_index_of, SchemaDef};
use crate::state::{FieldTarget, SifaEntry, TypeRegistry};
use crate::stream::MappedInStream;
use crate::strings::{canonical_order, StringPool};
use crate::types::container::{ContainerKind, ContainerType};
use crate::types::enums::EnumPool;
use crate::types::Kcc;
use crate::pool::field::FieldDeclaration;
use crate::pool::Pool;

use merge::{ClassMergeStep, FieldMergeStep, FileClassDesc, FileContainerDesc, FileEnumDesc, FileFieldDesc};

const EMPTY_GUARD: [u8; 2] = [0x22, 0x26];
const NAMED_GUARD_TAG: u8 = b'#';

fn read_guard(stream: &mut MappedInStream) -> Result<()> {
	let first = stream.i8()? as u8;
	if first == EMPTY_GUARD[0] {
		let second = stream.i8()? as u8;
		if second != EMPTY_GUARD[1] {
			return Err(Error::Format("malformed guard".into()));
		}
		return Ok(());
	}
	if first == NAMED_GUARD_TAG {
		loop {
			if stream.i8()? == 0 {
				return Ok(());
			}
		}
	}
	Err(Error::Format("unrecognized guard byte".into()))
}

fn base_and_thh(super_index: Option<usize>, pools: &[Pool], next_index: usize) -> (usize, u32) {
	match super_index {
		Some(i) => (pools[i].base_index, pools[i].thh + 1),
		None => (next_index, 0),
	}
}

/// Parses an OGSS file's bytes against `schema`, producing the unified
/// [`TypeRegistry`] a [`crate::file::File`] wraps. `mmap` is the whole
/// file's backing bytes; string hull entries and lazy payloads slice it
/// directly rather than copying.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub fn parse(mmap: Arc<[u8]>, schema: &SchemaDef) -> Result<TypeRegistry> {
	let mut stream = MappedInStream::new(&mmap);
	read_guard(&mut stream)?;

	let strings = StringPool::read_literals(&mut stream, &schema.literals)?;
	let mut registry = TypeRegistry::empty(strings);

	// T_class
	let class_count = stream.v64()? as usize;
	let mut file_classes = Vec::with_capacity(class_count);
	for _ in 0..class_count {
		let name_id = stream.v64()? as i32;
		let static_instances = stream.v64()?;
		let _attr_count = stream.i8()?;
		let super_id = stream.v64()? as u32;
		let bpo = if super_id != 0 { stream.v64()? } else { 0 };
		let field_count = stream.v64()? as u32;
		let name = registry.strings.get(name_id)?.ok_or_else(|| Error::Format("class name id out of range".into()))?;
		file_classes.push(FileClassDesc { name, static_instances, super_id, bpo, field_count });
	}

	// T_container
	let container_count = stream.v64()? as usize;
	let mut file_containers = Vec::with_capacity(container_count);
	for _ in 0..container_count {
		let kind = ContainerKind::from_u2(stream.i8()? as u32 & 0b11);
		let base1_tid = stream.v64()? as u32;
		let base2_tid = if kind == ContainerKind::Map { Some(stream.v64()? as u32) } else { None };
		file_containers.push(FileContainerDesc { kind, base1_tid, base2_tid });
	}

	// T_enum
	let enum_count = stream.v64()? as usize;
	let mut file_enums = Vec::with_capacity(enum_count);
	for _ in 0..enum_count {
		let name_id = stream.v64()? as i32;
		let name = registry.strings.get(name_id)?.ok_or_else(|| Error::Format("enum name id out of range".into()))?;
		let value_count = stream.v64()? as usize;
		let mut value_names = Vec::with_capacity(value_count);
		for _ in 0..value_count {
			let vid = stream.v64()? as i32;
			value_names.push(registry.strings.get(vid)?.ok_or_else(|| Error::Format("enum value name id out of range".into()))?);
		}
		file_enums.push(FileEnumDesc { name, value_names });
	}

	// F, per file class, in file declaration order (T_class order), read
	// right after the whole T block — §6 "Field block F: per data field
	// (in T_class order)".
	let mut file_fields_by_class: Vec<Vec<FileFieldDesc>> = Vec::with_capacity(class_count);
	for fc in &file_classes {
		let mut fields = Vec::with_capacity(fc.field_count as usize);
		for _ in 0..fc.field_count {
			let name_id = stream.v64()? as i32;
			let type_id = stream.v64()? as u32;
			let _attr_count = stream.i8()?;
			let name = registry.strings.get(name_id)?.ok_or_else(|| Error::Format("field name id out of range".into()))?;
			fields.push(FileFieldDesc { name, type_id });
		}
		file_fields_by_class.push(fields);
	}

	let class_steps = merge::merge_classes(schema, &file_classes)?;

	let name_to_known_index: std::collections::HashMap<&str, usize> = schema.classes.iter().enumerate().map(|(i, c)| (c.name, i)).collect();
	// `fdts`: file-local class index -> pool index, used to resolve later
	// superIDs, which are 1-based positions in the file's own T_class
	// sequence (§4.6 "Pools are registered in a file-TID array").
	let mut fdts: Vec<Option<usize>> = vec![None; file_classes.len()];
	// known schema class index -> pool index, for classes built from the
	// known side (`Matched`/`KnownOnly`).
	let mut fdks: Vec<Option<usize>> = vec![None; schema.classes.len()];

	for step in &class_steps {
		match step {
			ClassMergeStep::Matched { known_index, file_index } => {
				let def = &schema.classes[*known_index];
				let super_index = def.super_name.and_then(|n| name_to_known_index.get(n)).and_then(|ki| fdks[*ki]);
				let (base_index, thh) = base_and_thh(super_index, &registry.pools, registry.pools.len());
				let type_id = registry.claim_type_id();
				let pool = Pool::new(type_id, Arc::from(def.name), super_index, base_index, thh);
				let fc = &file_classes[*file_index];
				pool.set_static_size(fc.static_instances as i32);
				pool.set_bpo(fc.bpo as i32);
				let pool_index = registry.pools.len();
				fdts[*file_index] = Some(pool_index);
				fdks[*known_index] = Some(pool_index);
				registry.sifa.push(SifaEntry::Class(pool_index));
				registry.pools.push(pool);
			}
			ClassMergeStep::KnownOnly { known_index } => {
				let def = &schema.classes[*known_index];
				let super_index = def.super_name.and_then(|n| name_to_known_index.get(n)).and_then(|ki| fdks[*ki]);
				let (base_index, thh) = base_and_thh(super_index, &registry.pools, registry.pools.len());
				let type_id = registry.claim_type_id();
				let pool = Pool::new(type_id, Arc::from(def.name), super_index, base_index, thh);
				let pool_index = registry.pools.len();
				fdks[*known_index] = Some(pool_index);
				registry.sifa.push(SifaEntry::Class(pool_index));
				registry.pools.push(pool);
			}
			ClassMergeStep::FileOnly { file_index, .. } => {
				let fc = &file_classes[*file_index];
				let super_index = match fc.super_id {
					0 => None,
					sid => {
						let fi = (sid - 1) as usize;
						Some(fdts.get(fi).copied().flatten().ok_or_else(|| Error::Format("corrupted super reference".into()))?)
					}
				};
				let (base_index, thh) = base_and_thh(super_index, &registry.pools, registry.pools.len());
				let type_id = registry.claim_type_id();
				let pool = Pool::new(type_id, fc.name.clone(), super_index, base_index, thh);
				pool.set_static_size(fc.static_instances as i32);
				pool.set_bpo(fc.bpo as i32);
				let pool_index = registry.pools.len();
				fdts[*file_index] = Some(pool_index);
				registry.sifa.push(SifaEntry::Class(pool_index));
				registry.pools.push(pool);
			}
		}
	}

	// Field merge, one class at a time, in the same step order the pools
	// were just built in (field ids must be claimed in a fixed order on
	// both read and write, §4.4).
	for step in &class_steps {
		match step {
			ClassMergeStep::Matched { known_index, file_index } => {
				let pool_index = fdts[*file_index].unwrap();
				let class_def = &schema.classes[*known_index];
				let non_auto: Vec<_> = class_def.fields.iter().filter(|f| !f.auto).copied().collect();
				let file_fields = &file_fields_by_class[*file_index];
				let size = file_classes[*file_index].static_instances as usize;
				for merge_step in merge::merge_fields(&non_auto, file_fields) {
					match merge_step {
						FieldMergeStep::Adopted { known_field_index } => {
							let fd = non_auto[known_field_index];
							push_data_field(&mut registry, pool_index, fd.name, fd.field_type, size);
						}
						FieldMergeStep::Unknown { file_field } => {
							let field_type = registry
								.field_type_for_type_id(file_field.type_id)
								.ok_or_else(|| Error::Schema(format!("unknown field type id {}", file_field.type_id)))?;
							push_lazy_field(&mut registry, pool_index, file_field.name, field_type, size);
						}
						FieldMergeStep::KnownOnly { known_field_index } => {
							let fd = non_auto[known_field_index];
							push_data_field(&mut registry, pool_index, fd.name, fd.field_type, 0);
						}
					}
				}
				for fd in class_def.fields.iter().filter(|f| f.auto) {
					registry.pools[pool_index].fields.lock().unwrap().push(FieldDeclaration::new_auto(0, Arc::from(fd.name), fd.field_type));
				}
			}
			ClassMergeStep::KnownOnly { known_index } => {
				let pool_index = fdks[*known_index].unwrap();
				let class_def = &schema.classes[*known_index];
				for fd in &class_def.fields {
					if fd.auto {
						registry.pools[pool_index].fields.lock().unwrap().push(FieldDeclaration::new_auto(0, Arc::from(fd.name), fd.field_type));
					} else {
						push_data_field(&mut registry, pool_index, fd.name, fd.field_type, 0);
					}
				}
			}
			ClassMergeStep::FileOnly { file_index, .. } => {
				let pool_index = fdts[*file_index].unwrap();
				let size = file_classes[*file_index].static_instances as usize;
				for merge_step in merge::merge_fields(&[], &file_fields_by_class[*file_index]) {
					if let FieldMergeStep::Unknown { file_field } = merge_step {
						let field_type = registry
							.field_type_for_type_id(file_field.type_id)
							.ok_or_else(|| Error::Schema(format!("unknown field type id {}", file_field.type_id)))?;
						push_lazy_field(&mut registry, pool_index, file_field.name, field_type, size);
					}
				}
			}
		}
	}

	// T_container merge (§4.6 "Container merge"): known KCCs are already
	// UCC-ordered by construction; file containers are matched by kind.
	for (known_idx, file_idx) in merge::merge_containers(&schema.containers, &file_containers) {
		let (kind, base1, base2, kcc) = match (known_idx, file_idx) {
			(Some(ki), _) => {
				let def = &schema.containers[ki];
				let kcc = Kcc::new(def.kind, sifa_index_of(def.base1), def.base2.map(sifa_index_of).unwrap_or(0));
				(def.kind, def.base1, def.base2, Some(kcc))
			}
			(None, Some(fi)) => {
				let fc = &file_containers[fi];
				let base1 = registry.field_type_for_type_id(fc.base1_tid).ok_or_else(|| Error::Format("unresolvable container base type".into()))?;
				let base2 = match fc.base2_tid {
					Some(t) => Some(registry.field_type_for_type_id(t).ok_or_else(|| Error::Format("unresolvable container value type".into()))?),
					None => None,
				};
				(fc.kind, base1, base2, None)
			}
			(None, None) => unreachable!(),
		};
		let type_id = registry.claim_type_id();
		registry.sifa.push(SifaEntry::Container(registry.containers.len()));
		registry.containers.push(ContainerType::new(type_id, kind, base1, base2, kcc));
	}

	// T_enum merge (§4.6 "Enum merge"): lockstep by canonical name.
	let (mut ei, mut fi) = (0usize, 0usize);
	while ei < schema.enums.len() || fi < file_enums.len() {
		let cmp = match (schema.enums.get(ei), file_enums.get(fi)) {
			(Some(k), Some(f)) => canonical_order(&f.name, k.name),
			(Some(_), None) => Ordering::Less,
			(None, Some(_)) => Ordering::Greater,
			(None, None) => unreachable!(),
		};
		let type_id = registry.claim_type_id();
		let pool = match cmp {
			Ordering::Less => {
				let p = EnumPool::from_known(type_id, Arc::from(schema.enums[ei].name), &schema.enums[ei].values);
				ei += 1;
				p
			}
			Ordering::Greater => {
				let p = EnumPool::from_file_only(type_id, file_enums[fi].name.clone(), &file_enums[fi].value_names);
				fi += 1;
				p
			}
			Ordering::Equal => {
				let p = merge::merge_enum(type_id, &schema.enums[ei], &file_enums[fi]);
				ei += 1;
				fi += 1;
				p
			}
		};
		registry.sifa.push(SifaEntry::Enum(registry.enums.len()));
		registry.enums.push(pool);
	}

	registry.fix_container_max_deps();
	registry.assign_hull_field_ids();

	// Size propagation (§4.6): reverse walk accumulates each pool's static
	// size into its super's, yielding the dynamic size of every subtree.
	let mut cached_size = vec![0i32; registry.pools.len()];
	for (i, p) in registry.pools.iter().enumerate() {
		cached_size[i] = p.static_size();
	}
	for i in (0..registry.pools.len()).rev() {
		if let Some(si) = registry.pools[i].super_index {
			let size = cached_size[i];
			cached_size[si] += size;
		}
	}

	// Allocation: reserve persistent slots for every pool's static range,
	// ids running `bpo+1 ..= bpo+size` (§3 "Object identity model": a
	// persistent slot's id is always > 0).
	for pool in &registry.pools {
		let size = pool.static_size();
		if size > 0 {
			pool.allocate_block(size as usize, pool.bpo() + 1);
		}
	}

	// HD block dispatch.
	let mut jobs: Vec<Box<dyn FnOnce() -> Result<()> + Send + '_>> = Vec::new();
	while !stream.eof() {
		let size_minus_2 = stream.v64()? as usize;
		let block_len = size_minus_2 + 2;
		let mut block = stream.view(block_len)?;
		let field_id = block.v32()? as u32;
		let registry_ref = &registry;
		let cached_size_ref = &cached_size;
		jobs.push(Box::new(move || dispatch_hd_block(field_id, block, registry_ref, cached_size_ref)));
	}

	if mmap.len() < blocks::SEQ_PARSER_LIMIT {
		for job in jobs {
			job()?;
		}
	} else {
		let sink = concurrency::run_all(jobs);
		if sink.has_errors() {
			return Err(Error::Worker(sink.take()));
		}
	}

	Ok(registry)
}

fn push_data_field(registry: &mut TypeRegistry, pool_index: usize, name: &str, field_type: crate::types::FieldType, size: usize) {
	let field_id = registry.claim_field_id();
	let field_index = registry.pools[pool_index].fields.lock().unwrap().len();
	registry.bump_hull_deps(field_type);
	registry.register_field_target(field_id, FieldTarget::Data { pool_index, field_index });
	let declaration = FieldDeclaration::new_data(field_id, Arc::from(name), field_type, size);
	registry.pools[pool_index].fields.lock().unwrap().push(declaration);
}

/// As [`push_data_field`], but for a field the compile-time schema does
/// not know (§4.6 "Field merge": file-ahead case). Stored as a
/// [`crate::pool::field::FieldKind::Lazy`] field carrying the file's own
/// type; its backing values are filled eagerly when its HD block is
/// read rather than deferred to first access — a deliberate narrowing of
/// `LazyField`'s on-demand contract, recorded in `DESIGN.md`.
fn push_lazy_field(registry: &mut TypeRegistry, pool_index: usize, name: Arc<str>, field_type: crate::types::FieldType, size: usize) {
	let field_id = registry.claim_field_id();
	let field_index = registry.pools[pool_index].fields.lock().unwrap().len();
	registry.bump_hull_deps(field_type);
	registry.register_field_target(field_id, FieldTarget::Data { pool_index, field_index });
	// Matches the `id_base` convention `dispatch_hd_block` uses for `Data`
	// fields: position 0 is the first real id of this pool's own subtree.
	let first_id = registry.pools[pool_index].bpo() + 1;
	let declaration = FieldDeclaration::new_lazy(field_id, name, field_type, first_id, size);
	registry.pools[pool_index].fields.lock().unwrap().push(declaration);
}

/// Decodes one `HD` record's payload, already sliced to its exact byte
/// span, per the field id's resolved target.
fn dispatch_hd_block(field_id: u32, mut block: MappedInStream, registry: &TypeRegistry, cached_size: &[i32]) -> Result<()> {
	match registry.resolve_field_target(field_id).ok_or_else(|| Error::Format(format!("HD block references unknown field id {field_id}")))? {
		FieldTarget::StringHull => registry.strings.read_tail(&mut block)?,
		FieldTarget::Data { pool_index, field_index } => {
			let pool = &registry.pools[pool_index];
			let total = cached_size[pool_index] as usize;
			// `id_base` is the real id of dense position 0: the field's array
			// spans this pool's whole dynamic subtree, and that subtree's ids
			// start right after this pool's own bpo (the declaring pool is
			// always the subtree's root).
			let id_base = pool.bpo() + 1;
			let fields = pool.fields.lock().unwrap();
			let field = &fields[field_index];
			if total > blocks::FD_THRESHOLD {
				let block_index = block.v32()? as usize;
				let start = block_index * blocks::FD_THRESHOLD;
				let end = total.min((block_index + 1) * blocks::FD_THRESHOLD);
				blocks::read_field_block(field, start, end - start, id_base + start as i32, &mut block, registry)?;
			} else {
				blocks::read_field_block(field, 0, total, id_base, &mut block, registry)?;
			}
		}
		FieldTarget::Hull { container_index } => {
			let container = &registry.containers[container_index];
			// The leading v32 is this hull's instance count, not a flat
			// element count: each instance's own length is carried inline
			// by `blocks::read_hull_block` (see its doc comment). Larger
			// hulls additionally carry a block index ahead of the count,
			// which a single-block-per-hull writer never needs to split
			// across; we read and discard it for forward compatibility.
			let since = container.hull.known_size();
			let first = block.v32()? as usize;
			let instance_count = if first > blocks::HD_THRESHOLD {
				let _block_index = block.v32()?;
				block.v32()? as usize
			} else {
				first
			};
			container.hull.allocate(instance_count, container.kind);
			let instances = container.hull.instances_since(since);
			blocks::read_hull_block(container.kind, container.base1, container.base2, &instances, &mut block, registry)?;
		}
	}
	// §4.9 fatality: a non-lazy read task must consume its whole block.
	// This port has no on-demand lazy path at parse time (`push_lazy_field`'s
	// doc comment: unknown fields are decoded eagerly too), so every target
	// above is non-lazy and this check applies uniformly.
	if !block.eof() {
		return Err(Error::Format(format!("HD block for field id {field_id} left unconsumed bytes")));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::creator::{ClassDef, FieldDef};
	use crate::types::FieldType;
	use crate::varint::{encode_v32, encode_v64};

	fn schema_with_one_class() -> SchemaDef {
		SchemaDef {
			classes: vec![ClassDef { name: "N", super_name: None, fields: vec![FieldDef { name: "x", field_type: FieldType::I32, auto: false }] }],
			containers: vec![],
			enums: vec![],
			literals: vec!["N", "x"],
		}
	}

	#[test]
	fn empty_file_parses_to_no_pools_beyond_schema() {
		let bytes: Vec<u8> = vec![0x22, 0x26, 0x00, 0x00, 0x00, 0x00];
		let registry = parse(Arc::from(bytes.into_boxed_slice()), &SchemaDef::default()).unwrap();
		assert!(registry.pools.is_empty());
	}

	#[test]
	fn single_class_with_one_field_round_trips_into_storage() {
		let mut bytes = Vec::new();
		bytes.extend_from_slice(&EMPTY_GUARD);
		encode_v64(2, &mut bytes); // S: 2 literals
		encode_v64(1, &mut bytes);
		bytes.push(b'N');
		encode_v64(1, &mut bytes);
		bytes.push(b'x');
		encode_v64(1, &mut bytes); // T_class count
		encode_v32(1, &mut bytes); // nameID(N)
		encode_v64(1, &mut bytes); // staticInstances
		bytes.push(0); // attrCount
		encode_v64(0, &mut bytes); // superID = 0, no bpo follows
		encode_v64(1, &mut bytes); // fieldCount
		encode_v64(0, &mut bytes); // T_container count
		encode_v64(0, &mut bytes); // T_enum count
		encode_v32(2, &mut bytes); // F: nameID(x)
		encode_v64(3, &mut bytes); // typeID = i32
		bytes.push(0); // attrCount

		let mut payload = Vec::new();
		payload.extend_from_slice(&42i32.to_le_bytes());
		let mut header = Vec::new();
		encode_v32(1, &mut header); // field id 1
		let record_len = header.len() + payload.len();
		encode_v64((record_len - 2) as i64, &mut bytes);
		bytes.extend_from_slice(&header);
		bytes.extend_from_slice(&payload);

		let registry = parse(Arc::from(bytes.into_boxed_slice()), &schema_with_one_class()).unwrap();
		assert_eq!(registry.pools.len(), 1);
		let fields = registry.pools[0].fields.lock().unwrap();
		assert!(matches!(fields[0].get(0, 1), crate::value::Value::I32(42)));
	}
}
