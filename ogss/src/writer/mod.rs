//! Write driver (§4.7 "Writer"): guard, `S`/`T`/`F` blocks, then
//! dependency-ordered `HD` blocks.
//!
//! Grounded on `internal/Writer.h`/`Writer.cpp`'s `Writer` constructor (the
//! overall pipeline), `Writer::writeField` (per-field HD framing) and
//! `Writer::writeHull` (per-hull HD framing, including the `deps`-driven
//! "write the dependent before its base" ordering). The original forks one
//! `std::async` task per field/hull and joins as `deps` counters hit zero;
//! this port runs the same dependency graph through a single-threaded
//! worklist, since OGSS's hull write order only needs to be a valid
//! topological order, not literally concurrent (the already-built
//! `deps`/`max_deps`/`decrement_deps` counters on [`crate::types::container::HullType`]
//! and [`crate::strings::StringPool`] are reused unchanged from that
//! ordering logic; only the driver loop around them is simplified, matching
//! the `concurrency::run_all` → `std::thread::scope` simplification already
//! made for the parser).

pub mod compress;

use std::collections::VecDeque;
use std::path::Path;

use crate::error::{Error, Result};
use crate::pool::field::Restriction;
use crate::state::TypeRegistry;
use crate::stream::{BufferedOutStream, FileOutStream};
use crate::types::container::{ContainerData, ContainerKind};
use crate::types::FieldType;
use crate::value::Value;

use compress::RemapTable;

const EMPTY_GUARD: [u8; 2] = [0x22, 0x26];

/// Writes `registry`'s whole state to a fresh file at `path`. `guard`, if
/// non-empty, is stored as the named-guard string (§6 "Guard"); an empty
/// guard writes the two-byte empty-guard marker instead.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub fn write(path: &Path, registry: &TypeRegistry, guard: &str) -> Result<()> {
	registry.strings.reset_ids_for_write();
	for container in &registry.containers {
		if container.hull.max_deps() > 0 {
			container.hull.reset_ids();
			container.hull.arm_deps();
		}
	}
	let (cached_size, remaps) = compress::compress(registry);
	check_restrictions(registry, &cached_size)?;

	let mut out = FileOutStream::create(path)?;
	write_guard(&mut out, guard)?;
	registry.strings.write_literals(&mut out)?;

	let mut tf = BufferedOutStream::new();
	write_t_class(&mut tf, registry);
	write_t_container(&mut tf, registry);
	write_t_enum(&mut tf, registry);
	let field_order = write_f_block(&mut tf, registry);
	out.write(tf)?;

	let mut ready_hulls: VecDeque<usize> = VecDeque::new();
	for (pool_index, field_index) in field_order {
		write_field(&mut out, registry, &remaps, &cached_size, pool_index, field_index)?;
		let field_type = registry.pools[pool_index].fields.lock().unwrap()[field_index].field_type;
		notify_consumed(registry, field_type, &mut ready_hulls);
	}
	while let Some(container_index) = ready_hulls.pop_front() {
		write_hull(&mut out, registry, &remaps, container_index)?;
		let container = &registry.containers[container_index];
		notify_consumed(registry, container.base1, &mut ready_hulls);
		if let Some(base2) = container.base2 {
			notify_consumed(registry, base2, &mut ready_hulls);
		}
	}

	if registry.strings.max_deps() > 0 {
		let mut tail = BufferedOutStream::new();
		tail.v64(0); // field id 0: the string hull's reserved id
		let empty = registry.strings.write_tail(&mut tail)?;
		if !empty {
			out.write_sized(tail)?;
		}
	}

	out.finish()
}

/// Runs each field's declared [`Restriction`]s against its current dense
/// storage before anything is written, aggregating violations the same way
/// `ErrorSink` aggregates worker failures (Design Note "Restriction checks").
/// Only `NON_NULL` is actually checkable against this runtime's storage;
/// `DEFAULT`/`RANGE`/`CONSTANT_LENGTH_POINTER`/`CODED` describe constraints on
/// value content or wire shape this port has no validator for yet and are
/// accepted as declared without enforcement.
fn check_restrictions(registry: &TypeRegistry, cached_size: &[i32]) -> Result<()> {
	let mut violations = Vec::new();
	for (pool_index, pool) in registry.pools.iter().enumerate() {
		let total = cached_size[pool_index] as usize;
		let fields = pool.fields.lock().unwrap();
		for field in fields.iter() {
			if field.restrictions.contains(Restriction::NON_NULL) {
				if let Some(local_index) = field.first_null_in_range(total) {
					violations.push(format!("field '{}' of pool '{}' is non-null but slot {} is null", field.name, pool.name, local_index));
				}
			}
		}
	}
	if violations.is_empty() {
		Ok(())
	} else {
		Err(Error::Worker(violations))
	}
}

fn write_guard(out: &mut FileOutStream, guard: &str) -> Result<()> {
	if guard.is_empty() {
		out.i8(EMPTY_GUARD[0] as i8)?;
		out.i8(EMPTY_GUARD[1] as i8)?;
	} else {
		out.i8(b'#' as i8)?;
		out.put(guard.as_bytes())?;
		out.i8(0)?;
	}
	Ok(())
}

/// Interns `s` if necessary and returns its stable string id, for writing
/// class/field/container/enum names that may not already be literals.
fn sid(registry: &TypeRegistry, s: &str) -> i64 {
	let interned = registry.strings.add(s);
	registry.strings.id_of(&interned).expect("add() always leaves the string interned") as i64
}

fn write_t_class(tf: &mut BufferedOutStream, registry: &TypeRegistry) {
	tf.v64(registry.pools.len() as i64);
	for pool in &registry.pools {
		tf.v64(sid(registry, &pool.name));
		tf.v64(pool.static_size() as i64);
		tf.i8(0); // attrCount: the custom-attribute extension is unused (§6 Non-goal)
		match pool.super_index {
			None => tf.v64(0),
			Some(super_index) => {
				// superID is 1-based position in this same T_class sequence.
				tf.v64(super_index as i64 + 1);
				tf.v64(pool.bpo() as i64);
			}
		}
		let field_count = pool.fields.lock().unwrap().iter().filter(|f| !matches!(f.kind, crate::pool::field::FieldKind::Auto)).count();
		tf.v64(field_count as i64);
	}
}

fn write_t_container(tf: &mut BufferedOutStream, registry: &TypeRegistry) {
	let live: Vec<usize> = registry.containers.iter().enumerate().filter(|(_, c)| c.hull.max_deps() > 0).map(|(i, _)| i).collect();
	tf.v64(live.len() as i64);
	for &i in &live {
		let c = &registry.containers[i];
		tf.i8(c.kind.write_tag() as i8);
		tf.v64(c.base1.type_id() as i64);
		if c.kind == ContainerKind::Map {
			tf.v64(c.base2.expect("map container has a value type").type_id() as i64);
		}
	}
}

fn write_t_enum(tf: &mut BufferedOutStream, registry: &TypeRegistry) {
	tf.v64(registry.enums.len() as i64);
	for e in &registry.enums {
		tf.v64(sid(registry, &e.name));
		tf.v64(e.values().len() as i64);
		for constant in e.values() {
			tf.v64(sid(registry, &constant.name));
		}
	}
}

/// Emits the `F` block (one entry per non-auto field, grouped by pool in
/// `T_class` order) and returns the `(pool_index, field_index)` pairs in
/// the exact order their HD blocks must be written, matching the order
/// field ids were claimed in (§4.4's field-id determinism).
fn write_f_block(tf: &mut BufferedOutStream, registry: &TypeRegistry) -> Vec<(usize, usize)> {
	let mut order = Vec::new();
	for (pool_index, pool) in registry.pools.iter().enumerate() {
		let fields = pool.fields.lock().unwrap();
		for (field_index, field) in fields.iter().enumerate() {
			if matches!(field.kind, crate::pool::field::FieldKind::Auto) {
				continue;
			}
			tf.v64(sid(registry, &field.name));
			tf.v64(field.field_type.type_id() as i64);
			tf.i8(0); // attrCount
			order.push((pool_index, field_index));
		}
	}
	order
}

fn notify_consumed(registry: &TypeRegistry, field_type: FieldType, ready: &mut VecDeque<usize>) {
	if let FieldType::Container(tid) = field_type {
		if let Some(container_index) = registry.containers.iter().position(|c| c.type_id == tid) {
			if registry.containers[container_index].hull.decrement_deps() {
				ready.push_back(container_index);
			}
		}
	}
}

fn write_field(
	out: &mut FileOutStream,
	registry: &TypeRegistry,
	remaps: &RemapTable,
	cached_size: &[i32],
	pool_index: usize,
	field_index: usize,
) -> Result<()> {
	let pool = &registry.pools[pool_index];
	let total = cached_size[pool_index] as usize;
	if total == 0 {
		return Ok(());
	}
	let fields = pool.fields.lock().unwrap();
	let field = &fields[field_index];

	if total > crate::parser::blocks::FD_THRESHOLD {
		let block_count = (total - 1) / crate::parser::blocks::FD_THRESHOLD + 1;
		for block_index in 0..block_count {
			let start = block_index * crate::parser::blocks::FD_THRESHOLD;
			let end = total.min(start + crate::parser::blocks::FD_THRESHOLD);
			let mut buf = BufferedOutStream::new();
			buf.v64(field.field_id as i64);
			buf.v64(block_index as i64);
			let all_default = field.write_range(start, end, &mut buf, |v, o| write_value(v, field.field_type, o, registry, remaps));
			if !all_default {
				out.write_sized(buf)?;
			}
		}
	} else {
		let mut buf = BufferedOutStream::new();
		buf.v64(field.field_id as i64);
		let all_default = field.write_range(0, total, &mut buf, |v, o| write_value(v, field.field_type, o, registry, remaps));
		if !all_default {
			out.write_sized(buf)?;
		}
	}
	Ok(())
}

fn write_hull(out: &mut FileOutStream, registry: &TypeRegistry, remaps: &RemapTable, container_index: usize) -> Result<()> {
	let container = &registry.containers[container_index];
	let count = container.hull.known_size();
	if count == 0 {
		return Ok(());
	}

	let emit = |buf: &mut BufferedOutStream| {
		buf.v64(container.hull.field_id() as i64);
		buf.v64(count as i64);
		if count > crate::parser::blocks::HD_THRESHOLD {
			// matches the parser's `first > HD_THRESHOLD` branch, which
			// discards `first` and re-reads the instance count after a
			// block index; a single-block writer always reports block 0.
			buf.v64(0);
			buf.v64(count as i64);
		}
		for ordinal in 1..=count as i32 {
			let handle = container.hull.get(ordinal).expect("ordinal within known_size always resolves");
			let data = handle.lock().unwrap();
			buf.v64(data.len() as i64);
			write_container_elements(&data, container.kind, container.base1, container.base2, buf, registry, remaps);
		}
	};

	// One HD block per hull regardless of size: a blocked hull write
	// (several HD records sharing one field id, each carrying its own
	// block index ahead of the count) is a valid encoding this runtime
	// only reads, never emits (§4.6's "larger hulls additionally carry a
	// block index" note in the parser).
	let mut buf = BufferedOutStream::new();
	emit(&mut buf);
	out.write_sized(buf)
}

fn write_container_elements(
	data: &ContainerData,
	kind: ContainerKind,
	base1: FieldType,
	base2: Option<FieldType>,
	out: &mut BufferedOutStream,
	registry: &TypeRegistry,
	remaps: &RemapTable,
) {
	match (kind, data) {
		(ContainerKind::Array, ContainerData::Array(v)) | (ContainerKind::Set, ContainerData::Set(v)) => {
			for value in v {
				write_value(value, base1, out, registry, remaps);
			}
		}
		(ContainerKind::List, ContainerData::List(v)) => {
			for value in v {
				write_value(value, base1, out, registry, remaps);
			}
		}
		(ContainerKind::Map, ContainerData::Map(v)) => {
			let value_type = base2.expect("map container has a value type");
			for (k, val) in v {
				write_value(k, base1, out, registry, remaps);
				write_value(val, value_type, out, registry, remaps);
			}
		}
		_ => unreachable!("a container's stored ContainerData variant always matches its own kind"),
	}
}

/// Encodes one value of `field_type`. Returns `true` iff the written value
/// was the type's wire default (null ref/string/enum/container, zero
/// scalar), the "all default" signal [`FieldDeclaration::write_range`]
/// folds across a field to decide whether to suppress the whole HD block.
fn write_value(value: &Value, field_type: FieldType, out: &mut BufferedOutStream, registry: &TypeRegistry, remaps: &RemapTable) -> bool {
	match field_type {
		FieldType::Bool => {
			let v = matches!(value, Value::Bool(true));
			out.boolean(v);
			!v
		}
		FieldType::I8 => {
			let v = if let Value::I8(v) = value { *v } else { 0 };
			out.i8(v);
			v == 0
		}
		FieldType::I16 => {
			let v = if let Value::I16(v) = value { *v } else { 0 };
			out.i16(v);
			v == 0
		}
		FieldType::I32 => {
			let v = if let Value::I32(v) = value { *v } else { 0 };
			out.i32(v);
			v == 0
		}
		FieldType::I64 => {
			let v = if let Value::I64(v) = value { *v } else { 0 };
			out.i64(v);
			v == 0
		}
		FieldType::V64 => {
			let v = if let Value::V64(v) = value { *v } else { 0 };
			out.v64(v);
			v == 0
		}
		FieldType::F32 => {
			let v = if let Value::F32(v) = value { *v } else { 0.0 };
			out.f32(v);
			v == 0.0
		}
		FieldType::F64 => {
			let v = if let Value::F64(v) = value { *v } else { 0.0 };
			out.f64(v);
			v == 0.0
		}
		FieldType::AnyRef => {
			let id = if let Value::Ref { id, .. } = value { *id } else { 0 };
			out.v64(id as i64);
			id == 0
		}
		FieldType::Class(tid) => {
			let id = match value {
				Value::Ref { id, .. } => compress::remap_class_ref(registry, tid, *id, remaps),
				_ => 0,
			};
			out.v64(id as i64);
			id == 0
		}
		FieldType::String => match value {
			Value::String(s) => {
				let interned = registry.strings.add(s);
				let id = registry.strings.id_of(&interned).unwrap_or(0);
				out.v64(id as i64);
				false
			}
			_ => {
				out.i8(0);
				true
			}
		},
		FieldType::Enum(tid) => {
			let pool = registry.enums.iter().find(|e| e.type_id == tid).expect("field type names a registered enum");
			match value {
				Value::Enum(c) => pool.write(Some(c), out),
				_ => pool.write(None, out),
			}
		}
		FieldType::Container(tid) => match value {
			Value::Container(handle) => {
				let container = registry.container_by_type_id(tid).expect("field type names a registered container");
				let id = container.hull.id_of(handle);
				out.v64(id as i64);
				false
			}
			_ => {
				out.i8(0);
				true
			}
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::creator::{ClassDef, FieldDef, SchemaDef};

	fn schema_with_one_field() -> SchemaDef {
		SchemaDef {
			classes: vec![ClassDef { name: "N", super_name: None, fields: vec![FieldDef { name: "x", field_type: FieldType::I32, auto: false }] }],
			containers: vec![],
			enums: vec![],
			literals: vec!["N", "x"],
		}
	}

	#[test]
	fn writing_an_empty_state_produces_a_readable_file() {
		let registry = crate::state::creator::build(&schema_with_one_field());
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("empty.ogss");
		write(&path, &registry, "").unwrap();

		let bytes = std::fs::read(&path).unwrap();
		assert_eq!(&bytes[0..2], &EMPTY_GUARD);

		let mmap: std::sync::Arc<[u8]> = std::sync::Arc::from(bytes.into_boxed_slice());
		let reread = crate::parser::parse(mmap, &schema_with_one_field()).unwrap();
		assert_eq!(reread.pools.len(), 1);
		assert_eq!(reread.pools[0].static_size(), 0);
	}

	#[test]
	fn a_populated_field_round_trips_through_write_and_parse() {
		let registry = crate::state::creator::build(&schema_with_one_field());
		registry.pools[0].set_static_size(1);
		registry.pools[0].allocate_block(1, 1);
		{
			let fields = registry.pools[0].fields.lock().unwrap();
			fields[0].set(0, 1, Value::I32(7));
		}

		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("populated.ogss");
		write(&path, &registry, "").unwrap();

		let bytes = std::fs::read(&path).unwrap();
		let mmap: std::sync::Arc<[u8]> = std::sync::Arc::from(bytes.into_boxed_slice());
		let reread = crate::parser::parse(mmap, &schema_with_one_field()).unwrap();
		let fields = reread.pools[0].fields.lock().unwrap();
		assert!(matches!(fields[0].get(0, 1), Value::I32(7)));
	}

	#[test]
	fn a_non_null_violation_is_reported_as_a_worker_error() {
		let registry = crate::state::creator::build(&schema_with_one_field());
		registry.pools[0].set_static_size(1);
		registry.pools[0].allocate_block(1, 1);
		{
			let mut fields = registry.pools[0].fields.lock().unwrap();
			fields[0].restrictions = crate::pool::field::Restriction::NON_NULL;
			fields[0].set(0, 1, Value::Null);
		}

		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("violation.ogss");
		let err = write(&path, &registry, "").unwrap_err();
		assert!(matches!(err, Error::Worker(_)));
	}
}
