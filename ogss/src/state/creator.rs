//! Empty-state construction (§4.5 "Creator").
//!
//! Grounded on the Creator-side responsibilities scattered through
//! `internal/AbstractPool.h`'s `makeSub`/`KFC` hooks: in the original a
//! generated "pool builder" answers "what are my sub-pools" and "what are
//! my known fields" at codegen time. Without codegen, the embedding
//! program hands [`build`] a [`SchemaDef`] describing the same thing as
//! plain data, built once (typically as a `static`/`const` in the caller).

use std::sync::Arc;

use crate::pool::field::FieldDeclaration;
use crate::pool::Pool;
use crate::state::{SifaEntry, TypeRegistry};
use crate::strings::StringPool;
use crate::types::container::{ContainerKind, ContainerType};
use crate::types::enums::EnumPool;
use crate::types::{FieldType, Kcc};

#[derive(Clone, Copy)]
pub struct FieldDef {
	pub name: &'static str,
	pub field_type: FieldType,
	pub auto: bool,
}

pub struct ClassDef {
	pub name: &'static str,
	/// Name of the superclass, already declared earlier in `classes`
	/// (depth-first pre-order, as the spec requires of the known pool
	/// tree).
	pub super_name: Option<&'static str>,
	pub fields: Vec<FieldDef>,
}

pub struct ContainerDef {
	pub kind: ContainerKind,
	pub base1: FieldType,
	pub base2: Option<FieldType>,
}

pub struct EnumDef {
	pub name: &'static str,
	pub values: Vec<&'static str>,
}

#[derive(Default)]
pub struct SchemaDef {
	pub classes: Vec<ClassDef>,
	pub containers: Vec<ContainerDef>,
	pub enums: Vec<EnumDef>,
	pub literals: Vec<&'static str>,
}

/// Maps a [`FieldType`] to its SIFA slot index, the form a [`Kcc`] needs
/// for its base indices. Builtins occupy slots 0-9; classes/containers/
/// enums occupy the slot they were installed into, tracked by the caller
/// since [`FieldType`] alone does not carry a SIFA index for dynamic
/// types (it carries a `TypeId`, which only coincides with the SIFA index
/// because both are assigned in the same definition order here).
pub(crate) fn sifa_index_of(field_type: FieldType) -> u32 {
	match field_type {
		FieldType::Bool => 0,
		FieldType::I8 => 1,
		FieldType::I16 => 2,
		FieldType::I32 => 3,
		FieldType::I64 => 4,
		FieldType::V64 => 5,
		FieldType::F32 => 6,
		FieldType::F64 => 7,
		FieldType::AnyRef => 8,
		FieldType::String => 9,
		FieldType::Class(tid) | FieldType::Container(tid) | FieldType::Enum(tid) => tid,
	}
}

/// Builds a fresh [`TypeRegistry`] with no file counterpart: every pool,
/// container and enum is installed with only its compile-time definition.
pub fn build(schema: &SchemaDef) -> TypeRegistry {
	let strings = StringPool::from_literals(&schema.literals);
	let mut registry = TypeRegistry::empty(strings);

	for class in &schema.classes {
		let super_index = class.super_name.as_ref().and_then(|n| registry.pools.iter().position(|p| &*p.name == *n));
		let (base_index, thh) = match super_index {
			Some(i) => (registry.pools[i].base_index, registry.pools[i].thh + 1),
			None => (registry.pools.len(), 0),
		};
		let type_id = registry.claim_type_id();
		let pool = Pool::new(type_id, Arc::from(class.name), super_index, base_index, thh);
		registry.sifa.push(SifaEntry::Class(registry.pools.len()));
		registry.pools.push(pool);
	}

	for container in &schema.containers {
		let type_id = registry.claim_type_id();
		let kcc = Kcc::new(container.kind, sifa_index_of(container.base1), container.base2.map(sifa_index_of).unwrap_or(0));
		let ctype = ContainerType::new(type_id, container.kind, container.base1, container.base2, Some(kcc));
		registry.sifa.push(SifaEntry::Container(registry.containers.len()));
		registry.containers.push(ctype);
	}

	for e in &schema.enums {
		let type_id = registry.claim_type_id();
		let pool = EnumPool::from_known(type_id, Arc::from(e.name), &e.values);
		registry.sifa.push(SifaEntry::Enum(registry.enums.len()));
		registry.enums.push(pool);
	}

	for (pool_idx, class) in schema.classes.iter().enumerate() {
		for field in &class.fields {
			if field.auto {
				let declaration = FieldDeclaration::new_auto(0, Arc::from(field.name), field.field_type);
				registry.pools[pool_idx].fields.lock().unwrap().push(declaration);
			} else {
				let field_id = registry.claim_field_id();
				let field_index = registry.pools[pool_idx].fields.lock().unwrap().len();
				let declaration = FieldDeclaration::new_data(field_id, Arc::from(field.name), field.field_type, 0);
				registry.bump_hull_deps(field.field_type);
				registry.register_field_target(field_id, crate::state::FieldTarget::Data { pool_index: pool_idx, field_index });
				registry.pools[pool_idx].fields.lock().unwrap().push(declaration);
			}
		}
	}

	registry.fix_container_max_deps();
	registry.assign_hull_field_ids();
	registry
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_schema() -> SchemaDef {
		SchemaDef {
			classes: vec![
				ClassDef { name: "Node", super_name: None, fields: vec![FieldDef { name: "value", field_type: FieldType::I32, auto: false }] },
				ClassDef {
					name: "Leaf",
					super_name: Some("Node"),
					fields: vec![FieldDef { name: "label", field_type: FieldType::String, auto: false }],
				},
			],
			containers: vec![ContainerDef { kind: ContainerKind::Array, base1: FieldType::String, base2: None }],
			enums: vec![EnumDef { name: "Color", values: vec!["Red", "Green", "Blue"] }],
			literals: vec!["value", "label", "Node", "Leaf"],
		}
	}

	#[test]
	fn builds_thh_and_base_index_from_super_chain() {
		let registry = build(&sample_schema());
		assert_eq!(registry.pools[0].thh, 0);
		assert_eq!(registry.pools[1].thh, 1);
		assert_eq!(registry.pools[1].base_index, registry.pools[0].base_index);
	}

	#[test]
	fn string_field_bumps_string_pool_max_deps() {
		let registry = build(&sample_schema());
		assert!(registry.strings.max_deps() > 0);
	}
}
