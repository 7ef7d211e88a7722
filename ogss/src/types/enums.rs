//! Enum pools (§3 "FieldType" / enum case, §4.6 "Enum merge").
//!
//! Grounded on `internal/EnumPool.h`: the original keeps three parallel
//! views over the same constants — `values` (combined, serialization
//! order), `fileValues` (indexed by the file's own ordinal, used by `r`)
//! and `staticValues` (indexed by the compiled-in ordinal, used by
//! `get`/`proxy`). We keep the same three views; `AbstractEnumPool`'s
//! vtable (`proxy`/`begin`/`end`/`fileDefault`) collapses into inherent
//! methods since there is only ever one concrete shape.
//!
//! Ordinal `0` is reserved as the "no value" marker, mirroring the
//! object-identity convention elsewhere in the file format where an id of
//! zero means absent rather than a real instance; the first real constant
//! is assigned id `1`. The original C++ numbers its merged constants from
//! zero but then treats a zero proxy id as falsy in `w`, which only works
//! out because the reference runtime never actually looks a real constant
//! up by id zero — reserving zero explicitly removes that trap.

use std::sync::Arc;

use crate::stream::{BufferedOutStream, MappedInStream};
use crate::strings::canonical_order;

#[derive(Debug)]
pub struct EnumConstant {
	pub name: Arc<str>,
	/// Position in the combined, serialization-order constant list; `0` is
	/// never assigned to a real constant.
	pub id: u32,
}

pub struct EnumPool {
	pub type_id: u32,
	pub name: Arc<str>,
	/// All constants, combined view, indexed by `id - 1`.
	values: Vec<Arc<EnumConstant>>,
	/// Indexed by the file's own ordinal; used to decode field values.
	file_values: Vec<Arc<EnumConstant>>,
	/// Indexed by the compile-time ordinal; used by [`Self::get`].
	known_values: Vec<Arc<EnumConstant>>,
}

impl EnumPool {
	/// Builds a pool with no file counterpart: every constant is known.
	pub fn from_known(type_id: u32, name: Arc<str>, known: &[&str]) -> Self {
		let mut values = Vec::with_capacity(known.len());
		for (i, n) in known.iter().enumerate() {
			values.push(Arc::new(EnumConstant { name: Arc::from(*n), id: i as u32 + 1 }));
		}
		Self { type_id, name, known_values: values.clone(), file_values: Vec::new(), values }
	}

	/// Builds a pool purely from file-declared constants, with no matching
	/// compile-time enum (legal: unknown enums are still readable).
	pub fn from_file_only(type_id: u32, name: Arc<str>, found: &[Arc<str>]) -> Self {
		let mut values = Vec::with_capacity(found.len());
		for (i, n) in found.iter().enumerate() {
			values.push(Arc::new(EnumConstant { name: n.clone(), id: i as u32 + 1 }));
		}
		Self { type_id, name, file_values: values.clone(), known_values: Vec::new(), values }
	}

	/// Merges file-declared constant names against the compile-time list
	/// under canonical ordering (§4.6), the same lockstep walk used for
	/// types, containers and fields. A name present in both shares one
	/// `EnumConstant` and one combined-sequence id.
	pub fn merge(type_id: u32, name: Arc<str>, found: &[Arc<str>], known: &[&str]) -> Self {
		let mut values = Vec::with_capacity(found.len().max(known.len()));
		let mut file_values = vec![None; found.len()];
		let mut known_values = vec![None; known.len()];
		let (mut fi, mut ki) = (0usize, 0usize);
		let mut next_id = 1u32;

		while fi < found.len() || ki < known.len() {
			let take_known = match (found.get(fi), known.get(ki)) {
				(Some(f), Some(k)) => canonical_order(f, k) == std::cmp::Ordering::Greater,
				(Some(_), None) => false,
				(None, Some(_)) => true,
				(None, None) => unreachable!(),
			};
			let same = matches!((found.get(fi), known.get(ki)), (Some(f), Some(k)) if canonical_order(f, k) == std::cmp::Ordering::Equal);

			let constant = if same {
				Arc::new(EnumConstant { name: found[fi].clone(), id: next_id })
			} else if take_known {
				Arc::new(EnumConstant { name: Arc::from(known[ki]), id: next_id })
			} else {
				Arc::new(EnumConstant { name: found[fi].clone(), id: next_id })
			};
			next_id += 1;

			if same {
				file_values[fi] = Some(constant.clone());
				known_values[ki] = Some(constant.clone());
				fi += 1;
				ki += 1;
			} else if take_known {
				known_values[ki] = Some(constant.clone());
				ki += 1;
			} else {
				file_values[fi] = Some(constant.clone());
				fi += 1;
			}
			values.push(constant);
		}

		Self {
			type_id,
			name,
			values,
			file_values: file_values.into_iter().map(|c| c.expect("every file slot filled")).collect(),
			known_values: known_values.into_iter().map(|c| c.expect("every known slot filled")).collect(),
		}
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	/// The combined, serialization-order constant list, id `i+1` at index
	/// `i`. Used by the writer to emit `T_enum`'s full value list regardless
	/// of which side (known/file) originally contributed each name.
	pub fn values(&self) -> &[Arc<EnumConstant>] {
		&self.values
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	/// The compile-time constant at `ordinal`, for generated accessors.
	pub fn get(&self, ordinal: usize) -> Option<&Arc<EnumConstant>> {
		self.known_values.get(ordinal)
	}

	pub fn default_constant(&self) -> Option<&Arc<EnumConstant>> {
		self.file_values.first().or_else(|| self.known_values.first())
	}

	/// Decodes one field value: a file-ordinal v32, resolved against the
	/// file's own numbering.
	pub fn read(&self, stream: &mut MappedInStream) -> crate::error::Result<Option<Arc<EnumConstant>>> {
		let ordinal = stream.v32()? as usize;
		Ok(self.file_values.get(ordinal).cloned())
	}

	/// Writes one field value; returns `true` if it was absent (the
	/// zero/null marker), matching the data-field suppression convention
	/// used across the writer for "was this the default value".
	pub fn write(&self, value: Option<&Arc<EnumConstant>>, out: &mut BufferedOutStream) -> bool {
		match value {
			Some(c) if c.id != 0 => {
				out.v64(c.id as i64);
				false
			}
			_ => {
				out.i8(0);
				true
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn known_only_assigns_ids_from_one() {
		let pool = EnumPool::from_known(10, Arc::from("Color"), &["Red", "Green", "Blue"]);
		assert_eq!(pool.get(0).unwrap().id, 1);
		assert_eq!(pool.get(2).unwrap().id, 3);
	}

	#[test]
	fn merge_unifies_shared_names_and_keeps_unknown_ones() {
		let found: Vec<Arc<str>> = vec![Arc::from("Blue"), Arc::from("Purple"), Arc::from("Red")];
		let known = ["Blue", "Green", "Red"];
		let pool = EnumPool::merge(10, Arc::from("Color"), &found, &known);
		assert_eq!(pool.len(), 4);
		assert!(pool.known_values.iter().any(|c| &*c.name == "Green"));
		assert!(pool.file_values.iter().any(|c| &*c.name == "Purple"));
		let shared_via_file = pool.file_values.iter().find(|c| &*c.name == "Blue").unwrap();
		let shared_via_known = pool.known_values.iter().find(|c| &*c.name == "Blue").unwrap();
		assert!(Arc::ptr_eq(shared_via_file, shared_via_known));
	}
}
