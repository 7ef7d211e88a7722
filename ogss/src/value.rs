//! The reflective value type (§3, Design Note "Box union").
//!
//! The original represents a field value as `api::Box`, a C union of a
//! scalar, a raw object pointer, a string pointer and an enum proxy
//! pointer — safe only because the reading code always knows which arm to
//! read from the surrounding `FieldType`. Rust has no union that can be
//! read this way without `unsafe`, so this is a tagged enum instead; the
//! cost is one discriminant word per value, which is irrelevant next to
//! the pointer/length already carried by most variants.

use std::sync::Arc;

use crate::types::container::ContainerHandle;
use crate::types::enums::EnumConstant;

#[derive(Debug, Clone)]
pub enum Value {
	Bool(bool),
	I8(i8),
	I16(i16),
	I32(i32),
	I64(i64),
	V64(i64),
	F32(f32),
	F64(f64),
	String(Arc<str>),
	/// A class instance reference, by persistent or pool-local id (§3
	/// "Object identity model"). `0` means null.
	Ref { pool: u32, id: i32 },
	Container(ContainerHandle),
	Enum(Arc<EnumConstant>),
	Null,
}

impl Value {
	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}
}
