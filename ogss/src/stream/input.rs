use crate::error::{Error, Result};
use crate::varint::{decode_v32, decode_v64};

/// A read cursor over a memory-mapped (or otherwise borrowed) byte range.
///
/// Grounded on `streams/MappedInStream.h`/`InStream.h`: a `[base, end)` pair
/// with a movable `position`. Unlike the C++ original, the bytes backing
/// `data` are owned by [`crate::file::File`] as a plain `Arc<[u8]>` (read via
/// [`memmap2::Mmap`] but copied out of it immediately, since the owning
/// `TypeRegistry` outlives any one mapping and has no lifetime parameter to
/// borrow through) and every `MappedInStream` is a borrow of that `Arc`, so
/// lifetimes replace the raw `base`/`end` pointers.
#[derive(Clone, Copy)]
pub struct MappedInStream<'m> {
	data: &'m [u8],
	position: usize,
	/// bit offset of the last `boolean()` read; 7 means "no byte consumed
	/// yet", matching the C++ `off` field's initial value.
	bool_off: u8,
}

impl<'m> MappedInStream<'m> {
	pub fn new(data: &'m [u8]) -> Self {
		Self { data, position: 0, bool_off: 7 }
	}

	#[inline]
	pub fn position(&self) -> usize {
		self.position
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.data.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	/// True once `position` has consumed the whole range. The parser
	/// requires this to hold after every non-lazy read task (§4.6).
	#[inline]
	pub fn eof(&self) -> bool {
		self.position >= self.data.len()
	}

	fn ensure(&self, len: usize) -> Result<()> {
		match self.position + len <= self.data.len() {
			true => Ok(()),
			false => Err(Error::Format("unexpected end of stream".into())),
		}
	}

	fn take(&mut self, len: usize) -> Result<&'m [u8]> {
		self.ensure(len)?;
		let slice = &self.data[self.position..self.position + len];
		self.position += len;
		Ok(slice)
	}

	pub fn bool(&mut self) -> Result<bool> {
		self.bool_off += 1;
		if self.bool_off == 8 {
			self.bool_off = 0;
			self.ensure(1)?;
			self.position += 1;
		}
		let byte = self.data[self.position - 1];
		Ok(byte & (1 << self.bool_off) != 0)
	}

	pub fn i8(&mut self) -> Result<i8> {
		Ok(self.take(1)?[0] as i8)
	}

	pub fn i16(&mut self) -> Result<i16> {
		Ok(i16::from_le_bytes(self.take(2)?.try_into().unwrap()))
	}

	pub fn i32(&mut self) -> Result<i32> {
		Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
	}

	pub fn i64(&mut self) -> Result<i64> {
		Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
	}

	pub fn f32(&mut self) -> Result<f32> {
		Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
	}

	pub fn f64(&mut self) -> Result<f64> {
		Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
	}

	/// Unsigned variable-length integer, up to 9 bytes.
	pub fn v64(&mut self) -> Result<i64> {
		let mut pos = self.position;
		let value = decode_v64(self.data, &mut pos)?;
		self.position = pos;
		Ok(value as i64)
	}

	/// As [`Self::v64`], but rejects values outside the 32-bit range.
	pub fn v32(&mut self) -> Result<i32> {
		let mut pos = self.position;
		let value = decode_v32(self.data, &mut pos)?;
		self.position = pos;
		Ok(value as i32)
	}

	/// Reads a raw byte slice of `len` bytes without interpretation —
	/// used for literal string bytes and opaque hull/field payloads.
	pub fn bytes(&mut self, len: usize) -> Result<&'m [u8]> {
		self.take(len)
	}

	/// Slices out a sub-range `[position, position+len)` as an independent
	/// view and advances `position` past it, mirroring
	/// `MappedInStream(const MappedInStream*, begin, end)`.
	pub fn view(&mut self, len: usize) -> Result<MappedInStream<'m>> {
		let slice = self.take(len)?;
		Ok(MappedInStream { data: slice, position: 0, bool_off: 7 })
	}

	/// Skips `len` bytes without reading them.
	pub fn skip(&mut self, len: usize) -> Result<()> {
		self.ensure(len)?;
		self.position += len;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixed_width_reads_are_little_endian() {
		let data = [0x2A, 0x00, 0x00, 0x00, 0x01, 0x00];
		let mut s = MappedInStream::new(&data);
		assert_eq!(s.i32().unwrap(), 42);
		assert_eq!(s.i16().unwrap(), 1);
		assert!(s.eof());
	}

	#[test]
	fn booleans_pack_into_a_byte_from_bit_zero() {
		let data = [0b0000_0101u8];
		let mut s = MappedInStream::new(&data);
		assert!(s.bool().unwrap());
		assert!(!s.bool().unwrap());
		assert!(s.bool().unwrap());
		for _ in 0..5 {
			assert!(!s.bool().unwrap());
		}
	}

	#[test]
	fn read_past_end_is_end_of_stream_error() {
		let data = [0u8; 2];
		let mut s = MappedInStream::new(&data);
		assert!(s.i32().is_err());
	}

	#[test]
	fn view_slices_and_advances() {
		let data = [1, 2, 3, 4, 5];
		let mut s = MappedInStream::new(&data);
		s.skip(1).unwrap();
		let mut view = s.view(2).unwrap();
		assert_eq!(view.i16().unwrap(), i16::from_le_bytes([2, 3]));
		assert_eq!(s.position(), 3);
	}
}
