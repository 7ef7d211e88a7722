use std::io::Write;
use std::sync::Arc;

use crate::error::Result;
use crate::varint::encode_v64;

/// Size of one fixed chunk inside a [`BufferedOutStream`], and of the
/// staging buffer inside a [`FileOutStream`]. Grounded on
/// `streams/Stream.h`'s `BUFFER_SIZE` (4 KiB).
pub const BUFFER_SIZE: usize = 4096;

enum Chunk {
	/// An owned, fixed-size buffer this stream filled incrementally.
	Owned(Vec<u8>),
	/// A large `put` that bypassed the fixed-size buffering, mirroring the
	/// C++ `Buffer` with negative `size` ("wrapped" data the stream does
	/// not own and must not copy).
	Wrapped(Arc<[u8]>),
}

impl Chunk {
	fn as_slice(&self) -> &[u8] {
		match self {
			Chunk::Owned(v) => v.as_slice(),
			Chunk::Wrapped(v) => v.as_ref(),
		}
	}
}

/// A chain of fixed-size buffers, with an escape hatch for large `put`s
/// that would be wasteful to copy through the chunking.
///
/// Grounded on `streams/BufferedOutStream.h`: booleans share a byte
/// starting at bit 0; the first boolean write in a fresh buffer allocates a
/// new trailing byte. `close()` trims the unused tail of the current
/// buffer so the whole chain can be written verbatim.
pub struct BufferedOutStream {
	completed: Vec<Chunk>,
	current: Vec<u8>,
	bool_off: u8,
	bytes_written: usize,
}

impl Default for BufferedOutStream {
	fn default() -> Self {
		Self::new()
	}
}

impl BufferedOutStream {
	pub fn new() -> Self {
		Self { completed: Vec::new(), current: Vec::with_capacity(BUFFER_SIZE), bool_off: 7, bytes_written: 0 }
	}

	fn require(&mut self, len: usize) {
		if self.current.len() + len > BUFFER_SIZE {
			self.flush_current();
		}
	}

	fn flush_current(&mut self) {
		if !self.current.is_empty() {
			self.bytes_written += self.current.len();
			let full = std::mem::replace(&mut self.current, Vec::with_capacity(BUFFER_SIZE));
			self.completed.push(Chunk::Owned(full));
		}
	}

	pub fn boolean(&mut self, v: bool) {
		self.bool_off += 1;
		if self.bool_off == 8 {
			self.bool_off = 0;
			self.require(1);
			self.current.push(0);
		}
		if v {
			let last = self.current.len() - 1;
			self.current[last] |= 1 << self.bool_off;
		}
	}

	pub fn i8(&mut self, v: i8) {
		self.require(1);
		self.current.push(v as u8);
	}

	pub fn i16(&mut self, v: i16) {
		self.require(2);
		self.current.extend_from_slice(&v.to_le_bytes());
	}

	pub fn i32(&mut self, v: i32) {
		self.require(4);
		self.current.extend_from_slice(&v.to_le_bytes());
	}

	pub fn i64(&mut self, v: i64) {
		self.require(8);
		self.current.extend_from_slice(&v.to_le_bytes());
	}

	pub fn f32(&mut self, v: f32) {
		self.require(4);
		self.current.extend_from_slice(&v.to_le_bytes());
	}

	pub fn f64(&mut self, v: f64) {
		self.require(8);
		self.current.extend_from_slice(&v.to_le_bytes());
	}

	/// Unsigned varint, up to 9 bytes.
	pub fn v64(&mut self, v: i64) {
		self.require(9);
		encode_v64(v as u64, &mut self.current);
	}

	/// Writes raw bytes, e.g. a string's UTF-8 image. Large payloads (more
	/// than half a buffer) are wrapped instead of copied, mirroring
	/// `BufferedOutStream::put`'s large-payload branch.
	pub fn put(&mut self, data: Arc<[u8]>) {
		if data.len() > BUFFER_SIZE / 2 {
			self.flush_current();
			self.bytes_written += data.len();
			self.completed.push(Chunk::Wrapped(data));
		} else {
			self.require(data.len());
			self.current.extend_from_slice(&data);
		}
	}

	/// Writes raw, already-owned bytes directly, without the large-payload
	/// wrap path (used for short fixed-layout records).
	pub fn put_bytes(&mut self, data: &[u8]) {
		self.require(data.len());
		self.current.extend_from_slice(data);
	}

	/// Total bytes buffered so far, including the not-yet-flushed tail.
	pub fn bytes_written(&self) -> usize {
		self.bytes_written + self.current.len()
	}

	/// Flushes the tail buffer into `completed` and returns the full chain,
	/// consuming the stream. Mirrors `BufferedOutStream::close()`.
	fn into_chunks(mut self) -> Vec<Chunk> {
		if !self.current.is_empty() {
			self.completed.push(Chunk::Owned(self.current));
		}
		self.completed
	}
}

/// A file-backed output stream with a 4 KiB staging buffer.
///
/// Grounded on `streams/FileOutputStream.h`: `write` flushes the staging
/// buffer then appends each chunk of a [`BufferedOutStream`]; `writeSized`
/// additionally prepends the chain's total length, minus two (no legal HD
/// block is smaller than that), as a v64.
pub struct FileOutStream {
	file: std::fs::File,
	staging: Vec<u8>,
	bytes_written: usize,
}

impl FileOutStream {
	pub fn create(path: &std::path::Path) -> Result<Self> {
		let file = std::fs::File::create(path)?;
		Ok(Self { file, staging: Vec::with_capacity(BUFFER_SIZE), bytes_written: 0 })
	}

	fn flush_staging(&mut self) -> Result<()> {
		if !self.staging.is_empty() {
			self.file.write_all(&self.staging)?;
			self.bytes_written += self.staging.len();
			self.staging.clear();
		}
		Ok(())
	}

	fn require(&mut self, len: usize) -> Result<()> {
		if self.staging.len() + len > BUFFER_SIZE {
			self.flush_staging()?;
		}
		Ok(())
	}

	pub fn i8(&mut self, v: i8) -> Result<()> {
		self.require(1)?;
		self.staging.push(v as u8);
		Ok(())
	}

	pub fn v64(&mut self, v: i64) -> Result<()> {
		self.require(9)?;
		encode_v64(v as u64, &mut self.staging);
		Ok(())
	}

	pub fn put(&mut self, data: &[u8]) -> Result<()> {
		if data.len() >= BUFFER_SIZE {
			self.flush_staging()?;
			self.file.write_all(data)?;
			self.bytes_written += data.len();
		} else {
			self.require(data.len())?;
			self.staging.extend_from_slice(data);
		}
		Ok(())
	}

	/// Appends `out`'s chunks to the file without a size prefix. Used for
	/// the T+F block.
	pub fn write(&mut self, out: BufferedOutStream) -> Result<()> {
		self.flush_staging()?;
		for chunk in out.into_chunks() {
			self.file.write_all(chunk.as_slice())?;
			self.bytes_written += chunk.as_slice().len();
		}
		Ok(())
	}

	/// As [`Self::write`], but prepends `bytes_written(out) - 2` as a v64,
	/// the HD block framing of §6.
	pub fn write_sized(&mut self, out: BufferedOutStream) -> Result<()> {
		let total = out.bytes_written();
		debug_assert!(total > 1, "no legal HD block is smaller than 2 bytes");
		self.v64(total as i64 - 2)?;
		self.write(out)
	}

	pub fn bytes_written(&self) -> usize {
		self.bytes_written + self.staging.len()
	}

	pub fn finish(mut self) -> Result<()> {
		self.flush_staging()?;
		self.file.flush()?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn booleans_pack_starting_at_bit_zero() {
		let mut out = BufferedOutStream::new();
		out.boolean(true);
		out.boolean(false);
		out.boolean(true);
		let chunks = out.into_chunks();
		assert_eq!(chunks.len(), 1);
		assert_eq!(chunks[0].as_slice(), &[0b0000_0101]);
	}

	#[test]
	fn large_put_is_wrapped_not_copied() {
		let mut out = BufferedOutStream::new();
		out.i8(1);
		let big: Arc<[u8]> = Arc::from(vec![0xAB; BUFFER_SIZE]);
		out.put(big.clone());
		let chunks = out.into_chunks();
		// the i8 flushes its own small chunk, then the big payload is wrapped
		assert!(chunks.len() >= 2);
		assert_eq!(chunks.last().unwrap().as_slice(), &*big);
	}

	#[test]
	fn varint_matches_codec() {
		let mut out = BufferedOutStream::new();
		out.v64(300);
		let chunks = out.into_chunks();
		let mut pos = 0;
		let decoded = crate::varint::decode_v64(chunks[0].as_slice(), &mut pos).unwrap();
		assert_eq!(decoded, 300);
	}
}
