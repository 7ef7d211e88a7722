//! The string pool (§4.2): interned strings with literal/file/runtime
//! provenance and lazy on-demand decoding of hull entries.
//!
//! Grounded on `internal/StringPool.cpp`/`.h`. Where the C++ original owns a
//! raw `MappedInStream*` it `delete`s in `loadLazyData`, this port instead
//! holds an `Arc<[u8]>` view of the backing map and slices it directly by
//! `(offset, length)` on first access — there is no stream object to own or
//! free, which sidesteps the self-referential lifetime the original
//! required.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::stream::{BufferedOutStream, FileOutStream, MappedInStream};

/// The canonical OGSS string order: by length first, then bytewise. Used to
/// merge literal lists on read and, per §4.6, to walk pool/container/enum
/// names in lockstep during type merge.
pub fn canonical_order(a: &str, b: &str) -> Ordering {
	a.len().cmp(&b.len()).then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

enum Entry {
	/// Decoded and resident: a literal, a runtime-added string, or a
	/// lazily-decoded hull string that has since been accessed.
	Resident(Arc<str>),
	/// A hull string whose bytes have not been decoded yet.
	Pending { offset: usize, length: usize },
}

struct Inner {
	/// `entries[0]` is an unused sentinel (id 0 denotes "no string"); real
	/// ids are 1-based, matching `StringIndex`'s on-disk encoding.
	entries: Vec<Entry>,
	/// string bytes -> id, used both for `add`'s intern check and for
	/// looking up a literal's stable id during write.
	known: fxhash::FxHashMap<Arc<str>, u32>,
}

/// Interned strings with literal/file/runtime provenance and lazy decoding.
///
/// All mutable state lives behind one mutex, matching §5's "shared-resource
/// policy": `StringPool::known_strings`/`id_map` are guarded by a per-type
/// mutex, with concurrent lazy decodes from many read tasks unifying by
/// pointer under that lock.
pub struct StringPool {
	inner: Mutex<Inner>,
	/// backing bytes for lazy hull decoding; `None` for a freshly created
	/// (empty) state that has no file to decode from.
	mmap: Option<Arc<[u8]>>,
	/// size of the merged literal prefix; ids `1..=literal_count` are stable
	/// across read and write.
	literal_count: usize,
	/// `literal_count + 1`, the first id of the write-time tail; reset by
	/// [`Self::reset_ids_for_write`].
	hull_offset: std::sync::atomic::AtomicUsize,
	/// hull dependency bookkeeping (§3 "Hull type"): how many fields
	/// reference the string hull, and how many still owe a decrement this
	/// write.
	max_deps: AtomicU32,
	deps: AtomicI64,
}

impl StringPool {
	/// Constructs a pool from the compile-time literal list alone (no file
	/// data), used by the [`crate::state::creator::Creator`] path. `literals`
	/// must already be in canonical order.
	pub fn from_literals(literals: &[&str]) -> Self {
		let mut entries = Vec::with_capacity(literals.len() + 1);
		entries.push(Entry::Resident(Arc::from("")));
		let mut known = fxhash::FxHashMap::default();
		for (i, lit) in literals.iter().enumerate() {
			let s: Arc<str> = Arc::from(*lit);
			known.insert(s.clone(), (i + 1) as u32);
			entries.push(Entry::Resident(s));
		}
		Self {
			inner: Mutex::new(Inner { entries, known }),
			mmap: None,
			literal_count: literals.len(),
			hull_offset: std::sync::atomic::AtomicUsize::new(literals.len() + 1),
			max_deps: AtomicU32::new(0),
			deps: AtomicI64::new(0),
		}
	}

	/// Reads the `S` block (§4.2 "Literal ingest"): a count followed by that
	/// many literal strings, merged against `known_literals` (already
	/// canonically ordered) by the same canonical order. The merged list is
	/// the authoritative literal prefix.
	pub fn read_literals(stream: &mut MappedInStream, known_literals: &[&str]) -> Result<Self> {
		let count = stream.v32()? as usize;
		let mut merged: Vec<Arc<str>> = Vec::with_capacity(count.max(known_literals.len()));
		let mut known = fxhash::FxHashMap::default();

		let mut fi = 0usize;
		let mut ki = 0usize;
		let mut next_file: Option<Arc<str>> = if fi < count { Some(read_literal_string(stream)?) } else { None };

		// standard sorted merge: on a tie the known (compile-time) string wins
		// and the file's copy is discarded, exactly as `readSL` does.
		while fi < count || ki < known_literals.len() {
			let take_known = match (ki < known_literals.len(), &next_file) {
				(true, Some(f)) => canonical_order(known_literals[ki], f) != Ordering::Greater,
				(true, None) => true,
				(false, _) => false,
			};
			let s: Arc<str> = if take_known {
				let s: Arc<str> = Arc::from(known_literals[ki]);
				ki += 1;
				// a tie also consumes (and discards) the file's copy
				if let Some(f) = &next_file {
					if canonical_order(&s, f) == Ordering::Equal {
						fi += 1;
						next_file = if fi < count { Some(read_literal_string(stream)?) } else { None };
					}
				}
				s
			} else {
				let s = next_file.take().unwrap();
				fi += 1;
				next_file = if fi < count { Some(read_literal_string(stream)?) } else { None };
				s
			};
			known.insert(s.clone(), merged.len() as u32 + 1);
			merged.push(s);
		}

		let literal_count = merged.len();
		let mut entries = Vec::with_capacity(literal_count + 1);
		entries.push(Entry::Resident(Arc::from("")));
		entries.extend(merged.into_iter().map(Entry::Resident));

		Ok(Self {
			inner: Mutex::new(Inner { entries, known }),
			mmap: None,
			literal_count,
			hull_offset: std::sync::atomic::AtomicUsize::new(literal_count + 1),
			max_deps: AtomicU32::new(0),
			deps: AtomicI64::new(0),
		})
	}

	/// Reads the hull's offset table (§4.2 "Hull ingest"): `count` v32
	/// offsets relative to the current stream position, stored without
	/// decoding. `mmap` is the whole file's backing bytes, used to resolve
	/// `(offset, length)` pairs lazily.
	pub fn read_hull(&mut self, stream: &mut MappedInStream, count: usize, mmap: Arc<[u8]>, base_offset: usize) -> Result<()> {
		let mut offsets = Vec::with_capacity(count);
		for _ in 0..count {
			offsets.push(stream.v32()? as usize);
		}
		let mut last = base_offset + stream.position();
		let mut inner = self.inner.lock().unwrap();
		for len in offsets {
			inner.entries.push(Entry::Pending { offset: last, length: len });
			last += len;
		}
		drop(inner);
		self.mmap = Some(mmap);
		Ok(())
	}

	/// Lazily decodes and interns the string at `id`, matching `byID`: on
	/// first access the bytes are sliced from the map, unified against
	/// `known` under the lock, and cached in place.
	pub fn get(&self, id: i32) -> Result<Option<Arc<str>>> {
		if id <= 0 {
			return Ok(None);
		}
		let mut inner = self.inner.lock().unwrap();
		let idx = id as usize;
		let entry = inner.entries.get(idx).ok_or_else(|| Error::Access(format!("string id {id} out of range")))?;
		match entry {
			Entry::Resident(s) => Ok(Some(s.clone())),
			Entry::Pending { offset, length } => {
				let (offset, length) = (*offset, *length);
				let mmap = self.mmap.as_ref().expect("pending string entry requires a backing map");
				let bytes = mmap.get(offset..offset + length).ok_or_else(|| Error::Format("string offset out of range".into()))?;
				let text = std::str::from_utf8(bytes).map_err(|_| Error::Format("string is not valid utf-8".into()))?;
				// unify with an existing known string by content, or intern a
				// fresh one, mirroring `byID`'s unification under the lock.
				let interned: Arc<str> = match inner.known.get_key_value(text) {
					Some((existing, _)) => existing.clone(),
					None => {
						let fresh: Arc<str> = Arc::from(text);
						inner.known.insert(fresh.clone(), id as u32);
						fresh
					},
				};
				inner.entries[idx] = Entry::Resident(interned.clone());
				Ok(Some(interned))
			},
		}
	}

	/// `add(bytes)`: interns `s`, returning the existing handle if already
	/// known, else allocating a new runtime-owned entry.
	pub fn add(&self, s: &str) -> Arc<str> {
		let mut inner = self.inner.lock().unwrap();
		if let Some((existing, _)) = inner.known.get_key_value(s) {
			return existing.clone();
		}
		let interned: Arc<str> = Arc::from(s);
		let id = inner.entries.len() as u32;
		inner.known.insert(interned.clone(), id);
		inner.entries.push(Entry::Resident(interned.clone()));
		interned
	}

	/// The stable id of an already-interned string, if any.
	pub fn id_of(&self, s: &str) -> Option<u32> {
		self.inner.lock().unwrap().known.get(s).copied()
	}

	pub fn literal_count(&self) -> usize {
		self.literal_count
	}

	pub fn max_deps(&self) -> u32 {
		self.max_deps.load(AtomicOrdering::Relaxed)
	}

	pub fn bump_max_deps(&self) {
		self.max_deps.fetch_add(1, AtomicOrdering::Relaxed);
	}

	/// Writer prep: seeds stable ids for the literal prefix, arms the
	/// dependency counter, and fixes `hull_offset` for the coming write.
	pub fn reset_ids_for_write(&self) {
		self.deps.store(self.max_deps() as i64, AtomicOrdering::SeqCst);
		self.hull_offset.store(self.literal_count + 1, AtomicOrdering::SeqCst);
	}

	/// Decrements the live dependency counter; `true` once every consumer
	/// has decremented and the string hull itself must be written.
	pub fn decrement_deps(&self) -> bool {
		self.deps.fetch_sub(1, AtomicOrdering::SeqCst) == 1
	}

	/// Emits `S`: count then `(length, bytes)` per literal, in id order.
	pub fn write_literals(&self, out: &mut FileOutStream) -> Result<()> {
		let inner = self.inner.lock().unwrap();
		out.v64(self.literal_count as i64)?;
		for i in 1..=self.literal_count {
			let s = resident_str(&inner.entries[i]);
			out.v64(s.len() as i64)?;
			out.put(s.as_bytes())?;
		}
		Ok(())
	}

	/// Reads the HD block for field id 0 (the string hull tail), the
	/// read-side counterpart of [`Self::write_tail`]: a count, then that
	/// many lengths, then that many UTF-8 byte runs, appended after the
	/// literal prefix and any earlier hull ingest.
	pub fn read_tail(&self, stream: &mut MappedInStream) -> Result<()> {
		let count = stream.v64()? as usize;
		let mut lengths = Vec::with_capacity(count);
		for _ in 0..count {
			lengths.push(stream.v64()? as usize);
		}
		let mut inner = self.inner.lock().unwrap();
		for len in lengths {
			let bytes = stream.bytes(len)?;
			let text = std::str::from_utf8(bytes).map_err(|_| Error::Format("string is not valid utf-8".into()))?;
			let interned: Arc<str> = match inner.known.get_key_value(text) {
				Some((existing, _)) => existing.clone(),
				None => {
					let fresh: Arc<str> = Arc::from(text);
					let id = inner.entries.len() as u32;
					inner.known.insert(fresh.clone(), id);
					fresh
				}
			};
			inner.entries.push(Entry::Resident(interned));
		}
		Ok(())
	}

	/// Emits the runtime/new-string tail of the id map: a count, then that
	/// many lengths, then raw bytes. Returns `true` if there was nothing to
	/// write (an empty tail).
	pub fn write_tail(&self, out: &mut BufferedOutStream) -> Result<bool> {
		let inner = self.inner.lock().unwrap();
		let hull_offset = self.hull_offset.load(AtomicOrdering::SeqCst);
		let count = inner.entries.len().saturating_sub(hull_offset);
		if count == 0 {
			return Ok(true);
		}
		out.v64(count as i64);
		for i in 0..count {
			let s = resident_str(&inner.entries[hull_offset + i]);
			out.v64(s.len() as i64);
		}
		for i in 0..count {
			let s = resident_str(&inner.entries[hull_offset + i]);
			out.put(Arc::from(s.as_bytes()));
		}
		Ok(false)
	}
}

fn resident_str(e: &Entry) -> Arc<str> {
	match e {
		Entry::Resident(s) => s.clone(),
		Entry::Pending { .. } => panic!("attempted to write an undecoded string; call get() first"),
	}
}

fn read_literal_string(stream: &mut MappedInStream) -> Result<Arc<str>> {
	let len = stream.v32()? as usize;
	let bytes = stream.bytes(len)?;
	std::str::from_utf8(bytes).map(Arc::from).map_err(|_| Error::Format("literal string is not valid utf-8".into()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn canonical_order_is_length_then_bytewise() {
		let mut v = vec!["ab", "b", "c"];
		v.sort_by(|a, b| canonical_order(a, b));
		assert_eq!(v, vec!["b", "c", "ab"]);
	}

	#[test]
	fn add_interns_duplicates() {
		let pool = StringPool::from_literals(&[]);
		let a = pool.add("hello");
		let b = pool.add("hello");
		assert!(Arc::ptr_eq(&a, &b));
	}

	#[test]
	fn literals_are_stable_from_construction() {
		let pool = StringPool::from_literals(&["b", "c", "ab"]);
		assert_eq!(pool.get(1).unwrap().as_deref(), Some("b"));
		assert_eq!(pool.get(2).unwrap().as_deref(), Some("c"));
		assert_eq!(pool.get(3).unwrap().as_deref(), Some("ab"));
	}

	#[test]
	fn id_zero_or_negative_is_no_string() {
		let pool = StringPool::from_literals(&["x"]);
		assert!(pool.get(0).unwrap().is_none());
		assert!(pool.get(-1).unwrap().is_none());
	}
}
