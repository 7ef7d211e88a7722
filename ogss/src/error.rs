use std::fmt::{Display, Formatter};

/// Errors produced by the OGSS runtime.
///
/// Grounded on `cilium::schema::errors::ReadError`: a plain enum with a
/// `From<std::io::Error>` impl rather than a `thiserror`-derived type, since
/// the teacher carries no error-derive dependency.
#[derive(Debug)]
pub enum Error {
	/// Short read, mmap failure, or any other OS-level I/O failure.
	Io(std::io::Error),
	/// Guard mismatch, non-canonical ordering, unconsumed bytes, truncated
	/// varint, duplicate type name, bad super reference.
	Format(String),
	/// Type mismatch between a known and a file field; a transient field
	/// shadowed by a file field of the same name.
	Schema(String),
	/// Out-of-range field access or use of a tombstoned object.
	Access(String),
	/// One or more worker jobs panicked or returned an error during a
	/// parallel parse or write; the write's on-disk result is partial.
	Worker(Vec<String>),
	/// An operation was attempted in a `File` mode that forbids it, e.g.
	/// mutating a `ReadOnly` file.
	Mode(&'static str),
}

impl From<std::io::Error> for Error {
	fn from(value: std::io::Error) -> Self {
		Self::Io(value)
	}
}

impl Display for Error {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Io(e) => write!(f, "I/O error: {e}"),
			Self::Format(msg) => write!(f, "malformed OGSS file: {msg}"),
			Self::Schema(msg) => write!(f, "schema mismatch: {msg}"),
			Self::Access(msg) => write!(f, "invalid access: {msg}"),
			Self::Worker(errs) => {
				write!(f, "{} worker job(s) failed: ", errs.len())?;
				for (i, e) in errs.iter().enumerate() {
					if i > 0 {
						write!(f, "; ")?;
					}
					write!(f, "{e}")?;
				}
				Ok(())
			},
			Self::Mode(msg) => write!(f, "operation not permitted in current mode: {msg}"),
		}
	}
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
