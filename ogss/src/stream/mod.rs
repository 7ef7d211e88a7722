//! Stream primitives: memory-mapped input, buffered/file output, and the
//! shared variable-length integer codec (§4.1).

mod input;
mod output;

pub use input::MappedInStream;
pub use output::{BufferedOutStream, FileOutStream, BUFFER_SIZE};
