//! Byte-level I/O shared by the archive reader and writer.
//!
//! - [`signature`]: probing and scanning for four-byte record signatures
//! - [`counting`]: a stream wrapper that tracks how much passed through it
//! - [`retry`]: retrying reads that fail on a byte-range lock
//! - [`segmented`]: a set of volume files behaving as one stream

pub mod counting;
pub mod retry;
pub mod segmented;
pub mod signature;

pub use counting::CountingStream;
pub use retry::{RetryPolicy, read_with_retry};
pub use segmented::{MAX_SEGMENTS, SegmentEvent, SegmentedStream, VolumeSet, WriteOptions};
pub use signature::{find_signature, read_entry_signature, read_signature};
