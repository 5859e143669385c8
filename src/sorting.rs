//! External merge sort over arbitrary record types.
//!
//! Records are cut into sorted runs on storage according to a
//! [`MemoryPolicy`](crate::policy::MemoryPolicy) and merged back with a
//! min-heap. The on-disk form of each record is supplied by a
//! [`RecordCodec`].

pub mod codec;
pub mod external;

pub use codec::{BincodeCodec, RecordCodec, U32Codec};
pub use external::{ExternalSorter, ExternalSorterConfig, MergedRuns, SortStats};
