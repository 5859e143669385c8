//! Integer compression codecs used by the posting and segment formats.

pub mod group_varint;

pub use group_varint::{GroupVarintDecoder, GroupVarintEncoder};
