//! Record serialization for external sort runs.

use std::io::{Read, Write};
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, RevdexError};
use crate::storage::{StructReader, StructWriter};

/// Writes and reads one record at a time.
pub trait RecordCodec<T>: Send + Sync {
    /// Append `record` to `writer`.
    fn encode(&self, record: &T, writer: &mut dyn Write) -> Result<()>;

    /// Read the next record, or `None` at a clean end of stream.
    ///
    /// A stream that ends partway through a record is corrupt.
    fn decode(&self, reader: &mut dyn Read) -> Result<Option<T>>;
}

/// Big-endian 4-byte unsigned integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct U32Codec;

impl RecordCodec<u32> for U32Codec {
    fn encode(&self, record: &u32, writer: &mut dyn Write) -> Result<()> {
        StructWriter::new(writer).write_u32(*record)
    }

    fn decode(&self, reader: &mut dyn Read) -> Result<Option<u32>> {
        StructReader::new(reader).try_read_u32()
    }
}

/// Any serde type, as a u32 length prefix followed by its bincode payload.
#[derive(Debug)]
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        BincodeCodec {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BincodeCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> RecordCodec<T> for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, record: &T, writer: &mut dyn Write) -> Result<()> {
        let payload = bincode::serialize(record)
            .map_err(|e| RevdexError::serialization(format!("Failed to encode record: {e}")))?;
        StructWriter::new(writer).write_bytes(&payload)
    }

    fn decode(&self, reader: &mut dyn Read) -> Result<Option<T>> {
        let mut reader = StructReader::new(reader);
        let Some(length) = reader.try_read_u32()? else {
            return Ok(None);
        };
        let payload = reader.read_raw(length as usize)?;
        let record = bincode::deserialize(&payload)
            .map_err(|e| RevdexError::serialization(format!("Failed to decode record: {e}")))?;
        Ok(Some(record))
    }
}
