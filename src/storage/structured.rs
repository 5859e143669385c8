//! Structured binary I/O for the index file formats.
//!
//! Every fixed-width field in revdex files is big-endian. The writer and
//! reader keep a byte position so callers can record offsets (posting
//! pointers, term offsets) without asking the underlying stream.

use std::io::{ErrorKind, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, RevdexError};
use crate::storage::StorageOutput;

/// A structured writer for big-endian binary data.
#[derive(Debug)]
pub struct StructWriter<W: Write> {
    writer: W,
    position: u64,
}

impl<W: Write> StructWriter<W> {
    /// Create a new structured writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            position: 0,
        }
    }

    /// Write a u32 value (big-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<BigEndian>(value)?;
        self.position += 4;
        Ok(())
    }

    /// Write an i32 value (big-endian).
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.writer.write_i32::<BigEndian>(value)?;
        self.position += 4;
        Ok(())
    }

    /// Write raw bytes with a u32 length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        let length = u32::try_from(value.len()).map_err(|_| {
            RevdexError::resource_exhausted(format!(
                "byte string of {} bytes exceeds the 32-bit length prefix",
                value.len()
            ))
        })?;
        self.write_u32(length)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.position += value.len() as u64;
        Ok(())
    }

    /// Get current position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: StorageOutput> StructWriter<W> {
    /// Flush and close the underlying storage output.
    pub fn close(mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.close()
    }
}

/// A structured reader for big-endian binary data.
///
/// A stream that ends inside a field is reported as
/// [`RevdexError::CorruptIndex`]; the `try_` variants additionally accept a
/// clean end of stream at a field boundary.
#[derive(Debug)]
pub struct StructReader<R: Read> {
    reader: R,
    position: u64,
}

impl<R: Read> StructReader<R> {
    /// Create a new structured reader.
    pub fn new(reader: R) -> Self {
        StructReader {
            reader,
            position: 0,
        }
    }

    /// Read a u32 value (big-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<BigEndian>().map_err(truncated)?;
        self.position += 4;
        Ok(value)
    }

    /// Read an i32 value (big-endian).
    pub fn read_i32(&mut self) -> Result<i32> {
        let value = self.reader.read_i32::<BigEndian>().map_err(truncated)?;
        self.position += 4;
        Ok(value)
    }

    /// Read a u32 value, or `None` if the stream ends before its first byte.
    pub fn try_read_u32(&mut self) -> Result<Option<u32>> {
        let mut buf = [0u8; 4];
        let filled = self.fill(&mut buf)?;
        match filled {
            0 => Ok(None),
            4 => Ok(Some(u32::from_be_bytes(buf))),
            n => Err(RevdexError::corrupt_index(format!(
                "stream ended {n} bytes into a 4-byte field"
            ))),
        }
    }

    /// Read bytes with a u32 length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_u32()? as usize;
        self.read_raw(length)
    }

    /// Read exact number of raw bytes.
    ///
    /// The buffer grows with the bytes actually read, so a corrupt length
    /// cannot force a huge allocation.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let read = (&mut self.reader)
            .take(length as u64)
            .read_to_end(&mut bytes)?;
        self.position += read as u64;
        if read != length {
            return Err(RevdexError::corrupt_index(format!(
                "stream ended {read} bytes into a {length}-byte field"
            )));
        }
        Ok(bytes)
    }

    /// Get current position.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }
}

fn truncated(e: std::io::Error) -> RevdexError {
    if e.kind() == ErrorKind::UnexpectedEof {
        RevdexError::corrupt_index("unexpected end of stream")
    } else {
        RevdexError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_struct_writer_reader() {
        let storage = MemoryStorage::new_default();

        {
            let output = storage.create_output("test.struct").unwrap();
            let mut writer = StructWriter::new(output);

            writer.write_u32(5678).unwrap();
            writer.write_i32(-7).unwrap();
            writer.write_bytes(b"binary data").unwrap();
            writer.write_raw(b"raw").unwrap();
            assert_eq!(writer.position(), 4 + 4 + 4 + 11 + 3);

            writer.close().unwrap();
        }

        let input = storage.open_input("test.struct").unwrap();
        let mut reader = StructReader::new(input);

        assert_eq!(reader.read_u32().unwrap(), 5678);
        assert_eq!(reader.read_i32().unwrap(), -7);
        assert_eq!(reader.read_bytes().unwrap(), b"binary data");
        assert_eq!(reader.read_raw(3).unwrap(), b"raw");
        assert_eq!(reader.try_read_u32().unwrap(), None);
    }

    #[test]
    fn test_big_endian_layout() {
        let mut writer = StructWriter::new(Vec::new());
        writer.write_u32(0x0102_0304).unwrap();
        writer.write_i32(1).unwrap();
        assert_eq!(writer.into_inner(), vec![1, 2, 3, 4, 0, 0, 0, 1]);
    }

    #[test]
    fn test_truncated_field_is_corruption() {
        let mut reader = StructReader::new(&[0u8, 0, 1][..]);
        assert!(reader.try_read_u32().unwrap_err().is_corruption());

        let mut reader = StructReader::new(&[0u8, 0, 0, 9, b'a'][..]);
        assert!(reader.read_bytes().unwrap_err().is_corruption());
    }

    #[test]
    fn test_oversized_length_prefix_is_corruption() {
        // A 4 GiB length followed by two bytes
        let mut reader = StructReader::new(&[0xFFu8, 0xFF, 0xFF, 0xFF, b'a', b'b'][..]);
        let err = reader.read_bytes().unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(reader.position(), 6);
    }
}
