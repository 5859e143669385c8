//! Group varint encoding for sequences of positive 32-bit integers.
//!
//! Values are packed in groups of four behind a single header byte. The
//! header holds one 2-bit code per slot (slot 0 in the most significant
//! bits) giving that slot's byte length minus one. Each value follows in
//! big-endian order using exactly as many bytes as it needs.
//!
//! Zero cannot be encoded. A trailing partial group is padded with zero
//! slots, and the decoder treats a zero slot as the end of the data.
//!
//! ```
//! use revdex::codec::group_varint;
//!
//! let bytes = group_varint::encode(&[10, 990, 99000, 1]).unwrap();
//! assert_eq!(bytes.len(), 8);
//! assert_eq!(bytes[0], 0b0001_1000);
//! assert_eq!(group_varint::decode(&bytes).unwrap(), vec![10, 990, 99000, 1]);
//! ```

use std::io::{ErrorKind, Read, Write};

use crate::error::{Result, RevdexError};

/// Number of values sharing one header byte.
pub const GROUP_SIZE: usize = 4;

/// Slot byte lengths for every possible header byte.
static LENGTHS: [[u8; GROUP_SIZE]; 256] = build_length_table();

const fn build_length_table() -> [[u8; GROUP_SIZE]; 256] {
    let mut table = [[0u8; GROUP_SIZE]; 256];
    let mut header = 0;
    while header < 256 {
        let mut slot = 0;
        while slot < GROUP_SIZE {
            let shift = 6 - 2 * slot;
            table[header][slot] = ((header >> shift) & 0b11) as u8 + 1;
            slot += 1;
        }
        header += 1;
    }
    table
}

/// Number of bytes `value` occupies inside a group.
pub fn encoded_len(value: u32) -> usize {
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

/// Encode `values` into a new buffer, padding the final group.
pub fn encode(values: &[u32]) -> Result<Vec<u8>> {
    let mut encoder = GroupVarintEncoder::new(Vec::with_capacity(values.len() * 2));
    for &value in values {
        encoder.write(value)?;
    }
    encoder.finish_group()?;
    Ok(encoder.into_inner())
}

/// Decode every value in `bytes`, skipping zero padding.
pub fn decode(bytes: &[u8]) -> Result<Vec<u32>> {
    let mut decoder = GroupVarintDecoder::new(bytes);
    let mut values = Vec::new();
    loop {
        match decoder.next_slot()? {
            Slot::Value(value) => values.push(value),
            Slot::Padding => continue,
            Slot::End => break,
        }
    }
    Ok(values)
}

/// Streaming group varint encoder.
#[derive(Debug)]
pub struct GroupVarintEncoder<W: Write> {
    writer: W,
    pending: [u32; GROUP_SIZE],
    pending_len: usize,
    bytes_written: u64,
}

impl<W: Write> GroupVarintEncoder<W> {
    pub fn new(writer: W) -> Self {
        GroupVarintEncoder {
            writer,
            pending: [0; GROUP_SIZE],
            pending_len: 0,
            bytes_written: 0,
        }
    }

    /// Queue a value, writing the group once four values are pending.
    pub fn write(&mut self, value: u32) -> Result<()> {
        if value == 0 {
            return Err(RevdexError::invalid_argument(
                "group varint cannot encode zero",
            ));
        }

        self.pending[self.pending_len] = value;
        self.pending_len += 1;
        if self.pending_len == GROUP_SIZE {
            self.write_group()?;
        }
        Ok(())
    }

    /// Pad the pending partial group with zeros and write it.
    ///
    /// Does nothing when no values are pending, so the stream stays aligned
    /// to a group boundary either way.
    pub fn finish_group(&mut self) -> Result<()> {
        if self.pending_len == 0 {
            return Ok(());
        }
        for slot in &mut self.pending[self.pending_len..] {
            *slot = 0;
        }
        self.write_group()
    }

    /// Whether the pending group is empty.
    pub fn is_aligned(&self) -> bool {
        self.pending_len == 0
    }

    /// Total bytes handed to the underlying writer.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Unwrap the writer. Pending values that were not finished are dropped.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_group(&mut self) -> Result<()> {
        let mut buf = [0u8; 1 + GROUP_SIZE * 4];
        let mut header = 0u8;
        let mut len = 1;

        for (slot, &value) in self.pending.iter().enumerate() {
            let width = encoded_len(value);
            header |= ((width - 1) as u8) << (6 - 2 * slot);
            buf[len..len + width].copy_from_slice(&value.to_be_bytes()[4 - width..]);
            len += width;
        }
        buf[0] = header;

        self.writer.write_all(&buf[..len])?;
        self.bytes_written += len as u64;
        self.pending_len = 0;
        Ok(())
    }
}

/// Result of decoding one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Value(u32),
    Padding,
    End,
}

/// Streaming group varint decoder.
#[derive(Debug)]
pub struct GroupVarintDecoder<R: Read> {
    reader: R,
    group: [u32; GROUP_SIZE],
    // GROUP_SIZE means a new header must be read
    position: usize,
}

impl<R: Read> GroupVarintDecoder<R> {
    pub fn new(reader: R) -> Self {
        GroupVarintDecoder {
            reader,
            group: [0; GROUP_SIZE],
            position: GROUP_SIZE,
        }
    }

    /// Read the next value.
    ///
    /// Returns `None` at the end of the stream or at a zero padding slot. A
    /// padding slot discards the remainder of its group.
    pub fn read(&mut self) -> Result<Option<u32>> {
        match self.next_slot()? {
            Slot::Value(value) => Ok(Some(value)),
            Slot::Padding | Slot::End => Ok(None),
        }
    }

    /// Treat the current stream offset as a new group boundary.
    ///
    /// Values remaining in the current group are lost.
    pub fn reset(&mut self) {
        self.position = GROUP_SIZE;
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn next_slot(&mut self) -> Result<Slot> {
        if self.position == GROUP_SIZE && !self.read_group()? {
            return Ok(Slot::End);
        }

        let value = self.group[self.position];
        if value == 0 {
            self.position = GROUP_SIZE;
            return Ok(Slot::Padding);
        }
        self.position += 1;
        Ok(Slot::Value(value))
    }

    fn read_group(&mut self) -> Result<bool> {
        let mut header = [0u8; 1];
        loop {
            match self.reader.read(&mut header) {
                Ok(0) => return Ok(false),
                Ok(_) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let lengths = &LENGTHS[header[0] as usize];
        let total: usize = lengths.iter().map(|&l| l as usize).sum();
        let mut buf = [0u8; GROUP_SIZE * 4];
        self.reader
            .read_exact(&mut buf[..total])
            .map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => RevdexError::corrupt_index(format!(
                    "group header {:#010b} announces {total} bytes past the end of the stream",
                    header[0]
                )),
                _ => RevdexError::Io(e),
            })?;

        let mut offset = 0;
        for (slot, &length) in lengths.iter().enumerate() {
            let length = length as usize;
            self.group[slot] = buf[offset..offset + length]
                .iter()
                .fold(0u32, |acc, &byte| (acc << 8) | byte as u32);
            offset += length;
        }

        self.position = 0;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_table() {
        assert_eq!(LENGTHS[0], [1, 1, 1, 1]);
        assert_eq!(LENGTHS[0b0001_1000], [1, 2, 3, 1]);
        assert_eq!(LENGTHS[0b0001_1011], [1, 2, 3, 4]);
        assert_eq!(LENGTHS[255], [4, 4, 4, 4]);
    }

    #[test]
    fn test_full_group_layout() {
        let bytes = encode(&[10, 990, 99000, 1]).unwrap();
        assert_eq!(
            bytes,
            vec![
                0b0001_1000,
                0b0000_1010,
                0b0000_0011,
                0b1101_1110,
                0b0000_0001,
                0b1000_0010,
                0b1011_1000,
                0b0000_0001,
            ]
        );
    }

    #[test]
    fn test_partial_group_is_padded() {
        let bytes = encode(&[10, 990]).unwrap();
        assert_eq!(bytes, vec![0b0001_0000, 10, 3, 222, 0, 0]);

        let mut decoder = GroupVarintDecoder::new(&bytes[..]);
        assert_eq!(decoder.read().unwrap(), Some(10));
        assert_eq!(decoder.read().unwrap(), Some(990));
        assert_eq!(decoder.read().unwrap(), None);
        assert_eq!(decoder.read().unwrap(), None);
    }

    #[test]
    fn test_large_values() {
        let values = [u32::MAX, 1 << 31, 0x0100_0000, 0xFFFF_FFFE];
        let bytes = encode(&values).unwrap();
        assert_eq!(bytes.len(), 17);
        assert_eq!(bytes[0], 255);
        assert_eq!(decode(&bytes).unwrap(), values);
    }

    #[test]
    fn test_width_boundaries() {
        assert_eq!(encoded_len(1), 1);
        assert_eq!(encoded_len(255), 1);
        assert_eq!(encoded_len(1 << 8), 2);
        assert_eq!(encoded_len(1 << 16), 3);
        assert_eq!(encoded_len(1 << 24), 4);
    }

    #[test]
    fn test_empty_input() {
        assert!(encode(&[]).unwrap().is_empty());
        assert!(decode(&[]).unwrap().is_empty());

        let mut encoder = GroupVarintEncoder::new(Vec::new());
        encoder.finish_group().unwrap();
        assert_eq!(encoder.bytes_written(), 0);
    }

    #[test]
    fn test_zero_is_rejected() {
        let mut encoder = GroupVarintEncoder::new(Vec::new());
        let err = encoder.write(0).unwrap_err();
        assert!(matches!(err, RevdexError::InvalidArgument(_)));
    }

    #[test]
    fn test_reset_starts_new_group() {
        // Two independently padded lists back to back
        let mut bytes = encode(&[1, 2, 3]).unwrap();
        bytes.extend(encode(&[400, 5]).unwrap());

        let mut decoder = GroupVarintDecoder::new(&bytes[..]);
        assert_eq!(decoder.read().unwrap(), Some(1));
        assert_eq!(decoder.read().unwrap(), Some(2));
        assert_eq!(decoder.read().unwrap(), Some(3));
        decoder.reset();
        assert_eq!(decoder.read().unwrap(), Some(400));
        assert_eq!(decoder.read().unwrap(), Some(5));
    }

    #[test]
    fn test_truncated_group_is_corruption() {
        let bytes = encode(&[1000, 2000, 3000, 4000]).unwrap();
        let mut decoder = GroupVarintDecoder::new(&bytes[..bytes.len() - 1]);
        assert!(decoder.read().unwrap_err().is_corruption());
    }

    #[test]
    fn test_bytes_written_tracks_groups() {
        let mut encoder = GroupVarintEncoder::new(Vec::new());
        for value in [1, 2, 3, 4, 5] {
            encoder.write(value).unwrap();
        }
        assert_eq!(encoder.bytes_written(), 5);
        assert!(!encoder.is_aligned());
        encoder.finish_group().unwrap();
        assert_eq!(encoder.bytes_written(), 10);
        assert!(encoder.is_aligned());
    }
}
