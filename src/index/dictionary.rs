//! Blocked term dictionary.
//!
//! Entries are grouped into blocks of [`BLOCK_SIZE`]. Only the first entry of
//! a block records an absolute term offset; the terms of a block are stored
//! contiguously, so every following offset is the previous offset plus the
//! previous term's length.
//!
//! On disk each block is a 16-byte first element followed by up to three
//! 12-byte elements:
//!
//! ```text
//! first: frequency:i32 posting_pointer:i32 term_length:i32 term_offset:i32
//! other: frequency:i32 posting_pointer:i32 term_length:i32
//! ```
//!
//! [`DictionaryWriter`] writes every index file under a staged name and only
//! renames them into place once all four are complete, so a failed build
//! leaves any previous index in the storage untouched.

use std::sync::Arc;

use serde::Serialize;

use crate::error::{BuildStage, Result, RevdexError};
use crate::index::posting::PostingWriter;
use crate::index::terms::{TermRef, TermStore};
use crate::index::{
    DICTIONARY_FILE, INDEX_FILES, IndexStats, POSTINGS_FILE, PostingSink, STATS_FILE, TERMS_FILE,
};
use crate::storage::{Storage, StorageOutput, StructReader, StructWriter, read_all};

/// Number of entries sharing one absolute term offset.
pub const BLOCK_SIZE: usize = 4;

/// Serialized size of the first element of a block.
pub const FIRST_ELEMENT_SIZE: usize = 16;

/// Serialized size of every other element of a block.
pub const OTHER_ELEMENT_SIZE: usize = 12;

const BLOCK_BYTES: usize = FIRST_ELEMENT_SIZE + (BLOCK_SIZE - 1) * OTHER_ELEMENT_SIZE;

/// Suffix of index files that are still being written.
pub const STAGED_SUFFIX: &str = ".staged";

/// Name under which `name` is written before the index is committed.
pub fn staged_name(name: &str) -> String {
    format!("{name}{STAGED_SUFFIX}")
}

/// Size of a dictionary file holding `entries` entries.
pub fn dictionary_file_size(entries: usize) -> usize {
    let full_blocks = entries / BLOCK_SIZE;
    let remainder = entries % BLOCK_SIZE;
    let mut size = full_blocks * BLOCK_BYTES;
    if remainder > 0 {
        size += FIRST_ELEMENT_SIZE + (remainder - 1) * OTHER_ELEMENT_SIZE;
    }
    size
}

/// Where a term's postings live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TermInfo {
    pub document_frequency: u32,
    pub posting_pointer: u32,
}

/// One decoded dictionary element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub document_frequency: u32,
    pub posting_pointer: u32,
    pub term_length: u32,
}

impl BlockEntry {
    pub fn info(&self) -> TermInfo {
        TermInfo {
            document_frequency: self.document_frequency,
            posting_pointer: self.posting_pointer,
        }
    }
}

#[derive(Debug)]
struct OpenTerm {
    term: TermRef,
    posting_pointer: u32,
}

/// Builds the four index files from terms arriving in ascending order.
#[derive(Debug)]
pub struct DictionaryWriter {
    storage: Arc<dyn Storage>,
    terms: TermStore,
    postings: PostingWriter<Box<dyn StorageOutput>>,
    entries: StructWriter<Box<dyn StorageOutput>>,
    open_term: Option<OpenTerm>,
    last_term: Option<TermRef>,
    entry_count: u64,
    total_tokens: u64,
    posting_count: u64,
}

impl DictionaryWriter {
    /// Create the staged postings and dictionary outputs in `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Result<Self> {
        let postings = PostingWriter::new(storage.create_output(&staged_name(POSTINGS_FILE))?);
        let entries = StructWriter::new(storage.create_output(&staged_name(DICTIONARY_FILE))?);

        Ok(DictionaryWriter {
            storage,
            terms: TermStore::new(),
            postings,
            entries,
            open_term: None,
            last_term: None,
            entry_count: 0,
            total_tokens: 0,
            posting_count: 0,
        })
    }

    /// Number of terms written so far, including the open one.
    pub fn term_count(&self) -> u64 {
        self.entry_count + self.open_term.is_some() as u64
    }

    /// Sum of all frequencies added so far.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Number of postings added so far.
    pub fn posting_count(&self) -> u64 {
        self.posting_count
    }

    fn close_open_term(&mut self) -> Result<()> {
        let Some(open) = self.open_term.take() else {
            return Ok(());
        };

        let document_frequency = self.postings.current_document_frequency();
        if document_frequency == 0 {
            let term = self.terms.deref_ref(open.term)?;
            return Err(RevdexError::invalid_operation(format!(
                "term {:?} has an empty posting list",
                String::from_utf8_lossy(term)
            )));
        }
        self.postings.finish_term()?;

        let position = (self.entry_count % BLOCK_SIZE as u64) as usize;
        self.entries.write_i32(to_i32(document_frequency, "document frequency")?)?;
        self.entries.write_i32(to_i32(open.posting_pointer, "posting pointer")?)?;
        self.entries.write_i32(to_i32(open.term.length, "term length")?)?;
        if position == 0 {
            self.entries.write_i32(to_i32(open.term.offset, "term offset")?)?;
        }

        self.entry_count += 1;
        self.last_term = Some(open.term);
        Ok(())
    }

    /// Close every output, persist the terms and stats files and commit the
    /// index.
    ///
    /// On failure the staged files are removed and the storage keeps whatever
    /// index it held before.
    pub fn finish(self) -> Result<IndexStats> {
        let storage = Arc::clone(&self.storage);
        let result = self.write_remaining().and_then(|stats| {
            commit(storage.as_ref())?;
            Ok(stats)
        });
        if result.is_err() {
            Self::discard(storage.as_ref());
        }
        result
    }

    /// Delete the staged files of an unfinished build.
    ///
    /// Failures are logged, not returned.
    pub fn discard(storage: &dyn Storage) {
        for name in INDEX_FILES {
            let staged = staged_name(name);
            if !storage.file_exists(&staged) {
                continue;
            }
            if let Err(e) = storage.delete_file(&staged) {
                log::warn!("Failed to delete staged file {staged}: {e}");
            }
        }
    }

    fn write_remaining(mut self) -> Result<IndexStats> {
        self.close_open_term()?;

        let stats = IndexStats {
            total_token_count: checked_stat(self.total_tokens, "total token count")?,
            unique_term_count: checked_stat(self.entry_count, "unique term count")?,
        };

        let mut postings = self.postings.finish()?;
        postings.close()?;
        self.entries.close()?;
        self.terms
            .write_to(self.storage.as_ref(), &staged_name(TERMS_FILE))?;
        stats.write_to(self.storage.as_ref(), &staged_name(STATS_FILE))?;

        log::debug!(
            "Wrote dictionary with {} terms, {} postings and {} tokens",
            stats.unique_term_count,
            self.posting_count,
            stats.total_token_count
        );
        Ok(stats)
    }
}

/// Move the staged files over the live index.
///
/// The stats file goes first and comes back last, so an index interrupted
/// halfway through the commit has no stats and refuses to open.
fn commit(storage: &dyn Storage) -> Result<()> {
    storage.delete_file(STATS_FILE)?;
    for name in [TERMS_FILE, POSTINGS_FILE, DICTIONARY_FILE, STATS_FILE] {
        storage.rename_file(&staged_name(name), name)?;
    }
    storage.sync()
}

impl PostingSink for DictionaryWriter {
    fn begin_term(&mut self, term: &[u8]) -> Result<()> {
        if term.is_empty() {
            return Err(RevdexError::invalid_operation("terms must not be empty"));
        }
        self.close_open_term()?;

        if let Some(last) = self.last_term {
            let last = self.terms.deref_ref(last)?;
            if term <= last {
                return Err(RevdexError::ordering(
                    BuildStage::Write,
                    format!(
                        "term {:?} after {:?}",
                        String::from_utf8_lossy(term),
                        String::from_utf8_lossy(last)
                    ),
                ));
            }
        }

        let posting_pointer = self.postings.start_term()?;
        let term = self.terms.append(term)?;
        self.open_term = Some(OpenTerm {
            term,
            posting_pointer,
        });
        Ok(())
    }

    fn add_posting(&mut self, doc_id: u32, freq: u32) -> Result<()> {
        self.postings.add(doc_id, freq)?;

        let total_tokens = self.total_tokens + freq as u64;
        if total_tokens > i32::MAX as u64 {
            let term = match &self.open_term {
                Some(open) => String::from_utf8_lossy(self.terms.deref_ref(open.term)?).into_owned(),
                None => String::new(),
            };
            return Err(RevdexError::resource_exhausted(format!(
                "total token count {total_tokens} exceeds int32 at term {term:?} doc {doc_id}"
            )));
        }
        self.total_tokens = total_tokens;
        self.posting_count += 1;
        Ok(())
    }
}

fn to_i32(value: u32, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| RevdexError::resource_exhausted(format!("{what} {value} exceeds int32")))
}

fn checked_stat(value: u64, what: &str) -> Result<u32> {
    if value > i32::MAX as u64 {
        return Err(RevdexError::resource_exhausted(format!(
            "{what} {value} exceeds int32"
        )));
    }
    Ok(value as u32)
}

fn read_u31(reader: &mut StructReader<&[u8]>, what: &str, index: usize) -> Result<u32> {
    let value = reader.read_i32()?;
    u32::try_from(value)
        .map_err(|_| RevdexError::corrupt_index(format!("entry {index} has negative {what}")))
}

/// The in-memory read side of a blocked dictionary.
#[derive(Debug)]
pub struct Dictionary {
    terms: TermStore,
    entries: Vec<BlockEntry>,
    block_offsets: Vec<u32>,
}

impl Dictionary {
    /// Load the dictionary and terms files, expecting `unique_terms` entries.
    pub fn load(storage: &dyn Storage, unique_terms: u32) -> Result<Self> {
        let terms = TermStore::load(storage, TERMS_FILE)?;
        let bytes = read_all(storage, DICTIONARY_FILE)?;
        Self::from_parts(terms, &bytes, unique_terms as usize)
    }

    /// Decode `count` entries from a serialized dictionary.
    pub fn from_parts(terms: TermStore, bytes: &[u8], count: usize) -> Result<Self> {
        let expected = dictionary_file_size(count);
        if bytes.len() != expected {
            return Err(RevdexError::corrupt_index(format!(
                "dictionary file holds {} bytes, expected {expected} for {count} terms",
                bytes.len()
            )));
        }

        let mut reader = StructReader::new(bytes);
        let mut entries = Vec::with_capacity(count);
        let mut block_offsets = Vec::with_capacity(count.div_ceil(BLOCK_SIZE));
        let mut next_offset = 0u64;

        for index in 0..count {
            let document_frequency = read_u31(&mut reader, "frequency", index)?;
            let posting_pointer = read_u31(&mut reader, "posting pointer", index)?;
            let term_length = read_u31(&mut reader, "term length", index)?;
            if index % BLOCK_SIZE == 0 {
                let offset = read_u31(&mut reader, "term offset", index)?;
                block_offsets.push(offset);
                next_offset = offset as u64;
            }

            next_offset += term_length as u64;
            if next_offset > terms.len() as u64 {
                return Err(RevdexError::corrupt_index(format!(
                    "term {index} ends at byte {next_offset} past the {} byte terms file",
                    terms.len()
                )));
            }
            if document_frequency == 0 {
                return Err(RevdexError::corrupt_index(format!(
                    "term {index} has an empty posting list"
                )));
            }

            entries.push(BlockEntry {
                document_frequency,
                posting_pointer,
                term_length,
            });
        }

        Ok(Dictionary {
            terms,
            entries,
            block_offsets,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.block_offsets.len()
    }

    pub fn entry(&self, index: usize) -> Option<&BlockEntry> {
        self.entries.get(index)
    }

    /// Resolve the term of entry `index` by walking its block.
    pub fn term(&self, index: usize) -> Result<&[u8]> {
        let entry = self.entries.get(index).ok_or_else(|| {
            RevdexError::invalid_argument(format!(
                "term index {index} out of range for {} terms",
                self.entries.len()
            ))
        })?;

        let block = index / BLOCK_SIZE;
        let block_start = block * BLOCK_SIZE;
        let offset = self.block_offsets[block]
            + self.entries[block_start..index]
                .iter()
                .map(|e| e.term_length)
                .sum::<u32>();
        self.terms.deref(offset, entry.term_length)
    }

    /// Position of `term` in the dictionary.
    pub fn find(&self, term: &[u8]) -> Result<Option<usize>> {
        // First block whose leading term is greater than `term`
        let mut low = 0;
        let mut high = self.block_offsets.len();
        while low < high {
            let mid = low + (high - low) / 2;
            if self.term(mid * BLOCK_SIZE)? <= term {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        if low == 0 {
            return Ok(None);
        }

        let block_start = (low - 1) * BLOCK_SIZE;
        let block_end = (block_start + BLOCK_SIZE).min(self.entries.len());
        let mut offset = self.block_offsets[low - 1];
        for index in block_start..block_end {
            let length = self.entries[index].term_length;
            let candidate = self.terms.deref(offset, length)?;
            if candidate == term {
                return Ok(Some(index));
            }
            if candidate > term {
                break;
            }
            offset += length;
        }
        Ok(None)
    }

    pub fn lookup(&self, term: &[u8]) -> Result<Option<TermInfo>> {
        Ok(self.find(term)?.map(|index| self.entries[index].info()))
    }

    /// All entries in term order.
    pub fn iter(&self) -> DictionaryIter<'_> {
        DictionaryIter {
            dictionary: self,
            index: 0,
            offset: 0,
        }
    }
}

/// Sequential iterator over `(term, info)` pairs.
#[derive(Debug)]
pub struct DictionaryIter<'a> {
    dictionary: &'a Dictionary,
    index: usize,
    offset: u32,
}

impl<'a> Iterator for DictionaryIter<'a> {
    type Item = Result<(&'a [u8], TermInfo)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.dictionary.entries.get(self.index)?;
        if self.index % BLOCK_SIZE == 0 {
            self.offset = self.dictionary.block_offsets[self.index / BLOCK_SIZE];
        }

        let term = self.dictionary.terms.deref(self.offset, entry.term_length);
        self.offset += entry.term_length;
        self.index += 1;
        Some(term.map(|term| (term, entry.info())))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.dictionary.entries.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl IndexStats {
    /// Persist as two big-endian int32 values under `name`.
    pub fn write_to(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_i32(to_i32(self.total_token_count, "total token count")?)?;
        writer.write_i32(to_i32(self.unique_term_count, "unique term count")?)?;
        writer.close()
    }

    pub fn load(storage: &dyn Storage) -> Result<Self> {
        let bytes = read_all(storage, STATS_FILE)?;
        if bytes.len() != 8 {
            return Err(RevdexError::corrupt_index(format!(
                "stats file holds {} bytes, expected 8",
                bytes.len()
            )));
        }

        let mut reader = StructReader::new(&bytes[..]);
        let total = reader.read_i32()?;
        let unique = reader.read_i32()?;
        if total < 0 || unique < 0 || unique > total {
            return Err(RevdexError::corrupt_index(format!(
                "inconsistent stats: {total} tokens, {unique} unique terms"
            )));
        }

        Ok(IndexStats {
            total_token_count: total as u32,
            unique_term_count: unique as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn build(terms: &[(&str, &[(u32, u32)])]) -> (Arc<dyn Storage>, IndexStats) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut writer = DictionaryWriter::new(Arc::clone(&storage)).unwrap();
        for (term, postings) in terms {
            writer.begin_term(term.as_bytes()).unwrap();
            for &(doc_id, freq) in postings.iter() {
                writer.add_posting(doc_id, freq).unwrap();
            }
        }
        let stats = writer.finish().unwrap();
        (storage, stats)
    }

    fn load(storage: &Arc<dyn Storage>, stats: IndexStats) -> Dictionary {
        Dictionary::load(storage.as_ref(), stats.unique_term_count).unwrap()
    }

    #[test]
    fn test_file_size_formula() {
        assert_eq!(dictionary_file_size(0), 0);
        assert_eq!(dictionary_file_size(1), 16);
        assert_eq!(dictionary_file_size(4), 52);
        assert_eq!(dictionary_file_size(5), 68);
        assert_eq!(dictionary_file_size(6), 80);
    }

    #[test]
    fn test_one_full_and_one_partial_block() {
        let words = ["alpha", "beta", "delta", "epsilon", "gamma"];
        let input: Vec<(&str, &[(u32, u32)])> =
            words.iter().map(|w| (*w, &[(1u32, 1u32)][..])).collect();
        let (storage, stats) = build(&input);

        assert_eq!(stats.unique_term_count, 5);
        assert_eq!(stats.total_token_count, 5);
        assert_eq!(storage.file_size(DICTIONARY_FILE).unwrap(), 68);

        let dictionary = load(&storage, stats);
        assert_eq!(dictionary.len(), 5);
        assert_eq!(dictionary.block_count(), 2);
        for (index, word) in words.iter().enumerate() {
            assert_eq!(dictionary.term(index).unwrap(), word.as_bytes());
            assert_eq!(dictionary.find(word.as_bytes()).unwrap(), Some(index));
        }
    }

    #[test]
    fn test_lookup_misses() {
        let (storage, stats) = build(&[
            ("b", &[(1, 1)]),
            ("d", &[(1, 2), (4, 1)]),
            ("f", &[(2, 1)]),
            ("h", &[(3, 1)]),
            ("j", &[(3, 1)]),
        ]);
        let dictionary = load(&storage, stats);

        for missing in ["a", "c", "e", "g", "i", "k", "dd", ""] {
            assert_eq!(dictionary.lookup(missing.as_bytes()).unwrap(), None);
        }

        let info = dictionary.lookup(b"d").unwrap().unwrap();
        assert_eq!(info.document_frequency, 2);
    }

    #[test]
    fn test_iter_matches_term() {
        let (storage, stats) = build(&[
            ("a", &[(1, 1)]),
            ("ab", &[(1, 1)]),
            ("abc", &[(1, 1)]),
            ("b", &[(1, 1)]),
            ("bc", &[(1, 1)]),
            ("c", &[(1, 1)]),
        ]);
        let dictionary = load(&storage, stats);

        let terms: Vec<Vec<u8>> = dictionary
            .iter()
            .map(|r| r.map(|(t, _)| t.to_vec()))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            terms,
            vec![
                b"a".to_vec(),
                b"ab".to_vec(),
                b"abc".to_vec(),
                b"b".to_vec(),
                b"bc".to_vec(),
                b"c".to_vec()
            ]
        );
    }

    #[test]
    fn test_writer_rejects_out_of_order_terms() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut writer = DictionaryWriter::new(storage).unwrap();

        writer.begin_term(b"m").unwrap();
        writer.add_posting(1, 1).unwrap();

        let err = writer.begin_term(b"m").unwrap_err();
        assert!(matches!(err, RevdexError::OrderingViolation { .. }));
        let err = writer.begin_term(b"a").unwrap_err();
        assert!(matches!(err, RevdexError::OrderingViolation { .. }));
        assert!(matches!(
            writer.begin_term(b"").unwrap_err(),
            RevdexError::InvalidOperation(_)
        ));
    }

    #[test]
    fn test_writer_rejects_empty_posting_list() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut writer = DictionaryWriter::new(storage).unwrap();

        writer.begin_term(b"lonely").unwrap();
        assert!(matches!(
            writer.finish().unwrap_err(),
            RevdexError::InvalidOperation(_)
        ));
    }

    #[test]
    fn test_token_overflow_names_term_and_doc() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut writer = DictionaryWriter::new(Arc::clone(&storage)).unwrap();

        writer.begin_term(b"a").unwrap();
        writer.add_posting(1, i32::MAX as u32).unwrap();
        writer.begin_term(b"b").unwrap();
        let err = writer.add_posting(2, 5).unwrap_err();
        assert!(matches!(err, RevdexError::ResourceExhausted(_)));
        assert!(err.to_string().contains("term \"b\" doc 2"), "{err}");
    }

    #[test]
    fn test_uncommitted_writer_keeps_previous_index() {
        let (storage, stats) = build(&[("a", &[(1, 1)]), ("b", &[(2, 1)])]);

        {
            let mut writer = DictionaryWriter::new(Arc::clone(&storage)).unwrap();
            writer.begin_term(b"zz").unwrap();
            writer.add_posting(1, 3).unwrap();
            writer.begin_term(b"lonely").unwrap_err();
        }
        DictionaryWriter::discard(storage.as_ref());

        let mut files = storage.list_files().unwrap();
        files.sort();
        assert_eq!(
            files,
            vec!["dictionary.bin", "postings.bin", "stats.bin", "terms.bin"]
        );
        assert_eq!(IndexStats::load(storage.as_ref()).unwrap(), stats);
        assert_eq!(load(&storage, stats).term(1).unwrap(), b"b");
    }

    #[test]
    fn test_failed_finish_removes_staged_files() {
        let (storage, stats) = build(&[("a", &[(1, 1)])]);

        let mut writer = DictionaryWriter::new(Arc::clone(&storage)).unwrap();
        writer.begin_term(b"empty").unwrap();
        assert!(writer.finish().is_err());

        assert!(
            storage
                .list_files()
                .unwrap()
                .iter()
                .all(|name| !name.ends_with(STAGED_SUFFIX))
        );
        assert_eq!(IndexStats::load(storage.as_ref()).unwrap(), stats);
    }

    #[test]
    fn test_size_mismatch_is_corruption() {
        let (storage, stats) = build(&[("a", &[(1, 1)]), ("b", &[(1, 1)])]);
        let err = Dictionary::load(storage.as_ref(), stats.unique_term_count + 1).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_stats_round_trip_and_validation() {
        let storage = MemoryStorage::new_default();
        let stats = IndexStats {
            total_token_count: 10,
            unique_term_count: 3,
        };
        stats.write_to(&storage, STATS_FILE).unwrap();
        assert_eq!(IndexStats::load(&storage).unwrap(), stats);
        assert_eq!(
            crate::storage::read_all(&storage, STATS_FILE).unwrap(),
            vec![0, 0, 0, 10, 0, 0, 0, 3]
        );

        storage.put_file(STATS_FILE, vec![0, 0, 0, 1, 0, 0, 0, 2]);
        assert!(IndexStats::load(&storage).unwrap_err().is_corruption());
    }
}
