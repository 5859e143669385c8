//! Index construction from a token stream.
//!
//! Building runs in two phases. The [`SpimiInverter`] cuts the doc-ordered
//! token stream into memory-bounded blocks, each written to storage as a
//! segment file. The [`SegmentMerger`] then folds every segment into a
//! [`DictionaryWriter`], which produces the final index files. Segment files
//! are removed once the build finishes, whether it succeeded or not.
//!
//! Every error of a build names its stage through
//! [`RevdexError::with_stage`]. A failed build leaves the previous index of
//! the storage, if any, in place.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};

use crate::error::{BuildStage, Result, RevdexError};
use crate::index::dictionary::DictionaryWriter;
use crate::index::{INDEX_FILES, IndexStats};
use crate::policy::MemoryPolicyConfig;
use crate::spimi::{
    InvertedBlock, MergeStats, SegmentMerger, SegmentReader, SegmentStats, SpimiInverter,
    TermOccurrence,
};
use crate::storage::{Storage, StorageOutput};

/// Configuration for [`IndexWriter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexWriterConfig {
    /// When the inverter flushes its buffer to a segment.
    pub memory_policy: MemoryPolicyConfig,
    /// Prefix of temporary segment file names.
    pub segment_prefix: String,
    /// Write segments on a background thread while the next block is filled.
    pub pipelined_flush: bool,
    /// Number of inverted blocks that may wait for the segment writer thread.
    /// Only used with `pipelined_flush`.
    pub buffer_size: usize,
}

impl Default for IndexWriterConfig {
    fn default() -> Self {
        IndexWriterConfig {
            memory_policy: MemoryPolicyConfig::default(),
            segment_prefix: "segment".to_string(),
            pipelined_flush: false,
            buffer_size: 1,
        }
    }
}

/// What one build produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    /// Segments written by the inverter.
    pub segments: usize,
    pub unique_terms: u32,
    pub total_tokens: u32,
    pub postings: usize,
}

/// Builds an index into a storage.
#[derive(Debug)]
pub struct IndexWriter {
    storage: Arc<dyn Storage>,
    config: IndexWriterConfig,
}

impl IndexWriter {
    pub fn new(storage: Arc<dyn Storage>, config: IndexWriterConfig) -> Self {
        IndexWriter { storage, config }
    }

    pub fn config(&self) -> &IndexWriterConfig {
        &self.config
    }

    /// Build the index from occurrences that cannot fail.
    pub fn build<I>(&self, tokens: I) -> Result<BuildSummary>
    where
        I: IntoIterator<Item = TermOccurrence>,
    {
        self.try_build(tokens.into_iter().map(Ok))
    }

    /// Build the index, stopping at the first error from `tokens`.
    ///
    /// Occurrences must arrive in non-decreasing doc id order. Any index
    /// already in the storage is replaced once the new one is complete.
    pub fn try_build<I>(&self, tokens: I) -> Result<BuildSummary>
    where
        I: IntoIterator<Item = Result<TermOccurrence>>,
    {
        let policy = self.config.memory_policy.build();
        log::info!(
            "Building index (memory policy: {}, pipelined flush: {})",
            policy.describe(),
            self.config.pipelined_flush
        );

        let mut tokens = tokens.into_iter();
        let mut inverter = SpimiInverter::new(policy);
        let mut segments = SegmentFiles::new(Arc::clone(&self.storage));

        let inverted = if self.config.pipelined_flush {
            self.invert_pipelined(&mut inverter, &mut tokens, &mut segments)
        } else {
            self.invert_sequential(&mut inverter, &mut tokens, &mut segments)
        };
        inverted.map_err(|e| e.with_stage(BuildStage::Inversion))?;

        let (stats, merge) = self
            .merge(&segments)
            .map_err(|e| e.with_stage(BuildStage::Merge))?;
        let summary = BuildSummary {
            segments: segments.len(),
            unique_terms: stats.unique_term_count,
            total_tokens: stats.total_token_count,
            postings: merge.postings,
        };

        log::info!(
            "Built index with {} terms and {} tokens from {} segments",
            summary.unique_terms,
            summary.total_tokens,
            summary.segments
        );
        Ok(summary)
    }

    /// Delete the files of a previously built index.
    ///
    /// Missing files are skipped.
    pub fn remove_index(storage: &dyn Storage) -> Result<()> {
        for name in INDEX_FILES {
            if storage.file_exists(name) {
                storage.delete_file(name)?;
            }
        }
        Ok(())
    }

    fn invert_sequential<I>(
        &self,
        inverter: &mut SpimiInverter,
        tokens: &mut I,
        segments: &mut SegmentFiles,
    ) -> Result<()>
    where
        I: Iterator<Item = Result<TermOccurrence>>,
    {
        while let Some(block) = inverter.invert_block(tokens)? {
            let name = segments.allocate(&self.config.segment_prefix);
            flush_segment(self.storage.as_ref(), &name, &block)?;
        }
        Ok(())
    }

    fn invert_pipelined<I>(
        &self,
        inverter: &mut SpimiInverter,
        tokens: &mut I,
        segments: &mut SegmentFiles,
    ) -> Result<()>
    where
        I: Iterator<Item = Result<TermOccurrence>>,
    {
        let (sender, receiver) = bounded::<(String, InvertedBlock)>(self.config.buffer_size);
        let storage = Arc::clone(&self.storage);

        let handle = thread::Builder::new()
            .name("segment-writer".to_string())
            .spawn(move || -> Result<()> {
                for (name, block) in receiver {
                    flush_segment(storage.as_ref(), &name, &block)?;
                }
                Ok(())
            })?;

        let mut inverted = Ok(());
        loop {
            match inverter.invert_block(tokens) {
                Ok(Some(block)) => {
                    let name = segments.allocate(&self.config.segment_prefix);
                    // A closed channel means the writer failed; join reports why
                    if sender.send((name, block)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    inverted = Err(e);
                    break;
                }
            }
        }
        drop(sender);

        let written = handle
            .join()
            .map_err(|_| RevdexError::ThreadJoinError("segment writer thread panicked".into()))?;
        inverted?;
        written
    }

    fn merge(&self, segments: &SegmentFiles) -> Result<(IndexStats, MergeStats)> {
        let result = self.write_dictionary(segments);
        if result.is_err() {
            // The dictionary writer is gone by now, so its outputs are closed
            DictionaryWriter::discard(self.storage.as_ref());
        }
        result
    }

    fn write_dictionary(&self, segments: &SegmentFiles) -> Result<(IndexStats, MergeStats)> {
        let mut sources = Vec::with_capacity(segments.len());
        for name in segments.names() {
            sources.push(SegmentReader::new(self.storage.open_input(name)?));
        }

        let mut dictionary = DictionaryWriter::new(Arc::clone(&self.storage))?;
        let merge = SegmentMerger::merge(sources, &mut dictionary)?;
        let stats = dictionary.finish()?;
        Ok((stats, merge))
    }
}

fn flush_segment(storage: &dyn Storage, name: &str, block: &InvertedBlock) -> Result<SegmentStats> {
    let output = storage.create_output(name)?;
    let (mut output, stats) = block.write_segment(output)?;
    output.close()?;

    log::info!(
        "Flushed segment {name}: {} terms, {} postings, {} bytes",
        stats.terms,
        stats.postings,
        stats.bytes
    );
    Ok(stats)
}

/// Names of the segments of one build, deleted on drop.
#[derive(Debug)]
struct SegmentFiles {
    storage: Arc<dyn Storage>,
    names: Vec<String>,
}

impl SegmentFiles {
    fn new(storage: Arc<dyn Storage>) -> Self {
        SegmentFiles {
            storage,
            names: Vec::new(),
        }
    }

    /// Reserve the next segment name.
    fn allocate(&mut self, prefix: &str) -> String {
        let name = format!("{prefix}_{:06}.seg", self.names.len());
        self.names.push(name.clone());
        name
    }

    fn names(&self) -> &[String] {
        &self.names
    }

    fn len(&self) -> usize {
        self.names.len()
    }
}

impl Drop for SegmentFiles {
    fn drop(&mut self) {
        for name in &self.names {
            if !self.storage.file_exists(name) {
                continue;
            }
            if let Err(e) = self.storage.delete_file(name) {
                log::warn!("Failed to delete segment {name}: {e}");
            }
        }
    }
}
