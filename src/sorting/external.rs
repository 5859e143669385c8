//! Disk-backed merge sort.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::policy::{BufferUsage, MemoryPolicy, MemoryPolicyConfig};
use crate::sorting::codec::RecordCodec;
use crate::storage::{Storage, StorageInput, StorageOutput};

/// Configuration for [`ExternalSorter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSorterConfig {
    /// When to cut the in-memory buffer into a run.
    pub memory_policy: MemoryPolicyConfig,
    /// Prefix for run file names.
    pub run_prefix: String,
}

impl Default for ExternalSorterConfig {
    fn default() -> Self {
        ExternalSorterConfig {
            memory_policy: MemoryPolicyConfig::default(),
            run_prefix: "sort".to_string(),
        }
    }
}

/// Counts describing one sort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SortStats {
    pub records: u64,
    pub runs: usize,
}

/// Sorts arbitrarily many records with bounded memory.
///
/// Records are buffered until the memory policy is exhausted, sorted, and
/// written to a run file in `storage`. The runs are then merged lazily. Run
/// files are removed by [`close`](ExternalSorter::close), by the next sort,
/// or when the sorter is dropped. Equal records keep their input order.
pub struct ExternalSorter<T, C, F> {
    storage: Arc<dyn Storage>,
    codec: Arc<C>,
    comparator: F,
    policy: Box<dyn MemoryPolicy>,
    run_prefix: String,
    session: Uuid,
    runs: Vec<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C, F> ExternalSorter<T, C, F>
where
    C: RecordCodec<T>,
    F: Fn(&T, &T) -> Ordering,
{
    pub fn new(storage: Arc<dyn Storage>, codec: C, comparator: F, config: ExternalSorterConfig) -> Self {
        ExternalSorter {
            storage,
            codec: Arc::new(codec),
            comparator,
            policy: config.memory_policy.build(),
            run_prefix: config.run_prefix,
            session: Uuid::new_v4(),
            runs: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Replace the memory policy built from the configuration.
    pub fn with_policy(mut self, policy: Box<dyn MemoryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Names of the run files currently on storage.
    pub fn run_files(&self) -> &[String] {
        &self.runs
    }

    /// Sort every record of `input` into `output`.
    pub fn sort(&mut self, input: &mut dyn Read, output: &mut dyn Write) -> Result<SortStats> {
        let codec = Arc::clone(&self.codec);
        let records = std::iter::from_fn(move || codec.decode(input).transpose());
        let runs = self.build_runs(records)?;

        let mut written = 0u64;
        for record in self.merge_runs()? {
            self.codec.encode(&record?, output)?;
            written += 1;
        }
        output.flush()?;

        log::info!("Sorted {written} records using {runs} runs");
        Ok(SortStats {
            records: written,
            runs,
        })
    }

    /// Sort `elements`, returning an iterator over the merged runs.
    pub fn sort_iter<I>(&mut self, elements: I) -> Result<MergedRuns<'_, T, C, F>>
    where
        I: IntoIterator<Item = Result<T>>,
    {
        self.build_runs(elements.into_iter())?;
        self.merge_runs()
    }

    /// Delete all run files.
    pub fn close(&mut self) -> Result<()> {
        for run in self.runs.drain(..) {
            self.storage.delete_file(&run)?;
        }
        Ok(())
    }

    fn run_name(&self, index: usize) -> String {
        format!("{}-{}_{index:06}.run", self.run_prefix, self.session)
    }

    fn build_runs<I>(&mut self, elements: I) -> Result<usize>
    where
        I: Iterator<Item = Result<T>>,
    {
        self.close()?;
        let mut elements = elements.fuse();

        loop {
            let mut buffer = Vec::new();
            let mut usage = BufferUsage::default();
            while usage.elements == 0 || self.policy.has_capacity(&usage) {
                let Some(element) = elements.next() else {
                    break;
                };
                buffer.push(element?);
                usage.elements += 1;
                usage.approx_bytes += size_of::<T>();
            }
            self.policy.reset();

            if buffer.is_empty() {
                break;
            }
            self.write_run(buffer)?;
        }

        log::debug!(
            "Created {} sorted runs with prefix {}",
            self.runs.len(),
            self.run_prefix
        );
        Ok(self.runs.len())
    }

    fn write_run(&mut self, mut buffer: Vec<T>) -> Result<()> {
        let comparator = &self.comparator;
        buffer.sort_by(|a, b| comparator(a, b));

        let name = self.run_name(self.runs.len());
        let mut output = self.storage.create_output(&name)?;
        self.runs.push(name);
        for record in &buffer {
            self.codec.encode(record, &mut output)?;
        }
        let bytes = output.position();
        output.close()?;

        log::debug!(
            "Wrote run {} with {} records ({bytes} bytes)",
            self.runs.len(),
            buffer.len()
        );
        Ok(())
    }

    fn merge_runs(&self) -> Result<MergedRuns<'_, T, C, F>> {
        let mut inputs = Vec::with_capacity(self.runs.len());
        let mut heap = BinaryHeap::with_capacity(self.runs.len());

        for (run, name) in self.runs.iter().enumerate() {
            let mut input = self.storage.open_input(name)?;
            if let Some(value) = self.codec.decode(&mut input)? {
                heap.push(HeapEntry {
                    value,
                    run,
                    comparator: &self.comparator,
                });
            }
            inputs.push(input);
        }

        Ok(MergedRuns {
            sorter: self,
            inputs,
            heap,
        })
    }
}

impl<T, C, F> Drop for ExternalSorter<T, C, F> {
    fn drop(&mut self) {
        for run in self.runs.drain(..) {
            if let Err(e) = self.storage.delete_file(&run) {
                log::warn!("Failed to delete sort run {run}: {e}");
            }
        }
    }
}

/// The smallest pending record of one run.
struct HeapEntry<'a, T, F> {
    value: T,
    run: usize,
    comparator: &'a F,
}

impl<T, F: Fn(&T, &T) -> Ordering> PartialEq for HeapEntry<'_, T, F> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T, F: Fn(&T, &T) -> Ordering> Eq for HeapEntry<'_, T, F> {}

impl<T, F: Fn(&T, &T) -> Ordering> PartialOrd for HeapEntry<'_, T, F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, F: Fn(&T, &T) -> Ordering> Ord for HeapEntry<'_, T, F> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: smallest record first, earlier run on ties
        (self.comparator)(&other.value, &self.value).then_with(|| other.run.cmp(&self.run))
    }
}

/// Iterator over the globally sorted records of all runs.
pub struct MergedRuns<'a, T, C, F> {
    sorter: &'a ExternalSorter<T, C, F>,
    inputs: Vec<Box<dyn StorageInput>>,
    heap: BinaryHeap<HeapEntry<'a, T, F>>,
}

impl<T, C, F> Iterator for MergedRuns<'_, T, C, F>
where
    C: RecordCodec<T>,
    F: Fn(&T, &T) -> Ordering,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.heap.pop()?;

        match self.sorter.codec.decode(&mut self.inputs[entry.run]) {
            Ok(Some(value)) => self.heap.push(HeapEntry {
                value,
                run: entry.run,
                comparator: entry.comparator,
            }),
            Ok(None) => {}
            Err(e) => {
                self.heap.clear();
                return Some(Err(e));
            }
        }

        Some(Ok(entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ElementCountPolicy;
    use crate::sorting::codec::U32Codec;
    use crate::storage::memory::MemoryStorage;

    fn sorter(
        storage: Arc<dyn Storage>,
        block: usize,
    ) -> ExternalSorter<u32, U32Codec, impl Fn(&u32, &u32) -> Ordering> {
        ExternalSorter::new(storage, U32Codec, |a: &u32, b: &u32| a.cmp(b), ExternalSorterConfig::default())
            .with_policy(Box::new(ElementCountPolicy::new(block)))
    }

    #[test]
    fn test_sort_iter_multiple_runs() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut sorter = sorter(Arc::clone(&storage), 3);

        let values = vec![9, 4, 7, 1, 8, 2, 6, 3, 5, 4];
        let sorted: Vec<u32> = sorter
            .sort_iter(values.into_iter().map(Ok))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(sorted, vec![1, 2, 3, 4, 4, 5, 6, 7, 8, 9]);
        assert_eq!(sorter.run_files().len(), 4);
        assert_eq!(storage.list_files().unwrap().len(), 4);

        sorter.close().unwrap();
        assert!(storage.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_sort_streams() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut sorter = sorter(Arc::clone(&storage), 2);

        let mut input = Vec::new();
        for value in [30u32, 10, 20, 10, 40] {
            U32Codec.encode(&value, &mut input).unwrap();
        }
        let mut output = Vec::new();
        let stats = sorter.sort(&mut &input[..], &mut output).unwrap();

        assert_eq!(stats, SortStats { records: 5, runs: 3 });
        let mut reader = &output[..];
        let decoded: Vec<u32> = std::iter::from_fn(|| U32Codec.decode(&mut reader).unwrap()).collect();
        assert_eq!(decoded, vec![10, 10, 20, 30, 40]);
    }

    #[test]
    fn test_empty_input() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut sorter = sorter(Arc::clone(&storage), 2);
        let mut output = Vec::new();

        let stats = sorter.sort(&mut &[][..], &mut output).unwrap();
        assert_eq!(stats, SortStats { records: 0, runs: 0 });
        assert!(output.is_empty());
    }

    #[test]
    fn test_ties_keep_input_order() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let codec = crate::sorting::codec::BincodeCodec::<(u32, u32)>::new();
        let mut sorter = ExternalSorter::new(
            storage,
            codec,
            |a: &(u32, u32), b: &(u32, u32)| a.0.cmp(&b.0),
            ExternalSorterConfig::default(),
        )
        .with_policy(Box::new(ElementCountPolicy::new(2)));

        let input = vec![(2, 0), (1, 1), (2, 2), (1, 3), (2, 4), (1, 5)];
        let sorted: Vec<(u32, u32)> = sorter
            .sort_iter(input.into_iter().map(Ok))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(sorted, vec![(1, 1), (1, 3), (1, 5), (2, 0), (2, 2), (2, 4)]);
    }

    #[test]
    fn test_drop_removes_runs() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        {
            let mut sorter = sorter(Arc::clone(&storage), 1);
            let merged = sorter.sort_iter([3, 2, 1].map(Ok)).unwrap();
            assert_eq!(merged.count(), 3);
            assert_eq!(storage.list_files().unwrap().len(), 3);
        }
        assert!(storage.list_files().unwrap().is_empty());
    }
}
