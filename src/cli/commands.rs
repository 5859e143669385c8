//! Command implementations for the revdex CLI.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};

use crate::cli::args::*;
use crate::cli::output::*;
use crate::error::{Result as RevdexResult, RevdexError};
use crate::index::{INDEX_FILES, IndexReader, IndexWriter, IndexWriterConfig};
use crate::policy::MemoryPolicyConfig;
use crate::sorting::{ExternalSorter, ExternalSorterConfig, U32Codec};
use crate::spimi::TermOccurrence;
use crate::storage::file::FileStorageConfig;
use crate::storage::{Storage, StorageConfig, StorageFactory};

/// Execute a CLI command.
pub fn execute_command(args: RevdexArgs) -> anyhow::Result<()> {
    match &args.command {
        Command::Build(build_args) => build_index(build_args, &args),
        Command::Lookup(lookup_args) => lookup_term(lookup_args, &args),
        Command::Stats(stats_args) => show_stats(stats_args, &args),
        Command::Terms(terms_args) => list_terms(terms_args, &args),
        Command::Sort(sort_args) => sort_file(sort_args, &args),
    }
}

/// Build an index from an occurrence file.
fn build_index(args: &BuildArgs, cli_args: &RevdexArgs) -> anyhow::Result<()> {
    let config = writer_config(args)?;
    let input = File::open(&args.input)
        .with_context(|| format!("failed to open input {}", args.input.display()))?;
    let storage = file_storage(&args.index)?;

    let start_time = Instant::now();
    let tokens = BufReader::new(input)
        .lines()
        .enumerate()
        .filter_map(|(number, line)| match line {
            Ok(line) => parse_occurrence(&line, number + 1).transpose(),
            Err(e) => Some(Err(RevdexError::from(e))),
        });

    let summary = IndexWriter::new(storage, config)
        .try_build(tokens)
        .with_context(|| format!("failed to build index {}", args.index.display()))?;

    output_result(
        "Index built successfully",
        &BuildResult {
            index: args.index.display().to_string(),
            summary,
            duration_ms: start_time.elapsed().as_millis() as u64,
        },
        cli_args,
    )?;
    Ok(())
}

/// Print the postings of one term.
fn lookup_term(args: &LookupArgs, cli_args: &RevdexArgs) -> anyhow::Result<()> {
    let reader = open_index(&args.index)?;
    let term = args.term.as_bytes();

    let info = reader
        .lookup_term(term)
        .with_context(|| format!("failed to look up {:?}", args.term))?;
    let postings = reader
        .postings(term)?
        .take(args.limit)
        .collect::<RevdexResult<Vec<_>>>()
        .with_context(|| format!("failed to read postings of {:?}", args.term))?;

    output_result(
        &format!("Postings for {:?}", args.term),
        &LookupResult {
            term: args.term.clone(),
            found: info.is_some(),
            document_frequency: info.map_or(0, |i| i.document_frequency),
            collection_frequency: reader.collection_frequency(term)?,
            postings,
        },
        cli_args,
    )?;
    Ok(())
}

/// Show index statistics.
fn show_stats(args: &StatsArgs, cli_args: &RevdexArgs) -> anyhow::Result<()> {
    let reader = open_index(&args.index)?;

    let mut index_size_bytes = 0;
    for name in INDEX_FILES {
        index_size_bytes += fs::metadata(args.index.join(name))
            .with_context(|| format!("failed to stat {name}"))?
            .len();
    }

    output_result(
        "Index statistics",
        &StatsResult {
            index: args.index.display().to_string(),
            stats: reader.stats(),
            dictionary_blocks: reader.dictionary().block_count(),
            index_size_bytes,
        },
        cli_args,
    )?;
    Ok(())
}

/// List dictionary terms in order.
fn list_terms(args: &TermsArgs, cli_args: &RevdexArgs) -> anyhow::Result<()> {
    let reader = open_index(&args.index)?;
    let limit = args.limit.unwrap_or(usize::MAX);

    let mut terms = Vec::new();
    for entry in reader.terms().take(limit) {
        let (term, info) = entry.context("failed to read dictionary")?;
        terms.push(TermEntry {
            term: String::from_utf8_lossy(term).into_owned(),
            document_frequency: info.document_frequency,
        });
    }

    output_result(
        "Dictionary terms",
        &TermsResult {
            truncated: terms.len() < reader.dictionary().len(),
            terms,
        },
        cli_args,
    )?;
    Ok(())
}

/// External-sort a file of u32 values.
fn sort_file(args: &SortArgs, cli_args: &RevdexArgs) -> anyhow::Result<()> {
    let temp_dir = match &args.temp_dir {
        Some(dir) => dir.clone(),
        None => match args.output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => ".".into(),
        },
    };
    let storage = file_storage(&temp_dir)?;

    let mut config = ExternalSorterConfig::default();
    if let Some(max_elements) = args.max_elements {
        config.memory_policy = MemoryPolicyConfig::MaxElements { max_elements };
    }

    let mut input = BufReader::new(
        File::open(&args.input)
            .with_context(|| format!("failed to open input {}", args.input.display()))?,
    );
    let mut output = BufWriter::new(
        File::create(&args.output)
            .with_context(|| format!("failed to create output {}", args.output.display()))?,
    );

    let start_time = Instant::now();
    let mut sorter = ExternalSorter::new(storage, U32Codec, |a: &u32, b: &u32| a.cmp(b), config);
    let stats = sorter
        .sort(&mut input, &mut output)
        .with_context(|| format!("failed to sort {}", args.input.display()))?;
    sorter.close().context("failed to remove sort runs")?;
    output.flush()?;

    output_result(
        "Sort completed",
        &SortResult {
            input: args.input.display().to_string(),
            output: args.output.display().to_string(),
            records: stats.records,
            runs: stats.runs,
            duration_ms: start_time.elapsed().as_millis() as u64,
        },
        cli_args,
    )?;
    Ok(())
}

/// Load the writer configuration and apply command line overrides.
fn writer_config(args: &BuildArgs) -> anyhow::Result<IndexWriterConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => IndexWriterConfig::default(),
    };

    if let Some(max_elements) = args.max_elements {
        config.memory_policy = MemoryPolicyConfig::MaxElements { max_elements };
    }
    if let Some(max_bytes) = args.max_buffered_bytes {
        config.memory_policy = MemoryPolicyConfig::MaxBufferedBytes { max_bytes };
    }
    if args.pipelined {
        config.pipelined_flush = true;
    }
    Ok(config)
}

fn file_storage(dir: &Path) -> anyhow::Result<Arc<dyn Storage>> {
    StorageFactory::create(StorageConfig::File(FileStorageConfig::new(dir)))
        .with_context(|| format!("failed to open directory {}", dir.display()))
}

fn open_index(dir: &Path) -> anyhow::Result<IndexReader> {
    if !dir.is_dir() {
        bail!("index directory {} does not exist", dir.display());
    }
    IndexReader::open(file_storage(dir)?)
        .with_context(|| format!("failed to open index {}", dir.display()))
}

/// Parse one `term<TAB>doc_id<TAB>freq` line. Blank lines yield `None`.
fn parse_occurrence(line: &str, number: usize) -> RevdexResult<Option<TermOccurrence>> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return Ok(None);
    }

    let mut fields = line.split('\t');
    let (Some(term), Some(doc_id), Some(freq), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(RevdexError::invalid_argument(format!(
            "line {number}: expected term, doc id and frequency separated by tabs"
        )));
    };

    let parse = |field: &str, what: &str| {
        field.trim().parse::<u32>().map_err(|e| {
            RevdexError::invalid_argument(format!("line {number}: invalid {what} {field:?}: {e}"))
        })
    };
    Ok(Some(TermOccurrence::new(
        term,
        parse(doc_id, "doc id")?,
        parse(freq, "frequency")?,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_occurrence() {
        assert_eq!(
            parse_occurrence("apple\t3\t2", 1).unwrap(),
            Some(TermOccurrence::new("apple", 3, 2))
        );
        assert_eq!(
            parse_occurrence("pear\t10\t1\r", 2).unwrap(),
            Some(TermOccurrence::new("pear", 10, 1))
        );
        assert_eq!(parse_occurrence("   ", 3).unwrap(), None);
    }

    #[test]
    fn test_parse_occurrence_errors() {
        let err = parse_occurrence("apple 3 2", 7).unwrap_err();
        assert!(err.to_string().contains("line 7"));

        let err = parse_occurrence("apple\tthree\t2", 8).unwrap_err();
        assert!(err.to_string().contains("invalid doc id"));

        assert!(parse_occurrence("a\t1\t1\textra", 9).is_err());
    }

    #[test]
    fn test_build_and_lookup_commands() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("tokens.tsv");
        fs::write(&input, "b\t1\t2\na\t1\t1\n\nb\t2\t3\n").unwrap();
        let index = dir.path().join("index");

        let args = RevdexArgs {
            verbose: 0,
            quiet: true,
            output_format: OutputFormat::Json,
            pretty: false,
            command: Command::Build(BuildArgs {
                input,
                index: index.clone(),
                config: None,
                max_elements: Some(1),
                max_buffered_bytes: None,
                pipelined: false,
            }),
        };
        execute_command(args.clone()).unwrap();

        let reader = open_index(&index).unwrap();
        assert_eq!(reader.unique_term_count(), 2);
        assert_eq!(reader.collection_frequency(b"b").unwrap(), 5);

        let lookup = RevdexArgs {
            command: Command::Lookup(LookupArgs {
                index: index.clone(),
                term: "b".to_string(),
                limit: 10,
            }),
            ..args
        };
        execute_command(lookup).unwrap();
    }

    #[test]
    fn test_open_missing_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = open_index(&dir.path().join("missing")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
