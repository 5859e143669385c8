//! Output formatting for CLI commands.

use serde::Serialize;

use crate::cli::args::{OutputFormat, RevdexArgs};
use crate::error::Result;
use crate::index::{BuildSummary, IndexStats, Posting};

/// Result structure for an index build.
#[derive(Debug, Serialize)]
pub struct BuildResult {
    pub index: String,
    #[serde(flatten)]
    pub summary: BuildSummary,
    pub duration_ms: u64,
}

/// Result structure for a term lookup.
#[derive(Debug, Serialize)]
pub struct LookupResult {
    pub term: String,
    pub found: bool,
    pub document_frequency: u32,
    pub collection_frequency: u64,
    pub postings: Vec<Posting>,
}

/// Index statistics.
#[derive(Debug, Serialize)]
pub struct StatsResult {
    pub index: String,
    #[serde(flatten)]
    pub stats: IndexStats,
    pub dictionary_blocks: usize,
    pub index_size_bytes: u64,
}

/// One dictionary entry.
#[derive(Debug, Serialize)]
pub struct TermEntry {
    pub term: String,
    pub document_frequency: u32,
}

/// Result structure for a term listing.
#[derive(Debug, Serialize)]
pub struct TermsResult {
    pub terms: Vec<TermEntry>,
    pub truncated: bool,
}

/// Result structure for an external sort.
#[derive(Debug, Serialize)]
pub struct SortResult {
    pub input: String,
    pub output: String,
    pub records: u64,
    pub runs: usize,
    pub duration_ms: u64,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &RevdexArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &RevdexArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    for line in format_human(&value) {
        println!("{line}");
    }
    Ok(())
}

/// Lay out a value as `key: value` lines, listing arrays one item per line.
fn format_human(value: &serde_json::Value) -> Vec<String> {
    let serde_json::Value::Object(obj) = value else {
        return vec![format_value(value)];
    };

    let mut lines = Vec::new();
    for (key, val) in obj {
        match val {
            serde_json::Value::Array(items) => {
                lines.push(format!("{key}: ({} entries)", items.len()));
                lines.extend(items.iter().map(|item| format!("  {}", format_inline(item))));
            }
            serde_json::Value::Number(n) if key.ends_with("_bytes") => {
                let bytes = n.as_u64().unwrap_or(0);
                lines.push(format!("{key}: {}", format_bytes(bytes)));
            }
            _ => lines.push(format!("{key}: {}", format_value(val))),
        }
    }
    lines
}

/// Format an object on one line as `k=v` pairs.
fn format_inline(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(obj) => obj
            .iter()
            .map(|(k, v)| format!("{k}={}", format_value(v)))
            .collect::<Vec<_>>()
            .join(" "),
        other => format_value(other),
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &RevdexArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

/// Format a JSON value for display.
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(arr) => {
            let formatted_values = arr.iter().map(format_value).collect::<Vec<_>>().join(", ");
            format!("[{formatted_values}]")
        }
        serde_json::Value::Object(_) => "[object]".to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}

/// Format bytes into human-readable format.
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS[unit_index];
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0 MB");
    }

    #[test]
    fn test_format_lookup_human() {
        let result = LookupResult {
            term: "apple".to_string(),
            found: true,
            document_frequency: 2,
            collection_frequency: 5,
            postings: vec![Posting::new(1, 3), Posting::new(4, 2)],
        };
        let lines = format_human(&serde_json::to_value(&result).unwrap());

        assert!(lines.contains(&"term: apple".to_string()));
        assert!(lines.contains(&"postings: (2 entries)".to_string()));
        assert!(lines.contains(&"  doc_id=1 freq=3".to_string()));
    }

    #[test]
    fn test_format_stats_human() {
        let result = StatsResult {
            index: "idx".to_string(),
            stats: IndexStats {
                total_token_count: 39,
                unique_term_count: 3,
            },
            dictionary_blocks: 1,
            index_size_bytes: 4096,
        };
        let lines = format_human(&serde_json::to_value(&result).unwrap());

        assert!(lines.contains(&"total_token_count: 39".to_string()));
        assert!(lines.contains(&"index_size_bytes: 4.0 KB".to_string()));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(
            format_value(&serde_json::Value::String("test".to_string())),
            "test"
        );
        assert_eq!(format_value(&serde_json::json!([1, 2])), "[1, 2]");
        assert_eq!(format_value(&serde_json::Value::Null), "null");
    }
}
