//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{GlaiveArgs, OutputFormat};
use crate::error::Result;

/// Result structure for the snapshot command.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub path: Option<String>,
    pub entries: Vec<String>,
}

/// Per-segment statistics.
#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentStats {
    pub name: String,
    pub doc_max: u32,
    pub deleted: u32,
    pub fields: Vec<String>,
}

/// Index statistics.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexStats {
    pub snapshot: Option<String>,
    pub total_documents: u32,
    pub deleted_documents: u32,
    pub size_bytes: u64,
    pub merge_cutoff: Option<u64>,
    pub segments: Vec<SegmentStats>,
}

/// One lock marker.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockInfo {
    pub path: String,
    pub host: Option<String>,
    pub pid: Option<u32>,
    pub acquired_at: Option<String>,
    pub stale: bool,
}

/// Result structure for the locks command.
#[derive(Debug, Serialize, Deserialize)]
pub struct LocksResult {
    pub locks: Vec<LockInfo>,
    pub cleared: usize,
}

/// Result structure for the add command.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdditionResult {
    pub documents_added: usize,
    pub duration_ms: u64,
    pub snapshot: Option<String>,
}

/// Result structure for the delete command.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeletionResult {
    pub documents_deleted: u32,
    pub snapshot: Option<String>,
}

/// Result structure for the merge command.
#[derive(Debug, Serialize, Deserialize)]
pub struct MergeResult {
    pub merged_segments: Vec<String>,
    pub snapshot: Option<String>,
    pub duration_ms: u64,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &GlaiveArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &GlaiveArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    print_human_value(&value, 0);
    Ok(())
}

fn print_human_value(value: &serde_json::Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                match val {
                    serde_json::Value::Array(items) if items.iter().any(|i| i.is_object()) => {
                        println!("{pad}{key}:");
                        for item in items {
                            print_human_value(item, indent + 1);
                            println!();
                        }
                    }
                    serde_json::Value::Object(_) => {
                        println!("{pad}{key}:");
                        print_human_value(val, indent + 1);
                    }
                    _ => println!("{pad}{key}: {}", format_value(val)),
                }
            }
        }
        _ => println!("{pad}{}", format_value(value)),
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &GlaiveArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

/// Format a value for display.
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        serde_json::Value::Object(_) => "[object]".to_string(),
        serde_json::Value::Null => "-".to_string(),
    }
}

/// Format bytes into human-readable format.
pub fn format_bytes(bytes: u64) -> String {
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
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1073741824), "1.0 GB");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&serde_json::json!("segment_1")), "segment_1");
        assert_eq!(format_value(&serde_json::json!(42)), "42");
        assert_eq!(format_value(&serde_json::json!(["a", "b"])), "[a, b]");
        assert_eq!(format_value(&serde_json::Value::Null), "-");
    }
}
