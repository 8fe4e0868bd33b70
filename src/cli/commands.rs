//! Command implementations for the Glaive CLI.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use log::info;
use serde_json::Value;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::document::Document;
use crate::error::{GlaiveError, Result};
use crate::index::data::DataReader;
use crate::index::file_purger::FilePurger;
use crate::index::snapshot::Snapshot;
use crate::index::{BackgroundMerger, IndexManager, IndexManagerConfig, Indexer, PolyReader};
use crate::storage::lock::Lock;
use crate::storage::{Folder, FolderFactory};

/// Execute a CLI command.
pub fn execute_command(args: GlaiveArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => IndexManagerConfig::from_json_file(path)?,
        None => IndexManagerConfig::default(),
    };

    match &args.command {
        Command::Snapshot(index_args) => show_snapshot(index_args, &args),
        Command::Stats(index_args) => show_stats(index_args, config, &args),
        Command::Locks(locks_args) => show_locks(locks_args, config, &args),
        Command::Add(add_args) => add_documents(add_args, config, &args),
        Command::Delete(delete_args) => delete_documents(delete_args, config, &args),
        Command::Merge(merge_args) => run_merge(merge_args, config, &args),
        Command::Purge(index_args) => run_purge(index_args, config, &args),
    }
}

fn open_manager(path: &Path, config: IndexManagerConfig) -> Result<IndexManager> {
    let folder = FolderFactory::open_fs(path)?;
    Ok(IndexManager::with_config(folder, config))
}

/// Show the latest snapshot.
fn show_snapshot(args: &IndexArgs, cli_args: &GlaiveArgs) -> Result<()> {
    let folder = FolderFactory::open_fs(&args.index_path)?;
    let snapshot = Snapshot::open(folder.as_ref(), None)?;
    let result = SnapshotInfo {
        path: snapshot.path().map(str::to_string),
        entries: snapshot.list().to_vec(),
    };
    output_result("Latest snapshot", &result, cli_args)
}

/// Show document and segment statistics.
fn show_stats(args: &IndexArgs, config: IndexManagerConfig, cli_args: &GlaiveArgs) -> Result<()> {
    let manager = open_manager(&args.index_path, config)?;
    let mut reader = PolyReader::open(&manager)?;

    let segments = reader
        .seg_readers()
        .iter()
        .map(|r| SegmentStats {
            name: r.seg_name().to_string(),
            doc_max: r.doc_max(),
            deleted: r.del_count(),
            fields: r.segment().field_names().to_vec(),
        })
        .collect();

    let size_bytes = folder_size(manager.folder().as_ref())?;
    if cli_args.verbosity() > 1 {
        println!("Index occupies {}", format_bytes(size_bytes));
    }

    let stats = IndexStats {
        snapshot: reader.snapshot().path().map(str::to_string),
        total_documents: reader.doc_count(),
        deleted_documents: reader.del_count(),
        size_bytes,
        merge_cutoff: manager.read_merge_data()?.map(|data| data.cutoff),
        segments,
    };
    reader.close()?;

    output_result("Index statistics", &stats, cli_args)
}

fn folder_size(folder: &dyn Folder) -> Result<u64> {
    let mut total = 0;
    for path in folder.list_r("")? {
        let meta = folder.metadata(&path)?;
        if !meta.is_dir {
            total += meta.size;
        }
    }
    Ok(total)
}

/// List lock markers, optionally clearing stale ones first.
fn show_locks(args: &LocksArgs, config: IndexManagerConfig, cli_args: &GlaiveArgs) -> Result<()> {
    let manager = open_manager(&args.index_path, config)?;
    let factory = manager.lock_factory();

    let cleared = if args.clear_stale {
        factory.clear_all_stale()?
    } else {
        0
    };

    let locks = factory
        .markers()?
        .into_iter()
        .map(|marker| LockInfo {
            path: marker.path,
            host: marker.record.as_ref().map(|r| r.host.clone()),
            pid: marker.record.as_ref().map(|r| r.pid),
            acquired_at: marker.record.as_ref().map(|r| r.acquired_at.to_rfc3339()),
            stale: marker.stale,
        })
        .collect();

    output_result("Lock markers", &LocksResult { locks, cleared }, cli_args)
}

/// Add documents from a JSON Lines file.
fn add_documents(args: &AddArgs, config: IndexManagerConfig, cli_args: &GlaiveArgs) -> Result<()> {
    if args.create {
        fs::create_dir_all(&args.index_path)?;
    }
    let manager = open_manager(&args.index_path, config)?;
    let start = Instant::now();

    let mut indexer = Indexer::with_manager(manager, args.create, args.truncate)?;
    if args.optimize {
        indexer.optimize();
    }

    let reader = BufReader::new(File::open(&args.document_file)?);
    let mut added = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc = parse_document(&line).map_err(|e| {
            GlaiveError::other(format!("line {}: {e}", line_no + 1))
        })?;
        indexer.add_doc(&doc)?;
        added += 1;
    }
    indexer.commit()?;
    info!("Added {added} documents");

    let result = AdditionResult {
        documents_added: added,
        duration_ms: start.elapsed().as_millis() as u64,
        snapshot: indexer.snapshot().path().map(str::to_string),
    };
    output_result("Documents added", &result, cli_args)
}

/// Turn a JSON object into a document. Non-string values are stored as
/// their JSON text.
fn parse_document(line: &str) -> Result<Document> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(obj) = value else {
        return Err(GlaiveError::other("expected a JSON object"));
    };
    let mut doc = Document::new();
    for (field, value) in obj {
        match value {
            Value::String(text) => doc.add_field(field, text),
            Value::Null => {}
            other => doc.add_field(field, other.to_string()),
        }
    }
    Ok(doc)
}

/// Delete documents containing a term.
fn delete_documents(
    args: &DeleteArgs,
    config: IndexManagerConfig,
    cli_args: &GlaiveArgs,
) -> Result<()> {
    let manager = open_manager(&args.index_path, config)?;
    let mut indexer = Indexer::with_manager(manager, false, false)?;
    let deleted = indexer.delete_by_term(&args.field, &args.term)?;
    indexer.commit()?;

    let result = DeletionResult {
        documents_deleted: deleted,
        snapshot: indexer.snapshot().path().map(str::to_string),
    };
    output_result("Documents deleted", &result, cli_args)
}

/// Run a background merge to completion.
fn run_merge(args: &MergeArgs, config: IndexManagerConfig, cli_args: &GlaiveArgs) -> Result<()> {
    let manager = open_manager(&args.index_path, config)?;
    let start = Instant::now();

    let mut merger = BackgroundMerger::with_manager(manager)?;
    if args.optimize {
        merger.optimize();
    }
    merger.commit()?;

    let result = MergeResult {
        merged_segments: merger
            .merged_segments()
            .into_iter()
            .map(str::to_string)
            .collect(),
        snapshot: merger.snapshot().path().map(str::to_string),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    output_result("Merge finished", &result, cli_args)
}

/// Purge obsolete files under the write lock.
fn run_purge(args: &IndexArgs, config: IndexManagerConfig, cli_args: &GlaiveArgs) -> Result<()> {
    let manager = open_manager(&args.index_path, config)?;
    let mut write_lock = manager.make_write_lock();
    write_lock.clear_stale()?;
    write_lock.obtain()?;

    let report = FilePurger::new(&manager).purge();
    write_lock.release()?;
    let report = report?;

    output_result("Purge finished", &report, cli_args)
}
