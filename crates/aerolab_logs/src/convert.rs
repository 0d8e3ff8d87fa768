//! Batch conversion of binary flight logs to CSV.
//!
//! Walks a directory tree, hands every matching log to an external dump
//! tool, and deletes the binary original once its CSV sibling exists. A
//! failed file is logged and skipped; one bad log never aborts the batch.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{LogError, LogResult};

/// Options for a batch conversion run.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Dump invocation, e.g. `["python", "sdlog2_dump.py"]`. The input path
    /// and `-f <output.csv>` are appended per file.
    pub dump_command: Vec<String>,
    /// Log file extension to match (without the dot).
    pub extension: String,
    /// Keep the binary originals instead of deleting them on success.
    pub keep_originals: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            dump_command: vec!["python".to_string(), "sdlog2_dump.py".to_string()],
            extension: "px4log".to_string(),
            keep_originals: false,
        }
    }
}

/// Outcome counts for one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    pub scanned: usize,
    pub converted: usize,
    pub failed: usize,
}

/// The CSV sibling a log converts into.
pub fn csv_sibling(path: &Path) -> PathBuf {
    path.with_extension("csv")
}

/// Converts every matching log under `root`, best-effort.
///
/// Only the directory walk itself is fatal; per-file failures are counted,
/// reported through `tracing::warn!`, and skipped.
pub fn convert_tree(root: &Path, options: &ConvertOptions) -> LogResult<ConvertSummary> {
    let (program, args) = options
        .dump_command
        .split_first()
        .ok_or(LogError::EmptyDumpCommand)?;

    let mut logs = Vec::new();
    collect_logs(root, &options.extension, &mut logs)?;

    let mut summary = ConvertSummary {
        scanned: logs.len(),
        ..ConvertSummary::default()
    };
    for path in logs {
        match convert_one(&path, program, args, options.keep_originals) {
            Ok(()) => summary.converted += 1,
            Err(err) => {
                tracing::warn!("skipping {}: {}", path.display(), err);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

fn collect_logs(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) -> LogResult<()> {
    let entries = fs::read_dir(dir).map_err(|source| LogError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| LogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_logs(&path, extension, out)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some(extension) {
            out.push(path);
        }
    }
    Ok(())
}

fn convert_one(path: &Path, program: &str, args: &[String], keep_original: bool) -> LogResult<()> {
    let output_path = csv_sibling(path);
    let output = Command::new(program)
        .args(args)
        .arg(path)
        .arg("-f")
        .arg(&output_path)
        .output()
        .map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if !output.status.success() {
        return Err(LogError::DumpFailed {
            path: path.to_path_buf(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    if !keep_original {
        fs::remove_file(path).map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}
