use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

pub type LogResult<T> = Result<T, LogError>;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dump command is empty")]
    EmptyDumpCommand,

    #[error("dump tool failed on {path} ({status}): {stderr}")]
    DumpFailed {
        path: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[error("malformed csv: {reason}")]
    MalformedCsv { reason: String },

    #[error("invalid filter parameter {what}: {value}")]
    InvalidFilter { what: &'static str, value: usize },

    #[error("signal of length {len} is shorter than the filter window {window}")]
    ShortSignal { len: usize, window: usize },

    #[error("failed to compute filter coefficients: {reason}")]
    FilterNumerics { reason: &'static str },
}
