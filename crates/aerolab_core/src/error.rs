use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("parse error in `{expr}`: {reason}")]
    Parse { expr: String, reason: String },

    #[error("unknown symbol `{name}` (not a declared state or input)")]
    UnknownSymbol { name: String },

    #[error("symbol `{name}` declared more than once")]
    DuplicateSymbol { name: String },

    #[error("`t` is reserved for time and cannot be declared as a state or input")]
    ReservedSymbol,

    #[error("a system must declare at least one state")]
    EmptyState,

    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid {what}: {value} (must be positive and finite)")]
    InvalidStep { what: &'static str, value: f64 },

    #[error("integration diverged at t = {t} (non-finite state)")]
    Diverged { t: f64 },

    #[error("control law returned {actual} inputs, the system declares {expected}")]
    ControlDimension { expected: usize, actual: usize },
}
