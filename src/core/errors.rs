use thiserror::Error;

/// Errors surfaced by the calculation engine.
///
/// Range violations with `level = "warn"` never appear here; they accumulate
/// on the parameter store and are readable via `reform_warnings`.
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("parameter {param} out of range: {msg}")]
    RangeViolation { param: String, msg: String },

    #[error("state misuse: {0}")]
    StateMisuse(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl CalcError {
    pub fn bad_input(msg: impl Into<String>) -> Self {
        CalcError::BadInput(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        CalcError::StateMisuse(msg.into())
    }

    /// Process exit code for the CLI surface: user errors map to 1,
    /// internal invariant violations to 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            CalcError::BadInput(_) | CalcError::RangeViolation { .. } | CalcError::Io(_) => 1,
            CalcError::StateMisuse(_) => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, CalcError>;
