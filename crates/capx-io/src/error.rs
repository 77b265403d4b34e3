//! Parser and output errors, kept distinct from [`capx_core::Error`] since
//! a syntax error names a file and line rather than a geometric quantity.

use std::path::PathBuf;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("cannot open input file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Syntax {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("writing output: {0}")]
    Write(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] capx_core::Error),
}

impl Error {
    /// Process exit code this error maps to, per the deck format's exit
    /// code table: a bad or missing input file is always 66 ("cannot open
    /// input"); anything that made it out of the solver core keeps its own
    /// mapping.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Open { .. } | Error::Syntax { .. } => 66,
            Error::Write(_) => 74,
            Error::Core(e) => e.exit_code(),
        }
    }
}
