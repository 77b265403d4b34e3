//! Crate-local error type.
//!
//! Library code returns `Result<_, Error>` so callers can match on what
//! went wrong; the CLI wraps these in `anyhow::Context` on the way out and
//! maps them to process exit codes (see `capx-io`'s deck parser for the
//! input-side counterpart, `capx_io::error::Error`).

use thiserror::Error as ThisError;

/// Things that can go wrong building or solving a capacitance problem, short
/// of an actual input-syntax error (which lives in `capx-io`).
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("conductor \"{name}\" registered both as a conductor and as a dielectric interface")]
    ConductorKindMismatch { name: String },

    #[error("input deck defines no true conductors (dielectric-only geometry has no capacitance matrix)")]
    NoConductors,

    #[error("two elements at zero distance (indices {a} and {b})")]
    ZeroDistance { a: u32, b: u32 },

    #[error("two elements closer than the minimum supported distance (indices {a} and {b}, distance {distance:e})")]
    SmallDistance { a: u32, b: u32, distance: f64 },

    #[error("computed value is NaN or infinite while processing element {element}")]
    NanOrInf { element: u32 },

    #[error("hierarchical preconditioner cannot be combined with the {flag} flag; choose jacobi, block, or super instead")]
    UnsupportedCombination { flag: &'static str },

    #[error("2D Galerkin discretization is not supported; use collocation for 2D problems")]
    UnsupportedGalerkin2d,

    #[error("out-of-core mode requested but the working directory is not writable: {0}")]
    CannotGoOutOfCore(String),

    #[error("GMRES failed to converge within {iterations} iterations (residual {residual:e})")]
    GmresDidNotConverge { iterations: usize, residual: f64 },

    #[error("run cancelled by caller")]
    Cancelled,

    #[error("estimated memory usage ({requested_mb} MiB) exceeds the configured limit ({limit_mb} MiB)")]
    OutOfMemory { requested_mb: u64, limit_mb: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map to the original FasterCap process exit code family, preserved so
    /// scripts driving this tool can keep their existing exit-code checks.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ZeroDistance { .. }
            | Error::SmallDistance { .. }
            | Error::NanOrInf { .. } => 1,
            Error::UnsupportedCombination { .. } | Error::UnsupportedGalerkin2d => 64,
            Error::CannotGoOutOfCore(_) => 97,
            Error::OutOfMemory { .. } => 71,
            Error::Cancelled => 125,
            Error::Io(_) => 74,
            Error::ConductorKindMismatch { .. }
            | Error::NoConductors
            | Error::GmresDidNotConverge { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_original_exit_code_families() {
        assert_eq!(Error::Cancelled.exit_code(), 125);
        assert_eq!(
            Error::OutOfMemory { requested_mb: 1, limit_mb: 1 }.exit_code(),
            71
        );
        assert_eq!(
            Error::CannotGoOutOfCore("no space".into()).exit_code(),
            97
        );
        assert_eq!(Error::UnsupportedGalerkin2d.exit_code(), 64);
    }
}
