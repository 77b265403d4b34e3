#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::unwrap_used, clippy::expect_used)]

//! GMRES driver, auto-refinement loop controller, and top-level
//! capacitance-matrix orchestration over the hierarchy, links, matvec and
//! preconditioner crates.

pub mod autoloop;
pub mod gmres;
pub mod solver;

pub use autoloop::{run_auto_loop, AutoLoopResult, AutoLoopState};
pub use gmres::{gmres_solve, GmresOutcome};
pub use solver::{conductor_labels, run, select_preconditioner_kind, solve_once, SolveOutcome};
