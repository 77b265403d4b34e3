#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::unwrap_used, clippy::expect_used)]

//! Geometry primitives, the arena-indexed element tree, the conductor
//! registry, run-scoped context, and configuration shared by every other
//! `capx-*` crate.

pub mod conductor;
pub mod config;
pub mod context;
pub mod error;
pub mod geom;
pub mod tree;

pub use conductor::{Conductor, ConductorRegistry};
pub use config::{Dimension, Discretization, PreconditionerKind, SolverConfig};
pub use context::{RunContext, WarningKind};
pub use error::Error;
pub use geom::{Segment, Triangle};
pub use tree::{Element, ElementFlags, ElementId, Panel, Tree};
