#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::unwrap_used, clippy::expect_used)]

//! Super-hierarchy construction, the potential-kernel trait, and adaptive
//! mesh refinement shared between the mesher and the link generator.

pub mod kernel;
pub mod mesher;
pub mod superh;

pub use kernel::{LaplaceKernel, PotentialKernel};
pub use mesher::{
    refine_criteria, run_charge_driven_pass, run_curvature_pass, seed_singleton_roots,
    MesherConfig,
};
pub use superh::{build_super_hierarchy, AxisCount};
