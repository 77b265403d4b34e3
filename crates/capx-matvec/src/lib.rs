#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::unwrap_used, clippy::expect_used)]

//! Hierarchical matrix-vector multiply: up-sweep, link apply, down-sweep
//! over the element arena built by `capx-hierarchy` and `capx-links`.

pub mod multiply;

pub use multiply::{
    apply, apply_2d_charge_neutrality, compute_self_potentials, down_sweep, multiply, up_sweep,
    RowLinks, SelfPotentials,
};
