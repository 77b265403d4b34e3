#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::unwrap_used, clippy::expect_used)]

//! FasterCap-style input deck parsing and capacitance matrix/geometry
//! output, kept free of any dependency on the solver crates so that a
//! deck can be parsed (and a previous run's output re-emitted) without
//! pulling in the hierarchy builder or GMRES driver.

pub mod error;
pub mod output;
pub mod parser;

pub use error::Error;
pub use output::{
    check_diagonal_dominance, check_off_diagonal_sign, dump_geometry, write_matrix_csv,
    write_matrix_json, write_matrix_text,
};
pub use parser::{parse_deck, ParsedDeck};
