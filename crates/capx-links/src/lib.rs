#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::unwrap_used, clippy::expect_used)]

//! Link generation and chunked, optionally out-of-core link storage.

pub mod generator;
pub mod store;

pub use generator::{decide_out_of_core, generate_links, LinkBuildResult, LinkGenConfig};
pub use store::{create_unique_temp_file, Chunk, LinkEntry, LinkStore, StoreError, LINK_CHUNK_SIZE};
