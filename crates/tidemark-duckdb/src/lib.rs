pub mod backend;
pub mod imports;
pub mod organization;
pub mod schema;
pub mod usage;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `tidemark_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
