/// Re-export `Config` from `tidemark-core` for use within this crate.
///
/// Environment parsing lives in `tidemark-core` so integration tests can build
/// a `Config` without the server.
pub use tidemark_core::config::{AppMode, Config, ImportLimits};
