pub mod app;
pub mod config;
pub mod error;
pub mod import;
pub mod metadata;
pub mod queue;
pub mod routes;
pub mod state;
pub mod storage;
