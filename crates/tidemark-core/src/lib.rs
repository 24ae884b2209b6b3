pub mod billing;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod import;
