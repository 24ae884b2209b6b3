//! Bulk import of third-party analytics exports.
//!
//! Upload → [`admission`] → parse queue → [`worker`] (quota, date filter,
//! mapper) → insert queue → [`insert`].

pub mod admission;
pub mod insert;
pub mod mappers;
pub mod quota;
pub mod rows;
pub mod worker;

pub use admission::{AdmissionController, AdmissionError, ConcurrencyCheck};
pub use insert::InsertWorker;
pub use mappers::{MapperRegistry, SourceMapper};
pub use quota::QuotaTracker;
pub use worker::{sanitize_error_message, ImportError, ImportWorker};
