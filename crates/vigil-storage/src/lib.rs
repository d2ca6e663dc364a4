//! Vigil Storage - SQLite persistence for adaptive pattern statistics.
//!
//! The validation engine's only durable artifact lives here: per-signature
//! outcome counters used by the adaptive risk model. Everything else in the
//! engine is in-memory state.

mod error;
mod pool;
mod schema;
mod store;

pub use error::{Result, StorageError};
pub use pool::ConnectionPool;
pub use store::{PatternStat, PatternStatStore};
