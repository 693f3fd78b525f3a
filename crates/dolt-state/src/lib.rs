//! Dolt-State: Record and Active-Lane Persistence
//!
//! This crate provides the persistence layer for the Dolt context engine.
//! It owns the data model (records, levels, pointers, active-lane entries),
//! the [`DoltStore`] contract, and its two implementations.
//!
//! ## Key Components
//!
//! - `DoltStore`: async contract for records and active-lane membership
//! - `OrderedLaneIndex`: `(last_event_ts_ms, pointer)` ordered view of one lane
//! - `MemoryDoltStore`: in-memory store for tests and ephemeral sessions
//! - `SurrealDoltStore`: SurrealDB store with transactional lane replacement

pub mod connection;
mod error;
pub mod fakes;
pub mod index;
pub mod migrations;
pub mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use connection::CloudConfig;
pub use error::{StateError, StorageError};
pub use fakes::MemoryDoltStore;
pub use index::{IndexedEntry, LaneIndex, OrderedLaneIndex};
pub use storage_traits::{
    estimate_tokens, ActiveLaneEntry, ActiveLaneSnapshot, ActiveRecord, DoltStore, LaneActivation,
    LaneStats, Level, NewRecord, Pointer, Record, StorageResult,
};
pub use surreal_store::SurrealDoltStore;

/// Result type for dolt-state connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
