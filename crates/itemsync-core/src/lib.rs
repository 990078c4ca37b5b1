//! # itemsync-core
//!
//! Core itemsync data model and store implementation.
//!
//! This crate provides:
//! - Data model types (Item, ItemKey, Timestamp, ChangeBatch)
//! - Store clocks issuing strictly increasing mutation stamps
//! - In-memory item store with copy-out reads
//! - Configuration loading and validation
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! The notification hub and the client synchronizer build on it.

pub mod clock;
pub mod config;
pub mod model;
pub mod store;

pub use clock::{Clock, LogicalClock, SystemClock};
pub use config::{
    ClientProfile, ClockKind, ConfigError, ConnectionPolicy, MillisRange, SyncConfig,
};
pub use model::*;
pub use store::{ChangeScan, ItemStore, MemoryStore, Snapshot, StoreError};
