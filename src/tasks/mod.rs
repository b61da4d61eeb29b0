//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry sweep: removes expired items from the in-memory stores

mod cleanup;

pub use cleanup::spawn_cleanup_task;
