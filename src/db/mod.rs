//! Database module for clip-worker
//!
//! Provides PostgreSQL operations for jobs, tasks and worker heartbeats, plus
//! the `WorkStore` seam the workers are written against.

pub mod connection;
pub mod heartbeats;
pub mod jobs;
pub mod memory;
pub mod models;
pub mod store;
pub mod tasks;

pub use connection::{create_pool, create_pool_from_env, DbPool};
pub use memory::MemoryStore;
pub use models::*;
pub use store::{PgStore, WorkStore};
