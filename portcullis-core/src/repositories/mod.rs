//! Repository traits for the data access layer
//!
//! The guard talks to storage only through [`AttemptStore`]. Backends live in
//! their own crates (`portcullis-storage-sqlite`); [`MemoryAttemptStore`] ships
//! with the core for single-process deployments and tests.

pub mod attempt_store;
pub mod memory;

pub use attempt_store::AttemptStore;
pub use memory::MemoryAttemptStore;
