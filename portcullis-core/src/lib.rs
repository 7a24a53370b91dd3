//! Core functionality for the portcullis project
//!
//! This crate contains the brute force protection engine for password login:
//! per-account and per-address failure counters, the [`LockoutPolicy`] that
//! turns counts into locks and blocks, and the [`ProtectionGuard`] that login
//! handlers consult before and after verifying credentials.
//!
//! Counters are kept behind the [`AttemptStore`] trait. [`MemoryAttemptStore`]
//! ships here; durable backends live in their own crates.
//!
//! See [`ProtectionGuard`] for the request flow and [`ProtectionConfig`] for
//! the thresholds and durations.
//!
pub mod account;
pub mod config;
pub mod decision;
pub mod error;
pub mod events;
pub mod policy;
pub mod repositories;
pub mod services;
pub mod storage;
pub mod validation;

pub use account::AccountId;
pub use config::ProtectionConfig;
pub use decision::{Decision, DenyReason};
pub use error::Error;
pub use events::{Event, EventBus, EventHandler, UnlockReason};
pub use policy::{AccountVerdict, AddressVerdict, LockoutPolicy};
pub use repositories::{AttemptStore, MemoryAttemptStore};
pub use services::{Admission, AttemptPermit, OutcomeReport, ProtectionGuard};
pub use storage::{AccountCounter, AddressCounter, AttemptOutcome, AttemptRecord, FailureOutcome};
