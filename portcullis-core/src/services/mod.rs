//! Service layer for business logic
//!
//! This module contains the [`ProtectionGuard`], which combines an attempt
//! store with the lockout policy for use by login handlers.

pub mod guard;

pub use guard::{Admission, AttemptPermit, OutcomeReport, ProtectionGuard};
