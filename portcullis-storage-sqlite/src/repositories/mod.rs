//! Repository implementations for SQLite storage

mod attempts;
