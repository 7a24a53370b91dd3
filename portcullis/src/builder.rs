//! Builder pattern for constructing Portcullis instances
//!
//! This module provides a type-safe builder for creating [`Portcullis`] instances with
//! compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use portcullis::{PortcullisBuilder, ProtectionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build with SQLite and auto-migration
//!     let portcullis = PortcullisBuilder::new()
//!         .with_sqlite("sqlite://portcullis.db?mode=rwc")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // Or keep counters in memory
//!     let portcullis = PortcullisBuilder::new()
//!         .with_memory_store()
//!         .with_config(ProtectionConfig::default().with_account_threshold(3))
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use portcullis_core::{EventBus, MemoryAttemptStore, ProtectionConfig, ProtectionGuard};

use crate::{Portcullis, StorageBackend};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a Portcullis instance.
#[derive(Debug, thiserror::Error)]
pub enum PortcullisBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no storage has been configured yet.
///
/// This is the initial state of [`PortcullisBuilder`].
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<S: StorageBackend> {
    store: Arc<S>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`Portcullis`] instances.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, storage must be configured
/// - [`WithStorage<S>`]: Storage configured, ready to build or add more configuration
pub struct PortcullisBuilder<Storage> {
    storage: Storage,
    config: ProtectionConfig,
    events: Option<EventBus>,
    apply_migrations: bool,
}

impl Default for PortcullisBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl PortcullisBuilder<NoStorage> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - Protection: enabled (5 failures lock an account for 15 minutes,
    ///   100 failures block an address until reset)
    /// - Events: none
    /// - Apply migrations: false
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            config: ProtectionConfig::default(),
            events: None,
            apply_migrations: false,
        }
    }

    /// Keep counters in process memory. Lockouts are lost on restart.
    pub fn with_memory_store(self) -> PortcullisBuilder<WithStorage<MemoryAttemptStore>> {
        self.with_store(Arc::new(MemoryAttemptStore::new()))
    }

    /// Use an existing store.
    pub fn with_store<S: StorageBackend>(self, store: Arc<S>) -> PortcullisBuilder<WithStorage<S>> {
        PortcullisBuilder {
            storage: WithStorage { store },
            config: self.config,
            events: self.events,
            apply_migrations: self.apply_migrations,
        }
    }
}

// ============================================================================
// Storage Configuration Methods (NoStorage -> WithStorage)
// ============================================================================

#[cfg(feature = "sqlite")]
impl PortcullisBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<PortcullisBuilder<WithStorage<crate::SqliteAttemptStore>>, PortcullisBuilderError>
    {
        let store = crate::SqliteAttemptStore::connect(url)
            .await
            .map_err(|e| PortcullisBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_store(Arc::new(store)))
    }

    /// Configure SQLite storage with an existing connection pool.
    ///
    /// # Arguments
    ///
    /// * `pool` - An existing SQLite connection pool
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> PortcullisBuilder<WithStorage<crate::SqliteAttemptStore>> {
        self.with_store(Arc::new(crate::SqliteAttemptStore::new(pool)))
    }
}

// ============================================================================
// Configuration Methods (available after storage is configured)
// ============================================================================

impl<S: StorageBackend> PortcullisBuilder<WithStorage<S>> {
    pub fn with_config(mut self, config: ProtectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    pub async fn build(self) -> Result<Portcullis<S>, PortcullisBuilderError> {
        self.config
            .validate()
            .map_err(|e| PortcullisBuilderError::InvalidConfiguration(e.to_string()))?;

        // Run migrations if requested
        if self.apply_migrations {
            self.storage
                .store
                .migrate()
                .await
                .map_err(|e| PortcullisBuilderError::Migration(e.to_string()))?;
        }

        let mut guard = ProtectionGuard::new(self.storage.store, self.config);
        if let Some(events) = self.events {
            guard = guard.with_event_bus(events);
        }

        tracing::debug!(
            enabled = guard.is_enabled(),
            account_threshold = guard.config().account_threshold,
            address_threshold = guard.config().address_threshold,
            "Built login protection engine"
        );

        Ok(Portcullis::new(guard))
    }
}
