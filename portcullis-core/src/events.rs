use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{AccountId, decision::DenyReason, error::EventError};

/// Reason why an account lock or address block was lifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockReason {
    /// Lockout period expired naturally
    LockoutExpired,
    /// Administrator manually reset the counter
    AdminAction,
}

/// Security events emitted by the [`ProtectionGuard`](crate::services::ProtectionGuard)
///
/// Events notify interested parties (alerting, audit logs) about lockout state
/// changes. They are informational: a failing handler never changes a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Emitted for every recorded failed login attempt.
    LoginFailed {
        account: AccountId,
        address: IpAddr,
        /// Account failures since the last reset, including this one
        failed_attempts: u32,
        /// Address failures, including this one
        address_failed_attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when an attempt is rejected before credential verification.
    AttemptRejected {
        account: AccountId,
        address: IpAddr,
        reason: DenyReason,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when an account becomes locked due to too many failed attempts.
    ///
    /// This is a security-critical event that should trigger alerts.
    AccountLocked {
        account: AccountId,
        failed_attempts: u32,
        locked_until: DateTime<Utc>,
        /// Address of the failure that triggered the lock
        address: IpAddr,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when an account lock is lifted.
    AccountUnlocked {
        account: AccountId,
        reason: UnlockReason,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when an address is blocked.
    AddressBlocked {
        address: IpAddr,
        failed_attempts: u32,
        /// `None` when the block lasts until an administrative reset
        blocked_until: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when an address block is lifted.
    AddressUnblocked {
        address: IpAddr,
        reason: UnlockReason,
        timestamp: DateTime<Utc>,
    },
}

/// A trait for handling events emitted by the event bus
///
/// Implementors of this trait can be registered with the [`EventBus`] to receive and process events.
///
/// # Examples
///
/// ```
/// # use portcullis_core::events::{Event, EventHandler};
/// # use portcullis_core::error::EventError;
/// # use async_trait::async_trait;
/// struct AlertHandler;
///
/// #[async_trait]
/// impl EventHandler for AlertHandler {
///     async fn handle_event(&self, event: &Event) -> Result<(), EventError> {
///         if let Event::AddressBlocked { address, .. } = event {
///             println!("blocked {address}");
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: &Event) -> Result<(), EventError>;
}

/// Event bus that can emit events and register event handlers
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register an event handler with the event bus
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Emit an event to all registered handlers, stopping at the first error
    pub async fn emit(&self, event: &Event) -> Result<(), EventError> {
        for handler in self.handlers.read().await.iter() {
            handler.handle_event(event).await?;
        }

        Ok(())
    }
}
