//! # Portcullis Axum Integration
//!
//! This crate provides a ready-to-use `POST /login` route guarded by a
//! [`ProtectionGuard`], plus a `GET /health` probe.
//!
//! Credential checking stays in your application: implement
//! [`CredentialVerifier`] and the route calls it only for attempts the guard
//! admits. Every admitted attempt is recorded exactly once, including requests
//! that are cancelled while verification is in flight.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::Router;
//! use portcullis_axum::{RouteConfig, routes};
//! use portcullis_core::{MemoryAttemptStore, ProtectionConfig, ProtectionGuard};
//! # use portcullis_axum::{CredentialVerifier, Verification, VerifierError};
//! # struct MyVerifier;
//! # #[async_trait::async_trait]
//! # impl CredentialVerifier for MyVerifier {
//! #     async fn verify(&self, _: &str, _: &str) -> Result<Verification, VerifierError> {
//! #         Ok(Verification::Invalid)
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() {
//!     let guard = ProtectionGuard::new(
//!         Arc::new(MemoryAttemptStore::new()),
//!         ProtectionConfig::default(),
//!     );
//!
//!     let auth_routes = routes(guard, Arc::new(MyVerifier))
//!         .with_route_config(RouteConfig::behind_proxy())
//!         .build();
//!
//!     let app = Router::new().nest("/api", auth_routes);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//!     )
//!     .await
//!     .unwrap();
//! }
//! ```

mod error;
mod extractors;
mod routes;
mod types;
pub mod verifier;

pub use error::{ApiError, Result};
pub use routes::{LoginState, create_router};
pub use types::{ConnectionInfo, HealthResponse, LoginRequest, LoginResponse, RouteConfig};
pub use verifier::{CredentialVerifier, Verification, VerifierError};

use axum::Router;
use portcullis_core::{AttemptStore, ProtectionGuard};
use std::sync::Arc;

/// Create login routes for your Axum application.
///
/// # Arguments
///
/// * `guard` - The protection guard shared with any other entry points
/// * `verifier` - Checks credentials for admitted attempts
///
/// # Returns
///
/// A builder whose router can be nested at any path (e.g., "/api")
pub fn routes<S, V>(guard: ProtectionGuard<S>, verifier: Arc<V>) -> LoginRouterBuilder<S, V>
where
    S: AttemptStore,
    V: CredentialVerifier,
{
    LoginRouterBuilder {
        guard,
        verifier,
        route_config: RouteConfig::default(),
    }
}

/// Builder for configuring login routes
pub struct LoginRouterBuilder<S: AttemptStore, V: CredentialVerifier> {
    guard: ProtectionGuard<S>,
    verifier: Arc<V>,
    route_config: RouteConfig,
}

impl<S: AttemptStore, V: CredentialVerifier> LoginRouterBuilder<S, V> {
    pub fn with_route_config(mut self, config: RouteConfig) -> Self {
        self.route_config = config;
        self
    }

    /// Build the router with the configured options
    pub fn build(self) -> Router {
        create_router(self.guard, self.verifier, self.route_config)
    }
}

impl<S: AttemptStore, V: CredentialVerifier> From<LoginRouterBuilder<S, V>> for Router {
    fn from(builder: LoginRouterBuilder<S, V>) -> Self {
        builder.build()
    }
}
