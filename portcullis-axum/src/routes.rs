use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use portcullis_core::{
    Admission, AttemptStore, ProtectionGuard, validation::validate_email,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{
    error::{ApiError, Result},
    types::*,
    verifier::{CredentialVerifier, Verification},
};

/// Shared state for the login routes.
pub struct LoginState<S: AttemptStore, V: CredentialVerifier> {
    pub guard: ProtectionGuard<S>,
    pub verifier: Arc<V>,
}

impl<S: AttemptStore, V: CredentialVerifier> Clone for LoginState<S, V> {
    fn clone(&self) -> Self {
        Self {
            guard: self.guard.clone(),
            verifier: Arc::clone(&self.verifier),
        }
    }
}

pub fn create_router<S, V>(
    guard: ProtectionGuard<S>,
    verifier: Arc<V>,
    route_config: RouteConfig,
) -> Router
where
    S: AttemptStore,
    V: CredentialVerifier,
{
    let state = LoginState { guard, verifier };
    let cors = cors_layer(&route_config.allowed_origins);

    let router = Router::new()
        .route("/login", post(login_handler::<S, V>))
        .route("/health", get(health_handler::<S, V>))
        .with_state(state)
        .layer(Extension(route_config));

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// CORS for the listed origins, or `None` when no usable origin is configured.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::ORIGIN,
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::AUTHORIZATION,
            ])
            .expose_headers([header::CONTENT_LENGTH])
            .allow_credentials(true),
    )
}

async fn health_handler<S, V>(State(state): State<LoginState<S, V>>) -> Result<impl IntoResponse>
where
    S: AttemptStore,
    V: CredentialVerifier,
{
    state.guard.store().health_check().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn login_handler<S, V>(
    State(state): State<LoginState<S, V>>,
    connection: ConnectionInfo,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse>
where
    S: AttemptStore,
    V: CredentialVerifier,
{
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    validate_email(&request.email).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if request.password.is_empty() {
        return Err(ApiError::BadRequest("password is required".to_string()));
    }

    let address = connection
        .address
        .ok_or_else(|| ApiError::BadRequest("client address unavailable".to_string()))?;

    let permit = match state.guard.begin(&request.email, &address, Utc::now()).await? {
        Admission::Permitted(permit) => permit,
        Admission::Denied(reason) => {
            tracing::info!(
                address = %address,
                user_agent = ?connection.user_agent,
                reason = ?reason,
                retry_after = ?reason.retry_after_seconds(),
                "Login attempt refused"
            );
            return Err(ApiError::TooManyAttempts);
        }
    };

    match state.verifier.verify(&request.email, &request.password).await {
        Ok(Verification::Valid { token }) => {
            permit.succeed(Utc::now()).await?;
            Ok(Json(LoginResponse::succeeded(token)))
        }
        Ok(Verification::Invalid) => {
            permit.fail(Utc::now()).await?;
            Err(ApiError::InvalidCredentials)
        }
        Err(e) => {
            permit.fail(Utc::now()).await?;
            Err(ApiError::InternalError(e.to_string()))
        }
    }
}
