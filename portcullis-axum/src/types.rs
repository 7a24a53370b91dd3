use serde::{Deserialize, Serialize};

pub(crate) const LOGIN_SUCCEEDED: &str = "Login successful.";
pub(crate) const INVALID_CREDENTIALS: &str = "Invalid email or password.";
pub(crate) const TOO_MANY_ATTEMPTS: &str = "Too many failed attempts. Please try again later.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of every `POST /login` response that reached the protection layer.
///
/// Locked accounts and blocked addresses produce the same body, so a client
/// cannot tell which limit fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl LoginResponse {
    pub fn succeeded(token: Option<String>) -> Self {
        Self {
            success: true,
            message: LOGIN_SUCCEEDED.to_string(),
            token,
        }
    }

    pub fn invalid_credentials() -> Self {
        Self {
            success: false,
            message: INVALID_CREDENTIALS.to_string(),
            token: None,
        }
    }

    pub fn too_many_attempts() -> Self {
        Self {
            success: false,
            message: TOO_MANY_ATTEMPTS.to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Where a request came from, as far as the login route is concerned.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Textual client address; validated by the guard
    pub address: Option<String>,
    pub user_agent: Option<String>,
}

/// Options for the login routes.
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    ///
    /// Only enable this behind a reverse proxy that overwrites these headers;
    /// otherwise clients choose their own address and evade address blocking.
    pub trust_forwarded_headers: bool,

    /// Browser origins allowed to call the routes cross-origin, such as
    /// `http://localhost:5173`. Empty disables CORS.
    pub allowed_origins: Vec<String>,
}

impl RouteConfig {
    pub fn behind_proxy() -> Self {
        Self {
            trust_forwarded_headers: true,
            ..Self::default()
        }
    }

    pub fn with_allowed_origins<I, T>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }
}
