use serde_json::Value;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Errors surfaced to callers of [`crate::ApiClient`].
///
/// Only `Unauthenticated` and `SessionExpired` tear down the session; all other kinds are
/// returned for local display and leave session state alone.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not authenticated: backend rejected the request and no refresh token is available")]
    Unauthenticated,

    #[error("session expired: token refresh failed")]
    SessionExpired,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend error ({status}): {message}")]
    Backend {
        status: u16,
        message: String,
        body: Option<Value>,
    },

    #[error("could not decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("token can not be used as a header value")]
    InvalidToken,
}

impl ApiError {
    /// True for the error kinds that end the session and send the user back to login.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthenticated | ApiError::SessionExpired)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

#[test]
fn test_auth_failure_kinds() {
    assert!(ApiError::Unauthenticated.is_auth_failure());
    assert!(ApiError::SessionExpired.is_auth_failure());
    assert!(!ApiError::Transport("connection refused".to_string()).is_auth_failure());
    let backend = ApiError::Backend {
        status: 500,
        message: "boom".to_string(),
        body: None,
    };
    assert!(!backend.is_auth_failure());
    assert_eq!(backend.status(), Some(500));
    assert_eq!(backend.to_string(), "backend error (500): boom");
}
