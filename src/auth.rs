use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::convert::Infallible;
use std::sync::Arc;

/// The caller of a backup operation. Extraction never rejects: the
/// orchestrator is the single place privilege is enforced, so every
/// operation fails in the same order (authorization before anything else).
#[derive(Debug, Clone)]
pub struct Initiator {
    /// Audit identity recorded as created_by; not an authorization input.
    pub id: String,
    pub privileged: bool,
}

impl Initiator {
    #[cfg(test)]
    pub fn admin() -> Self {
        Self {
            id: "admin".into(),
            privileged: true,
        }
    }

    #[cfg(test)]
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".into(),
            privileged: false,
        }
    }
}

impl FromRequestParts<Arc<AppState>> for Initiator {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let privileged = token == Some(state.config.admin_token.as_str());

        let id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(if privileged { "admin" } else { "anonymous" })
            .to_string();

        Ok(Self { id, privileged })
    }
}
