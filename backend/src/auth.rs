//! Caller identity resolution.
//!
//! Session handling lives upstream (a gateway or framework middleware); this
//! module only consumes its result: who the caller is and whether they may
//! export. Keeping it behind a trait lets tests inject any identity without
//! touching real session plumbing.

use axum::http::HeaderMap;

/// A resolved caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub can_export: bool,
}

/// Resolves a caller identity from request headers, or nothing at all.
pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Option<Identity>;
}

/// Trusts the identity headers set by the upstream session layer:
/// `x-user-id` carries the caller, and `x-export-allowed: false` revokes the
/// export permission (granted by default for any authenticated caller).
#[derive(Debug, Clone, Default)]
pub struct HeaderAuth;

impl AuthProvider for HeaderAuth {
    fn authenticate(&self, headers: &HeaderMap) -> Option<Identity> {
        let user_id = headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())?
            .to_string();

        let can_export = headers
            .get("x-export-allowed")
            .and_then(|value| value.to_str().ok())
            .map(|value| value != "false")
            .unwrap_or(true);

        Some(Identity { user_id, can_export })
    }
}
