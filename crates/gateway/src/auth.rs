use {
    secrecy::{ExposeSecret, Secret},
    subtle::ConstantTimeEq,
};

// ── Types ────────────────────────────────────────────────────────────────────

/// Resolved gateway auth configuration.
#[derive(Debug)]
pub struct ResolvedAuth {
    token: Option<Secret<String>>,
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub ok: bool,
    pub reason: Option<&'static str>,
}

impl AuthResult {
    fn allowed() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn denied(reason: &'static str) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison (prevents timing attacks).
fn safe_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

// ── Auth logic ───────────────────────────────────────────────────────────────

/// Resolve auth from the configured token. An empty token counts as unset.
pub fn resolve_auth(token: Option<String>) -> ResolvedAuth {
    ResolvedAuth {
        token: token.filter(|t| !t.is_empty()).map(Secret::new),
    }
}

impl ResolvedAuth {
    /// No token configured, every request is allowed.
    pub fn open() -> Self {
        Self { token: None }
    }

    pub fn is_required(&self) -> bool {
        self.token.is_some()
    }
}

/// Authenticate a request from its `Authorization` header.
pub fn authorize_request(auth: &ResolvedAuth, authorization: Option<&str>) -> AuthResult {
    let Some(expected) = auth.token.as_ref() else {
        return AuthResult::allowed();
    };
    let Some(header) = authorization else {
        return AuthResult::denied("token_missing");
    };
    let Some(given) = bearer_token(header) else {
        return AuthResult::denied("token_malformed");
    };
    if !safe_equal(given, expected.expose_secret()) {
        return AuthResult::denied("token_mismatch");
    }
    AuthResult::allowed()
}
