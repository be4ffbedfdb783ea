//! HTTP Basic authentication for internal routes

use crate::{Error, Result};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Known users and their passwords.
#[derive(Clone, Default)]
pub struct Credentials {
    users: HashMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(user.into(), password.into());
        self
    }

    /// Password comparison takes the same time wherever the first mismatch is.
    pub fn verify(&self, user: &str, password: &str) -> bool {
        self.users
            .get(user)
            .is_some_and(|expected| constant_time_eq(expected.as_bytes(), password.as_bytes()))
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromStr for Credentials {
    type Err = Error;

    /// Parse comma-separated `user:password` pairs.
    fn from_str(raw: &str) -> Result<Self> {
        let mut credentials = Self::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (user, password) = pair.split_once(':').ok_or_else(|| {
                Error::Config(format!("credential '{}' is not a user:password pair", pair))
            })?;
            if user.is_empty() {
                return Err(Error::Config("credential with empty user name".to_string()));
            }
            credentials = credentials.with_user(user, password);
        }
        Ok(credentials)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

/// Decode an `Authorization: Basic ...` header into user and password.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn forbidden() -> Response {
    let mut response = (StatusCode::FORBIDDEN, "Forbidden").into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static(r#"Basic realm="Restricted""#),
    );
    response
}

/// Middleware rejecting requests without valid Basic credentials.
pub async fn basic_auth(
    State(credentials): State<Arc<Credentials>>,
    req: Request,
    next: Next,
) -> Response {
    match basic_credentials(req.headers()) {
        Some((user, password)) if credentials.verify(&user, &password) => next.run(req).await,
        Some((user, _)) => {
            debug!(%user, path = %req.uri().path(), "Rejected credentials");
            forbidden()
        }
        None => forbidden(),
    }
}
