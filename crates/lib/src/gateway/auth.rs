//! Token gate for `/api`. Fails closed: with no secret configured every request is denied.

use axum::http::{header, HeaderMap, StatusCode};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::{self, keys};
use crate::store::{bool_value, secret_value, ConfigStore};

/// Dedicated API-key header, used when no Authorization header is sent.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDenied {
    /// No secret configured anywhere.
    NotConfigured,
    /// `http_api_on` explicitly set to false in the store.
    Disabled,
    /// Missing or wrong credential.
    Unauthorized,
}

impl AuthDenied {
    pub fn status(self) -> StatusCode {
        match self {
            AuthDenied::NotConfigured | AuthDenied::Disabled => StatusCode::FORBIDDEN,
            AuthDenied::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            AuthDenied::NotConfigured => "HTTP API not configured",
            AuthDenied::Disabled => "HTTP API disabled",
            AuthDenied::Unauthorized => "Unauthorized",
        }
    }
}

/// Secret sources in precedence order: env var, config file key, store `http_api_key`.
pub struct ApiAuth {
    token_env: Option<String>,
    file_token: Option<String>,
    store: Arc<dyn ConfigStore>,
}

impl ApiAuth {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            token_env: Some(config::API_KEY_ENV.to_string()),
            file_token: None,
            store,
        }
    }

    /// Read the secret from this env var instead of HOSTGUARD_API_KEY (None disables env lookup).
    pub fn with_token_env(mut self, var: Option<String>) -> Self {
        self.token_env = var;
        self
    }

    /// Secret from the agent config file; sits between env and store.
    pub fn with_file_token(mut self, token: Option<String>) -> Self {
        self.file_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    /// Resolve the configured secret. Store read errors count as "not configured".
    pub async fn configured_secret(&self) -> Option<String> {
        if let Some(t) = self.token_env.as_deref().and_then(config::env_token) {
            return Some(t);
        }
        if let Some(ref t) = self.file_token {
            return Some(t.clone());
        }
        match self.store.get(keys::HTTP_API_KEY).await {
            Ok(v) => secret_value(v.as_ref()),
            Err(e) => {
                log::warn!("reading {} failed: {}", keys::HTTP_API_KEY, e);
                None
            }
        }
    }

    async fn disabled(&self) -> bool {
        match self.store.get(keys::HTTP_API_ON).await {
            Ok(v) => bool_value(v.as_ref()) == Some(false),
            Err(_) => false,
        }
    }

    /// Decide whether a request with these headers may reach the API router.
    pub async fn authorize(&self, headers: &HeaderMap) -> Result<(), AuthDenied> {
        let Some(secret) = self.configured_secret().await else {
            return Err(AuthDenied::NotConfigured);
        };
        if self.disabled().await {
            return Err(AuthDenied::Disabled);
        }
        match credential(headers) {
            Some(candidate) if tokens_match(&candidate, &secret) => Ok(()),
            _ => Err(AuthDenied::Unauthorized),
        }
    }
}

/// Credential from `Authorization` (with an optional `Bearer ` prefix), else the API-key header.
pub fn credential(headers: &HeaderMap) -> Option<String> {
    let from_auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
        .filter(|v| !v.is_empty());
    from_auth
        .or_else(|| {
            headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
}

/// Exact equality, compared as SHA-256 digests so the comparison does not stop at the first differing byte.
fn tokens_match(candidate: &str, secret: &str) -> bool {
    Sha256::digest(candidate.as_bytes()) == Sha256::digest(secret.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CfgDb;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        h
    }

    fn unique_env() -> String {
        format!("HOSTGUARD_TEST_KEY_{}", uuid::Uuid::new_v4().simple())
    }

    async fn gate_with_store_key(key: Option<&str>) -> ApiAuth {
        let db = Arc::new(CfgDb::in_memory());
        if let Some(k) = key {
            db.set(keys::HTTP_API_KEY, json!(k)).await.unwrap();
        }
        ApiAuth::new(db).with_token_env(Some(unique_env()))
    }

    #[tokio::test]
    async fn no_secret_denies_everything_with_403() {
        let gate = gate_with_store_key(None).await;
        for h in [
            headers(&[]),
            headers(&[("authorization", "Bearer anything")]),
            headers(&[("x-api-key", "")]),
        ] {
            let denied = gate.authorize(&h).await.unwrap_err();
            assert_eq!(denied, AuthDenied::NotConfigured);
            assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn mismatch_or_missing_is_401() {
        let gate = gate_with_store_key(Some("s3cret")).await;
        for h in [
            headers(&[]),
            headers(&[("authorization", "Bearer wrong")]),
            headers(&[("x-api-key", "s3cre")]),
            headers(&[("authorization", "bearer s3cret")]),
        ] {
            let denied = gate.authorize(&h).await.unwrap_err();
            assert_eq!(denied, AuthDenied::Unauthorized);
            assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn match_via_either_header_is_allowed() {
        let gate = gate_with_store_key(Some("s3cret")).await;
        assert!(gate.authorize(&headers(&[("authorization", "Bearer s3cret")])).await.is_ok());
        assert!(gate.authorize(&headers(&[("authorization", "s3cret")])).await.is_ok());
        assert!(gate.authorize(&headers(&[("x-api-key", "s3cret")])).await.is_ok());
    }

    #[tokio::test]
    async fn authorization_header_wins_over_api_key() {
        let gate = gate_with_store_key(Some("s3cret")).await;
        let h = headers(&[("authorization", "Bearer wrong"), ("x-api-key", "s3cret")]);
        assert_eq!(gate.authorize(&h).await, Err(AuthDenied::Unauthorized));
    }

    #[tokio::test]
    async fn env_secret_takes_precedence_over_store() {
        let db = Arc::new(CfgDb::in_memory());
        db.set(keys::HTTP_API_KEY, json!("from-store")).await.unwrap();
        let var = unique_env();
        std::env::set_var(&var, "from-env");
        let gate = ApiAuth::new(db)
            .with_token_env(Some(var.clone()))
            .with_file_token(Some("from-file".to_string()));
        assert_eq!(gate.configured_secret().await.as_deref(), Some("from-env"));
        assert!(gate.authorize(&headers(&[("x-api-key", "from-env")])).await.is_ok());
        assert!(gate.authorize(&headers(&[("x-api-key", "from-store")])).await.is_err());
        std::env::remove_var(&var);
        assert_eq!(gate.configured_secret().await.as_deref(), Some("from-file"));
    }

    #[tokio::test]
    async fn explicit_disable_is_403_after_secret_check() {
        let db = Arc::new(CfgDb::in_memory());
        db.set(keys::HTTP_API_KEY, json!("s3cret")).await.unwrap();
        db.set(keys::HTTP_API_ON, json!(false)).await.unwrap();
        let gate = ApiAuth::new(db.clone()).with_token_env(None);
        let h = headers(&[("x-api-key", "s3cret")]);
        assert_eq!(gate.authorize(&h).await, Err(AuthDenied::Disabled));
        db.set(keys::HTTP_API_ON, json!(true)).await.unwrap();
        assert!(gate.authorize(&h).await.is_ok());
    }

    #[tokio::test]
    async fn secret_is_compared_without_trimming() {
        let gate = gate_with_store_key(Some(" abc ")).await;
        assert_eq!(gate.configured_secret().await.as_deref(), Some(" abc "));
        assert_eq!(
            gate.authorize(&headers(&[("x-api-key", "abc")])).await,
            Err(AuthDenied::Unauthorized)
        );
        assert!(gate.authorize(&headers(&[("x-api-key", " abc ")])).await.is_ok());

        let blank = gate_with_store_key(Some("   ")).await;
        assert_eq!(
            blank.authorize(&headers(&[("x-api-key", "   ")])).await,
            Err(AuthDenied::NotConfigured)
        );

        let file = gate_with_store_key(None)
            .await
            .with_file_token(Some("key ".to_string()));
        assert!(file.authorize(&headers(&[("x-api-key", "key")])).await.is_err());
        assert!(file.authorize(&headers(&[("x-api-key", "key ")])).await.is_ok());
    }

    #[test]
    fn credential_extraction() {
        assert_eq!(credential(&headers(&[])), None);
        assert_eq!(
            credential(&headers(&[("authorization", "Bearer abc")])).as_deref(),
            Some("abc")
        );
        assert_eq!(
            credential(&headers(&[("authorization", ""), ("x-api-key", "k")])).as_deref(),
            Some("k")
        );
    }
}
