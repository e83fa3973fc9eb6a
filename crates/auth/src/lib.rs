//! Bearer credential verification.
//!
//! The gateway hands every connection's `token` to an [`Authenticator`], which
//! verifies it with an [`IdentityVerifier`] and resolves the resulting
//! identity against the user directory. The shipped verifier checks HS256
//! JWTs; tests and other deployments plug in their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parley_config::AuthConfig;
use parley_database::{StoreError, User, UserDirectory};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential missing")]
    MissingCredential,
    #[error("credential is malformed")]
    Malformed,
    #[error("credential expired")]
    Expired,
    #[error("credential signature is invalid")]
    BadSignature,
    #[error("credential rejected: {0}")]
    Rejected(String),
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("identity verification timed out after {0:?}")]
    Timeout(Duration),
    #[error("user directory error: {0}")]
    Directory(#[from] StoreError),
    #[error("failed to issue token: {0}")]
    TokenCreation(String),
}

impl AuthError {
    /// Credential problems the client can only fix by presenting another
    /// credential.
    pub fn is_invalid_credential(&self) -> bool {
        matches!(
            self,
            AuthError::Malformed | AuthError::Expired | AuthError::BadSignature | AuthError::Rejected(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Timeout(_) => true,
            AuthError::Directory(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// A verified claim about who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
enum Subject {
    Text(String),
    Number(i64),
}

impl Subject {
    fn into_string(self) -> String {
        match self {
            Subject::Text(value) => value,
            Subject::Number(value) => value.to_string(),
        }
    }
}

/// Claims understood by [`JwtVerifier`]. Tokens minted by other services may
/// carry the subject as `user_id` instead of `sub`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(alias = "user_id")]
    sub: Subject,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl Claims {
    pub fn subject(&self) -> String {
        self.sub.clone().into_string()
    }
}

/// HS256 verifier and issuer sharing one secret.
#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
    token_ttl: chrono::Duration,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_seconds;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);
        if let Some(issuer) = config.issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }

        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            token_ttl: chrono::Duration::seconds(config.token_ttl_seconds.min(i64::MAX as u64) as i64),
        }
    }

    /// Mint a token for `user_id` valid for the configured lifetime.
    pub fn issue_token(&self, user_id: &str) -> Result<String, AuthError> {
        self.issue_token_until(user_id, Utc::now() + self.token_ttl)
    }

    pub fn issue_token_until(&self, user_id: &str, expires_at: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            sub: Subject::Text(user_id.to_string()),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| AuthError::TokenCreation(err.to_string()))
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::BadSignature,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithmName => AuthError::Malformed,
        ErrorKind::InvalidIssuer => AuthError::Rejected("issuer mismatch".into()),
        ErrorKind::ImmatureSignature => AuthError::Rejected("token not yet valid".into()),
        ErrorKind::InvalidAlgorithm => AuthError::Rejected("unsupported algorithm".into()),
        ErrorKind::MissingRequiredClaim(claim) => AuthError::Rejected(format!("missing claim {claim}")),
        other => AuthError::Rejected(format!("{other:?}")),
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(classify)?;

        let user_id = data.claims.subject();
        if user_id.trim().is_empty() {
            return Err(AuthError::Rejected("empty subject".into()));
        }

        Ok(Identity {
            user_id,
            expires_at: Utc.timestamp_opt(data.claims.exp, 0).single(),
        })
    }
}

/// Extract the credential from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Verifies credentials and resolves them to user records.
#[derive(Clone)]
pub struct Authenticator {
    verifier: Arc<dyn IdentityVerifier>,
    users: Arc<dyn UserDirectory>,
    timeout: Duration,
}

impl Authenticator {
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        users: Arc<dyn UserDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            users,
            timeout,
        }
    }

    pub async fn authenticate(&self, token: Option<&str>) -> Result<User, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingCredential)?;

        let identity = tokio::time::timeout(self.timeout, self.verifier.verify(token))
            .await
            .map_err(|_| AuthError::Timeout(self.timeout))??;

        let user = tokio::time::timeout(self.timeout, self.users.find_user(&identity.user_id))
            .await
            .map_err(|_| AuthError::Timeout(self.timeout))??
            .ok_or_else(|| AuthError::UnknownUser(identity.user_id.clone()))?;

        debug!(user = %user.public_id, "credential verified");
        Ok(user)
    }
}
