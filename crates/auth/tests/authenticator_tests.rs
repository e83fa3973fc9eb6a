use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_auth::{AuthError, Authenticator, Identity, IdentityVerifier, JwtVerifier};
use parley_config::{AuthConfig, DatabaseConfig};
use parley_database::{initialize_database, CreateUserRequest, User, UserRepository};
use sqlx::SqlitePool;
use tempfile::TempDir;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

const TIMEOUT: Duration = Duration::from_millis(200);

fn auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "integration-secret".into(),
        issuer: None,
        leeway_seconds: 0,
        token_ttl_seconds: 3_600,
    }
}

struct TestContext {
    _pool: SqlitePool,
    users: UserRepository,
    verifier: JwtVerifier,
    authenticator: Authenticator,
    _temp_dir: TempDir,
}

impl TestContext {
    async fn new() -> TestResult<Self> {
        let temp_dir = TempDir::new()?;
        let pool = initialize_database(&DatabaseConfig {
            url: format!("sqlite://{}", temp_dir.path().join("auth.sqlite").display()),
            max_connections: 2,
        })
        .await?;

        let users = UserRepository::new(pool.clone());
        let verifier = JwtVerifier::new(&auth_config());
        let authenticator = Authenticator::new(
            Arc::new(verifier.clone()),
            Arc::new(users.clone()),
            TIMEOUT,
        );

        Ok(Self {
            _pool: pool,
            users,
            verifier,
            authenticator,
            _temp_dir: temp_dir,
        })
    }

    async fn user(&self, email: &str) -> TestResult<User> {
        Ok(self
            .users
            .create(&CreateUserRequest {
                email: email.into(),
                first_name: "Test".into(),
                ..Default::default()
            })
            .await?)
    }
}

#[tokio::test]
async fn authenticate_resolves_known_user() -> TestResult {
    let ctx = TestContext::new().await?;
    let user = ctx.user("ada@example.com").await?;
    let token = ctx.verifier.issue_token(&user.public_id)?;

    let resolved = ctx.authenticator.authenticate(Some(&token)).await?;
    assert_eq!(resolved.public_id, user.public_id);
    Ok(())
}

#[tokio::test]
async fn missing_and_blank_tokens_are_unauthenticated() -> TestResult {
    let ctx = TestContext::new().await?;

    assert!(matches!(
        ctx.authenticator.authenticate(None).await,
        Err(AuthError::MissingCredential)
    ));
    assert!(matches!(
        ctx.authenticator.authenticate(Some("   ")).await,
        Err(AuthError::MissingCredential)
    ));
    Ok(())
}

#[tokio::test]
async fn valid_token_for_unknown_user_is_rejected() -> TestResult {
    let ctx = TestContext::new().await?;
    let token = ctx.verifier.issue_token("nobody")?;

    let err = ctx.authenticator.authenticate(Some(&token)).await.unwrap_err();
    assert!(matches!(err, AuthError::UnknownUser(ref id) if id == "nobody"));
    assert!(!err.is_invalid_credential());
    Ok(())
}

#[tokio::test]
async fn garbage_token_is_invalid_credential() -> TestResult {
    let ctx = TestContext::new().await?;

    let err = ctx.authenticator.authenticate(Some("abc.def.ghi")).await.unwrap_err();
    assert!(err.is_invalid_credential());
    assert!(!err.is_transient());
    Ok(())
}

struct StalledVerifier;

#[async_trait]
impl IdentityVerifier for StalledVerifier {
    async fn verify(&self, _token: &str) -> Result<Identity, AuthError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(AuthError::Malformed)
    }
}

#[tokio::test]
async fn stalled_verifier_times_out() -> TestResult {
    let ctx = TestContext::new().await?;
    let authenticator = Authenticator::new(Arc::new(StalledVerifier), Arc::new(ctx.users.clone()), TIMEOUT);

    let err = authenticator.authenticate(Some("token")).await.unwrap_err();
    assert!(matches!(err, AuthError::Timeout(_)));
    assert!(err.is_transient());
    Ok(())
}
