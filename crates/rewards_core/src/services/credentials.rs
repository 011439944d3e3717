//! Authentication token issuance.
//!
//! DSQL does not use passwords. Each connection attempt authenticates with a
//! short-lived signed token that only has to survive the handshake, so
//! tokens are issued fresh per attempt and never cached.
//!
//! ## Providers
//!
//! - [`SdkTokenIssuer`] signs tokens with the AWS SDK, picking the admin
//!   variant for the `admin` role.
//! - [`StaticTokenIssuer`] hands out a fixed password, for local PostgreSQL.

use crate::error::RewardsError;
use crate::models::ClusterConfig;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_dsql::auth_token::{self, AuthTokenGenerator};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// An ephemeral authentication token.
#[derive(Clone)]
pub struct Credential {
    token: String,
    issued_at: Instant,
    expires_in: Duration,
}

impl Credential {
    /// Wrap a token issued now with the given validity.
    pub fn new(token: impl Into<String>, expires_in: Duration) -> Self {
        Self { token: token.into(), issued_at: Instant::now(), expires_in }
    }

    /// The token, used as the connection password.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Requested validity.
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    /// Whether the validity window has passed.
    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() >= self.expires_in
    }
}

// Tokens must never reach the logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Source of authentication tokens.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Issue a fresh token for the configured endpoint and role.
    async fn issue(&self, config: &ClusterConfig) -> Result<Credential, RewardsError>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Signs DSQL tokens locally with the AWS SDK.
///
/// Credentials and settings come from the SDK's default provider chain.
/// Signing needs no network round trip.
#[derive(Clone)]
pub struct SdkTokenIssuer {
    sdk_config: SdkConfig,
}

impl SdkTokenIssuer {
    /// Load credentials from the default provider chain.
    pub async fn load() -> Self {
        Self::from_sdk_config(aws_config::load_defaults(BehaviorVersion::latest()).await)
    }

    /// Sign with an already loaded SDK configuration.
    pub fn from_sdk_config(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }

    /// Token generator for the configured endpoint, region and lifetime.
    pub fn generator(config: &ClusterConfig) -> Result<AuthTokenGenerator, RewardsError> {
        let generator_config = auth_token::Config::builder()
            .hostname(&config.endpoint)
            .region(Region::new(config.region.clone()))
            .expires_in(u64::from(config.options.token_ttl_secs))
            .build()
            .map_err(|e| RewardsError::credential(format!("Invalid token settings: {e}")))?;
        Ok(AuthTokenGenerator::new(generator_config))
    }
}

impl fmt::Debug for SdkTokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkTokenIssuer")
            .field("region", &self.sdk_config.region())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenIssuer for SdkTokenIssuer {
    async fn issue(&self, config: &ClusterConfig) -> Result<Credential, RewardsError> {
        let generator = Self::generator(config)?;
        let signed = if config.is_admin() {
            generator.db_connect_admin_auth_token(&self.sdk_config).await
        } else {
            generator.db_connect_auth_token(&self.sdk_config).await
        };

        let token = signed.map_err(|e| {
            tracing::warn!(endpoint = %config.endpoint, error = %e, "Token generation failed");
            RewardsError::credential(format!("Token generation failed: {e}"))
        })?;

        tracing::debug!(endpoint = %config.endpoint, admin = config.is_admin(), "Token issued");
        Ok(Credential::new(token.as_str(), config.token_ttl()))
    }

    fn name(&self) -> &'static str {
        "aws-sdk"
    }
}

/// Hands out a fixed password.
#[derive(Clone)]
pub struct StaticTokenIssuer {
    password: String,
}

impl StaticTokenIssuer {
    /// Create an issuer that always returns `password`.
    pub fn new(password: impl Into<String>) -> Self {
        Self { password: password.into() }
    }
}

impl fmt::Debug for StaticTokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenIssuer").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenIssuer for StaticTokenIssuer {
    async fn issue(&self, config: &ClusterConfig) -> Result<Credential, RewardsError> {
        Ok(Credential::new(self.password.clone(), config.token_ttl()))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dsql::config::Credentials;

    fn config(username: &str) -> ClusterConfig {
        ClusterConfig::new("abc.dsql.us-east-1.on.aws", "us-east-1", "postgres", username)
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential::new("super-secret-token", Duration::from_secs(30));
        let printed = format!("{credential:?}");
        assert!(!printed.contains("super-secret-token"));
        assert!(printed.contains("<redacted>"));

        let issuer = StaticTokenIssuer::new("hunter2");
        assert!(!format!("{issuer:?}").contains("hunter2"));
    }

    async fn signing_issuer() -> SdkTokenIssuer {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(Credentials::new("AKIDEXAMPLE", "secret", None, None, "test"))
            .region(Region::new("us-east-1"))
            .load()
            .await;
        SdkTokenIssuer::from_sdk_config(sdk_config)
    }

    #[tokio::test]
    async fn test_admin_role_uses_admin_token() {
        let issuer = signing_issuer().await;

        let admin = issuer.issue(&config("admin")).await.unwrap();
        assert!(admin.token().starts_with("abc.dsql.us-east-1.on.aws"));
        assert!(admin.token().contains("DbConnectAdmin"));
        assert_eq!(admin.expires_in(), Duration::from_secs(30));

        let app = issuer.issue(&config("rewards_app")).await.unwrap();
        assert!(app.token().contains("DbConnect"));
        assert!(!app.token().contains("DbConnectAdmin"));
    }

    #[test]
    fn test_generator_accepts_cluster_settings() {
        assert!(SdkTokenIssuer::generator(&config("admin")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_issuer_honors_ttl() {
        let credential = StaticTokenIssuer::new("pw").issue(&config("admin")).await.unwrap();
        assert_eq!(credential.token(), "pw");
        assert!(!credential.is_expired());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(credential.is_expired());
    }
}
