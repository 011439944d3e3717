//! Cluster configuration models.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Database user that authenticates with the admin token.
pub const ADMIN_USER: &str = "admin";

/// TLS mode for store connections.
///
/// DSQL only accepts encrypted connections; `Disable` exists for local
/// PostgreSQL development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// No TLS
    Disable,
    /// Require TLS, accept any certificate (default)
    #[default]
    Require,
    /// Require TLS, verify CA
    VerifyCa,
    /// Require TLS, verify CA and hostname
    VerifyFull,
}

impl SslMode {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "disable" => Self::Disable,
            "verify-ca" | "verify_ca" => Self::VerifyCa,
            "verify-full" | "verify_full" => Self::VerifyFull,
            _ => Self::Require,
        }
    }
}

/// Additional connection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterOptions {
    /// Connection timeout in seconds
    pub connect_timeout_secs: u32,
    /// Validity of a freshly issued authentication token. Only has to
    /// outlive the handshake.
    pub token_ttl_secs: u32,
    /// Connections older than this are replaced before use. Kept well
    /// below the store's one hour session limit.
    pub max_connection_age_secs: u32,
    /// Application name sent to the store
    pub application_name: String,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            token_ttl_secs: 30,
            max_connection_age_secs: 55 * 60,
            application_name: "rewards".to_string(),
        }
    }
}

/// Immutable description of the cluster a process talks to.
///
/// Built once at startup. Holds no secret: tokens are issued per
/// connection attempt by a [`TokenIssuer`](crate::services::TokenIssuer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster endpoint hostname
    pub endpoint: String,
    /// AWS region of the cluster
    pub region: String,
    /// Server port (default 5432)
    pub port: u16,
    /// Database name
    pub database: String,
    /// Connecting database role
    pub username: String,
    /// TLS configuration
    pub ssl_mode: SslMode,
    /// Additional options
    pub options: ClusterOptions,
}

impl ClusterConfig {
    /// Create a new cluster configuration with required fields.
    pub fn new(
        endpoint: impl Into<String>,
        region: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            region: region.into(),
            port: 5432,
            database: database.into(),
            username: username.into(),
            ssl_mode: SslMode::default(),
            options: ClusterOptions::default(),
        }
    }

    /// Create a builder for complex configurations.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Load the configuration from the process environment.
    ///
    /// Reads `CLUSTER_ENDPOINT` (required), `AWS_REGION` or
    /// `AWS_DEFAULT_REGION` (required), `DB_NAME` (default `postgres`),
    /// `DB_USERNAME` (default `admin`) and optionally `DB_PORT` and
    /// `DB_SSLMODE`.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut builder = Self::builder()
            .database(lookup("DB_NAME").unwrap_or_else(|| "postgres".to_string()))
            .username(lookup("DB_USERNAME").unwrap_or_else(|| ADMIN_USER.to_string()));

        if let Some(endpoint) = lookup("CLUSTER_ENDPOINT") {
            builder = builder.endpoint(endpoint);
        }
        if let Some(region) = lookup("AWS_REGION").or_else(|| lookup("AWS_DEFAULT_REGION")) {
            builder = builder.region(region);
        }
        if let Some(port) = lookup("DB_PORT") {
            let port = port.parse::<u16>().map_err(|_| format!("Invalid DB_PORT: {port}"))?;
            builder = builder.port(port);
        }
        if let Some(mode) = lookup("DB_SSLMODE") {
            builder = builder.ssl_mode(SslMode::parse(&mode));
        }

        builder.build()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("Cluster endpoint is required".to_string());
        }
        if self.region.is_empty() {
            return Err("Region is required".to_string());
        }
        if self.database.is_empty() || self.database.len() > 63 {
            return Err("Database name must be 1-63 characters".to_string());
        }
        if self.username.is_empty() {
            return Err("Username is required".to_string());
        }
        if self.options.token_ttl_secs == 0 {
            return Err("Token validity must be at least one second".to_string());
        }
        if self.options.max_connection_age_secs == 0 {
            return Err("Maximum connection age must be at least one second".to_string());
        }
        Ok(())
    }

    /// Whether this role authenticates with the admin token.
    pub fn is_admin(&self) -> bool {
        self.username == ADMIN_USER
    }

    /// Maximum age of a connection before it is replaced.
    pub fn max_connection_age(&self) -> Duration {
        Duration::from_secs(u64::from(self.options.max_connection_age_secs))
    }

    /// Validity requested for each authentication token.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.options.token_ttl_secs))
    }

    /// Connect timeout for a single connection attempt.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.options.connect_timeout_secs))
    }

    /// Get the display connection string (without credentials).
    pub fn display_url(&self) -> String {
        format!(
            "postgresql://{}@{}:{}/{}?sslmode={}",
            self.username,
            self.endpoint,
            self.port,
            self.database,
            self.ssl_mode.as_str()
        )
    }
}

/// Builder for ClusterConfig.
#[derive(Debug, Default)]
pub struct ClusterConfigBuilder {
    endpoint: Option<String>,
    region: Option<String>,
    port: u16,
    database: Option<String>,
    username: Option<String>,
    ssl_mode: SslMode,
    options: ClusterOptions,
}

impl ClusterConfigBuilder {
    /// Set the cluster endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the region.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the TLS mode.
    pub fn ssl_mode(mut self, ssl_mode: SslMode) -> Self {
        self.ssl_mode = ssl_mode;
        self
    }

    /// Set connection options.
    pub fn options(mut self, options: ClusterOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the token validity.
    pub fn token_ttl_secs(mut self, secs: u32) -> Self {
        self.options.token_ttl_secs = secs;
        self
    }

    /// Set the maximum connection age.
    pub fn max_connection_age_secs(mut self, secs: u32) -> Self {
        self.options.max_connection_age_secs = secs;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ClusterConfig, String> {
        let config = ClusterConfig {
            endpoint: self.endpoint.ok_or("CLUSTER_ENDPOINT is required")?,
            region: self.region.ok_or("AWS_REGION is required")?,
            port: if self.port == 0 { 5432 } else { self.port },
            database: self.database.ok_or("Database is required")?,
            username: self.username.ok_or("Username is required")?,
            ssl_mode: self.ssl_mode,
            options: self.options,
        };
        config.validate()?;
        Ok(config)
    }
}
