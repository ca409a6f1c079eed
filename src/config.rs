//! Provider and engine configuration

use std::path::PathBuf;
use std::time::Duration;

/// Default per-command deadline in milliseconds
pub const DEFAULT_ARTICLE_TIMEOUT_MS: u64 = 15_000;

/// Default retries per provider per segment
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default base of the exponential retry backoff in milliseconds
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// Default connection ceiling per provider
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Usenet provider configuration
///
/// Immutable for the duration of a job; pools and the fallback manager
/// borrow it through an `Arc`.
///
/// # Example
///
/// ```
/// use nzb_engine::ProviderConfig;
///
/// let primary = ProviderConfig::tls("primary", "news.example.com", "user", "pass")
///     .with_fallbacks(["backup"]);
/// assert_eq!(primary.port, 563);
/// ```
#[must_use]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProviderConfig {
    /// Unique provider identifier used by fallback routing
    pub id: String,

    /// Server hostname (e.g., "news.example.com")
    pub host: String,

    /// Server port (typically 119 for plain, 563 for TLS)
    pub port: u16,

    /// Use TLS encryption. A transport that cannot offer TLS must fail
    /// rather than silently downgrade to plaintext.
    pub tls: bool,

    /// Accept self-signed/expired/mismatched certificates.
    ///
    /// Usenet providers routinely terminate TLS with certificates that do
    /// not validate against public roots, so this defaults to `true`.
    /// Set to `false` to validate against the Mozilla root store.
    #[cfg_attr(feature = "serde", serde(default = "default_insecure_tls"))]
    pub allow_insecure_tls: bool,

    /// Username for AUTHINFO, if the provider requires authentication
    pub username: Option<String>,

    /// Password for AUTHINFO
    pub password: Option<String>,

    /// Connection ceiling for this provider's pool (also bounds segment
    /// concurrency when this provider is primary)
    pub max_connections: usize,

    /// Per-command deadline in milliseconds
    pub article_timeout_ms: u64,

    /// Retries per segment on this provider before falling back
    pub retry_attempts: u32,

    /// Base of the exponential backoff between retries, in milliseconds
    pub retry_backoff_ms: u64,

    /// Issue GROUP before BODY. Most providers resolve message-ids without
    /// a selected group; the few that do not can opt in here.
    #[cfg_attr(feature = "serde", serde(default))]
    pub issue_group: bool,

    /// Optional provider-specific save root overriding the engine default
    pub download_path: Option<PathBuf>,

    /// Ordered fallback provider ids tried after this provider
    #[cfg_attr(feature = "serde", serde(default))]
    pub fallback_provider_ids: Vec<String>,
}

#[cfg(feature = "serde")]
fn default_insecure_tls() -> bool {
    true
}

impl ProviderConfig {
    /// Create a new provider configuration
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            tls,
            allow_insecure_tls: true,
            username: None,
            password: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            article_timeout_ms: DEFAULT_ARTICLE_TIMEOUT_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            issue_group: false,
            download_path: None,
            fallback_provider_ids: Vec::new(),
        }
    }

    /// Create a configuration for a TLS provider on the standard secure port (563)
    pub fn tls(
        id: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut config = Self::new(id, host, 563, true);
        config.username = Some(username.into());
        config.password = Some(password.into());
        config
    }

    /// Create a configuration for a plain provider on the standard port (119)
    ///
    /// **Warning:** Plain connections transmit credentials in clear text.
    pub fn plain(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::new(id, host, port, false)
    }

    /// Set the ordered fallback provider ids
    pub fn with_fallbacks<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_provider_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set the connection ceiling
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Set retry accounting parameters
    pub fn with_retries(mut self, attempts: u32, backoff_ms: u64) -> Self {
        self.retry_attempts = attempts;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    /// Per-command deadline as a `Duration`
    pub fn article_timeout(&self) -> Duration {
        Duration::from_millis(self.article_timeout_ms)
    }

    /// Whether AUTHINFO credentials are configured
    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }
}

/// Engine-wide configuration
#[must_use]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Root directory jobs are saved under; each job gets
    /// `<download_path>/<job_name>/`
    pub download_path: PathBuf,

    /// Override for the segment fan-out bound. Defaults to the primary
    /// provider's `max_connections` so in-flight work never exceeds
    /// provider capacity.
    pub segment_concurrency: Option<usize>,

    /// Extract the first archive after verification/repair
    #[cfg_attr(feature = "serde", serde(default))]
    pub auto_extract: bool,

    /// Minimum interval between progress events for a job, in milliseconds
    pub progress_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_path: PathBuf::from("downloads"),
            segment_concurrency: None,
            auto_extract: false,
            progress_interval_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Create a configuration saving under the given root
    pub fn new(download_path: impl Into<PathBuf>) -> Self {
        Self {
            download_path: download_path.into(),
            ..Self::default()
        }
    }

    /// Progress throttle as a `Duration`
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
