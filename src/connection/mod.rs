//! NNTP connection state machine
//!
//! One [`NntpConnection`] wraps one transport stream and serializes exactly
//! one in-flight command at a time (`&mut self` enforces this; the pool
//! never hands a connection to two requests). Connections are created as
//! unconnected placeholders and dialed lazily via
//! [`ensure_connected`](NntpConnection::ensure_connected).

mod articles;
mod auth;
mod io;

use crate::config::ProviderConfig;
use crate::error::{EngineError, Result};
use crate::response::codes;
use crate::transport::{Transport, TransportStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{debug, warn};

/// Reconnect attempts when a stale connection is redialed
const RECONNECT_ATTEMPTS: u32 = 3;

/// Fixed delay between reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// BufReader capacity for article downloads (256KB)
const BUFREADER_CAPACITY: usize = 256 * 1024;

/// A single NNTP connection to one provider
pub struct NntpConnection {
    provider: Arc<ProviderConfig>,
    transport: Arc<dyn Transport>,
    /// `None` while disconnected; commands require an established stream
    stream: Option<BufReader<Box<dyn TransportStream>>>,
    /// Newsgroup selected on this connection, if any
    current_group: Option<String>,
    /// Set when the connection received garbage, timed out, or died
    /// mid-body; the pool discards broken connections
    broken: bool,
}

impl NntpConnection {
    /// Create an unconnected placeholder for a provider
    pub fn new(provider: Arc<ProviderConfig>, transport: Arc<dyn Transport>) -> Self {
        Self {
            provider,
            transport,
            stream: None,
            current_group: None,
            broken: false,
        }
    }

    /// Whether a transport stream is established
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether this connection should be discarded
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// The newsgroup selected on this connection, if any
    pub fn current_group(&self) -> Option<&str> {
        self.current_group.as_deref()
    }

    /// Provider this connection belongs to
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Establish the connection if it is absent or broken
    ///
    /// Dials up to 3 times with a fixed 1 s delay between attempts.
    /// Authentication rejections abort immediately; other failures surface
    /// as [`EngineError::ConnectionFailed`] once the attempts run out.
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.stream.is_some() && !self.broken {
            return Ok(());
        }

        self.disconnect();

        let mut last_error = None;
        for attempt in 0..RECONNECT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(RECONNECT_DELAY).await;
            }

            match self.connect_once().await {
                Ok(()) => return Ok(()),
                Err(e @ EngineError::AuthFailed(_)) => {
                    // Credentials will not improve on retry
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt + 1,
                        RECONNECT_ATTEMPTS,
                        self.provider.host,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(EngineError::ConnectionFailed(format!(
            "{}:{}: {}",
            self.provider.host,
            self.provider.port,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        )))
    }

    /// Dial once: transport connect, greeting, AUTHINFO when configured
    async fn connect_once(&mut self) -> Result<()> {
        let stream = self.transport.connect(self.provider.as_ref()).await?;
        self.stream = Some(BufReader::with_capacity(BUFREADER_CAPACITY, stream));
        self.broken = false;
        self.current_group = None;

        let greeting = self.read_status().await.inspect_err(|_| self.teardown())?;
        debug!("Server greeting: {} {}", greeting.code, greeting.message);

        if greeting.code != codes::READY_POSTING_ALLOWED
            && greeting.code != codes::READY_NO_POSTING
        {
            self.teardown();
            return Err(greeting.into_error());
        }

        if self.provider.has_credentials() {
            self.authenticate().await.inspect_err(|_| self.teardown())?;
        }

        Ok(())
    }

    /// Drop the transport and clear all per-connection state
    ///
    /// No QUIT is sent; any caller waiting on this connection observes
    /// [`EngineError::ConnectionClosed`].
    pub fn disconnect(&mut self) {
        if self.stream.is_some() {
            debug!("Disconnecting from {}", self.provider.host);
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.stream = None;
        self.current_group = None;
        self.broken = false;
    }
}
