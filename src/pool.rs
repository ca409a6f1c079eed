//! Bounded per-provider connection pool with FIFO request queueing
//!
//! The pool owns every [`NntpConnection`] for one provider. A request takes
//! an idle connection, creates a lazily-dialed one while the ceiling
//! allows, or parks in a FIFO queue. Completions hand the connection to
//! the oldest waiter or return it to the idle list; a broken connection is
//! replaced by a fresh unconnected placeholder so capacity never leaks.

use crate::config::ProviderConfig;
use crate::connection::NntpConnection;
use crate::error::{EngineError, Result};
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Channel bound for streamed bodies, in lines
///
/// Bounds in-memory buffering and backpressures the socket when the
/// decoder's sink stalls.
const STREAM_CHANNEL_LINES: usize = 64;

/// Item delivered on a streamed body channel: one dot-unstuffed body line,
/// or the error that ended the stream
pub type BodyLine = Result<Vec<u8>>;

/// Connection pool for a single provider
pub struct ConnectionPool {
    provider: Arc<ProviderConfig>,
    transport: Arc<dyn Transport>,
    state: Mutex<PoolState>,
}

struct PoolState {
    /// Connections alive: idle here plus those out on loan
    total: usize,
    idle: Vec<NntpConnection>,
    /// FIFO queue of requests waiting for a connection
    waiters: VecDeque<oneshot::Sender<NntpConnection>>,
    shutdown: bool,
}

impl ConnectionPool {
    /// Create a pool for a provider; no connections are opened yet
    pub fn new(provider: Arc<ProviderConfig>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            transport,
            state: Mutex::new(PoolState {
                total: 0,
                idle: Vec::new(),
                waiters: VecDeque::new(),
                shutdown: false,
            }),
        })
    }

    /// Provider this pool serves
    pub fn provider(&self) -> &Arc<ProviderConfig> {
        &self.provider
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take an idle connection, create one under the ceiling, or queue FIFO
    async fn acquire(&self) -> Result<NntpConnection> {
        let rx = {
            let mut state = self.lock();
            if state.shutdown {
                return Err(EngineError::ConnectionClosed);
            }
            if let Some(conn) = state.idle.pop() {
                return Ok(conn);
            }
            if state.total < self.provider.max_connections {
                state.total += 1;
                return Ok(NntpConnection::new(
                    self.provider.clone(),
                    self.transport.clone(),
                ));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        rx.await.map_err(|_| EngineError::ConnectionClosed)
    }

    /// Return a connection after a request completes
    ///
    /// A broken connection is dropped and its slot refilled with an
    /// unconnected placeholder. The oldest queued waiter is always served
    /// first.
    fn release(&self, mut conn: NntpConnection) {
        if conn.is_broken() {
            debug!("Replacing broken connection to {}", self.provider.host);
            conn.disconnect();
            conn = NntpConnection::new(self.provider.clone(), self.transport.clone());
        }

        let mut state = self.lock();
        if state.shutdown {
            state.total = state.total.saturating_sub(1);
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(conn) {
                Ok(()) => return,
                // Waiter gave up (cancelled segment); try the next one
                Err(returned) => conn = returned,
            }
        }
        state.idle.push(conn);
    }

    /// Eagerly open `min(2, max_connections)` connections
    ///
    /// Failures are logged and tolerated; the lazily-connecting dispatch
    /// path retries when real requests arrive.
    pub async fn warm_up(&self) -> Result<()> {
        let target = self.provider.max_connections.min(2);
        let mut warmed = Vec::new();

        for _ in 0..target {
            let mut conn = self.acquire().await?;
            match conn.ensure_connected().await {
                Ok(()) => warmed.push(conn),
                Err(e) => {
                    warn!("Failed to pre-warm connection to {}: {}", self.provider.host, e);
                    self.release(conn);
                    break;
                }
            }
        }

        for conn in warmed {
            self.release(conn);
        }
        Ok(())
    }

    /// Fetch an article body into memory through the pool
    pub async fn fetch_body(&self, message_id: &str, group: Option<&str>) -> Result<Vec<u8>> {
        let mut conn = self.acquire().await?;

        let result = async {
            conn.ensure_connected().await?;
            conn.fetch_body(message_id, group).await
        }
        .await;

        self.release(conn);
        result
    }

    /// Fetch an article body as a stream of dot-unstuffed lines
    ///
    /// The returned channel yields body lines in order; an `Err` item ends
    /// the stream (connection failure, bad status, timeout). The
    /// connection returns to the pool when the stream finishes, so the
    /// receiver should be drained promptly.
    pub async fn fetch_body_streamed(
        self: &Arc<Self>,
        message_id: &str,
        group: Option<String>,
    ) -> Result<mpsc::Receiver<BodyLine>> {
        let mut conn = self.acquire().await?;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_LINES);

        let pool = self.clone();
        let message_id = message_id.to_string();
        tokio::spawn(async move {
            let result = async {
                conn.ensure_connected().await?;
                conn.fetch_body_streamed(&message_id, group.as_deref(), &tx)
                    .await
            }
            .await;

            if let Err(e) = result {
                // Receiver may already be gone; the broken flag still gets
                // the connection replaced below
                let _ = tx.try_send(Err(e));
            }
            drop(tx);
            pool.release(conn);
        });

        Ok(rx)
    }

    /// Number of idle connections (monitoring/tests)
    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    /// Number of live connections, in use or idle (monitoring/tests)
    pub fn total_count(&self) -> usize {
        self.lock().total
    }

    /// Number of queued requests (monitoring/tests)
    pub fn queued_count(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Disconnect everything and fail queued waiters
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        // Dropping the senders wakes queued waiters with ConnectionClosed
        state.waiters.clear();
        let mut idle: Vec<NntpConnection> = state.idle.drain(..).collect();
        state.total = state.total.saturating_sub(idle.len());
        drop(state);
        for conn in idle.iter_mut() {
            conn.disconnect();
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        debug!("Connection pool for {} dropped", self.provider.host);
    }
}

/// Pools keyed by provider id, created on demand
///
/// Provider switches during fallback resolve their pool here instead of
/// mutating a shared "current pool". One registry lives per job; the
/// orchestrator shuts it down when the job reaches a terminal state.
pub struct PoolRegistry {
    transport: Arc<dyn Transport>,
    pools: Mutex<HashMap<String, Arc<ConnectionPool>>>,
}

impl PoolRegistry {
    /// Create an empty registry using the given transport for new pools
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            pools: Mutex::new(HashMap::new()),
        })
    }

    /// Pool for a provider, created on first use
    pub fn get_or_create(&self, provider: &Arc<ProviderConfig>) -> Arc<ConnectionPool> {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        pools
            .entry(provider.id.clone())
            .or_insert_with(|| ConnectionPool::new(provider.clone(), self.transport.clone()))
            .clone()
    }

    /// Shut down every pool in the registry
    pub fn shutdown_all(&self) {
        let pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        for pool in pools.values() {
            pool.shutdown();
        }
    }
}
