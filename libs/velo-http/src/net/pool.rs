//! Per-authority connection pool.
//!
//! Each authority key owns a bounded semaphore (the concurrency cap) and a
//! FIFO of idle connections. A [`Lease`] couples one connection with
//! exactly one permit-release obligation; the permit is an owned semaphore
//! permit, so the type system enforces the single release on every
//! termination path, including drops mid-cancellation.

use super::conn::{AuthorityKey, ConnStream, PooledConnection};
use super::dial::{self, Dialer, TcpDialer};
use super::tls::TlsClient;
use crate::config::{HappyEyeballsConfig, PoolConfig, TlsConfig};
use crate::error::HttpError;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

struct AuthorityEntry {
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<PooledConnection>>,
}

struct PoolInner {
    entries: DashMap<AuthorityKey, Arc<AuthorityEntry>>,
    disposed: AtomicBool,
    config: PoolConfig,
    eyeballs: HappyEyeballsConfig,
    tls: TlsClient,
    dialer: Arc<dyn Dialer>,
}

impl PoolInner {
    /// Return a connection to the idle queue, or dispose it when the pool
    /// is already gone (disposed, or the key was evicted meanwhile).
    fn release(&self, mut conn: PooledConnection) {
        if self.disposed.load(Ordering::SeqCst) {
            conn.dispose();
            return;
        }
        if let Some(entry) = self.entries.get(conn.key()) {
            conn.touch();
            entry.idle.lock().push_back(conn);
        } else {
            conn.dispose();
        }
    }
}

/// Connection pool keyed by `(host, port, tls)`.
///
/// Cloning shares the pool. Disposal drains and disposes idle connections;
/// in-flight leases then dispose their connections on release instead of
/// re-enqueuing them.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Build a pool with the production TCP dialer.
    ///
    /// # Errors
    ///
    /// Fails when the TLS trust-root provider cannot be initialized
    /// (e.g. [`crate::TlsProvider::SystemOnly`] with no system store).
    pub fn new(
        config: PoolConfig,
        eyeballs: HappyEyeballsConfig,
        tls: TlsConfig,
    ) -> Result<Self, HttpError> {
        Self::with_dialer(config, eyeballs, tls, Arc::new(TcpDialer))
    }

    /// Build a pool with an injected low-level dialer.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`new`](Self::new).
    pub fn with_dialer(
        config: PoolConfig,
        eyeballs: HappyEyeballsConfig,
        tls: TlsConfig,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self, HttpError> {
        Ok(Self {
            inner: Arc::new(PoolInner {
                entries: DashMap::new(),
                disposed: AtomicBool::new(false),
                config,
                eyeballs,
                tls: TlsClient::new(&tls)?,
                dialer,
            }),
        })
    }

    /// Acquire a lease for `key`: one per-authority permit plus a live
    /// connection (recycled from the idle queue when possible, freshly
    /// dialed otherwise).
    ///
    /// On every failure path after the permit is granted, the permit is
    /// released by dropping it before the error propagates.
    ///
    /// # Errors
    ///
    /// Pool disposal, cancellation, DNS/connect/TLS failures.
    pub async fn acquire(
        &self,
        key: &AuthorityKey,
        ct: &CancellationToken,
    ) -> Result<Lease, HttpError> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::SeqCst) {
            return Err(HttpError::network("connection pool is disposed"));
        }

        let entry = self.entry_for(key);

        let permit = tokio::select! {
            biased;
            () = ct.cancelled() => return Err(HttpError::Cancelled),
            permit = entry.semaphore.clone().acquire_owned() => permit
                .map_err(|_| HttpError::network("connection pool is disposed"))?,
        };

        // The pool may have been disposed while we waited for the permit.
        if inner.disposed.load(Ordering::SeqCst) {
            return Err(HttpError::network("connection pool is disposed"));
        }

        // Recycle: discard dead or aged idle connections, lease the first
        // live one.
        loop {
            let candidate = entry.idle.lock().pop_front();
            let Some(mut conn) = candidate else { break };
            if !conn.is_alive() || conn.idle_for() > inner.config.idle_timeout {
                conn.dispose();
                continue;
            }
            conn.mark_reused();
            return Ok(Lease::new(conn, permit, Arc::downgrade(inner)));
        }

        let conn = self.dial(key, ct).await?;
        Ok(Lease::new(conn, permit, Arc::downgrade(inner)))
    }

    async fn dial(
        &self,
        key: &AuthorityKey,
        ct: &CancellationToken,
    ) -> Result<PooledConnection, HttpError> {
        let inner = &self.inner;
        let addrs = dial::resolve(key.host(), key.port(), inner.config.dns_timeout).await?;
        let (stream, addr) =
            dial::connect(&addrs, &inner.eyeballs, ct, inner.dialer.as_ref()).await?;
        tracing::debug!(authority = %key, %addr, tls = key.tls(), "connection established");

        if key.tls() {
            let sni = key.host().trim_start_matches('[').trim_end_matches(']');
            let (tls_stream, session) = inner.tls.wrap(sni, stream, ct).await?;
            let mut conn = PooledConnection::new(key.clone(), ConnStream::Tls(Box::new(tls_stream)));
            conn.set_tls_session(session.version, session.alpn);
            Ok(conn)
        } else {
            Ok(PooledConnection::new(key.clone(), ConnStream::Plain(stream)))
        }
    }

    fn entry_for(&self, key: &AuthorityKey) -> Arc<AuthorityEntry> {
        let inner = &self.inner;
        if let Some(entry) = inner.entries.get(key) {
            return entry.clone();
        }
        if inner.entries.len() >= inner.config.max_authorities {
            self.evict_quiescent(key);
        }
        inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(AuthorityEntry {
                    semaphore: Arc::new(Semaphore::new(inner.config.max_per_authority)),
                    idle: Mutex::new(VecDeque::new()),
                })
            })
            .clone()
    }

    /// Best-effort eviction of authority entries with no permits in use.
    /// Idle connections of evicted keys are drained and disposed first.
    /// Semaphore objects are never disposed here: an in-flight lease may
    /// still hold a reference, and its owned permit keeps the semaphore
    /// alive independently of the map.
    fn evict_quiescent(&self, current: &AuthorityKey) {
        let inner = &self.inner;
        let cap = inner.config.max_per_authority;
        let victims: Vec<AuthorityKey> = inner
            .entries
            .iter()
            .filter(|e| e.key() != current && e.value().semaphore.available_permits() == cap)
            .map(|e| e.key().clone())
            .collect();

        for key in victims {
            if inner.entries.len() < inner.config.max_authorities {
                break;
            }
            // Re-check quiescence under the map entry lock so a key that
            // just gained an in-flight lease is not removed.
            let removed = inner
                .entries
                .remove_if(&key, |_, entry| entry.semaphore.available_permits() == cap);
            if let Some((key, entry)) = removed {
                let mut idle = entry.idle.lock();
                let drained = idle.len();
                while let Some(mut conn) = idle.pop_front() {
                    conn.dispose();
                }
                tracing::debug!(authority = %key, drained, "evicted quiescent pool entry");
            }
        }
    }

    /// Dispose the pool: drain and dispose every idle connection and
    /// reject all future acquires. In-flight leases keep working; their
    /// connections are disposed instead of re-enqueued on release.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        for entry in self.inner.entries.iter() {
            let mut idle = entry.value().idle.lock();
            while let Some(mut conn) = idle.pop_front() {
                conn.dispose();
            }
        }
        self.inner.entries.clear();
    }

    /// Number of idle connections currently pooled for `key`.
    #[must_use]
    pub fn idle_count(&self, key: &AuthorityKey) -> usize {
        self.inner
            .entries
            .get(key)
            .map_or(0, |entry| entry.idle.lock().len())
    }

    /// Permits currently available for `key` (the per-authority cap when
    /// nothing is in flight).
    #[must_use]
    pub fn available_permits(&self, key: &AuthorityKey) -> Option<usize> {
        self.inner
            .entries
            .get(key)
            .map(|entry| entry.semaphore.available_permits())
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("authorities", &self.inner.entries.len())
            .field("disposed", &self.inner.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

/// A scoped acquisition of one pooled connection and one concurrency
/// permit.
///
/// The lease is an owned, move-only resource: the permit is released
/// exactly once, by dropping the owned permit, on every termination path.
/// [`return_to_pool`](Self::return_to_pool) and [`dispose`](Self::dispose)
/// are idempotent and may be called in either order; returning the
/// connection and then disposing the lease never disposes the returned
/// connection.
pub struct Lease {
    conn: Option<PooledConnection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Weak<PoolInner>,
    reused: bool,
}

impl Lease {
    fn new(conn: PooledConnection, permit: OwnedSemaphorePermit, pool: Weak<PoolInner>) -> Self {
        let reused = conn.is_reused();
        Self {
            conn: Some(conn),
            permit: Some(permit),
            pool,
            reused,
        }
    }

    /// Whether the leased connection came from the idle queue.
    #[must_use]
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Mutable access to the leased connection.
    ///
    /// # Errors
    ///
    /// Fails once the connection has been returned or the lease disposed.
    pub fn connection(&mut self) -> Result<&mut PooledConnection, HttpError> {
        self.conn
            .as_mut()
            .ok_or_else(|| HttpError::network("lease no longer holds a connection"))
    }

    /// Hand the connection back to the pool's idle queue. The permit stays
    /// held until [`dispose`](Self::dispose) (or drop). Idempotent.
    pub fn return_to_pool(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Some(inner) = self.pool.upgrade() {
                inner.release(conn);
            } else {
                conn.dispose();
            }
        }
    }

    /// Dispose the lease: close the connection if it was not returned, and
    /// release the permit. Idempotent.
    pub fn dispose(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.dispose();
        }
        // Dropping the owned permit is the single release.
        self.permit.take();
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("reused", &self.reused)
            .field("holds_connection", &self.conn.is_some())
            .field("holds_permit", &self.permit.is_some())
            .finish()
    }
}
