//! DNS resolution and dual-stack ("Happy Eyeballs") connection racing.
//!
//! The lite scheme: resolved addresses are partitioned by family and
//! interleaved starting with the preferred family; attempt starts are
//! staggered across families and spaced within a family; the first
//! successful socket wins and every other in-flight attempt is aborted
//! and its socket dropped.

use crate::config::HappyEyeballsConfig;
use crate::error::HttpError;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Low-level dialer, injectable for tests.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a TCP connection to `addr` within `budget`.
    async fn dial(&self, addr: SocketAddr, budget: Duration) -> std::io::Result<TcpStream>;
}

/// Production dialer over `tokio::net::TcpStream`.
#[derive(Debug, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: SocketAddr, budget: Duration) -> std::io::Result<TcpStream> {
        match tokio::time::timeout(budget, TcpStream::connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out after {budget:?}"),
            )),
        }
    }
}

/// Resolve `host` to socket addresses within `timeout`.
///
/// The platform may not offer cancellable DNS, so the bound is a hard
/// timeout rather than a token. IP literals (including bracketed IPv6)
/// short-circuit resolution.
pub(crate) async fn resolve(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Vec<SocketAddr>, HttpError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let addrs: Vec<SocketAddr> =
        match tokio::time::timeout(timeout, tokio::net::lookup_host((bare, port))).await {
            Ok(Ok(iter)) => iter.collect(),
            Ok(Err(e)) => {
                return Err(HttpError::network_caused(
                    format!("DNS resolution for {host} failed"),
                    e,
                ));
            }
            Err(_) => {
                return Err(HttpError::network(format!(
                    "DNS resolution for {host} timed out after {timeout:?}"
                )));
            }
        };

    if addrs.is_empty() {
        return Err(HttpError::network(format!("host not found: {host}")));
    }
    Ok(addrs)
}

/// Race connection attempts across the resolved addresses and return the
/// first established socket together with its address.
pub(crate) async fn connect(
    addrs: &[SocketAddr],
    config: &HappyEyeballsConfig,
    ct: &CancellationToken,
    dialer: &dyn Dialer,
) -> Result<(TcpStream, SocketAddr), HttpError> {
    if addrs.is_empty() {
        return Err(HttpError::network("no addresses to connect to"));
    }
    if ct.is_cancelled() {
        return Err(HttpError::Cancelled);
    }

    if !config.enabled {
        return connect_sequential(addrs, config, ct, dialer).await;
    }

    let schedule = build_schedule(addrs, config);
    race(schedule, config, ct, dialer).await
}

async fn connect_sequential(
    addrs: &[SocketAddr],
    config: &HappyEyeballsConfig,
    ct: &CancellationToken,
    dialer: &dyn Dialer,
) -> Result<(TcpStream, SocketAddr), HttpError> {
    let mut errors = Vec::new();
    for &addr in addrs {
        tokio::select! {
            biased;
            () = ct.cancelled() => return Err(HttpError::Cancelled),
            result = dialer.dial(addr, config.attempt_timeout) => match result {
                Ok(stream) => return Ok((stream, addr)),
                Err(e) => errors.push((addr, e)),
            }
        }
    }
    Err(aggregate(&errors))
}

/// Per-attempt start offsets: the preferred family leads, the other family
/// starts `family_stagger` later, and attempts within a family are spaced
/// `attempt_spacing` apart.
fn build_schedule(
    addrs: &[SocketAddr],
    config: &HappyEyeballsConfig,
) -> Vec<(Duration, SocketAddr)> {
    let (v6, v4): (Vec<_>, Vec<_>) = addrs.iter().copied().partition(SocketAddr::is_ipv6);
    let (leading, trailing) = if config.prefer_ipv6 { (v6, v4) } else { (v4, v6) };

    let mut schedule = Vec::with_capacity(addrs.len());
    for (i, addr) in leading.iter().enumerate() {
        schedule.push((config.attempt_spacing * i as u32, *addr));
    }
    for (i, addr) in trailing.iter().enumerate() {
        schedule.push((
            config.family_stagger + config.attempt_spacing * i as u32,
            *addr,
        ));
    }
    schedule.sort_by_key(|(delay, _)| *delay);
    schedule
}

async fn race(
    schedule: Vec<(Duration, SocketAddr)>,
    config: &HappyEyeballsConfig,
    ct: &CancellationToken,
    dialer: &dyn Dialer,
) -> Result<(TcpStream, SocketAddr), HttpError> {
    let started = Instant::now();
    let max_in_flight = config.max_concurrent_attempts.max(1);
    let mut next = 0usize;
    let mut in_flight = FuturesUnordered::new();
    let mut errors: Vec<(SocketAddr, std::io::Error)> = Vec::new();

    loop {
        // Launch every attempt whose start time has arrived, up to the
        // in-flight cap.
        while next < schedule.len()
            && in_flight.len() < max_in_flight
            && schedule[next].0 <= started.elapsed()
        {
            let (_, addr) = schedule[next];
            next += 1;
            let budget = config.attempt_timeout;
            in_flight.push(async move { (addr, dialer.dial(addr, budget).await) });
        }

        if in_flight.is_empty() && next >= schedule.len() {
            return Err(aggregate(&errors));
        }

        let can_launch_more = next < schedule.len() && in_flight.len() < max_in_flight;
        let until_next = if can_launch_more {
            schedule[next].0.saturating_sub(started.elapsed())
        } else {
            Duration::from_secs(3600)
        };

        tokio::select! {
            biased;
            // Dropping `in_flight` aborts every attempt and releases its
            // socket before this function returns.
            () = ct.cancelled() => return Err(HttpError::Cancelled),
            completed = in_flight.next(), if !in_flight.is_empty() => {
                if let Some((addr, result)) = completed {
                    match result {
                        Ok(stream) => return Ok((stream, addr)),
                        Err(e) => errors.push((addr, e)),
                    }
                }
            }
            () = tokio::time::sleep(until_next), if can_launch_more => {}
        }
    }
}

fn aggregate(errors: &[(SocketAddr, std::io::Error)]) -> HttpError {
    if errors.is_empty() {
        return HttpError::network("no connection attempts were made");
    }
    let detail = errors
        .iter()
        .map(|(addr, e)| format!("{addr}: {e}"))
        .collect::<Vec<_>>()
        .join("; ");
    HttpError::network(format!("all connection attempts failed ({detail})"))
}
