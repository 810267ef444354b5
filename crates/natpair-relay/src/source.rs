//! Connection sources: inbound acceptor and retrying outbound dialer
//!
//! A source produces exactly one ready connection per invocation and
//! hands it off through a delivery slot. The acceptor variant binds once
//! and retries transient accept errors immediately; the dialer variant
//! retries failed connects on a fixed interval, unlimited by default.

use crate::endpoint;
use crate::retry::RetryPolicy;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}")]
    Bind { address: String, reason: String },

    #[error("Gave up connecting to {address} after {attempts} attempts")]
    RetriesExhausted { address: String, attempts: usize },

    #[error("Connection source stopped before delivering")]
    SourceStopped,
}

/// Single-use handoff slot through which a source delivers one ready
/// connection. Created per pairing cycle and discarded after use.
pub type DeliverySlot = mpsc::Sender<TcpStream>;

/// Inbound connection source. The listener is bound once and lives for
/// the process lifetime; `accept_one` is re-invoked per pairing cycle.
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    /// Bind a listener on the normalized endpoint. Binding failure is the
    /// fatal path: no session can ever form on this source.
    pub async fn bind(address: &str) -> Result<Self, SourceError> {
        let address = endpoint::normalize(address);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| SourceError::Bind {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SourceError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one inbound connection. A failed accept attempt is logged
    /// and retried immediately; this never gives up.
    pub async fn accept_one(&self) -> TcpStream {
        loop {
            if let Ok(addr) = self.listener.local_addr() {
                info!("waiting for client on {}", addr);
            }
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    info!("new client {} connected", peer_addr);
                    return stream;
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Connect to `target`, sleeping the policy interval between failed
/// attempts. With the default policy this only returns on success.
pub async fn dial_with_retry(
    target: &str,
    policy: &RetryPolicy,
) -> Result<TcpStream, SourceError> {
    let mut attempts = 0usize;
    loop {
        attempts += 1;
        match timeout(policy.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                if let Ok(local_addr) = stream.local_addr() {
                    info!("connected {} -> {}", local_addr, target);
                }
                return Ok(stream);
            }
            Ok(Err(e)) => {
                warn!("connect to {} failed: {}", target, e);
            }
            Err(_) => {
                warn!(
                    "connect to {} timed out after {}s",
                    target,
                    policy.connect_timeout.as_secs()
                );
            }
        }

        if let Some(max) = policy.max_attempts {
            if attempts >= max {
                return Err(SourceError::RetriesExhausted {
                    address: target.to_string(),
                    attempts,
                });
            }
        }

        info!(
            "retrying {} in {}s",
            target,
            policy.interval.as_secs()
        );
        sleep(policy.interval).await;
    }
}

/// A way of obtaining one ready connection.
pub enum ConnectionSource {
    /// Accept one inbound connection on a bound listener.
    Accept(Arc<Acceptor>),
    /// Dial a remote endpoint, retrying until it answers.
    Dial {
        target: String,
        policy: RetryPolicy,
    },
}

impl ConnectionSource {
    /// Spawn a task that produces one connection and hands it through
    /// `slot`, then finishes. A source that exhausts a bounded retry
    /// policy delivers nothing and drops its sender instead.
    pub fn deliver(&self, slot: DeliverySlot) {
        match self {
            ConnectionSource::Accept(acceptor) => {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let stream = acceptor.accept_one().await;
                    let _ = slot.send(stream).await;
                });
            }
            ConnectionSource::Dial { target, policy } => {
                let target = target.clone();
                let policy = policy.clone();
                tokio::spawn(async move {
                    match dial_with_retry(&target, &policy).await {
                        Ok(stream) => {
                            let _ = slot.send(stream).await;
                        }
                        Err(e) => {
                            error!("dial source for {} stopped: {}", target, e);
                        }
                    }
                });
            }
        }
    }
}
