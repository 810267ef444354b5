//! Topology drivers for the three TCP composition modes
//!
//! Each driver binds its listeners up front (so a bind failure surfaces
//! before the serve loop) and then runs pairing cycles forever. The
//! listen and agent modes relay one session to completion before
//! pairing again; forward mode spawns each relay and keeps pairing.

use crate::relay::relay;
use crate::retry::RetryPolicy;
use crate::session::pair;
use crate::source::{Acceptor, ConnectionSource, SourceError};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Pair the first two inbound connections on two listening endpoints.
pub struct ListenTopology {
    first: Arc<Acceptor>,
    second: Arc<Acceptor>,
}

impl ListenTopology {
    pub async fn bind(address0: &str, address1: &str) -> Result<Self, SourceError> {
        let first = Arc::new(Acceptor::bind(address0).await?);
        let second = Arc::new(Acceptor::bind(address1).await?);
        Ok(Self { first, second })
    }

    pub fn local_addrs(&self) -> Result<(SocketAddr, SocketAddr), SourceError> {
        Ok((self.first.local_addr()?, self.second.local_addr()?))
    }

    /// Sessions run strictly one at a time in this mode: a new pairing
    /// cycle begins only after the previous relay returns.
    pub async fn run(self) -> Result<(), SourceError> {
        let (addr0, addr1) = self.local_addrs()?;
        info!("listening on {} and {}", addr0, addr1);

        let first = ConnectionSource::Accept(self.first.clone());
        let second = ConnectionSource::Accept(self.second.clone());
        loop {
            let session = pair(&first, &second).await?;
            relay(session).await;
        }
    }
}

/// Accept inbound connections and relay each to a dialed target.
pub struct ForwardTopology {
    acceptor: Arc<Acceptor>,
    target: String,
    policy: RetryPolicy,
}

impl ForwardTopology {
    pub async fn bind(
        listen_address: &str,
        target: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<Self, SourceError> {
        let acceptor = Arc::new(Acceptor::bind(listen_address).await?);
        Ok(Self {
            acceptor,
            target: target.into(),
            policy,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SourceError> {
        self.acceptor.local_addr()
    }

    /// Each session is relayed on its own task; the next pairing cycle
    /// starts before the previous session finishes.
    pub async fn run(self) -> Result<(), SourceError> {
        let addr = self.local_addr()?;
        info!("listening on {} forwarding to {}", addr, self.target);

        let inbound = ConnectionSource::Accept(self.acceptor.clone());
        let outbound = ConnectionSource::Dial {
            target: self.target.clone(),
            policy: self.policy.clone(),
        };
        loop {
            let session = pair(&inbound, &outbound).await?;
            tokio::spawn(relay(session));
        }
    }
}

/// Dial out to two targets and relay between them.
pub struct AgentTopology {
    first_target: String,
    second_target: String,
    policy: RetryPolicy,
}

impl AgentTopology {
    pub fn new(
        first_target: impl Into<String>,
        second_target: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            first_target: first_target.into(),
            second_target: second_target.into(),
            policy,
        }
    }

    /// Sessions run one at a time, like the listen mode.
    pub async fn run(self) -> Result<(), SourceError> {
        info!(
            "agent pairing {} with {}",
            self.first_target, self.second_target
        );

        let first = ConnectionSource::Dial {
            target: self.first_target.clone(),
            policy: self.policy.clone(),
        };
        let second = ConnectionSource::Dial {
            target: self.second_target.clone(),
            policy: self.policy.clone(),
        };
        loop {
            let session = pair(&first, &second).await?;
            relay(session).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listen_topology_binds_two_endpoints() {
        let topology = ListenTopology::bind("127.0.0.1:0", "127.0.0.1:0")
            .await
            .unwrap();
        let (addr0, addr1) = topology.local_addrs().unwrap();
        assert_ne!(addr0.port(), 0);
        assert_ne!(addr1.port(), 0);
        assert_ne!(addr0.port(), addr1.port());
    }

    #[tokio::test]
    async fn forward_topology_reports_listen_address() {
        let topology =
            ForwardTopology::bind("127.0.0.1:0", "127.0.0.1:9", RetryPolicy::default())
                .await
                .unwrap();
        assert_ne!(topology.local_addr().unwrap().port(), 0);
    }
}
