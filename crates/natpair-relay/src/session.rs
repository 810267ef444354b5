//! Pairing rendezvous
//!
//! A session is born when two connection sources have each delivered one
//! ready connection. Ordering between the two deliveries is irrelevant
//! and no timeout is imposed; with the default retry policy a pairing
//! cycle waits indefinitely for both sides.

use crate::source::{ConnectionSource, SourceError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Two connections bound together for the lifetime of one relay.
pub struct Session<A, B> {
    pub first: A,
    pub second: B,
}

/// Run both sources concurrently and block until each has delivered a
/// connection through the shared slot.
///
/// Each delivery task owns one sender, so a closed channel means no
/// further delivery can come: if every source stops without delivering
/// (only possible with a bounded retry policy), pairing fails instead of
/// hanging.
pub async fn pair(
    first: &ConnectionSource,
    second: &ConnectionSource,
) -> Result<Session<TcpStream, TcpStream>, SourceError> {
    let (slot, mut deliveries) = mpsc::channel(2);
    first.deliver(slot.clone());
    second.deliver(slot);

    let conn_a = deliveries.recv().await.ok_or(SourceError::SourceStopped)?;
    let conn_b = deliveries.recv().await.ok_or(SourceError::SourceStopped)?;

    Ok(Session {
        first: conn_a,
        second: conn_b,
    })
}
