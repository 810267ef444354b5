//! Full-duplex byte relay over a session
//!
//! Two independent copy tasks, one per direction, joined at the end. The
//! first direction to terminate (end-of-stream or error) tears the
//! whole session down; the relay never retries.

use crate::session::Session;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::debug;

/// Stream bytes in both directions until either side finishes, then
/// close both connections. Returns the bytes copied from `first` to
/// `second` and from `second` to `first` once both copy tasks have
/// settled.
///
/// Generic over the connection type so upgraded HTTP streams ride the
/// same engine as plain TCP streams.
pub async fn relay<A, B>(session: Session<A, B>) -> (u64, u64)
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let Session { first, second } = session;
    let (first_read, first_write) = io::split(first);
    let (second_read, second_write) = io::split(second);

    let forward_count = Arc::new(AtomicU64::new(0));
    let backward_count = Arc::new(AtomicU64::new(0));

    let mut forward = tokio::spawn(copy_direction(
        first_read,
        second_write,
        forward_count.clone(),
    ));
    let mut backward = tokio::spawn(copy_direction(
        second_read,
        first_write,
        backward_count.clone(),
    ));

    // The first direction to finish tears the session down: aborting the
    // peer task drops its halves, which closes both connections and
    // unblocks any read still in flight.
    tokio::select! {
        _ = &mut forward => {
            backward.abort();
            let _ = backward.await;
        }
        _ = &mut backward => {
            forward.abort();
            let _ = forward.await;
        }
    }

    let forward_bytes = forward_count.load(Ordering::Relaxed);
    let backward_bytes = backward_count.load(Ordering::Relaxed);
    debug!(forward_bytes, backward_bytes, "session closed");
    (forward_bytes, backward_bytes)
}

async fn copy_direction<R, W>(mut src: ReadHalf<R>, mut dst: WriteHalf<W>, count: Arc<AtomicU64>)
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let mut buf = vec![0u8; 16384];
    loop {
        match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = dst.write_all(&buf[..n]).await {
                    debug!("write failed: {}", e);
                    break;
                }
                if let Err(e) = dst.flush().await {
                    debug!("flush failed: {}", e);
                    break;
                }
                count.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(e) => {
                debug!("read ended: {}", e);
                break;
            }
        }
    }
    let _ = dst.shutdown().await;
}
