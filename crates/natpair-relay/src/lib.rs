//! Connection pairing and full-duplex relay engine
//!
//! Pairs two independently-established TCP connections (accepted,
//! dialed, or one of each) and streams bytes between them until either
//! side closes. This is the core shared by every topology, including the
//! HTTP CONNECT tunnel in `natpair-proxy`.

pub mod endpoint;
pub mod relay;
pub mod retry;
pub mod session;
pub mod source;
pub mod topology;

pub use relay::relay;
pub use retry::RetryPolicy;
pub use session::{pair, Session};
pub use source::{dial_with_retry, Acceptor, ConnectionSource, SourceError};
pub use topology::{AgentTopology, ForwardTopology, ListenTopology};
