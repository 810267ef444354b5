//! HTTP(S) proxy with CONNECT tunneling
//!
//! CONNECT requests are bridged into the shared relay engine as raw byte
//! streams; every other request is forwarded through a transparent HTTP
//! round-trip. The listener speaks HTTP/1, plain or TLS-terminated.

mod handler;
mod server;

pub use server::{ProxyConfig, ProxyError, ProxyProtocol, ProxyServer};
