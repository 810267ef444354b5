//! Proxy listener with optional TLS termination

use crate::handler::RequestHandler;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use natpair_relay::endpoint;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Failed to bind to {address}: {reason}")]
    Bind { address: String, reason: String },
}

/// Which protocol the proxy listener speaks.
#[derive(Debug, Clone)]
pub enum ProxyProtocol {
    Http,
    Https {
        cert_path: String,
        key_path: String,
    },
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: String,
    pub protocol: ProxyProtocol,
    /// Upper bound on dialing a CONNECT target
    pub connect_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:1080".to_string(),
            protocol: ProxyProtocol::Http,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

pub struct ProxyServer {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    handler: Arc<RequestHandler>,
}

impl ProxyServer {
    /// TLS setup happens before binding, so a missing or invalid
    /// cert/key is fatal while no listener exists yet.
    pub async fn bind(config: ProxyConfig) -> Result<Self, ProxyError> {
        let tls = match &config.protocol {
            ProxyProtocol::Http => None,
            ProxyProtocol::Https {
                cert_path,
                key_path,
            } => {
                let _ = rustls::crypto::ring::default_provider().install_default();

                info!("loading TLS certificate from {}", cert_path);
                let certs = load_certs(Path::new(cert_path))?;
                info!("loading TLS private key from {}", key_path);
                let key = load_private_key(Path::new(key_path))?;

                let tls_config = ServerConfig::builder()
                    .with_no_client_auth()
                    .with_single_cert(certs, key)
                    .map_err(|e| ProxyError::Tls(format!("invalid cert/key: {}", e)))?;
                Some(TlsAcceptor::from(Arc::new(tls_config)))
            }
        };

        let address = endpoint::normalize(&config.listen_addr);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| ProxyError::Bind {
                address: address.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            listener,
            tls,
            handler: Arc::new(RequestHandler::new(config.connect_timeout)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, serving each on its own task. Accept
    /// errors are logged and the loop continues.
    pub async fn run(self) -> Result<(), ProxyError> {
        let addr = self.local_addr()?;
        if self.tls.is_some() {
            info!("https proxy listening on {}", addr);
        } else {
            info!("http proxy listening on {}", addr);
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("new proxy connection from {}", peer_addr);
                    let tls = self.tls.clone();
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, tls, handler).await {
                            debug!("proxy connection from {} ended: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("failed to accept proxy connection: {}", e);
                }
            }
        }
    }
}

/// Serve one client connection over HTTP/1 with upgrades enabled, so
/// CONNECT can switch the stream to raw bytes afterwards. HTTP/2 is
/// never negotiated.
async fn serve_connection(
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
    handler: Arc<RequestHandler>,
) -> Result<(), ProxyError> {
    let service = service_fn(move |req| {
        let handler = handler.clone();
        async move { handler.handle(req).await }
    });

    match tls {
        None => {
            http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades()
                .await?
        }
        Some(acceptor) => {
            let tls_stream = acceptor.accept(stream).await?;
            http1::Builder::new()
                .serve_connection(TokioIo::new(tls_stream), service)
                .with_upgrades()
                .await?
        }
    }
    Ok(())
}

/// Load the TLS certificate chain from a PEM file
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let file = File::open(path)
        .map_err(|e| ProxyError::Tls(format!("failed to open cert file: {}", e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Tls(format!("failed to parse certs: {}", e)))
}

/// Load the private key from a PEM file
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ProxyError> {
    let file = File::open(path)
        .map_err(|e| ProxyError::Tls(format!("failed to open key file: {}", e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ProxyError::Tls(format!("failed to parse key: {}", e)))?
        .ok_or_else(|| ProxyError::Tls("no private key found".to_string()))
}
