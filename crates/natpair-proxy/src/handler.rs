//! Per-request dispatch: CONNECT tunneling and plain pass-through

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioIo};
use natpair_relay::{relay, Session};
use std::convert::Infallible;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Which way a request leaves the proxy.
enum RouteKind {
    /// CONNECT: bridge the client to a raw TCP stream
    Tunnel,
    /// Anything else: a transparent HTTP round-trip
    PassThrough,
}

fn classify<B>(req: &Request<B>) -> RouteKind {
    if req.method() == Method::CONNECT {
        RouteKind::Tunnel
    } else {
        RouteKind::PassThrough
    }
}

pub(crate) struct RequestHandler {
    client: Client<HttpConnector, Incoming>,
    connect_timeout: Duration,
}

impl RequestHandler {
    pub(crate) fn new(connect_timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            connect_timeout,
        }
    }

    pub(crate) async fn handle(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<ProxyBody>, Infallible> {
        let response = match classify(&req) {
            RouteKind::Tunnel => self.tunnel(req).await,
            RouteKind::PassThrough => self.pass_through(req).await,
        };
        Ok(response)
    }

    /// Bridge a CONNECT request into a relay session: dial the target,
    /// answer 200 with no body, then hand the upgraded client stream and
    /// the dialed stream to the relay without waiting for completion.
    async fn tunnel(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        let target = match req.uri().authority() {
            Some(authority) => authority.to_string(),
            None => {
                return status_response(StatusCode::BAD_REQUEST, "CONNECT target missing");
            }
        };

        let outbound = match timeout(self.connect_timeout, TcpStream::connect(&target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("CONNECT dial to {} failed: {}", target, e);
                return status_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
            }
            Err(_) => {
                warn!("CONNECT dial to {} timed out", target);
                return status_response(StatusCode::SERVICE_UNAVAILABLE, "connect timed out");
            }
        };

        // The inbound transport must support the upgrade before the 200
        // goes out; only connections served with upgrades enabled do.
        if req.extensions().get::<OnUpgrade>().is_none() {
            return status_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "connection upgrade not supported",
            );
        }

        info!("tunneling to {}", target);
        tokio::spawn(async move {
            // Resolves once the 200 response has been written out and the
            // connection is released to us as a raw stream.
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    relay(Session {
                        first: TokioIo::new(upgraded),
                        second: outbound,
                    })
                    .await;
                }
                Err(e) => {
                    error!("connection upgrade failed: {}", e);
                }
            }
        });

        Response::new(empty())
    }

    /// Forward a non-CONNECT request as-is; on success the status code,
    /// headers, and body stream back to the caller unchanged.
    async fn pass_through(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        debug!("pass-through {} {}", req.method(), req.uri());
        match self.client.request(req).await {
            Ok(response) => response.map(|body| body.boxed()),
            Err(e) => {
                warn!("pass-through round-trip failed: {}", e);
                status_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
            }
        }
    }
}

fn status_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut response = Response::new(full(format!("{}\n", message)));
    *response.status_mut() = status;
    response
}

fn full(body: impl Into<Bytes>) -> ProxyBody {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed()
}

fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}
