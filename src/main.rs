//! natpair - pair two TCP connections and relay bytes between them
//!
//! Four composition modes: pair two listeners, accept-and-forward to a
//! dialed target, pair two dialed targets, and an HTTP(S) proxy with
//! CONNECT tunneling.

use anyhow::Result;
use natpair_proxy::{ProxyConfig, ProxyProtocol, ProxyServer};
use natpair_relay::{AgentTopology, ForwardTopology, ListenTopology, RetryPolicy};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Upper bound on a single connect attempt, shared by dialed targets and
/// CONNECT tunnels.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn print_usage() {
    println!("usage:");
    println!("    \"-forward listenPort targetAddress\" example: \"-forward 10000 127.0.0.1:22\"");
    println!("    \"-listen listenPort0 listenPort1\" example: \"-listen 10000 10001\"");
    println!("    \"-agent targetAddress0 targetAddress1\" example: \"-agent 127.0.0.1:10000 127.0.0.1:22\"");
    println!("    \"-proxy protocol listenAddress\" example: \"-proxy http 1080\", \"-proxy https 1080 server.pem server.key\"");
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

async fn run(args: &[String]) -> Result<()> {
    match args[1].as_str() {
        "-listen" | "-l" => {
            let topology = ListenTopology::bind(&args[2], &args[3]).await?;
            topology.run().await?;
        }
        "-forward" | "-f" => {
            let topology =
                ForwardTopology::bind(&args[2], args[3].clone(), RetryPolicy::default()).await?;
            topology.run().await?;
        }
        "-agent" | "-a" => {
            AgentTopology::new(args[2].clone(), args[3].clone(), RetryPolicy::default())
                .run()
                .await?;
        }
        "-proxy" | "-p" => {
            let protocol = match args[2].as_str() {
                "http" => ProxyProtocol::Http,
                "https" => {
                    if args.len() < 6 {
                        print_usage();
                        return Ok(());
                    }
                    ProxyProtocol::Https {
                        cert_path: args[4].clone(),
                        key_path: args[5].clone(),
                    }
                }
                _ => {
                    print_usage();
                    return Ok(());
                }
            };

            let server = ProxyServer::bind(ProxyConfig {
                listen_addr: args[3].clone(),
                protocol,
                connect_timeout: CONNECT_TIMEOUT,
            })
            .await?;
            server.run().await?;
        }
        _ => print_usage(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        print_usage();
        return Ok(());
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
            Ok(())
        }
        result = run(&args) => {
            if let Err(ref e) = result {
                error!("fatal: {:#}", e);
            }
            result
        }
    }
}
