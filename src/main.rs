//! Hive keeps a CNAME rendezvous zone in sync across DNS sites: it transfers
//! each site's local zone, maps reachable addresses into rendezvous names,
//! and republishes the merged result — while also answering as the peer
//! server other Hive nodes transfer from and send updates to.
//!
//! Usage:
//!
//!   hive --config /etc/hive/config.json --key /etc/hive/key.json

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use domain::net::server::buf::VecBufSource;
use domain::net::server::dgram::DgramServer;
use domain::net::server::stream::StreamServer;
use tokio::net::{TcpListener, UdpSocket};

use crate::config::Config;
use crate::key::{KeyStore, TsigKey};
use crate::metric::Stats;
use crate::reconcile::Hive;
use crate::server::PeerServer;

mod client;
mod config;
mod error;
mod key;
mod logger;
mod merge;
mod metric;
mod reconcile;
mod server;
mod transpose;
mod zone;

#[derive(Parser)]
#[command(name = "hive", about = "DNS rendezvous synchronizer")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the TSIG key file.
    #[arg(long)]
    key: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log a periodic metrics report.
    #[arg(long, default_value_t = true)]
    metrics: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (Some(config_path), Some(key_path)) = (cli.config.as_ref(), cli.key.as_ref()) else {
        // Both flags are required in spirit, but a missing flag is a usage
        // question, not an error: print help and exit cleanly.
        Cli::command().print_help().ok();
        println!();
        exit(0);
    };

    let level = cli.log_level.parse().unwrap_or(log::LevelFilter::Info);
    logger::Logger::new()
        .with_level(level)
        .with_metrics(cli.metrics)
        .init()
        .expect("failed to initialize logger");

    let config = match Config::load(config_path) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("failed to load config file at {}: {}", config_path.display(), e);
            exit(1);
        }
    };

    let key = match TsigKey::load(key_path) {
        Ok(k) => Arc::new(k),
        Err(e) => {
            eprintln!("failed to load key file at {}: {}", key_path.display(), e);
            exit(1);
        }
    };

    let hive = Hive::new(config.clone(), key.clone());
    if let Err(e) = hive.start().await {
        eprintln!("startup zone transfer failed: {}", e);
        exit(1);
    }

    let keystore = Arc::new(KeyStore::new(key.key.clone()));
    let stats = Stats::new_shared();
    let peer_server = PeerServer::new(keystore, Arc::new(hive), stats.clone(), config.ttl);

    let addr = std::net::SocketAddr::new(config.bind_address, 53);

    let sock = match UdpSocket::bind(addr).await {
        Ok(sock) => Arc::new(sock),
        Err(e) => {
            eprintln!("failed to bind udp socket on {}: {}", addr, e);
            exit(1);
        }
    };
    let num_cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    for _ in 0..num_cores {
        let udp_srv = DgramServer::new(sock.clone(), VecBufSource, peer_server.clone());
        tokio::spawn(async move { udp_srv.run().await });
    }

    let tcp_sock = match TcpListener::bind(addr).await {
        Ok(sock) => sock,
        Err(e) => {
            eprintln!("failed to bind tcp socket on {}: {}", addr, e);
            exit(1);
        }
    };
    let tcp_srv = StreamServer::new(tcp_sock, VecBufSource, peer_server.clone());
    tokio::spawn(async move { tcp_srv.run().await });

    tokio::spawn(metric::log_svc(stats));

    log::info!(target: "main", "hive listening on {}", addr);
    std::future::pending::<()>().await;
}
