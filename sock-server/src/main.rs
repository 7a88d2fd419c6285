//! Entry point for `sock-server`.
//!
//! Runs a line echo service over TCP, or a datagram echo over UDP.

use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use sock::{Family, Sock, SockConfig, SockError, Timeout};
use sock_server::{ServerConfig, TcpServer, UdpServer};

/// Thread-per-connection echo server.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Echo lines back over TCP.
    Tcp(Listen),
    /// Echo datagrams back over UDP.
    Udp(Listen),
}

#[derive(Args)]
struct Listen {
    /// Port to listen on.
    #[arg(short, long)]
    port: u16,

    /// Bind host (default 0.0.0.0, or :: with -6).
    #[arg(long)]
    host: Option<String>,

    /// Listen on IPv6.
    #[arg(short = '6')]
    ipv6: bool,

    /// Maximum concurrent handlers.
    #[arg(long)]
    max_threads: Option<usize>,

    /// Listen backlog (TCP only).
    #[arg(long)]
    backlog: Option<u32>,

    /// Per-line read timeout for TCP clients.
    #[arg(short, long, default_value = "30", allow_hyphen_values = true)]
    timeout: Timeout,
}

impl Listen {
    fn config(&self, base: ServerConfig) -> ServerConfig {
        let mut config = base;
        if self.ipv6 {
            config = config.with_family(Family::V6);
        }
        if let Some(host) = &self.host {
            config = config.with_host(host.clone());
        }
        if let Some(max) = self.max_threads {
            config = config.with_max_threads(max);
        }
        if let Some(backlog) = self.backlog {
            config = config.with_backlog(backlog);
        }
        config
    }
}

fn echo_lines(stream: TcpStream, peer: SocketAddr, timeout: Timeout) {
    let mut conn = Sock::from_tcp_stream(stream, &SockConfig::default().with_timeout(timeout));
    loop {
        let line = match conn.read_line(None) {
            Ok(line) => line,
            Err(SockError::EndOfStream) => break,
            Err(e) => {
                log::info!("{}: {}", peer, e);
                break;
            }
        };
        if let Err(e) = conn.send(&line) {
            log::info!("{}: {}", peer, e);
            break;
        }
    }
    log::debug!("{} disconnected", peer);
}

fn echo_datagram(socket: Arc<UdpSocket>, data: Vec<u8>, peer: SocketAddr) {
    if let Err(e) = socket.send_to(&data, peer) {
        log::warn!("reply to {} failed: {}", peer, e);
    }
}

fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Tcp(listen) => {
            let config = listen.config(ServerConfig::tcp(listen.port));
            let timeout = listen.timeout;
            let server = TcpServer::bind(&config)?;
            server.serve(move |stream, peer| echo_lines(stream, peer, timeout))?;
        }
        Mode::Udp(listen) => {
            let config = listen.config(ServerConfig::udp(listen.port));
            let server = UdpServer::bind(&config)?;
            server.serve(echo_datagram)?;
        }
    }
    Ok(())
}
