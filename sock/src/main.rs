//! Entry point for the `sock` client.
//!
//! Connects, optionally sends one message, performs one read and writes the
//! bytes to stdout. Set `RUST_LOG=debug` to watch individual fills.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use sock::{Family, Sock, SockConfig, Timeout, TlsOptions, Transport, TransportKind};

/// Netcat-style client for buffered socket reads.
#[derive(Parser)]
#[command(author, version, about)]
#[command(group(ArgGroup::new("transport").args(["udp", "tls", "ws"])))]
#[command(group(ArgGroup::new("read").args(["line", "until", "nbytes", "all"])))]
struct Cli {
    /// Host, `host:port`, `[v6]:port`, or a `ws://` / `wss://` URL with --ws.
    addr: String,

    /// Port, if not embedded in ADDR.
    port: Option<u16>,

    /// Use UDP.
    #[arg(long)]
    udp: bool,

    /// Use TLS over TCP.
    #[arg(long)]
    tls: bool,

    /// WebSocket upgrade on PATH (ADDR may also be a full URL).
    #[arg(long, value_name = "PATH")]
    ws: Option<String>,

    /// Run WebSocket over TLS.
    #[arg(long, requires = "ws")]
    secure: bool,

    /// PEM file with CA certificates for TLS.
    #[arg(long, value_name = "FILE")]
    ca_file: Option<PathBuf>,

    /// Only use IPv6 addresses.
    #[arg(short = '6')]
    ipv6: bool,

    /// Only use IPv4 addresses.
    #[arg(short = '4', conflicts_with = "ipv6")]
    ipv4: bool,

    /// Read timeout: seconds, `250ms`, `forever` or `0` for non-blocking.
    #[arg(short, long, default_value = "5", allow_hyphen_values = true)]
    timeout: Timeout,

    /// Text to send after connecting; `\n`, `\r` and `\t` are unescaped.
    #[arg(short, long)]
    send: Option<String>,

    /// Read one line.
    #[arg(long)]
    line: bool,

    /// Read through the first occurrence of DELIM.
    #[arg(long, value_name = "DELIM")]
    until: Option<String>,

    /// Read exactly N bytes.
    #[arg(long, value_name = "N")]
    nbytes: Option<usize>,

    /// Read until the peer closes (default).
    #[arg(long)]
    all: bool,
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let family = if cli.ipv6 {
        Family::V6
    } else if cli.ipv4 {
        Family::V4
    } else {
        Family::Any
    };
    let mut config = SockConfig::default()
        .with_family(family)
        .with_timeout(cli.timeout);
    if let Some(path) = &cli.ca_file {
        config = config.with_tls(TlsOptions::with_ca_file(path));
    }

    let mut conn = if cli.addr.starts_with("ws://") || cli.addr.starts_with("wss://") {
        Sock::websocket(&cli.addr, config)
    } else {
        let kind = if cli.udp {
            TransportKind::Udp
        } else if cli.tls {
            TransportKind::Tls
        } else if let Some(path) = &cli.ws {
            TransportKind::WebSocket {
                path: path.clone(),
                secure: cli.secure,
            }
        } else {
            TransportKind::Tcp
        };
        let endpoint = sock::parse_addr(cli.addr.as_str(), cli.port)?;
        Sock::connect_endpoint(&endpoint, config.with_kind(kind))
    }
    .with_context(|| format!("connecting to {}", cli.addr))?;

    log::info!("Connected to {:?}", conn.get_ref().peer_addr().ok());

    if let Some(text) = &cli.send {
        conn.send(unescape(text).as_bytes()).context("sending")?;
    }

    let data = if cli.line {
        conn.read_line(None)
    } else if let Some(delim) = &cli.until {
        conn.read_until(unescape(delim).as_bytes(), None)
    } else if let Some(n) = cli.nbytes {
        conn.read_exact(n, None)
    } else {
        conn.read_all(None)
    }
    .context("reading")?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}
