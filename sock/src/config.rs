//! Connection configuration.

use std::time::Duration;

use crate::address::Family;
use crate::timeout::Timeout;
use crate::transport::tls::TlsOptions;

/// Bytes requested from the transport per fill attempt.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Which transport a [`crate::Sock`] is built on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Tcp,
    Udp,
    Tls,
    /// WebSocket upgrade on `path`; `secure` runs it over TLS (`wss://`).
    WebSocket { path: String, secure: bool },
}

#[derive(Debug, Clone)]
pub struct SockConfig {
    pub kind: TransportKind,
    pub family: Family,
    /// Default for reads that do not pass their own timeout.
    pub timeout: Timeout,
    /// Bounds connect and the TLS / WebSocket handshakes. `None` waits for
    /// the OS.
    pub connect_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub chunk_size: usize,
    pub tls: TlsOptions,
}

impl Default for SockConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Tcp,
            family: Family::Any,
            timeout: Timeout::default(),
            connect_timeout: Some(crate::timeout::DEFAULT_TIMEOUT),
            write_timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            tls: TlsOptions::default(),
        }
    }
}

impl SockConfig {
    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_family(mut self, family: Family) -> Self {
        self.family = family;
        self
    }

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Zero is treated as one byte.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }
}
