//! Connection constructors for the type-erased [`Sock`].

use std::net::{SocketAddr, TcpStream, UdpSocket};

use crate::address::{parse_addr, Addr, Endpoint};
use crate::config::{SockConfig, TransportKind};
use crate::error::SockError;
use crate::reader::BufferedReader;
use crate::transport::websocket::WsUrl;
use crate::transport::{
    TcpTransport, TlsTransport, Transport, UdpTransport, WebSocketTransport,
};

/// A buffered reader over whichever transport the configuration picked.
pub type Sock = BufferedReader<Box<dyn Transport + Send>>;

impl Sock {
    /// Connect to `addr` with the transport named by `config.kind`.
    ///
    /// `addr` takes every spelling [`parse_addr`] accepts; a port embedded in
    /// the string is used when no pair is given.
    pub fn connect(addr: impl Into<Addr>, config: SockConfig) -> Result<Self, SockError> {
        let endpoint = parse_addr(addr, None)?;
        Self::connect_endpoint(&endpoint, config)
    }

    pub fn connect_endpoint(endpoint: &Endpoint, config: SockConfig) -> Result<Self, SockError> {
        log::debug!("[sock] connecting {:?} to {}", config.kind, endpoint);
        let mut transport: Box<dyn Transport + Send> = match &config.kind {
            TransportKind::Tcp => Box::new(TcpTransport::connect(
                endpoint,
                config.family,
                config.connect_timeout,
            )?),
            TransportKind::Udp => Box::new(UdpTransport::connect(endpoint, config.family)?),
            TransportKind::Tls => Box::new(TlsTransport::connect(
                endpoint,
                config.family,
                config.connect_timeout,
                &config.tls,
            )?),
            TransportKind::WebSocket { path, secure } => {
                let url = WsUrl {
                    host: endpoint.host.clone(),
                    port: endpoint.port,
                    path: path.clone(),
                    secure: *secure,
                };
                Box::new(Self::websocket_transport(&url, &config)?)
            }
        };
        if config.write_timeout.is_some() {
            transport.set_write_timeout(config.write_timeout)?;
        }
        Ok(BufferedReader::with_config(transport, &config))
    }

    pub fn tcp(addr: impl Into<Addr>, port: Option<u16>) -> Result<Self, SockError> {
        let endpoint = parse_addr(addr, port)?;
        Self::connect_endpoint(&endpoint, SockConfig::default())
    }

    pub fn udp(addr: impl Into<Addr>, port: Option<u16>) -> Result<Self, SockError> {
        let endpoint = parse_addr(addr, port)?;
        Self::connect_endpoint(
            &endpoint,
            SockConfig::default().with_kind(TransportKind::Udp),
        )
    }

    pub fn tls(addr: impl Into<Addr>, port: Option<u16>) -> Result<Self, SockError> {
        let endpoint = parse_addr(addr, port)?;
        Self::connect_endpoint(
            &endpoint,
            SockConfig::default().with_kind(TransportKind::Tls),
        )
    }

    /// Connect to a `ws://` or `wss://` URL.
    pub fn websocket(url: &str, config: SockConfig) -> Result<Self, SockError> {
        let url = WsUrl::parse(url)?;
        let endpoint = Endpoint::new(url.host.clone(), url.port);
        let config = config.with_kind(TransportKind::WebSocket {
            path: url.path,
            secure: url.secure,
        });
        Self::connect_endpoint(&endpoint, config)
    }

    fn websocket_transport(url: &WsUrl, config: &SockConfig) -> Result<WebSocketTransport, SockError> {
        let endpoint = Endpoint::new(url.host.clone(), url.port);
        let inner: Box<dyn Transport + Send> = if url.secure {
            Box::new(TlsTransport::connect(
                &endpoint,
                config.family,
                config.connect_timeout,
                &config.tls,
            )?)
        } else {
            Box::new(TcpTransport::connect(
                &endpoint,
                config.family,
                config.connect_timeout,
            )?)
        };
        WebSocketTransport::handshake(inner, url, config.connect_timeout)
    }

    /// Wrap a connected stream, e.g. one handed out by an accept loop.
    pub fn from_tcp_stream(stream: TcpStream, config: &SockConfig) -> Self {
        Self::with_config(Box::new(TcpTransport::from_stream(stream)), config)
    }

    /// Wrap a datagram socket that talks to `peer`.
    pub fn from_udp_socket(socket: UdpSocket, peer: SocketAddr, config: &SockConfig) -> Self {
        Self::with_config(Box::new(UdpTransport::from_socket(socket, peer)), config)
    }
}
