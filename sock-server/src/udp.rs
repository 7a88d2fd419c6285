//! Thread-per-datagram UDP loop.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::{ServerConfig, MAX_DATAGRAM};
use crate::error::ServerError;
use crate::throttle::WorkerGauge;

#[derive(Debug)]
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    gauge: WorkerGauge,
}

impl UdpServer {
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let addr = config.bind_addr()?;
        let bind_err = |source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        };

        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;

        Ok(Self {
            socket: Arc::new(socket.into()),
            gauge: WorkerGauge::new(config.max_threads, config.throttle_interval),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn live_workers(&self) -> usize {
        self.gauge.live()
    }

    /// Receive forever, running `handler(socket, datagram, peer)` on its own
    /// thread for every datagram. Replies go out through the shared socket.
    ///
    /// A datagram received while `max_threads` workers are live is held
    /// until a slot frees up; it is delayed, never dropped.
    pub fn serve<H>(&self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Arc<UdpSocket>, Vec<u8>, SocketAddr) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let mut buf = vec![0u8; MAX_DATAGRAM];
        log::info!("Started UDP server on {}", self.local_addr()?);
        loop {
            let (n, peer) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                // ICMP port-unreachable from an earlier reply surfaces here
                // on some platforms.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    log::warn!("recv failed: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            log::info!("Datagram of {} bytes from {}", n, peer);

            self.gauge.wait_for_slot();
            let handler = Arc::clone(&handler);
            let socket = Arc::clone(&self.socket);
            let data = buf[..n].to_vec();
            self.gauge
                .spawn("sock-udp-worker", move || handler(socket, data, peer))?;
        }
    }
}
