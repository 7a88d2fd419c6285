//! Thread-per-connection TCP accept loop.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::throttle::WorkerGauge;

/// Accept errors that only concern the one connection being accepted.
fn is_transient_accept_error(e: &io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
    )
}

#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    gauge: WorkerGauge,
}

impl TcpServer {
    /// Bind with `SO_REUSEADDR` and start listening with the configured
    /// backlog.
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
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
        socket.listen(backlog).map_err(bind_err)?;

        Ok(Self {
            listener: socket.into(),
            gauge: WorkerGauge::new(config.max_threads, config.throttle_interval),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn live_workers(&self) -> usize {
        self.gauge.live()
    }

    /// Accept forever, running `handler(stream, peer)` on its own thread for
    /// every connection.
    ///
    /// While `max_threads` workers are live, `accept` is not called at all;
    /// new connections wait in the kernel backlog. Returns only on a
    /// listener-level error.
    pub fn serve<H>(&self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        log::info!("Started TCP server on {}", self.local_addr()?);
        loop {
            self.gauge.wait_for_slot();
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if is_transient_accept_error(&e) => {
                    log::warn!("accept failed: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            log::info!("Connect from {}", peer);

            let handler = Arc::clone(&handler);
            self.gauge
                .spawn("sock-tcp-worker", move || handler(stream, peer))?;
        }
    }
}
