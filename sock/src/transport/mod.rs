//! Byte transports underneath a [`crate::reader::BufferedReader`].
//!
//! A [`Transport`] owns exactly one connection and only moves bytes; all
//! buffering and timeout policy lives in the reader. Four implementations
//! exist, picked by [`crate::config::TransportKind`] at construction time:
//!
//! - [`tcp::TcpTransport`]: plain stream socket
//! - [`udp::UdpTransport`]: datagram socket talking to one peer
//! - [`tls::TlsTransport`]: rustls over TCP, handshake on connect
//! - [`websocket::WebSocketTransport`]: RFC 6455 frames flattened to bytes
//!
//! [`scripted::ScriptedTransport`] is an in-memory stand-in for tests.
//!
//! Closing is `Drop`: every transport releases its socket when it goes out
//! of scope.

pub mod scripted;
pub mod tcp;
pub mod tls;
pub mod udp;
pub mod websocket;

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};

use crate::timeout::Timeout;

pub use scripted::ScriptedTransport;
pub use tcp::TcpTransport;
pub use tls::TlsTransport;
pub use udp::UdpTransport;
pub use websocket::WebSocketTransport;

pub trait Transport {
    /// Receive up to `buf.len()` bytes. `Ok(0)` means the peer closed.
    ///
    /// In non-blocking mode a lack of data is `ErrorKind::WouldBlock`; with a
    /// read timeout set, expiry is `WouldBlock` or `TimedOut` depending on
    /// the platform.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send all of `data`, returning its length.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;

    /// Receive deadline, `None` to block forever. Never called with zero.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self, _how: Shutdown) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "shutdown not supported by this transport",
        ))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Put the transport into the mode a fill attempt under `timeout` needs.
    fn apply_timeout(&mut self, timeout: Timeout) -> io::Result<()> {
        match timeout {
            Timeout::NonBlocking => self.set_nonblocking(true),
            Timeout::Blocking => {
                self.set_nonblocking(false)?;
                self.set_read_timeout(None)
            }
            Timeout::Bounded(d) => {
                self.set_nonblocking(false)?;
                self.set_read_timeout(Some(d))
            }
        }
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).send(data)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        (**self).set_nonblocking(nonblocking)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_write_timeout(timeout)
    }

    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        (**self).shutdown(how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        (**self).peer_addr()
    }

    fn apply_timeout(&mut self, timeout: Timeout) -> io::Result<()> {
        (**self).apply_timeout(timeout)
    }
}

/// Would-block style errors: the attempt produced nothing but the
/// connection is fine.
pub(crate) fn is_would_block(e: &io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        || (cfg!(target_os = "macos") && e.raw_os_error() == Some(35)) // EAGAIN
}

/// Read limit of one `recv` that may touch the socket more than once.
///
/// The socket's own read timeout covers a single read. Transports that loop
/// (dropping stray datagrams, reassembling records or frames) narrow it to
/// what is left before every further read, then put it back.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RecvBudget {
    timeout: Option<Duration>,
    nonblocking: bool,
    narrowed: bool,
}

impl RecvBudget {
    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
        self.narrowed = false;
    }

    pub(crate) fn set_nonblocking(&mut self, nonblocking: bool) {
        self.nonblocking = nonblocking;
    }

    pub(crate) fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    /// Timeout to install before a further read of a `recv` begun at
    /// `started`. `Ok(None)` leaves the socket alone; a spent budget is
    /// `WouldBlock`.
    pub(crate) fn narrow(&mut self, started: Instant) -> io::Result<Option<Duration>> {
        let Some(full) = self.timeout.filter(|_| !self.nonblocking) else {
            return Ok(None);
        };
        let left = full.saturating_sub(started.elapsed());
        if left.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "read timeout spent",
            ));
        }
        self.narrowed = true;
        Ok(Some(left))
    }

    /// The configured timeout, if a narrowed one must be put back.
    pub(crate) fn restore(&mut self) -> Option<Option<Duration>> {
        if !std::mem::take(&mut self.narrowed) {
            return None;
        }
        Some(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_narrows_then_runs_out() {
        let mut budget = RecvBudget::default();
        budget.set_timeout(Some(Duration::from_millis(50)));
        let started = Instant::now();
        let left = budget.narrow(started).unwrap().unwrap();
        assert!(left <= Duration::from_millis(50));

        std::thread::sleep(Duration::from_millis(60));
        let err = budget.narrow(started).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(budget.restore(), Some(Some(Duration::from_millis(50))));
        assert_eq!(budget.restore(), None);
    }

    #[test]
    fn budget_leaves_blocking_and_nonblocking_alone() {
        let mut budget = RecvBudget::default();
        assert_eq!(budget.narrow(Instant::now()).unwrap(), None);

        budget.set_timeout(Some(Duration::from_millis(50)));
        budget.set_nonblocking(true);
        assert_eq!(budget.narrow(Instant::now()).unwrap(), None);
        assert_eq!(budget.restore(), None);
    }
}
