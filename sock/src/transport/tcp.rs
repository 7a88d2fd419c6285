//! Plain TCP stream transport.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use super::Transport;
use crate::address::{Endpoint, Family};
use crate::error::SockError;

#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to the first address of `endpoint` (within `family`) that
    /// accepts.
    pub fn connect(
        endpoint: &Endpoint,
        family: Family,
        connect_timeout: Option<Duration>,
    ) -> Result<Self, SockError> {
        let stream = connect_stream(endpoint, family, connect_timeout)?;
        Ok(Self { stream })
    }

    /// Adopt an already connected stream, e.g. one returned by `accept`.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

/// Try each resolved address in turn, keeping the last error.
pub(crate) fn connect_stream(
    endpoint: &Endpoint,
    family: Family,
    connect_timeout: Option<Duration>,
) -> Result<TcpStream, SockError> {
    let mut last_err = None;
    for addr in endpoint.resolve(family)? {
        let attempt = match connect_timeout {
            Some(t) if !t.is_zero() => TcpStream::connect_timeout(&addr, t),
            _ => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                log::debug!("[tcp] connected to {} ({})", endpoint, addr);
                return Ok(stream);
            }
            Err(e) => {
                log::debug!("[tcp] connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err
        .map(SockError::from)
        .unwrap_or_else(|| SockError::InvalidAddress(endpoint.to_string())))
}

impl Transport for TcpTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.stream.write_all(data)?;
        Ok(data.len())
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(nonblocking)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_write_timeout(timeout)
    }

    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        self.stream.shutdown(how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}
