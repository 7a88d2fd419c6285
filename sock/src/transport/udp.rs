//! UDP transport bound to a single peer.
//!
//! The socket is left unconnected so that stray datagrams are visible: any
//! datagram whose source is not the peer is dropped, logged at `warn` and
//! counted in [`UdpTransport::dropped_datagrams`]. Datagrams are exposed as
//! one flat byte stream; a datagram larger than the caller's buffer is kept
//! whole and handed out over several `recv` calls.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use super::{RecvBudget, Transport};
use crate::address::{Endpoint, Family};
use crate::error::SockError;

/// Largest possible UDP payload.
const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    /// Tail of a datagram that did not fit the last `recv` buffer.
    pending: Vec<u8>,
    scratch: Vec<u8>,
    dropped: u64,
    budget: RecvBudget,
}

impl UdpTransport {
    /// Bind an ephemeral local port of the peer's family.
    pub fn connect(endpoint: &Endpoint, family: Family) -> Result<Self, SockError> {
        let peer = endpoint.resolve(family)?[0];
        let local: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let socket = UdpSocket::bind(local)?;
        log::debug!(
            "[udp] bound {} for peer {}",
            socket.local_addr()?,
            peer
        );
        Ok(Self::from_socket(socket, peer))
    }

    /// Wrap an existing socket, e.g. a server socket answering `peer`.
    pub fn from_socket(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            pending: Vec::new(),
            scratch: vec![0u8; MAX_DATAGRAM],
            dropped: 0,
            budget: RecvBudget::default(),
        }
    }

    /// Datagrams discarded because they came from another address.
    pub fn dropped_datagrams(&self) -> u64 {
        self.dropped
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }

    /// Next datagram from the peer, within one read timeout in total.
    fn recv_from_peer(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let started = Instant::now();
        loop {
            let (n, from) = self.socket.recv_from(&mut self.scratch)?;
            if from != self.peer {
                self.dropped += 1;
                log::warn!(
                    "[udp] dropped {} byte datagram from {} (peer is {})",
                    n,
                    from,
                    self.peer
                );
                self.narrow_timeout(started)?;
                continue;
            }
            // UDP has no orderly close; an empty datagram must not read as EOF.
            if n == 0 {
                self.narrow_timeout(started)?;
                continue;
            }
            self.pending.extend_from_slice(&self.scratch[..n]);
            return Ok(self.take_pending(buf));
        }
    }

    fn narrow_timeout(&mut self, started: Instant) -> io::Result<()> {
        if let Some(left) = self.budget.narrow(started)? {
            self.socket.set_read_timeout(Some(left))?;
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.pending.is_empty() {
            return Ok(self.take_pending(buf));
        }

        let result = self.recv_from_peer(buf);
        if let Some(timeout) = self.budget.restore() {
            self.socket.set_read_timeout(timeout)?;
        }
        result
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let sent = self.socket.send_to(data, self.peer)?;
        if sent != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("datagram truncated: sent {} of {} bytes", sent, data.len()),
            ));
        }
        Ok(sent)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.socket.set_nonblocking(nonblocking)?;
        self.budget.set_nonblocking(nonblocking);
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)?;
        self.budget.set_timeout(timeout);
        Ok(())
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_write_timeout(timeout)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (UdpTransport, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let local = UdpSocket::bind("127.0.0.1:0").unwrap();
        let transport = UdpTransport::from_socket(local, peer.local_addr().unwrap());
        (transport, peer)
    }

    #[test]
    fn large_datagram_split_across_reads() {
        let (mut transport, peer) = pair();
        let target = transport.local_addr().unwrap();
        peer.send_to(b"0123456789", target).unwrap();

        transport
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(transport.recv(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(transport.recv(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"4567");
        assert_eq!(transport.recv(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
    }

    #[test]
    fn send_goes_to_peer() {
        let (mut transport, peer) = pair();
        transport.send(b"ping").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, transport.local_addr().unwrap());
    }

    #[test]
    fn stray_datagrams_do_not_extend_read_timeout() {
        let (mut transport, _peer) = pair();
        let target = transport.local_addr().unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").unwrap();
        let noise = std::thread::spawn(move || {
            for _ in 0..20 {
                let _ = stranger.send_to(b"x", target);
                std::thread::sleep(Duration::from_millis(30));
            }
        });

        transport
            .set_read_timeout(Some(Duration::from_millis(150)))
            .unwrap();
        let started = Instant::now();
        let err = transport.recv(&mut [0u8; 16]).unwrap_err();
        let elapsed = started.elapsed();
        noise.join().unwrap();

        assert!(crate::transport::is_would_block(&err), "{:?}", err);
        assert!(elapsed < Duration::from_millis(400), "took {:?}", elapsed);
        assert!(transport.dropped_datagrams() > 0);
    }
}
