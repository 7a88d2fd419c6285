//! In-memory transport that replays a fixed script.
//!
//! Used by tests to drive the reader deterministically: each `recv` consumes
//! the front of the script, so the number and size of fills is exactly known.
//!
//! | Step              | Effect of one `recv`                                 |
//! |-------------------|------------------------------------------------------|
//! | `Data(bytes)`     | Deliver up to `buf.len()` bytes; the rest stays.     |
//! | `Block`           | Nothing arrives during this attempt.                 |
//! | `Error(kind)`     | Fail once with `kind`.                               |
//! | `Close`           | Peer closed; every later `recv` returns `Ok(0)`.     |
//!
//! A `Block` (or an exhausted script) honours the current mode: non-blocking
//! fails at once with `WouldBlock`, a read timeout sleeps for the timeout and
//! then fails with `WouldBlock`. Blocking forever on an empty script would
//! hang the test, so it fails with `ErrorKind::Other` instead.
//!
//! With [`ScriptedTransport::with_send_window`], a non-blocking `send` takes
//! at most that many bytes and then fails with `WouldBlock`, the way a full
//! socket buffer cuts a write short.

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Data(Vec<u8>),
    Block,
    Error(io::ErrorKind),
    Close,
}

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: VecDeque<Step>,
    closed: bool,
    nonblocking: bool,
    read_timeout: Option<Duration>,
    sent: Arc<Mutex<Vec<u8>>>,
    send_window: Option<usize>,
    recv_calls: usize,
    mode_changes: usize,
    shutdowns: Vec<Shutdown>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Script that delivers each chunk in its own `recv`, then closes.
    pub fn chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut steps: Vec<Step> = chunks
            .into_iter()
            .map(|c| Step::Data(c.as_ref().to_vec()))
            .collect();
        steps.push(Step::Close);
        Self::new(steps)
    }

    /// Cut non-blocking sends short after `bytes`.
    pub fn with_send_window(mut self, bytes: usize) -> Self {
        self.send_window = Some(bytes);
        self
    }

    pub fn push(&mut self, step: Step) {
        self.script.push_back(step);
    }

    /// Number of `recv` calls so far.
    pub fn recv_calls(&self) -> usize {
        self.recv_calls
    }

    /// Number of `set_nonblocking` / `set_read_timeout` calls so far.
    pub fn mode_changes(&self) -> usize {
        self.mode_changes
    }

    /// Everything written by `send`.
    pub fn sent(&self) -> Vec<u8> {
        self.sent_log().clone()
    }

    /// Shared view of the send log that outlives moving the transport.
    pub fn send_log(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.sent)
    }

    fn sent_log(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn shutdowns(&self) -> &[Shutdown] {
        &self.shutdowns
    }

    fn nothing_arrived(&self) -> io::Result<usize> {
        if self.nonblocking {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        match self.read_timeout {
            Some(t) => {
                std::thread::sleep(t);
                Err(io::ErrorKind::WouldBlock.into())
            }
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "scripted transport would block forever",
            )),
        }
    }
}

impl Transport for ScriptedTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv_calls += 1;
        if self.closed {
            return Ok(0);
        }
        match self.script.pop_front() {
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.script.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
            Some(Step::Block) | None => self.nothing_arrived(),
            Some(Step::Error(kind)) => Err(kind.into()),
            Some(Step::Close) => {
                self.closed = true;
                Ok(0)
            }
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.send_window {
            Some(window) if self.nonblocking && data.len() > window => {
                self.sent_log().extend_from_slice(&data[..window]);
                Err(io::ErrorKind::WouldBlock.into())
            }
            _ => {
                self.sent_log().extend_from_slice(data);
                Ok(data.len())
            }
        }
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.mode_changes += 1;
        self.nonblocking = nonblocking;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.mode_changes += 1;
        self.read_timeout = timeout;
        Ok(())
    }

    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        self.shutdowns.push(how);
        Ok(())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_split_over_small_buffers() {
        let mut t = ScriptedTransport::chunks(["hello"]);
        let mut buf = [0u8; 3];
        assert_eq!(t.recv(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(t.recv(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(t.recv(&mut buf).unwrap(), 0);
        assert_eq!(t.recv(&mut buf).unwrap(), 0);
        assert_eq!(t.recv_calls(), 4);
    }

    #[test]
    fn block_honours_mode() {
        let mut t = ScriptedTransport::new([Step::Block, Step::Block]);
        let mut buf = [0u8; 8];

        t.set_nonblocking(true).unwrap();
        let err = t.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        t.set_nonblocking(false).unwrap();
        let err = t.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn injected_error_fires_once() {
        let mut t = ScriptedTransport::new([
            Step::Error(io::ErrorKind::Interrupted),
            Step::Data(b"x".to_vec()),
        ]);
        let mut buf = [0u8; 8];
        assert_eq!(
            t.recv(&mut buf).unwrap_err().kind(),
            io::ErrorKind::Interrupted
        );
        assert_eq!(t.recv(&mut buf).unwrap(), 1);
    }

    #[test]
    fn send_window_cuts_nonblocking_writes() {
        let mut t = ScriptedTransport::default().with_send_window(2);
        assert_eq!(t.send(b"abcd").unwrap(), 4);
        t.set_nonblocking(true).unwrap();
        assert_eq!(
            t.send(b"efgh").unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        assert_eq!(t.sent(), b"abcdef");
    }
}
