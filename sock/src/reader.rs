//! Buffered, condition-driven reads over a [`Transport`].
//!
//! Every read is a *condition read*: fill the buffer one transport receive at
//! a time until a predicate over `(buffer, eof)` holds, then split the buffer
//! into the part handed to the caller and the part kept for the next read.
//! Bytes are never lost between calls: a read that fails with
//! [`SockError::TimedOut`] leaves everything it received in the buffer.
//!
//! ```text
//!            fill returns 0           read takes the last byte
//!   Open ─────────────────────▶ Draining ─────────────────────▶ Closed
//! ```

use std::fmt;
use std::io;
use std::net::Shutdown;

use memchr::memmem;
use regex::bytes::Regex;

use crate::config::{SockConfig, DEFAULT_CHUNK_SIZE};
use crate::error::SockError;
use crate::timeout::{Deadline, Timeout};
use crate::transport::{is_would_block, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Peer has not closed.
    Open,
    /// Peer closed; buffered bytes remain.
    Draining,
    /// Peer closed and the buffer is empty.
    Closed,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderState::Open => write!(f, "OPEN"),
            ReaderState::Draining => write!(f, "DRAINING"),
            ReaderState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Result of a pattern read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// Consumed bytes, from the old buffer start through the end of the match.
    pub data: Vec<u8>,
    /// Match bounds within `data`.
    pub start: usize,
    pub end: usize,
}

impl PatternMatch {
    /// The matched bytes alone.
    pub fn matched(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }
}

pub struct BufferedReader<T: Transport> {
    transport: T,
    buf: Vec<u8>,
    eof: bool,
    timeout: Timeout,
    chunk_size: usize,
    /// Mode last pushed to the transport; `None` when unknown.
    applied: Option<Timeout>,
}

impl<T: Transport> fmt::Debug for BufferedReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedReader")
            .field("peer", &self.transport.peer_addr().ok())
            .field("buffered", &self.buf.len())
            .field("state", &self.state())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T: Transport> BufferedReader<T> {
    /// Reader with the default timeout and chunk size.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            buf: Vec::new(),
            eof: false,
            timeout: Timeout::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            applied: None,
        }
    }

    pub fn with_config(transport: T, config: &SockConfig) -> Self {
        let mut reader = Self::new(transport);
        reader.timeout = config.timeout;
        reader.chunk_size = config.chunk_size.max(1);
        reader
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn state(&self) -> ReaderState {
        match (self.eof, self.buf.is_empty()) {
            (false, _) => ReaderState::Open,
            (true, false) => ReaderState::Draining,
            (true, true) => ReaderState::Closed,
        }
    }

    /// Default timeout for reads called with `None`.
    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Timeout) {
        self.timeout = timeout;
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Direct access to the transport. The cached mode is forgotten, so the
    /// next read re-applies its own.
    pub fn get_mut(&mut self) -> &mut T {
        self.applied = None;
        &mut self.transport
    }

    /// Give back the transport. Buffered bytes are discarded.
    pub fn into_inner(self) -> T {
        self.transport
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fill until `pred(buffer, eof)` holds and return the whole buffer
    /// without consuming it.
    pub fn read_cond<F>(&mut self, pred: F, timeout: Option<Timeout>) -> Result<&[u8], SockError>
    where
        F: FnMut(&[u8], bool) -> bool,
    {
        self.wait_until(pred, timeout)?;
        Ok(&self.buf)
    }

    /// Exactly one fill attempt, then hand over the whole buffer.
    ///
    /// Under `NonBlocking` an empty result just means nothing was ready.
    pub fn read_one(&mut self, timeout: Option<Timeout>) -> Result<Vec<u8>, SockError> {
        let timeout = timeout.unwrap_or(self.timeout);
        if self.eof && self.buf.is_empty() {
            return Err(SockError::EndOfStream);
        }
        if !self.eof {
            self.fill_one(timeout)?;
        }
        if self.buf.is_empty() {
            if self.eof || timeout != Timeout::NonBlocking {
                return Err(SockError::EndOfStream);
            }
            return Ok(Vec::new());
        }
        Ok(self.take(self.buf.len()))
    }

    /// Read until the peer closes and return everything.
    pub fn read_all(&mut self, timeout: Option<Timeout>) -> Result<Vec<u8>, SockError> {
        self.wait_until(|_, eof| eof, timeout)?;
        Ok(self.take(self.buf.len()))
    }

    /// Exactly `n` bytes; anything past them stays buffered.
    pub fn read_exact(&mut self, n: usize, timeout: Option<Timeout>) -> Result<Vec<u8>, SockError> {
        self.wait_until(|buf, _| buf.len() >= n, timeout)?;
        Ok(self.take(n))
    }

    /// Everything up to and including the first `delim`.
    pub fn read_until(&mut self, delim: &[u8], timeout: Option<Timeout>) -> Result<Vec<u8>, SockError> {
        let pos = self.wait_for_delim(delim, timeout)?;
        Ok(self.take(pos + delim.len()))
    }

    /// Everything up to and including the first match of `pattern`.
    pub fn read_until_pattern(
        &mut self,
        pattern: &Regex,
        timeout: Option<Timeout>,
    ) -> Result<PatternMatch, SockError> {
        let (start, end) = self.wait_for_pattern(pattern, timeout)?;
        Ok(PatternMatch {
            data: self.take(end),
            start,
            end,
        })
    }

    /// `read_until(b"\n")`.
    pub fn read_line(&mut self, timeout: Option<Timeout>) -> Result<Vec<u8>, SockError> {
        self.read_until(b"\n", timeout)
    }

    /// Drop everything before the first `delim`. The delimiter itself stays
    /// buffered, so the next read starts with it.
    pub fn skip_until(&mut self, delim: &[u8], timeout: Option<Timeout>) -> Result<(), SockError> {
        let pos = self.wait_for_delim(delim, timeout)?;
        self.discard(pos);
        Ok(())
    }

    /// Drop everything before the first match of `pattern` and return a copy
    /// of the match. The match stays buffered.
    pub fn skip_until_pattern(
        &mut self,
        pattern: &Regex,
        timeout: Option<Timeout>,
    ) -> Result<Vec<u8>, SockError> {
        let (start, end) = self.wait_for_pattern(pattern, timeout)?;
        let matched = self.buf[start..end].to_vec();
        self.discard(start);
        Ok(matched)
    }

    fn wait_for_delim(&mut self, delim: &[u8], timeout: Option<Timeout>) -> Result<usize, SockError> {
        let finder = memmem::Finder::new(delim);
        let mut found = None;
        // Bytes before `from` were searched already; only a delimiter split
        // across the old end can start there.
        let mut from = 0;
        self.wait_until(
            |buf, _| {
                found = finder.find(&buf[from..]).map(|at| at + from);
                from = buf.len().saturating_sub(delim.len().saturating_sub(1));
                found.is_some()
            },
            timeout,
        )?;
        found.ok_or(SockError::TimedOut)
    }

    fn wait_for_pattern(
        &mut self,
        pattern: &Regex,
        timeout: Option<Timeout>,
    ) -> Result<(usize, usize), SockError> {
        let mut found = None;
        self.wait_until(
            |buf, _| {
                found = pattern.find(buf).map(|m| (m.start(), m.end()));
                found.is_some()
            },
            timeout,
        )?;
        found.ok_or(SockError::TimedOut)
    }

    /// The condition-read loop.
    ///
    /// A bounded budget is measured once from the start of the call; each
    /// fill only gets what is left of it.
    fn wait_until<F>(&mut self, mut pred: F, timeout: Option<Timeout>) -> Result<(), SockError>
    where
        F: FnMut(&[u8], bool) -> bool,
    {
        let timeout = timeout.unwrap_or(self.timeout);
        if self.eof && self.buf.is_empty() {
            return Err(SockError::EndOfStream);
        }
        if pred(&self.buf, self.eof) {
            return Ok(());
        }
        if self.eof {
            return Err(SockError::EndOfStream);
        }

        let deadline = Deadline::start(timeout);
        loop {
            let attempt = deadline.next_attempt().ok_or(SockError::TimedOut)?;
            self.fill_one(attempt)?;
            if pred(&self.buf, self.eof) {
                return Ok(());
            }
            if self.eof {
                return Err(SockError::EndOfStream);
            }
            if timeout == Timeout::NonBlocking {
                return Err(SockError::TimedOut);
            }
        }
    }

    /// One transport receive appended to the buffer. Returns the number of
    /// new bytes; zero either means nothing was ready (non-blocking) or the
    /// peer closed (`eof` is set).
    fn fill_one(&mut self, timeout: Timeout) -> Result<usize, SockError> {
        self.apply_mode(timeout)?;

        let old_len = self.buf.len();
        self.buf.resize(old_len + self.chunk_size, 0);
        let result = loop {
            match self.transport.recv(&mut self.buf[old_len..]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    if timeout == Timeout::NonBlocking {
                        break Ok(0);
                    }
                }
                other => break other,
            }
        };
        self.buf.truncate(old_len + *result.as_ref().unwrap_or(&0));

        match result {
            Ok(0) => {
                log::debug!("[reader] peer closed, {} bytes left ({})", self.buf.len(), timeout);
                self.eof = true;
                Ok(0)
            }
            Ok(n) => {
                log::debug!("[reader] fill {} bytes ({})", n, timeout);
                Ok(n)
            }
            Err(e) if is_would_block(&e) => match timeout {
                Timeout::NonBlocking => Ok(0),
                _ => Err(SockError::TimedOut),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Push `timeout` to the transport, skipping calls that would not change
    /// its state.
    fn apply_mode(&mut self, timeout: Timeout) -> io::Result<()> {
        if self.applied == Some(timeout) {
            return Ok(());
        }
        match (self.applied, timeout) {
            // Already blocking; only the deadline moves.
            (
                Some(Timeout::Blocking | Timeout::Bounded(_)),
                Timeout::Blocking | Timeout::Bounded(_),
            ) => self.transport.set_read_timeout(timeout.as_deadline())?,
            _ => self.transport.apply_timeout(timeout)?,
        }
        self.applied = Some(timeout);
        Ok(())
    }

    /// Remove and return the first `n` bytes.
    fn take(&mut self, n: usize) -> Vec<u8> {
        let rest = self.buf.split_off(n);
        let taken = std::mem::replace(&mut self.buf, rest);
        if self.eof && self.buf.is_empty() {
            log::debug!("[reader] drained, state {}", ReaderState::Closed);
        }
        taken
    }

    fn discard(&mut self, n: usize) {
        self.buf.drain(..n);
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Send all of `data`, switching the transport back to blocking mode
    /// first if a non-blocking read left it otherwise.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, SockError> {
        if self.applied == Some(Timeout::NonBlocking) {
            self.transport.set_nonblocking(false)?;
            self.applied = None;
        }
        Ok(self.transport.send(data)?)
    }

    pub fn shutdown_write(&mut self) -> Result<(), SockError> {
        Ok(self.transport.shutdown(Shutdown::Write)?)
    }

    pub fn shutdown_read(&mut self) -> Result<(), SockError> {
        Ok(self.transport.shutdown(Shutdown::Read)?)
    }
}

impl<T: Transport> io::Write for BufferedReader<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf).map_err(|e| match e {
            SockError::Io(e) => e,
            SockError::TimedOut => io::ErrorKind::TimedOut.into(),
            other => io::Error::new(io::ErrorKind::Other, other),
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
