//! WebSocket client transport (RFC 6455).
//!
//! Frames are invisible to the reader: payloads of text, binary and
//! continuation frames are appended to an internal byte queue that
//! [`Transport::recv`] drains. Control frames are handled here:
//! - ping → pong with the same payload
//! - pong → ignored
//! - close → echoed once, then the stream reads as closed
//!
//! Outgoing data is sent as masked binary frames.
//!
//! # Frame layout (RFC 6455 §5.2)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |                     Masking-key, if MASK set                  |
//! +---------------------------------------------------------------+
//! |                          Payload Data                         |
//! +---------------------------------------------------------------+
//! ```

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};

use base64::Engine;
use rand::Rng;
use sha1::{Digest, Sha1};

use super::{RecvBudget, Transport};
use crate::address::parse_addr;
use crate::error::SockError;

/// RFC 6455 GUID for Sec-WebSocket-Accept calculation.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest frame payload accepted from the peer.
pub const MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

/// Upper bound on the HTTP upgrade response head.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

const READ_CHUNK: usize = 4096;

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Sec-WebSocket-Accept value for a client key.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

fn generate_client_key() -> String {
    let key: [u8; 16] = rand::thread_rng().gen();
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Parsed `ws://` / `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
}

impl WsUrl {
    pub fn parse(url: &str) -> Result<Self, SockError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| SockError::InvalidAddress(format!("missing scheme: {}", url)))?;
        let secure = match scheme.to_ascii_lowercase().as_str() {
            "ws" => false,
            "wss" => true,
            other => {
                return Err(SockError::InvalidAddress(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        };
        let default_port = if secure { 443 } else { 80 };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        // `[::1]` and `example.com` carry no port; anything else goes through
        // the regular address parser.
        let has_port = if authority.starts_with('[') {
            !authority.ends_with(']')
        } else {
            authority.contains(':')
        };
        let endpoint = if has_port {
            parse_addr(authority, None)?
        } else {
            parse_addr((authority, default_port), None)?
        };

        Ok(Self {
            host: endpoint.host,
            port: endpoint.port,
            path: path.to_string(),
            secure,
        })
    }

    /// Value for the `Host` header.
    pub fn host_header(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == default_port {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

fn build_request(host: &str, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

/// Validate the server's upgrade response head (without the final blank line).
fn check_response(head: &str, key: &str) -> Result<(), SockError> {
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let status = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(SockError::Handshake(format!(
            "bad status line: {}",
            status_line
        )));
    }
    if status != "101" {
        return Err(SockError::Handshake(format!(
            "server refused upgrade: {}",
            status_line
        )));
    }

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let upgrade = headers.get("upgrade").map(String::as_str).unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(SockError::Handshake(format!(
            "bad Upgrade header: {:?}",
            upgrade
        )));
    }
    let expected = compute_accept_key(key);
    match headers.get("sec-websocket-accept") {
        Some(actual) if *actual == expected => Ok(()),
        Some(actual) => Err(SockError::Handshake(format!(
            "Sec-WebSocket-Accept mismatch: expected {}, got {}",
            expected, actual
        ))),
        None => Err(SockError::Handshake(
            "missing Sec-WebSocket-Accept header".into(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            _ => return None,
        })
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, b) in payload.iter_mut().enumerate() {
        *b ^= key[i % 4];
    }
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// Serialise, masking the payload when `mask` is given.
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(len + 14);
        out.push(((self.fin as u8) << 7) | self.opcode as u8);

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        if len <= 125 {
            out.push(mask_bit | len as u8);
        } else if len <= 0xFFFF {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match mask {
            Some(key) => {
                out.extend_from_slice(&key);
                let start = out.len();
                out.extend_from_slice(&self.payload);
                apply_mask(&mut out[start..], key);
            }
            None => out.extend_from_slice(&self.payload),
        }
        out
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` while the frame is incomplete, otherwise the frame
    /// and the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> io::Result<Option<(Frame, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let fin = buf[0] & 0x80 != 0;
        if buf[0] & 0x70 != 0 {
            return Err(invalid("reserved bits set without extension"));
        }
        let opcode = Opcode::from_u8(buf[0] & 0x0F)
            .ok_or_else(|| invalid(format!("invalid opcode {:#x}", buf[0] & 0x0F)))?;
        let masked = buf[1] & 0x80 != 0;
        let len7 = buf[1] & 0x7F;

        let mut pos = 2;
        let len: u64 = match len7 {
            126 => {
                if buf.len() < pos + 2 {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as u64;
                pos += 2;
                len
            }
            127 => {
                if buf.len() < pos + 8 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[pos..pos + 8]);
                pos += 8;
                u64::from_be_bytes(raw)
            }
            n => n as u64,
        };

        if opcode.is_control() && (len > 125 || !fin) {
            return Err(invalid("control frame too large or fragmented"));
        }
        if len > MAX_PAYLOAD {
            return Err(invalid(format!("frame payload of {} bytes too large", len)));
        }

        let mask = if masked {
            if buf.len() < pos + 4 {
                return Ok(None);
            }
            let key = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
            pos += 4;
            Some(key)
        } else {
            None
        };

        let len = len as usize;
        if buf.len() < pos + len {
            return Ok(None);
        }
        let mut payload = buf[pos..pos + len].to_vec();
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }
        Ok(Some((
            Frame {
                fin,
                opcode,
                payload,
            },
            pos + len,
        )))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// WebSocket client over any byte transport (TCP for `ws://`, TLS for
/// `wss://`).
pub struct WebSocketTransport {
    inner: Box<dyn Transport + Send>,
    /// Raw bytes not yet parsed into frames.
    pending: Vec<u8>,
    /// Application payload ready for `recv`.
    ready: Vec<u8>,
    close_received: bool,
    close_sent: bool,
    budget: RecvBudget,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("peer", &self.inner.peer_addr().ok())
            .field("pending", &self.pending.len())
            .field("ready", &self.ready.len())
            .field("close_received", &self.close_received)
            .field("close_sent", &self.close_sent)
            .finish()
    }
}

impl WebSocketTransport {
    /// Perform the client upgrade handshake over `inner`.
    ///
    /// `timeout` bounds each read of the upgrade response; `None` blocks.
    pub fn handshake(
        mut inner: Box<dyn Transport + Send>,
        url: &WsUrl,
        timeout: Option<Duration>,
    ) -> Result<Self, SockError> {
        let key = generate_client_key();
        let request = build_request(&url.host_header(), &url.path, &key);
        inner.set_nonblocking(false)?;
        inner.send(request.as_bytes())?;

        inner.set_read_timeout(timeout.filter(|t| !t.is_zero()))?;
        let mut received = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let head_end = loop {
            if let Some(pos) = memchr::memmem::find(&received, b"\r\n\r\n") {
                break pos;
            }
            if received.len() > MAX_RESPONSE_HEAD {
                return Err(SockError::Handshake("upgrade response too large".into()));
            }
            let n = match inner.recv(&mut chunk) {
                Ok(n) => n,
                Err(e) if super::is_would_block(&e) => return Err(SockError::TimedOut),
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Err(SockError::Handshake(
                    "connection closed during upgrade".into(),
                ));
            }
            received.extend_from_slice(&chunk[..n]);
        };

        let head = String::from_utf8_lossy(&received[..head_end]).into_owned();
        check_response(&head, &key)?;
        log::debug!("[ws] upgraded {}{}", url.host_header(), url.path);

        // Frames may arrive in the same segment as the response head.
        let pending = received.split_off(head_end + 4);
        let mut transport = Self::upgraded(inner, pending);
        transport.budget.set_timeout(timeout.filter(|t| !t.is_zero()));
        Ok(transport)
    }

    fn upgraded(inner: Box<dyn Transport + Send>, pending: Vec<u8>) -> Self {
        Self {
            inner,
            pending,
            ready: Vec::new(),
            close_received: false,
            close_sent: false,
            budget: RecvBudget::default(),
        }
    }

    /// Frames always go out whole: a non-blocking socket is switched to
    /// blocking for the write.
    fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let mask: [u8; 4] = rand::thread_rng().gen();
        let bytes = frame.encode(Some(mask));
        if !self.budget.is_nonblocking() {
            self.inner.send(&bytes)?;
            return Ok(());
        }
        self.inner.set_nonblocking(false)?;
        let sent = self.inner.send(&bytes);
        self.inner.set_nonblocking(true)?;
        sent.map(drop)
    }

    /// Application bytes, reading whole frames off `inner` within one read
    /// timeout in total.
    fn recv_frames(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let started = Instant::now();
        let mut reads = 0;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if !self.ready.is_empty() {
                let n = self.ready.len().min(buf.len());
                buf[..n].copy_from_slice(&self.ready[..n]);
                self.ready.drain(..n);
                return Ok(n);
            }
            if self.close_received {
                return Ok(0);
            }
            if let Some((frame, used)) = Frame::decode(&self.pending)? {
                self.pending.drain(..used);
                self.handle_frame(frame)?;
                continue;
            }
            if reads > 0 {
                if let Some(left) = self.budget.narrow(started)? {
                    self.inner.set_read_timeout(Some(left))?;
                }
            }
            reads += 1;
            // Partial frames stay in `pending` if this read times out.
            let n = self.inner.recv(&mut chunk)?;
            if n == 0 {
                log::debug!("[ws] transport closed without close frame");
                self.close_received = true;
                continue;
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    fn send_close(&mut self, payload: Vec<u8>) -> io::Result<()> {
        if self.close_sent {
            return Ok(());
        }
        self.close_sent = true;
        self.write_frame(&Frame::new(Opcode::Close, payload))
    }

    fn handle_frame(&mut self, frame: Frame) -> io::Result<()> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                self.ready.extend_from_slice(&frame.payload);
            }
            Opcode::Ping => {
                log::debug!("[ws] ping ({} bytes), answering", frame.payload.len());
                if !self.close_sent {
                    self.write_frame(&Frame::new(Opcode::Pong, frame.payload))?;
                }
            }
            Opcode::Pong => {}
            Opcode::Close => {
                log::debug!("[ws] close frame received");
                self.close_received = true;
                // Echo only the status code, as RFC 6455 §5.5.1 suggests.
                let echo = frame.payload.get(..2).map(<[u8]>::to_vec).unwrap_or_default();
                self.send_close(echo)?;
            }
        }
        Ok(())
    }
}

impl Transport for WebSocketTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let result = self.recv_frames(buf);
        if let Some(timeout) = self.budget.restore() {
            self.inner.set_read_timeout(timeout)?;
        }
        result
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.close_sent {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "websocket close already sent",
            ));
        }
        self.write_frame(&Frame::new(Opcode::Binary, data))?;
        Ok(data.len())
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.inner.set_nonblocking(nonblocking)?;
        self.budget.set_nonblocking(nonblocking);
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)?;
        self.budget.set_timeout(timeout);
        Ok(())
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_write_timeout(timeout)
    }

    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        if matches!(how, Shutdown::Write | Shutdown::Both) {
            self.send_close(1000u16.to_be_bytes().to_vec())?;
        }
        if matches!(how, Shutdown::Read | Shutdown::Both) {
            self.inner.shutdown(Shutdown::Read)?;
        }
        Ok(())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if self.close_sent {
            return;
        }
        // Best effort; the socket may already be gone.
        if let Err(e) = self.send_close(1000u16.to_be_bytes().to_vec()) {
            log::debug!("[ws] close frame on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_rfc_vector() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn client_key_is_16_random_bytes() {
        let key = generate_client_key();
        let raw = base64::engine::general_purpose::STANDARD
            .decode(&key)
            .unwrap();
        assert_eq!(raw.len(), 16);
        assert_ne!(key, generate_client_key());
    }

    #[test]
    fn url_defaults() {
        let url = WsUrl::parse("ws://example.com").unwrap();
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 80);
        assert_eq!(url.path, "/");
        assert!(!url.secure);
        assert_eq!(url.host_header(), "example.com");

        let url = WsUrl::parse("wss://example.com/feed?x=1").unwrap();
        assert_eq!(url.port, 443);
        assert_eq!(url.path, "/feed?x=1");
        assert!(url.secure);
    }

    #[test]
    fn url_with_port_and_ipv6() {
        let url = WsUrl::parse("ws://127.0.0.1:9001/chat").unwrap();
        assert_eq!((url.host.as_str(), url.port), ("127.0.0.1", 9001));
        assert_eq!(url.host_header(), "127.0.0.1:9001");

        let url = WsUrl::parse("ws://[::1]:9001").unwrap();
        assert_eq!((url.host.as_str(), url.port), ("::1", 9001));
        assert_eq!(url.host_header(), "[::1]:9001");

        let url = WsUrl::parse("wss://[::1]/").unwrap();
        assert_eq!((url.host.as_str(), url.port), ("::1", 443));
    }

    #[test]
    fn url_rejects_other_schemes() {
        assert!(matches!(
            WsUrl::parse("http://example.com"),
            Err(SockError::InvalidAddress(_))
        ));
        assert!(WsUrl::parse("example.com").is_err());
    }

    #[test]
    fn frame_lengths_7_16_64() {
        for len in [0usize, 125, 126, 65_535, 65_536] {
            let frame = Frame::new(Opcode::Binary, vec![0xAB; len]);
            let bytes = frame.encode(None);
            let (decoded, used) = Frame::decode(&bytes).unwrap().unwrap();
            assert_eq!(used, bytes.len(), "len {}", len);
            assert_eq!(decoded, frame, "len {}", len);
        }
    }

    #[test]
    fn masked_frame_unmasks() {
        let frame = Frame::new(Opcode::Text, b"hello".to_vec());
        let bytes = frame.encode(Some([1, 2, 3, 4]));
        assert_eq!(bytes[1] & 0x80, 0x80);
        assert_ne!(&bytes[6..], b"hello");
        let (decoded, _) = Frame::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn partial_frame_needs_more() {
        let bytes = Frame::new(Opcode::Binary, vec![7u8; 300]).encode(None);
        for cut in [0, 1, 2, 3, 100, bytes.len() - 1] {
            assert!(Frame::decode(&bytes[..cut]).unwrap().is_none(), "cut {}", cut);
        }
    }

    #[test]
    fn oversized_control_frame_rejected() {
        let mut bytes = vec![0x89, 126];
        bytes.extend_from_slice(&200u16.to_be_bytes());
        bytes.extend(std::iter::repeat(0).take(200));
        assert!(Frame::decode(&bytes).is_err());
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert!(Frame::decode(&[0x83, 0x00]).is_err());
    }

    #[test]
    fn pong_goes_out_whole_in_nonblocking_mode() {
        use crate::transport::scripted::{ScriptedTransport, Step};

        let ping = Frame::new(Opcode::Ping, vec![9u8; 100]).encode(None);
        let inner = ScriptedTransport::new([Step::Data(ping)]).with_send_window(8);
        let log = inner.send_log();
        let mut ws = WebSocketTransport::upgraded(Box::new(inner), Vec::new());
        ws.set_nonblocking(true).unwrap();

        let err = ws.recv(&mut [0u8; 16]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        let sent = log.lock().unwrap().clone();
        let (pong, used) = Frame::decode(&sent).unwrap().unwrap();
        assert_eq!(used, sent.len());
        assert_eq!(pong, Frame::new(Opcode::Pong, vec![9u8; 100]));
    }

    #[test]
    fn response_checks() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let ok = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
                  Connection: Upgrade\r\nSec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
        assert!(check_response(ok, key).is_ok());

        let refused = "HTTP/1.1 403 Forbidden\r\nContent-Length: 0";
        assert!(matches!(
            check_response(refused, key),
            Err(SockError::Handshake(_))
        ));

        let bad_accept = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
                          Sec-WebSocket-Accept: nope";
        assert!(matches!(
            check_response(bad_accept, key),
            Err(SockError::Handshake(_))
        ));
    }
}
