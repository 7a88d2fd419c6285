//! TLS client transport on top of TCP, using rustls with the `ring`
//! provider.
//!
//! The handshake completes inside [`TlsTransport::connect`], bounded by the
//! connect timeout, so a returned transport is ready for application data.
//! Records are pulled off the socket one read at a time so that a record
//! arriving in pieces still fits inside a single read timeout.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, Stream};

use super::tcp::connect_stream;
use super::{RecvBudget, Transport};
use crate::address::{Endpoint, Family};
use crate::error::SockError;

/// Where the client's trust anchors come from.
#[derive(Debug, Clone, Default)]
pub enum TlsOptions {
    /// Mozilla roots bundled by `webpki-roots`.
    #[default]
    WebPkiRoots,
    /// PEM file with one or more CA certificates.
    CaFile(PathBuf),
    /// Fully custom client configuration.
    Config(Arc<ClientConfig>),
}

impl TlsOptions {
    pub fn with_ca_file(path: impl AsRef<Path>) -> Self {
        TlsOptions::CaFile(path.as_ref().to_path_buf())
    }

    pub fn client_config(&self) -> Result<Arc<ClientConfig>, SockError> {
        let roots = match self {
            TlsOptions::Config(config) => return Ok(config.clone()),
            TlsOptions::WebPkiRoots => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                roots
            }
            TlsOptions::CaFile(path) => load_ca_file(path)?,
        };
        let config = ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
        Ok(Arc::new(config))
    }
}

fn load_ca_file(path: &Path) -> Result<RootCertStore, SockError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(SockError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no certificates found in {}", path.display()),
        )));
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    log::debug!(
        "[tls] loaded {} CA certificates from {} ({} ignored)",
        added,
        path.display(),
        ignored
    );
    Ok(roots)
}

/// Unwrap the rustls error a failed handshake hides inside an `io::Error`.
fn handshake_error(err: io::Error) -> SockError {
    let tls = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .cloned();
    match tls {
        Some(e) => SockError::Tls(e),
        None => SockError::from(err),
    }
}

pub struct TlsTransport {
    conn: ClientConnection,
    sock: TcpStream,
    budget: RecvBudget,
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("peer", &self.sock.peer_addr().ok())
            .finish()
    }
}

impl TlsTransport {
    pub fn connect(
        endpoint: &Endpoint,
        family: Family,
        connect_timeout: Option<Duration>,
        options: &TlsOptions,
    ) -> Result<Self, SockError> {
        let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|e| {
            SockError::InvalidAddress(format!("invalid TLS server name '{}': {}", endpoint.host, e))
        })?;
        let config = options.client_config()?;
        let tcp = connect_stream(endpoint, family, connect_timeout)?;
        Self::handshake(tcp, config, server_name, connect_timeout)
    }

    /// Run the client handshake over an already connected stream.
    pub fn handshake(
        mut tcp: TcpStream,
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
        timeout: Option<Duration>,
    ) -> Result<Self, SockError> {
        let mut conn = ClientConnection::new(config, server_name)?;
        let timeout = timeout.filter(|t| !t.is_zero());
        tcp.set_read_timeout(timeout)?;
        tcp.set_write_timeout(timeout)?;
        while conn.is_handshaking() {
            conn.complete_io(&mut tcp).map_err(handshake_error)?;
        }
        log::debug!(
            "[tls] handshake complete with {} ({:?})",
            tcp.peer_addr()?,
            conn.protocol_version()
        );
        let mut budget = RecvBudget::default();
        budget.set_timeout(timeout);
        Ok(Self {
            conn,
            sock: tcp,
            budget,
        })
    }

    pub fn connection(&self) -> &ClientConnection {
        &self.conn
    }

    /// Decrypted bytes, reading records off the socket within one read
    /// timeout in total.
    fn recv_plaintext(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let started = Instant::now();
        let mut reads = 0;
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                // Many servers close the TCP stream without a close_notify alert.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    log::debug!("[tls] peer closed without close_notify");
                    return Ok(0);
                }
                Err(e) => return Err(e),
            }
            if reads > 0 {
                if let Some(left) = self.budget.narrow(started)? {
                    self.sock.set_read_timeout(Some(left))?;
                }
            }
            reads += 1;
            self.conn.read_tls(&mut self.sock)?;
            if let Err(e) = self.conn.process_new_packets() {
                // Let the peer see the alert before giving up.
                let _ = self.conn.write_tls(&mut self.sock);
                return Err(io::Error::new(io::ErrorKind::InvalidData, e));
            }
        }
    }

    /// Push out whatever TLS data the connection has queued.
    fn flush_tls(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.sock)?;
        }
        Ok(())
    }
}

impl Transport for TlsTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let result = self.recv_plaintext(buf);
        if let Some(timeout) = self.budget.restore() {
            self.sock.set_read_timeout(timeout)?;
        }
        result
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut stream = Stream::new(&mut self.conn, &mut self.sock);
        stream.write_all(data)?;
        stream.flush()?;
        Ok(data.len())
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.sock.set_nonblocking(nonblocking)?;
        self.budget.set_nonblocking(nonblocking);
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.sock.set_read_timeout(timeout)?;
        self.budget.set_timeout(timeout);
        Ok(())
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.sock.set_write_timeout(timeout)
    }

    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        if matches!(how, Shutdown::Write | Shutdown::Both) {
            self.conn.send_close_notify();
            self.flush_tls()?;
        }
        self.sock.shutdown(how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.sock.peer_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webpki_roots_build_a_config() {
        let config = TlsOptions::default().client_config().unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn custom_config_is_passed_through() {
        let config = TlsOptions::WebPkiRoots.client_config().unwrap();
        let options = TlsOptions::Config(config.clone());
        assert!(Arc::ptr_eq(&options.client_config().unwrap(), &config));
    }

    #[test]
    fn missing_ca_file_is_an_error() {
        let options = TlsOptions::with_ca_file("/nonexistent/ca.pem");
        assert!(matches!(options.client_config(), Err(SockError::Io(_))));
    }

    #[test]
    fn empty_ca_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("sock-empty-ca-{}.pem", std::process::id()));
        std::fs::write(&path, b"").unwrap();
        let result = TlsOptions::with_ca_file(&path).client_config();
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(SockError::Io(_))));
    }
}
