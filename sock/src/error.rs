use thiserror::Error;

#[derive(Error, Debug)]
pub enum SockError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    /// The peer closed the stream and nothing buffered satisfies the read.
    #[error("Connection closed")]
    EndOfStream,
    /// The read condition was not met in time. Buffered bytes are kept.
    #[error("Timeout")]
    TimedOut,
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),
    #[error("Network error: {0}")]
    Io(std::io::Error),
}

impl SockError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SockError::TimedOut)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, SockError::EndOfStream)
    }
}

impl From<std::io::Error> for SockError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            SockError::TimedOut
        } else {
            SockError::Io(err)
        }
    }
}

impl From<std::net::AddrParseError> for SockError {
    fn from(err: std::net::AddrParseError) -> Self {
        SockError::InvalidAddress(err.to_string())
    }
}
