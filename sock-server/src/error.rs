use sock::SockError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Bad listen address: {0}")]
    Address(#[from] SockError),
}
