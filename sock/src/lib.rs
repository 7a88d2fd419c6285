//! `sock`: buffered socket reads with explicit timeout modes.
//!
//! # Architecture
//!
//! ```text
//!  caller: read_line / read_exact / read_until_pattern / ...
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │         BufferedReader            │
//!  │  (buffer + eof + timeout policy)  │
//!  └────┬──────────────────────────────┘
//!       │ one recv per fill
//!  ┌────▼──────────────────────────────┐
//!  │     Box<dyn Transport + Send>     │
//!  │   tcp │ udp │ tls │ websocket     │
//!  └───────────────────────────────────┘
//! ```
//!
//! Modules:
//! - [`timeout`]: `Blocking` / `NonBlocking` / `Bounded(d)`
//! - [`address`]: `parse_addr` and resolution
//! - [`config`]: per-connection settings
//! - [`reader`]: the condition-read engine
//! - [`transport`]: the byte movers
//! - [`connect`]: constructors for [`Sock`]

pub mod address;
pub mod config;
pub mod connect;
pub mod error;
pub mod reader;
pub mod timeout;
pub mod transport;

pub use address::{parse_addr, Addr, Endpoint, Family};
pub use config::{SockConfig, TransportKind, DEFAULT_CHUNK_SIZE};
pub use connect::Sock;
pub use error::SockError;
pub use reader::{BufferedReader, PatternMatch, ReaderState};
pub use timeout::{Timeout, DEFAULT_TIMEOUT};
pub use transport::tls::TlsOptions;
pub use transport::Transport;
