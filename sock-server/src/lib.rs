//! `sock-server`: minimal thread-per-connection TCP and UDP servers.
//!
//! Each accepted connection (TCP) or received datagram (UDP) is handed to a
//! caller-supplied handler on its own thread. A [`throttle::WorkerGauge`]
//! caps how many handlers run at once.
//!
//! - [`config`]: bind address, caps and defaults
//! - [`throttle`]: live-worker count and admission polling
//! - [`tcp`]: `TcpServer`
//! - [`udp`]: `UdpServer`

pub mod config;
pub mod error;
pub mod tcp;
pub mod throttle;
pub mod udp;

pub use config::ServerConfig;
pub use error::ServerError;
pub use tcp::TcpServer;
pub use throttle::WorkerGauge;
pub use udp::UdpServer;
