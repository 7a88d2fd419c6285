//! Listener configuration.

use std::net::SocketAddr;
use std::time::Duration;

use sock::{parse_addr, Family};

use crate::error::ServerError;

pub const TCP_MAX_THREADS: usize = 1000;
pub const TCP_BACKLOG: u32 = 100;
pub const TCP_THROTTLE: Duration = Duration::from_millis(500);

pub const UDP_MAX_THREADS: usize = 10;
pub const UDP_THROTTLE: Duration = Duration::from_secs(1);

/// Largest datagram the UDP loop receives in one go.
pub const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host; `None` means every interface of `family`.
    pub host: Option<String>,
    pub port: u16,
    pub family: Family,
    /// Workers allowed to run at once.
    pub max_threads: usize,
    /// Pending-connection queue length (TCP only).
    pub backlog: u32,
    /// Sleep between admission checks while at the cap.
    pub throttle_interval: Duration,
}

impl ServerConfig {
    pub fn tcp(port: u16) -> Self {
        Self {
            host: None,
            port,
            family: Family::Any,
            max_threads: TCP_MAX_THREADS,
            backlog: TCP_BACKLOG,
            throttle_interval: TCP_THROTTLE,
        }
    }

    pub fn udp(port: u16) -> Self {
        Self {
            host: None,
            port,
            family: Family::Any,
            max_threads: UDP_MAX_THREADS,
            backlog: 0,
            throttle_interval: UDP_THROTTLE,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_family(mut self, family: Family) -> Self {
        self.family = family;
        self
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }

    /// Host used when none is configured.
    pub fn default_host(&self) -> &'static str {
        match self.family {
            Family::V6 => "::",
            Family::Any | Family::V4 => "0.0.0.0",
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ServerError> {
        let host = self.host.as_deref().unwrap_or(self.default_host());
        let endpoint = parse_addr((host, self.port), None)?;
        Ok(endpoint.resolve(self.family)?[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_and_udp_defaults() {
        let tcp = ServerConfig::tcp(8080);
        assert_eq!(tcp.max_threads, 1000);
        assert_eq!(tcp.backlog, 100);
        assert_eq!(tcp.throttle_interval, Duration::from_millis(500));

        let udp = ServerConfig::udp(5353);
        assert_eq!(udp.max_threads, 10);
        assert_eq!(udp.throttle_interval, Duration::from_secs(1));
    }

    #[test]
    fn default_bind_host_follows_family() {
        let v4 = ServerConfig::tcp(0).bind_addr().unwrap();
        assert_eq!(v4, "0.0.0.0:0".parse().unwrap());

        let v6 = ServerConfig::tcp(0).with_family(Family::V6);
        assert_eq!(v6.default_host(), "::");
    }

    #[test]
    fn explicit_host_is_used() {
        let addr = ServerConfig::udp(9000)
            .with_host("127.0.0.1")
            .bind_addr()
            .unwrap();
        assert_eq!(addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn family_mismatch_is_an_error() {
        let config = ServerConfig::tcp(0)
            .with_host("127.0.0.1")
            .with_family(Family::V6);
        assert!(matches!(config.bind_addr(), Err(ServerError::Address(_))));
    }
}
