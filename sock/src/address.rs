//! Address parsing and resolution.
//!
//! Accepted spellings:
//! - a `(host, port)` pair
//! - a host string plus an explicit port
//! - one string with the port embedded after a run of any of ` :;/|`,
//!   e.g. `127.0.0.1:3123`, `example.com:| /3123`, `[2001:db8::1]:443`
//!
//! IPv6 brackets are stripped from the host.

use crate::error::SockError;
use regex::Regex;
use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::OnceLock;

/// Port delimiter run followed by a trailing decimal number.
const PORT_PATTERN: &str = r"[:;/| ]+(?P<port>\d+)$";

fn port_regex() -> &'static Regex {
    static PORT_RE: OnceLock<Regex> = OnceLock::new();
    PORT_RE.get_or_init(|| Regex::new(PORT_PATTERN).expect("static port pattern is valid"))
}

/// Address input before normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    Pair(String, u16),
    Text(String),
}

impl From<(&str, u16)> for Addr {
    fn from((host, port): (&str, u16)) -> Self {
        Addr::Pair(host.to_string(), port)
    }
}

impl From<(String, u16)> for Addr {
    fn from((host, port): (String, u16)) -> Self {
        Addr::Pair(host, port)
    }
}

impl From<&str> for Addr {
    fn from(s: &str) -> Self {
        Addr::Text(s.to_string())
    }
}

impl From<String> for Addr {
    fn from(s: String) -> Self {
        Addr::Text(s)
    }
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Self {
        Addr::Pair(addr.ip().to_string(), addr.port())
    }
}

/// IP family filter applied during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Family {
    #[default]
    Any,
    V4,
    V6,
}

impl Family {
    pub fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            Family::Any => true,
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }
}

/// Normalised `(host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn into_tuple(self) -> (String, u16) {
        (self.host, self.port)
    }

    /// Resolve through the system resolver, keeping only `family`.
    pub fn resolve(&self, family: Family) -> Result<Vec<SocketAddr>, SockError> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| SockError::InvalidAddress(format!("{}: {}", self, e)))?
            .filter(|a| family.matches(a))
            .collect();
        if addrs.is_empty() {
            return Err(SockError::InvalidAddress(format!(
                "{} has no {:?} address",
                self, family
            )));
        }
        Ok(addrs)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl ToSocketAddrs for Endpoint {
    type Iter = std::vec::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        (self.host.as_str(), self.port).to_socket_addrs()
    }
}

fn strip_brackets(host: &str) -> &str {
    host.trim_matches(|c| c == '[' || c == ']')
}

fn checked_host(host: &str, original: &str) -> Result<String, SockError> {
    let host = strip_brackets(host.trim());
    if host.is_empty() {
        return Err(SockError::InvalidAddress(format!(
            "Can't understand address: {}",
            original
        )));
    }
    Ok(host.to_string())
}

/// Split `text` into host and embedded port, if it carries one.
fn split_embedded_port(text: &str) -> Result<Option<(&str, u16)>, SockError> {
    let text = text.trim();
    let Some(caps) = port_regex().captures(text) else {
        return Ok(None);
    };
    let (Some(whole), Some(port)) = (caps.get(0), caps.name("port")) else {
        return Ok(None);
    };
    let port: u16 = port
        .as_str()
        .parse()
        .map_err(|_| SockError::InvalidAddress(format!("Port out of range: {}", text)))?;
    Ok(Some((&text[..whole.start()], port)))
}

/// Text that is a host on its own: a bracketed literal or an IP address.
/// Anything else ending in a delimiter run and digits carries a port.
fn is_bare_host(text: &str) -> bool {
    let text = text.trim();
    if text.starts_with('[') && text.ends_with(']') {
        return true;
    }
    strip_brackets(text).parse::<IpAddr>().is_ok()
}

/// Normalise `addr` (and an optional explicit `port`) into an [`Endpoint`].
///
/// Supplying a port twice, once embedded and once explicitly, is rejected.
pub fn parse_addr(addr: impl Into<Addr>, port: Option<u16>) -> Result<Endpoint, SockError> {
    match (addr.into(), port) {
        (Addr::Pair(host, p), None) => Ok(Endpoint::new(checked_host(&host, &host)?, p)),
        (Addr::Pair(host, p), Some(explicit)) => Err(SockError::InvalidAddress(format!(
            "Port given twice: ({}, {}) and {}",
            host, p, explicit
        ))),
        (Addr::Text(text), Some(explicit)) => {
            if !is_bare_host(&text) && split_embedded_port(&text)?.is_some() {
                return Err(SockError::InvalidAddress(format!(
                    "Port given twice: {} and {}",
                    text, explicit
                )));
            }
            Ok(Endpoint::new(checked_host(&text, &text)?, explicit))
        }
        (Addr::Text(text), None) => match split_embedded_port(&text)? {
            Some((host, p)) => Ok(Endpoint::new(checked_host(host, &text)?, p)),
            None => Err(SockError::InvalidAddress(format!(
                "Can't understand address: {} (no port)",
                text
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_strips_brackets() {
        let ep = parse_addr(("[::1]", 80), None).unwrap();
        assert_eq!(ep, Endpoint::new("::1", 80));
    }

    #[test]
    fn mixed_delimiters() {
        let ep = parse_addr("example.com:| /3123", None).unwrap();
        assert_eq!(ep.into_tuple(), ("example.com".to_string(), 3123));
    }

    #[test]
    fn ipv6_with_port_takes_last_group() {
        let ep = parse_addr("fe80::0:8080", None).unwrap();
        assert_eq!(ep, Endpoint::new("fe80::0", 8080));
    }

    #[test]
    fn bare_ipv6_with_explicit_port_is_host() {
        let ep = parse_addr("fe80::0", Some(22)).unwrap();
        assert_eq!(ep, Endpoint::new("fe80::0", 22));
    }

    #[test]
    fn colon_run_with_explicit_port_is_port_twice() {
        for text in ["example.com::80", "127.0.0.1::1337", "localhost:::443"] {
            assert!(
                matches!(parse_addr(text, Some(22)), Err(SockError::InvalidAddress(_))),
                "{}",
                text
            );
            assert_ne!(parse_addr(text, None).unwrap().port, 22);
        }
    }

    #[test]
    fn missing_port_rejected() {
        assert!(matches!(
            parse_addr("localhost", None),
            Err(SockError::InvalidAddress(_))
        ));
    }

    #[test]
    fn empty_host_rejected() {
        assert!(matches!(
            parse_addr(":80", None),
            Err(SockError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_addr(("[]", 80), None),
            Err(SockError::InvalidAddress(_))
        ));
    }

    #[test]
    fn port_out_of_range_rejected() {
        assert!(matches!(
            parse_addr("localhost:65536", None),
            Err(SockError::InvalidAddress(_))
        ));
    }

    #[test]
    fn display_brackets_ipv6() {
        assert_eq!(Endpoint::new("::1", 443).to_string(), "[::1]:443");
        assert_eq!(Endpoint::new("127.0.0.1", 80).to_string(), "127.0.0.1:80");
    }

    #[test]
    fn resolve_filters_family() {
        let ep = Endpoint::new("127.0.0.1", 9);
        assert_eq!(ep.resolve(Family::V4).unwrap().len(), 1);
        assert!(ep.resolve(Family::V6).is_err());
    }
}
