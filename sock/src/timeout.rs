//! Timeout modes for reads.
//!
//! Every read on a [`crate::reader::BufferedReader`] runs under one of three
//! regimes:
//!
//! | Mode            | Fill attempt                          | Condition read gives up      |
//! |-----------------|---------------------------------------|------------------------------|
//! | `Blocking`      | waits until data or close             | never                        |
//! | `NonBlocking`   | returns at once, maybe with nothing   | after a single attempt       |
//! | `Bounded(d)`    | waits at most the remaining budget    | when `d` has elapsed         |
//!
//! The numeric `-1 / 0 / N` encoding is only understood at the edges (CLI
//! flags, config) through [`Timeout::from_secs_f64`] and [`FromStr`].

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Connection-wide default when nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Wait indefinitely.
    Blocking,
    /// Never wait; use whatever is cached or immediately available.
    NonBlocking,
    /// Wait up to the given duration. Never zero, see [`Timeout::bounded`].
    Bounded(Duration),
}

impl Timeout {
    /// Bounded wait; a zero duration means "do not wait at all".
    pub fn bounded(d: Duration) -> Self {
        if d.is_zero() {
            Timeout::NonBlocking
        } else {
            Timeout::Bounded(d)
        }
    }

    /// Decode the legacy numeric form: negative blocks, zero polls,
    /// anything else is a bound in seconds. Bounds too large for a
    /// `Duration` block.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs < 0.0 {
            Timeout::Blocking
        } else if secs == 0.0 {
            Timeout::NonBlocking
        } else {
            Duration::try_from_secs_f64(secs)
                .map(Timeout::bounded)
                .unwrap_or(Timeout::Blocking)
        }
    }

    /// Read deadline to hand to a socket, `None` for block-forever.
    ///
    /// Meaningless for `NonBlocking`, which switches the socket mode instead.
    pub fn as_deadline(&self) -> Option<Duration> {
        match self {
            Timeout::Bounded(d) => Some(*d),
            _ => None,
        }
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Timeout::Bounded(DEFAULT_TIMEOUT)
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::bounded(d)
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Blocking => write!(f, "blocking"),
            Timeout::NonBlocking => write!(f, "nonblocking"),
            Timeout::Bounded(d) => write!(f, "{:?}", d),
        }
    }
}

impl FromStr for Timeout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "forever" | "blocking" => return Ok(Timeout::Blocking),
            "nonblocking" | "poll" => return Ok(Timeout::NonBlocking),
            _ => {}
        }
        if let Some(ms) = s.strip_suffix("ms") {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|_| format!("Invalid timeout: {}", s))?;
            return Ok(Timeout::bounded(Duration::from_millis(ms)));
        }
        let secs = s.strip_suffix('s').unwrap_or(s);
        let secs: f64 = secs
            .trim()
            .parse()
            .map_err(|_| format!("Invalid timeout: {}", s))?;
        if !secs.is_finite() {
            return Err(format!("Invalid timeout: {}", s));
        }
        Ok(Timeout::from_secs_f64(secs))
    }
}

/// Tracks the time budget of one condition read.
///
/// The clock starts once, when the read starts; each fill attempt is handed
/// whatever is left of the original budget.
#[derive(Debug)]
pub(crate) struct Deadline {
    timeout: Timeout,
    started: Instant,
}

impl Deadline {
    pub(crate) fn start(timeout: Timeout) -> Self {
        Self {
            timeout,
            started: Instant::now(),
        }
    }

    /// Timeout for the next fill attempt, or `None` once a bounded budget is
    /// spent.
    pub(crate) fn next_attempt(&self) -> Option<Timeout> {
        match self.timeout {
            Timeout::Bounded(d) => {
                let remaining = d.saturating_sub(self.started.elapsed());
                if remaining.is_zero() {
                    None
                } else {
                    Some(Timeout::Bounded(remaining))
                }
            }
            other => Some(other),
        }
    }
}
