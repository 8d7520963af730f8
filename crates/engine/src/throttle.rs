//! Transfer rate limiting for the staging copy
//!
//! Bytes are metered over one second windows: once a window's budget is
//! spent, writes wait for the next window to open.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::time::{Instant, Sleep};

const WINDOW: Duration = Duration::from_secs(1);

/// Maximum transfer speed in bytes per second
///
/// Parsed from a byte count with an optional binary suffix: `500`, `64K`,
/// `10M`, `1G`, `2T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RateLimit(u64);

impl RateLimit {
    pub fn bytes_per_sec(self) -> u64 {
        self.0
    }
}

impl FromStr for RateLimit {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (digits, shift) = match raw.char_indices().last() {
            Some((at, suffix)) if suffix.is_ascii_alphabetic() => {
                let shift = match suffix.to_ascii_uppercase() {
                    'B' => 0,
                    'K' => 10,
                    'M' => 20,
                    'G' => 30,
                    'T' => 40,
                    _ => return Err(format!("unknown rate suffix {:?} in {:?}", suffix, raw)),
                };
                (&raw[..at], shift)
            }
            _ => (raw, 0),
        };

        let value: u64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("invalid rate limit {:?}, expected e.g. 500K or 10M", raw))?;
        let bytes = value
            .checked_mul(1u64 << shift)
            .ok_or_else(|| format!("rate limit {:?} is too large", raw))?;
        if bytes == 0 {
            return Err("rate limit must be above zero".to_string());
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for RateLimit {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<RateLimit> for String {
    fn from(limit: RateLimit) -> Self {
        limit.to_string()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (suffix, shift) in [("T", 40), ("G", 30), ("M", 20), ("K", 10)] {
            let unit = 1u64 << shift;
            if self.0 % unit == 0 {
                return write!(f, "{}{}", self.0 / unit, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}

/// Writer that passes at most `limit` bytes per second to `inner`
///
/// Without a limit it is a plain pass-through.
pub struct Throttled<W> {
    inner: W,
    limit: Option<u64>,
    window_start: Instant,
    window_bytes: u64,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl<W> Throttled<W> {
    pub fn new(inner: W, limit: Option<RateLimit>) -> Self {
        Self {
            inner,
            limit: limit.map(RateLimit::bytes_per_sec),
            window_start: Instant::now(),
            window_bytes: 0,
            sleep: None,
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for Throttled<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(limit) = this.limit else {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        };

        loop {
            if let Some(sleep) = this.sleep.as_mut() {
                ready!(sleep.as_mut().poll(cx));
                this.sleep = None;
            }

            let now = Instant::now();
            if now.duration_since(this.window_start) >= WINDOW {
                this.window_start = now;
                this.window_bytes = 0;
            }

            let budget = limit.saturating_sub(this.window_bytes);
            if budget == 0 {
                this.sleep = Some(Box::pin(tokio::time::sleep_until(this.window_start + WINDOW)));
                continue;
            }

            let allowed = buf.len().min(usize::try_from(budget).unwrap_or(usize::MAX));
            let written = ready!(Pin::new(&mut this.inner).poll_write(cx, &buf[..allowed]))?;
            this.window_bytes += written as u64;
            return Poll::Ready(Ok(written));
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
