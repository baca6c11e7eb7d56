//! Keepalive pings for an accepted connection
//!
//! Once the server accepts the login a PING is queued on every tick. The
//! connection counts as dead when no PONG has come back for longer than the
//! timeout.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::commands;
use crate::queue::OutgoingQueue;

/// Why [`run_heartbeat`] stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The server went quiet for longer than the timeout
    TimedOut,
    /// The connection closed first
    Cancelled,
}

#[derive(Debug, Default)]
struct Probe {
    armed_at: Option<Instant>,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    lag: Option<Duration>,
}

/// Ping/pong timestamps and measured lag for one connection
#[derive(Debug, Default)]
pub struct Liveness {
    probe: Mutex<Probe>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the timeout clock
    pub fn arm(&self) {
        let mut probe = self.lock();
        *probe = Probe {
            armed_at: Some(Instant::now()),
            ..Probe::default()
        };
    }

    pub fn record_ping(&self) {
        self.lock().last_ping = Some(Instant::now());
    }

    /// Record a pong and return the lag it measures, if a ping was sent
    pub fn record_pong(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut probe = self.lock();
        probe.last_pong = Some(now);
        if let Some(sent) = probe.last_ping {
            probe.lag = Some(now.saturating_duration_since(sent));
        }
        probe.lag
    }

    pub fn lag(&self) -> Option<Duration> {
        self.lock().lag
    }

    pub fn last_ping(&self) -> Option<Instant> {
        self.lock().last_ping
    }

    pub fn last_pong(&self) -> Option<Instant> {
        self.lock().last_pong
    }

    /// Whether more than `timeout` has passed since the last pong
    ///
    /// Before any pong arrives the clock runs from [`Liveness::arm`].
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        let probe = self.lock();
        match probe.last_pong.or(probe.armed_at) {
            Some(reference) => now.saturating_duration_since(reference) > timeout,
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Probe> {
        self.probe.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ping on every tick until the server goes quiet or `cancel` fires
///
/// The first tick fires immediately. Each tick either reports a timeout or
/// queues a `PING` and records when it was sent; replies are recorded by the
/// pong handler through [`Liveness::record_pong`].
pub async fn run_heartbeat(
    liveness: &Liveness,
    queue: &OutgoingQueue,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    liveness.arm();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
            _ = ticker.tick() => {
                if liveness.is_expired(Instant::now(), timeout) {
                    return HeartbeatResult::TimedOut;
                }
                queue.push(commands::ping());
                liveness.record_ping();
            }
        }
    }
}
