//! Latency records behind the `timings` feature. Without the feature every
//! timer is a zero-sized no-op.

#[cfg(feature = "timings")]
use std::time::{Duration, Instant};

use crate::{errors::Rejection, feeds::Consensus, gateway::GatewayError};

#[cfg(feature = "timings")]
fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1e3
}

/// One gateway call, split into the wait for the account session and the
/// exchange round trip.
#[cfg(feature = "timings")]
pub(crate) struct CallTimer {
    operation: &'static str,
    started: Instant,
    acquired: Option<Instant>,
}

#[cfg(feature = "timings")]
impl CallTimer {
    pub(crate) fn start(operation: &'static str) -> Self {
        Self {
            operation,
            started: Instant::now(),
            acquired: None,
        }
    }

    pub(crate) fn acquired(&mut self) {
        self.acquired = Some(Instant::now());
    }

    pub(crate) fn finish<T>(self, result: &Result<T, GatewayError>) {
        let done = Instant::now();
        // a call that never got the session spent all its time waiting
        let acquired = self.acquired.unwrap_or(done);
        tracing::info!(
            target: "timings",
            operation = self.operation,
            outcome = result.as_ref().map_or_else(GatewayError::kind, |_| "ok"),
            busy_wait_ms = millis(acquired.duration_since(self.started)),
            round_trip_ms = millis(done.duration_since(acquired)),
        );
    }
}

#[cfg(not(feature = "timings"))]
pub(crate) struct CallTimer;

#[cfg(not(feature = "timings"))]
impl CallTimer {
    pub(crate) fn start(_: &'static str) -> Self {
        CallTimer
    }

    pub(crate) fn acquired(&mut self) {}

    pub(crate) fn finish<T>(self, _: &Result<T, GatewayError>) {}
}

/// One feed poll plus the consensus round over its quotes.
#[cfg(feature = "timings")]
pub(crate) struct RoundTimer {
    started: Instant,
}

#[cfg(feature = "timings")]
impl RoundTimer {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub(crate) fn finish(self, received: usize, result: &Result<Consensus, Rejection>) {
        let accepted = result.as_ref().ok().map(|c| c.accepted.source.as_str());
        tracing::info!(
            target: "timings",
            received,
            accepted = accepted.unwrap_or("none"),
            elapsed_ms = millis(self.started.elapsed()),
            "consensus round"
        );
    }
}

#[cfg(not(feature = "timings"))]
pub(crate) struct RoundTimer;

#[cfg(not(feature = "timings"))]
impl RoundTimer {
    pub(crate) fn start() -> Self {
        RoundTimer
    }

    pub(crate) fn finish(self, _: usize, _: &Result<Consensus, Rejection>) {}
}
