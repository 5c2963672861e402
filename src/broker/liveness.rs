//! Per-client liveness probing.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::net::ClientRecord;
use crate::protocol::Envelope;

/// Why the liveness loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessResult {
    /// Nothing was heard from the client for a whole interval.
    TimedOut,
    Cancelled,
}

/// Check the client once per `interval`.
///
/// If it showed signs of life since the previous tick the flag is cleared
/// and both a protocol ping and an application `ping` go out; otherwise the
/// loop returns `TimedOut` and the caller terminates the connection.
pub async fn run_liveness(
    client: Arc<ClientRecord>,
    interval: Duration,
    sender: &str,
    cancel: CancellationToken,
) -> LivenessResult {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !client.check_alive() {
                    return LivenessResult::TimedOut;
                }
                client.ping();
                client.send(&Envelope::ping(sender));
            }
            () = cancel.cancelled() => return LivenessResult::Cancelled,
        }
    }
}
