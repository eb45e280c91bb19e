use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::{Error, Pollable, TimeoutExpired};

/// Polls `pact` until it finishes or `timeout` (else its default timeout)
/// elapses. The last poll happens at the deadline, so a predicate that turns
/// true while the loop sleeps is still seen.
pub(crate) fn wait_until<P: Pollable + ?Sized>(
    pact: &P,
    timeout: Option<Duration>,
) -> Result<(), Error> {
    let timeout = timeout.or_else(|| pact.default_timeout());
    let interval = pact.poll_interval();
    debug!(waiting_for = %pact, ?timeout, "waiting");

    let started = Instant::now();
    loop {
        match pact.poll() {
            Ok(true) => {
                debug!(waiting_for = %pact, elapsed = ?started.elapsed(), "finished waiting");
                return Ok(());
            }
            Ok(false) => {}
            Err(err) => {
                debug!(waiting_for = %pact, error = %err, "error raised while waiting");
                return Err(err);
            }
        }
        let elapsed = started.elapsed();
        let nap = match timeout {
            Some(limit) if elapsed >= limit => {
                return Err(pact.timeout_error(expire(pact, limit)));
            }
            Some(limit) => interval.min(limit - elapsed),
            None => interval,
        };
        thread::sleep(nap);
    }
}

fn expire<P: Pollable + ?Sized>(pact: &P, timeout: Duration) -> TimeoutExpired {
    let expired = TimeoutExpired {
        timeout,
        waiting_for: pact.to_string(),
        pending: pact.pending(),
    };
    debug!(pending = ?expired.pending, "{expired}");
    pact.notify_timeout();
    expired
}
