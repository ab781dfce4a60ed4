//! Bounded polling.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, PartialEq, Eq)]
pub enum PollError<E> {
    /// The condition never held before the deadline.
    Timeout(Duration),
    /// The condition itself failed; polling stopped immediately.
    Condition(E),
}

/// Evaluate `condition` every `interval` until it returns `Ok(true)`, an
/// error, or `timeout` elapses. The first evaluation happens one interval
/// after the call.
pub async fn poll_until<E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let start = Instant::now();
    let deadline = tokio::time::sleep_until(start + timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = ticker.tick() => {}
            _ = &mut deadline => return Err(PollError::Timeout(timeout)),
        }
        if condition().await.map_err(PollError::Condition)? {
            return Ok(());
        }
    }
}
