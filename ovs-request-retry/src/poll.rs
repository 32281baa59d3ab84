// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Wait for a remote condition by re-checking it on a schedule.
//!
//! The check is a [`FutureFactory`] resolving to `Ok(Some(x))` once the condition
//! holds, `Ok(None)` while it is still pending, and `Err(e)` when checking itself
//! failed. Errors end the wait immediately; only the pending state is retried.

use crate::FutureFactory;
use futures::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// How long to sleep before the next check.
pub trait PollPolicy {
    fn delay(&mut self, attempt: u32) -> Duration;
}

/// Same delay between every check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedInterval(pub Duration);

impl Default for FixedInterval {
    fn default() -> Self {
        FixedInterval(Duration::from_secs(1))
    }
}

impl PollPolicy for FixedInterval {
    fn delay(&mut self, _: u32) -> Duration {
        self.0
    }
}

impl<P> PollPolicy for P
where
    P: FnMut(u32) -> Duration,
{
    fn delay(&mut self, attempt: u32) -> Duration {
        (*self)(attempt)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    #[error("Condition still pending after {elapsed:?} ({attempts} checks)")]
    Timeout { elapsed: Duration, attempts: u32 },
    #[error("{0}")]
    Inner(E),
}

/// Check until the condition resolves.
///
/// With `timeout` set, a pending check made more than `timeout` after the first one
/// fails with [`PollError::Timeout`]. Without it the wait is unbounded.
/// At most one check is issued per policy delay.
pub async fn poll_until<T, E, F, FF>(
    factory: FF,
    mut policy: impl PollPolicy,
    timeout: Option<Duration>,
) -> Result<T, PollError<E>>
where
    F: Future<Output = Result<Option<T>, E>>,
    FF: FutureFactory<Option<T>, E, F>,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        if let Some(x) = factory
            .build_future(attempt)
            .await
            .map_err(PollError::Inner)?
        {
            return Ok(x);
        }

        let elapsed = start.elapsed();

        if let Some(timeout) = timeout {
            if elapsed > timeout {
                return Err(PollError::Timeout {
                    elapsed,
                    attempts: attempt + 1,
                });
            }
        }

        let delay = policy.delay(attempt);

        tracing::trace!("check {} pending after {:?}, next in {:?}", attempt, elapsed, delay);

        sleep(delay).await;

        attempt += 1;
    }
}
