// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use futures::Future;
use std::{fmt::Debug, time::Duration};
use tokio::time::sleep;

pub mod poll;

pub use poll::{poll_until, FixedInterval, PollError, PollPolicy};

/// A finished future must not be polled again, so every attempt needs a fresh one.
///
/// `FutureFactory` abstracts over the thunks that build them. The argument is the
/// zero-based attempt number.
pub trait FutureFactory<T, E, F>
where
    F: Future<Output = Result<T, E>>,
{
    fn build_future(&self, attempt: u32) -> F;
}

impl<T, E, F, FF> FutureFactory<T, E, F> for FF
where
    F: Future<Output = Result<T, E>>,
    FF: Fn(u32) -> F,
{
    fn build_future(&self, attempt: u32) -> F {
        (*self)(attempt)
    }
}

/// Decides what to do after a failed attempt.
pub trait RetryPolicy<E: Debug> {
    fn on_ok(&mut self, _: u32) {}
    fn on_err(&mut self, _: u32, _: E) -> RetryAction<E>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryAction<E: Debug> {
    RetryNow,
    WaitFor(Duration),
    ReturnError(E),
}

impl<P, E: Debug> RetryPolicy<E> for P
where
    P: FnMut(u32, E) -> RetryAction<E>,
{
    fn on_err(&mut self, attempt: u32, e: E) -> RetryAction<E> {
        (*self)(attempt, e)
    }
}

/// Retry up to `max_attempts` times, waiting `2 * attempt` seconds between tries.
pub fn linear_policy<E: Debug>(max_attempts: u32) -> impl RetryPolicy<E> {
    move |k: u32, e| match k {
        0 => RetryAction::RetryNow,
        k if k + 1 < max_attempts => RetryAction::WaitFor(Duration::from_secs(2 * k as u64)),
        _ => RetryAction::ReturnError(e),
    }
}

/// Builds and awaits futures from `factory` until one resolves to `Ok`
/// or `policy` hands back an error.
pub async fn retry_future<T, E, F, FF>(factory: FF, mut policy: impl RetryPolicy<E>) -> Result<T, E>
where
    E: Debug,
    F: Future<Output = Result<T, E>>,
    FF: FutureFactory<T, E, F>,
{
    let mut attempt = 0u32;

    loop {
        let e = match factory.build_future(attempt).await {
            Ok(x) => {
                policy.on_ok(attempt);

                return Ok(x);
            }
            Err(e) => e,
        };

        match policy.on_err(attempt, e) {
            RetryAction::ReturnError(e) => {
                tracing::debug!("Giving up after {} attempt(s): {:?}", attempt + 1, e);

                return Err(e);
            }
            RetryAction::WaitFor(delay) => {
                tracing::debug!("Attempt {} failed, next one in {:?}", attempt, delay);

                sleep(delay).await;
            }
            RetryAction::RetryNow => {
                tracing::debug!("Attempt {} failed, retrying right away", attempt);
            }
        }

        attempt += 1;
    }
}
