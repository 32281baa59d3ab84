// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! A rendezvous point for a fixed number of threads.
//!
//! Every participant calls [`Waiter::wait`]; nobody gets past it before all `target`
//! participants of the round have arrived.
//!
//! With `auto_reset`, the waiter rearms itself once everyone of the round has left,
//! so the same instance can sync several phases. Arrivals for the next round are
//! held back until the previous round has fully drained.
//!
//! A participant that times out is still counted as arrived and is recorded as
//! abandoned. Its round only completes if enough further participants show up;
//! until then everyone else in it times out too. The participant that completes
//! such a round does not wait for the abandoned ones to leave.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WaiterError {
    #[error("Not all participants arrived within {timeout:?} ({arrived} of {target})")]
    Timeout {
        timeout: Duration,
        arrived: usize,
        target: usize,
    },
}

#[derive(Debug, Default)]
struct State {
    /// Arrivals in the current round
    counter: usize,
    /// Participants that saw the current round release
    released: usize,
    /// Participants of the current round that gave up before it was released
    abandoned: usize,
    /// Round is complete and waiting for its participants to leave
    draining: bool,
}

#[derive(Debug)]
pub struct Waiter {
    target: usize,
    auto_reset: bool,
    state: Mutex<State>,
    cvar: Condvar,
}

impl Waiter {
    /// # Panics
    ///
    /// If `target` is 0.
    pub fn new(target: usize, auto_reset: bool) -> Self {
        assert!(target > 0, "A waiter needs at least one participant");

        Waiter {
            target,
            auto_reset,
            state: Mutex::new(State::default()),
            cvar: Condvar::new(),
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Participants that have arrived in the current round
    pub fn get_counter(&self) -> usize {
        self.state.lock().counter
    }

    /// `wait` with [`DEFAULT_TIMEOUT`]
    pub fn wait_default(&self) -> Result<(), WaiterError> {
        self.wait(DEFAULT_TIMEOUT)
    }

    /// Arrive and block until every participant of the round has arrived.
    ///
    /// Without `auto_reset`, calls made after the waiter released return right away.
    pub fn wait(&self, timeout: Duration) -> Result<(), WaiterError> {
        let deadline = Instant::now() + timeout;
        let target = self.target;

        let mut state = self.state.lock();

        if self.auto_reset {
            // Previous round is still draining.
            self.cvar
                .wait_while_until(&mut state, |s| s.draining, deadline);

            if state.draining {
                return Err(WaiterError::Timeout {
                    timeout,
                    arrived: state.counter,
                    target,
                });
            }
        } else if state.counter == target {
            return Ok(());
        }

        state.counter += 1;

        debug_assert!(state.counter <= target);

        if state.counter == target {
            tracing::trace!("all {} participants arrived", target);

            if self.auto_reset {
                state.draining = true;
                self.cvar.notify_all();

                // Everyone else either acknowledges or has already abandoned the round.
                self.cvar
                    .wait_while(&mut state, |s| s.released + s.abandoned < target - 1);

                *state = State::default();
            }

            self.cvar.notify_all();

            return Ok(());
        }

        self.cvar
            .wait_while_until(&mut state, |s| s.counter < target, deadline);

        if state.counter < target {
            tracing::debug!(
                "gave up after {:?}, {} of {} arrived",
                timeout,
                state.counter,
                target
            );

            state.abandoned += 1;

            return Err(WaiterError::Timeout {
                timeout,
                arrived: state.counter,
                target,
            });
        }

        state.released += 1;

        if self.auto_reset {
            self.cvar.notify_all();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    fn run(waiter: &Arc<Waiter>, n: usize, timeout: Duration) -> Vec<Result<(), WaiterError>> {
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let waiter = Arc::clone(waiter);

                thread::spawn(move || waiter.wait(timeout))
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_releases_at_target() {
        let waiter = Arc::new(Waiter::new(4, false));

        let xs = run(&waiter, 4, DEFAULT_TIMEOUT);

        assert!(xs.iter().all(Result::is_ok));
        assert_eq!(waiter.get_counter(), 4);
    }

    #[test]
    fn test_times_out_one_short() {
        let waiter = Arc::new(Waiter::new(4, false));
        let timeout = Duration::from_millis(200);

        let start = Instant::now();
        let xs = run(&waiter, 3, timeout);

        assert!(start.elapsed() >= timeout);

        for x in xs {
            match x {
                Err(WaiterError::Timeout {
                    timeout: t,
                    arrived,
                    target,
                }) => {
                    assert_eq!(t, timeout);
                    assert_eq!(arrived, 3);
                    assert_eq!(target, 4);
                }
                Ok(()) => panic!("Released with a participant missing"),
            }
        }
    }

    #[test]
    fn test_timed_out_round_stays_counted() {
        let waiter = Waiter::new(2, false);

        assert!(waiter.wait(Duration::from_millis(20)).is_err());
        assert_eq!(waiter.get_counter(), 1);

        // The late participant completes the wedged round.
        assert_eq!(waiter.wait(Duration::from_millis(20)), Ok(()));
        assert_eq!(waiter.get_counter(), 2);
    }

    #[test]
    fn test_auto_reset_timed_out_round_completes() {
        let waiter = Arc::new(Waiter::new(2, true));

        assert_eq!(waiter.target(), 2);
        assert!(waiter.wait(Duration::from_millis(20)).is_err());
        assert_eq!(waiter.get_counter(), 1);

        let (tx, rx) = std::sync::mpsc::channel();

        let late = {
            let waiter = Arc::clone(&waiter);

            thread::spawn(move || tx.send(waiter.wait(Duration::from_millis(200))).unwrap())
        };

        // The completing participant must not wait on the one that gave up.
        let x = rx
            .recv_timeout(Duration::from_secs(3))
            .expect("Late participant is stuck");

        late.join().unwrap();

        assert_eq!(x, Ok(()));
        assert_eq!(waiter.get_counter(), 0);

        // The waiter is rearmed for a regular round.
        assert!(run(&waiter, 2, DEFAULT_TIMEOUT).iter().all(Result::is_ok));
        assert_eq!(waiter.get_counter(), 0);
    }

    #[test]
    fn test_single_participant() {
        let waiter = Waiter::new(1, true);

        for _ in 0..3 {
            assert_eq!(waiter.wait_default(), Ok(()));
            assert_eq!(waiter.get_counter(), 0);
        }
    }

    #[test]
    fn test_released_waiter_lets_late_callers_through() {
        let waiter = Arc::new(Waiter::new(2, false));

        assert!(run(&waiter, 2, DEFAULT_TIMEOUT).iter().all(Result::is_ok));
        assert_eq!(waiter.wait(Duration::from_millis(1)), Ok(()));
        assert_eq!(waiter.get_counter(), 2);
    }

    #[test]
    fn test_auto_reset_rounds() {
        let waiter = Arc::new(Waiter::new(3, true));

        for _ in 0..5 {
            let xs = run(&waiter, 3, DEFAULT_TIMEOUT);

            assert!(xs.iter().all(Result::is_ok));
            assert_eq!(waiter.get_counter(), 0);
        }
    }

    #[test]
    fn test_auto_reset_threads_reuse_waiter() {
        let waiter = Arc::new(Waiter::new(4, true));
        let rounds = 20;
        let phase = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let waiter = Arc::clone(&waiter);
                let phase = Arc::clone(&phase);

                thread::spawn(move || {
                    for round in 0..rounds {
                        phase.fetch_add(1, Ordering::SeqCst);
                        waiter.wait_default().unwrap();

                        // Nobody can start round + 1 before everyone arrived in round.
                        assert!(phase.load(Ordering::SeqCst) >= (round + 1) * 4);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(phase.load(Ordering::SeqCst), rounds * 4);
        assert_eq!(waiter.get_counter(), 0);
    }

    #[test]
    fn test_counter_never_exceeds_target() {
        let waiter = Arc::new(Waiter::new(3, false));
        let done = Arc::new(AtomicBool::new(false));

        let monitor = {
            let waiter = Arc::clone(&waiter);
            let done = Arc::clone(&done);

            thread::spawn(move || {
                let mut max = 0;

                while !done.load(Ordering::SeqCst) {
                    max = usize::max(max, waiter.get_counter());
                }

                usize::max(max, waiter.get_counter())
            })
        };

        let start = Instant::now();
        let xs = run(&waiter, 3, DEFAULT_TIMEOUT);

        assert!(start.elapsed() < DEFAULT_TIMEOUT);
        assert!(xs.iter().all(Result::is_ok));

        let counter = waiter.get_counter();
        assert!(counter == 0 || counter == 3);

        done.store(true, Ordering::SeqCst);

        assert!(monitor.join().unwrap() <= 3);
    }

    #[test]
    #[should_panic]
    fn test_zero_target() {
        Waiter::new(0, false);
    }
}
