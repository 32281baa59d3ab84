// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use crate::waiter::{Waiter, WaiterError};
use std::{io, thread};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Waiter(#[from] WaiterError),
    #[error("Worker {0} panicked")]
    Panicked(usize),
    #[error("Could not spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Run `f` on `n` worker threads sharing `waiter`, and collect what each returned.
///
/// Workers get their index and use the waiter to line up phases, e.g. to make sure
/// every writer is running before an fio job is torn down or a volume is moved.
/// All workers are joined before returning; the first failing worker's error wins.
pub fn spawn_workers<T, F>(n: usize, waiter: &Waiter, f: F) -> Result<Vec<T>, WorkerError>
where
    T: Send,
    F: Fn(usize, &Waiter) -> Result<T, WaiterError> + Sync,
{
    let f = &f;

    if n < waiter.target() {
        tracing::warn!(
            "{} workers can not complete a round of {}",
            n,
            waiter.target()
        );
    }

    let results: Vec<Result<T, WorkerError>> = thread::scope(|s| {
        let handles = (0..n)
            .map(|idx| {
                thread::Builder::new()
                    .name(format!("ovs-worker-{}", idx))
                    .spawn_scoped(s, move || f(idx, waiter))
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .enumerate()
            .map(|(idx, h)| match h {
                Ok(h) => match h.join() {
                    Ok(x) => x.map_err(WorkerError::from),
                    Err(_) => Err(WorkerError::Panicked(idx)),
                },
                Err(e) => Err(WorkerError::Spawn(e)),
            })
            .collect()
    });

    tracing::debug!("{} workers joined", n);

    results.into_iter().collect()
}
