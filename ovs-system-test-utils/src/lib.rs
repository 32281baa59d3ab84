// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

pub mod waiter;
pub mod workers;

pub use waiter::{Waiter, WaiterError, DEFAULT_TIMEOUT};
pub use workers::{spawn_workers, WorkerError};
