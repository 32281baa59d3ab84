// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use tokio::signal::unix::{signal, SignalKind};
pub use tracing;
use tracing_subscriber::{fmt::Subscriber, EnvFilter};

/// Initialize logging by reading the `RUST_LOG` environment variable.
///
/// When called from inside a tokio runtime, signal handlers are set up as well:
///
/// - `SIGUSR1` will set log level to info.
/// - `SIGUSR2` will set log level to debug.
///
/// Test binaries call this once per test, so a second call is a no-op.
pub fn init() {
    let builder = Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_filter_reloading();

    let handle = builder.reload_handle();

    if builder.try_init().is_err() {
        return;
    }

    let rt = match tokio::runtime::Handle::try_current() {
        Ok(rt) => rt,
        Err(_) => {
            tracing::debug!("No tokio runtime, log level signal handlers disabled");
            return;
        }
    };

    let handle2 = handle.clone();

    rt.spawn(async move {
        let mut stream = match signal(SignalKind::user_defined1()) {
            Ok(x) => x,
            Err(e) => {
                tracing::warn!("Could not listen to SIGUSR1: {}", e);
                return;
            }
        };

        while stream.recv().await.is_some() {
            if let Err(e) = handle2.reload("info") {
                tracing::warn!("Could not reload log filter: {}", e);
            }
        }
    });

    rt.spawn(async move {
        let mut stream = match signal(SignalKind::user_defined2()) {
            Ok(x) => x,
            Err(e) => {
                tracing::warn!("Could not listen to SIGUSR2: {}", e);
                return;
            }
        };

        while stream.recv().await.is_some() {
            if let Err(e) = handle.reload("debug") {
                tracing::warn!("Could not reload log filter: {}", e);
            }
        }
    });
}
