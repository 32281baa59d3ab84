// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use std::{env, time::Duration};
use url::Url;

pub const API_URL: &str = "OVS_API_URL";
pub const API_CLIENT_ID: &str = "OVS_API_CLIENT_ID";
pub const API_CLIENT_SECRET: &str = "OVS_API_CLIENT_SECRET";
pub const API_VERIFY_SSL: &str = "OVS_API_VERIFY_SSL";
pub const API_REQUEST_TIMEOUT_SECS: &str = "OVS_API_REQUEST_TIMEOUT_SECS";
pub const TASK_POLL_INTERVAL_MS: &str = "OVS_TASK_POLL_INTERVAL_MS";
pub const TASK_TIMEOUT_SECS: &str = "OVS_TASK_TIMEOUT_SECS";
pub const STORAGEROUTER_CACHE_TTL_SECS: &str = "OVS_STORAGEROUTER_CACHE_TTL_SECS";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_STORAGEROUTER_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("{0} environment variable is required.")]
    Missing(&'static str),
    #[error("{name} environment variable is not valid: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
}

fn empty_str_to_none(x: String) -> Option<String> {
    match x.trim() {
        "" => None,
        _ => Some(x),
    }
}

fn string_to_bool(x: &str) -> bool {
    matches!(x.trim().to_lowercase().as_ref(), "true" | "1" | "yes")
}

fn parse_u64(name: &'static str, value: String) -> Result<u64, EnvError> {
    value
        .trim()
        .parse()
        .map_err(|_| EnvError::Invalid { name, value })
}

/// Get the environment variable, treating empty values as unset
fn get_var(name: &str) -> Option<String> {
    env::var(name).ok().and_then(empty_str_to_none)
}

/// Settings needed to reach and poll the management API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub url: Url,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub verify_ssl: bool,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// `None` means wait for tasks indefinitely.
    pub task_timeout: Option<Duration>,
    pub storagerouter_cache_ttl: Duration,
}

impl ApiConfig {
    /// Config pointing at `url` with every other setting at its default.
    pub fn new(url: Url) -> Self {
        ApiConfig {
            url,
            client_id: None,
            client_secret: None,
            verify_ssl: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            task_timeout: None,
            storagerouter_cache_ttl: DEFAULT_STORAGEROUTER_CACHE_TTL,
        }
    }

    pub fn with_credentials(mut self, client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(secret.into());
        self
    }

    pub fn from_env() -> Result<Self, EnvError> {
        Self::from_lookup(get_var)
    }

    /// Builds the config from an arbitrary variable source.
    /// Empty values must already be mapped to `None` by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EnvError> {
        let url = lookup(API_URL).ok_or(EnvError::Missing(API_URL))?;
        let mut config = ApiConfig::new(Url::parse(&url)?);

        config.client_id = lookup(API_CLIENT_ID);
        config.client_secret = lookup(API_CLIENT_SECRET);

        if let Some(x) = lookup(API_VERIFY_SSL) {
            config.verify_ssl = string_to_bool(&x);
        }

        if let Some(x) = lookup(API_REQUEST_TIMEOUT_SECS) {
            config.request_timeout = Duration::from_secs(parse_u64(API_REQUEST_TIMEOUT_SECS, x)?);
        }

        if let Some(x) = lookup(TASK_POLL_INTERVAL_MS) {
            let ms = parse_u64(TASK_POLL_INTERVAL_MS, x.clone())?;

            if ms == 0 {
                return Err(EnvError::Invalid {
                    name: TASK_POLL_INTERVAL_MS,
                    value: x,
                });
            }

            config.poll_interval = Duration::from_millis(ms);
        }

        config.task_timeout = lookup(TASK_TIMEOUT_SECS)
            .map(|x| parse_u64(TASK_TIMEOUT_SECS, x))
            .transpose()?
            .map(Duration::from_secs);

        if let Some(x) = lookup(STORAGEROUTER_CACHE_TTL_SECS) {
            config.storagerouter_cache_ttl =
                Duration::from_secs(parse_u64(STORAGEROUTER_CACHE_TTL_SECS, x)?);
        }

        Ok(config)
    }
}
