// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

pub mod cache;

pub use ovs_manager_env::ApiConfig;
use ovs_request_retry::{linear_policy, retry_future};
use ovs_wire_types::{
    ApiList, EndpointName, StorageRouter, SubmittedTask, TaskId, TaskStatus, Token,
};
pub use reqwest::{header, Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::{fmt::Debug, path::Path, sync::Arc, time::Duration};

use crate::cache::TtlCache;

/// Version negotiation header expected by the management API.
pub const ACCEPT: &str = "application/json; version=*";

const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    InvalidHeaderValue(#[from] header::InvalidHeaderValue),
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
    #[error(transparent)]
    EnvError(#[from] ovs_manager_env::EnvError),
    #[error("Both OVS_API_CLIENT_ID and OVS_API_CLIENT_SECRET are needed to authenticate")]
    IncompleteCredentials,
    #[error("Response did not contain a task id: {0}")]
    MissingTaskId(serde_json::Value),
}

impl ApiClientError {
    /// HTTP status of the failed request, if the server answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiClientError::Reqwest(e) => e.status(),
            _ => None,
        }
    }
}

/// Given a path, constructs a full API url
pub fn create_api_url(base: &Url, path: impl ToString) -> Result<Url, ApiClientError> {
    let mut path = path.to_string();

    let has_extension = Path::new(&path).extension().is_some();

    if !has_extension && !path.ends_with('/') {
        path.push('/');
    }

    let mut path = path.trim_start_matches('/');

    if path.starts_with("api/") {
        path = &path[4..];
    }

    let url = base.join("/api/")?.join(path)?;

    Ok(url)
}

/// Url of a single task. The id is pushed as one percent-encoded path segment.
pub fn create_task_url(base: &Url, id: &TaskId) -> Result<Url, ApiClientError> {
    let mut url = create_api_url(base, TaskStatus::endpoint_name())?;

    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .push(id.as_str())
        .push("");

    Ok(url)
}

/// Client for the management API.
///
/// Cloning is cheap and clones share the token and storagerouter caches.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: Arc<ApiConfig>,
    token: Arc<TtlCache<(), String>>,
    storagerouters: Arc<TtlCache<String, String>>,
}

impl Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("url", &self.config.url.as_str())
            .finish()
    }
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiClientError> {
        if config.client_id.is_some() != config.client_secret.is_some() {
            return Err(ApiClientError::IncompleteCredentials);
        }

        let headers = vec![(header::ACCEPT, header::HeaderValue::from_static(ACCEPT))]
            .into_iter()
            .collect();

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;

        Ok(ApiClient {
            client,
            storagerouters: Arc::new(TtlCache::new(config.storagerouter_cache_ttl)),
            token: Arc::new(TtlCache::new(Duration::from_secs(0))),
            config: Arc::new(config),
        })
    }

    /// Build a client from the `OVS_*` environment variables
    pub fn from_env() -> Result<Self, ApiClientError> {
        Self::new(ApiConfig::from_env()?)
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn api_url(&self, path: impl ToString) -> Result<Url, ApiClientError> {
        create_api_url(&self.config.url, path)
    }

    async fn fetch_token(&self, client_id: &str, secret: &str) -> Result<Token, ApiClientError> {
        let uri = self.api_url("oauth2/token")?;

        tracing::debug!("Requesting API token for client {}", client_id);

        let token: Token = self
            .client
            .post(uri)
            .basic_auth(client_id, Some(secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(token)
    }

    /// Value of the `Authorization` header, fetching a fresh token when the cached one is stale.
    /// Returns `None` when no credentials are configured.
    async fn authorization(&self) -> Result<Option<header::HeaderValue>, ApiClientError> {
        let (client_id, secret) = match (&self.config.client_id, &self.config.client_secret) {
            (Some(id), Some(secret)) => (id, secret),
            _ => return Ok(None),
        };

        let token = match self.token.get(&()) {
            Some(x) => x,
            None => {
                let token = self.fetch_token(client_id, secret).await?;

                let ttl = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);

                self.token.insert_with_ttl((), token.access_token.clone(), ttl);

                token.access_token
            }
        };

        Ok(Some(header::HeaderValue::from_str(&format!(
            "Bearer {}",
            token
        ))?))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Response, ApiClientError> {
        let req = match self.authorization().await? {
            Some(x) => req.header(header::AUTHORIZATION, x),
            None => req,
        };

        let resp = req.send().await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!("API answered 401, dropping cached token");

            self.token.invalidate(&());
        }

        Ok(resp)
    }

    /// Performs a GET to the given API path
    pub async fn get<T: DeserializeOwned + Debug>(
        &self,
        path: impl ToString,
        query: impl serde::Serialize,
    ) -> Result<T, ApiClientError> {
        self.get_url(self.api_url(path)?, query).await
    }

    async fn get_url<T: DeserializeOwned + Debug>(
        &self,
        uri: Url,
        query: impl serde::Serialize,
    ) -> Result<T, ApiClientError> {
        tracing::debug!("GET to {} {}", uri, serde_json::json!(query));

        let resp = self
            .send(self.client.get(uri).query(&query))
            .await?
            .error_for_status()?;

        let json = resp.json().await?;

        tracing::debug!("Resp: {:?}", json);

        Ok(json)
    }

    /// Performs a GET to the given API path.
    /// If the request fails, this fn will try 3 times in total,
    /// sleeping between each attempt
    pub async fn get_retry<T: DeserializeOwned + Debug>(
        &self,
        path: impl ToString,
        query: impl serde::Serialize,
    ) -> Result<T, ApiClientError> {
        let path = path.to_string();
        let query = &query;

        retry_future(|_| self.get(path.clone(), query), linear_policy(3)).await
    }

    /// Performs a POST to the given API path
    /// This call will *not* treat unsuccessful status codes
    /// as an error.
    pub async fn post(
        &self,
        path: impl ToString,
        body: impl serde::Serialize,
    ) -> Result<Response, ApiClientError> {
        let uri = self.api_url(path)?;

        let resp = self.send(self.client.post(uri).json(&body)).await?;

        tracing::debug!("Resp: {:?}", resp);

        Ok(resp)
    }

    /// POSTs to an endpoint that starts asynchronous work and returns the id of the spawned task
    pub async fn post_task(
        &self,
        path: impl ToString,
        body: impl serde::Serialize,
    ) -> Result<TaskId, ApiClientError> {
        let resp = self.post(path, body).await?.error_for_status()?;

        let body: serde_json::Value = serde_json::from_slice(&resp.bytes().await?)?;

        let submitted: SubmittedTask = serde_json::from_value(body.clone())
            .map_err(|_| ApiClientError::MissingTaskId(body))?;

        Ok(submitted.into())
    }

    /// Performs a PUT to the given API path
    pub async fn put(
        &self,
        path: impl ToString,
        body: impl serde::Serialize,
    ) -> Result<Response, ApiClientError> {
        let uri = self.api_url(path)?;

        Ok(self
            .send(self.client.put(uri).json(&body))
            .await?
            .error_for_status()?)
    }

    /// Performs a DELETE to the given API path
    pub async fn delete(&self, path: impl ToString) -> Result<Response, ApiClientError> {
        let uri = self.api_url(path)?;

        Ok(self.send(self.client.delete(uri)).await?.error_for_status()?)
    }

    /// Reads the current state of a task. Never mutates it.
    pub async fn get_task(&self, id: &TaskId) -> Result<TaskStatus, ApiClientError> {
        let uri = create_task_url(&self.config.url, id)?;

        self.get_url(uri, Vec::<(String, String)>::new()).await
    }

    /// Resolve a storagerouter ip to its guid.
    ///
    /// Lookups are served from a cache refreshed from the API on a miss.
    pub async fn storagerouter_guid(&self, ip: &str) -> Result<Option<String>, ApiClientError> {
        if let Some(guid) = self.storagerouters.get(&ip.to_string()) {
            return Ok(Some(guid));
        }

        let xs: ApiList<StorageRouter> = self
            .get_retry(StorageRouter::endpoint_name(), [("contents", "ip")])
            .await?;

        self.storagerouters.replace_all(
            xs.data
                .into_iter()
                .filter_map(|StorageRouter { guid, ip, .. }| ip.map(|ip| (ip, guid))),
        );

        Ok(self.storagerouters.get(&ip.to_string()))
    }

    /// Forget every cached storagerouter, e.g. after a node was added or removed
    pub fn invalidate_storagerouters(&self) {
        self.storagerouters.clear();
    }
}
