//! # HTTP API Client
//!
//! Thin wrapper around `reqwest` + `reqwest-middleware` that joins requests
//! onto a base URL, retries transient failures with exponential backoff and
//! hands back non-2xx responses with their body text instead of failing.

use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{EventSubError, Result};

/// Outcome of one HTTP exchange.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// Deserialized body of a successful response; `None` when it was empty.
    pub data: Option<T>,
    /// Raw body of a failed response.
    pub error_body: Option<String>,
    pub status: u16,
    pub success: bool,
    pub headers: HeaderMap,
}

pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl ApiClient {
    /// `default_headers` go out with every request.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        max_retries: u32,
        default_headers: HeaderMap,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| EventSubError::Config(format!("invalid base url {base_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| EventSubError::Http(e.to_string()))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let inner = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sends one request. Transport and (de)serialization failures are
    /// errors; an HTTP error status is not.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        bearer: Option<&str>,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| EventSubError::Http(format!("cannot join {path}: {e}")))?;
        let mut req = self.inner.request(method, url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(token) = bearer {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            let json = serde_json::to_string(body).map_err(|e| EventSubError::Http(e.to_string()))?;
            req = req.header(CONTENT_TYPE, "application/json").body(json);
        }

        let response = req
            .send()
            .await
            .map_err(|e| EventSubError::Http(e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| EventSubError::Http(e.to_string()))?;
            let data = if bytes.is_empty() {
                None
            } else {
                Some(serde_json::from_slice::<T>(&bytes).map_err(|e| {
                    EventSubError::Http(format!("unexpected response body: {e}"))
                })?)
            };
            Ok(ApiResponse {
                data,
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers,
            })
        } else {
            let error_body = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body,
                status: status.as_u16(),
                success: false,
                headers,
            })
        }
    }
}
