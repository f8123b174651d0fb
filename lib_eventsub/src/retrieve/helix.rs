//! Helix EventSub subscriptions endpoint as a [`SubscriptionApi`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::api_client::{ApiClient, ApiResponse};
use crate::collaborators::SubscriptionApi;
use crate::config::EventSubConfig;
use crate::error::{EventSubError, Result};
use crate::models::wire::{SubscriptionRequest, SubscriptionResponse};
use crate::models::Subscription;

pub struct HelixClient {
    api: ApiClient,
}

impl HelixClient {
    pub fn new(config: &EventSubConfig) -> Result<Self> {
        let client_id = HeaderValue::from_str(&config.client_id)
            .map_err(|e| EventSubError::Config(format!("client id is not a valid header: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("client-id"), client_id);
        let api = ApiClient::new(
            &config.subscriptions_url,
            config.http_timeout,
            config.http_max_retries,
            headers,
        )?;
        Ok(Self { api })
    }
}

fn api_error<T>(response: ApiResponse<T>) -> EventSubError {
    EventSubError::Api {
        status: response.status,
        body: response.error_body.unwrap_or_default(),
    }
}

#[async_trait]
impl SubscriptionApi for HelixClient {
    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
        access_token: &str,
    ) -> Result<Subscription> {
        let response: ApiResponse<SubscriptionResponse> = self
            .api
            .request(Method::POST, "", &[], Some(access_token), Some(request))
            .await?;
        if !response.success {
            return Err(api_error(response));
        }
        let created = response
            .data
            .and_then(|body| body.data.into_iter().next())
            .ok_or_else(|| EventSubError::Http("create response carried no subscription".into()))?;
        debug!(subscription_id = %created.id, status = %created.status, "provider created subscription");
        Ok(created.into())
    }

    async fn delete_subscription(&self, subscription_id: &str, access_token: &str) -> Result<()> {
        let response: ApiResponse<Value> = self
            .api
            .request::<Value, Value>(
                Method::DELETE,
                "",
                &[("id", subscription_id)],
                Some(access_token),
                None,
            )
            .await?;
        match response.status {
            _ if response.success => Ok(()),
            404 => Err(EventSubError::SubscriptionNotFound(subscription_id.to_string())),
            _ => Err(api_error(response)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog;
    use crate::retrieve::testing::serve_once;

    fn client(base: &str) -> HelixClient {
        let mut config = EventSubConfig::with_client_id("cid");
        config.subscriptions_url = base.to_string();
        config.http_max_retries = 0;
        HelixClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn create_returns_first_subscription() {
        let body = r#"{"data":[{"id":"sub-1","status":"enabled","type":"stream.online","version":"1","condition":{"broadcaster_user_id":"42"},"created_at":"2024-01-01T00:00:00Z","transport":{"method":"websocket","session_id":"sess"},"cost":0}],"total":1,"total_cost":0,"max_total_cost":10000}"#;
        let (base, request) = serve_once("202 Accepted", body).await;

        let request_body = SubscriptionRequest::new(&catalog::stream_online("42"), "sess");
        let created = client(&base)
            .create_subscription(&request_body, "tok")
            .await
            .unwrap();
        assert_eq!(created.id, "sub-1");
        assert_eq!(created.subscription_type, "stream.online");

        let raw = request.await.unwrap().to_lowercase();
        assert!(raw.contains("client-id: cid"));
        assert!(raw.contains("authorization: bearer tok"));
        assert!(raw.contains(r#""session_id":"sess""#));
    }

    #[tokio::test]
    async fn delete_maps_404_to_not_found() {
        let (base, request) = serve_once("404 Not Found", r#"{"error":"Not Found"}"#).await;
        let err = client(&base)
            .delete_subscription("gone", "tok")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(request.await.unwrap().starts_with("DELETE /?id=gone "));
    }

    #[tokio::test]
    async fn create_failure_carries_status_and_body() {
        let (base, _request) = serve_once("409 Conflict", "subscription already exists").await;
        let request_body = SubscriptionRequest::new(&catalog::stream_offline("42"), "sess");
        match client(&base).create_subscription(&request_body, "tok").await {
            Err(EventSubError::Api { status, body }) => {
                assert_eq!(status, 409);
                assert_eq!(body, "subscription already exists");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }
}
