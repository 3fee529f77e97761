//! Webhook DNS provider
//!
//! Talks to a small record API, typically the platform's own DNS service:
//!
//! ```text
//! POST   {url}/records                      {"domain", "record_name", "record_type", "record_value", "ttl"}
//!                                           -> {"record_id": "..."}
//! DELETE {url}/records/{record_id}?domain={domain}
//! ```
//!
//! The token goes out as `Authorization: Bearer <token>` unless a custom
//! header name is configured.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use certpilot_config::DnsProviderConfig;

use super::provider::{DnsProvider, DnsProviderError, DnsResult, CHALLENGE_TTL};

pub struct WebhookProvider {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    token: Option<String>,
    timeout: Duration,
}

impl WebhookProvider {
    pub fn new(
        base_url: &str,
        auth_header: Option<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> DnsResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            DnsProviderError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
            token,
            timeout,
        })
    }

    /// Build from configuration, resolving `token-env` now
    pub fn from_config(config: &DnsProviderConfig) -> DnsResult<Self> {
        let token = match (&config.token, &config.token_env) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(var)) => Some(std::env::var(var).map_err(|_| {
                DnsProviderError::Configuration(format!(
                    "DNS provider token variable '{}' is not set",
                    var
                ))
            })?),
            (None, None) => None,
        };

        Self::new(
            &config.url,
            config.auth_header.clone(),
            token,
            Duration::from_secs(config.api_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.auth_header, &self.token) {
            (Some(header), Some(token)) => request.header(header.as_str(), token.as_str()),
            (None, Some(token)) => request.bearer_auth(token),
            _ => request,
        }
    }

    fn request_error(&self, e: reqwest::Error) -> DnsProviderError {
        if e.is_timeout() {
            DnsProviderError::ApiRequest(format!(
                "Webhook request timed out after {}s",
                self.timeout.as_secs()
            ))
        } else {
            DnsProviderError::ApiRequest(format!("Webhook request failed: {}", e))
        }
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[async_trait]
impl DnsProvider for WebhookProvider {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        record_value: &str,
    ) -> DnsResult<String> {
        debug!(domain = %domain, record_name = %record_name, "Creating TXT record via webhook");

        let request = CreateRecordRequest {
            domain,
            record_name,
            record_type: "TXT",
            record_value,
            ttl: CHALLENGE_TTL,
        };
        let response = self
            .authorize(
                self.client
                    .post(format!("{}/records", self.base_url))
                    .json(&request),
            )
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if is_auth_failure(status) {
            return Err(DnsProviderError::Authentication(format!(
                "webhook returned HTTP {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::RecordCreation {
                record_name: format!("{}.{}", record_name, domain),
                message: format!("HTTP {} - {}", status, body),
            });
        }

        let created: CreateRecordResponse =
            response
                .json()
                .await
                .map_err(|e| DnsProviderError::RecordCreation {
                    record_name: format!("{}.{}", record_name, domain),
                    message: format!("Failed to parse webhook response: {}", e),
                })?;

        debug!(record_id = %created.record_id, "TXT record created via webhook");
        Ok(created.record_id)
    }

    async fn delete_txt_record(&self, domain: &str, record_id: &str) -> DnsResult<()> {
        debug!(domain = %domain, record_id = %record_id, "Deleting TXT record via webhook");

        let response = self
            .authorize(
                self.client
                    .delete(format!("{}/records/{}", self.base_url, record_id))
                    .query(&[("domain", domain)]),
            )
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(record_id = %record_id, "TXT record already gone");
            return Ok(());
        }
        if is_auth_failure(status) {
            return Err(DnsProviderError::Authentication(format!(
                "webhook returned HTTP {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::RecordDeletion {
                record_id: record_id.to_string(),
                message: format!("HTTP {} - {}", status, body),
            });
        }

        Ok(())
    }
}

// Never prints the token.
impl std::fmt::Debug for WebhookProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookProvider")
            .field("base_url", &self.base_url)
            .field("auth_header", &self.auth_header)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    domain: &'a str,
    record_name: &'a str,
    record_type: &'a str,
    record_value: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    record_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::header::{AUTHORIZATION, CONTENT_TYPE};
    use http::{Method, Request, Response};
    use http_body_util::{BodyExt, Full};
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use parking_lot::Mutex;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    struct SeenRequest {
        method: Method,
        uri: String,
        auth: Option<String>,
        body: String,
    }

    /// Local record API answering every request with `status` and `reply`
    async fn record_api(
        status: StatusCode,
        reply: &'static str,
    ) -> (String, Arc<Mutex<Vec<SeenRequest>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen: Arc<Mutex<Vec<SeenRequest>>> = Arc::default();
        let log = Arc::clone(&seen);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let log = Arc::clone(&log);
                        async move {
                            let method = req.method().clone();
                            let uri = req.uri().to_string();
                            let auth = req
                                .headers()
                                .get(AUTHORIZATION)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            let body = req.into_body().collect().await.unwrap().to_bytes();
                            log.lock().push(SeenRequest {
                                method,
                                uri,
                                auth,
                                body: String::from_utf8_lossy(&body).into_owned(),
                            });
                            Ok::<_, Infallible>(
                                Response::builder()
                                    .status(status)
                                    .header(CONTENT_TYPE, "application/json")
                                    .body(Full::new(Bytes::from_static(reply.as_bytes())))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        (format!("http://{}/", addr), seen)
    }

    fn provider(url: &str, token: Option<&str>) -> WebhookProvider {
        WebhookProvider::new(
            url,
            None,
            token.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_posts_record_with_bearer_token() {
        let (url, seen) = record_api(StatusCode::CREATED, r#"{"record_id":"rec-1"}"#).await;
        let provider = provider(&url, Some("s3cret"));

        let id = provider
            .create_txt_record("example.com", "_acme-challenge", "digest-value")
            .await
            .unwrap();
        assert_eq!(id, "rec-1");

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, Method::POST);
        assert_eq!(seen[0].uri, "/records");
        assert_eq!(seen[0].auth.as_deref(), Some("Bearer s3cret"));

        let body: serde_json::Value = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(body["domain"], "example.com");
        assert_eq!(body["record_name"], "_acme-challenge");
        assert_eq!(body["record_type"], "TXT");
        assert_eq!(body["record_value"], "digest-value");
        assert_eq!(body["ttl"], 60);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_record() {
        let (url, seen) = record_api(StatusCode::NOT_FOUND, "{}").await;
        let provider = provider(&url, None);

        provider
            .delete_txt_record("example.com", "rec-1")
            .await
            .unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen[0].method, Method::DELETE);
        assert_eq!(seen[0].uri, "/records/rec-1?domain=example.com");
        assert_eq!(seen[0].auth, None);
    }

    #[tokio::test]
    async fn test_rejected_token() {
        let (url, _seen) = record_api(StatusCode::UNAUTHORIZED, "{}").await;
        let provider = provider(&url, Some("wrong"));

        let err = provider
            .create_txt_record("example.com", "_acme-challenge", "v")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsProviderError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_server_error_on_create() {
        let (url, _seen) = record_api(StatusCode::INTERNAL_SERVER_ERROR, "zone locked").await;
        let provider = provider(&url, None);

        let err = provider
            .create_txt_record("example.com", "_acme-challenge", "v")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("_acme-challenge.example.com"));
        assert!(err.to_string().contains("zone locked"));
    }

    #[test]
    fn test_from_config_resolves_token() {
        let mut config = DnsProviderConfig::new("https://dns.example.com/api/");
        config.token_env = Some("CERTPILOT_TEST_DNS_TOKEN_UNSET".to_string());
        assert!(matches!(
            WebhookProvider::from_config(&config),
            Err(DnsProviderError::Configuration(_))
        ));

        config.token = Some("inline".to_string());
        let provider = WebhookProvider::from_config(&config).unwrap();
        assert_eq!(provider.base_url(), "https://dns.example.com/api");
        assert_eq!(provider.token.as_deref(), Some("inline"));
        assert!(!format!("{:?}", provider).contains("inline"));
    }
}
