//! HTTP transport abstraction for registry access.
//!
//! The [`Transport`] trait is a single-attempt seam that allows dependency
//! injection and easy testing. Production use wraps the reqwest-backed
//! transport in [`RetryingTransport`], which owns the backoff policy for
//! transient errors and retryable statuses.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use rand::Rng;
use serde::de::DeserializeOwned;

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};

/// Base delay for exponential backoff.
const BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Uniform jitter applied to each backoff delay.
const BACKOFF_JITTER_MS: i64 = 100;
/// No delay ever goes below this floor.
const BACKOFF_FLOOR: Duration = Duration::from_millis(100);

/// A response with status, headers, and a streaming body.
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: BoxStream<'static, RegistryResult<Bytes>>,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"BoxStream<..>")
            .finish()
    }
}

impl HttpResponse {
    /// Build a response from parts.
    pub fn new(
        status: u16,
        headers: Vec<(String, String)>,
        body: BoxStream<'static, RegistryResult<Bytes>>,
    ) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Build a response with an in-memory body (fakes, small payloads).
    pub fn from_bytes(
        status: u16,
        headers: Vec<(String, String)>,
        body: impl Into<Bytes>,
    ) -> Self {
        let bytes = body.into();
        Self::new(status, headers, stream::once(async move { Ok(bytes) }).boxed())
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Look up a header value, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Consume the response into its body stream.
    #[must_use]
    pub fn into_body(self) -> BoxStream<'static, RegistryResult<Bytes>> {
        self.body
    }

    /// Collect the whole body into memory.
    pub async fn body_bytes(self) -> RegistryResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut body = self.body;
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Collect and JSON-decode the body.
    pub async fn json<T: DeserializeOwned>(self) -> RegistryResult<T> {
        let bytes = self.body_bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Single-attempt HTTP GET seam.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET with the given headers; any status is returned as `Ok`.
    async fn get(&self, url: &str, headers: &[(String, String)]) -> RegistryResult<HttpResponse>;
}

/// Production transport: one shared tuned reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the shared client from configuration.
    pub fn new(config: &RegistryConfig) -> RegistryResult<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("modelpull/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30));

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if config.insecure {
            tracing::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> RegistryResult<HttpResponse> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.bytes_stream().map_err(RegistryError::from).boxed();

        Ok(HttpResponse::new(status, headers, body))
    }
}

/// Whether a status code warrants a retry.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// Whether a transport error looks transient.
///
/// Timeouts and connect failures retry, as does anything whose message
/// matches the well-known transient substrings.
#[must_use]
pub fn is_retryable_error(err: &RegistryError) -> bool {
    let RegistryError::Network(e) = err else {
        return false;
    };
    if e.is_timeout() || e.is_connect() {
        return true;
    }
    let message = e.to_string().to_lowercase();
    ["timeout", "tls", "connection reset"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// Backoff before attempt `i + 1`: `500ms · 2^i ± 100ms`, floored at 100ms.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt));
    let jitter = rand::thread_rng().gen_range(-BACKOFF_JITTER_MS..=BACKOFF_JITTER_MS);
    let millis = i64::try_from(base.as_millis())
        .unwrap_or(i64::MAX)
        .saturating_add(jitter);
    Duration::from_millis(u64::try_from(millis).unwrap_or(0)).max(BACKOFF_FLOOR)
}

/// Retry wrapper around any [`Transport`].
///
/// Runs `max(1, retries + 1)` attempts. A retryable status has its body
/// drained before the next attempt so the connection can be reused.
pub struct RetryingTransport<T> {
    inner: T,
    retries: u32,
}

impl<T: Transport> RetryingTransport<T> {
    /// Wrap a transport with the given number of retries (attempts beyond the first).
    pub const fn new(inner: T, retries: u32) -> Self {
        Self { inner, retries }
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingTransport<T> {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> RegistryResult<HttpResponse> {
        let attempts = self.retries.saturating_add(1).max(1);
        let mut last_err: Option<RegistryError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            match self.inner.get(url, headers).await {
                Ok(response) => {
                    let status = response.status();
                    if is_retryable_status(status) {
                        tracing::debug!(url, status, attempt, "retryable status");
                        let _ = response.body_bytes().await;
                        last_err = Some(RegistryError::RequestFailed {
                            status,
                            url: url.to_string(),
                        });
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < attempts {
                        tracing::debug!(url, error = %err, attempt, "transient error, backing off");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(last_err.unwrap_or(RegistryError::RequestFailed {
            status: 0,
            url: url.to_string(),
        }))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Canned response for the fake transport.
    #[derive(Clone)]
    pub struct CannedResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl CannedResponse {
        pub fn ok(body: impl Into<Vec<u8>>) -> Self {
            Self {
                status: 200,
                headers: Vec::new(),
                body: body.into(),
            }
        }

        pub fn status(status: u16) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: Vec::new(),
            }
        }

        #[must_use]
        pub fn with_header(mut self, name: &str, value: &str) -> Self {
            self.headers.push((name.to_string(), value.to_string()));
            self
        }
    }

    /// A recorded request, for assertions on URLs and headers.
    #[derive(Clone, Debug)]
    pub struct RecordedRequest {
        pub url: String,
        pub headers: Vec<(String, String)>,
    }

    impl RecordedRequest {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    /// Fake transport returning canned responses by URL substring.
    ///
    /// Multiple responses registered for the same pattern are served in
    /// order; the last one is sticky.
    #[derive(Default)]
    pub struct FakeTransport {
        responses: Mutex<Vec<(String, VecDeque<CannedResponse>)>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a canned response for URLs containing `pattern`.
        #[must_use]
        pub fn on(self, pattern: &str, response: CannedResponse) -> Self {
            {
                let mut responses = self.responses.lock().unwrap();
                if let Some((_, queue)) = responses.iter_mut().find(|(p, _)| p == pattern) {
                    queue.push_back(response);
                } else {
                    responses.push((pattern.to_string(), VecDeque::from([response])));
                }
            }
            self
        }

        /// All requests seen so far.
        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }

        /// Requests whose URL contains `pattern`.
        pub fn requests_matching(&self, pattern: &str) -> Vec<RecordedRequest> {
            self.requests()
                .into_iter()
                .filter(|r| r.url.contains(pattern))
                .collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn get(
            &self,
            url: &str,
            headers: &[(String, String)],
        ) -> RegistryResult<HttpResponse> {
            self.requests.lock().unwrap().push(RecordedRequest {
                url: url.to_string(),
                headers: headers.to_vec(),
            });

            let canned = {
                let mut responses = self.responses.lock().unwrap();
                responses
                    .iter_mut()
                    .find(|(pattern, _)| url.contains(pattern.as_str()))
                    .map(|(_, queue)| {
                        if queue.len() > 1 {
                            queue.pop_front().unwrap()
                        } else {
                            queue.front().cloned().unwrap()
                        }
                    })
            };

            let canned = canned.ok_or(RegistryError::RequestFailed {
                status: 404,
                url: url.to_string(),
            })?;

            Ok(HttpResponse::from_bytes(
                canned.status,
                canned.headers,
                canned.body,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{CannedResponse, FakeTransport};
    use super::*;
    use std::time::Instant;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(408));
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(599));
        assert!(!is_retryable_status(200));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(401));
    }

    #[test]
    fn backoff_grows_and_respects_floor() {
        for _ in 0..32 {
            let d0 = backoff_delay(0);
            assert!(d0 >= Duration::from_millis(400));
            assert!(d0 <= Duration::from_millis(600));

            let d2 = backoff_delay(2);
            assert!(d2 >= Duration::from_millis(1900));
            assert!(d2 <= Duration::from_millis(2100));

            assert!(backoff_delay(0) >= BACKOFF_FLOOR);
        }
    }

    #[tokio::test]
    async fn retries_on_503_then_succeeds() {
        let inner = FakeTransport::new()
            .on("/manifests/latest", CannedResponse::status(503))
            .on("/manifests/latest", CannedResponse::ok("ok"));
        let transport = RetryingTransport::new(inner, 2);

        let started = Instant::now();
        let response = transport
            .get("https://reg.example/v2/library/m/manifests/latest", &[])
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.body_bytes().await.unwrap(), b"ok");
        // one backoff happened, and it was at least the floor
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let inner = FakeTransport::new().on("/blobs/", CannedResponse::status(503));
        let transport = RetryingTransport::new(inner, 1);

        let err = transport
            .get("https://reg.example/v2/library/m/blobs/sha256:aa", &[])
            .await
            .unwrap_err();
        match err {
            RegistryError::RequestFailed { status, .. } => assert_eq!(status, 503),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_status_is_returned_immediately() {
        let inner = FakeTransport::new().on("/manifests/", CannedResponse::status(404));
        let transport = RetryingTransport::new(inner, 3);

        let response = transport
            .get("https://reg.example/v2/library/m/manifests/latest", &[])
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        // only one attempt was made
        assert_eq!(transport.inner.requests().len(), 1);
    }

    #[tokio::test]
    async fn header_lookup_is_case_insensitive() {
        let response = HttpResponse::from_bytes(
            401,
            vec![("WWW-Authenticate".to_string(), "Bearer realm=\"r\"".to_string())],
            Vec::new(),
        );
        assert_eq!(
            response.header("www-authenticate"),
            Some("Bearer realm=\"r\"")
        );
        assert!(response.header("content-type").is_none());
    }
}
