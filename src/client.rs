use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUEST_ERRORS, CLIENT_REQUEST_RETRIES, CLIENT_REQUESTS};
use crate::sse::process_sse;
use crate::types::{ChatRequest, ChatResponse, StreamEvent};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// The name of the environment variable consulted for the API key.
pub const API_KEY_ENV: &str = "PARLEY_API_KEY";

/// The upstream seam for everything that talks to a model provider.
///
/// Sessions are generic over this trait so that interactive behavior can be
/// exercised without a network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request and returns the complete reply text.
    async fn send(&self, req: &ChatRequest, use_cache: bool) -> Result<String>;

    /// Sends a request and returns a stream of incremental events.
    async fn stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

/// Client for the Anthropic API.
#[derive(Debug, Clone)]
pub struct Anthropic {
    api_key: String,
    client: ReqwestClient,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
    cache: Option<ResponseCache>,
}

impl Anthropic {
    /// Create a new Anthropic client.
    ///
    /// The API key can be provided directly or read from the PARLEY_API_KEY
    /// environment variable.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(
        api_key: Option<String>,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => env::var(API_KEY_ENV).map_err(|_| {
                Error::authentication(
                    "API key not provided and PARLEY_API_KEY environment variable not set",
                )
            })?,
        };

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            api_key,
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            timeout,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            cache: None,
        })
    }

    /// Attach a response cache consulted by [`Transport::send`].
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the retry budget for transient failures.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| Error::authentication("API key contains invalid characters"))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_API_VERSION),
        );
        Ok(headers)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|val| val.to_str().ok())
            .map(String::from);

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        #[derive(Deserialize)]
        struct ErrorResponse {
            error: Option<ErrorDetail>,
        }

        #[derive(Deserialize)]
        struct ErrorDetail {
            #[serde(rename = "type")]
            error_type: Option<String>,
            message: Option<String>,
            param: Option<String>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };

        let parsed_error = serde_json::from_str::<ErrorResponse>(&error_body).ok();
        let error_type = parsed_error
            .as_ref()
            .and_then(|e| e.error.as_ref())
            .and_then(|e| e.error_type.clone());
        let error_message = parsed_error
            .as_ref()
            .and_then(|e| e.error.as_ref())
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| error_body.clone());
        let error_param = parsed_error
            .as_ref()
            .and_then(|e| e.error.as_ref())
            .and_then(|e| e.param.clone());

        match status_code {
            400 => Error::bad_request(error_message, error_param),
            401 | 403 => Error::authentication(error_message),
            404 => Error::not_found(error_message),
            408 => Error::timeout(error_message, None),
            429 => Error::rate_limit(error_message, retry_after),
            500 => Error::internal_server(error_message, request_id),
            502..=504 => Error::service_unavailable(error_message, retry_after),
            _ => Error::api(status_code, error_type, error_message, request_id),
        }
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {}", e),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
        }
    }

    /// Issue the request once, with no retry or cache involvement.
    async fn dispatch_once(&self, req: &ChatRequest) -> Result<String> {
        let url = format!("{}messages", self.base_url);

        CLIENT_REQUESTS.click();
        let response = self
            .client
            .post(&url)
            .headers(self.default_headers()?)
            .json(req)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        let body = response.json::<ChatResponse>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {}", e),
                Some(Box::new(e)),
            )
        })?;
        Ok(body.text())
    }
}

#[async_trait]
impl Transport for Anthropic {
    async fn send(&self, req: &ChatRequest, use_cache: bool) -> Result<String> {
        let cache_key = if use_cache {
            self.cache
                .as_ref()
                .and_then(|cache| req.last_user_content().map(|prompt| (cache, prompt)))
        } else {
            None
        };

        if let Some((cache, prompt)) = cache_key {
            if let Some(hit) = cache.get(&req.model, prompt, req.temperature) {
                return Ok(hit);
            }
        }

        let text = with_retries(self.max_retries, self.base_delay, || {
            self.dispatch_once(req)
        })
        .await?;

        if let Some((cache, prompt)) = cache_key {
            cache.set(&req.model, prompt, req.temperature, &text)?;
        }
        Ok(text)
    }

    async fn stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let req = req.clone().with_stream(true);
        let url = format!("{}messages", self.base_url);

        let mut headers = self.default_headers()?;
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );

        CLIENT_REQUESTS.click();
        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        Ok(process_sse(response.bytes_stream()).boxed())
    }
}

/// Run `op` until it succeeds, a non-transient error occurs, or the retry
/// budget is exhausted.
///
/// Attempt `n` (counted from zero) sleeps `base_delay * 2^n` plus up to half
/// a second of jitter before retrying. Only errors whose
/// [`Error::is_transient`] is true are retried; everything else propagates
/// immediately.
async fn with_retries<F, Fut, T>(max_retries: u32, base_delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                CLIENT_REQUEST_ERRORS.click();
                if !err.is_transient() || attempt >= max_retries {
                    return Err(err);
                }
                CLIENT_REQUEST_RETRIES.click();
                let jitter = rand::thread_rng().gen_range(0.0..0.5);
                let delay = base_delay.mul_f64(f64::from(1u32 << attempt))
                    + Duration::from_secs_f64(jitter);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn client_requires_an_api_key() {
        // Scope the env var away so the constructor has nothing to fall
        // back on.
        unsafe { env::remove_var(API_KEY_ENV) };
        let result = Anthropic::new(None);
        assert!(matches!(result, Err(Error::Authentication { .. })));
    }

    #[test]
    fn client_accepts_an_explicit_key() {
        let client = Anthropic::new(Some("sk-test".to_string())).unwrap();
        assert_eq!(client.api_key, "sk-test");
        assert_eq!(client.base_url, DEFAULT_API_URL);
        assert_eq!(client.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn with_options_overrides_defaults() {
        let client = Anthropic::with_options(
            Some("sk-test".to_string()),
            Some("https://example.com/v1/".to_string()),
            Some(Duration::from_secs(30)),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://example.com/v1/");
        assert_eq!(client.timeout, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, Duration::from_secs(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::rate_limit("slow down", None))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(3, Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::connection("refused", None)) }
        })
        .await;
        assert!(result.unwrap_err().is_connection());
        // One initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(3, Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::authentication("bad key")) }
        })
        .await;
        assert!(result.unwrap_err().is_authentication());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
