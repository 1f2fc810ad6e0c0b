//! Outbound HTTP transport.
//!
//! Every request is a `POST` with `Content-Type: application/json`. Responses are
//! classified into success, transient failure (retried) and permanent failure.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::notification::Payload;
use crate::{Error, Result};

const USER_AGENT_VALUE: &str = concat!("lnpulse/", env!("CARGO_PKG_VERSION"));

/// Longest response body excerpt kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another component installed a provider first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Sends rendered payloads to endpoints.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// POST `payload` to `url`.
    ///
    /// Returns the HTTP status on 2xx, `Error::TransientDelivery` for retryable
    /// failures and `Error::PermanentDelivery` otherwise.
    async fn deliver(&self, url: &str, payload: &Payload) -> Result<u16>;
}

/// reqwest-backed transport with a hard per-request timeout.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        install_rustls_provider();
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            // A redirect is not an acknowledgement; 3xx is classified like any other status.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    fn build_headers(payload: &Payload) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        for (name, value) in &payload.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<HeaderName>(),
                value.parse::<HeaderValue>(),
            ) {
                headers.insert(name, value);
            }
        }
        headers
    }
}

/// Parse `Retry-After` (seconds), falling back to Discord's `X-RateLimit-Reset-After`.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    ["retry-after", "x-ratelimit-reset-after"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.trim().parse::<f64>().ok())
        .find(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Classify a non-2xx response.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Error {
    let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    let message = if excerpt.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), excerpt)
    };

    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        Error::PermanentDelivery {
            status: Some(status.as_u16()),
            message,
        }
    } else {
        Error::TransientDelivery {
            status: Some(status.as_u16()),
            message,
            retry_after,
        }
    }
}

fn classify_request_error(err: &reqwest::Error) -> Error {
    let message = if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        format!("request failed: {}", err)
    };
    Error::TransientDelivery {
        status: None,
        message,
        retry_after: None,
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(&self, url: &str, payload: &Payload) -> Result<u16> {
        let response = self
            .client
            .post(url)
            .headers(Self::build_headers(payload))
            .body(payload.body.clone())
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, retry_after, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        let err = classify_status(StatusCode::NOT_FOUND, None, "no such hook");
        assert!(matches!(err, Error::PermanentDelivery { status: Some(404), .. }));
        assert!(err.to_string().contains("no such hook"));

        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, None, ""),
            Error::TransientDelivery { status: Some(429), .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, None, ""),
            Error::TransientDelivery { status: Some(503), .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, ""),
            Error::PermanentDelivery { status: Some(401), .. }
        ));
        // Redirects are never followed, so a 3xx is retried.
        assert!(classify_status(StatusCode::FOUND, None, "").is_retryable());
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert("x-ratelimit-reset-after", HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));

        headers.insert("retry-after", HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_build_headers() {
        let payload = Payload {
            body: "{}".to_string(),
            headers: vec![
                ("X-Webhook-Signature".to_string(), "sha256=ab".to_string()),
                ("bad header".to_string(), "x".to_string()),
            ],
        };
        let headers = HttpTransport::build_headers(&payload);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get("x-webhook-signature").unwrap(), "sha256=ab");
        assert!(headers.get(USER_AGENT).unwrap().to_str().unwrap().starts_with("lnpulse/"));
        assert_eq!(headers.len(), 3);
    }
}
