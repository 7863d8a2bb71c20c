use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::metrics::Metrics;

const MAX_LOGGED_BODY: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("remote returned HTTP {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to decode response: {source}; body: {body}")]
    Decode {
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid base url '{0}'")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_in_flight: usize,
    pub max_retries: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_in_flight: 4,
            max_retries: 0,
        }
    }
}

#[derive(Debug)]
struct Limiter {
    max: usize,
    in_flight: Mutex<usize>,
    cv: Condvar,
}

#[derive(Debug)]
struct Permit<'a> {
    limiter: &'a Limiter,
}

impl Limiter {
    fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            in_flight: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) -> Permit<'_> {
        let mut current = self.in_flight.lock().expect("limiter mutex poisoned");
        while *current >= self.max {
            current = self
                .cv
                .wait(current)
                .expect("limiter condvar wait failed unexpectedly");
        }
        *current += 1;
        Permit { limiter: self }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut current = self
            .limiter
            .in_flight
            .lock()
            .expect("limiter mutex poisoned");
        *current = current.saturating_sub(1);
        self.limiter.cv.notify_one();
    }
}

/// Blocking client shared by the Jira and Bitbucket wrappers: caps requests
/// in flight, counts them, and optionally honours 429/5xx with backoff.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: Client,
    max_retries: usize,
    limiter: Arc<Limiter>,
    metrics: Arc<Metrics>,
}

impl HttpClient {
    pub fn new(settings: &HttpSettings, metrics: Arc<Metrics>) -> Result<Self, TransportError> {
        let http = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            http,
            max_retries: settings.max_retries,
            limiter: Arc::new(Limiter::new(settings.max_in_flight)),
            metrics,
        })
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Sends the request built by `build` and decodes a JSON body.
    pub fn get_json<T, F>(&self, build: F) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self.send_with_retry(|| build(&self.http).send())?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(TransportError::Http {
                status,
                body: truncate_body(&body),
            });
        }

        let body = response.text()?;
        serde_json::from_str(&body).map_err(|source| {
            let short_body = truncate_body(&body);
            tracing::warn!(body = %short_body, "failed decoding response body");
            TransportError::Decode {
                source,
                body: short_body,
            }
        })
    }

    fn send_with_retry<F>(&self, mut send: F) -> Result<Response, TransportError>
    where
        F: FnMut() -> Result<Response, reqwest::Error>,
    {
        let _permit = self.limiter.acquire();
        let mut attempt = 0;
        loop {
            self.metrics.inc_api_request();
            let response = send().map_err(|err| {
                tracing::warn!(attempt = attempt + 1, error = %err, "transport error");
                TransportError::Request(err)
            })?;

            if !is_retryable(response.status()) || attempt >= self.max_retries {
                if !response.status().is_success() {
                    tracing::warn!(
                        status = %response.status(),
                        attempts = attempt + 1,
                        "request completed with error status"
                    );
                }
                return Ok(response);
            }

            let wait = retry_after_or_backoff(&response, attempt);
            tracing::debug!(
                status = %response.status(),
                attempt = attempt + 1,
                wait = ?wait,
                "retryable status"
            );
            self.metrics.inc_retry();
            thread::sleep(wait);
            attempt += 1;
        }
    }
}

pub fn normalize_base_url(raw: &str) -> Result<String, TransportError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TransportError::InvalidBaseUrl(raw.to_string()));
    }

    let mut candidate = trimmed.to_string();

    if candidate.starts_with("https://https//") {
        candidate = candidate.replacen("https://https//", "https://", 1);
    } else if candidate.starts_with("http://http//") {
        candidate = candidate.replacen("http://http//", "http://", 1);
    }

    if candidate.starts_with("https//") {
        candidate = format!("https://{}", candidate.trim_start_matches("https//"));
    } else if candidate.starts_with("http//") {
        candidate = format!("http://{}", candidate.trim_start_matches("http//"));
    } else if !candidate.starts_with("https://") && !candidate.starts_with("http://") {
        candidate = format!("https://{candidate}");
    }

    let parsed = reqwest::Url::parse(&candidate)
        .map_err(|_| TransportError::InvalidBaseUrl(raw.to_string()))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_LOGGED_BODY {
        let head: String = body.chars().take(MAX_LOGGED_BODY).collect();
        format!("{head}...")
    } else {
        body.to_string()
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after_or_backoff(response: &Response, attempt: usize) -> Duration {
    if let Some(header) = response.headers().get("Retry-After") {
        if let Ok(value) = header.to_str() {
            if let Ok(seconds) = value.parse::<u64>() {
                return Duration::from_secs(seconds.min(30));
            }
        }
    }

    let seconds = 1_u64 << attempt.min(4);
    Duration::from_secs(seconds)
}
