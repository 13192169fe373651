//! Thin HTTP wrapper around one downstream service.
//!
//! A [`ServiceClient`] owns a fixed base URL and a shared `reqwest::Client`. It forwards the
//! caller's `Authorization` header verbatim, attaches an idempotency key when one is given and
//! classifies every failure into a [`ServiceError`]. It does not retry; see
//! [`crate::retry::RetryPolicy`] for the steps that do.

use crate::constants::IDEMPOTENCY_KEY_HEADER;
use crate::error::{CoreError, CoreResult};
use reqwest::{header::AUTHORIZATION, Method, StatusCode, Url};
use serde_json::Value;

/// The inbound `Authorization` header value, forwarded as-is to downstream services.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw header value byte for byte; blank values carry no credential.
    pub fn from_header_value(value: &str) -> Option<Self> {
        (!value.trim().is_empty()).then(|| Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Connection-level failure: DNS, refused, reset, timeout.
    #[error("{service} service unreachable: {source}")]
    Unreachable {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// Non-2xx answer.
    #[error("{service} service rejected the request with status {status}")]
    RemoteRejected {
        service: &'static str,
        status: u16,
        body: Value,
    },
    /// 2xx answer whose body could not be understood.
    #[error("{service} service returned a malformed response: {reason}")]
    RemoteMalformed {
        service: &'static str,
        reason: String,
    },
}

impl ServiceError {
    /// Worth another attempt: the service was unreachable, throttled or failed internally.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Unreachable { .. } => true,
            ServiceError::RemoteRejected { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            ServiceError::RemoteMalformed { .. } => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ServiceError::RemoteRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn service(&self) -> &'static str {
        match self {
            ServiceError::Unreachable { service, .. }
            | ServiceError::RemoteRejected { service, .. }
            | ServiceError::RemoteMalformed { service, .. } => service,
        }
    }
}

/// A successful downstream answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub status: u16,
    /// Decoded JSON body; `Value::Null` for an empty body.
    pub body: Value,
}

#[derive(Clone, Debug)]
pub struct ServiceClient {
    service: &'static str,
    base_url: Url,
    http: reqwest::Client,
}

impl ServiceClient {
    /// Creates a client for `service` rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if `base_url` is not an absolute http(s) URL.
    pub fn new(service: &'static str, base_url: &str, http: reqwest::Client) -> CoreResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| CoreError::Config(format!("{service} service URL {base_url:?}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(CoreError::Config(format!(
                "{service} service URL must be http or https"
            )));
        }
        // Url::join replaces the last segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            service,
            base_url,
            http,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ServiceError::RemoteMalformed {
                service: self.service,
                reason: format!("invalid request path {path:?}: {e}"),
            })
    }

    /// Issues one request and classifies the outcome.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Unreachable`] when no HTTP response arrived,
    /// - [`ServiceError::RemoteRejected`] for any non-2xx status (body kept for diagnostics),
    /// - [`ServiceError::RemoteMalformed`] when a 2xx body is not JSON.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        credential: Option<&Credential>,
        idempotency_key: Option<&str>,
    ) -> Result<ServiceResponse, ServiceError> {
        let url = self.endpoint(path)?;
        let mut request = self.http.request(method.clone(), url);
        if let Some(credential) = credential {
            request = request.header(AUTHORIZATION, credential.as_str());
        }
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(service = self.service, %method, path, "calling downstream service");

        let response = request
            .send()
            .await
            .map_err(|source| ServiceError::Unreachable {
                service: self.service,
                source,
            })?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ServiceError::Unreachable {
                service: self.service,
                source,
            })?;

        if !status.is_success() {
            let body = decode_body(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            });
            return Err(ServiceError::RemoteRejected {
                service: self.service,
                status: status.as_u16(),
                body,
            });
        }

        let body = decode_body(&bytes).map_err(|e| ServiceError::RemoteMalformed {
            service: self.service,
            reason: format!("body is not JSON: {e}"),
        })?;
        Ok(ServiceResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn decode_body(bytes: &[u8]) -> Result<Value, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes)
}
