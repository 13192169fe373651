//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into the saga, the cascade
//! delete and the reconciler. Nothing in this crate reads environment variables while
//! handling a request; the `*_from_env_value` helpers only parse values a binary has
//! already read.

use crate::client::Credential;
use crate::constants::{
    DEFAULT_RECONCILE_GRACE_SECS, DEFAULT_RECONCILE_INTERVAL_SECS, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_BASE_MS,
};
use crate::error::{CoreError, CoreResult};
use crate::retry::RetryPolicy;
use reqwest::Url;
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    database_url: String,
    intake_service_url: String,
    patient_service_url: String,
    prescription_service_url: String,
    retry_policy: RetryPolicy,
    reconcile_interval: Option<Duration>,
    reconcile_grace: Duration,
    reconcile_credential: Option<Credential>,
}

impl CoreConfig {
    /// Create a new `CoreConfig`, validating every service URL.
    pub fn new(
        database_url: String,
        intake_service_url: String,
        patient_service_url: String,
        prescription_service_url: String,
    ) -> CoreResult<Self> {
        if database_url.trim().is_empty() {
            return Err(CoreError::Config("DATABASE_URL cannot be empty".into()));
        }
        for (name, url) in [
            ("INTAKE_SERVICE_URL", &intake_service_url),
            ("PATIENT_SERVICE_URL", &patient_service_url),
            ("PRESCRIPTION_SERVICE_URL", &prescription_service_url),
        ] {
            validate_service_url(name, url)?;
        }

        Ok(Self {
            database_url,
            intake_service_url,
            patient_service_url,
            prescription_service_url,
            retry_policy: RetryPolicy::default(),
            reconcile_interval: Some(Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS)),
            reconcile_grace: Duration::from_secs(DEFAULT_RECONCILE_GRACE_SECS),
            reconcile_credential: None,
        })
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// `None` disables the periodic reconciliation job.
    pub fn with_reconcile_interval(mut self, interval: Option<Duration>) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn with_reconcile_grace(mut self, grace: Duration) -> Self {
        self.reconcile_grace = grace;
        self
    }

    pub fn with_reconcile_credential(mut self, credential: Option<Credential>) -> Self {
        self.reconcile_credential = credential;
        self
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn intake_service_url(&self) -> &str {
        &self.intake_service_url
    }

    pub fn patient_service_url(&self) -> &str {
        &self.patient_service_url
    }

    pub fn prescription_service_url(&self) -> &str {
        &self.prescription_service_url
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        self.reconcile_interval
    }

    /// Age below which an `escalated` case is left to its running saga.
    pub fn reconcile_grace(&self) -> Duration {
        self.reconcile_grace
    }

    pub fn reconcile_credential(&self) -> Option<&Credential> {
        self.reconcile_credential.as_ref()
    }
}

fn validate_service_url(name: &str, value: &str) -> CoreResult<()> {
    let url = Url::parse(value).map_err(|e| CoreError::Config(format!("{name}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CoreError::Config(format!("{name} must be an http(s) URL")));
    }
    Ok(())
}

fn parse_optional<T: std::str::FromStr>(name: &str, value: Option<String>) -> CoreResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| CoreError::Config(format!("{name}={v:?}: {e}")))
        })
        .transpose()
}

/// Parse the retry policy from optional `REMOTE_RETRY_ATTEMPTS` / `REMOTE_RETRY_BASE_MS` values.
///
/// Missing or blank values fall back to the defaults.
pub fn retry_policy_from_env_values(
    attempts: Option<String>,
    base_ms: Option<String>,
) -> CoreResult<RetryPolicy> {
    let attempts =
        parse_optional::<u32>("REMOTE_RETRY_ATTEMPTS", attempts)?.unwrap_or(DEFAULT_RETRY_ATTEMPTS);
    let base_ms =
        parse_optional::<u64>("REMOTE_RETRY_BASE_MS", base_ms)?.unwrap_or(DEFAULT_RETRY_BASE_MS);
    if attempts == 0 {
        return Err(CoreError::Config(
            "REMOTE_RETRY_ATTEMPTS must be at least 1".into(),
        ));
    }
    Ok(RetryPolicy::new(attempts, Duration::from_millis(base_ms)))
}

/// Parse `RECONCILE_INTERVAL_SECS`; `0` disables the job.
pub fn reconcile_interval_from_env_value(value: Option<String>) -> CoreResult<Option<Duration>> {
    let secs = parse_optional::<u64>("RECONCILE_INTERVAL_SECS", value)?
        .unwrap_or(DEFAULT_RECONCILE_INTERVAL_SECS);
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

/// Parse `RECONCILE_GRACE_SECS`.
pub fn reconcile_grace_from_env_value(value: Option<String>) -> CoreResult<Duration> {
    let secs = parse_optional::<u64>("RECONCILE_GRACE_SECS", value)?
        .unwrap_or(DEFAULT_RECONCILE_GRACE_SECS);
    Ok(Duration::from_secs(secs))
}

/// Resolve the whole configuration from a variable lookup, normally `std::env::var`.
///
/// `DATABASE_URL` and the three service URLs are required.
pub fn core_config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<CoreConfig> {
    let required = |name: &str| {
        lookup(name).ok_or_else(|| CoreError::Config(format!("{name} must be set")))
    };
    let cfg = CoreConfig::new(
        required("DATABASE_URL")?,
        required("INTAKE_SERVICE_URL")?,
        required("PATIENT_SERVICE_URL")?,
        required("PRESCRIPTION_SERVICE_URL")?,
    )?;

    Ok(cfg
        .with_retry_policy(retry_policy_from_env_values(
            lookup("REMOTE_RETRY_ATTEMPTS"),
            lookup("REMOTE_RETRY_BASE_MS"),
        )?)
        .with_reconcile_interval(reconcile_interval_from_env_value(lookup(
            "RECONCILE_INTERVAL_SECS",
        ))?)
        .with_reconcile_grace(reconcile_grace_from_env_value(lookup("RECONCILE_GRACE_SECS"))?)
        .with_reconcile_credential(
            lookup("RECONCILE_AUTHORIZATION")
                .as_deref()
                .and_then(Credential::from_header_value),
        ))
}
