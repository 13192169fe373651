//! Replays Step D for escalated cases whose patient mirror never landed.
//!
//! The patient-record service is the only place that knows a patient has an intake file, so a
//! lost Step D leaves the two services disagreeing. The reconciler finds those cases and
//! pushes the update again under the same idempotency key.
//!
//! An `escalated` case is only touched once it has sat unchanged for the grace period, so a
//! saga still running Steps D and E keeps sole ownership of its own finalize.

use crate::client::Credential;
use crate::constants::DEFAULT_RECONCILE_GRACE_SECS;
use crate::error::CoreResult;
use crate::remote::ClinicalServices;
use crate::repositories::ClinicalCaseStore;
use crate::retry::RetryPolicy;
use crate::saga::sync_patient_status;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub synced: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    cases: Arc<dyn ClinicalCaseStore>,
    services: Arc<dyn ClinicalServices>,
    retry: RetryPolicy,
    credential: Option<Credential>,
    grace: Duration,
}

impl Reconciler {
    pub fn new(
        cases: Arc<dyn ClinicalCaseStore>,
        services: Arc<dyn ClinicalServices>,
        retry: RetryPolicy,
        credential: Option<Credential>,
    ) -> Self {
        Self {
            cases,
            services,
            retry,
            credential,
            grace: Duration::from_secs(DEFAULT_RECONCILE_GRACE_SECS),
        }
    }

    /// How long an `escalated` case must be left untouched before a pass picks it up.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn settled_before(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.grace)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// The credential scheduled passes run with.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// One pass over at most `limit` cases with the configured credential.
    pub async fn run_once(&self, limit: i64) -> CoreResult<ReconcileReport> {
        self.run_once_as(limit, self.credential.as_ref()).await
    }

    /// One pass forwarding `credential` downstream.
    ///
    /// A downstream failure only counts against the case; the pass carries on. A failure to
    /// record a successful sync is logged the same way and left for the next pass.
    ///
    /// # Errors
    ///
    /// Returns an error only if the pending cases cannot be listed.
    pub async fn run_once_as(
        &self,
        limit: i64,
        credential: Option<&Credential>,
    ) -> CoreResult<ReconcileReport> {
        let settled_before = self.settled_before();
        let pending = self
            .cases
            .cases_awaiting_patient_sync(limit, settled_before)
            .await?;
        let mut report = ReconcileReport {
            examined: pending.len(),
            ..ReconcileReport::default()
        };

        for case in &pending {
            let pushed = sync_patient_status(
                self.services.as_ref(),
                &self.retry,
                case,
                credential,
            )
            .await;
            if let Err(e) = pushed {
                tracing::warn!(
                    case_id = case.id,
                    patient_id = case.patient_id,
                    intake_record_id = case.intake_record_id,
                    error = %e,
                    "patient status still not synced"
                );
                report.failed += 1;
                continue;
            }

            match self
                .cases
                .mark_patient_status_synced(case.id, settled_before)
                .await
            {
                Ok(_) => report.synced += 1,
                Err(e) => {
                    tracing::warn!(case_id = case.id, error = %e, "could not record patient sync");
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                synced = report.synced,
                failed = report.failed,
                "reconciliation pass finished"
            );
        }
        Ok(report)
    }

    /// Runs a pass every `interval` until the task is dropped.
    pub async fn run_every(&self, interval: Duration, limit: i64) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once(limit).await {
                tracing::error!(error = %e, "reconciliation pass failed");
            }
        }
    }
}
