//! Case-escalation saga.
//!
//! A visit-level clinical write can touch four services. The saga orders the writes so that a
//! clinical case is never left pointing at an intake record that does not exist, and an intake
//! record is never created for a case that was rolled back:
//!
//! | Step | Write                                           | On failure                      |
//! |------|-------------------------------------------------|---------------------------------|
//! | A    | insert the clinical case (`recorded`)           | nothing was written             |
//! | B    | create the intake record (complex cases only)   | delete the case, no retry       |
//! | C    | store the intake record id (`escalated`)        | delete the case                 |
//! | D    | mirror the intake file onto the patient         | logged, retried by reconciler   |
//! | E    | attach prescriptions                            | logged                          |
//!
//! D and E are independent and run concurrently with bounded retries. Their outcome is
//! reported in [`SyncStatus`] instead of failing the write.
//!
//! Between A and C a compensation guard is armed: if the caller drops the future (client
//! disconnect, timeout, shutdown) while B or C is in flight, the guard schedules the delete.

use crate::client::{Credential, ServiceError};
use crate::error::{CoreError, CoreResult, SagaStep};
use crate::model::{ClinicalCase, ValidatedVisit, VisitWrite};
use crate::remote::{
    ClinicalServices, IntakeRecordRequest, PatientStatusUpdate, PrescriptionRequest,
};
use crate::repositories::ClinicalCaseStore;
use crate::retry::RetryPolicy;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Outcome of a best-effort step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// The step did not apply to this write.
    Skipped,
    Succeeded,
    Failed { error: String },
}

impl StepStatus {
    pub fn succeeded(&self) -> bool {
        matches!(self, StepStatus::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub patient_status: StepStatus,
    pub prescriptions: StepStatus,
}

/// Everything the caller gets back from a successful escalation.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationOutcome {
    pub case: ClinicalCase,
    /// Body returned by the intake-record service; `None` for simple cases.
    pub intake_record: Option<Value>,
    /// Body returned by the prescription service; `None` when skipped or failed.
    pub prescriptions: Option<Value>,
    pub sync_status: SyncStatus,
}

/// `clinical-case-{id}-{step}`: stable across retries so a downstream service can deduplicate.
pub fn idempotency_key(case_id: i64, step: SagaStep) -> String {
    format!("clinical-case-{case_id}-{step}")
}

/// The intake record id from a creation response: top-level `id` or `data.id`.
///
/// Numeric strings are accepted since some services serialise ids that way.
pub fn intake_record_id(body: &Value) -> Option<i64> {
    fn as_id(value: &Value) -> Option<i64> {
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .filter(|id| *id > 0)
    }
    body.get("id")
        .and_then(as_id)
        .or_else(|| body.get("data").and_then(|d| d.get("id")).and_then(as_id))
}

/// Pushes Step D for `case`, retrying transient failures.
///
/// Shared with the reconciler, which replays it for cases whose first attempt failed.
pub(crate) async fn sync_patient_status(
    services: &dyn ClinicalServices,
    retry: &RetryPolicy,
    case: &ClinicalCase,
    credential: Option<&Credential>,
) -> Result<Value, ServiceError> {
    let update = PatientStatusUpdate::intake_file_created();
    let key = idempotency_key(case.id, SagaStep::SyncPatientStatus);
    retry
        .run(SagaStep::SyncPatientStatus.as_str(), || {
            services.update_patient_status(case.patient_id, &update, credential, &key)
        })
        .await
}

/// Deletes a still-`recorded` case if dropped while armed.
///
/// Armed after Step A and disarmed once the intake record id is stored or the saga has
/// compensated on its own.
struct CompensationGuard {
    cases: Option<Arc<dyn ClinicalCaseStore>>,
    case_id: i64,
}

impl CompensationGuard {
    fn arm(cases: Arc<dyn ClinicalCaseStore>, case_id: i64) -> Self {
        Self {
            cases: Some(cases),
            case_id,
        }
    }

    fn disarm(mut self) {
        self.cases = None;
    }
}

impl Drop for CompensationGuard {
    fn drop(&mut self) {
        let Some(cases) = self.cases.take() else {
            return;
        };
        let case_id = self.case_id;
        tracing::warn!(case_id, "escalation abandoned before intake record was attached");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match cases.delete_recorded_case(case_id).await {
                        Ok(true) => {
                            tracing::info!(case_id, "abandoned clinical case compensated")
                        }
                        Ok(false) => tracing::info!(
                            case_id,
                            "abandoned clinical case already moved on, nothing to compensate"
                        ),
                        Err(e) => tracing::error!(
                            case_id,
                            error = %e,
                            "could not compensate abandoned clinical case"
                        ),
                    }
                });
            }
            Err(_) => tracing::error!(
                case_id,
                "no runtime to compensate abandoned clinical case"
            ),
        }
    }
}

/// Coordinates one visit-level clinical write across the clinical store and the downstream
/// services.
#[derive(Clone)]
pub struct CaseEscalationSaga {
    cases: Arc<dyn ClinicalCaseStore>,
    services: Arc<dyn ClinicalServices>,
    retry: RetryPolicy,
}

impl CaseEscalationSaga {
    pub fn new(
        cases: Arc<dyn ClinicalCaseStore>,
        services: Arc<dyn ClinicalServices>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            cases,
            services,
            retry,
        }
    }

    /// Records the visit write and drives it through the saga.
    ///
    /// `credential` is forwarded unchanged to every downstream call.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Validation`] before anything is written.
    /// - [`CoreError::Database`] if Step A fails; nothing was written.
    /// - [`CoreError::RolledBack`] if Step B or C failed and the case was deleted. The source
    ///   is a [`CoreError::Remote`] for downstream failures.
    /// - [`CoreError::CompensationFailed`] if that delete failed as well.
    ///
    /// Failures in Steps D and E never surface here; see [`EscalationOutcome::sync_status`].
    pub async fn escalate(
        &self,
        write: VisitWrite,
        credential: Option<&Credential>,
    ) -> CoreResult<EscalationOutcome> {
        let visit = write.validate()?;
        let case = self.cases.insert_case(&visit.case).await?;
        tracing::info!(
            case_id = case.id,
            patient_id = case.patient_id,
            doctor_decision = %case.doctor_decision,
            "clinical case recorded"
        );

        let (case, intake_record) = if visit.is_complex() {
            let (case, body) = self.open_intake_record(case, &visit, credential).await?;
            (case, Some(body))
        } else {
            (case, None)
        };

        let patient_sync = async {
            if case.intake_record_id.is_some() {
                let result =
                    sync_patient_status(self.services.as_ref(), &self.retry, &case, credential)
                        .await;
                Some(result)
            } else {
                None
            }
        };
        let prescriptions = async {
            match &visit.prescriptions {
                Some(items) => Some(self.attach_prescriptions(&case, items, credential).await),
                None => None,
            }
        };
        let (patient_sync, prescriptions) = tokio::join!(patient_sync, prescriptions);

        let patient_status = self.settle(&case, SagaStep::SyncPatientStatus, patient_sync.as_ref());
        let prescription_status =
            self.settle(&case, SagaStep::AttachPrescriptions, prescriptions.as_ref());
        let prescriptions = prescriptions.and_then(Result::ok);

        let case = match self
            .cases
            .finalize_case(
                case.id,
                patient_status.succeeded(),
                prescription_status.succeeded(),
            )
            .await
        {
            Ok(finalized) => finalized,
            Err(e) => {
                tracing::warn!(
                    case_id = case.id,
                    state = %case.state,
                    error = %e,
                    "could not finalize clinical case"
                );
                case
            }
        };

        tracing::info!(
            case_id = case.id,
            state = %case.state,
            patient_status_synced = patient_status.succeeded(),
            prescriptions_attached = prescription_status.succeeded(),
            "clinical case escalation finished"
        );

        Ok(EscalationOutcome {
            case,
            intake_record,
            prescriptions,
            sync_status: SyncStatus {
                patient_status,
                prescriptions: prescription_status,
            },
        })
    }

    /// Steps B and C, compensating Step A if either fails.
    async fn open_intake_record(
        &self,
        case: ClinicalCase,
        visit: &ValidatedVisit,
        credential: Option<&Credential>,
    ) -> CoreResult<(ClinicalCase, Value)> {
        let guard = CompensationGuard::arm(self.cases.clone(), case.id);

        let request = IntakeRecordRequest {
            patient_id: case.patient_id,
            clinical_case_id: case.id,
            history: visit.history.clone(),
        };
        let key = idempotency_key(case.id, SagaStep::CreateIntakeRecord);
        let created = self
            .services
            .create_intake_record(&request, credential, &key)
            .await
            .map_err(|source| CoreError::Remote {
                step: SagaStep::CreateIntakeRecord,
                source,
            })
            .and_then(|body| match intake_record_id(&body) {
                Some(id) => Ok((id, body)),
                None => Err(CoreError::DataIntegrity(
                    "intake-record service response has no record id".into(),
                )),
            });
        let (intake_record_id, body) = match created {
            Ok(created) => created,
            Err(e) => return Err(self.compensate(guard, case.id, e).await),
        };
        tracing::info!(case_id = case.id, intake_record_id, "intake record created");

        match self.cases.attach_intake_record(case.id, intake_record_id).await {
            Ok(escalated) => {
                guard.disarm();
                Ok((escalated, body))
            }
            Err(e) => {
                // The intake service has no delete contract; the record stays behind.
                tracing::warn!(
                    case_id = case.id,
                    patient_id = case.patient_id,
                    intake_record_id,
                    "intake record orphaned by failed attach"
                );
                Err(self.compensate(guard, case.id, e).await)
            }
        }
    }

    async fn compensate(
        &self,
        guard: CompensationGuard,
        case_id: i64,
        cause: CoreError,
    ) -> CoreError {
        tracing::warn!(case_id, error = %cause, "escalation failed, deleting clinical case");
        let outcome = self.cases.delete_recorded_case(case_id).await;
        // Disarm only once the delete has run, so a drop mid-delete still compensates.
        guard.disarm();

        match outcome {
            Ok(deleted) => {
                if !deleted {
                    tracing::warn!(case_id, "clinical case was no longer recorded at compensation");
                }
                CoreError::RolledBack {
                    case_id,
                    source: Box::new(cause),
                }
            }
            Err(compensation_error) => {
                tracing::error!(
                    case_id,
                    error = %cause,
                    compensation_error = %compensation_error,
                    "compensation failed, clinical case left recorded"
                );
                CoreError::CompensationFailed {
                    case_id,
                    source: Box::new(cause),
                    compensation_error: Box::new(compensation_error),
                }
            }
        }
    }

    async fn attach_prescriptions(
        &self,
        case: &ClinicalCase,
        items: &[Value],
        credential: Option<&Credential>,
    ) -> Result<Value, ServiceError> {
        let request = PrescriptionRequest {
            patient_id: case.patient_id,
            clinical_case_id: case.id,
            prescription: items.to_vec(),
        };
        let key = idempotency_key(case.id, SagaStep::AttachPrescriptions);
        self.retry
            .run(SagaStep::AttachPrescriptions.as_str(), || {
                self.services.attach_prescriptions(&request, credential, &key)
            })
            .await
    }

    fn settle(
        &self,
        case: &ClinicalCase,
        step: SagaStep,
        result: Option<&Result<Value, ServiceError>>,
    ) -> StepStatus {
        match result {
            None => StepStatus::Skipped,
            Some(Ok(_)) => StepStatus::Succeeded,
            Some(Err(e)) => {
                tracing::warn!(
                    case_id = case.id,
                    patient_id = case.patient_id,
                    intake_record_id = case.intake_record_id,
                    step = %step,
                    service = e.service(),
                    status = e.status(),
                    error = %e,
                    "best-effort step failed"
                );
                StepStatus::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
