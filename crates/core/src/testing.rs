//! Scripted stand-ins for the downstream services.

use crate::client::{Credential, ServiceError};
use crate::constants::{INTAKE_SERVICE, PATIENT_SERVICE, PRESCRIPTION_SERVICE};
use crate::remote::{ClinicalServices, IntakeRecordRequest, PatientStatusUpdate, PrescriptionRequest};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// What the next call to a fake endpoint does.
#[derive(Clone, Debug)]
pub(crate) enum Outcome {
    Reply(Value),
    Reject(u16),
    Unreachable,
    Malformed,
    /// Never answers; used to abandon a saga mid-call.
    Hang,
    /// Answers with the default reply after a pause.
    Delayed(std::time::Duration),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Call {
    pub service: &'static str,
    pub path: String,
    pub body: Value,
    pub credential: Option<String>,
    pub idempotency_key: String,
}

#[derive(Default)]
pub(crate) struct FakeServices {
    intake: Mutex<VecDeque<Outcome>>,
    patients: Mutex<VecDeque<Outcome>>,
    prescriptions: Mutex<VecDeque<Outcome>>,
    calls: Mutex<Vec<Call>>,
    next_intake_id: AtomicI64,
}

impl FakeServices {
    pub fn script_intake(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.intake.lock().unwrap().extend(outcomes);
    }

    pub fn script_patients(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.patients.lock().unwrap().extend(outcomes);
    }

    pub fn script_prescriptions(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.prescriptions.lock().unwrap().extend(outcomes);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, service: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.service == service)
            .collect()
    }

    async fn answer(
        &self,
        service: &'static str,
        script: &Mutex<VecDeque<Outcome>>,
        call: Call,
        default: Value,
    ) -> Result<Value, ServiceError> {
        self.calls.lock().unwrap().push(call);
        let outcome = script.lock().unwrap().pop_front();
        match outcome.unwrap_or(Outcome::Reply(default.clone())) {
            Outcome::Reply(body) => Ok(body),
            Outcome::Reject(status) => Err(ServiceError::RemoteRejected {
                service,
                status,
                body: json!({ "message": "rejected by fake" }),
            }),
            Outcome::Unreachable => {
                // An invalid URL yields a genuine reqwest::Error without touching the network.
                let source = reqwest::Client::new()
                    .get("http://")
                    .send()
                    .await
                    .unwrap_err();
                Err(ServiceError::Unreachable { service, source })
            }
            Outcome::Malformed => Err(ServiceError::RemoteMalformed {
                service,
                reason: "body is not JSON".into(),
            }),
            Outcome::Hang => std::future::pending().await,
            Outcome::Delayed(pause) => {
                tokio::time::sleep(pause).await;
                Ok(default)
            }
        }
    }
}

fn credential_text(credential: Option<&Credential>) -> Option<String> {
    credential.map(|c| c.as_str().to_string())
}

#[async_trait]
impl ClinicalServices for FakeServices {
    async fn create_intake_record(
        &self,
        request: &IntakeRecordRequest,
        credential: Option<&Credential>,
        idempotency_key: &str,
    ) -> Result<Value, ServiceError> {
        let id = 500 + self.next_intake_id.fetch_add(1, Ordering::SeqCst);
        let call = Call {
            service: INTAKE_SERVICE,
            path: "intake-records".into(),
            body: request.to_json(),
            credential: credential_text(credential),
            idempotency_key: idempotency_key.into(),
        };
        let default = json!({
            "id": id,
            "patientId": request.patient_id,
            "clinicalCaseId": request.clinical_case_id,
            "fileStatus": "created"
        });
        self.answer(INTAKE_SERVICE, &self.intake, call, default).await
    }

    async fn update_patient_status(
        &self,
        patient_id: i64,
        update: &PatientStatusUpdate,
        credential: Option<&Credential>,
        idempotency_key: &str,
    ) -> Result<Value, ServiceError> {
        let call = Call {
            service: PATIENT_SERVICE,
            path: format!("patients/{patient_id}"),
            body: serde_json::to_value(update).unwrap(),
            credential: credential_text(credential),
            idempotency_key: idempotency_key.into(),
        };
        let default = json!({ "id": patient_id, "hasIntakeFile": true });
        self.answer(PATIENT_SERVICE, &self.patients, call, default).await
    }

    async fn attach_prescriptions(
        &self,
        request: &PrescriptionRequest,
        credential: Option<&Credential>,
        idempotency_key: &str,
    ) -> Result<Value, ServiceError> {
        let call = Call {
            service: PRESCRIPTION_SERVICE,
            path: "prescriptions".into(),
            body: serde_json::to_value(request).unwrap(),
            credential: credential_text(credential),
            idempotency_key: idempotency_key.into(),
        };
        let default = json!({ "id": 77, "clinicalCaseId": request.clinical_case_id });
        self.answer(PRESCRIPTION_SERVICE, &self.prescriptions, call, default)
            .await
    }
}
