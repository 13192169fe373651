//! The three downstream services the escalation saga writes to.
//!
//! [`ClinicalServices`] is the seam the saga and the reconciler depend on;
//! [`HttpClinicalServices`] is the production implementation over [`ServiceClient`].

use crate::client::{Credential, ServiceClient, ServiceError, ServiceResponse};
use crate::config::CoreConfig;
use crate::constants::{
    INTAKE_FILE_STATUS_CREATED, INTAKE_SERVICE, PATIENT_SERVICE, PRESCRIPTION_SERVICE,
};
use crate::error::CoreResult;
use async_trait::async_trait;
use emr_types::CaseComplexity;
use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value};

/// Body of `POST /intake-records`.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeRecordRequest {
    pub patient_id: i64,
    pub clinical_case_id: i64,
    pub history: Map<String, Value>,
}

impl IntakeRecordRequest {
    /// History fields flattened next to the two ids; the ids always win over same-named fields.
    pub fn to_json(&self) -> Value {
        let mut body = self.history.clone();
        body.insert("patientId".into(), Value::from(self.patient_id));
        body.insert("clinicalCaseId".into(), Value::from(self.clinical_case_id));
        Value::Object(body)
    }
}

/// Body of `PUT /patients/{id}` sent once an intake record exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientStatusUpdate {
    pub has_intake_file: bool,
    pub case_complexity: CaseComplexity,
    pub file_status: String,
}

impl PatientStatusUpdate {
    pub fn intake_file_created() -> Self {
        Self {
            has_intake_file: true,
            case_complexity: CaseComplexity::Complex,
            file_status: INTAKE_FILE_STATUS_CREATED.into(),
        }
    }
}

/// Body of `POST /prescriptions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionRequest {
    pub patient_id: i64,
    pub clinical_case_id: i64,
    pub prescription: Vec<Value>,
}

#[async_trait]
pub trait ClinicalServices: Send + Sync {
    /// Step B. Returns the created intake record's body.
    async fn create_intake_record(
        &self,
        request: &IntakeRecordRequest,
        credential: Option<&Credential>,
        idempotency_key: &str,
    ) -> Result<Value, ServiceError>;

    /// Step D.
    async fn update_patient_status(
        &self,
        patient_id: i64,
        update: &PatientStatusUpdate,
        credential: Option<&Credential>,
        idempotency_key: &str,
    ) -> Result<Value, ServiceError>;

    /// Step E.
    async fn attach_prescriptions(
        &self,
        request: &PrescriptionRequest,
        credential: Option<&Credential>,
        idempotency_key: &str,
    ) -> Result<Value, ServiceError>;
}

#[derive(Clone, Debug)]
pub struct HttpClinicalServices {
    intake: ServiceClient,
    patients: ServiceClient,
    prescriptions: ServiceClient,
}

impl HttpClinicalServices {
    pub fn new(intake: ServiceClient, patients: ServiceClient, prescriptions: ServiceClient) -> Self {
        Self {
            intake,
            patients,
            prescriptions,
        }
    }

    /// Builds the three clients from configuration, sharing one connection pool.
    pub fn from_config(cfg: &CoreConfig, http: reqwest::Client) -> CoreResult<Self> {
        Ok(Self::new(
            ServiceClient::new(INTAKE_SERVICE, cfg.intake_service_url(), http.clone())?,
            ServiceClient::new(PATIENT_SERVICE, cfg.patient_service_url(), http.clone())?,
            ServiceClient::new(PRESCRIPTION_SERVICE, cfg.prescription_service_url(), http)?,
        ))
    }
}

fn to_body<T: Serialize>(service: &'static str, value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::RemoteMalformed {
        service,
        reason: format!("request body could not be encoded: {e}"),
    })
}

#[async_trait]
impl ClinicalServices for HttpClinicalServices {
    async fn create_intake_record(
        &self,
        request: &IntakeRecordRequest,
        credential: Option<&Credential>,
        idempotency_key: &str,
    ) -> Result<Value, ServiceError> {
        let ServiceResponse { body, .. } = self
            .intake
            .call(
                Method::POST,
                "intake-records",
                Some(&request.to_json()),
                credential,
                Some(idempotency_key),
            )
            .await?;
        Ok(body)
    }

    async fn update_patient_status(
        &self,
        patient_id: i64,
        update: &PatientStatusUpdate,
        credential: Option<&Credential>,
        idempotency_key: &str,
    ) -> Result<Value, ServiceError> {
        let body = to_body(self.patients.service(), update)?;
        let ServiceResponse { body, .. } = self
            .patients
            .call(
                Method::PUT,
                &format!("patients/{patient_id}"),
                Some(&body),
                credential,
                Some(idempotency_key),
            )
            .await?;
        Ok(body)
    }

    async fn attach_prescriptions(
        &self,
        request: &PrescriptionRequest,
        credential: Option<&Credential>,
        idempotency_key: &str,
    ) -> Result<Value, ServiceError> {
        let body = to_body(self.prescriptions.service(), request)?;
        let ServiceResponse { body, .. } = self
            .prescriptions
            .call(
                Method::POST,
                "prescriptions",
                Some(&body),
                credential,
                Some(idempotency_key),
            )
            .await?;
        Ok(body)
    }
}
