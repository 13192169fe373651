//! JSON bodies of the REST surface.
//!
//! Field names are camelCase to match the rest of the clinic's services. Vocabulary fields are
//! taken as plain strings and checked when converted into core types, so a bad value is a
//! validation failure rather than a body-parse failure.

use emr_core::model::{AssignedDoctor, ClinicalCase, DeleteCounts, DeleteResult, VisitWrite};
use emr_core::saga::{EscalationOutcome, StepStatus, SyncStatus};
use emr_core::{CoreError, ReconcileReport};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// A visit-level clinical write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EscalateReq {
    pub patient_id: Option<i64>,
    /// `YYYY-MM-DD`.
    pub visit_date: Option<String>,
    /// `first_visit` (default) or `follow_up`.
    pub visit_type: Option<String>,
    /// `simple_case` (default) or `complex_case`.
    pub doctor_decision: Option<String>,
    pub requires_intake_record: Option<bool>,
    /// Long-form history fields forwarded to the intake-record service.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub history: Map<String, Value>,
    #[schema(value_type = Option<Vec<Object>>)]
    pub prescriptions: Option<Vec<Value>>,
}

fn parse_field<T: std::str::FromStr>(field: &str, value: Option<String>) -> Result<Option<T>, CoreError>
where
    T::Err: std::fmt::Display,
{
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|e| CoreError::Validation(format!("{field}: {e}")))
        })
        .transpose()
}

impl TryFrom<EscalateReq> for VisitWrite {
    type Error = CoreError;

    fn try_from(req: EscalateReq) -> Result<Self, Self::Error> {
        Ok(VisitWrite {
            patient_id: req.patient_id,
            visit_date: parse_field("visitDate", req.visit_date)?,
            visit_type: parse_field("visitType", req.visit_type)?.unwrap_or_default(),
            doctor_decision: parse_field("doctorDecision", req.doctor_decision)?,
            requires_intake_record: req.requires_intake_record,
            history: req.history,
            prescriptions: req.prescriptions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalCaseRes {
    pub id: i64,
    pub patient_id: i64,
    pub visit_date: String,
    pub visit_type: String,
    pub doctor_decision: String,
    pub requires_intake_record: bool,
    pub intake_record_id: Option<i64>,
    /// `recorded`, `escalated` or `finalized`.
    pub state: String,
    pub patient_status_synced: bool,
    pub prescriptions_attached: bool,
    pub created_at: String,
}

impl From<ClinicalCase> for ClinicalCaseRes {
    fn from(case: ClinicalCase) -> Self {
        Self {
            id: case.id,
            patient_id: case.patient_id,
            visit_date: case.visit_date.to_string(),
            visit_type: case.visit_type.as_str().into(),
            doctor_decision: case.doctor_decision.as_str().into(),
            requires_intake_record: case.requires_intake_record,
            intake_record_id: case.intake_record_id,
            state: case.state.as_str().into(),
            patient_status_synced: case.patient_status_synced,
            prescriptions_attached: case.prescriptions_attached,
            created_at: case.created_at.to_rfc3339(),
        }
    }
}

/// Outcome of one best-effort step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StepStatusRes {
    /// `skipped`, `succeeded` or `failed`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<StepStatus> for StepStatusRes {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Skipped => Self {
                status: "skipped".into(),
                error: None,
            },
            StepStatus::Succeeded => Self {
                status: "succeeded".into(),
                error: None,
            },
            StepStatus::Failed { error } => Self {
                status: "failed".into(),
                error: Some(error),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusRes {
    pub patient_status: StepStatusRes,
    pub prescriptions: StepStatusRes,
}

impl From<SyncStatus> for SyncStatusRes {
    fn from(status: SyncStatus) -> Self {
        Self {
            patient_status: status.patient_status.into(),
            prescriptions: status.prescriptions.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EscalateRes {
    pub clinical_case: ClinicalCaseRes,
    /// As returned by the intake-record service; absent for simple cases.
    #[schema(value_type = Option<Object>)]
    pub intake_record: Option<Value>,
    /// As returned by the prescription service; `null` when skipped or failed.
    #[schema(value_type = Option<Object>)]
    pub prescriptions: Option<Value>,
    pub sync_status: SyncStatusRes,
}

impl From<EscalationOutcome> for EscalateRes {
    fn from(outcome: EscalationOutcome) -> Self {
        Self {
            clinical_case: outcome.case.into(),
            intake_record: outcome.intake_record,
            prescriptions: outcome.prescriptions,
            sync_status: outcome.sync_status.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignedDoctorRes {
    pub patient_id: i64,
    pub doctor_id: Option<i64>,
    pub name: Option<String>,
    pub role: Option<String>,
}

impl AssignedDoctorRes {
    pub fn new(patient_id: i64, doctor: AssignedDoctor) -> Self {
        Self {
            patient_id,
            doctor_id: doctor.doctor_id,
            name: doctor.name.map(|n| n.into_string()),
            role: doctor.role.map(|r| r.into_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCountsRes {
    pub prescriptions: u64,
    pub intake_records: u64,
    pub clinical_cases: u64,
    pub visits: u64,
    pub patients: u64,
}

impl From<DeleteCounts> for DeleteCountsRes {
    fn from(counts: DeleteCounts) -> Self {
        Self {
            prescriptions: counts.prescriptions_by_case + counts.prescriptions_by_patient,
            intake_records: counts.intake_records,
            clinical_cases: counts.clinical_cases,
            visits: counts.visits,
            patients: counts.patients,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeletePatientRes {
    pub deleted: bool,
    pub counts: DeleteCountsRes,
}

impl From<DeleteResult> for DeletePatientRes {
    fn from(result: DeleteResult) -> Self {
        Self {
            deleted: result.deleted,
            counts: result.counts.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReconcileRes {
    pub examined: usize,
    pub synced: usize,
    pub failed: usize,
}

impl From<ReconcileReport> for ReconcileRes {
    fn from(report: ReconcileReport) -> Self {
        Self {
            examined: report.examined,
            synced: report.synced,
            failed: report.failed,
        }
    }
}
