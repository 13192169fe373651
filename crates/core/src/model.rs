//! Domain records touched by the coordination logic.
//!
//! Each record mirrors the columns the core reads or writes; the owning services keep many
//! more fields that never pass through here.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, NaiveDate, Utc};
use emr_types::{CaseComplexity, DoctorDecision, NonEmptyText, VisitStatus, VisitType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Saga position of a persisted clinical case.
///
/// `Draft` is never stored: it is the validated [`VisitWrite`] before Step A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Recorded,
    Escalated,
    Finalized,
    RolledBack,
}

impl CaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseState::Recorded => "recorded",
            CaseState::Escalated => "escalated",
            CaseState::Finalized => "finalized",
            CaseState::RolledBack => "rolled_back",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: CaseState) -> bool {
        use CaseState::*;
        matches!(
            (self, next),
            (Recorded, Escalated)
                | (Recorded, Finalized)
                | (Recorded, RolledBack)
                | (Escalated, Finalized)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseState::Finalized | CaseState::RolledBack)
    }
}

impl std::fmt::Display for CaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CaseState {
    type Err = emr_types::VocabularyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recorded" => Ok(CaseState::Recorded),
            "escalated" => Ok(CaseState::Escalated),
            "finalized" => Ok(CaseState::Finalized),
            "rolled_back" => Ok(CaseState::RolledBack),
            other => Err(emr_types::VocabularyError {
                vocabulary: "case state",
                value: other.to_owned(),
            }),
        }
    }
}

/// One visit's clinical write, as owned by the clinical-proforma service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalCase {
    pub id: i64,
    pub patient_id: i64,
    pub visit_date: NaiveDate,
    pub visit_type: VisitType,
    pub doctor_decision: DoctorDecision,
    pub requires_intake_record: bool,
    /// Set only after the intake-record service confirmed creation.
    pub intake_record_id: Option<i64>,
    pub state: CaseState,
    pub patient_status_synced: bool,
    pub prescriptions_attached: bool,
    pub created_at: DateTime<Utc>,
    /// Last saga write; the reconciler uses it to tell a running saga from an abandoned one.
    pub updated_at: DateTime<Utc>,
}

impl ClinicalCase {
    pub fn is_complex(&self) -> bool {
        self.doctor_decision == DoctorDecision::ComplexCase
    }
}

/// The row Step A inserts.
#[derive(Debug, Clone, PartialEq)]
pub struct NewClinicalCase {
    pub patient_id: i64,
    pub visit_date: NaiveDate,
    pub visit_type: VisitType,
    pub doctor_decision: DoctorDecision,
    pub requires_intake_record: bool,
}

/// Inbound visit-level clinical write, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitWrite {
    pub patient_id: Option<i64>,
    pub visit_date: Option<NaiveDate>,
    #[serde(default)]
    pub visit_type: VisitType,
    pub doctor_decision: Option<DoctorDecision>,
    pub requires_intake_record: Option<bool>,
    /// Long-form history fields forwarded to the intake-record service.
    #[serde(default)]
    pub history: Map<String, Value>,
    pub prescriptions: Option<Vec<Value>>,
}

/// A [`VisitWrite`] that passed the local checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedVisit {
    pub case: NewClinicalCase,
    pub history: Map<String, Value>,
    /// `None` when no prescriptions were supplied; an empty list counts as none.
    pub prescriptions: Option<Vec<Value>>,
}

impl VisitWrite {
    /// Cheap local validation run before anything is written.
    ///
    /// A case is complex when the doctor decided so or the write explicitly asks for an
    /// intake record; either way it is stored as `complex_case` with
    /// `requires_intake_record = true`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if `patient_id` or `visit_date` is missing, or the
    /// patient id is not positive.
    pub fn validate(self) -> CoreResult<ValidatedVisit> {
        let patient_id = self
            .patient_id
            .ok_or_else(|| CoreError::Validation("patientId is required".into()))?;
        if patient_id <= 0 {
            return Err(CoreError::Validation("patientId must be positive".into()));
        }
        let visit_date = self
            .visit_date
            .ok_or_else(|| CoreError::Validation("visitDate is required".into()))?;

        let complex = self.doctor_decision == Some(DoctorDecision::ComplexCase)
            || self.requires_intake_record == Some(true);
        let doctor_decision = if complex {
            DoctorDecision::ComplexCase
        } else {
            DoctorDecision::SimpleCase
        };

        Ok(ValidatedVisit {
            case: NewClinicalCase {
                patient_id,
                visit_date,
                visit_type: self.visit_type,
                doctor_decision,
                requires_intake_record: complex,
            },
            history: self.history,
            prescriptions: self.prescriptions.filter(|p| !p.is_empty()),
        })
    }
}

impl ValidatedVisit {
    pub fn is_complex(&self) -> bool {
        self.case.doctor_decision == DoctorDecision::ComplexCase
    }
}

/// Long-form intake ("ADL") file, owned by the intake-record service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeRecord {
    pub id: i64,
    pub patient_id: i64,
    pub clinical_case_id: Option<i64>,
    pub file_status: Option<String>,
}

/// Patient columns relevant to doctor resolution and the intake-file mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: i64,
    pub assigned_doctor_id: Option<i64>,
    pub assigned_doctor_name: Option<String>,
    pub has_intake_file: bool,
    pub case_complexity: CaseComplexity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub id: i64,
    pub patient_id: i64,
    pub assigned_doctor_id: Option<i64>,
    pub visit_date: NaiveDate,
    pub visit_status: VisitStatus,
    pub created_at: DateTime<Utc>,
}

/// A staff member who can be assigned to patients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorProfile {
    pub id: i64,
    pub name: String,
    pub role: String,
}

/// Derived "who is this patient's doctor right now"; always recomputed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedDoctor {
    pub doctor_id: Option<i64>,
    pub name: Option<NonEmptyText>,
    pub role: Option<NonEmptyText>,
}

/// Rows removed by one cascade delete, per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCounts {
    pub prescriptions_by_case: u64,
    pub prescriptions_by_patient: u64,
    pub intake_records: u64,
    pub clinical_cases: u64,
    pub visits: u64,
    pub patients: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted: bool,
    pub counts: DeleteCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write() -> VisitWrite {
        VisitWrite {
            patient_id: Some(42),
            visit_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        }
    }

    #[test]
    fn missing_patient_or_date_fails_validation() {
        let mut no_patient = write();
        no_patient.patient_id = None;
        assert!(matches!(
            no_patient.validate(),
            Err(CoreError::Validation(msg)) if msg.contains("patientId")
        ));

        let mut no_date = write();
        no_date.visit_date = None;
        assert!(matches!(
            no_date.validate(),
            Err(CoreError::Validation(msg)) if msg.contains("visitDate")
        ));
    }

    #[test]
    fn intake_flag_alone_makes_the_case_complex() {
        let mut w = write();
        w.requires_intake_record = Some(true);
        let v = w.validate().unwrap();
        assert!(v.is_complex());
        assert!(v.case.requires_intake_record);
    }

    #[test]
    fn default_write_is_simple_and_drops_empty_prescriptions() {
        let mut w = write();
        w.prescriptions = Some(vec![]);
        let v = w.validate().unwrap();
        assert_eq!(v.case.doctor_decision, DoctorDecision::SimpleCase);
        assert!(!v.case.requires_intake_record);
        assert!(v.prescriptions.is_none());
    }

    #[test]
    fn lifecycle_has_no_way_back_from_terminal_states() {
        use CaseState::*;
        assert!(Recorded.can_transition_to(Escalated));
        assert!(Recorded.can_transition_to(Finalized));
        assert!(Recorded.can_transition_to(RolledBack));
        assert!(Escalated.can_transition_to(Finalized));
        assert!(!Escalated.can_transition_to(RolledBack));
        for terminal in [Finalized, RolledBack] {
            assert!(terminal.is_terminal());
            for next in [Recorded, Escalated, Finalized, RolledBack] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn visit_write_accepts_camel_case_json() {
        let w: VisitWrite = serde_json::from_value(serde_json::json!({
            "patientId": 7,
            "visitDate": "2024-02-01",
            "visitType": "follow_up",
            "doctorDecision": "complex_case",
            "history": { "presentingComplaint": "low mood" },
            "prescriptions": [{ "medicine": "sertraline" }]
        }))
        .unwrap();
        assert_eq!(w.visit_type, VisitType::FollowUp);
        assert_eq!(w.history.len(), 1);
        assert!(w.validate().unwrap().is_complex());
    }
}
