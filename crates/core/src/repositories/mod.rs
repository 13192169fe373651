//! Storage seams and their PostgreSQL implementation.
//!
//! The saga, the resolver and the cascade delete only see the traits defined here.
//! [`PgStore`] implements all of them over one injected `PgPool`; the pool's lifecycle belongs
//! to the process entry point.
//!
//! Tables read or written (columns beyond these are left alone):
//! - `patients (id, assigned_doctor_id, assigned_doctor_name, has_intake_file, case_complexity)`
//! - `visits (id, patient_id, assigned_doctor_id, visit_date, visit_status, created_at)`
//! - `clinical_cases (id, patient_id, visit_date, visit_type, doctor_decision,
//!   requires_intake_record, intake_record_id, saga_state, patient_status_synced,
//!   prescriptions_attached, created_at, updated_at)`
//! - `intake_records (id, patient_id, clinical_case_id, file_status)`
//! - `prescriptions (id, patient_id, clinical_case_id)`
//! - `users (id, name, role)`

use crate::error::CoreResult;
use crate::model::{CaseState, ClinicalCase, DoctorProfile, NewClinicalCase, Patient, Visit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub mod cascade;
pub mod clinical_cases;
pub mod patients;

#[cfg(test)]
pub(crate) mod memory;

/// Clinical cases as owned by the clinical-proforma service.
///
/// State-changing methods enforce the case lifecycle: a write whose current state does not
/// allow the move fails with `CoreError::InvalidStateTransition`.
#[async_trait]
pub trait ClinicalCaseStore: Send + Sync {
    /// Step A: inserts the case in state `Recorded` with no intake record.
    async fn insert_case(&self, case: &NewClinicalCase) -> CoreResult<ClinicalCase>;

    async fn find_case(&self, case_id: i64) -> CoreResult<Option<ClinicalCase>>;

    /// Step C: stores the intake record id, `Recorded -> Escalated`.
    async fn attach_intake_record(
        &self,
        case_id: i64,
        intake_record_id: i64,
    ) -> CoreResult<ClinicalCase>;

    /// Moves a `Recorded` or `Escalated` case to `Finalized` with the best-effort outcomes.
    ///
    /// A flag already set by the reconciler stays set.
    async fn finalize_case(
        &self,
        case_id: i64,
        patient_status_synced: bool,
        prescriptions_attached: bool,
    ) -> CoreResult<ClinicalCase>;

    /// Compensation: deletes the case only while it is still `Recorded`.
    ///
    /// Returns whether a row was deleted.
    async fn delete_recorded_case(&self, case_id: i64) -> CoreResult<bool>;

    /// Complex cases with an intake record whose patient status was never mirrored, oldest
    /// first: finalized ones, and escalated ones untouched since `settled_before`.
    async fn cases_awaiting_patient_sync(
        &self,
        limit: i64,
        settled_before: DateTime<Utc>,
    ) -> CoreResult<Vec<ClinicalCase>>;

    /// Records a successful Step D replay.
    ///
    /// Sets only `patient_status_synced` on a finalized case. An abandoned `Escalated` case
    /// (untouched since `settled_before`) is also finalized; its `prescriptions_attached`
    /// flag is kept as is.
    async fn mark_patient_status_synced(
        &self,
        case_id: i64,
        settled_before: DateTime<Utc>,
    ) -> CoreResult<ClinicalCase>;
}

/// States `attach_intake_record` accepts.
pub(crate) const ATTACH_FROM: &[CaseState] = &[CaseState::Recorded];

/// States `finalize_case` accepts.
pub(crate) const FINALIZE_FROM: &[CaseState] = &[CaseState::Recorded, CaseState::Escalated];

/// States `delete_recorded_case` accepts.
pub(crate) const COMPENSATE_FROM: &[CaseState] = &[CaseState::Recorded];

/// `saga_state IN (..)` for a guarded update. Both stores read the same lists above.
pub(crate) fn state_in(states: &[CaseState]) -> String {
    let list = states
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("saga_state IN ({list})")
}

/// Whether the reconciler may replay Step D for `case`.
///
/// An `Escalated` case updated at or after `settled_before` may still have its saga running,
/// so it is left alone. `PgStore` expresses the same rule in SQL.
pub(crate) fn awaiting_patient_sync(case: &ClinicalCase, settled_before: DateTime<Utc>) -> bool {
    case.is_complex()
        && case.intake_record_id.is_some()
        && !case.patient_status_synced
        && match case.state {
            CaseState::Finalized => true,
            CaseState::Escalated => case.updated_at < settled_before,
            CaseState::Recorded | CaseState::RolledBack => false,
        }
}

/// Read-only access to patients, visits and staff for doctor resolution.
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn find_patient(&self, patient_id: i64) -> CoreResult<Option<Patient>>;

    async fn visits_for_patient(&self, patient_id: i64) -> CoreResult<Vec<Visit>>;

    async fn find_doctor(&self, doctor_id: i64) -> CoreResult<Option<DoctorProfile>>;
}

/// Opens the single transaction a patient delete runs in.
#[async_trait]
pub trait CascadeStore: Send + Sync {
    async fn begin(&self) -> CoreResult<Box<dyn CascadeTx>>;
}

/// One open delete transaction. Dropping it without `commit` rolls everything back.
#[async_trait]
pub trait CascadeTx: Send {
    /// Locks the patient row for the rest of the transaction; `false` if it does not exist.
    async fn lock_patient(&mut self, patient_id: i64) -> CoreResult<bool>;

    async fn clinical_case_ids(&mut self, patient_id: i64) -> CoreResult<Vec<i64>>;

    async fn delete_prescriptions_for_cases(&mut self, case_ids: &[i64]) -> CoreResult<u64>;

    async fn delete_prescriptions_for_patient(&mut self, patient_id: i64) -> CoreResult<u64>;

    async fn delete_intake_records(&mut self, patient_id: i64) -> CoreResult<u64>;

    async fn delete_clinical_cases(&mut self, patient_id: i64) -> CoreResult<u64>;

    async fn delete_visits(&mut self, patient_id: i64) -> CoreResult<u64>;

    async fn delete_patient(&mut self, patient_id: i64) -> CoreResult<u64>;

    async fn commit(self: Box<Self>) -> CoreResult<()>;

    async fn rollback(self: Box<Self>) -> CoreResult<()>;
}

/// PostgreSQL-backed implementation of every store trait.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the saga bookkeeping columns to `clinical_cases`.
    pub async fn migrate(&self) -> CoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }
}
