//! In-memory store used by the unit tests, with switchable faults.
//!
//! Guarded writes read the same state lists as the SQL in `clinical_cases.rs`.

use super::{
    awaiting_patient_sync, CascadeStore, CascadeTx, ClinicalCaseStore, PatientDirectory,
    ATTACH_FROM, COMPENSATE_FROM, FINALIZE_FROM,
};
use crate::error::{CoreError, CoreResult};
use crate::model::{
    CaseState, ClinicalCase, DoctorProfile, IntakeRecord, NewClinicalCase, Patient, Visit,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StoredPrescription {
    pub id: i64,
    pub patient_id: i64,
    pub clinical_case_id: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Tables {
    pub patients: BTreeMap<i64, Patient>,
    pub visits: Vec<Visit>,
    pub cases: BTreeMap<i64, ClinicalCase>,
    pub intake_records: Vec<IntakeRecord>,
    pub prescriptions: Vec<StoredPrescription>,
    pub doctors: BTreeMap<i64, DoctorProfile>,
    next_case_id: i64,
}

/// A cascade tier the test can make fail before it runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CascadeStage {
    IntakeRecords,
    ClinicalCases,
    Visits,
    Patient,
}

#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub fail_attach: bool,
    pub fail_finalize: bool,
    pub fail_compensation: bool,
    pub fail_cascade_before: Option<CascadeStage>,
}

#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<Faults>>,
}

fn injected(what: &str) -> CoreError {
    CoreError::Database(sqlx::Error::Protocol(format!("injected failure: {what}")))
}

impl MemoryStore {
    pub fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }

    pub fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap()
    }

    pub fn add_patient(&self, patient: Patient) {
        self.tables().patients.insert(patient.id, patient);
    }

    pub fn add_visit(&self, visit: Visit) {
        self.tables().visits.push(visit);
    }

    pub fn add_doctor(&self, doctor: DoctorProfile) {
        self.tables().doctors.insert(doctor.id, doctor);
    }

    pub fn add_intake_record(&self, record: IntakeRecord) {
        self.tables().intake_records.push(record);
    }

    pub fn add_prescription(&self, prescription: StoredPrescription) {
        self.tables().prescriptions.push(prescription);
    }

    pub fn case(&self, case_id: i64) -> Option<ClinicalCase> {
        self.tables().cases.get(&case_id).cloned()
    }

    pub fn case_count(&self) -> usize {
        self.tables().cases.len()
    }

    /// Applies `apply` and moves the case to `to` when `allowed` holds for it.
    fn transition(
        &self,
        case_id: i64,
        to: CaseState,
        allowed: impl FnOnce(&ClinicalCase) -> bool,
        apply: impl FnOnce(&mut ClinicalCase),
    ) -> CoreResult<ClinicalCase> {
        let mut tables = self.tables();
        let case = tables.cases.get_mut(&case_id).ok_or(CoreError::NotFound {
            entity: "clinical case",
            id: case_id,
        })?;
        if !allowed(case) {
            return Err(CoreError::InvalidStateTransition {
                case_id,
                from: case.state,
                to,
            });
        }
        apply(case);
        case.state = to;
        case.updated_at = Utc::now();
        Ok(case.clone())
    }
}

#[async_trait]
impl ClinicalCaseStore for MemoryStore {
    async fn insert_case(&self, case: &NewClinicalCase) -> CoreResult<ClinicalCase> {
        let mut tables = self.tables();
        tables.next_case_id += 1;
        let now = Utc::now();
        let stored = ClinicalCase {
            id: tables.next_case_id,
            patient_id: case.patient_id,
            visit_date: case.visit_date,
            visit_type: case.visit_type,
            doctor_decision: case.doctor_decision,
            requires_intake_record: case.requires_intake_record,
            intake_record_id: None,
            state: CaseState::Recorded,
            patient_status_synced: false,
            prescriptions_attached: false,
            created_at: now,
            updated_at: now,
        };
        tables.cases.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_case(&self, case_id: i64) -> CoreResult<Option<ClinicalCase>> {
        Ok(self.case(case_id))
    }

    async fn attach_intake_record(
        &self,
        case_id: i64,
        intake_record_id: i64,
    ) -> CoreResult<ClinicalCase> {
        if self.faults().fail_attach {
            return Err(injected("attach intake record"));
        }
        self.transition(
            case_id,
            CaseState::Escalated,
            |case| ATTACH_FROM.contains(&case.state),
            |case| case.intake_record_id = Some(intake_record_id),
        )
    }

    async fn finalize_case(
        &self,
        case_id: i64,
        patient_status_synced: bool,
        prescriptions_attached: bool,
    ) -> CoreResult<ClinicalCase> {
        if self.faults().fail_finalize {
            return Err(injected("finalize case"));
        }
        self.transition(
            case_id,
            CaseState::Finalized,
            |case| FINALIZE_FROM.contains(&case.state),
            |case| {
                case.patient_status_synced |= patient_status_synced;
                case.prescriptions_attached |= prescriptions_attached;
            },
        )
    }

    async fn delete_recorded_case(&self, case_id: i64) -> CoreResult<bool> {
        if self.faults().fail_compensation {
            return Err(injected("delete recorded case"));
        }
        let mut tables = self.tables();
        let recorded = tables
            .cases
            .get(&case_id)
            .is_some_and(|c| COMPENSATE_FROM.contains(&c.state));
        if recorded {
            tables.cases.remove(&case_id);
        }
        Ok(recorded)
    }

    async fn cases_awaiting_patient_sync(
        &self,
        limit: i64,
        settled_before: DateTime<Utc>,
    ) -> CoreResult<Vec<ClinicalCase>> {
        Ok(self
            .tables()
            .cases
            .values()
            .filter(|c| awaiting_patient_sync(c, settled_before))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_patient_status_synced(
        &self,
        case_id: i64,
        settled_before: DateTime<Utc>,
    ) -> CoreResult<ClinicalCase> {
        self.transition(
            case_id,
            CaseState::Finalized,
            |case| {
                case.intake_record_id.is_some()
                    && match case.state {
                        CaseState::Finalized => true,
                        CaseState::Escalated => case.updated_at < settled_before,
                        CaseState::Recorded | CaseState::RolledBack => false,
                    }
            },
            |case| case.patient_status_synced = true,
        )
    }
}

#[async_trait]
impl PatientDirectory for MemoryStore {
    async fn find_patient(&self, patient_id: i64) -> CoreResult<Option<Patient>> {
        Ok(self.tables().patients.get(&patient_id).cloned())
    }

    async fn visits_for_patient(&self, patient_id: i64) -> CoreResult<Vec<Visit>> {
        // Insertion order on purpose: the resolver must not rely on the store's ordering.
        Ok(self
            .tables()
            .visits
            .iter()
            .filter(|v| v.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn find_doctor(&self, doctor_id: i64) -> CoreResult<Option<DoctorProfile>> {
        Ok(self.tables().doctors.get(&doctor_id).cloned())
    }
}

/// Works on a private copy of the tables and publishes it on commit.
pub(crate) struct MemoryCascadeTx {
    working: Tables,
    shared: Arc<Mutex<Tables>>,
    fail_before: Option<CascadeStage>,
}

impl MemoryCascadeTx {
    fn check(&self, stage: CascadeStage) -> CoreResult<()> {
        if self.fail_before == Some(stage) {
            return Err(injected("cascade delete"));
        }
        Ok(())
    }
}

fn count(before: usize, after: usize) -> u64 {
    (before - after) as u64
}

#[async_trait]
impl CascadeStore for MemoryStore {
    async fn begin(&self) -> CoreResult<Box<dyn CascadeTx>> {
        Ok(Box::new(MemoryCascadeTx {
            working: self.tables().clone(),
            shared: self.tables.clone(),
            fail_before: self.faults().fail_cascade_before,
        }))
    }
}

#[async_trait]
impl CascadeTx for MemoryCascadeTx {
    async fn lock_patient(&mut self, patient_id: i64) -> CoreResult<bool> {
        Ok(self.working.patients.contains_key(&patient_id))
    }

    async fn clinical_case_ids(&mut self, patient_id: i64) -> CoreResult<Vec<i64>> {
        Ok(self
            .working
            .cases
            .values()
            .filter(|c| c.patient_id == patient_id)
            .map(|c| c.id)
            .collect())
    }

    async fn delete_prescriptions_for_cases(&mut self, case_ids: &[i64]) -> CoreResult<u64> {
        let before = self.working.prescriptions.len();
        self.working
            .prescriptions
            .retain(|p| !p.clinical_case_id.is_some_and(|id| case_ids.contains(&id)));
        Ok(count(before, self.working.prescriptions.len()))
    }

    async fn delete_prescriptions_for_patient(&mut self, patient_id: i64) -> CoreResult<u64> {
        let before = self.working.prescriptions.len();
        self.working.prescriptions.retain(|p| p.patient_id != patient_id);
        Ok(count(before, self.working.prescriptions.len()))
    }

    async fn delete_intake_records(&mut self, patient_id: i64) -> CoreResult<u64> {
        self.check(CascadeStage::IntakeRecords)?;
        let before = self.working.intake_records.len();
        self.working.intake_records.retain(|r| r.patient_id != patient_id);
        Ok(count(before, self.working.intake_records.len()))
    }

    async fn delete_clinical_cases(&mut self, patient_id: i64) -> CoreResult<u64> {
        self.check(CascadeStage::ClinicalCases)?;
        let before = self.working.cases.len();
        self.working.cases.retain(|_, c| c.patient_id != patient_id);
        Ok(count(before, self.working.cases.len()))
    }

    async fn delete_visits(&mut self, patient_id: i64) -> CoreResult<u64> {
        self.check(CascadeStage::Visits)?;
        let before = self.working.visits.len();
        self.working.visits.retain(|v| v.patient_id != patient_id);
        Ok(count(before, self.working.visits.len()))
    }

    async fn delete_patient(&mut self, patient_id: i64) -> CoreResult<u64> {
        self.check(CascadeStage::Patient)?;
        Ok(u64::from(self.working.patients.remove(&patient_id).is_some()))
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        let MemoryCascadeTx {
            working, shared, ..
        } = *self;
        *shared.lock().unwrap() = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        Ok(())
    }
}
