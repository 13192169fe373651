//! Doctor-assignment resolution.
//!
//! "Who is this patient's doctor right now" is answered the same way everywhere:
//!
//! 1. the doctor stored on the patient, if any;
//! 2. otherwise the doctor on the latest visit (visit date descending, then creation time
//!    descending);
//! 3. the name comes from the patient row unless it is blank or the
//!    [`UNKNOWN_DOCTOR_SENTINEL`], in which case it comes from the doctor's profile; the role
//!    always comes from the profile.
//!
//! If no doctor id resolves, every field is `None`. The sentinel never leaves this module.
//!
//! The functions here are pure; [`AssignmentService`] does the reads around them.

use crate::constants::UNKNOWN_DOCTOR_SENTINEL;
use crate::error::{CoreError, CoreResult};
use crate::model::{AssignedDoctor, DoctorProfile, Patient, Visit};
use crate::repositories::PatientDirectory;
use emr_types::NonEmptyText;
use std::sync::Arc;

/// The most recent visit: latest `visit_date`, ties broken by latest `created_at`.
pub fn latest_visit(visits: &[Visit]) -> Option<&Visit> {
    visits
        .iter()
        .max_by(|a, b| (a.visit_date, a.created_at).cmp(&(b.visit_date, b.created_at)))
}

/// Steps 1 and 2 of the resolution order.
pub fn resolve_doctor_id(patient: &Patient, latest_visit: Option<&Visit>) -> Option<i64> {
    patient
        .assigned_doctor_id
        .or_else(|| latest_visit.and_then(|v| v.assigned_doctor_id))
}

/// Blank names and the sentinel both mean "no name".
pub fn normalize_doctor_name(name: Option<&str>) -> Option<NonEmptyText> {
    NonEmptyText::optional(name).filter(|n| n.as_str() != UNKNOWN_DOCTOR_SENTINEL)
}

/// Resolves the assigned doctor.
///
/// `profile` is the looked-up profile of the resolved doctor id; a profile for any other id
/// is ignored.
pub fn resolve(
    patient: &Patient,
    latest_visit: Option<&Visit>,
    profile: Option<&DoctorProfile>,
) -> AssignedDoctor {
    let Some(doctor_id) = resolve_doctor_id(patient, latest_visit) else {
        return AssignedDoctor::default();
    };
    let profile = profile.filter(|p| p.id == doctor_id);

    let name = normalize_doctor_name(patient.assigned_doctor_name.as_deref())
        .or_else(|| profile.and_then(|p| normalize_doctor_name(Some(&p.name))));
    let role = profile.and_then(|p| NonEmptyText::new(&p.role).ok());

    AssignedDoctor {
        doctor_id: Some(doctor_id),
        name,
        role,
    }
}

/// Read-side wrapper that loads a patient's visits and doctor profile, then resolves.
#[derive(Clone)]
pub struct AssignmentService {
    directory: Arc<dyn PatientDirectory>,
}

impl AssignmentService {
    pub fn new(directory: Arc<dyn PatientDirectory>) -> Self {
        Self { directory }
    }

    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the patient does not exist, or any read error.
    pub async fn assigned_doctor(&self, patient_id: i64) -> CoreResult<AssignedDoctor> {
        let patient = self
            .directory
            .find_patient(patient_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "patient",
                id: patient_id,
            })?;
        let visits = self.directory.visits_for_patient(patient_id).await?;
        let latest = latest_visit(&visits);

        let profile = match resolve_doctor_id(&patient, latest) {
            Some(doctor_id) => self.directory.find_doctor(doctor_id).await?,
            None => None,
        };

        Ok(resolve(&patient, latest, profile.as_ref()))
    }
}
