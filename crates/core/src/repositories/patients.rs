use super::{PatientDirectory, PgStore};
use crate::error::{CoreError, CoreResult};
use crate::model::{DoctorProfile, Patient, Visit};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use emr_types::CaseComplexity;

#[derive(Debug, sqlx::FromRow)]
struct PatientRow {
    id: i64,
    assigned_doctor_id: Option<i64>,
    assigned_doctor_name: Option<String>,
    has_intake_file: Option<bool>,
    case_complexity: Option<String>,
}

impl TryFrom<PatientRow> for Patient {
    type Error = CoreError;

    fn try_from(row: PatientRow) -> Result<Self, Self::Error> {
        let case_complexity = match row.case_complexity.as_deref() {
            None | Some("") => CaseComplexity::Simple,
            Some(value) => value.parse()?,
        };
        Ok(Patient {
            id: row.id,
            assigned_doctor_id: row.assigned_doctor_id,
            assigned_doctor_name: row.assigned_doctor_name,
            has_intake_file: row.has_intake_file.unwrap_or(false),
            case_complexity,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VisitRow {
    id: i64,
    patient_id: i64,
    assigned_doctor_id: Option<i64>,
    visit_date: NaiveDate,
    visit_status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<VisitRow> for Visit {
    type Error = CoreError;

    fn try_from(row: VisitRow) -> Result<Self, Self::Error> {
        Ok(Visit {
            id: row.id,
            patient_id: row.patient_id,
            assigned_doctor_id: row.assigned_doctor_id,
            visit_date: row.visit_date,
            visit_status: row.visit_status.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DoctorRow {
    id: i64,
    name: Option<String>,
    role: Option<String>,
}

#[async_trait]
impl PatientDirectory for PgStore {
    async fn find_patient(&self, patient_id: i64) -> CoreResult<Option<Patient>> {
        sqlx::query_as::<_, PatientRow>(
            r#"
            SELECT id, assigned_doctor_id, assigned_doctor_name, has_intake_file, case_complexity
            FROM patients
            WHERE id = $1
            "#,
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Patient::try_from)
        .transpose()
    }

    async fn visits_for_patient(&self, patient_id: i64) -> CoreResult<Vec<Visit>> {
        sqlx::query_as::<_, VisitRow>(
            r#"
            SELECT id, patient_id, assigned_doctor_id, visit_date, visit_status, created_at
            FROM visits
            WHERE patient_id = $1
            ORDER BY visit_date DESC, created_at DESC
            "#,
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Visit::try_from)
        .collect()
    }

    async fn find_doctor(&self, doctor_id: i64) -> CoreResult<Option<DoctorProfile>> {
        let row = sqlx::query_as::<_, DoctorRow>("SELECT id, name, role FROM users WHERE id = $1")
            .bind(doctor_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| DoctorProfile {
            id: r.id,
            name: r.name.unwrap_or_default(),
            role: r.role.unwrap_or_default(),
        }))
    }
}
