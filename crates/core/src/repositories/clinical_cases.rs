use super::{state_in, ClinicalCaseStore, PgStore, ATTACH_FROM, COMPENSATE_FROM, FINALIZE_FROM};
use crate::error::{CoreError, CoreResult};
use crate::model::{CaseState, ClinicalCase, NewClinicalCase};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

const CASE_COLUMNS: &str = "id, patient_id, visit_date, visit_type, doctor_decision, \
     requires_intake_record, intake_record_id, saga_state, patient_status_synced, \
     prescriptions_attached, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct CaseRow {
    id: i64,
    patient_id: i64,
    visit_date: NaiveDate,
    visit_type: String,
    doctor_decision: String,
    requires_intake_record: bool,
    intake_record_id: Option<i64>,
    saga_state: String,
    patient_status_synced: bool,
    prescriptions_attached: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CaseRow> for ClinicalCase {
    type Error = CoreError;

    fn try_from(row: CaseRow) -> Result<Self, Self::Error> {
        Ok(ClinicalCase {
            id: row.id,
            patient_id: row.patient_id,
            visit_date: row.visit_date,
            visit_type: row.visit_type.parse()?,
            doctor_decision: row.doctor_decision.parse()?,
            requires_intake_record: row.requires_intake_record,
            intake_record_id: row.intake_record_id,
            state: row.saga_state.parse()?,
            patient_status_synced: row.patient_status_synced,
            prescriptions_attached: row.prescriptions_attached,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl PgStore {
    async fn fetch_case(&self, sql: &str, case_id: i64) -> CoreResult<Option<ClinicalCase>> {
        sqlx::query_as::<_, CaseRow>(sql)
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await?
            .map(ClinicalCase::try_from)
            .transpose()
    }

    /// Explains why a guarded update touched no row.
    async fn rejected_transition(&self, case_id: i64, to: CaseState) -> CoreError {
        match self.find_case(case_id).await {
            Ok(Some(case)) => CoreError::InvalidStateTransition {
                case_id,
                from: case.state,
                to,
            },
            Ok(None) => CoreError::NotFound {
                entity: "clinical case",
                id: case_id,
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl ClinicalCaseStore for PgStore {
    async fn insert_case(&self, case: &NewClinicalCase) -> CoreResult<ClinicalCase> {
        let sql = format!(
            "INSERT INTO clinical_cases (patient_id, visit_date, visit_type, doctor_decision, \
             requires_intake_record, intake_record_id, saga_state, patient_status_synced, \
             prescriptions_attached, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NULL, $6, false, false, now(), now()) \
             RETURNING {CASE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(case.patient_id)
            .bind(case.visit_date)
            .bind(case.visit_type.as_str())
            .bind(case.doctor_decision.as_str())
            .bind(case.requires_intake_record)
            .bind(CaseState::Recorded.as_str())
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn find_case(&self, case_id: i64) -> CoreResult<Option<ClinicalCase>> {
        let sql = format!("SELECT {CASE_COLUMNS} FROM clinical_cases WHERE id = $1");
        self.fetch_case(&sql, case_id).await
    }

    async fn attach_intake_record(
        &self,
        case_id: i64,
        intake_record_id: i64,
    ) -> CoreResult<ClinicalCase> {
        let sql = format!(
            "UPDATE clinical_cases SET intake_record_id = $2, saga_state = 'escalated', \
             updated_at = now() \
             WHERE id = $1 AND {} \
             RETURNING {CASE_COLUMNS}",
            state_in(ATTACH_FROM)
        );
        let row = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(case_id)
            .bind(intake_record_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row.try_into(),
            None => Err(self.rejected_transition(case_id, CaseState::Escalated).await),
        }
    }

    async fn finalize_case(
        &self,
        case_id: i64,
        patient_status_synced: bool,
        prescriptions_attached: bool,
    ) -> CoreResult<ClinicalCase> {
        let sql = format!(
            "UPDATE clinical_cases SET saga_state = 'finalized', \
             patient_status_synced = patient_status_synced OR $2, \
             prescriptions_attached = prescriptions_attached OR $3, updated_at = now() \
             WHERE id = $1 AND {} \
             RETURNING {CASE_COLUMNS}",
            state_in(FINALIZE_FROM)
        );
        let row = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(case_id)
            .bind(patient_status_synced)
            .bind(prescriptions_attached)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row.try_into(),
            None => Err(self.rejected_transition(case_id, CaseState::Finalized).await),
        }
    }

    async fn delete_recorded_case(&self, case_id: i64) -> CoreResult<bool> {
        let sql = format!(
            "DELETE FROM clinical_cases WHERE id = $1 AND {}",
            state_in(COMPENSATE_FROM)
        );
        let result = sqlx::query(&sql).bind(case_id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cases_awaiting_patient_sync(
        &self,
        limit: i64,
        settled_before: DateTime<Utc>,
    ) -> CoreResult<Vec<ClinicalCase>> {
        // Mirrors `awaiting_patient_sync`.
        let sql = format!(
            "SELECT {CASE_COLUMNS} FROM clinical_cases \
             WHERE doctor_decision = 'complex_case' AND intake_record_id IS NOT NULL \
             AND patient_status_synced = false \
             AND (saga_state = 'finalized' \
                  OR (saga_state = 'escalated' AND updated_at < $2)) \
             ORDER BY created_at, id LIMIT $1"
        );
        sqlx::query_as::<_, CaseRow>(&sql)
            .bind(limit)
            .bind(settled_before)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ClinicalCase::try_from)
            .collect()
    }

    async fn mark_patient_status_synced(
        &self,
        case_id: i64,
        settled_before: DateTime<Utc>,
    ) -> CoreResult<ClinicalCase> {
        let sql = format!(
            "UPDATE clinical_cases SET patient_status_synced = true, saga_state = 'finalized', \
             updated_at = now() \
             WHERE id = $1 AND intake_record_id IS NOT NULL \
             AND (saga_state = 'finalized' \
                  OR (saga_state = 'escalated' AND updated_at < $2)) \
             RETURNING {CASE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(case_id)
            .bind(settled_before)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row.try_into(),
            None => Err(self.rejected_transition(case_id, CaseState::Finalized).await),
        }
    }
}
