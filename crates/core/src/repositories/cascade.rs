use super::{CascadeStore, CascadeTx, PgStore};
use crate::error::CoreResult;
use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

/// A patient delete running inside one PostgreSQL transaction.
///
/// `sqlx` rolls the transaction back when it is dropped uncommitted, so an early `?` return
/// from the cascade leaves no partial effect.
pub struct PgCascadeTx {
    tx: Transaction<'static, Postgres>,
}

impl PgCascadeTx {
    async fn delete_by(&mut self, sql: &str, id: i64) -> CoreResult<u64> {
        let result = sqlx::query(sql).bind(id).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CascadeStore for PgStore {
    async fn begin(&self) -> CoreResult<Box<dyn CascadeTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCascadeTx { tx }))
    }
}

#[async_trait]
impl CascadeTx for PgCascadeTx {
    async fn lock_patient(&mut self, patient_id: i64) -> CoreResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM patients WHERE id = $1 FOR UPDATE")
                .bind(patient_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(found.is_some())
    }

    async fn clinical_case_ids(&mut self, patient_id: i64) -> CoreResult<Vec<i64>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM clinical_cases WHERE patient_id = $1 ORDER BY id")
                .bind(patient_id)
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(ids)
    }

    async fn delete_prescriptions_for_cases(&mut self, case_ids: &[i64]) -> CoreResult<u64> {
        if case_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM prescriptions WHERE clinical_case_id = ANY($1)")
            .bind(case_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_prescriptions_for_patient(&mut self, patient_id: i64) -> CoreResult<u64> {
        self.delete_by("DELETE FROM prescriptions WHERE patient_id = $1", patient_id)
            .await
    }

    async fn delete_intake_records(&mut self, patient_id: i64) -> CoreResult<u64> {
        self.delete_by("DELETE FROM intake_records WHERE patient_id = $1", patient_id)
            .await
    }

    async fn delete_clinical_cases(&mut self, patient_id: i64) -> CoreResult<u64> {
        self.delete_by("DELETE FROM clinical_cases WHERE patient_id = $1", patient_id)
            .await
    }

    async fn delete_visits(&mut self, patient_id: i64) -> CoreResult<u64> {
        self.delete_by("DELETE FROM visits WHERE patient_id = $1", patient_id)
            .await
    }

    async fn delete_patient(&mut self, patient_id: i64) -> CoreResult<u64> {
        self.delete_by("DELETE FROM patients WHERE id = $1", patient_id)
            .await
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
