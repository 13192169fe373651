//! Atomic patient delete.
//!
//! A patient owns rows in five tables. They are removed children-first inside one
//! transaction, after the patient row has been locked:
//!
//! 1. prescriptions of the patient's clinical cases
//! 2. prescriptions referencing the patient directly
//! 3. intake records
//! 4. clinical cases
//! 5. visits
//! 6. the patient
//!
//! Any failure rolls the whole delete back. Nothing is deleted for a patient that does not
//! exist.

use crate::error::{CoreError, CoreResult};
use crate::model::{DeleteCounts, DeleteResult};
use crate::repositories::{CascadeStore, CascadeTx};
use std::sync::Arc;

#[derive(Clone)]
pub struct CascadeDeleteTransaction {
    store: Arc<dyn CascadeStore>,
}

impl CascadeDeleteTransaction {
    pub fn new(store: Arc<dyn CascadeStore>) -> Self {
        Self { store }
    }

    /// Deletes the patient and everything that references it.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if the patient does not exist; no row was touched.
    /// - [`CoreError::Transaction`] wrapping the cause if any delete or the commit failed; the
    ///   transaction was rolled back.
    pub async fn delete_patient(&self, patient_id: i64) -> CoreResult<DeleteResult> {
        let mut tx = self.store.begin().await.map_err(abort)?;

        match tx.lock_patient(patient_id).await {
            Ok(true) => {}
            Ok(false) => {
                release(tx, patient_id).await;
                return Err(CoreError::NotFound {
                    entity: "patient",
                    id: patient_id,
                });
            }
            Err(e) => {
                release(tx, patient_id).await;
                return Err(abort(e));
            }
        }

        match cascade(tx.as_mut(), patient_id).await {
            Ok(counts) => {
                tx.commit().await.map_err(abort)?;
                tracing::info!(
                    patient_id,
                    clinical_cases = counts.clinical_cases,
                    visits = counts.visits,
                    intake_records = counts.intake_records,
                    prescriptions = counts.prescriptions_by_case + counts.prescriptions_by_patient,
                    "patient deleted"
                );
                Ok(DeleteResult {
                    deleted: true,
                    counts,
                })
            }
            Err(e) => {
                tracing::error!(patient_id, error = %e, "patient delete failed, rolling back");
                release(tx, patient_id).await;
                Err(abort(e))
            }
        }
    }
}

async fn cascade(tx: &mut dyn CascadeTx, patient_id: i64) -> CoreResult<DeleteCounts> {
    let case_ids = tx.clinical_case_ids(patient_id).await?;
    Ok(DeleteCounts {
        prescriptions_by_case: tx.delete_prescriptions_for_cases(&case_ids).await?,
        prescriptions_by_patient: tx.delete_prescriptions_for_patient(patient_id).await?,
        intake_records: tx.delete_intake_records(patient_id).await?,
        clinical_cases: tx.delete_clinical_cases(patient_id).await?,
        visits: tx.delete_visits(patient_id).await?,
        patients: tx.delete_patient(patient_id).await?,
    })
}

/// Rolls back; a failed rollback is only logged since the connection discards the
/// transaction anyway.
async fn release(tx: Box<dyn CascadeTx>, patient_id: i64) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(patient_id, error = %e, "rollback of patient delete failed");
    }
}

fn abort(cause: CoreError) -> CoreError {
    CoreError::Transaction(Box::new(cause))
}
