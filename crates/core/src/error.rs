use crate::client::ServiceError;
use crate::model::CaseState;

/// The saga step a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    /// Persist the clinical case (intent recorded).
    RecordCase,
    /// Create the intake record in the intake-record service.
    CreateIntakeRecord,
    /// Store the intake record id on the clinical case.
    AttachIntakeRecord,
    /// Mirror the intake file onto the patient in the patient-record service.
    SyncPatientStatus,
    /// Attach prescriptions in the prescription service.
    AttachPrescriptions,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::RecordCase => "record-case",
            SagaStep::CreateIntakeRecord => "create-intake-record",
            SagaStep::AttachIntakeRecord => "attach-intake-record",
            SagaStep::SyncPatientStatus => "sync-patient-status",
            SagaStep::AttachPrescriptions => "attach-prescriptions",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{step} failed: {source}")]
    Remote {
        step: SagaStep,
        #[source]
        source: ServiceError,
    },
    #[error("data integrity violated: {0}")]
    DataIntegrity(String),
    #[error("escalation of clinical case {case_id} rolled back: {source}")]
    RolledBack {
        case_id: i64,
        #[source]
        source: Box<CoreError>,
    },
    #[error(
        "compensation of clinical case {case_id} failed: original={source}; compensation={compensation_error}"
    )]
    CompensationFailed {
        case_id: i64,
        #[source]
        source: Box<CoreError>,
        compensation_error: Box<CoreError>,
    },
    #[error("clinical case {case_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        case_id: i64,
        from: CaseState,
        to: CaseState,
    },

    #[error("patient delete transaction aborted: {0}")]
    Transaction(#[source] Box<CoreError>),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored value is invalid: {0}")]
    StoredValue(#[from] emr_types::VocabularyError),
}

impl CoreError {
    /// The downstream failure at the root of this error, if any.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            CoreError::Remote { source, .. } => Some(source),
            CoreError::RolledBack { source, .. } | CoreError::CompensationFailed { source, .. } => {
                source.service_error()
            }
            _ => None,
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
