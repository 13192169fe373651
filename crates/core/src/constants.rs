//! Constants used throughout the EMR core crate.
//!
//! Collects service names, header names and defaults so the saga, the client and the
//! binaries agree on them.

/// Placeholder doctor name written by older patient-record code paths; never shown to callers.
pub const UNKNOWN_DOCTOR_SENTINEL: &str = "Unknown Doctor";

/// Service name used in logs and errors for the intake-record service.
pub const INTAKE_SERVICE: &str = "intake-record";

/// Service name used in logs and errors for the patient-record service.
pub const PATIENT_SERVICE: &str = "patient-record";

/// Service name used in logs and errors for the prescription service.
pub const PRESCRIPTION_SERVICE: &str = "prescription";

/// Header carrying the per-step idempotency key on every remote call.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// File status sent to the patient-record service once an intake record exists.
pub const INTAKE_FILE_STATUS_CREATED: &str = "created";

/// Default number of attempts for best-effort remote steps.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default base delay for the exponential backoff between attempts.
pub const DEFAULT_RETRY_BASE_MS: u64 = 200;

/// Upper bound on any single backoff delay.
pub const MAX_RETRY_DELAY_MS: u64 = 5_000;

/// Default interval between reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;

/// How long an `escalated` case must sit untouched before the reconciler treats its saga as
/// abandoned.
pub const DEFAULT_RECONCILE_GRACE_SECS: u64 = 600;

/// Maximum number of cases examined by one reconciliation pass.
pub const RECONCILE_BATCH_SIZE: i64 = 100;

/// Default REST listen address.
pub const DEFAULT_REST_ADDR: &str = "0.0.0.0:3000";
