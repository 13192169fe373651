//! # EMR Core
//!
//! Cross-service coordination for the clinic's EMR backend.
//!
//! This crate owns the rules that span more than one service:
//! - resolving a patient's currently assigned doctor ([`assignment`])
//! - escalating a complex clinical case into an intake record, with compensation ([`saga`])
//! - replaying patient-status syncs that were lost ([`reconcile`])
//! - deleting a patient and every dependent row atomically ([`cascade`])
//!
//! Calls to the intake-record, patient-record and prescription services go through
//! [`client::ServiceClient`], which maps every failure into [`client::ServiceError`].
//!
//! **No API concerns**: HTTP routing, authentication and response shapes belong in `api-rest`
//! and `api-shared`. The database pool and HTTP client are created by the binaries and
//! injected here.

pub mod assignment;
pub mod cascade;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod remote;
pub mod repositories;
pub mod retry;
pub mod saga;

#[cfg(test)]
pub(crate) mod testing;

pub use assignment::AssignmentService;
pub use cascade::CascadeDeleteTransaction;
pub use client::{Credential, ServiceClient, ServiceError};
pub use config::{core_config_from_lookup, CoreConfig};
pub use error::{CoreError, CoreResult, SagaStep};
pub use reconcile::{ReconcileReport, Reconciler};
pub use remote::{ClinicalServices, HttpClinicalServices};
pub use repositories::PgStore;
pub use retry::RetryPolicy;
pub use saga::{CaseEscalationSaga, EscalationOutcome, StepStatus, SyncStatus};
