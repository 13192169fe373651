//! # API REST
//!
//! REST API implementation for the EMR coordination core.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON bodies, CORS, error-to-status mapping)
//!
//! Uses `api-shared` for request/response bodies and credential handling. The handlers are
//! thin: every rule lives in `emr-core`.

#![warn(rust_2018_idioms)]

use api_shared::{
    auth::{forwarded_credential, reconcile_credential},
    AssignedDoctorRes, ClinicalCaseRes, DeleteCountsRes, DeletePatientRes, EscalateReq,
    EscalateRes, HealthRes, HealthService, ReconcileRes, StepStatusRes, SyncStatusRes,
};
use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use emr_core::{
    constants::RECONCILE_BATCH_SIZE,
    model::VisitWrite,
    repositories::{CascadeStore, ClinicalCaseStore, PatientDirectory},
    AssignmentService, CascadeDeleteTransaction, CaseEscalationSaga, ClinicalServices, CoreConfig,
    CoreError, Credential, HttpClinicalServices, PgStore, Reconciler,
};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Error half of every handler result.
pub type ApiError = (StatusCode, &'static str);

/// Application state shared across REST API handlers
///
/// Every component is built once at startup from the resolved [`CoreConfig`] and shares the
/// same store and downstream clients.
#[derive(Clone)]
pub struct AppState {
    saga: CaseEscalationSaga,
    cases: Arc<dyn ClinicalCaseStore>,
    assignments: AssignmentService,
    cascade: CascadeDeleteTransaction,
    reconciler: Reconciler,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, services: Arc<dyn ClinicalServices>, cfg: &CoreConfig) -> Self
    where
        S: ClinicalCaseStore + PatientDirectory + CascadeStore + 'static,
    {
        let cases: Arc<dyn ClinicalCaseStore> = store.clone();
        Self {
            saga: CaseEscalationSaga::new(cases.clone(), services.clone(), cfg.retry_policy()),
            assignments: AssignmentService::new(store.clone()),
            cascade: CascadeDeleteTransaction::new(store),
            reconciler: Reconciler::new(
                cases.clone(),
                services,
                cfg.retry_policy(),
                cfg.reconcile_credential().cloned(),
            )
            .with_grace(cfg.reconcile_grace()),
            cases,
        }
    }

    /// Opens the database pool and the downstream HTTP clients.
    ///
    /// # Errors
    /// Returns an error if the database cannot be reached or a service URL is unusable.
    pub async fn connect(cfg: &CoreConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(cfg.database_url())
            .await?;
        let services = HttpClinicalServices::from_config(cfg, reqwest::Client::new())?;
        Ok(Self::new(
            Arc::new(PgStore::new(pool)),
            Arc::new(services),
            cfg,
        ))
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        escalate_clinical_case,
        get_clinical_case,
        assigned_doctor,
        delete_patient,
        reconcile,
    ),
    components(schemas(
        HealthRes,
        EscalateReq,
        EscalateRes,
        ClinicalCaseRes,
        SyncStatusRes,
        StepStatusRes,
        AssignedDoctorRes,
        DeletePatientRes,
        DeleteCountsRes,
        ReconcileRes,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/clinical-cases", post(escalate_clinical_case))
        .route("/clinical-cases/:id", get(get_clinical_case))
        .route("/patients/:id/assigned-doctor", get(assigned_doctor))
        .route("/patients/:id", delete(delete_patient))
        .route("/admin/reconcile", post(reconcile))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Maps a core failure onto a response status.
///
/// Downstream 401/403 pass through so the caller sees its own credential problem; any other
/// downstream failure is a bad gateway.
pub fn error_status(err: &CoreError) -> ApiError {
    match err {
        CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid request"),
        CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "not found"),
        CoreError::Transaction(_) => (StatusCode::INTERNAL_SERVER_ERROR, "patient delete failed"),
        _ => match err.service_error().map(|e| e.status()) {
            Some(Some(401)) => (
                StatusCode::UNAUTHORIZED,
                "downstream service rejected the credential",
            ),
            Some(Some(403)) => (
                StatusCode::FORBIDDEN,
                "downstream service refused the request",
            ),
            Some(_) => (StatusCode::BAD_GATEWAY, "downstream service failed"),
            None if is_downstream_integrity(err) => {
                (StatusCode::BAD_GATEWAY, "downstream service failed")
            }
            None => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error"),
        },
    }
}

fn is_downstream_integrity(err: &CoreError) -> bool {
    match err {
        CoreError::DataIntegrity(_) => true,
        CoreError::RolledBack { source, .. } | CoreError::CompensationFailed { source, .. } => {
            is_downstream_integrity(source)
        }
        _ => false,
    }
}

fn api_error(err: CoreError) -> ApiError {
    let reply = error_status(&err);
    if reply.0.is_server_error() {
        tracing::error!(status = reply.0.as_u16(), error = %err, "request failed");
    } else {
        tracing::warn!(status = reply.0.as_u16(), error = %err, "request rejected");
    }
    reply
}

fn inbound_credential(headers: &HeaderMap) -> Option<Credential> {
    forwarded_credential(
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    )
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// Used for monitoring and load balancer health checks.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/clinical-cases",
    request_body = EscalateReq,
    responses(
        (status = 201, description = "Clinical case recorded; best-effort steps reported in syncStatus", body = EscalateRes),
        (status = 400, description = "Missing or invalid input, nothing written"),
        (status = 401, description = "Downstream service rejected the forwarded credential"),
        (status = 502, description = "Intake record could not be created, case rolled back"),
        (status = 500, description = "Internal server error")
    )
)]
/// Record a visit-level clinical write
///
/// Complex cases are escalated into an intake record. If that fails, the clinical case is
/// deleted again and the request fails. Patient-status and prescription failures do not fail
/// the request; they are reported per step in `syncStatus`.
///
/// The inbound `Authorization` header is forwarded to every downstream service.
#[axum::debug_handler]
async fn escalate_clinical_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EscalateReq>,
) -> Result<(StatusCode, Json<EscalateRes>), ApiError> {
    let write = VisitWrite::try_from(req).map_err(api_error)?;
    let credential = inbound_credential(&headers);
    let outcome = state
        .saga
        .escalate(write, credential.as_ref())
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

#[utoipa::path(
    get,
    path = "/clinical-cases/{id}",
    params(("id" = i64, Path, description = "Clinical case id")),
    responses(
        (status = 200, description = "Clinical case", body = ClinicalCaseRes),
        (status = 404, description = "No such clinical case")
    )
)]
#[axum::debug_handler]
async fn get_clinical_case(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ClinicalCaseRes>, ApiError> {
    match state.cases.find_case(id).await.map_err(api_error)? {
        Some(case) => Ok(Json(case.into())),
        None => Err(api_error(CoreError::NotFound {
            entity: "clinical case",
            id,
        })),
    }
}

#[utoipa::path(
    get,
    path = "/patients/{id}/assigned-doctor",
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Currently assigned doctor; fields are null when none resolves", body = AssignedDoctorRes),
        (status = 404, description = "No such patient")
    )
)]
/// Resolve a patient's currently assigned doctor
///
/// The patient's own doctor wins; otherwise the doctor on the latest visit.
#[axum::debug_handler]
async fn assigned_doctor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<AssignedDoctorRes>, ApiError> {
    let doctor = state.assignments.assigned_doctor(id).await.map_err(api_error)?;
    Ok(Json(AssignedDoctorRes::new(id, doctor)))
}

#[utoipa::path(
    delete,
    path = "/patients/{id}",
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Patient and all dependent rows deleted", body = DeletePatientRes),
        (status = 404, description = "No such patient, nothing deleted"),
        (status = 500, description = "Delete rolled back, nothing deleted")
    )
)]
/// Delete a patient and every dependent row in one transaction
#[axum::debug_handler]
async fn delete_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeletePatientRes>, ApiError> {
    let result = state.cascade.delete_patient(id).await.map_err(api_error)?;
    Ok(Json(result.into()))
}

#[derive(Debug, Deserialize)]
struct ReconcileParams {
    limit: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/admin/reconcile",
    params(("limit" = Option<i64>, Query, description = "Maximum cases to examine")),
    responses(
        (status = 200, description = "One reconciliation pass", body = ReconcileRes),
        (status = 500, description = "Pending cases could not be listed")
    )
)]
/// Replay lost patient-status syncs once
///
/// Uses the caller's credential, falling back to the configured reconciliation credential.
#[axum::debug_handler]
async fn reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ReconcileParams>,
) -> Result<Json<ReconcileRes>, ApiError> {
    let limit = params.limit.unwrap_or(RECONCILE_BATCH_SIZE).clamp(1, 1000);
    let credential = reconcile_credential(
        inbound_credential(&headers),
        state.reconciler.credential(),
    );
    let report = state
        .reconciler
        .run_once_as(limit, credential.as_ref())
        .await
        .map_err(api_error)?;
    Ok(Json(report.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use chrono::{DateTime, Utc};
    use emr_core::model::{ClinicalCase, DoctorProfile, NewClinicalCase, Patient, Visit};
    use emr_core::remote::{IntakeRecordRequest, PatientStatusUpdate, PrescriptionRequest};
    use emr_core::repositories::CascadeTx;
    use emr_core::{CoreResult, SagaStep, ServiceError};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// A store with no rows in it.
    struct EmptyStore;

    fn unexpected(what: &str) -> CoreError {
        CoreError::Config(format!("unexpected call: {what}"))
    }

    #[async_trait]
    impl ClinicalCaseStore for EmptyStore {
        async fn insert_case(&self, _: &NewClinicalCase) -> CoreResult<ClinicalCase> {
            Err(unexpected("insert_case"))
        }
        async fn find_case(&self, _: i64) -> CoreResult<Option<ClinicalCase>> {
            Ok(None)
        }
        async fn attach_intake_record(&self, _: i64, _: i64) -> CoreResult<ClinicalCase> {
            Err(unexpected("attach_intake_record"))
        }
        async fn finalize_case(&self, _: i64, _: bool, _: bool) -> CoreResult<ClinicalCase> {
            Err(unexpected("finalize_case"))
        }
        async fn delete_recorded_case(&self, _: i64) -> CoreResult<bool> {
            Ok(false)
        }
        async fn cases_awaiting_patient_sync(
            &self,
            _: i64,
            _: DateTime<Utc>,
        ) -> CoreResult<Vec<ClinicalCase>> {
            Ok(vec![])
        }
        async fn mark_patient_status_synced(
            &self,
            _: i64,
            _: DateTime<Utc>,
        ) -> CoreResult<ClinicalCase> {
            Err(unexpected("mark_patient_status_synced"))
        }
    }

    #[async_trait]
    impl PatientDirectory for EmptyStore {
        async fn find_patient(&self, _: i64) -> CoreResult<Option<Patient>> {
            Ok(None)
        }
        async fn visits_for_patient(&self, _: i64) -> CoreResult<Vec<Visit>> {
            Ok(vec![])
        }
        async fn find_doctor(&self, _: i64) -> CoreResult<Option<DoctorProfile>> {
            Ok(None)
        }
    }

    struct EmptyTx;

    #[async_trait]
    impl CascadeStore for EmptyStore {
        async fn begin(&self) -> CoreResult<Box<dyn CascadeTx>> {
            Ok(Box::new(EmptyTx))
        }
    }

    #[async_trait]
    impl CascadeTx for EmptyTx {
        async fn lock_patient(&mut self, _: i64) -> CoreResult<bool> {
            Ok(false)
        }
        async fn clinical_case_ids(&mut self, _: i64) -> CoreResult<Vec<i64>> {
            Ok(vec![])
        }
        async fn delete_prescriptions_for_cases(&mut self, _: &[i64]) -> CoreResult<u64> {
            Err(unexpected("delete_prescriptions_for_cases"))
        }
        async fn delete_prescriptions_for_patient(&mut self, _: i64) -> CoreResult<u64> {
            Err(unexpected("delete_prescriptions_for_patient"))
        }
        async fn delete_intake_records(&mut self, _: i64) -> CoreResult<u64> {
            Err(unexpected("delete_intake_records"))
        }
        async fn delete_clinical_cases(&mut self, _: i64) -> CoreResult<u64> {
            Err(unexpected("delete_clinical_cases"))
        }
        async fn delete_visits(&mut self, _: i64) -> CoreResult<u64> {
            Err(unexpected("delete_visits"))
        }
        async fn delete_patient(&mut self, _: i64) -> CoreResult<u64> {
            Err(unexpected("delete_patient"))
        }
        async fn commit(self: Box<Self>) -> CoreResult<()> {
            Ok(())
        }
        async fn rollback(self: Box<Self>) -> CoreResult<()> {
            Ok(())
        }
    }

    /// Downstream services that must never be reached.
    struct NoServices;

    fn refused(service: &'static str) -> ServiceError {
        ServiceError::RemoteMalformed {
            service,
            reason: "not reachable in tests".into(),
        }
    }

    #[async_trait]
    impl ClinicalServices for NoServices {
        async fn create_intake_record(
            &self,
            _: &IntakeRecordRequest,
            _: Option<&Credential>,
            _: &str,
        ) -> Result<Value, ServiceError> {
            Err(refused("intake-record"))
        }
        async fn update_patient_status(
            &self,
            _: i64,
            _: &PatientStatusUpdate,
            _: Option<&Credential>,
            _: &str,
        ) -> Result<Value, ServiceError> {
            Err(refused("patient-record"))
        }
        async fn attach_prescriptions(
            &self,
            _: &PrescriptionRequest,
            _: Option<&Credential>,
            _: &str,
        ) -> Result<Value, ServiceError> {
            Err(refused("prescription"))
        }
    }

    fn app() -> Router {
        let cfg = CoreConfig::new(
            "postgres://emr@localhost/emr".into(),
            "http://intake.test".into(),
            "http://patients.test".into(),
            "http://prescriptions.test".into(),
        )
        .unwrap();
        router(AppState::new(Arc::new(EmptyStore), Arc::new(NoServices), &cfg))
    }

    async fn send(method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, body) = send(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn escalation_without_patient_is_bad_request() {
        let (status, _) = send(
            Method::POST,
            "/clinical-cases",
            Some(json!({ "visitDate": "2024-03-01", "doctorDecision": "complex_case" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn escalation_with_unknown_decision_is_bad_request() {
        let (status, _) = send(
            Method::POST,
            "/clinical-cases",
            Some(json!({ "patientId": 1, "visitDate": "2024-03-01", "doctorDecision": "urgent" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        for (method, uri) in [
            (Method::GET, "/clinical-cases/5"),
            (Method::GET, "/patients/5/assigned-doctor"),
            (Method::DELETE, "/patients/5"),
        ] {
            let (status, _) = send(method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn reconcile_with_nothing_pending_reports_zero() {
        let (status, body) = send(Method::POST, "/admin/reconcile?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "examined": 0, "synced": 0, "failed": 0 }));
    }

    fn rejected(status: u16) -> CoreError {
        CoreError::RolledBack {
            case_id: 1,
            source: Box::new(CoreError::Remote {
                step: SagaStep::CreateIntakeRecord,
                source: ServiceError::RemoteRejected {
                    service: "intake-record",
                    status,
                    body: json!({}),
                },
            }),
        }
    }

    #[test]
    fn downstream_credential_failures_pass_through() {
        assert_eq!(error_status(&rejected(401)).0, StatusCode::UNAUTHORIZED);
        assert_eq!(error_status(&rejected(403)).0, StatusCode::FORBIDDEN);
        assert_eq!(error_status(&rejected(500)).0, StatusCode::BAD_GATEWAY);
        assert_eq!(error_status(&rejected(422)).0, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn local_failures_map_to_client_or_server_errors() {
        assert_eq!(
            error_status(&CoreError::Validation("x".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&CoreError::NotFound {
                entity: "patient",
                id: 1
            })
            .0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&CoreError::Transaction(Box::new(CoreError::Config("x".into())))).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let integrity = CoreError::RolledBack {
            case_id: 1,
            source: Box::new(CoreError::DataIntegrity("no id".into())),
        };
        assert_eq!(error_status(&integrity).0, StatusCode::BAD_GATEWAY);
    }
}
