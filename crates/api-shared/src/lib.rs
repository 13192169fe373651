//! # API Shared
//!
//! Shared definitions for the EMR coordination API.
//!
//! Contains:
//! - Request/response bodies with OpenAPI schemas (`dto` module)
//! - Shared services like `HealthService`
//! - Credential extraction for forwarding to downstream services
//!
//! Used by `api-rest` and the `emr-run` binary.

pub mod auth;
pub mod dto;
pub mod health;

pub use dto::*;
pub use health::HealthService;
