//! Credential handling at the API boundary.
//!
//! The core never issues credentials of its own for user-initiated work: the inbound
//! `Authorization` header is forwarded verbatim. Only background reconciliation falls back to
//! the configured service credential.

use emr_core::Credential;

/// The credential to forward for a request, taken from its `Authorization` header.
pub fn forwarded_credential(authorization: Option<&str>) -> Option<Credential> {
    authorization.and_then(Credential::from_header_value)
}

/// Credential for an on-demand reconciliation pass: the caller's own, else the configured one.
pub fn reconcile_credential(
    inbound: Option<Credential>,
    configured: Option<&Credential>,
) -> Option<Credential> {
    inbound.or_else(|| configured.cloned())
}
