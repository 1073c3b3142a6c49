//! OARS identity boundary.
//!
//! The transport layer authenticates callers and hands the core a
//! `TokenClaims`. This crate enforces what those claims may touch:
//! tenant scoping, role and scope gates, the mTLS workload-identity check
//! for service tokens, and idempotency capture for write endpoints.

#![deny(unsafe_code)]

mod idempotency;
mod mtls;

pub use idempotency::{IdempotencyCheck, IdempotencyService};
pub use mtls::{attestation_message, sign_attestation, MtlsAttestation, MtlsSettings, WorkloadIdentityVerifier};

use oars_types::{OarsError, Role, TokenClaims};

/// The caller must be entitled to the tenant.
pub fn require_tenant(claims: &TokenClaims, tenant_id: &str) -> Result<(), OarsError> {
    if claims.has_tenant(tenant_id) {
        Ok(())
    } else {
        Err(OarsError::TenantScopeViolation(format!(
            "token {} has no access to tenant {tenant_id}",
            claims.token_id
        )))
    }
}

/// The caller must hold one of the listed roles.
pub fn require_role(claims: &TokenClaims, allowed: &[Role]) -> Result<(), OarsError> {
    if allowed.contains(&claims.role) {
        Ok(())
    } else {
        Err(OarsError::Forbidden(format!(
            "role {:?} may not perform this operation",
            claims.role
        )))
    }
}

/// The caller must carry the scope. Admin role implies every scope.
pub fn require_scope(claims: &TokenClaims, scope: &str) -> Result<(), OarsError> {
    if claims.role == Role::Admin || claims.has_scope(scope) {
        Ok(())
    } else {
        Err(OarsError::Forbidden(format!("missing scope {scope}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: Role, tenants: &[&str], scopes: &[&str]) -> TokenClaims {
        TokenClaims {
            token_id: "tok_1".into(),
            subject: "subject_1".into(),
            tenant_ids: tenants.iter().map(|t| t.to_string()).collect(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            role,
            delegation_chain: vec![],
            service_account_id: None,
        }
    }

    #[test]
    fn tenant_gate_rejects_foreign_tenants() {
        let claims = claims(Role::Agent, &["tenant_alpha"], &[]);
        assert!(require_tenant(&claims, "tenant_alpha").is_ok());
        assert!(matches!(
            require_tenant(&claims, "tenant_beta"),
            Err(OarsError::TenantScopeViolation(_))
        ));
    }

    #[test]
    fn role_gate_checks_membership() {
        let claims = claims(Role::Auditor, &["tenant_alpha"], &[]);
        assert!(require_role(&claims, &[Role::Admin, Role::Auditor]).is_ok());
        assert!(matches!(
            require_role(&claims, &[Role::Admin]),
            Err(OarsError::Forbidden(_))
        ));
    }

    #[test]
    fn admin_implies_all_scopes() {
        let admin = claims(Role::Admin, &["tenant_alpha"], &[]);
        assert!(require_scope(&admin, "actions:write").is_ok());

        let agent = claims(Role::Agent, &["tenant_alpha"], &["actions:write"]);
        assert!(require_scope(&agent, "actions:write").is_ok());
        assert!(matches!(
            require_scope(&agent, "policies:write"),
            Err(OarsError::Forbidden(_))
        ));
    }
}
