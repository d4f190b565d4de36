//! Derivation of the per-request policy from caller identity and operation.
//!
//! Tenant data (`writekey`/`readkey`) is scoped to
//! `tenants/<tenant>/<scope>/*`. Key-management operations use fixed transit
//! namespaces that do not depend on the caller.

use crate::errors::{BridgeError, Result};
use crate::types::{CallerClaims, Capability, OperationKind, PolicySpec};

pub const TENANT_ROOT: &str = "tenants";
pub const TRANSIT_KEYS: &str = "transit/keys";
pub const TRANSIT_EXPORT: &str = "transit/export";
pub const TRANSIT_EXPORT_POLICY: &str = "transit/export/encryption-key/*";
pub const TRANSIT_ENCRYPT: &str = "transit/encrypt";
pub const TRANSIT_DECRYPT: &str = "transit/decrypt";

/// Derives the policy for `kind`. Pure: identical inputs give identical output.
pub fn derive(kind: OperationKind, claims: Option<&CallerClaims>) -> Result<PolicySpec> {
    match kind {
        OperationKind::WriteKey | OperationKind::ReadKey => {
            let claims = claims.ok_or_else(|| {
                BridgeError::authorization(format!("{kind} requires caller claims"))
            })?;
            validate_claim("tenant", &claims.tenant)?;
            validate_claim("resource scope", &claims.resource_scope)?;
            let capability = if kind == OperationKind::WriteKey {
                Capability::Write
            } else {
                Capability::Read
            };
            Ok(PolicySpec {
                path_pattern: format!(
                    "{TENANT_ROOT}/{tenant}/{scope}/*",
                    tenant = claims.tenant,
                    scope = claims.resource_scope
                ),
                capability,
                name: format!(
                    "{kind}_{tenant}_{scope}",
                    tenant = claims.tenant,
                    scope = claims.resource_scope
                ),
            })
        }
        OperationKind::CreateKey => Ok(namespace_policy(
            kind,
            format!("{TRANSIT_KEYS}/*"),
            Capability::Write,
        )),
        OperationKind::ExportKey => Ok(namespace_policy(
            kind,
            TRANSIT_EXPORT_POLICY.to_string(),
            Capability::Read,
        )),
        OperationKind::Encrypt => Ok(namespace_policy(
            kind,
            format!("{TRANSIT_ENCRYPT}/*"),
            Capability::Write,
        )),
        OperationKind::Decrypt => Ok(namespace_policy(
            kind,
            format!("{TRANSIT_DECRYPT}/*"),
            Capability::Write,
        )),
    }
}

fn namespace_policy(kind: OperationKind, path_pattern: String, capability: Capability) -> PolicySpec {
    PolicySpec {
        path_pattern,
        capability,
        name: kind.as_str().to_string(),
    }
}

/// Resolves the store path an operation targets. For tenant data the
/// caller-supplied path must sit under the derived policy's pattern.
pub fn target_path(kind: OperationKind, policy: &PolicySpec, target: &str) -> Result<String> {
    validate_target(kind, target)?;
    let path = match kind {
        OperationKind::WriteKey | OperationKind::ReadKey => target.to_string(),
        OperationKind::CreateKey => format!("{TRANSIT_KEYS}/{target}"),
        OperationKind::ExportKey => format!("{TRANSIT_EXPORT}/{target}"),
        OperationKind::Encrypt => format!("{TRANSIT_ENCRYPT}/{target}"),
        OperationKind::Decrypt => format!("{TRANSIT_DECRYPT}/{target}"),
    };
    if matches!(kind, OperationKind::WriteKey | OperationKind::ReadKey) && !policy.covers(&path) {
        return Err(BridgeError::authorization(format!(
            "path `{path}` is outside `{pattern}`",
            pattern = policy.path_pattern
        )));
    }
    Ok(path)
}

fn validate_claim(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BridgeError::authorization(format!("{label} claim is empty")));
    }
    let forbidden = value == "."
        || value == ".."
        || value
            .chars()
            .any(|c| matches!(c, '/' | '*' | '+' | '\\') || c.is_whitespace() || c.is_control());
    if forbidden {
        return Err(BridgeError::authorization(format!(
            "{label} claim contains characters not allowed in a path segment"
        )));
    }
    Ok(())
}

fn validate_target(kind: OperationKind, target: &str) -> Result<()> {
    let trimmed = target.trim_matches('/');
    if trimmed.is_empty() {
        return Err(BridgeError::authorization(format!("{kind} target is empty")));
    }
    if target.starts_with('/')
        || target.ends_with('/')
        || trimmed
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(BridgeError::authorization(format!(
            "{kind} target `{target}` is not a normalised path"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rolex() -> CallerClaims {
        CallerClaims::new("rolex", "f1")
    }

    #[test]
    fn tenant_operations_are_scoped_to_claims() {
        let write = derive(OperationKind::WriteKey, Some(&rolex())).unwrap();
        assert_eq!(write.name, "writekey_rolex_f1");
        assert_eq!(write.path_pattern, "tenants/rolex/f1/*");
        assert_eq!(write.capability, Capability::Write);

        let read = derive(OperationKind::ReadKey, Some(&rolex())).unwrap();
        assert_eq!(read.name, "readkey_rolex_f1");
        assert_eq!(read.path_pattern, "tenants/rolex/f1/*");
        assert_eq!(read.capability, Capability::Read);
    }

    #[test]
    fn tenant_operations_without_claims_are_rejected() {
        let err = derive(OperationKind::ReadKey, None).unwrap_err();
        assert_eq!(err.code(), "authorization");
    }

    #[test]
    fn claims_cannot_widen_the_pattern() {
        for (tenant, scope) in [("*", "f1"), ("rolex/omega", "f1"), ("rolex", ".."), ("", "f1")] {
            let claims = CallerClaims::new(tenant, scope);
            assert!(
                derive(OperationKind::WriteKey, Some(&claims)).is_err(),
                "{tenant}/{scope} should be rejected"
            );
        }
    }

    #[test]
    fn key_management_ignores_caller_identity() {
        let expected = [
            (OperationKind::CreateKey, "transit/keys/*", Capability::Write),
            (OperationKind::ExportKey, "transit/export/encryption-key/*", Capability::Read),
            (OperationKind::Encrypt, "transit/encrypt/*", Capability::Write),
            (OperationKind::Decrypt, "transit/decrypt/*", Capability::Write),
        ];
        for (kind, pattern, capability) in expected {
            let anonymous = derive(kind, None).unwrap();
            let identified = derive(kind, Some(&rolex())).unwrap();
            assert_eq!(anonymous, identified);
            assert_eq!(anonymous.path_pattern, pattern);
            assert_eq!(anonymous.capability, capability);
            assert_eq!(anonymous.name, kind.as_str());
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        for kind in OperationKind::ALL {
            assert_eq!(derive(kind, Some(&rolex())), derive(kind, Some(&rolex())));
        }
    }

    #[test]
    fn target_paths_follow_namespaces() {
        let policy = derive(OperationKind::ExportKey, None).unwrap();
        assert_eq!(
            target_path(OperationKind::ExportKey, &policy, "encryption-key/key100/1").unwrap(),
            "transit/export/encryption-key/key100/1"
        );
        let policy = derive(OperationKind::CreateKey, None).unwrap();
        assert_eq!(
            target_path(OperationKind::CreateKey, &policy, "key1").unwrap(),
            "transit/keys/key1"
        );
    }

    #[test]
    fn tenant_targets_must_stay_in_scope() {
        let policy = derive(OperationKind::ReadKey, Some(&rolex())).unwrap();
        assert!(target_path(OperationKind::ReadKey, &policy, "tenants/rolex/f1/key1").is_ok());
        assert!(target_path(OperationKind::ReadKey, &policy, "tenants/omega/f1/key1").is_err());
        assert!(
            target_path(OperationKind::ReadKey, &policy, "tenants/rolex/f1/../../omega/f1/k")
                .is_err()
        );
    }

    #[test]
    fn trailing_slashes_are_rejected() {
        let policy = derive(OperationKind::WriteKey, Some(&rolex())).unwrap();
        let err = target_path(OperationKind::WriteKey, &policy, "tenants/rolex/f1/").unwrap_err();
        assert_eq!(err.code(), "authorization");
        assert!(target_path(OperationKind::WriteKey, &policy, "tenants/rolex/f1/key1/").is_err());

        let policy = derive(OperationKind::CreateKey, None).unwrap();
        assert!(target_path(OperationKind::CreateKey, &policy, "key1/").is_err());
    }
}
