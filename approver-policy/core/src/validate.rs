use crate::{approver::Validation, k8s::CertificateRequestPolicy, registry::Registry};
use anyhow::{Context, Result};

/// Checks a policy manifest before it is persisted.
///
/// The selector and plugin names are checked here; every registered approver
/// then checks the fields it owns. All violations are collected.
pub async fn validate_policy(
    registry: &Registry,
    policy: &CertificateRequestPolicy,
) -> Result<Validation> {
    let mut violations = Vec::new();

    let selector = &policy.spec.selector;
    if selector.issuer_ref.is_none() && selector.namespace.is_none() {
        violations.push(
            "spec.selector: Required value: one of issuerRef or namespace must be defined"
                .to_string(),
        );
    }

    for name in policy.spec.plugins.iter().flat_map(|p| p.keys()) {
        if !registry.contains(name) {
            violations.push(format!(
                "spec.plugins: Unsupported value: {name:?}: supported values: {}",
                registry.names().collect::<Vec<_>>().join(", ")
            ));
        }
    }

    for approver in registry.approvers() {
        let validation = approver
            .validate(policy)
            .await
            .with_context(|| format!("approver {:?} failed to validate policy", approver.name()))?;
        violations.extend(validation.violations);
    }

    Ok(Validation { violations })
}
