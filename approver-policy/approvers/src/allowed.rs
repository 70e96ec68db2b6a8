use anyhow::Result;
use approver_policy_core::{
    k8s::{
        policy::{self, AllowedString, AllowedStringSlice},
        CertificateRequestPolicy,
    },
    wildcard, Approver, Attributes, Readiness, Request, Validation, Verdict,
};
use tracing::trace;

/// Permits a request only if every attribute it asks for is listed in the
/// policy's `spec.allowed` block.
///
/// Requesting fewer attributes than a policy allows is fine, unless the
/// attribute is marked `required`.
#[derive(Copy, Clone, Debug, Default)]
pub struct Allowed;

/// Key usage names understood by cert-manager.
const KEY_USAGES: &[&str] = &[
    "signing",
    "digital signature",
    "content commitment",
    "key encipherment",
    "key agreement",
    "data encipherment",
    "cert sign",
    "crl sign",
    "encipher only",
    "decipher only",
    "any",
    "server auth",
    "client auth",
    "code signing",
    "email protection",
    "s/mime",
    "ipsec end system",
    "ipsec tunnel",
    "ipsec user",
    "timestamping",
    "ocsp signing",
    "microsoft sgc",
    "netscape sgc",
];

#[async_trait::async_trait]
impl Approver for Allowed {
    fn name(&self) -> &'static str {
        "allowed"
    }

    async fn ready(&self, _: &CertificateRequestPolicy) -> Result<Readiness> {
        Ok(Readiness::Ready)
    }

    async fn validate(&self, policy: &CertificateRequestPolicy) -> Result<Validation> {
        let Some(allowed) = policy.spec.allowed.as_ref() else {
            return Ok(Validation::valid());
        };

        let mut violations = Vec::new();
        if let Some(cn) = allowed.common_name.as_ref() {
            if cn.required == Some(true) && cn.value.as_deref().map_or(true, str::is_empty) {
                violations.push(
                    "spec.allowed.commonName.value: Required value: \
                     required is true but no value is defined"
                        .to_string(),
                );
            }
        }
        for (path, slice) in slices(allowed) {
            if let Some(slice) = slice {
                if slice.required == Some(true)
                    && slice.values.as_ref().map_or(true, Vec::is_empty)
                {
                    violations.push(format!(
                        "{path}.values: Required value: required is true but no values are defined"
                    ));
                }
            }
        }
        for (i, usage) in allowed.usages.iter().flatten().enumerate() {
            if !KEY_USAGES.contains(&usage.as_str()) {
                violations.push(format!(
                    "spec.allowed.usages[{i}]: Unsupported value: {usage:?}"
                ));
            }
        }

        Ok(violations.into_iter().collect())
    }

    async fn evaluate(
        &self,
        policy: &CertificateRequestPolicy,
        request: &Request,
    ) -> Result<Verdict> {
        let allowed = policy.spec.allowed.clone().unwrap_or_default();
        let violations = check(&allowed, &request.attributes);
        trace!(request = %request.id, violations = violations.len(), "Checked allowed attributes");
        Ok(Verdict::from_violations(violations))
    }
}

fn slices(allowed: &policy::Allowed) -> [(&'static str, Option<&AllowedStringSlice>); 5] {
    [
        ("spec.allowed.dnsNames", allowed.dns_names.as_ref()),
        ("spec.allowed.ipAddresses", allowed.ip_addresses.as_ref()),
        ("spec.allowed.uris", allowed.uris.as_ref()),
        ("spec.allowed.emailAddresses", allowed.email_addresses.as_ref()),
        (
            "spec.allowed.subject.organizations",
            allowed.subject.as_ref().and_then(|s| s.organizations.as_ref()),
        ),
    ]
}

fn check(allowed: &policy::Allowed, attrs: &Attributes) -> Vec<String> {
    let mut violations = Vec::new();

    check_string(
        "spec.allowed.commonName",
        allowed.common_name.as_ref(),
        attrs.common_name.as_deref(),
        &mut violations,
    );

    let ips = attrs
        .ip_addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let requested: [&[String]; 5] = [
        &attrs.dns_names,
        &ips,
        &attrs.uris,
        &attrs.email_addresses,
        &attrs.organizations,
    ];
    for ((path, slice), values) in slices(allowed).into_iter().zip(requested) {
        check_slice(path, slice, values, &mut violations);
    }

    if attrs.is_ca && allowed.is_ca != Some(true) {
        violations.push(format!(
            "spec.allowed.isCA: Invalid value: true: {}",
            allowed.is_ca.unwrap_or(false)
        ));
    }

    let usages = allowed.usages.as_deref().unwrap_or_default();
    for usage in &attrs.usages {
        if !usages.contains(usage) {
            violations.push(format!(
                "spec.allowed.usages: Invalid value: {usage:?}: [{}]",
                usages.join(", ")
            ));
        }
    }

    violations
}

fn check_string(
    path: &str,
    allowed: Option<&AllowedString>,
    requested: Option<&str>,
    violations: &mut Vec<String>,
) {
    let pattern = allowed.and_then(|a| a.value.as_deref());
    match requested.filter(|v| !v.is_empty()) {
        Some(value) => {
            if !pattern.is_some_and(|p| wildcard::matches(p, value)) {
                violations.push(format!(
                    "{path}.value: Invalid value: {value:?}: {}",
                    pattern.unwrap_or("")
                ));
            }
        }
        None => {
            if allowed.and_then(|a| a.required) == Some(true) {
                violations.push(format!("{path}.required: Required value: true"));
            }
        }
    }
}

fn check_slice(
    path: &str,
    allowed: Option<&AllowedStringSlice>,
    requested: &[String],
    violations: &mut Vec<String>,
) {
    let patterns = allowed
        .and_then(|a| a.values.as_deref())
        .unwrap_or_default();

    if requested.is_empty() {
        if allowed.and_then(|a| a.required) == Some(true) {
            violations.push(format!("{path}.required: Required value: true"));
        }
        return;
    }

    for value in requested {
        if !wildcard::matches_any(patterns, value) {
            violations.push(format!(
                "{path}.values: Invalid value: {value:?}: [{}]",
                patterns.join(", ")
            ));
        }
    }
}
