use anyhow::Result;
use approver_policy_core::{
    k8s::{duration::GoDuration, policy, CertificateRequestPolicy},
    Approver, Attributes, KeyAlgorithm, Readiness, Request, Validation, Verdict,
};
use tracing::trace;

/// Bounds the lifetime and private key of requested certificates by the
/// policy's `spec.constraints` block.
#[derive(Copy, Clone, Debug, Default)]
pub struct Constraints;

#[async_trait::async_trait]
impl Approver for Constraints {
    fn name(&self) -> &'static str {
        "constraints"
    }

    async fn ready(&self, _: &CertificateRequestPolicy) -> Result<Readiness> {
        Ok(Readiness::Ready)
    }

    async fn validate(&self, policy: &CertificateRequestPolicy) -> Result<Validation> {
        let Some(constraints) = policy.spec.constraints.as_ref() else {
            return Ok(Validation::valid());
        };

        let mut violations = Vec::new();
        let min = parse_duration(
            "spec.constraints.minDuration",
            constraints.min_duration.as_deref(),
            &mut violations,
        );
        let max = parse_duration(
            "spec.constraints.maxDuration",
            constraints.max_duration.as_deref(),
            &mut violations,
        );
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                violations.push(format!(
                    "spec.constraints.maxDuration: Invalid value: \"{max}\": \
                     maxDuration must be greater than or equal to minDuration ({min})"
                ));
            }
        }

        if let Some(key) = constraints.private_key.as_ref() {
            if let Some(alg) = key.algorithm.as_deref() {
                if let Err(error) = alg.parse::<KeyAlgorithm>() {
                    violations.push(format!(
                        "spec.constraints.privateKey.algorithm: Unsupported value: {alg:?}: {error}"
                    ));
                }
            }
            if let (Some(min), Some(max)) = (key.min_size, key.max_size) {
                if min > max {
                    violations.push(format!(
                        "spec.constraints.privateKey.maxSize: Invalid value: {max}: \
                         maxSize must be greater than or equal to minSize ({min})"
                    ));
                }
            }
        }

        Ok(violations.into_iter().collect())
    }

    async fn evaluate(
        &self,
        policy: &CertificateRequestPolicy,
        request: &Request,
    ) -> Result<Verdict> {
        let Some(constraints) = policy.spec.constraints.as_ref() else {
            return Ok(Verdict::approve());
        };
        let violations = check(constraints, &request.attributes);
        trace!(request = %request.id, violations = violations.len(), "Checked constraints");
        Ok(Verdict::from_violations(violations))
    }
}

/// Parses an optional duration field, recording a violation if it is
/// malformed.
fn parse_duration(
    path: &str,
    value: Option<&str>,
    violations: &mut Vec<String>,
) -> Option<GoDuration> {
    let value = value?;
    match value.parse::<GoDuration>() {
        Ok(d) => Some(d),
        Err(error) => {
            violations.push(format!("{path}: Invalid value: {value:?}: {error}"));
            None
        }
    }
}

fn check(constraints: &policy::Constraints, attrs: &Attributes) -> Vec<String> {
    let mut violations = Vec::new();

    let requested = GoDuration::from(attrs.duration);
    let min = parse_duration(
        "spec.constraints.minDuration",
        constraints.min_duration.as_deref(),
        &mut violations,
    );
    if let Some(min) = min {
        if requested < min {
            violations.push(format!(
                "spec.constraints.minDuration: Invalid value: \"{requested}\": {min}"
            ));
        }
    }
    let max = parse_duration(
        "spec.constraints.maxDuration",
        constraints.max_duration.as_deref(),
        &mut violations,
    );
    if let Some(max) = max {
        if requested > max {
            violations.push(format!(
                "spec.constraints.maxDuration: Invalid value: \"{requested}\": {max}"
            ));
        }
    }

    if let Some(key) = constraints.private_key.as_ref() {
        check_private_key(key, attrs, &mut violations);
    }

    violations
}

fn check_private_key(
    constraints: &policy::PrivateKeyConstraints,
    attrs: &Attributes,
    violations: &mut Vec<String>,
) {
    let Some(key) = attrs.public_key else {
        violations.push(
            "spec.constraints.privateKey: Invalid value: \"\": \
             the request's public key type is not supported"
                .to_string(),
        );
        return;
    };

    if let Some(alg) = constraints.algorithm.as_deref() {
        match alg.parse::<KeyAlgorithm>() {
            Ok(alg) if alg == key.algorithm => {}
            Ok(alg) => violations.push(format!(
                "spec.constraints.privateKey.algorithm: Invalid value: \"{}\": {alg}",
                key.algorithm
            )),
            Err(error) => violations.push(format!(
                "spec.constraints.privateKey.algorithm: Unsupported value: {alg:?}: {error}"
            )),
        }
    }

    if let Some(min) = constraints.min_size {
        if key.size < min {
            violations.push(format!(
                "spec.constraints.privateKey.minSize: Invalid value: {}: {min}",
                key.size
            ));
        }
    }
    if let Some(max) = constraints.max_size {
        if key.size > max {
            violations.push(format!(
                "spec.constraints.privateKey.maxSize: Invalid value: {}: {max}",
                key.size
            ));
        }
    }
}
