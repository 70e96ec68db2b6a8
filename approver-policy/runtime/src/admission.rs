use anyhow::{anyhow, Result};
use approver_policy_core::{
    k8s::{CertificateRequestPolicy, CertificateRequestPolicySpec, Resource, ResourceExt},
    validate::validate_policy,
    Registry,
};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::{admission::Operation, DynamicObject};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Validates `CertificateRequestPolicy` manifests before they are persisted.
#[derive(Clone)]
pub struct Admission {
    registry: Arc<Registry>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        if !is_kind::<CertificateRequestPolicy>(&req) {
            return AdmissionResponse::invalid(format_args!(
                "unsupported resource type: {}.{}.{}",
                req.kind.group, req.kind.version, req.kind.kind
            ));
        }

        let rsp = AdmissionResponse::from(&req);
        if matches!(req.operation, Operation::Delete | Operation::Connect) {
            return rsp;
        }

        let policy = match parse_policy(req) {
            Ok(policy) => policy,
            Err(error) => {
                info!(%error, "Failed to parse CertificateRequestPolicy");
                return rsp.deny(error);
            }
        };
        let name = policy.name_any();

        match validate_policy(&self.registry, &policy).await {
            Ok(validation) if validation.is_valid() => rsp,
            Ok(validation) => {
                let violations = validation.violations.join(", ");
                info!(%name, %violations, "Denied");
                rsp.deny(violations)
            }
            Err(error) => {
                warn!(%name, error = %format_args!("{error:#}"), "Failed to validate policy");
                rsp.deny(format_args!("{error:#}"))
            }
        }
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn json_response(rsp: Review) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn parse_policy(req: AdmissionRequest) -> Result<CertificateRequestPolicy> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;

    let spec = obj
        .data
        .get("spec")
        .cloned()
        .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
    let spec = serde_json::from_value::<CertificateRequestPolicySpec>(spec)?;

    let mut policy = CertificateRequestPolicy::new(&obj.name_any(), spec);
    policy.metadata = obj.metadata;
    Ok(policy)
}
