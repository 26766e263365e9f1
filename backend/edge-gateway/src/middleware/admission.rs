//! Admission middleware: per-tenant quota with paid overflow.
//!
//! Runs after [`super::PrincipalMiddleware`]. Rejected requests get a 429 with
//! `Retry-After`; accepted ones carry `X-RateLimit-*` headers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderMap, HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use tracing::warn;

use crate::admission::{AdmissionController, AdmissionDecision, OperationClass, Surface};
use crate::auth::Principal;
use crate::context::RequestContext;

#[derive(Clone)]
pub struct AdmissionMiddleware {
    controller: Arc<AdmissionController>,
    surface: Surface,
}

impl AdmissionMiddleware {
    pub fn new(controller: Arc<AdmissionController>, surface: Surface) -> Self {
        Self {
            controller,
            surface,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdmissionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AdmissionMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdmissionMiddlewareService {
            service: Rc::new(service),
            controller: self.controller.clone(),
            surface: self.surface,
        }))
    }
}

pub struct AdmissionMiddlewareService<S> {
    service: Rc<S>,
    controller: Arc<AdmissionController>,
    surface: Surface,
}

impl<S, B> Service<ServiceRequest> for AdmissionMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let controller = self.controller.clone();
        let surface = self.surface;

        Box::pin(async move {
            let ctx = req.extensions().get::<RequestContext>().cloned();
            let ctx = match ctx {
                Some(ctx) => ctx,
                None => {
                    let ctx = RequestContext::for_request(
                        Arc::new(Principal::anonymous()),
                        req.request(),
                    );
                    req.extensions_mut().insert(ctx.clone());
                    ctx
                }
            };

            let operation = OperationClass::new(surface, req.path());
            let decision = controller
                .admit(
                    &ctx.principal,
                    &ctx.admission_key(),
                    &operation,
                    ctx.payment.clone(),
                    &ctx.client_ip,
                )
                .await;

            let decision = match decision.into_result() {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(
                        tenant_id = %ctx.principal.tenant_id(),
                        client_ip = %ctx.client_ip,
                        surface = surface.as_str(),
                        "Rate limit exceeded"
                    );
                    return Err(Error::from(e));
                }
            };

            req.extensions_mut().insert(decision.clone());
            let mut res = service.call(req).await?;
            apply_rate_limit_headers(res.headers_mut(), &decision);
            Ok(res)
        })
    }
}

pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    let mut set = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };

    match decision {
        AdmissionDecision::Accept {
            limit,
            remaining,
            reset_after,
        } => {
            set("x-ratelimit-limit", limit.to_string());
            set("x-ratelimit-remaining", remaining.to_string());
            set("x-ratelimit-reset", reset_after.as_secs().to_string());
        }
        AdmissionDecision::AcceptViaOverflow { cost } => {
            set("x-overflow-cost", cost.to_string());
        }
        AdmissionDecision::Reject { .. } => {}
    }
}
