//! Principal resolution middleware.
//!
//! Resolves one principal per request and stores a [`RequestContext`] in the
//! request extensions. In `Required` mode a caller without a valid credential
//! is rejected with a generic 401 before anything downstream runs.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::{CredentialCarrier, PrincipalResolver};
use crate::context::RequestContext;

/// Response header carrying a session token minted during wallet login.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    Optional,
    Required,
}

#[derive(Clone)]
pub struct PrincipalMiddleware {
    resolver: Arc<PrincipalResolver>,
    requirement: AuthRequirement,
}

impl PrincipalMiddleware {
    pub fn optional(resolver: Arc<PrincipalResolver>) -> Self {
        Self {
            resolver,
            requirement: AuthRequirement::Optional,
        }
    }

    pub fn required(resolver: Arc<PrincipalResolver>) -> Self {
        Self {
            resolver,
            requirement: AuthRequirement::Required,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for PrincipalMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = PrincipalMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PrincipalMiddlewareService {
            service: Rc::new(service),
            resolver: self.resolver.clone(),
            requirement: self.requirement,
        }))
    }
}

pub struct PrincipalMiddlewareService<S> {
    service: Rc<S>,
    resolver: Arc<PrincipalResolver>,
    requirement: AuthRequirement,
}

impl<S, B> Service<ServiceRequest> for PrincipalMiddlewareService<S>
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
        let resolver = self.resolver.clone();
        let requirement = self.requirement;

        Box::pin(async move {
            let carrier = CredentialCarrier::from_headers(req.headers());
            let resolved = match requirement {
                AuthRequirement::Optional => resolver.resolve(&carrier).await,
                AuthRequirement::Required => match resolver.resolve_required(&carrier).await {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        debug!(path = %req.path(), "Rejected request without valid credentials");
                        return Err(Error::from(e));
                    }
                },
            };

            let ctx = RequestContext::for_request(resolved.principal, req.request());
            debug!(
                tenant_id = %ctx.principal.tenant_id(),
                scheme = %ctx.principal.scheme(),
                "Principal resolved"
            );
            req.extensions_mut().insert(ctx);

            let mut res = service.call(req).await?;

            if let Some(token) = resolved.issued_token {
                match HeaderValue::from_str(&token) {
                    Ok(value) => {
                        res.headers_mut()
                            .insert(HeaderName::from_static(ACCESS_TOKEN_HEADER), value);
                    }
                    Err(_) => warn!("Issued session token is not a valid header value"),
                }
            }
            Ok(res)
        })
    }
}
