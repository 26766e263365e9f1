//! GraphQL subscriptions over WebSocket (`GET /graphql/ws`).
//!
//! Credentials are resolved once, from the `connection_init` payload with the
//! upgrade request's headers as fallback. Admission is charged once per
//! connection; each subscription on it is metered when it ends.

use std::net::SocketAddr;

use actix_web::http::header::HeaderMap;
use actix_web::{web, HttpRequest, HttpResponse};
use async_graphql::{Data, ErrorExtensions};
use async_graphql_actix_web::GraphQLSubscription;
use serde_json::Value;
use tracing::{debug, warn};

use super::GatewayState;
use crate::admission::{OperationClass, Surface};
use crate::auth::CredentialCarrier;
use crate::context::{Caller, IssuedSessionToken, RequestContext};
use crate::error::GatewayError;

pub const WS_PATH: &str = "/graphql/ws";

pub async fn graphql_ws(
    state: web::Data<GatewayState>,
    req: HttpRequest,
    payload: web::Payload,
) -> actix_web::Result<HttpResponse> {
    let headers = req.headers().clone();
    let peer = req.peer_addr();
    let init_state = state.clone();

    GraphQLSubscription::new(state.schema.clone())
        .on_connection_init(move |init: Value| async move {
            init_connection(&init_state, &headers, peer, &init)
                .await
                .map_err(|e| {
                    async_graphql::Error::new(e.public_message())
                        .extend_with(|_, ext| ext.set("code", e.code()))
                })
        })
        .start(&req, payload)
}

/// Resolve the principal, run admission, and build the connection's session data.
pub async fn init_connection(
    state: &GatewayState,
    upgrade_headers: &HeaderMap,
    peer: Option<SocketAddr>,
    init: &Value,
) -> Result<Data, GatewayError> {
    let carrier = CredentialCarrier::from_init_payload(init, upgrade_headers);
    let resolved = state.resolver.resolve(&carrier).await;
    let ctx = RequestContext::new(
        resolved.principal.clone(),
        upgrade_headers,
        peer,
        &state.trusted_proxies,
    );

    let operation = OperationClass::new(Surface::Subscription, WS_PATH);
    let decision = state
        .admission
        .admit(
            &ctx.principal,
            &ctx.admission_key(),
            &operation,
            ctx.payment.clone(),
            &ctx.client_ip,
        )
        .await;

    if let Err(e) = decision.into_result() {
        warn!(
            tenant_id = %ctx.principal.tenant_id(),
            client_ip = %ctx.client_ip,
            "WebSocket connection rejected by admission"
        );
        return Err(e);
    }

    debug!(
        tenant_id = %ctx.principal.tenant_id(),
        scheme = ctx.principal.scheme().as_str(),
        "WebSocket connection admitted"
    );

    let scope = state
        .subscriptions
        .open_connection(resolved.principal.clone());

    let mut data = Data::default();
    data.insert(Caller(resolved.principal));
    data.insert(scope);
    if let Some(token) = resolved.issued_token {
        data.insert(IssuedSessionToken(token));
    }
    Ok(data)
}
