//! `POST /webhooks/{service}/{provider}`: raw passthrough to the owning service.

use std::sync::Arc;

use actix_web::http::header::HeaderMap;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{info, warn};

use super::GatewayState;
use crate::config::WebhookConfig;
use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::upstream::UpstreamError;
use crate::usage::{OperationKind, UsageRecord};

/// Headers never relayed downstream.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub service: String,
    pub provider: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub client_ip: String,
}

#[derive(Debug, Clone)]
pub struct WebhookReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait WebhookForwarder: Send + Sync {
    async fn forward(&self, delivery: WebhookDelivery) -> Result<WebhookReply, UpstreamError>;
}

/// Allowlist plus forwarder.
pub struct WebhookRouter {
    config: WebhookConfig,
    forwarder: Arc<dyn WebhookForwarder>,
}

impl WebhookRouter {
    pub fn new(config: WebhookConfig, forwarder: Arc<dyn WebhookForwarder>) -> Self {
        Self { config, forwarder }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.config.max_body_bytes
    }

    pub fn check_route(&self, service: &str, provider: &str) -> Result<(), GatewayError> {
        if self.config.allows(service, provider) {
            Ok(())
        } else {
            Err(GatewayError::NotFound(format!(
                "no webhook route for {service}/{provider}"
            )))
        }
    }

    pub async fn forward(&self, delivery: WebhookDelivery) -> Result<WebhookReply, GatewayError> {
        let service = delivery.service.clone();
        self.forwarder.forward(delivery).await.map_err(|e| {
            warn!(service = %service, error = %e, "Webhook forward failed");
            GatewayError::UpstreamUnavailable(service)
        })
    }
}

pub async fn webhook_handler(
    state: web::Data<GatewayState>,
    path: web::Path<(String, String)>,
    req: HttpRequest,
    ctx: RequestContext,
    mut payload: web::Payload,
) -> Result<HttpResponse, GatewayError> {
    let (service, provider) = path.into_inner();
    let router = &state.webhooks;
    router.check_route(&service, &provider)?;

    let limit = router.max_body_bytes();
    let mut body = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        if body.len() + chunk.len() > limit {
            return Err(GatewayError::PayloadTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }

    let delivery = WebhookDelivery {
        service: service.clone(),
        provider: provider.clone(),
        headers: relay_headers(req.headers()),
        body,
        client_ip: ctx.client_ip.clone(),
    };

    let result = router.forward(delivery).await;

    let operation = format!("{service}/{provider}");
    let record = UsageRecord::new(&ctx.principal, OperationKind::Webhook, Some(operation))
        .with_duration(ctx.started_at.elapsed())
        .with_errors(u32::from(result.is_err()));
    state.meter.record(record);

    let reply = result?;
    info!(service = %service, provider = %provider, status = reply.status, "Webhook relayed");

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = HttpResponse::build(status);
    if let Some(content_type) = reply.content_type {
        response.content_type(content_type);
    }
    Ok(response.body(reply.body))
}

fn relay_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}
