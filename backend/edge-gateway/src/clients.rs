//! HTTP clients for the sibling services the gateway depends on.
//!
//! One pooled `reqwest::Client` is shared by every service. Each trait the
//! admission layer consumes is implemented here, so the rest of the crate only
//! sees trait objects and can be tested against fakes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::admission::limits::{TenantLimitSource, TenantLimits};
use crate::admission::overflow::{OverflowAuthorizer, OverflowRequest, OverflowVerdict};
use crate::auth::{IdentityService, OpaqueTokenInfo, WalletLoginResult, WalletProof};
use crate::bridge::{ToolInvocation, ToolService, WebhookDelivery, WebhookForwarder, WebhookReply};
use crate::config::ServiceEndpoints;
use crate::upstream::UpstreamError;
use crate::usage::{UsageBatch, UsageSink};

const IDENTITY: &str = "identity-service";
const FLEET: &str = "fleet-service";
const PAYMENT: &str = "payment-service";
const BILLING: &str = "billing-ingest";
const AGENT: &str = "agent-service";
const WEBHOOK: &str = "webhook-target";

#[derive(Clone)]
pub struct ServiceClients {
    client: Client,
    timeout: Duration,
    identity: String,
    fleet: String,
    payment: String,
    billing: String,
    agent: String,
    webhook_targets: Arc<HashMap<String, String>>,
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn transport_error(service: &'static str, err: reqwest::Error, timeout: Duration) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout {
            service,
            elapsed: timeout,
        }
    } else {
        UpstreamError::Unavailable {
            service,
            message: err.to_string(),
        }
    }
}

impl ServiceClients {
    pub fn new(endpoints: &ServiceEndpoints) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(endpoints.upstream_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| UpstreamError::Unavailable {
                service: "http-client",
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            timeout: endpoints.upstream_timeout,
            identity: trim_base(&endpoints.identity_service),
            fleet: trim_base(&endpoints.fleet_service),
            payment: trim_base(&endpoints.payment_service),
            billing: trim_base(&endpoints.billing_ingest),
            agent: trim_base(&endpoints.agent_service),
            webhook_targets: Arc::new(
                endpoints
                    .webhook_targets
                    .iter()
                    .map(|(k, v)| (k.clone(), trim_base(v)))
                    .collect(),
            ),
        })
    }

    fn check(service: &'static str, response: Response) -> Result<Response, UpstreamError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(UpstreamError::Status {
                service,
                status: status.as_u16(),
            })
        }
    }

    async fn decode<T: DeserializeOwned>(service: &'static str, response: Response) -> Result<T, UpstreamError> {
        response.json::<T>().await.map_err(|e| UpstreamError::Decode {
            service,
            message: e.to_string(),
        })
    }

    async fn post_json<B, T>(&self, service: &'static str, url: String, body: &B) -> Result<T, UpstreamError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(service, e, self.timeout))?;
        let response = Self::check(service, response)?;
        Self::decode(service, response).await
    }
}

#[async_trait]
impl IdentityService for ServiceClients {
    async fn validate_opaque_token(&self, token: &str) -> Result<OpaqueTokenInfo, UpstreamError> {
        let url = format!("{}/v1/tokens/validate", self.identity);
        self.post_json(IDENTITY, url, &json!({ "token": token })).await
    }

    async fn wallet_login(&self, proof: &WalletProof) -> Result<WalletLoginResult, UpstreamError> {
        let url = format!("{}/v1/wallet/login", self.identity);
        self.post_json(IDENTITY, url, proof).await
    }
}

#[async_trait]
impl TenantLimitSource for ServiceClients {
    async fn get_tenant_limits(&self, tenant_id: &str) -> Result<TenantLimits, UpstreamError> {
        let url = format!("{}/v1/tenants/{}/limits", self.fleet, tenant_id);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(FLEET, e, self.timeout))?;
        let response = Self::check(FLEET, response)?;
        Self::decode(FLEET, response).await
    }
}

#[async_trait]
impl OverflowAuthorizer for ServiceClients {
    async fn authorize_overflow(&self, request: &OverflowRequest) -> Result<OverflowVerdict, UpstreamError> {
        let url = format!("{}/v1/overflow/authorize", self.payment);
        self.post_json(PAYMENT, url, request).await
    }
}

#[async_trait]
impl UsageSink for ServiceClients {
    async fn deliver(&self, batch: &UsageBatch) -> Result<(), UpstreamError> {
        let url = format!("{}/v1/usage/batches", self.billing);
        let response = self
            .client
            .post(url)
            .json(batch)
            .send()
            .await
            .map_err(|e| transport_error(BILLING, e, self.timeout))?;
        Self::check(BILLING, response).map(|_| ())
    }
}

#[async_trait]
impl ToolService for ServiceClients {
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<Value, UpstreamError> {
        let url = format!("{}/v1/tools/{}/invoke", self.agent, invocation.tool);
        self.post_json(AGENT, url, invocation).await
    }
}

#[async_trait]
impl WebhookForwarder for ServiceClients {
    async fn forward(&self, delivery: WebhookDelivery) -> Result<WebhookReply, UpstreamError> {
        let base = self
            .webhook_targets
            .get(&delivery.service)
            .ok_or_else(|| UpstreamError::Unavailable {
                service: WEBHOOK,
                message: format!("no target configured for {}", delivery.service),
            })?;
        let url = format!("{}/webhooks/{}", base, delivery.provider);

        let mut request = self.client.post(url);
        for (name, value) in &delivery.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .header("X-Forwarded-For", delivery.client_ip.as_str())
            .body(delivery.body)
            .send()
            .await
            .map_err(|e| transport_error(WEBHOOK, e, self.timeout))?;

        // Downstream status is relayed as-is, including 4xx/5xx.
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| UpstreamError::Decode {
            service: WEBHOOK,
            message: e.to_string(),
        })?;

        Ok(WebhookReply {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}
