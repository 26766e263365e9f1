//! Shared fakes for the integration suites.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::runtime::Handle;

use edge_gateway::admission::limits::{TenantLimitCache, TenantLimitSource, TenantLimits};
use edge_gateway::admission::overflow::{OverflowAuthorizer, OverflowRequest, OverflowVerdict};
use edge_gateway::admission::{AdmissionController, AdmissionSettings};
use edge_gateway::auth::{
    BearerValidator, Claims, IdentityService, OpaqueTokenInfo, OpaqueTokenValidator,
    PrincipalResolver, WalletLoginResult, WalletProof, WalletUser, WalletValidator,
};
use edge_gateway::bridge::{
    GatewayState, ToolInvocation, ToolService, WebhookDelivery, WebhookForwarder, WebhookReply,
    WebhookRouter,
};
use edge_gateway::context::TrustedProxies;
use edge_gateway::config::{JwtConfig, UsageConfig, WebhookConfig};
use edge_gateway::cost::{QueryCostGovernor, WeightTable};
use edge_gateway::schema::build_schema;
use edge_gateway::upstream::UpstreamError;
use edge_gateway::usage::{SubscriptionSupervisor, UsageBatch, UsageMeter, UsageMeterHandle, UsageSink};

pub const SECRET: &str = "edge-gateway-integration-secret-0123456789";
pub const TENANT: &str = "7d1c4a52-3f0e-4b8e-9a61-2c5d8e0f1a23";
pub const OPAQUE_TOKEN: &str = "opaque-ops-token";
/// Wallet the fake identity service verifies but assigns to no tenant.
pub const TENANTLESS_WALLET: &str = "0xorphan";

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        secret: SECRET.to_string(),
        issuer: None,
        audience: Vec::new(),
        leeway_seconds: 0,
    }
}

pub fn mint_token(user_id: &str, tenant_id: &str, ttl_secs: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        tenant_id: tenant_id.to_string(),
        exp: (now + ttl_secs) as usize,
        iat: now as usize,
        email: None,
        role: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("encode test token")
}

#[derive(Default)]
pub struct FakeIdentity {
    pub opaque_calls: AtomicUsize,
    pub wallet_calls: AtomicUsize,
}

#[async_trait]
impl IdentityService for FakeIdentity {
    async fn validate_opaque_token(&self, token: &str) -> Result<OpaqueTokenInfo, UpstreamError> {
        self.opaque_calls.fetch_add(1, Ordering::SeqCst);
        if token == OPAQUE_TOKEN {
            Ok(OpaqueTokenInfo {
                valid: true,
                tenant_id: TENANT.to_string(),
                user_id: "ops-bot".to_string(),
                token_id: Some("tok_42".to_string()),
                ..Default::default()
            })
        } else {
            Ok(OpaqueTokenInfo::default())
        }
    }

    async fn wallet_login(&self, proof: &WalletProof) -> Result<WalletLoginResult, UpstreamError> {
        self.wallet_calls.fetch_add(1, Ordering::SeqCst);
        Ok(WalletLoginResult {
            verified: proof.signature == "0xsigned",
            user: Some(WalletUser {
                user_id: format!("wallet:{}", proof.address),
                tenant_id: if proof.address == TENANTLESS_WALLET {
                    String::new()
                } else {
                    TENANT.to_string()
                },
                email: None,
                role: None,
            }),
            issued_token: Some("session-from-wallet".to_string()),
        })
    }
}

/// Fleet service with per-tenant limits; unknown tenants answer 404.
#[derive(Default)]
pub struct FakeFleet {
    pub limits: Mutex<HashMap<String, TenantLimits>>,
    pub calls: AtomicUsize,
    pub down: bool,
}

impl FakeFleet {
    pub fn with_limit(tenant_id: &str, ceiling: u32) -> Self {
        let fleet = Self::default();
        fleet.limits.lock().insert(
            tenant_id.to_string(),
            TenantLimits {
                ceiling,
                window: Duration::from_secs(60),
            },
        );
        fleet
    }

    pub fn down() -> Self {
        Self {
            down: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TenantLimitSource for FakeFleet {
    async fn get_tenant_limits(&self, tenant_id: &str) -> Result<TenantLimits, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down {
            return Err(UpstreamError::Unavailable {
                service: "fleet-service",
                message: "connection refused".to_string(),
            });
        }
        self.limits
            .lock()
            .get(tenant_id)
            .copied()
            .ok_or(UpstreamError::Status {
                service: "fleet-service",
                status: 404,
            })
    }
}

pub struct FakeOverflow {
    pub authorized: bool,
    pub cost: u64,
    pub calls: AtomicUsize,
}

impl FakeOverflow {
    pub fn denying() -> Self {
        Self {
            authorized: false,
            cost: 0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn paying(cost: u64) -> Self {
        Self {
            authorized: true,
            cost,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OverflowAuthorizer for FakeOverflow {
    async fn authorize_overflow(&self, _: &OverflowRequest) -> Result<OverflowVerdict, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OverflowVerdict {
            authorized: self.authorized,
            cost: self.cost,
        })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<UsageBatch>>,
}

impl RecordingSink {
    pub fn request_count(&self) -> u64 {
        self.batches.lock().iter().map(UsageBatch::request_count).sum()
    }
}

#[async_trait]
impl UsageSink for RecordingSink {
    async fn deliver(&self, batch: &UsageBatch) -> Result<(), UpstreamError> {
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct EchoTools {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ToolService for EchoTools {
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<Value, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if invocation.tool == "missing" {
            return Err(UpstreamError::Status {
                service: "agent-service",
                status: 404,
            });
        }
        Ok(json!({ "echo": invocation.arguments, "tenant": invocation.tenant_id }))
    }
}

#[derive(Default)]
pub struct CapturingForwarder {
    pub deliveries: Mutex<Vec<WebhookDelivery>>,
}

#[async_trait]
impl WebhookForwarder for CapturingForwarder {
    async fn forward(&self, delivery: WebhookDelivery) -> Result<WebhookReply, UpstreamError> {
        self.deliveries.lock().push(delivery);
        Ok(WebhookReply {
            status: 202,
            content_type: Some("application/json".to_string()),
            body: br#"{"received":true}"#.to_vec(),
        })
    }
}

pub struct Harness {
    pub state: GatewayState,
    pub meter_handle: UsageMeterHandle,
    pub identity: Arc<FakeIdentity>,
    pub fleet: Arc<FakeFleet>,
    pub overflow: Arc<FakeOverflow>,
    pub sink: Arc<RecordingSink>,
    pub tools: Arc<EchoTools>,
    pub forwarder: Arc<CapturingForwarder>,
}

pub struct HarnessBuilder {
    fleet: FakeFleet,
    overflow: FakeOverflow,
    default_ceiling: u32,
    max_complexity: u64,
    max_depth: usize,
    table: WeightTable,
    webhook_body_limit: usize,
    trusted_proxies: TrustedProxies,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            fleet: FakeFleet::default(),
            overflow: FakeOverflow::denying(),
            default_ceiling: 100,
            max_complexity: 1000,
            max_depth: 10,
            table: WeightTable::default(),
            webhook_body_limit: 1024,
            trusted_proxies: TrustedProxies::default(),
        }
    }
}

impl HarnessBuilder {
    pub fn fleet(mut self, fleet: FakeFleet) -> Self {
        self.fleet = fleet;
        self
    }

    pub fn overflow(mut self, overflow: FakeOverflow) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn default_ceiling(mut self, ceiling: u32) -> Self {
        self.default_ceiling = ceiling;
        self
    }

    pub fn ceilings(mut self, max_complexity: u64, max_depth: usize) -> Self {
        self.max_complexity = max_complexity;
        self.max_depth = max_depth;
        self
    }

    pub fn weights(mut self, table: WeightTable) -> Self {
        self.table = table;
        self
    }

    pub fn webhook_body_limit(mut self, limit: usize) -> Self {
        self.webhook_body_limit = limit;
        self
    }

    pub fn trusted_proxies(mut self, raw: &str) -> Self {
        self.trusted_proxies = TrustedProxies::parse(raw).0;
        self
    }

    /// Must run inside a Tokio runtime; spawns the usage meter.
    pub fn build(self) -> Harness {
        let identity = Arc::new(FakeIdentity::default());
        let fleet = Arc::new(self.fleet);
        let overflow = Arc::new(self.overflow);
        let sink = Arc::new(RecordingSink::default());
        let tools = Arc::new(EchoTools::default());
        let forwarder = Arc::new(CapturingForwarder::default());
        let timeout = Duration::from_millis(200);

        let resolver = Arc::new(PrincipalResolver::new(
            BearerValidator::new(&jwt_config()).expect("strong secret"),
            OpaqueTokenValidator::new(identity.clone(), timeout),
            WalletValidator::new(identity.clone(), timeout),
        ));

        let limits = TenantLimitCache::new(
            fleet.clone(),
            TenantLimits {
                ceiling: self.default_ceiling,
                window: Duration::from_secs(60),
            },
            Duration::from_secs(300),
            timeout,
        );
        let admission = AdmissionController::new(
            limits,
            overflow.clone(),
            AdmissionSettings {
                overflow_enabled: true,
                overflow_timeout: timeout,
                idle_eviction: Duration::from_secs(300),
            },
        );

        let (meter, meter_handle) = UsageMeter::spawn(
            &UsageConfig {
                flush_interval: Duration::from_secs(3600),
                retry_limit: 3,
                buffer_size: 1024,
                source_node: "test-node".to_string(),
            },
            sink.clone(),
        );

        let mut allowed = HashMap::new();
        allowed.insert("billing".to_string(), vec!["stripe".to_string()]);
        let webhooks = Arc::new(WebhookRouter::new(
            WebhookConfig {
                max_body_bytes: self.webhook_body_limit,
                allowed_providers: allowed,
            },
            forwarder.clone(),
        ));

        let state = GatewayState {
            schema: build_schema(QueryCostGovernor::new(
                self.table,
                self.max_complexity,
                self.max_depth,
            )),
            resolver,
            admission,
            meter: meter.clone(),
            subscriptions: SubscriptionSupervisor::new(meter, Handle::current()),
            webhooks,
            tools: tools.clone(),
            upstream_timeout: timeout,
            trusted_proxies: Arc::new(self.trusted_proxies),
            playground: false,
        };

        Harness {
            state,
            meter_handle,
            identity,
            fleet,
            overflow,
            sink,
            tools,
            forwarder,
        }
    }
}

/// Status of a call whose middleware may have short-circuited with an error.
pub fn status_of<B>(
    result: Result<actix_web::dev::ServiceResponse<B>, actix_web::Error>,
) -> actix_web::http::StatusCode {
    match result {
        Ok(resp) => resp.status(),
        Err(e) => e.as_response_error().status_code(),
    }
}

/// Run the gateway on a real listener with one worker, for WebSocket suites.
pub async fn start_gateway(
    state: GatewayState,
) -> std::io::Result<(std::net::SocketAddr, actix_web::dev::ServerHandle)> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let server = actix_web::HttpServer::new(move || {
        actix_web::App::new().configure(|cfg| edge_gateway::bridge::configure(cfg, state.clone()))
    })
    .workers(1)
    .shutdown_timeout(1)
    .disable_signals()
    .listen(listener)?
    .run();

    let handle = server.handle();
    actix_web::rt::spawn(server);
    Ok((addr, handle))
}
