//! Configuration for the edge gateway
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::auth::bearer::MIN_SECRET_LEN;
use crate::context::TrustedProxies;
use crate::cost::FieldWeight;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub services: ServiceEndpoints,
    pub jwt: JwtConfig,
    pub graphql: GraphQLConfig,
    pub rate_limit: RateLimitConfig,
    pub usage: UsageConfig,
    pub webhooks: WebhookConfig,
    /// Peers allowed to set `X-Forwarded-For` / `X-Real-IP`.
    pub trusted_proxies: TrustedProxies,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    /// Grace period for open connections, WebSockets included, on stop.
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    pub identity_service: String,
    pub fleet_service: String,
    pub payment_service: String,
    pub billing_ingest: String,
    pub agent_service: String,
    /// Downstream base URL per webhook service name.
    pub webhook_targets: HashMap<String, String>,
    pub upstream_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub leeway_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct GraphQLConfig {
    pub playground: bool,
    /// 0 disables the depth ceiling.
    pub max_depth: usize,
    /// 0 disables the complexity ceiling.
    pub max_complexity: u64,
    pub default_page_size: u64,
    pub max_page_size: u64,
    /// Overrides merged on top of the built-in weight table.
    pub field_weights: HashMap<String, FieldWeight>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub default_ceiling: u32,
    pub default_window: Duration,
    pub overflow_enabled: bool,
    pub limits_ttl: Duration,
    pub cleanup_interval: Duration,
    pub idle_eviction: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    pub flush_interval: Duration,
    pub retry_limit: u32,
    pub buffer_size: usize,
    pub source_node: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub max_body_bytes: usize,
    /// Service name to the providers it accepts webhooks from.
    pub allowed_providers: HashMap<String, Vec<String>>,
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn string_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// `billing=http://billing:8080,notifications=http://notify:8080`
fn parse_pairs(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

/// `billing=stripe|mollie,identity=github`
fn parse_provider_allowlist(raw: &str) -> HashMap<String, Vec<String>> {
    parse_pairs(raw)
        .into_iter()
        .map(|(service, providers)| {
            let providers = providers
                .split('|')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            (service, providers)
        })
        .collect()
}

impl Config {
    pub async fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let (trusted_proxies, invalid) =
            TrustedProxies::parse(&string_env("TRUSTED_PROXIES", ""));
        if !invalid.is_empty() {
            warn!(entries = ?invalid, "Ignoring invalid TRUSTED_PROXIES entries");
        }

        Ok(Self {
            server: ServerConfig {
                host: string_env("SERVER_HOST", "0.0.0.0"),
                port: parse_env("SERVER_PORT", 8080),
                workers: parse_env("SERVER_WORKERS", num_cpus::get()),
                shutdown_timeout: Duration::from_secs(parse_env(
                    "SERVER_SHUTDOWN_TIMEOUT_SECS",
                    30,
                )),
            },
            services: ServiceEndpoints {
                identity_service: string_env("IDENTITY_SERVICE_URL", "http://identity-service:8080"),
                fleet_service: string_env("FLEET_SERVICE_URL", "http://fleet-service:8080"),
                payment_service: string_env("PAYMENT_SERVICE_URL", "http://payment-service:8080"),
                billing_ingest: string_env("BILLING_INGEST_URL", "http://billing-service:8080"),
                agent_service: string_env("AGENT_SERVICE_URL", "http://agent-service:8080"),
                webhook_targets: parse_pairs(&string_env(
                    "WEBHOOK_TARGETS",
                    "billing=http://billing-service:8080",
                )),
                upstream_timeout: Duration::from_millis(parse_env("UPSTREAM_TIMEOUT_MS", 2000)),
            },
            jwt: Self::jwt_from_env()?,
            graphql: GraphQLConfig {
                playground: parse_env("GRAPHQL_PLAYGROUND", false),
                max_depth: parse_env("GRAPHQL_MAX_DEPTH", 10),
                max_complexity: parse_env("GRAPHQL_MAX_COMPLEXITY", 1000),
                default_page_size: parse_env("GRAPHQL_DEFAULT_PAGE_SIZE", 50),
                max_page_size: parse_env("GRAPHQL_MAX_PAGE_SIZE", 500),
                field_weights: Self::field_weights_from_env()?,
            },
            rate_limit: RateLimitConfig {
                default_ceiling: parse_env("RATE_LIMIT_DEFAULT_CEILING", 100),
                default_window: Duration::from_secs(parse_env(
                    "RATE_LIMIT_DEFAULT_WINDOW_SECS",
                    60,
                )),
                overflow_enabled: parse_env("RATE_LIMIT_OVERFLOW_ENABLED", true),
                limits_ttl: Duration::from_secs(parse_env("TENANT_LIMITS_TTL_SECS", 300)),
                cleanup_interval: Duration::from_secs(parse_env(
                    "RATE_LIMIT_CLEANUP_INTERVAL_SECS",
                    60,
                )),
                idle_eviction: Duration::from_secs(parse_env(
                    "RATE_LIMIT_IDLE_EVICTION_SECS",
                    300,
                )),
            },
            usage: UsageConfig {
                flush_interval: Duration::from_secs(parse_env("USAGE_FLUSH_INTERVAL_SECS", 30)),
                retry_limit: parse_env("USAGE_RETRY_LIMIT", 3),
                buffer_size: parse_env("USAGE_BUFFER_SIZE", 10_000),
                source_node: env::var("USAGE_SOURCE_NODE")
                    .or_else(|_| env::var("HOSTNAME"))
                    .unwrap_or_else(|_| "edge-gateway".to_string()),
            },
            webhooks: WebhookConfig {
                max_body_bytes: parse_env("WEBHOOK_MAX_BODY_BYTES", 1 << 20),
                allowed_providers: parse_provider_allowlist(&string_env(
                    "WEBHOOK_ALLOWED_PROVIDERS",
                    "billing=stripe|mollie",
                )),
            },
            trusted_proxies,
        })
    }

    fn jwt_from_env() -> Result<JwtConfig> {
        let secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if secret.len() < MIN_SECRET_LEN {
            bail!(
                "JWT_SECRET too short: {} bytes, need at least {}",
                secret.len(),
                MIN_SECRET_LEN
            );
        }

        let audience = env::var("JWT_AUDIENCE")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(JwtConfig {
            secret,
            issuer: env::var("JWT_ISSUER").ok().filter(|s| !s.is_empty()),
            audience,
            leeway_seconds: parse_env("JWT_LEEWAY_SECONDS", 30),
        })
    }

    fn field_weights_from_env() -> Result<HashMap<String, FieldWeight>> {
        match env::var("GRAPHQL_FIELD_WEIGHTS") {
            Ok(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(&raw).context("Invalid GRAPHQL_FIELD_WEIGHTS")
            }
            _ => Ok(HashMap::new()),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebhookConfig {
    pub fn allows(&self, service: &str, provider: &str) -> bool {
        match self.allowed_providers.get(service) {
            Some(providers) => providers.iter().any(|p| p == provider),
            None => {
                warn!(service = %service, "Webhook for unconfigured service");
                false
            }
        }
    }
}
