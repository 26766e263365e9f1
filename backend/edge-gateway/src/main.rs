use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, App, HttpServer};
use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::prelude::*;

use edge_gateway::admission::limits::{TenantLimitCache, TenantLimits};
use edge_gateway::admission::{AdmissionController, AdmissionSettings};
use edge_gateway::auth::{BearerValidator, OpaqueTokenValidator, PrincipalResolver, WalletValidator};
use edge_gateway::bridge::{self, GatewayState, WebhookRouter};
use edge_gateway::clients::ServiceClients;
use edge_gateway::config::Config;
use edge_gateway::cost::QueryCostGovernor;
use edge_gateway::schema::build_schema;
use edge_gateway::usage::{SubscriptionSupervisor, UsageMeter};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,edge_gateway=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true),
        )
        .init();

    info!("Starting edge gateway...");

    let config = Config::from_env()
        .await
        .context("Failed to load configuration")?;

    let clients = Arc::new(ServiceClients::new(&config.services)?);
    let timeout = config.services.upstream_timeout;

    let bearer = BearerValidator::new(&config.jwt)?;
    let resolver = Arc::new(PrincipalResolver::new(
        bearer,
        OpaqueTokenValidator::new(clients.clone(), timeout),
        WalletValidator::new(clients.clone(), timeout),
    ));

    let limits = TenantLimitCache::new(
        clients.clone(),
        TenantLimits {
            ceiling: config.rate_limit.default_ceiling,
            window: config.rate_limit.default_window,
        },
        config.rate_limit.limits_ttl,
        timeout,
    );
    let admission = AdmissionController::new(
        limits,
        clients.clone(),
        AdmissionSettings {
            overflow_enabled: config.rate_limit.overflow_enabled,
            overflow_timeout: timeout,
            idle_eviction: config.rate_limit.idle_eviction,
        },
    );
    let shutdown = CancellationToken::new();
    let eviction = admission.spawn_eviction(config.rate_limit.cleanup_interval, shutdown.clone());

    let (meter, meter_handle) = UsageMeter::spawn(&config.usage, clients.clone());
    let subscriptions =
        SubscriptionSupervisor::new(meter.clone(), tokio::runtime::Handle::current());

    let state = GatewayState {
        schema: build_schema(QueryCostGovernor::from_config(&config.graphql)),
        resolver,
        admission,
        meter,
        subscriptions: subscriptions.clone(),
        webhooks: Arc::new(WebhookRouter::new(config.webhooks.clone(), clients.clone())),
        tools: clients,
        upstream_timeout: timeout,
        trusted_proxies: Arc::new(config.trusted_proxies.clone()),
        playground: config.graphql.playground,
    };

    info!(
        max_complexity = config.graphql.max_complexity,
        max_depth = config.graphql.max_depth,
        default_ceiling = config.rate_limit.default_ceiling,
        overflow_enabled = config.rate_limit.overflow_enabled,
        "Admission layer configured"
    );

    let bind_addr = config.bind_addr();
    info!("Edge gateway listening on http://{}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .configure(|cfg| bridge::configure(cfg, state.clone()))
    })
    .workers(config.server.workers)
    .shutdown_timeout(config.server.shutdown_timeout.as_secs())
    .bind(&bind_addr)?
    .run()
    .await?;

    // Workers are gone; subscription waiters live on this runtime and have
    // already seen their connections drop.
    info!("HTTP server stopped, draining background tasks");
    subscriptions.shutdown().await;
    shutdown.cancel();
    if let Err(e) = eviction.await {
        tracing::error!(error = %e, "Counter eviction task failed");
    }
    meter_handle.shutdown().await;
    info!("Edge gateway stopped");

    Ok(())
}
