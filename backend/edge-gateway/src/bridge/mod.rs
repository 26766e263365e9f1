//! Protocol bridge: the HTTP, WebSocket, webhook, and tool surfaces.
//!
//! Every surface runs the same pipeline: principal resolution, admission,
//! then the surface's own handler. Components are injected through
//! [`GatewayState`], so tests can swap any of them for fakes.

pub mod graphql;
pub mod tools;
pub mod webhooks;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpResponse};
use async_graphql::http::GraphiQLSource;

use crate::admission::{AdmissionController, Surface};
use crate::auth::PrincipalResolver;
use crate::context::TrustedProxies;
use crate::metrics::metrics_handler;
use crate::middleware::{AdmissionMiddleware, PrincipalMiddleware};
use crate::schema::AppSchema;
use crate::usage::{SubscriptionSupervisor, UsageMeter};

pub use tools::{ToolInvocation, ToolService};
pub use webhooks::{WebhookDelivery, WebhookForwarder, WebhookReply, WebhookRouter};

/// Shared, cheaply cloneable handles to every admission-layer component.
#[derive(Clone)]
pub struct GatewayState {
    pub schema: AppSchema,
    pub resolver: Arc<PrincipalResolver>,
    pub admission: Arc<AdmissionController>,
    pub meter: UsageMeter,
    pub subscriptions: SubscriptionSupervisor,
    pub webhooks: Arc<WebhookRouter>,
    pub tools: Arc<dyn ToolService>,
    /// Bound on tool invocations.
    pub upstream_timeout: Duration,
    pub trusted_proxies: Arc<TrustedProxies>,
    pub playground: bool,
}

/// Mount every route. Used by both the server and the integration tests.
pub fn configure(cfg: &mut web::ServiceConfig, state: GatewayState) {
    let resolver = state.resolver.clone();
    let admission = state.admission.clone();
    let playground = state.playground;

    cfg.app_data(web::Data::from(state.trusted_proxies.clone()))
        .app_data(web::Data::new(state))
        .route("/health", web::get().to(health_handler))
        .route("/metrics", web::get().to(metrics_handler))
        // Upgrade path is admitted during connection_init, not here.
        .route(websocket::WS_PATH, web::get().to(websocket::graphql_ws))
        .service(
            web::scope("/graphql")
                .wrap(AdmissionMiddleware::new(admission.clone(), Surface::Graphql))
                .wrap(PrincipalMiddleware::optional(resolver.clone()))
                .route("", web::post().to(graphql::graphql_post))
                .route("", web::get().to(graphql::graphql_get))
                .route("/", web::post().to(graphql::graphql_post))
                .route("/", web::get().to(graphql::graphql_get)),
        )
        .service(
            web::scope("/webhooks")
                .wrap(AdmissionMiddleware::new(admission.clone(), Surface::Webhook))
                .wrap(PrincipalMiddleware::optional(resolver.clone()))
                .route(
                    "/{service}/{provider}",
                    web::post().to(webhooks::webhook_handler),
                ),
        )
        .service(
            web::scope("/mcp")
                .wrap(AdmissionMiddleware::new(admission, Surface::Tool))
                .wrap(PrincipalMiddleware::required(resolver))
                .route("/tools/{tool}", web::post().to(tools::tool_handler)),
        );

    if playground {
        cfg.route("/playground", web::get().to(playground_handler));
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn playground_handler() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(
            GraphiQLSource::build()
                .endpoint("/graphql")
                .subscription_endpoint(websocket::WS_PATH)
                .finish(),
        )
}
