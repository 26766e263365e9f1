//! Prometheus metrics for the admission layer.

use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref PRINCIPALS_RESOLVED: IntCounterVec = register_int_counter_vec!(
        "edge_gateway_principals_resolved_total",
        "Principals resolved, by auth scheme",
        &["scheme"]
    )
    .expect("Failed to register edge_gateway_principals_resolved_total");

    pub static ref ADMISSION_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "edge_gateway_admission_decisions_total",
        "Admission decisions, by surface and outcome",
        &["surface", "outcome"]
    )
    .expect("Failed to register edge_gateway_admission_decisions_total");

    pub static ref COST_REJECTIONS: IntCounterVec = register_int_counter_vec!(
        "edge_gateway_cost_rejections_total",
        "Operations rejected before execution, by reason",
        &["reason"]
    )
    .expect("Failed to register edge_gateway_cost_rejections_total");

    pub static ref USAGE_RECORDS_DROPPED: IntCounterVec = register_int_counter_vec!(
        "edge_gateway_usage_records_dropped_total",
        "Usage records dropped before aggregation",
        &["reason"]
    )
    .expect("Failed to register edge_gateway_usage_records_dropped_total");

    pub static ref USAGE_BATCHES: IntCounterVec = register_int_counter_vec!(
        "edge_gateway_usage_batches_total",
        "Usage batch delivery attempts, by outcome",
        &["outcome"]
    )
    .expect("Failed to register edge_gateway_usage_batches_total");

    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge = register_int_gauge!(
        "edge_gateway_active_subscriptions",
        "Subscriptions with a live usage waiter"
    )
    .expect("Failed to register edge_gateway_active_subscriptions");
}

/// `GET /metrics`
pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
