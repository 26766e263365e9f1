//! GraphQL over HTTP (`POST` and `GET /graphql`).

use actix_web::web;
use async_graphql_actix_web::{GraphQLRequest, GraphQLResponse};
use tracing::debug;

use super::GatewayState;
use crate::context::{Caller, ReadOnlyTransport, RequestContext};
use crate::cost::AssessmentSlot;
use crate::usage::UsageRecord;

pub async fn graphql_post(
    state: web::Data<GatewayState>,
    ctx: RequestContext,
    req: GraphQLRequest,
) -> GraphQLResponse {
    execute(&state, ctx, req.into_inner()).await
}

/// Query-string transport. Mutations are refused by the cost governor.
pub async fn graphql_get(
    state: web::Data<GatewayState>,
    ctx: RequestContext,
    req: GraphQLRequest,
) -> GraphQLResponse {
    execute(&state, ctx, req.into_inner().data(ReadOnlyTransport)).await
}

async fn execute(
    state: &GatewayState,
    ctx: RequestContext,
    request: async_graphql::Request,
) -> GraphQLResponse {
    let slot = AssessmentSlot::default();
    let request = request
        .data(Caller(ctx.principal.clone()))
        .data(slot.clone());

    let response = state.schema.execute(request).await;

    // Operations rejected before execution are not billable.
    if let Some(assessment) = slot.get() {
        debug!(
            tenant_id = %ctx.principal.tenant_id(),
            complexity = assessment.complexity,
            errors = response.errors.len(),
            "GraphQL operation completed"
        );
        let record = UsageRecord::new(
            &ctx.principal,
            assessment.operation_kind,
            assessment.operation_name,
        )
        .with_duration(ctx.started_at.elapsed())
        .with_complexity(assessment.complexity)
        .with_errors(response.errors.len() as u32);
        state.meter.record(record);
    }

    response.into()
}
