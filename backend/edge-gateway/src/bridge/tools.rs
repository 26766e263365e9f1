//! `POST /mcp/tools/{tool}`: authenticated tool invocations for agents.

use actix_web::{web, HttpResponse};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::GatewayState;
use crate::auth::AuthScheme;
use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::upstream::{with_timeout, UpstreamError};
use crate::usage::{OperationKind, UsageRecord};

#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub auth_scheme: AuthScheme,
}

#[async_trait]
pub trait ToolService: Send + Sync {
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<Value, UpstreamError>;
}

const AGENT_SERVICE: &str = "agent-service";

/// An empty body means no arguments; anything else must be valid JSON.
fn parse_arguments(body: &[u8]) -> Result<Value, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::BadRequest(format!("tool arguments are not valid JSON: {e}")))
}

pub async fn tool_handler(
    state: web::Data<GatewayState>,
    path: web::Path<String>,
    ctx: RequestContext,
    body: web::Bytes,
) -> Result<HttpResponse, GatewayError> {
    let tool = path.into_inner();
    let invocation = ToolInvocation {
        tool: tool.clone(),
        arguments: parse_arguments(&body)?,
        tenant_id: ctx.principal.tenant_id().to_string(),
        user_id: ctx.principal.user_id().map(str::to_string),
        auth_scheme: ctx.principal.scheme(),
    };

    debug!(tool = %tool, tenant_id = %invocation.tenant_id, "Invoking tool");
    let result = with_timeout(
        AGENT_SERVICE,
        state.upstream_timeout,
        state.tools.invoke(&invocation),
    )
    .await;

    let record = UsageRecord::new(&ctx.principal, OperationKind::Tool, Some(tool.clone()))
        .with_duration(ctx.started_at.elapsed())
        .with_errors(u32::from(result.is_err()));
    state.meter.record(record);

    match result {
        Ok(output) => Ok(HttpResponse::Ok().json(json!({ "tool": tool, "result": output }))),
        Err(e) => {
            warn!(tool = %tool, error = %e, "Tool invocation failed");
            Err(e.into())
        }
    }
}
