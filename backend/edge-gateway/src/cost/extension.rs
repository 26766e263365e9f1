//! GraphQL extension that prices every operation before it executes.

use std::sync::Arc;

use async_graphql::extensions::{
    Extension, ExtensionContext, ExtensionFactory, NextParseQuery, NextPrepareRequest,
    NextSubscribe,
};
use async_graphql::parser::types::ExecutableDocument;
use async_graphql::{Request, Response, ServerResult, Variables};
use futures_util::stream::BoxStream;
use parking_lot::Mutex;
use tracing::warn;

use super::{QueryCostAssessment, QueryCostGovernor};
use crate::context::ReadOnlyTransport;
use crate::error::GatewayError;
use crate::metrics;
use crate::usage::{ConnectionScope, OperationKind};

/// Request-scoped cell the executor fills once the operation passes the governor.
/// Empty means the operation never got past parsing or pricing.
#[derive(Clone, Default)]
pub struct AssessmentSlot(Arc<Mutex<Option<QueryCostAssessment>>>);

impl AssessmentSlot {
    pub fn set(&self, assessment: QueryCostAssessment) {
        *self.0.lock() = Some(assessment);
    }

    pub fn get(&self) -> Option<QueryCostAssessment> {
        self.0.lock().clone()
    }
}

pub struct CostGovernorExtension {
    governor: Arc<QueryCostGovernor>,
}

impl CostGovernorExtension {
    pub fn new(governor: QueryCostGovernor) -> Self {
        Self {
            governor: Arc::new(governor),
        }
    }
}

impl ExtensionFactory for CostGovernorExtension {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(CostGovernor {
            governor: self.governor.clone(),
            operation_name: Mutex::new(None),
            slot: AssessmentSlot::default(),
        })
    }
}

struct CostGovernor {
    governor: Arc<QueryCostGovernor>,
    operation_name: Mutex<Option<String>>,
    slot: AssessmentSlot,
}

#[async_trait::async_trait]
impl Extension for CostGovernor {
    async fn prepare_request(
        &self,
        ctx: &ExtensionContext<'_>,
        request: Request,
        next: NextPrepareRequest<'_>,
    ) -> ServerResult<Request> {
        *self.operation_name.lock() = request.operation_name.clone();
        next.run(ctx, request).await
    }

    async fn parse_query(
        &self,
        ctx: &ExtensionContext<'_>,
        query: &str,
        variables: &Variables,
        next: NextParseQuery<'_>,
    ) -> ServerResult<ExecutableDocument> {
        let document = next.run(ctx, query, variables).await?;

        let operation_name = self.operation_name.lock().clone();
        let assessment = self
            .governor
            .assess(&document, operation_name.as_deref(), variables);

        if assessment.operation_kind == OperationKind::Mutation
            && ctx.data_opt::<ReadOnlyTransport>().is_some()
        {
            return Err(GatewayError::BadRequest(
                "mutations are not allowed over GET".to_string(),
            )
            .to_server_error());
        }

        if let Err(err) = self.governor.check(&assessment) {
            metrics::COST_REJECTIONS
                .with_label_values(&[err.code()])
                .inc();
            warn!(
                complexity = assessment.complexity,
                depth = assessment.depth,
                operation = ?assessment.operation_name,
                "Query rejected before execution"
            );
            return Err(err.to_server_error());
        }

        if let Some(request_slot) = ctx.data_opt::<AssessmentSlot>() {
            request_slot.set(assessment.clone());
        }
        self.slot.set(assessment);
        Ok(document)
    }

    fn subscribe<'s>(
        &self,
        ctx: &ExtensionContext<'_>,
        stream: BoxStream<'s, Response>,
        next: NextSubscribe<'_>,
    ) -> BoxStream<'s, Response> {
        let stream = next.run(ctx, stream);
        match ctx.data_opt::<ConnectionScope>() {
            Some(scope) => scope.meter_stream(stream, self.slot.clone()),
            None => stream,
        }
    }
}
