//! Static query pricing.
//!
//! Depth and complexity are computed from the parsed document before any
//! resolver runs, then compared against independently configured ceilings.

pub mod complexity;
pub mod depth;
pub mod extension;
pub mod weights;

use async_graphql::parser::types::{ExecutableDocument, OperationDefinition, OperationType};
use async_graphql::Variables;

use crate::config::GraphQLConfig;
use crate::error::GatewayError;
use crate::usage::OperationKind;

pub use complexity::ComplexityWalker;
pub use depth::DepthWalker;
pub use extension::{AssessmentSlot, CostGovernorExtension};
pub use weights::{FieldWeight, WeightTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCostAssessment {
    pub complexity: u64,
    pub depth: usize,
    pub operation_name: Option<String>,
    pub operation_kind: OperationKind,
}

#[derive(Debug, Clone)]
pub struct QueryCostGovernor {
    table: WeightTable,
    /// 0 disables.
    max_complexity: u64,
    /// 0 disables.
    max_depth: usize,
}

impl QueryCostGovernor {
    pub fn new(table: WeightTable, max_complexity: u64, max_depth: usize) -> Self {
        Self {
            table,
            max_complexity,
            max_depth,
        }
    }

    pub fn from_config(config: &GraphQLConfig) -> Self {
        let table = WeightTable::new(config.default_page_size, config.max_page_size)
            .with_overrides(config.field_weights.clone());
        Self::new(table, config.max_complexity, config.max_depth)
    }

    /// Prices the operation that will run: the named one if it exists, the
    /// only one if there is just one, otherwise the most expensive of all.
    pub fn assess(
        &self,
        document: &ExecutableDocument,
        operation_name: Option<&str>,
        variables: &Variables,
    ) -> QueryCostAssessment {
        let operations: Vec<(Option<&str>, &OperationDefinition)> = document
            .operations
            .iter()
            .map(|(name, op)| (name.map(|n| n.as_str()), &op.node))
            .collect();

        let selected = match operation_name {
            Some(wanted) => operations.iter().find(|(name, _)| *name == Some(wanted)),
            None if operations.len() == 1 => operations.first(),
            None => None,
        };

        match selected {
            Some((name, op)) => self.assess_operation(document, variables, *name, op),
            None => operations
                .iter()
                .map(|(name, op)| self.assess_operation(document, variables, *name, op))
                .fold(None, |acc: Option<QueryCostAssessment>, next| match acc {
                    None => Some(next),
                    Some(mut acc) => {
                        if next.complexity > acc.complexity {
                            acc.complexity = next.complexity;
                            acc.operation_kind = next.operation_kind;
                            acc.operation_name = next.operation_name.clone();
                        }
                        acc.depth = acc.depth.max(next.depth);
                        Some(acc)
                    }
                })
                .unwrap_or(QueryCostAssessment {
                    complexity: 0,
                    depth: 0,
                    operation_name: operation_name.map(str::to_string),
                    operation_kind: OperationKind::Unknown,
                }),
        }
    }

    fn assess_operation(
        &self,
        document: &ExecutableDocument,
        variables: &Variables,
        name: Option<&str>,
        operation: &OperationDefinition,
    ) -> QueryCostAssessment {
        let set = &operation.selection_set.node;
        QueryCostAssessment {
            complexity: ComplexityWalker::new(&self.table, document, variables).selection_set(set),
            depth: DepthWalker::new(document).selection_set(set),
            operation_name: name.map(str::to_string),
            operation_kind: match operation.ty {
                OperationType::Query => OperationKind::Query,
                OperationType::Mutation => OperationKind::Mutation,
                OperationType::Subscription => OperationKind::Subscription,
            },
        }
    }

    /// Complexity is checked before depth.
    pub fn check(&self, assessment: &QueryCostAssessment) -> Result<(), GatewayError> {
        if self.max_complexity > 0 && assessment.complexity > self.max_complexity {
            return Err(GatewayError::ComplexityExceeded {
                value: assessment.complexity,
                ceiling: self.max_complexity,
            });
        }
        if self.max_depth > 0 && assessment.depth > self.max_depth {
            return Err(GatewayError::DepthExceeded {
                value: assessment.depth,
                ceiling: self.max_depth,
            });
        }
        Ok(())
    }
}
