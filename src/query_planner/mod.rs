//! Translation front half: LINQ operator tree to analyzed [`QueryPlan`].
//!
//! [`translate`] runs the normalizer (navigation expansion, shape tracking)
//! and then the analyzer passes. The result no longer mentions navigations,
//! lambdas or closure variables: every row source is an explicit scan or
//! join and every value is a [`logical_expr::LogicalExpr`].

use std::collections::BTreeMap;

use errors::QueryPlannerError;
use logical_plan::QueryPlan;

use crate::config::TranslatorConfig;
use crate::model::Model;
use crate::query::{QueryExpr, Value};
use crate::sql_generator::DialectKind;

pub mod analyzer;
pub mod errors;
pub mod logical_expr;
pub mod logical_plan;
pub mod normalizer;
pub mod plan_ctx;
pub mod shape;
pub mod transformed;

/// Values of the closure variables a query refers to, by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParameters {
    values: BTreeMap<String, Value>,
}

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for QueryParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        QueryParameters {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Knobs of the translation that change the produced plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationOptions {
    /// Local lists up to this length bind one parameter per element.
    pub contains_parameter_limit: usize,
    /// Default tracking behavior; `AsNoTracking` turns it off per query.
    pub tracking: bool,
    /// Every entity type shares one container: roots are aliased `c` and
    /// always filtered by their discriminator.
    pub document_store: bool,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        TranslationOptions {
            contains_parameter_limit: 100,
            tracking: true,
            document_store: false,
        }
    }
}

impl From<&TranslatorConfig> for TranslationOptions {
    fn from(config: &TranslatorConfig) -> Self {
        TranslationOptions {
            contains_parameter_limit: config.contains_parameter_limit,
            tracking: config.tracking,
            document_store: config.dialect == DialectKind::Cosmos,
        }
    }
}

pub fn translate(
    query: &QueryExpr,
    model: &Model,
    params: &QueryParameters,
    options: TranslationOptions,
) -> Result<QueryPlan, QueryPlannerError> {
    log::debug!("QUERY_PLANNER: translating {}", query);
    let normalizer = normalizer::Normalizer::new(
        model,
        params,
        options.contains_parameter_limit,
        options.tracking,
    )
    .with_document_store(options.document_store);
    let plan = normalizer.normalize(query)?;
    analyzer::analyze(plan)
}
