//! Execution glue: compile (through the cache), bind, run, materialize.
//!
//! The connection is an external collaborator behind [`Connection`] and
//! [`RowReader`]. The only suspension point is waiting for the next row;
//! cancellation is checked before each one.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::config::TranslatorConfig;
use crate::errors::QueryError;
use crate::materializer::{ClientFunctions, MaterializeError, Materialized, Materializer, Row};
use crate::model::Model;
use crate::query::{ElementKind, QueryExpr};
use crate::query_planner::logical_plan::ResultCardinality;
use crate::query_planner::shape::QueryShape;
use crate::query_planner::{translate, QueryParameters, TranslationOptions};
use crate::render_plan::logical_plan_to_render_plan;
use crate::sql_generator::{generate, Command};

pub mod binding;
pub mod cancellation;
pub mod errors;
pub mod query_cache;

pub use binding::{bind_parameters, BoundParameter, ParameterError};
pub use cancellation::CancellationToken;
pub use errors::ConnectionError;
pub use query_cache::{CacheMetrics, QueryCache, QueryCacheConfig, QueryCacheKey};

#[async_trait]
pub trait Connection: Send + Sync {
    async fn execute(
        &self,
        command: &Command,
        parameters: &[BoundParameter],
    ) -> Result<Box<dyn RowReader>, ConnectionError>;
}

/// Forward-only cursor over one command's result rows.
#[async_trait]
pub trait RowReader: Send {
    async fn next_row(&mut self) -> Result<Option<Row>, ConnectionError>;
}

/// Everything needed to run a query again without translating it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub command: Command,
    pub shape: QueryShape,
    pub cardinality: ResultCardinality,
    pub tracking: bool,
}

pub type ResultStream = BoxStream<'static, Result<Materialized, QueryError>>;

pub struct QueryExecutor<C> {
    connection: C,
    model: Arc<Model>,
    config: TranslatorConfig,
    cache: QueryCache,
    functions: Arc<ClientFunctions>,
}

impl<C: Connection> QueryExecutor<C> {
    pub fn new(connection: C, model: Arc<Model>, config: TranslatorConfig) -> Self {
        let cache = QueryCache::new(QueryCacheConfig::from(&config));
        QueryExecutor {
            connection,
            model,
            config,
            cache,
            functions: Arc::new(ClientFunctions::new()),
        }
    }

    pub fn with_client_functions(mut self, functions: ClientFunctions) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    fn options(&self) -> TranslationOptions {
        TranslationOptions::from(&self.config)
    }

    /// Translates `query`, or returns the cached translation of an
    /// equivalent one.
    pub fn compile(
        &self,
        query: &QueryExpr,
        params: &QueryParameters,
    ) -> Result<Arc<CompiledQuery>, QueryError> {
        let options = self.options();
        let key = QueryCacheKey::fingerprint(
            query,
            params,
            self.config.dialect,
            options,
            self.config.unordered_paging,
        );
        if let Some(compiled) = self.cache.get(&key) {
            return Ok(compiled);
        }

        let plan = translate(query, &self.model, params, options)?;
        let render = logical_plan_to_render_plan(&plan)?;
        let command = generate(&render, self.config.dialect, self.config.unordered_paging)?;
        let compiled = Arc::new(CompiledQuery {
            command,
            shape: render.shape,
            cardinality: render.cardinality,
            tracking: render.tracking,
        });
        self.cache.insert(key, compiled.clone());
        Ok(compiled)
    }

    /// Runs the query and streams its results as they complete.
    pub async fn stream(
        &self,
        query: &QueryExpr,
        params: &QueryParameters,
        cancel: CancellationToken,
    ) -> Result<ResultStream, QueryError> {
        let compiled = self.compile(query, params)?;
        self.open(&compiled, params, cancel).await
    }

    async fn open(
        &self,
        compiled: &CompiledQuery,
        params: &QueryParameters,
        cancel: CancellationToken,
    ) -> Result<ResultStream, QueryError> {
        if let Some(function) = self.functions.missing(&compiled.shape).first() {
            return Err(MaterializeError::UnknownClientFunction {
                function: function.to_string(),
                description: "projection".to_string(),
            }
            .into());
        }
        let bound = bind_parameters(&compiled.command, params)?;
        if cancel.is_cancelled() {
            return Err(QueryError::CancellationRequested);
        }
        log::debug!(
            "Executing command with {} parameter(s):\n{}",
            bound.len(),
            compiled.command.text
        );
        let reader = self.connection.execute(&compiled.command, &bound).await?;
        let state = StreamState {
            reader,
            materializer: Materializer::new(
                compiled.shape.clone(),
                compiled.tracking,
                self.functions.clone(),
            ),
            cancel,
            exhausted: false,
        };
        Ok(stream::try_unfold(state, next_result).boxed())
    }

    pub async fn to_list(
        &self,
        query: &QueryExpr,
        params: &QueryParameters,
    ) -> Result<Vec<Materialized>, QueryError> {
        self.stream(query, params, CancellationToken::new())
            .await?
            .try_collect()
            .await
    }

    /// Runs the query and applies its terminal operator: a sequence comes
    /// back as a list, element operators check cardinality, scalar
    /// terminals return the single value.
    pub async fn execute(
        &self,
        query: &QueryExpr,
        params: &QueryParameters,
        cancel: CancellationToken,
    ) -> Result<Materialized, QueryError> {
        let compiled = self.compile(query, params)?;
        let results: Vec<Materialized> = self
            .open(&compiled, params, cancel)
            .await?
            .try_collect()
            .await?;
        match compiled.cardinality {
            ResultCardinality::Sequence => Ok(Materialized::List(results)),
            ResultCardinality::Scalar => results
                .into_iter()
                .next()
                .ok_or_else(|| QueryError::Cardinality("Sequence contains no elements".to_string())),
            ResultCardinality::Element(kind) => element(kind, results),
        }
    }
}

fn element(kind: ElementKind, results: Vec<Materialized>) -> Result<Materialized, QueryError> {
    if kind.is_single() && results.len() > 1 {
        return Err(QueryError::Cardinality(format!(
            "{}: sequence contains more than one element",
            kind.name()
        )));
    }
    match results.into_iter().next() {
        Some(result) => Ok(result),
        None if kind.allows_empty() => Ok(Materialized::Null),
        None => Err(QueryError::Cardinality(format!(
            "{}: sequence contains no elements",
            kind.name()
        ))),
    }
}

struct StreamState {
    reader: Box<dyn RowReader>,
    materializer: Materializer,
    cancel: CancellationToken,
    exhausted: bool,
}

async fn next_result(
    mut state: StreamState,
) -> Result<Option<(Materialized, StreamState)>, QueryError> {
    loop {
        if state.exhausted {
            return Ok(None);
        }
        if state.cancel.is_cancelled() {
            return Err(QueryError::CancellationRequested);
        }
        match state.reader.next_row().await? {
            Some(row) => {
                if let Some(result) = state.materializer.push_row(row)? {
                    return Ok(Some((result, state)));
                }
            }
            None => {
                state.exhausted = true;
                if let Some(result) = state.materializer.finish()? {
                    return Ok(Some((result, state)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
