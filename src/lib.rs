//! relquery - LINQ-style query translation to SQL
//!
//! This crate translates composed query expressions over a mapped entity
//! model into dialect command text, and materializes result rows back into
//! objects:
//! - Query expression trees and a fluent builder (`query`)
//! - Entity model metadata loaded from YAML (`model`)
//! - Normalization, navigation expansion and analysis (`query_planner`)
//! - Relational lowering to SELECT statements (`render_plan`)
//! - SQL Server, SQLite and Cosmos text generation (`sql_generator`)
//! - Row materialization with identity resolution (`materializer`)
//! - Cached compilation and streaming execution (`executor`)

pub mod config;
pub mod errors;
pub mod executor;
pub mod materializer;
pub mod model;
pub mod query;
pub mod query_planner;
pub mod render_plan;
pub mod sql_generator;

pub use errors::QueryError;

use config::TranslatorConfig;
use model::Model;
use query::QueryExpr;
use query_planner::{QueryParameters, TranslationOptions};
use sql_generator::Command;

/// Translates `query` into a command for the configured dialect, without
/// executing or caching it.
pub fn translate_to_command(
    query: &QueryExpr,
    model: &Model,
    params: &QueryParameters,
    config: &TranslatorConfig,
) -> Result<Command, QueryError> {
    let options = TranslationOptions::from(config);
    let plan = query_planner::translate(query, model, params, options)?;
    let render = render_plan::logical_plan_to_render_plan(&plan)?;
    Ok(sql_generator::generate(
        &render,
        config.dialect,
        config.unordered_paging,
    )?)
}
