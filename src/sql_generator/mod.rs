//! Command text generation: [`RenderPlan`] to dialect text plus bindings.

pub mod cosmos;
pub mod dialect;
pub mod errors;
pub mod function_registry;
pub mod sql_server;
pub mod sqlite;
pub mod writer;

pub use dialect::{Dialect, DialectKind};
pub use errors::SqlGeneratorError;

use crate::config::UnorderedPagingPolicy;
use crate::query::TypeMapping;
use crate::query_planner::logical_plan::ParameterSource;
use crate::render_plan::RenderPlan;
use writer::SqlWriter;

/// What the execution engine receives.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    /// In order of first appearance in `text`.
    pub parameters: Vec<CommandParameter>,
    /// Result column names, in select-list order.
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandParameter {
    pub name: String,
    /// Name as written in the text (`@name`).
    pub placeholder: String,
    pub source: ParameterSource,
    pub type_mapping: TypeMapping,
}

pub fn generate(
    plan: &RenderPlan,
    dialect: DialectKind,
    unordered_paging: UnorderedPagingPolicy,
) -> Result<Command, SqlGeneratorError> {
    let target = dialect.dialect();
    let mut writer = SqlWriter::new(target, unordered_paging);
    let text = writer.query(&plan.query)?;

    let parameters = writer
        .into_parameters()
        .into_iter()
        .map(|name| {
            let spec = plan
                .parameters
                .iter()
                .find(|p| p.name == name)
                .ok_or_else(|| SqlGeneratorError::UnboundParameter(name.clone()))?;
            Ok(CommandParameter {
                placeholder: target.parameter(&name),
                name,
                source: spec.source.clone(),
                type_mapping: spec.type_mapping,
            })
        })
        .collect::<Result<Vec<_>, SqlGeneratorError>>()?;

    log::debug!("Generated {} command:\n{}", dialect, text);
    Ok(Command {
        text,
        parameters,
        columns: plan.columns.clone(),
    })
}

#[cfg(test)]
mod tests;
