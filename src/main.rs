use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use relquery::config::TranslatorConfig;
use relquery::executor::bind_parameters;
use relquery::model::{Model, ModelConfig};
use relquery::query::{QueryExpr, Value};
use relquery::query_planner::logical_plan::ParameterSource;
use relquery::query_planner::QueryParameters;
use relquery::sql_generator::DialectKind;
use relquery::translate_to_command;

/// relquery - translate LINQ-style queries to SQL
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the command text and parameter bindings for a query
    Translate {
        /// Model definition (YAML)
        #[arg(long)]
        model: PathBuf,

        /// Query tree (JSON)
        #[arg(long)]
        query: PathBuf,

        /// Parameter values: a JSON object of name to value
        #[arg(long)]
        params: Option<PathBuf>,

        /// Target dialect, overrides the configuration
        #[arg(long, value_enum)]
        dialect: Option<DialectKind>,

        /// Translator configuration (YAML); RELQUERY_* variables otherwise
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load and validate a model file
    CheckModel {
        #[arg(long)]
        model: PathBuf,
    },
}

fn load_model(path: &Path) -> Result<Model> {
    let model = ModelConfig::from_yaml_file(path)
        .and_then(|config| config.to_model())
        .with_context(|| format!("invalid model {}", path.display()))?;
    Ok(model)
}

fn load_params(path: &Path) -> Result<QueryParameters> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))?;
    let serde_json::Value::Object(entries) = json else {
        bail!("{} must contain a JSON object", path.display());
    };
    let mut params = QueryParameters::new();
    for (name, value) in &entries {
        let value = Value::from_json(value)
            .ok_or_else(|| anyhow!("parameter `{}` has no scalar or list value", name))?;
        params.insert(name.as_str(), value);
    }
    Ok(params)
}

fn translate(
    model: &Path,
    query: &Path,
    params: Option<&Path>,
    dialect: Option<DialectKind>,
    config: Option<&Path>,
) -> Result<()> {
    let mut translator_config = match config {
        Some(path) => TranslatorConfig::from_yaml_file(path)?,
        None => TranslatorConfig::from_env()?,
    };
    if let Some(dialect) = dialect {
        translator_config = translator_config.with_dialect(dialect);
    }

    let model = load_model(model)?;
    let text = std::fs::read_to_string(query)
        .with_context(|| format!("failed to read {}", query.display()))?;
    let query: QueryExpr = serde_json::from_str(&text)
        .with_context(|| format!("invalid query tree in {}", query.display()))?;
    let params = match params {
        Some(path) => load_params(path)?,
        None => QueryParameters::new(),
    };

    info!("Translating {} for {}", query, translator_config.dialect);
    let command = translate_to_command(&query, &model, &params, &translator_config)?;
    println!("{}", command.text);

    if !command.parameters.is_empty() {
        println!();
        match bind_parameters(&command, &params) {
            Ok(bound) => {
                for p in bound {
                    println!("{} = {} ({})", p.placeholder, p.value, p.type_mapping.clr);
                }
            }
            Err(e) => {
                info!("Parameters not bound: {}", e);
                for p in &command.parameters {
                    let source = match &p.source {
                        ParameterSource::Closure(name) => format!("<{}>", name),
                        ParameterSource::ListElement { name, index } => format!("<{}[{}]>", name, index),
                        ParameterSource::Constant(value) => value.to_string(),
                    };
                    println!("{} = {} ({})", p.placeholder, source, p.type_mapping.clr);
                }
            }
        }
    }
    Ok(())
}

fn check_model(path: &Path) -> Result<()> {
    let model = load_model(path)?;
    let count = model.entities().count();
    for entity in model.entities() {
        let store = match (&entity.defining_query, entity.owned) {
            (Some(_), _) => "defining query".to_string(),
            (None, true) => "owned".to_string(),
            (None, false) => entity.table.clone(),
        };
        println!("{} -> {}", entity.name, store);
    }
    info!("Model {} is valid: {} entity types", path.display(), count);
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Translate {
            model,
            query,
            params,
            dialect,
            config,
        } => translate(
            &model,
            &query,
            params.as_deref(),
            dialect,
            config.as_deref(),
        ),
        Command::CheckModel { model } => check_model(&model),
    }
}
