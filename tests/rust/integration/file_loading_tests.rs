use std::io::Write;

use relquery::config::{ConfigError, TranslatorConfig, UnorderedPagingPolicy};
use relquery::model::{ModelConfig, ModelError};
use relquery::query::{lambda, lit, var, QueryExpr, Queryable};
use relquery::query_planner::QueryParameters;
use relquery::sql_generator::DialectKind;
use relquery::translate_to_command;
use tempfile::NamedTempFile;

const NORTHWIND_YAML: &str = include_str!("../../fixtures/northwind.yaml");

fn temp_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_model_file_loads_from_disk() {
    let file = temp_file(NORTHWIND_YAML);
    let model = ModelConfig::from_yaml_file(file.path())
        .unwrap()
        .to_model()
        .unwrap();
    assert!(model.entity("Customer").is_ok());
    assert_eq!(model.derived_types("Animal").len(), 2);
}

#[test]
fn test_missing_model_file_is_a_read_error() {
    let err = ModelConfig::from_yaml_file("/nonexistent/northwind.yaml").unwrap_err();
    assert!(matches!(err, ModelError::ConfigReadError { .. }));
}

#[test]
fn test_translator_config_file() {
    let file = temp_file("dialect: sqlite\ncontains_parameter_limit: 5\nunordered_paging: fail\n");
    let config = TranslatorConfig::from_yaml_file(file.path()).unwrap();
    assert_eq!(config.dialect, DialectKind::Sqlite);
    assert_eq!(config.contains_parameter_limit, 5);
    assert_eq!(config.unordered_paging, UnorderedPagingPolicy::Fail);
    assert!(config.cache_enabled);
}

#[test]
fn test_translator_config_rejects_zero_parameter_limit() {
    let file = temp_file("contains_parameter_limit: 0\n");
    let err = TranslatorConfig::from_yaml_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn test_query_tree_survives_a_json_file() {
    let query = Queryable::set("Customer")
        .filter(lambda("c", var("c").member("City").eq(lit("London"))))
        .order_by(lambda("c", var("c").member("CompanyName")))
        .take(3);
    let file = temp_file(&serde_json::to_string_pretty(query.expr()).unwrap());

    let text = std::fs::read_to_string(file.path()).unwrap();
    let loaded: QueryExpr = serde_json::from_str(&text).unwrap();
    assert_eq!(&loaded, query.expr());

    let model = ModelConfig::from_yaml_str(NORTHWIND_YAML)
        .unwrap()
        .to_model()
        .unwrap();
    let config = TranslatorConfig::default();
    let from_file = translate_to_command(&loaded, &model, &QueryParameters::new(), &config).unwrap();
    let direct = translate_to_command(query.expr(), &model, &QueryParameters::new(), &config).unwrap();
    assert_eq!(from_file.text, direct.text);
    assert!(from_file.text.ends_with("ORDER BY [c].[CompanyName]"));
}
