use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use thiserror::Error;
use validator::Validate;

use crate::sql_generator::dialect::DialectKind;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// What to do when `Skip`/`Take` is used without an explicit ordering on a
/// dialect whose paging syntax requires `ORDER BY`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnorderedPagingPolicy {
    /// Emit `ORDER BY (SELECT 1)`: valid syntax, no ordering guarantee.
    SyntacticOrder,
    /// Reject the query with a translation failure.
    Fail,
}

impl FromStr for UnorderedPagingPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "syntactic-order" => Ok(UnorderedPagingPolicy::SyntacticOrder),
            "fail" => Ok(UnorderedPagingPolicy::Fail),
            other => Err(UnknownVariant {
                kind: "unordered paging policy",
                value: other.to_string(),
            }),
        }
    }
}

/// Translator configuration with validation
#[derive(Clone, Debug, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Target query language
    pub dialect: DialectKind,

    /// Local-collection `Contains` binds one parameter per element up to this
    /// many elements; longer lists are inlined as escaped literals.
    #[validate(range(
        min = 1,
        max = 2100,
        message = "Contains parameter limit must be between 1 and 2100"
    ))]
    pub contains_parameter_limit: usize,

    pub unordered_paging: UnorderedPagingPolicy,

    /// Identity resolution for entity results unless a query opts out
    pub tracking: bool,

    pub cache_enabled: bool,

    #[validate(range(
        min = 1,
        max = 1_000_000,
        message = "Cache size must be between 1 and 1000000 entries"
    ))]
    pub cache_max_entries: usize,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::SqlServer,
            contains_parameter_limit: 100,
            unordered_paging: UnorderedPagingPolicy::SyntacticOrder,
            tracking: true,
            cache_enabled: true,
            cache_max_entries: 1000,
        }
    }
}

impl TranslatorConfig {
    /// Create configuration from environment variables with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            dialect: parse_env_var("RELQUERY_DIALECT", "sql-server")?,
            contains_parameter_limit: parse_env_var("RELQUERY_CONTAINS_PARAMETER_LIMIT", "100")?,
            unordered_paging: parse_env_var("RELQUERY_UNORDERED_PAGING", "syntactic-order")?,
            tracking: parse_env_var("RELQUERY_TRACKING", "true")?,
            cache_enabled: parse_env_var("RELQUERY_CACHE_ENABLED", "true")?,
            cache_max_entries: parse_env_var("RELQUERY_CACHE_MAX_ENTRIES", "1000")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "yaml_file".to_string(),
            value: "file read failed".to_string(),
            source: Box::new(e),
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            field: "yaml_content".to_string(),
            value: content,
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn with_dialect(mut self, dialect: DialectKind) -> Self {
        self.dialect = dialect;
        self
    }
}

/// Parse an environment variable with a default value
fn parse_env_var<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TranslatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dialect, DialectKind::SqlServer);
        assert_eq!(config.contains_parameter_limit, 100);
        assert!(config.tracking);
    }

    #[test]
    fn test_invalid_contains_limit() {
        let config = TranslatorConfig {
            contains_parameter_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_cache_size() {
        let config = TranslatorConfig {
            cache_max_entries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_config_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dialect: cosmos\nunordered_paging: fail").unwrap();

        let config = TranslatorConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.dialect, DialectKind::Cosmos);
        assert_eq!(config.unordered_paging, UnorderedPagingPolicy::Fail);
        assert_eq!(config.cache_max_entries, 1000);
    }

    #[test]
    fn test_yaml_config_rejects_out_of_range_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "contains_parameter_limit: 5000").unwrap();

        let err = TranslatorConfig::from_yaml_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "fail".parse::<UnorderedPagingPolicy>().unwrap(),
            UnorderedPagingPolicy::Fail
        );
        assert!("sometimes".parse::<UnorderedPagingPolicy>().is_err());
    }
}
