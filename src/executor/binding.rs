//! Parameter values for one execution of a compiled command.

use thiserror::Error;

use crate::materializer::row_binder::convert;
use crate::query::{TypeMapping, Value};
use crate::query_planner::logical_plan::ParameterSource;
use crate::query_planner::QueryParameters;
use crate::sql_generator::Command;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParameterError {
    #[error("No value supplied for parameter `{0}`")]
    Missing(String),

    #[error("Parameter `{0}` must be a list")]
    NotAList(String),

    #[error("Parameter `{name}` has {len} elements, element {index} was bound")]
    ListIndexOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },

    #[error("Parameter `{name}` value '{value}' is not a {expected}")]
    TypeMismatch {
        name: String,
        value: String,
        expected: String,
    },
}

/// A value ready to hand to the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub name: String,
    /// Name as written in the command text.
    pub placeholder: String,
    pub value: Value,
    pub type_mapping: TypeMapping,
}

pub fn bind_parameters(
    command: &Command,
    params: &QueryParameters,
) -> Result<Vec<BoundParameter>, ParameterError> {
    command
        .parameters
        .iter()
        .map(|p| {
            let raw = match &p.source {
                ParameterSource::Constant(value) => value.clone(),
                ParameterSource::Closure(name) => params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ParameterError::Missing(name.clone()))?,
                ParameterSource::ListElement { name, index } => {
                    let list = params
                        .get(name)
                        .ok_or_else(|| ParameterError::Missing(name.clone()))?;
                    let Value::List(items) = list else {
                        return Err(ParameterError::NotAList(name.clone()));
                    };
                    items
                        .get(*index)
                        .cloned()
                        .ok_or(ParameterError::ListIndexOutOfRange {
                            name: name.clone(),
                            index: *index,
                            len: items.len(),
                        })?
                }
            };
            Ok(BoundParameter {
                name: p.name.clone(),
                placeholder: p.placeholder.clone(),
                value: typed(&p.name, raw, p.type_mapping)?,
                type_mapping: p.type_mapping,
            })
        })
        .collect()
}

/// Converts a supplied value to the parameter's declared type.
fn typed(name: &str, value: Value, type_mapping: TypeMapping) -> Result<Value, ParameterError> {
    if value.is_null() {
        return Ok(value);
    }
    convert(&value, type_mapping.clr).ok_or_else(|| ParameterError::TypeMismatch {
        name: name.to_string(),
        value: value.to_string(),
        expected: type_mapping.clr.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ClrType;
    use crate::sql_generator::CommandParameter;

    fn command(parameters: Vec<(&str, ParameterSource, ClrType)>) -> Command {
        Command {
            text: String::new(),
            parameters: parameters
                .into_iter()
                .map(|(name, source, clr)| CommandParameter {
                    name: name.to_string(),
                    placeholder: format!("@{}", name),
                    source,
                    type_mapping: TypeMapping::new(clr, true),
                })
                .collect(),
            columns: vec![],
        }
    }

    #[test]
    fn test_binds_each_source_kind() {
        let command = command(vec![
            ("__city_0", ParameterSource::Closure("city".to_string()), ClrType::String),
            (
                "__ids_1",
                ParameterSource::ListElement {
                    name: "ids".to_string(),
                    index: 1,
                },
                ClrType::Int32,
            ),
            ("__p_2", ParameterSource::Constant(Value::Int(5)), ClrType::Int32),
        ]);
        let mut params = QueryParameters::new();
        params.insert("city", "London").insert("ids", vec![1, 2, 3]);

        let bound = bind_parameters(&command, &params).unwrap();
        let values: Vec<&Value> = bound.iter().map(|b| &b.value).collect();
        assert_eq!(values, vec![&Value::from("London"), &Value::Int(2), &Value::Int(5)]);
        assert_eq!(bound[0].placeholder, "@__city_0");
    }

    #[test]
    fn test_missing_and_ill_typed_values_fail() {
        let command = command(vec![(
            "__id_0",
            ParameterSource::Closure("id".to_string()),
            ClrType::Int32,
        )]);
        assert_eq!(
            bind_parameters(&command, &QueryParameters::new()).unwrap_err(),
            ParameterError::Missing("id".to_string())
        );
        let params: QueryParameters = [("id", "ten")].into_iter().collect();
        assert!(matches!(
            bind_parameters(&command, &params),
            Err(ParameterError::TypeMismatch { .. })
        ));
        let params: QueryParameters = [("id", 7i64)].into_iter().collect();
        assert_eq!(bind_parameters(&command, &params).unwrap()[0].value, Value::Int(7));
    }

    #[test]
    fn test_list_element_out_of_range() {
        let command = command(vec![(
            "__ids_0",
            ParameterSource::ListElement {
                name: "ids".to_string(),
                index: 4,
            },
            ClrType::Int32,
        )]);
        let params: QueryParameters = [("ids", vec![1, 2])].into_iter().collect();
        assert_eq!(
            bind_parameters(&command, &params).unwrap_err(),
            ParameterError::ListIndexOutOfRange {
                name: "ids".to_string(),
                index: 4,
                len: 2
            }
        );
    }
}
