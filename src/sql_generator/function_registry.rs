/// Scalar function names per dialect
///
/// Maps each translated string/math function to the dialect's spelling, with
/// an optional argument transformation or a complete template for forms that
/// are not plain calls.
use std::collections::HashMap;

use super::dialect::DialectKind;
use super::errors::SqlGeneratorError;
use crate::query_planner::logical_expr::SqlFunction;

/// Function mapping entry
#[derive(Clone)]
pub struct FunctionMapping {
    /// Name used for a plain `NAME(args)` call
    pub sql_name: &'static str,
    /// Takes rendered args, returns the args actually passed
    pub arg_transform: Option<fn(&[String]) -> Vec<String>>,
    /// Takes rendered args, returns the whole expression
    pub template: Option<fn(&[String]) -> String>,
    pub arity: usize,
}

impl FunctionMapping {
    fn call(sql_name: &'static str, arity: usize) -> Self {
        FunctionMapping {
            sql_name,
            arg_transform: None,
            template: None,
            arity,
        }
    }

    fn template(arity: usize, template: fn(&[String]) -> String) -> Self {
        FunctionMapping {
            sql_name: "",
            arg_transform: None,
            template: Some(template),
            arity,
        }
    }
}

/// Get function mapping for a dialect
pub fn get_function_mapping(dialect: DialectKind, function: SqlFunction) -> Option<FunctionMapping> {
    FUNCTION_MAPPINGS.get(&(dialect, function)).cloned()
}

/// Renders `function` over already rendered arguments.
pub fn render_function(
    dialect: DialectKind,
    function: SqlFunction,
    args: &[String],
) -> Result<String, SqlGeneratorError> {
    let mapping = get_function_mapping(dialect, function)
        .ok_or_else(|| SqlGeneratorError::unsupported(dialect, format!("{:?}", function)))?;
    if args.len() != mapping.arity {
        return Err(SqlGeneratorError::unsupported(
            dialect,
            format!("{:?} with {} arguments", function, args.len()),
        ));
    }
    if let Some(template) = mapping.template {
        return Ok(template(args));
    }
    let args = match mapping.arg_transform {
        Some(transform) => transform(args),
        None => args.to_vec(),
    };
    Ok(format!("{}({})", mapping.sql_name, args.join(", ")))
}

// Static function mapping table
lazy_static::lazy_static! {
    static ref FUNCTION_MAPPINGS: HashMap<(DialectKind, SqlFunction), FunctionMapping> = {
        let mut m = HashMap::new();

        // ===== SQL SERVER =====

        m.insert((DialectKind::SqlServer, SqlFunction::Upper), FunctionMapping::call("UPPER", 1));
        m.insert((DialectKind::SqlServer, SqlFunction::Lower), FunctionMapping::call("LOWER", 1));
        // No TRIM before SQL Server 2017
        m.insert(
            (DialectKind::SqlServer, SqlFunction::Trim),
            FunctionMapping::template(1, |args| format!("LTRIM(RTRIM({}))", args[0])),
        );
        // LEN returns bigint for nvarchar(max)
        m.insert(
            (DialectKind::SqlServer, SqlFunction::Length),
            FunctionMapping::template(1, |args| format!("CAST(LEN({}) AS int)", args[0])),
        );
        m.insert((DialectKind::SqlServer, SqlFunction::Substring), FunctionMapping::call("SUBSTRING", 3));
        m.insert((DialectKind::SqlServer, SqlFunction::Replace), FunctionMapping::call("REPLACE", 3));
        m.insert((DialectKind::SqlServer, SqlFunction::Abs), FunctionMapping::call("ABS", 1));
        m.insert((DialectKind::SqlServer, SqlFunction::Coalesce), FunctionMapping::call("COALESCE", 2));
        m.insert((DialectKind::SqlServer, SqlFunction::Left), FunctionMapping::call("LEFT", 2));
        m.insert((DialectKind::SqlServer, SqlFunction::Right), FunctionMapping::call("RIGHT", 2));
        // CHARINDEX takes the pattern first
        m.insert(
            (DialectKind::SqlServer, SqlFunction::StringContains),
            FunctionMapping::template(2, |args| format!("CHARINDEX({}, {}) > 0", args[1], args[0])),
        );

        // ===== SQLITE =====

        m.insert((DialectKind::Sqlite, SqlFunction::Upper), FunctionMapping::call("upper", 1));
        m.insert((DialectKind::Sqlite, SqlFunction::Lower), FunctionMapping::call("lower", 1));
        m.insert((DialectKind::Sqlite, SqlFunction::Trim), FunctionMapping::call("trim", 1));
        m.insert((DialectKind::Sqlite, SqlFunction::Length), FunctionMapping::call("length", 1));
        m.insert((DialectKind::Sqlite, SqlFunction::Substring), FunctionMapping::call("substr", 3));
        m.insert((DialectKind::Sqlite, SqlFunction::Replace), FunctionMapping::call("replace", 3));
        m.insert((DialectKind::Sqlite, SqlFunction::Abs), FunctionMapping::call("abs", 1));
        m.insert((DialectKind::Sqlite, SqlFunction::Coalesce), FunctionMapping::call("COALESCE", 2));
        // LEFT(s, n) -> substr(s, 1, n)
        m.insert(
            (DialectKind::Sqlite, SqlFunction::Left),
            FunctionMapping {
                sql_name: "substr",
                arg_transform: Some(|args| vec![args[0].clone(), "1".to_string(), args[1].clone()]),
                template: None,
                arity: 2,
            },
        );
        // RIGHT(s, n) -> substr(s, -n)
        m.insert(
            (DialectKind::Sqlite, SqlFunction::Right),
            FunctionMapping {
                sql_name: "substr",
                arg_transform: Some(|args| vec![args[0].clone(), format!("-({})", args[1])]),
                template: None,
                arity: 2,
            },
        );
        m.insert(
            (DialectKind::Sqlite, SqlFunction::StringContains),
            FunctionMapping::template(2, |args| format!("instr({}, {}) > 0", args[0], args[1])),
        );

        // ===== COSMOS =====

        m.insert((DialectKind::Cosmos, SqlFunction::Upper), FunctionMapping::call("UPPER", 1));
        m.insert((DialectKind::Cosmos, SqlFunction::Lower), FunctionMapping::call("LOWER", 1));
        m.insert((DialectKind::Cosmos, SqlFunction::Trim), FunctionMapping::call("TRIM", 1));
        m.insert((DialectKind::Cosmos, SqlFunction::Length), FunctionMapping::call("LENGTH", 1));
        // Zero-based start
        m.insert(
            (DialectKind::Cosmos, SqlFunction::Substring),
            FunctionMapping {
                sql_name: "SUBSTRING",
                arg_transform: Some(|args| {
                    vec![args[0].clone(), format!("({}) - 1", args[1]), args[2].clone()]
                }),
                template: None,
                arity: 3,
            },
        );
        m.insert((DialectKind::Cosmos, SqlFunction::Replace), FunctionMapping::call("REPLACE", 3));
        m.insert((DialectKind::Cosmos, SqlFunction::Abs), FunctionMapping::call("ABS", 1));
        m.insert(
            (DialectKind::Cosmos, SqlFunction::Coalesce),
            FunctionMapping::template(2, |args| format!("({} ?? {})", args[0], args[1])),
        );
        m.insert((DialectKind::Cosmos, SqlFunction::Left), FunctionMapping::call("LEFT", 2));
        m.insert((DialectKind::Cosmos, SqlFunction::Right), FunctionMapping::call("RIGHT", 2));
        m.insert((DialectKind::Cosmos, SqlFunction::StringContains), FunctionMapping::call("CONTAINS", 2));

        m
    };
}
