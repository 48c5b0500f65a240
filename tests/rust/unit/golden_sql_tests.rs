//! Golden SQL for the canonical Northwind queries.

use relquery::config::{TranslatorConfig, UnorderedPagingPolicy};
use relquery::model::{Model, ModelConfig};
use relquery::query::{lambda, lambda2, lit, new_object, param, var, ClrType, Queryable, Value};
use relquery::query_planner::QueryParameters;
use relquery::sql_generator::{Command, DialectKind};
use relquery::{translate_to_command, QueryError};
use test_case::test_case;

const NORTHWIND_YAML: &str = include_str!("../../fixtures/northwind.yaml");

fn northwind() -> Model {
    ModelConfig::from_yaml_str(NORTHWIND_YAML)
        .and_then(|c| c.to_model())
        .expect("northwind fixture should load")
}

fn command(query: Queryable, params: QueryParameters, config: &TranslatorConfig) -> Result<Command, QueryError> {
    translate_to_command(query.expr(), &northwind(), &params, config)
}

fn sql(query: Queryable) -> String {
    sql_for(query, DialectKind::SqlServer)
}

fn sql_for(query: Queryable, dialect: DialectKind) -> String {
    command(query, QueryParameters::new(), &TranslatorConfig::default().with_dialect(dialect))
        .expect("query should translate")
        .text
}

#[test]
fn test_where_on_property_selects_all_columns_without_join() {
    let text = sql(Queryable::set("Customer").filter(lambda("c", var("c").member("City").eq(lit("London")))));
    assert!(text.starts_with("SELECT [c].[CustomerID], [c].[Address], [c].[City], [c].[CompanyName]"));
    assert!(text.ends_with("FROM [Customers] AS [c]\nWHERE [c].[City] = N'London'"));
    assert!(!text.contains("JOIN"));
}

#[test]
fn test_optional_navigation_member_left_joins() {
    let text = sql(Queryable::set("Order").select(lambda("o", var("o").member("Customer").member("City"))));
    assert_eq!(
        text,
        "SELECT [c].[City]\nFROM [Orders] AS [o]\nLEFT JOIN [Customers] AS [c] ON [o].[CustomerID] = [c].[CustomerID]"
    );
}

#[test]
fn test_collection_count_in_projection() {
    let text = sql(Queryable::set("Customer").select(lambda(
        "c",
        new_object(vec![
            ("City", var("c").member("City")),
            ("OrderCount", var("c").member("Orders").count()),
        ]),
    )));
    assert!(text.contains("SELECT COUNT(*)\n    FROM [Orders] AS [o]\n    WHERE [c].[CustomerID] = [o].[CustomerID]"));
    assert!(text.ends_with(") AS [OrderCount]\nFROM [Customers] AS [c]"));
    assert_eq!(text.matches("[Orders]").count(), 1);
}

#[test]
fn test_unmapped_member_in_where_fails_translation() {
    let err = command(
        Queryable::set("Customer").filter(lambda("c", var("c").member("IsLondon"))),
        QueryParameters::new(),
        &TranslatorConfig::default(),
    )
    .unwrap_err();
    match err {
        QueryError::TranslationFailed { expression, .. } => assert!(expression.contains("IsLondon")),
        other => panic!("expected a translation failure, got {:?}", other),
    }
}

#[test]
fn test_take_then_skip_pages_inside_derived_table() {
    let text = sql(
        Queryable::set("Order")
            .order_by(lambda("o", var("o").member("OrderID")))
            .take(5)
            .skip(2),
    );
    assert!(text.contains("    SELECT TOP(@__p_0) [o].[OrderID]"));
    assert!(text.contains("    ORDER BY [o].[OrderID]\n) AS [t]"));
    assert!(text.ends_with("ORDER BY [t].[OrderID]\nOFFSET @__p_1 ROWS"));
}

#[test]
fn test_self_cross_join_uses_distinct_aliases() {
    let text = sql(Queryable::set("Customer").select_many(
        lambda("c", Queryable::set("Customer").into_value()),
        Some(lambda2(
            "c1",
            "c2",
            new_object(vec![
                ("A", var("c1").member("CustomerID")),
                ("B", var("c2").member("CustomerID")),
            ]),
        )),
    ));
    assert_eq!(
        text,
        "SELECT [c].[CustomerID] AS [A], [c0].[CustomerID] AS [B]\nFROM [Customers] AS [c]\nCROSS JOIN [Customers] AS [c0]"
    );
}

#[test_case(DialectKind::SqlServer, "SELECT TOP(@__p_0) [c].[CustomerID]"; "sql server top")]
#[test_case(DialectKind::Sqlite, "LIMIT @__p_0"; "sqlite limit")]
#[test_case(DialectKind::Cosmos, "OFFSET 0 LIMIT @__p_0"; "cosmos offset limit")]
fn test_take_per_dialect(dialect: DialectKind, expected: &str) {
    let text = sql_for(Queryable::set("Customer").take(10), dialect);
    assert!(text.contains(expected), "{}", text);
}

#[test]
fn test_starts_with_literal_is_like() {
    let text = sql(
        Queryable::set("Customer")
            .filter(lambda("c", var("c").member("ContactName").starts_with(lit("Ma"))))
            .select(lambda("c", var("c").member("CustomerID"))),
    );
    assert!(text.ends_with("WHERE [c].[ContactName] LIKE N'Ma%'"), "{}", text);
}

#[test]
fn test_average_of_integral_column_casts_to_float() {
    let text = sql(Queryable::set("Order").average(lambda("o", var("o").member("OrderID"))));
    assert!(text.starts_with("SELECT AVG(CAST([o].[OrderID] AS float))"), "{}", text);
}

#[test]
fn test_long_count_uses_count_big() {
    let text = sql(Queryable::set("Order").long_count());
    assert!(text.starts_with("SELECT COUNT_BIG(*)"));
}

#[test]
fn test_discriminator_filters() {
    let kiwi = sql(Queryable::set("Kiwi"));
    assert!(kiwi.ends_with("WHERE [a].[Discriminator] = N'Kiwi'"), "{}", kiwi);

    let bird = sql(Queryable::set("Bird"));
    assert!(bird.contains("[a].[Discriminator] IN ("));
    assert!(bird.contains("N'Bird'") && bird.contains("N'Kiwi'"));
    assert!(!bird.contains("N'Animal'"));
}

#[test]
fn test_query_filter_and_ignore_query_filters() {
    let filtered = sql(Queryable::set("Supplier"));
    assert!(filtered.contains("WHERE [s].[CompanyName] <> N'Deleted'"), "{}", filtered);
    let unfiltered = sql(Queryable::set("Supplier").ignore_query_filters());
    assert!(!unfiltered.contains("WHERE"));
}

#[test]
fn test_owned_type_columns() {
    let query = || Queryable::set("Supplier")
        .ignore_query_filters()
        .select(lambda("s", var("s").member("Address").member("City")));
    assert!(sql(query()).starts_with("SELECT [s].[Address_City]"));
    assert!(sql_for(query(), DialectKind::Cosmos).starts_with("SELECT c[\"Address\"][\"City\"]"));
}

#[test]
fn test_defining_query_is_a_derived_table() {
    let text = sql(Queryable::set("OrderQuery"));
    assert!(text.contains("FROM (\n    select * from \"Orders\"\n) AS [o]"), "{}", text);
}

#[test]
fn test_include_collection_orders_by_parent_and_child_keys() {
    let text = sql(Queryable::set("Customer").include(&["Orders"]));
    assert!(text.contains("LEFT JOIN [Orders] AS [o] ON [c].[CustomerID] = [o].[CustomerID]"), "{}", text);
    assert!(text.ends_with("ORDER BY [c].[CustomerID], [o].[OrderID]"), "{}", text);
}

#[test]
fn test_contains_over_list_respects_parameter_limit() {
    let query = || {
        Queryable::set("Customer")
            .filter(lambda("c", param("ids").contains(var("c").member("CustomerID"))))
            .select(lambda("c", var("c").member("CustomerID")))
    };
    let params = || -> QueryParameters {
        [("ids", Value::from(vec!["ALFKI", "ANATR", "AROUT"]))].into_iter().collect()
    };

    let parameterized = command(query(), params(), &TranslatorConfig::default()).unwrap();
    assert_eq!(parameterized.parameters.len(), 3);
    assert!(!parameterized.text.contains("N'ALFKI'"));

    let config = TranslatorConfig {
        contains_parameter_limit: 2,
        ..TranslatorConfig::default()
    };
    let inlined = command(query(), params(), &config).unwrap();
    assert!(inlined.parameters.is_empty());
    assert!(inlined
        .text
        .ends_with("WHERE [c].[CustomerID] IN (N'ALFKI', N'ANATR', N'AROUT')"));
}

#[test]
fn test_inlined_literals_are_escaped() {
    let text = sql(
        Queryable::set("Customer")
            .filter(lambda("c", var("c").member("CompanyName").eq(lit("O'Reilly'; DROP TABLE x --"))))
            .select(lambda("c", var("c").member("CustomerID"))),
    );
    assert!(text.ends_with("WHERE [c].[CompanyName] = N'O''Reilly''; DROP TABLE x --'"));
}

#[test]
fn test_unordered_skip_fails_under_fail_policy() {
    let config = TranslatorConfig {
        unordered_paging: UnorderedPagingPolicy::Fail,
        ..TranslatorConfig::default()
    };
    let err = command(Queryable::set("Customer").skip(5), QueryParameters::new(), &config).unwrap_err();
    assert!(matches!(err, QueryError::TranslationFailed { .. }));
}

#[test]
fn test_last_without_ordering_fails() {
    let err = command(Queryable::set("Customer").last(), QueryParameters::new(), &TranslatorConfig::default())
        .unwrap_err();
    assert!(err.is_translation_error());
}

#[test]
fn test_convert_to_double_in_projection() {
    let text = sql(Queryable::set("Order").select(lambda("o", var("o").member("OrderID").convert(ClrType::Double))));
    assert!(text.starts_with("SELECT CAST([o].[OrderID] AS float)"), "{}", text);
}

#[test]
fn test_translation_is_deterministic() {
    let query = || {
        Queryable::set("Order")
            .filter(lambda("o", var("o").member("Customer").member("Country").eq(lit("UK"))))
            .order_by(lambda("o", var("o").member("OrderDate")))
    };
    assert_eq!(sql(query()), sql(query()));
}

#[test]
fn test_cosmos_queries_filter_the_shared_container_by_type() {
    let text = sql_for(
        Queryable::set("Order").filter(lambda("o", var("o").member("OrderID").eq(lit(10248)))),
        DialectKind::Cosmos,
    );
    assert!(
        text.ends_with("FROM root c\nWHERE c[\"Discriminator\"] = \"Order\" AND c[\"OrderID\"] = 10248"),
        "{}",
        text
    );
}
