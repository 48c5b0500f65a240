use test_case::test_case;

use super::*;
use crate::model::test_support::northwind;
use crate::query::{lambda, lambda2, lit, new_object, param, var, Queryable};
use crate::query_planner::{translate, QueryParameters, TranslationOptions};
use crate::render_plan::logical_plan_to_render_plan;

fn sql_with(
    query: Queryable,
    parameters: QueryParameters,
    dialect: DialectKind,
    policy: UnorderedPagingPolicy,
) -> Result<Command, SqlGeneratorError> {
    let model = northwind();
    let options = TranslationOptions {
        document_store: dialect == DialectKind::Cosmos,
        ..TranslationOptions::default()
    };
    let plan = translate(query.expr(), &model, &parameters, options).expect("query should translate");
    let render = logical_plan_to_render_plan(&plan).expect("plan should lower");
    generate(&render, dialect, policy)
}

fn sql(query: Queryable, dialect: DialectKind) -> String {
    sql_with(query, QueryParameters::new(), dialect, UnorderedPagingPolicy::SyntacticOrder)
        .expect("command should generate")
        .text
}

fn london_cities() -> Queryable {
    Queryable::set("Customer")
        .filter(lambda("c", var("c").member("City").eq(lit("London"))))
        .select(lambda("c", var("c").member("City")))
}

#[test]
fn test_entity_filter_selects_all_mapped_columns() {
    let text = sql(
        Queryable::set("Customer").filter(lambda("c", var("c").member("City").eq(lit("London")))),
        DialectKind::SqlServer,
    );
    assert_eq!(
        text,
        "SELECT [c].[CustomerID], [c].[Address], [c].[City], [c].[CompanyName], [c].[ContactName], \
         [c].[ContactTitle], [c].[Country], [c].[Fax], [c].[Phone], [c].[PostalCode], [c].[Region]\n\
         FROM [Customers] AS [c]\n\
         WHERE [c].[City] = N'London'"
    );
}

#[test_case(DialectKind::SqlServer, "SELECT [c].[City]\nFROM [Customers] AS [c]\nWHERE [c].[City] = N'London'"; "sql server")]
#[test_case(DialectKind::Sqlite, "SELECT \"c\".\"City\"\nFROM \"Customers\" AS \"c\"\nWHERE \"c\".\"City\" = 'London'"; "sqlite")]
#[test_case(DialectKind::Cosmos, "SELECT c[\"City\"] AS City\nFROM root c\nWHERE c[\"Discriminator\"] = \"Customer\" AND c[\"City\"] = \"London\""; "cosmos")]
fn test_scalar_projection_per_dialect(dialect: DialectKind, expected: &str) {
    assert_eq!(sql(london_cities(), dialect), expected);
}

#[test]
fn test_optional_navigation_left_joins_target() {
    let text = sql(
        Queryable::set("Order").select(lambda("o", var("o").member("Customer").member("City"))),
        DialectKind::SqlServer,
    );
    assert_eq!(
        text,
        "SELECT [c].[City]\n\
         FROM [Orders] AS [o]\n\
         LEFT JOIN [Customers] AS [c] ON [o].[CustomerID] = [c].[CustomerID]"
    );
}

#[test]
fn test_collection_count_is_correlated_subquery() {
    let text = sql(
        Queryable::set("Customer").select(lambda(
            "c",
            new_object(vec![
                ("City", var("c").member("City")),
                ("OrderCount", var("c").member("Orders").count()),
            ]),
        )),
        DialectKind::SqlServer,
    );
    assert_eq!(
        text,
        "SELECT [c].[City], (\n    SELECT COUNT(*)\n    FROM [Orders] AS [o]\n    WHERE [c].[CustomerID] = [o].[CustomerID]\n) AS [OrderCount]\n\
         FROM [Customers] AS [c]"
    );
}

#[test]
fn test_take_then_skip_nests_top_inside_offset() {
    let command = sql_with(
        Queryable::set("Order")
            .order_by(lambda("o", var("o").member("OrderID")))
            .take(5)
            .skip(2),
        QueryParameters::new(),
        DialectKind::SqlServer,
        UnorderedPagingPolicy::Fail,
    )
    .unwrap();
    assert_eq!(
        command.text,
        "SELECT [t].[OrderID], [t].[CustomerID], [t].[EmployeeID], [t].[OrderDate]\n\
         FROM (\n\
         \x20   SELECT TOP(@__p_0) [o].[OrderID], [o].[CustomerID], [o].[EmployeeID], [o].[OrderDate]\n\
         \x20   FROM [Orders] AS [o]\n\
         \x20   ORDER BY [o].[OrderID]\n\
         ) AS [t]\n\
         ORDER BY [t].[OrderID]\n\
         OFFSET @__p_1 ROWS"
    );
    let names: Vec<&str> = command.parameters.iter().map(|p| p.placeholder.as_str()).collect();
    assert_eq!(names, vec!["@__p_0", "@__p_1"]);
    assert!(matches!(command.parameters[0].source, ParameterSource::Constant(_)));
}

#[test]
fn test_self_join_gets_distinct_aliases() {
    let text = sql(
        Queryable::set("Customer").select_many(
            lambda("c", Queryable::set("Customer").into_value()),
            Some(lambda2(
                "c1",
                "c2",
                new_object(vec![
                    ("First", var("c1").member("CustomerID")),
                    ("Second", var("c2").member("CustomerID")),
                ]),
            )),
        ),
        DialectKind::SqlServer,
    );
    assert!(text.contains("FROM [Customers] AS [c]\n"));
    assert!(text.contains("CROSS JOIN [Customers] AS [c0]"));
}

#[test]
fn test_skip_without_ordering_follows_policy() {
    let query = || Queryable::set("Customer").skip(10);
    let text = sql_with(
        query(),
        QueryParameters::new(),
        DialectKind::SqlServer,
        UnorderedPagingPolicy::SyntacticOrder,
    )
    .unwrap()
    .text;
    assert!(text.ends_with("ORDER BY (SELECT 1)\nOFFSET @__p_0 ROWS"));

    let err = sql_with(query(), QueryParameters::new(), DialectKind::SqlServer, UnorderedPagingPolicy::Fail)
        .unwrap_err();
    assert_eq!(err, SqlGeneratorError::UnorderedPaging(DialectKind::SqlServer));

    let text = sql_with(query(), QueryParameters::new(), DialectKind::Sqlite, UnorderedPagingPolicy::Fail)
        .unwrap()
        .text;
    assert!(text.ends_with("LIMIT -1 OFFSET @__p_0"));
}

#[test]
fn test_closure_parameter_is_bound_by_name() {
    let command = sql_with(
        Queryable::set("Customer").filter(lambda("c", var("c").member("City").eq(param("city")))),
        [("city", "London")].into_iter().collect(),
        DialectKind::SqlServer,
        UnorderedPagingPolicy::SyntacticOrder,
    )
    .unwrap();
    assert!(command.text.contains("@__city_0"));
    assert_eq!(command.parameters.len(), 1);
    assert_eq!(
        command.parameters[0].source,
        ParameterSource::Closure("city".to_string())
    );
    assert_eq!(command.columns.len(), 11);
}

#[test]
fn test_first_uses_top_one() {
    let text = sql(
        Queryable::set("Customer")
            .order_by(lambda("c", var("c").member("CustomerID")))
            .first(),
        DialectKind::SqlServer,
    );
    assert!(text.starts_with("SELECT TOP(1) [c].[CustomerID]"));
    assert!(text.ends_with("ORDER BY [c].[CustomerID]"));
}

#[test]
fn test_any_renders_exists_case_without_from() {
    let text = sql(Queryable::set("Customer").any(), DialectKind::SqlServer);
    assert!(text.starts_with("SELECT CASE WHEN EXISTS (\n    SELECT 1\n    FROM [Customers] AS [c]\n)"));
    assert!(text.contains(") THEN CAST(1 AS bit) ELSE CAST(0 AS bit) END"));
    assert!(!text.contains("\nFROM"));
}

#[test]
fn test_union_and_concat_keywords() {
    let london = || Queryable::set("Customer").filter(lambda("c", var("c").member("City").eq(lit("London"))));
    let berlin = || Queryable::set("Customer").filter(lambda("c", var("c").member("City").eq(lit("Berlin"))));
    let union = sql(london().union(berlin()), DialectKind::Sqlite);
    assert!(union.contains("\nUNION\n"));
    let concat = sql(london().concat(berlin()), DialectKind::Sqlite);
    assert!(concat.contains("\nUNION ALL\n"));
    assert!(concat.contains("FROM \"Customers\" AS \"c0\""));
}

#[test]
fn test_raw_sql_root_is_sent_verbatim() {
    let text = sql(
        Queryable::from_sql("Customer", "SELECT * FROM Customers WHERE Country = 'UK'"),
        DialectKind::SqlServer,
    );
    assert_eq!(text, "SELECT * FROM Customers WHERE Country = 'UK'");
}

#[test]
fn test_composed_raw_sql_is_a_derived_table() {
    let text = sql(
        Queryable::from_sql("Customer", "SELECT * FROM Customers")
            .filter(lambda("c", var("c").member("City").eq(lit("London")))),
        DialectKind::SqlServer,
    );
    assert!(text.contains("FROM (\n    SELECT * FROM Customers\n) AS [c]"));
    assert!(text.ends_with("WHERE [c].[City] = N'London'"));
}

#[test]
fn test_cosmos_rejects_joins() {
    let err = sql_with(
        Queryable::set("Order").select(lambda("o", var("o").member("Customer").member("City"))),
        QueryParameters::new(),
        DialectKind::Cosmos,
        UnorderedPagingPolicy::SyntacticOrder,
    )
    .unwrap_err();
    assert!(matches!(err, SqlGeneratorError::UnsupportedConstruct { dialect: DialectKind::Cosmos, .. }));
}

#[test]
fn test_cosmos_root_is_container_filtered_by_entity_type() {
    let text = sql(Queryable::set("Order"), DialectKind::Cosmos);
    assert!(text.starts_with("SELECT c[\"OrderID\"]"), "{}", text);
    assert!(text.ends_with("FROM root c\nWHERE c[\"Discriminator\"] = \"Order\""), "{}", text);

    let relational = sql(Queryable::set("Order"), DialectKind::SqlServer);
    assert!(!relational.contains("Discriminator"));
}

#[test]
fn test_cosmos_hierarchy_uses_declared_discriminator() {
    let text = sql(Queryable::set("Kiwi"), DialectKind::Cosmos);
    assert!(text.ends_with("FROM root c\nWHERE c[\"Discriminator\"] = \"Kiwi\""), "{}", text);
    assert_eq!(text.matches("Discriminator\"] =").count(), 1);
}

#[test]
fn test_string_contains_per_dialect() {
    let query = || {
        Queryable::set("Customer")
            .filter(lambda("c", var("c").member("ContactName").contains(lit("an"))))
            .select(lambda("c", var("c").member("CustomerID")))
    };
    assert!(sql(query(), DialectKind::SqlServer).contains("CHARINDEX(N'an', [c].[ContactName]) > 0"));
    assert!(sql(query(), DialectKind::Sqlite).contains("instr(\"c\".\"ContactName\", 'an') > 0"));
    assert!(sql(query(), DialectKind::Cosmos).contains("CONTAINS(c[\"ContactName\"], \"an\")"));
}

#[test]
fn test_generation_is_deterministic() {
    let query = || {
        Queryable::set("Customer")
            .include(&["Orders"])
            .order_by(lambda("c", var("c").member("City")))
    };
    assert_eq!(sql(query(), DialectKind::SqlServer), sql(query(), DialectKind::SqlServer));
}
