use super::*;
use crate::model::test_support::northwind;
use crate::query::{client_call, lambda, lit, new_object, param, var, Queryable};
use crate::query_planner::logical_plan::{JoinType, ParameterSource, ScanSource};

fn normalize(query: Queryable) -> Result<QueryPlan, QueryPlannerError> {
    normalize_with(query, &QueryParameters::new())
}

fn normalize_with(query: Queryable, params: &QueryParameters) -> Result<QueryPlan, QueryPlannerError> {
    let model = northwind();
    Normalizer::new(&model, params, 100, true).normalize(query.expr())
}

/// Every node of the plan, pre-order.
fn nodes(plan: &LogicalPlan) -> Vec<&LogicalPlan> {
    let mut out = vec![plan];
    for input in plan.inputs() {
        out.extend(nodes(input));
    }
    out
}

fn joins(plan: &LogicalPlan) -> Vec<JoinType> {
    nodes(plan)
        .into_iter()
        .filter_map(|n| match n {
            LogicalPlan::Join(j) => Some(j.join_type),
            _ => None,
        })
        .collect()
}

fn filters(plan: &LogicalPlan) -> Vec<&LogicalExpr> {
    nodes(plan)
        .into_iter()
        .filter_map(|n| match n {
            LogicalPlan::Filter(f) => Some(&f.predicate),
            _ => None,
        })
        .collect()
}

#[test]
fn test_filter_on_property_adds_no_join() {
    let query = Queryable::set("Customer")
        .filter(lambda("c", var("c").member("City").eq(lit("London"))));
    let plan = normalize(query).unwrap();
    assert!(joins(&plan.root).is_empty());
    assert_eq!(filters(&plan.root).len(), 1);
    assert_eq!(plan.cardinality, ResultCardinality::Sequence);
}

#[test]
fn test_optional_reference_navigation_becomes_left_join() {
    let query = Queryable::set("Order").select(lambda("o", var("o").member("Customer").member("City")));
    let plan = normalize(query).unwrap();
    assert_eq!(joins(&plan.root), vec![JoinType::Left]);
    match plan.root.shape() {
        ProjectionShape::Scalar(expr) => assert!(expr.is_nullable()),
        other => panic!("expected scalar projection, got {:?}", other),
    }
}

#[test]
fn test_required_reference_navigation_becomes_inner_join() {
    let query = Queryable::set("OrderDetail")
        .select(lambda("od", var("od").member("Product").member("ProductName")));
    let plan = normalize(query).unwrap();
    assert_eq!(joins(&plan.root), vec![JoinType::Inner]);
}

#[test]
fn test_repeated_navigation_reuses_one_join() {
    let query = Queryable::set("Order").select(lambda(
        "o",
        new_object(vec![
            ("City", var("o").member("Customer").member("City")),
            ("Country", var("o").member("Customer").member("Country")),
        ]),
    ));
    let plan = normalize(query).unwrap();
    assert_eq!(joins(&plan.root).len(), 1);
}

#[test]
fn test_collection_count_becomes_scalar_subquery() {
    let query = Queryable::set("Customer").select(lambda(
        "c",
        new_object(vec![
            ("City", var("c").member("City")),
            ("OrderCount", var("c").member("Orders").count()),
        ]),
    ));
    let plan = normalize(query).unwrap();
    assert!(joins(&plan.root).is_empty());
    let members = match plan.root.shape() {
        ProjectionShape::Composite(members) => members,
        other => panic!("expected composite, got {:?}", other),
    };
    match &members[1].1 {
        ProjectionShape::Scalar(LogicalExpr::ScalarSubquery { type_mapping, .. }) => {
            assert_eq!(type_mapping.clr, ClrType::Int32)
        }
        other => panic!("expected scalar subquery, got {:?}", other),
    }
}

#[test]
fn test_include_collection_adds_collection_join() {
    let query = Queryable::set("Customer").include(&["Orders"]);
    let plan = normalize(query).unwrap();
    assert!(nodes(&plan.root)
        .iter()
        .any(|n| matches!(n, LogicalPlan::CollectionJoin(_))));
    match plan.root.shape() {
        ProjectionShape::Entity(entity) => {
            assert!(matches!(entity.include("Orders"), Some(ProjectionShape::Collection(_))))
        }
        other => panic!("expected entity, got {:?}", other),
    }
}

#[test]
fn test_query_filter_applies_unless_ignored() {
    let plan = normalize(Queryable::set("Supplier")).unwrap();
    assert_eq!(filters(&plan.root).len(), 1);

    let plan = normalize(Queryable::set("Supplier").ignore_query_filters()).unwrap();
    assert!(filters(&plan.root).is_empty());
}

#[test]
fn test_discriminator_filter_for_hierarchy_and_leaf() {
    let plan = normalize(Queryable::set("Bird")).unwrap();
    match filters(&plan.root).as_slice() {
        [LogicalExpr::InList { values, .. }] => assert_eq!(values.len(), 2),
        other => panic!("expected IN filter, got {:?}", other),
    }

    let plan = normalize(Queryable::set("Kiwi")).unwrap();
    match filters(&plan.root).as_slice() {
        [LogicalExpr::Binary { op: SqlOperator::Equal, .. }] => {}
        other => panic!("expected equality filter, got {:?}", other),
    }

    let plan = normalize(Queryable::set("Animal")).unwrap();
    match filters(&plan.root).as_slice() {
        [LogicalExpr::InList { values, .. }] => assert_eq!(values.len(), 3),
        other => panic!("expected IN filter, got {:?}", other),
    }
}

#[test]
fn test_defining_query_scans_sql_source() {
    let plan = normalize(Queryable::set("OrderQuery")).unwrap();
    let scan = nodes(&plan.root).into_iter().find_map(|n| match n {
        LogicalPlan::Scan(s) => Some(s.table.clone()),
        _ => None,
    });
    match scan {
        Some(ScanSource::Sql { verbatim, .. }) => assert!(!verbatim),
        other => panic!("expected SQL scan, got {:?}", other),
    }
}

#[test]
fn test_last_requires_ordering() {
    let err = normalize(Queryable::set("Customer").last()).unwrap_err();
    assert!(matches!(err, QueryPlannerError::TranslationFailed { .. }));
}

#[test]
fn test_last_reverses_ordering() {
    let query = Queryable::set("Customer")
        .order_by(lambda("c", var("c").member("CustomerID")))
        .last();
    let plan = normalize(query).unwrap();
    assert_eq!(plan.cardinality, ResultCardinality::Element(ElementKind::Last));
    let descending = nodes(&plan.root).into_iter().find_map(|n| match n {
        LogicalPlan::OrderBy(o) => Some(o.items[0].descending),
        _ => None,
    });
    assert_eq!(descending, Some(true));
}

#[test]
fn test_single_limits_to_two_rows() {
    let plan = normalize(Queryable::set("Customer").single()).unwrap();
    match plan.root.as_ref() {
        LogicalPlan::Limit(limit) => {
            assert_eq!(limit.count, LogicalExpr::literal(Value::Int(2)))
        }
        other => panic!("expected limit, got {}", other),
    }
}

#[test]
fn test_list_contains_binds_parameter_per_element() {
    let params: QueryParameters = [("ids", Value::from(vec!["ALFKI", "ANATR"]))].into_iter().collect();
    let query = Queryable::set("Customer")
        .filter(lambda("c", param("ids").contains(var("c").member("CustomerID"))));
    let plan = normalize_with(query, &params).unwrap();
    match filters(&plan.root).as_slice() {
        [LogicalExpr::InList { values, .. }] => {
            assert!(values.iter().all(|v| matches!(v, LogicalExpr::Parameter(_))));
            assert_eq!(values.len(), 2);
        }
        other => panic!("expected IN filter, got {:?}", other),
    }
    assert!(plan
        .parameters
        .iter()
        .all(|p| matches!(p.source, ParameterSource::ListElement { .. })));
}

#[test]
fn test_empty_list_contains_is_false() {
    let params: QueryParameters = [("ids", Value::List(vec![]))].into_iter().collect();
    let query = Queryable::set("Customer")
        .filter(lambda("c", param("ids").contains(var("c").member("CustomerID"))));
    let plan = normalize_with(query, &params).unwrap();
    assert_eq!(filters(&plan.root), vec![&LogicalExpr::bool_literal(false)]);
}

#[test]
fn test_missing_parameter_fails() {
    let query = Queryable::set("Customer").filter(lambda("c", var("c").member("City").eq(param("city"))));
    let err = normalize(query).unwrap_err();
    assert_eq!(err, QueryPlannerError::MissingParameter("city".to_string()));
}

#[test]
fn test_client_method_is_marked_not_rejected() {
    let query = Queryable::set("Customer")
        .filter(lambda("c", client_call("IsLondon", vec![var("c").member("City")])));
    let plan = normalize(query).unwrap();
    assert!(plan.root.find_client_only().is_some());
}

#[test]
fn test_select_many_over_local_list_fails() {
    let params: QueryParameters = [("ids", Value::from(vec![1, 2]))].into_iter().collect();
    let query = Queryable::set("Customer").select_many(lambda("c", param("ids")), None);
    let err = normalize_with(query, &params).unwrap_err();
    assert!(matches!(err, QueryPlannerError::TranslationFailed { .. }));
}

#[test]
fn test_as_no_tracking_clears_tracking() {
    let plan = normalize(Queryable::set("Customer").as_no_tracking()).unwrap();
    assert!(!plan.tracking);
}
