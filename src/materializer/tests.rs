use super::*;
use crate::model::test_support::northwind;
use crate::query::{lambda, lit, var, ClrType, Queryable, TypeMapping};
use crate::query_planner::shape::{
    ClientShape, CollectionShape, ColumnSlot, DiscriminatorSlot, EntityShape, PropertySlot,
};
use crate::query_planner::{translate, QueryParameters, TranslationOptions};
use crate::render_plan::logical_plan_to_render_plan;

fn slot(ordinal: usize, clr: ClrType, nullable: bool) -> ColumnSlot {
    ColumnSlot {
        ordinal,
        type_mapping: TypeMapping::new(clr, nullable),
    }
}

fn customer_shape(first: usize, nullable: bool) -> EntityShape {
    EntityShape {
        entity: "Customer".to_string(),
        properties: vec![
            PropertySlot {
                name: "CustomerID".to_string(),
                slot: slot(first, ClrType::String, nullable),
            },
            PropertySlot {
                name: "City".to_string(),
                slot: slot(first + 1, ClrType::String, true),
            },
        ],
        key: vec![0],
        nullable,
        keyless: false,
        includes: vec![],
        discriminator: None,
    }
}

fn order_shape(first: usize) -> EntityShape {
    EntityShape {
        entity: "Order".to_string(),
        properties: vec![PropertySlot {
            name: "OrderID".to_string(),
            slot: slot(first, ClrType::Int32, true),
        }],
        key: vec![0],
        nullable: true,
        keyless: false,
        includes: vec![],
        discriminator: None,
    }
}

fn row(cells: &[Value]) -> Row {
    cells.to_vec()
}

fn s(text: &str) -> Value {
    Value::from(text)
}

#[test]
fn test_tracked_entities_share_instances() {
    let shape = QueryShape::Entity(customer_shape(0, false));
    let rows = vec![
        row(&[s("ALFKI"), s("Berlin")]),
        row(&[s("ALFKI"), s("Berlin")]),
        row(&[s("ANATR"), Value::Null]),
    ];

    let mut tracked = Materializer::new(shape.clone(), true, Arc::default());
    let results = tracked.materialize_all(rows.clone()).unwrap();
    assert_eq!(results.len(), 3);
    let (a, b) = (results[0].as_entity().unwrap(), results[1].as_entity().unwrap());
    assert!(Arc::ptr_eq(a, b));
    assert_eq!(tracked.identity_map().unwrap().len(), 2);

    let mut untracked = Materializer::new(shape, false, Arc::default());
    let results = untracked.materialize_all(rows).unwrap();
    let (a, b) = (results[0].as_entity().unwrap(), results[1].as_entity().unwrap());
    assert!(!Arc::ptr_eq(a, b));
    assert_eq!(a, b);
    assert!(untracked.identity_map().is_none());
}

#[test]
fn test_composite_with_absent_optional_entity() {
    let shape = QueryShape::Composite(vec![
        ("OrderID".to_string(), QueryShape::Scalar(slot(0, ClrType::Int32, false))),
        ("Customer".to_string(), QueryShape::Entity(customer_shape(1, true))),
    ]);
    let mut materializer = Materializer::new(shape, true, Arc::default());
    let results = materializer
        .materialize_all(vec![
            row(&[Value::Int(10248), s("VINET"), s("Reims")]),
            row(&[Value::Int(10249), Value::Null, Value::Null]),
        ])
        .unwrap();

    assert_eq!(results[0].member("OrderID"), Some(Materialized::Value(Value::Int(10248))));
    let customer = results[0].member("Customer").unwrap();
    assert_eq!(customer.as_entity().unwrap().get("City"), Some(&s("Reims")));
    assert_eq!(results[1].member("Customer"), Some(Materialized::Null));
}

#[test]
fn test_collection_include_is_assembled_per_parent() {
    let mut customer = customer_shape(0, false);
    customer.includes.push((
        "Orders".to_string(),
        QueryShape::Collection(CollectionShape {
            parent_key: vec![0],
            element_key: vec![2],
            element: Box::new(QueryShape::Entity(order_shape(2))),
            single: false,
        }),
    ));
    let mut materializer = Materializer::new(QueryShape::Entity(customer), true, Arc::default());

    let mut completed = Vec::new();
    for r in [
        row(&[s("ALFKI"), s("Berlin"), Value::Int(10643)]),
        row(&[s("ALFKI"), s("Berlin"), Value::Int(10692)]),
        row(&[s("FISSA"), s("Madrid"), Value::Null]),
    ] {
        completed.extend(materializer.push_row(r).unwrap());
    }
    assert_eq!(completed.len(), 1, "first customer completes when the key changes");
    completed.extend(materializer.finish().unwrap());
    assert_eq!(completed.len(), 2);

    let alfki = completed[0].as_entity().unwrap();
    let orders = alfki.navigation("Orders").unwrap().as_list().unwrap();
    let ids: Vec<&Value> = orders
        .iter()
        .map(|o| o.as_entity().unwrap().get("OrderID").unwrap())
        .collect();
    assert_eq!(ids, vec![&Value::Int(10643), &Value::Int(10692)]);

    let fissa = completed[1].as_entity().unwrap();
    assert_eq!(fissa.navigation("Orders"), Some(&Materialized::List(vec![])));
}

#[test]
fn test_single_collection_takes_first_element() {
    let shape = QueryShape::Composite(vec![
        ("CustomerID".to_string(), QueryShape::Scalar(slot(0, ClrType::String, false))),
        (
            "FirstOrder".to_string(),
            QueryShape::Collection(CollectionShape {
                parent_key: vec![0],
                element_key: vec![1],
                element: Box::new(QueryShape::Scalar(slot(1, ClrType::Int32, true))),
                single: true,
            }),
        ),
    ]);
    let mut materializer = Materializer::new(shape, false, Arc::default());
    let results = materializer
        .materialize_all(vec![
            row(&[s("ALFKI"), Value::Int(1)]),
            row(&[s("ALFKI"), Value::Int(2)]),
            row(&[s("PARIS"), Value::Null]),
        ])
        .unwrap();
    assert_eq!(results[0].member("FirstOrder"), Some(Materialized::Value(Value::Int(1))));
    assert_eq!(results[1].member("FirstOrder"), Some(Materialized::Null));
}

#[test]
fn test_grouping_splits_on_key_change() {
    let shape = QueryShape::Grouping {
        key: Box::new(QueryShape::Scalar(slot(1, ClrType::String, true))),
        element: Box::new(QueryShape::Scalar(slot(0, ClrType::Int32, false))),
    };
    let mut materializer = Materializer::new(shape, false, Arc::default());
    let results = materializer
        .materialize_all(vec![
            row(&[Value::Int(1), s("London")]),
            row(&[Value::Int(2), s("London")]),
            row(&[Value::Int(3), s("Paris")]),
        ])
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].member("Key"), Some(Materialized::Value(s("London"))));
    assert_eq!(results[0].as_list().unwrap().len(), 2);
    assert_eq!(results[1].as_list().unwrap().len(), 1);
}

#[test]
fn test_client_function_is_applied_after_binding() {
    let shape = QueryShape::Client(ClientShape {
        function: "Customer.IsLondon".to_string(),
        args: vec![QueryShape::Entity(customer_shape(0, false))],
        description: "c.IsLondon".to_string(),
    });
    let mut functions = ClientFunctions::new();
    functions.register("Customer.IsLondon", |args| {
        let city = args[0]
            .as_entity()
            .and_then(|c| c.get("City"))
            .and_then(Value::as_str);
        Ok(Materialized::Value(Value::Bool(city == Some("London"))))
    });

    let mut materializer = Materializer::new(shape.clone(), true, Arc::new(functions));
    let results = materializer
        .materialize_all(vec![row(&[s("AROUT"), s("London")])])
        .unwrap();
    assert_eq!(results, vec![Materialized::Value(Value::Bool(true))]);

    let mut bare = Materializer::new(shape, true, Arc::default());
    let err = bare.materialize_all(vec![row(&[s("AROUT"), s("London")])]).unwrap_err();
    assert!(matches!(err, MaterializeError::UnknownClientFunction { ref function, .. } if function == "Customer.IsLondon"));
}

#[test]
fn test_discriminator_picks_concrete_type() {
    let mut shape = customer_shape(0, false);
    shape.entity = "Animal".to_string();
    shape.properties[1].name = "Discriminator".to_string();
    shape.discriminator = Some(DiscriminatorSlot {
        property: 1,
        types: vec![
            ("Kiwi".to_string(), "Kiwi".to_string()),
            ("Eagle".to_string(), "Eagle".to_string()),
        ],
    });
    let mut materializer = Materializer::new(QueryShape::Entity(shape), true, Arc::default());
    let results = materializer
        .materialize_all(vec![row(&[s("1"), s("Kiwi")]), row(&[s("2"), s("Unknown")])])
        .unwrap();
    assert_eq!(results[0].as_entity().unwrap().entity_type, "Kiwi");
    assert_eq!(results[1].as_entity().unwrap().entity_type, "Animal");
}

#[test]
fn test_translated_entity_shape_materializes_positionally() {
    let model = northwind();
    let plan = translate(
        Queryable::set("Customer")
            .filter(lambda("c", var("c").member("City").eq(lit("London"))))
            .expr(),
        &model,
        &QueryParameters::new(),
        TranslationOptions::default(),
    )
    .unwrap();
    let render = logical_plan_to_render_plan(&plan).unwrap();
    let mut cells: Vec<Value> = render.columns.iter().map(|c| Value::String(format!("{}-value", c))).collect();
    cells[0] = s("AROUT");

    let mut materializer = Materializer::new(render.shape.clone(), render.tracking, Arc::default());
    let results = materializer.materialize_all(vec![cells.clone()]).unwrap();
    let entity = results[0].as_entity().unwrap();
    assert_eq!(entity.entity_type, "Customer");
    assert_eq!(entity.get("CustomerID"), Some(&s("AROUT")));
    for (column, cell) in render.columns.iter().zip(&cells).skip(1) {
        assert_eq!(entity.get(column), Some(cell));
    }
}
