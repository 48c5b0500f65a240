use relquery::config::TranslatorConfig;
use relquery::model::{Cardinality, ModelConfig, ModelError};
use relquery::query::{ClrType, Queryable};
use relquery::query_planner::QueryParameters;
use relquery::translate_to_command;

const NORTHWIND_YAML: &str = include_str!("../../fixtures/northwind.yaml");

#[test]
fn test_northwind_fixture_resolves() {
    let model = ModelConfig::from_yaml_str(NORTHWIND_YAML)
        .unwrap()
        .to_model()
        .unwrap();

    let customer = model.entity("Customer").unwrap();
    assert_eq!(customer.table, "Customers");
    assert_eq!(customer.properties.len(), 11);
    assert_eq!(customer.alias_hint(), "c");

    let orders = model.navigation("Customer", "Orders").unwrap();
    assert_eq!(orders.cardinality, Cardinality::Many);
    assert_eq!(orders.target, "Order");

    let detail = model.entity("OrderDetail").unwrap();
    assert_eq!(detail.table, "Order Details");
    assert_eq!(detail.key, vec!["OrderID".to_string(), "ProductID".to_string()]);
    assert_eq!(detail.property("Quantity").unwrap().clr_type, ClrType::Int16);
}

#[test]
fn test_projection_order_puts_keys_first() {
    let model = ModelConfig::from_yaml_str(NORTHWIND_YAML)
        .unwrap()
        .to_model()
        .unwrap();
    let order = model.entity("Order").unwrap();
    let names: Vec<&str> = order.projection_order().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["OrderID", "CustomerID", "EmployeeID", "OrderDate"]);
}

#[test]
fn test_defining_query_alias_comes_from_entity_name() {
    let model = ModelConfig::from_yaml_str(NORTHWIND_YAML)
        .unwrap()
        .to_model()
        .unwrap();
    let entity = model.entity("OrderQuery").unwrap();
    assert!(entity.defining_query.is_some());
    assert_eq!(entity.alias_hint(), "o");
}

#[test]
fn test_owned_type_has_no_key() {
    let model = ModelConfig::from_yaml_str(NORTHWIND_YAML)
        .unwrap()
        .to_model()
        .unwrap();
    let address = model.navigation("Supplier", "Address").unwrap();
    assert!(address.owned);
    let owned = model.entity(&address.target).unwrap();
    assert!(owned.owned);
    assert!(owned.is_keyless());
}

#[test]
fn test_unknown_entity_lookup() {
    let model = ModelConfig::from_yaml_str(NORTHWIND_YAML)
        .unwrap()
        .to_model()
        .unwrap();
    assert_eq!(
        model.entity("Shipper").unwrap_err(),
        ModelError::UnknownEntity {
            entity: "Shipper".to_string()
        }
    );
}

#[test]
fn test_navigation_key_arity_must_match() {
    let yaml = r#"
entities:
  - name: Customer
    key: [Id]
    properties:
      - { name: Id, type: int32 }
  - name: Order
    key: [Id]
    properties:
      - { name: Id, type: int32 }
      - { name: CustomerId, type: int32 }
    navigations:
      - { name: Customer, target: Customer, source_key: [CustomerId, Id], target_key: [Id] }
"#;
    let err = ModelConfig::from_yaml_str(yaml).unwrap().to_model().unwrap_err();
    assert_eq!(
        err,
        ModelError::KeyArityMismatch {
            entity: "Order".to_string(),
            navigation: "Customer".to_string(),
            source_len: 2,
            target_len: 1,
        }
    );
}

#[test]
fn test_store_names_reject_quoting_characters() {
    let yaml = r#"
entities:
  - name: Customer
    table: "Customers]; DROP TABLE x; --"
    key: [Id]
    properties:
      - { name: Id, type: int32 }
"#;
    let err = ModelConfig::from_yaml_str(yaml).unwrap().to_model().unwrap_err();
    assert!(matches!(err, ModelError::InvalidIdentifier { .. }));
}

#[test]
fn test_key_must_name_a_property() {
    let yaml = r#"
entities:
  - name: Customer
    key: [CustomerID]
    properties:
      - { name: Id, type: int32 }
"#;
    let err = ModelConfig::from_yaml_str(yaml).unwrap().to_model().unwrap_err();
    assert!(matches!(err, ModelError::UnknownProperty { .. }));
}

#[test]
fn test_query_filter_loads_from_yaml_and_applies() {
    let yaml = r#"
entities:
  - name: Product
    table: Products
    key: [ProductID]
    query_filter:
      params: [p]
      body:
        binary:
          op: greater_than
          left: { member: { target: { variable: p }, member: UnitsInStock } }
          right: { constant: { type: int, value: 0 } }
    properties:
      - { name: ProductID, type: int32 }
      - { name: UnitsInStock, type: int32 }
"#;
    let model = ModelConfig::from_yaml_str(yaml).unwrap().to_model().unwrap();
    let filter = model.entity("Product").unwrap().query_filter.clone().unwrap();
    assert_eq!(filter.params, vec!["p".to_string()]);

    let command = translate_to_command(
        Queryable::set("Product").expr(),
        &model,
        &QueryParameters::new(),
        &TranslatorConfig::default(),
    )
    .unwrap();
    assert!(command.text.ends_with("FROM [Products] AS [p]\nWHERE [p].[UnitsInStock] > 0"), "{}", command.text);
}

#[test]
fn test_northwind_supplier_filter_is_loaded() {
    let model = ModelConfig::from_yaml_str(NORTHWIND_YAML)
        .unwrap()
        .to_model()
        .unwrap();
    assert!(model.entity("Supplier").unwrap().query_filter.is_some());
}
