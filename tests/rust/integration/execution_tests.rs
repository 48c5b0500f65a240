use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use relquery::config::TranslatorConfig;
use relquery::executor::{
    BoundParameter, CancellationToken, Connection, ConnectionError, QueryExecutor, RowReader,
};
use relquery::materializer::{Materialized, Row};
use relquery::model::{Model, ModelConfig};
use relquery::query::{lambda, param, var, Queryable, Value};
use relquery::query_planner::QueryParameters;
use relquery::sql_generator::Command;
use relquery::QueryError;

const NORTHWIND_YAML: &str = include_str!("../../fixtures/northwind.yaml");

fn northwind() -> Arc<Model> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(
        ModelConfig::from_yaml_str(NORTHWIND_YAML)
            .unwrap()
            .to_model()
            .unwrap(),
    )
}

/// Serves a fixed result set and records every command it receives.
#[derive(Default)]
struct ScriptedConnection {
    rows: Vec<Row>,
    commands: Arc<Mutex<Vec<String>>>,
}

struct ScriptedReader {
    rows: std::vec::IntoIter<Row>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn execute(
        &self,
        command: &Command,
        _parameters: &[BoundParameter],
    ) -> Result<Box<dyn RowReader>, ConnectionError> {
        self.commands.lock().unwrap().push(command.text.clone());
        Ok(Box::new(ScriptedReader {
            rows: self.rows.clone().into_iter(),
        }))
    }
}

#[async_trait]
impl RowReader for ScriptedReader {
    async fn next_row(&mut self) -> Result<Option<Row>, ConnectionError> {
        Ok(self.rows.next())
    }
}

fn customer_with_order(id: &str, order: Option<i32>) -> Row {
    let mut row = vec![Value::Null; 15];
    row[0] = Value::from(id);
    row[3] = Value::from(format!("{} Ltd", id));
    if let Some(order) = order {
        row[11] = Value::Int(order);
        row[12] = Value::from(id);
    }
    row
}

#[tokio::test]
async fn test_include_assembles_collections_across_rows() {
    let connection = ScriptedConnection {
        rows: vec![
            customer_with_order("ALFKI", Some(10643)),
            customer_with_order("ALFKI", Some(10692)),
            customer_with_order("FISSA", None),
        ],
        ..ScriptedConnection::default()
    };
    let executor = QueryExecutor::new(connection, northwind(), TranslatorConfig::default());

    let query = Queryable::set("Customer").include(&["Orders"]);
    let results = executor
        .to_list(query.expr(), &QueryParameters::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    let alfki = results[0].as_entity().unwrap();
    assert_eq!(alfki.get("CustomerID"), Some(&Value::from("ALFKI")));
    assert_eq!(alfki.navigation("Orders").unwrap().as_list().unwrap().len(), 2);
    let fissa = results[1].as_entity().unwrap();
    assert_eq!(fissa.navigation("Orders").unwrap().as_list().unwrap().len(), 0);
}

#[tokio::test]
async fn test_streaming_stops_when_cancelled() {
    let connection = ScriptedConnection {
        rows: vec![
            customer_with_order("ALFKI", None)[..11].to_vec(),
            customer_with_order("ANATR", None)[..11].to_vec(),
        ],
        ..ScriptedConnection::default()
    };
    let executor = QueryExecutor::new(connection, northwind(), TranslatorConfig::default());
    let cancel = CancellationToken::new();

    let mut stream = executor
        .stream(Queryable::set("Customer").expr(), &QueryParameters::new(), cancel.clone())
        .await
        .unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    cancel.cancel();
    assert!(matches!(
        stream.next().await,
        Some(Err(QueryError::CancellationRequested))
    ));
}

#[tokio::test]
async fn test_repeated_queries_hit_the_cache() {
    let commands = Arc::new(Mutex::new(Vec::new()));
    let connection = ScriptedConnection {
        rows: vec![],
        commands: commands.clone(),
    };
    let executor = QueryExecutor::new(connection, northwind(), TranslatorConfig::default());
    let query = Queryable::set("Customer")
        .filter(lambda("c", var("c").member("City").eq(param("city"))));

    for city in ["London", "Berlin", "Madrid"] {
        let params: QueryParameters = [("city", city)].into_iter().collect();
        let result = executor
            .execute(query.expr(), &params, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, Materialized::List(vec![]));
    }

    let metrics = executor.cache().metrics();
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.hits, 2);
    let commands = commands.lock().unwrap();
    assert_eq!(commands.len(), 3);
    assert!(commands.iter().all(|c| c == &commands[0]));
}

#[tokio::test]
async fn test_missing_parameter_fails_before_execution() {
    let commands = Arc::new(Mutex::new(Vec::new()));
    let connection = ScriptedConnection {
        rows: vec![],
        commands: commands.clone(),
    };
    let executor = QueryExecutor::new(connection, northwind(), TranslatorConfig::default());
    let query = Queryable::set("Customer")
        .filter(lambda("c", var("c").member("City").eq(param("city"))));

    let err = executor
        .to_list(query.expr(), &QueryParameters::new())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Parameter(_)));
    assert!(commands.lock().unwrap().is_empty());
}
