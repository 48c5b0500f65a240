use std::sync::Mutex;

use futures_util::StreamExt;

use super::*;
use crate::model::test_support::northwind;
use crate::query::{lambda, param, var, Queryable, Value};

type ExecutedLog = Arc<Mutex<Vec<(String, Vec<BoundParameter>)>>>;

struct FakeConnection {
    rows: Vec<Row>,
    fail_after: Option<usize>,
    executed: ExecutedLog,
}

struct FakeReader {
    rows: std::vec::IntoIter<Row>,
    fail_after: Option<usize>,
    served: usize,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn execute(
        &self,
        command: &Command,
        parameters: &[BoundParameter],
    ) -> Result<Box<dyn RowReader>, ConnectionError> {
        self.executed
            .lock()
            .unwrap()
            .push((command.text.clone(), parameters.to_vec()));
        Ok(Box::new(FakeReader {
            rows: self.rows.clone().into_iter(),
            fail_after: self.fail_after,
            served: 0,
        }))
    }
}

#[async_trait]
impl RowReader for FakeReader {
    async fn next_row(&mut self) -> Result<Option<Row>, ConnectionError> {
        if self.fail_after == Some(self.served) {
            return Err(ConnectionError::Provider("connection reset".to_string()));
        }
        self.served += 1;
        tokio::task::yield_now().await;
        Ok(self.rows.next())
    }
}

fn fake_executor(rows: Vec<Row>) -> (QueryExecutor<FakeConnection>, ExecutedLog) {
    let executed = ExecutedLog::default();
    let connection = FakeConnection {
        rows,
        fail_after: None,
        executed: executed.clone(),
    };
    let executor = QueryExecutor::new(connection, Arc::new(northwind()), TranslatorConfig::default());
    (executor, executed)
}

fn customer_row(id: &str, city: &str) -> Row {
    let mut row = vec![Value::Null; 11];
    row[0] = Value::from(id);
    row[2] = Value::from(city);
    row[3] = Value::from(format!("{} Ltd", id));
    row
}

fn by_city() -> Queryable {
    Queryable::set("Customer").filter(lambda("c", var("c").member("City").eq(param("city"))))
}

#[tokio::test]
async fn test_compile_reuses_cached_translation() {
    let (executor, _) = fake_executor(vec![]);
    let london: QueryParameters = [("city", "London")].into_iter().collect();
    let paris: QueryParameters = [("city", "Paris")].into_iter().collect();

    let first = executor.compile(by_city().expr(), &london).unwrap();
    let second = executor.compile(by_city().expr(), &paris).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    let metrics = executor.cache().metrics();
    assert_eq!((metrics.hits, metrics.misses, metrics.size), (1, 1, 1));
}

#[tokio::test]
async fn test_to_list_binds_parameters_and_materializes_entities() {
    let (executor, executed) = fake_executor(vec![
        customer_row("AROUT", "London"),
        customer_row("BSBEV", "London"),
    ]);
    let params: QueryParameters = [("city", "London")].into_iter().collect();

    let results = executor.to_list(by_city().expr(), &params).await.unwrap();
    assert_eq!(results.len(), 2);
    let first = results[0].as_entity().unwrap();
    assert_eq!(first.get("CustomerID"), Some(&Value::from("AROUT")));
    assert_eq!(first.get("CompanyName"), Some(&Value::from("AROUT Ltd")));

    let log = executed.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].0.contains("WHERE [c].[City] = @__city_0"));
    assert_eq!(log[0].1[0].value, Value::from("London"));
}

#[tokio::test]
async fn test_element_operators_check_cardinality() {
    let query = || Queryable::set("Customer").order_by(lambda("c", var("c").member("CustomerID")));

    let (empty, _) = fake_executor(vec![]);
    let err = empty
        .execute(query().first().expr(), &QueryParameters::new(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Cardinality(_)));
    let none = empty
        .execute(query().first_or_default().expr(), &QueryParameters::new(), CancellationToken::new())
        .await
        .unwrap();
    assert!(none.is_null());

    let (two, _) = fake_executor(vec![customer_row("ALFKI", "Berlin"), customer_row("ANATR", "México D.F.")]);
    let err = two
        .execute(query().single().expr(), &QueryParameters::new(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("more than one element"));
}

#[tokio::test]
async fn test_scalar_terminal_returns_value() {
    let (executor, executed) = fake_executor(vec![vec![Value::Int(91)]]);
    let count = executor
        .execute(Queryable::set("Customer").count().expr(), &QueryParameters::new(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(count, Materialized::Value(Value::Int(91)));
    assert!(executed.lock().unwrap()[0].0.starts_with("SELECT COUNT(*)"));
}

#[tokio::test]
async fn test_cancellation_between_rows() {
    let (executor, _) = fake_executor(vec![
        customer_row("ALFKI", "Berlin"),
        customer_row("ANATR", "México D.F."),
        customer_row("ANTON", "México D.F."),
    ]);
    let cancel = CancellationToken::new();
    let mut stream = executor
        .stream(Queryable::set("Customer").expr(), &QueryParameters::new(), cancel.clone())
        .await
        .unwrap();

    assert!(stream.next().await.unwrap().is_ok());
    cancel.cancel();
    assert_eq!(stream.next().await.unwrap().unwrap_err(), QueryError::CancellationRequested);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_connection_failure_surfaces_after_good_rows() {
    let executed = ExecutedLog::default();
    let connection = FakeConnection {
        rows: vec![customer_row("ALFKI", "Berlin"), customer_row("ANATR", "México D.F.")],
        fail_after: Some(1),
        executed,
    };
    let executor = QueryExecutor::new(connection, Arc::new(northwind()), TranslatorConfig::default());
    let results: Vec<Result<Materialized, QueryError>> = executor
        .stream(Queryable::set("Customer").expr(), &QueryParameters::new(), CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(QueryError::ExecutionFailed(_))));
}

#[tokio::test]
async fn test_untranslatable_predicate_fails_before_execution() {
    let (executor, executed) = fake_executor(vec![]);
    let err = executor
        .to_list(
            Queryable::set("Customer")
                .filter(lambda("c", var("c").member("IsLondon")))
                .expr(),
            &QueryParameters::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::TranslationFailed { ref expression, .. } if expression.contains("IsLondon")));
    assert!(executed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_no_tracking_yields_distinct_instances() {
    let rows = vec![customer_row("ALFKI", "Berlin"), customer_row("ALFKI", "Berlin")];
    let (executor, _) = fake_executor(rows);
    let tracked = executor
        .to_list(Queryable::set("Customer").expr(), &QueryParameters::new())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(
        tracked[0].as_entity().unwrap(),
        tracked[1].as_entity().unwrap()
    ));

    let untracked = executor
        .to_list(Queryable::set("Customer").as_no_tracking().expr(), &QueryParameters::new())
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(
        untracked[0].as_entity().unwrap(),
        untracked[1].as_entity().unwrap()
    ));
}

#[tokio::test]
async fn test_missing_client_function_is_reported_before_execution() {
    let (executor, executed) = fake_executor(vec![]);
    let query = Queryable::set("Customer").select(lambda("c", var("c").member("IsLondon")));
    let err = executor.to_list(query.expr(), &QueryParameters::new()).await.unwrap_err();
    assert!(matches!(err, QueryError::Materialization(MaterializeError::UnknownClientFunction { .. })));
    assert!(executed.lock().unwrap().is_empty());

    let mut functions = ClientFunctions::new();
    functions.register("Customer.IsLondon", |args| {
        let city = args[0].as_entity().and_then(|c| c.get("City")).and_then(Value::as_str);
        Ok(Materialized::Value(Value::Bool(city == Some("London"))))
    });
    let (executor, _) = fake_executor(vec![customer_row("AROUT", "London")]);
    let executor = executor.with_client_functions(functions);
    let results = executor.to_list(query.expr(), &QueryParameters::new()).await.unwrap();
    assert_eq!(results, vec![Materialized::Value(Value::Bool(true))]);
}
