//! Host functions evaluated on materialized values.
//!
//! A projection that calls something the server cannot evaluate (an unmapped
//! entity member such as `Customer.IsLondon`, or an arbitrary client method)
//! is shaped as a call by name. The caller registers the implementations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Materialized;
use crate::query_planner::shape::QueryShape;

pub type ClientFn = Arc<dyn Fn(&[Materialized]) -> Result<Materialized, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ClientFunctions {
    functions: HashMap<String, ClientFn>,
}

impl fmt::Debug for ClientFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("ClientFunctions").field("functions", &names).finish()
    }
}

impl ClientFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&[Materialized]) -> Result<Materialized, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ClientFn> {
        self.functions.get(name)
    }

    /// Functions `shape` calls that are not registered.
    pub fn missing<'a>(&self, shape: &'a QueryShape) -> Vec<&'a str> {
        let mut missing: Vec<&str> = shape
            .client_functions()
            .into_iter()
            .filter(|name| !self.functions.contains_key(*name))
            .collect();
        missing.dedup();
        missing
    }
}
