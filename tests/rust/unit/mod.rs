//! Unit tests - golden SQL and model loading through the public API
//!
//! Everything here runs in-process against the Northwind fixture model.

mod golden_sql_tests;
mod model_tests;
