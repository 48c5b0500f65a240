//! Integration tests - model and configuration files on disk, query trees
//! read back from JSON, and execution through a connection.

mod execution_tests;
mod file_loading_tests;
