//! LINQ-style query input: the immutable expression tree, the operator chain
//! and a fluent builder to compose both.

mod display;
pub mod expr;
pub mod queryable;
pub mod value;

pub use expr::{
    client_call, lambda, lambda2, lit, new_object, null, param, var, BinaryOp, Expr, Lambda, Method,
    UnaryOp,
};
pub use queryable::{
    AggregateFunction, ElementKind, JoinKind, QueryExpr, Queryable, SetOperationKind,
};
pub use value::{ClrType, TypeMapping, Value};
