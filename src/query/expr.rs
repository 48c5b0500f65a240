use serde::{Deserialize, Serialize};

use super::queryable::{AggregateFunction, QueryExpr};
use super::value::{ClrType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    Coalesce,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Negate,
}

/// Methods the translator recognizes. Anything else is `Client` and can only
/// run after materialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    StartsWith,
    EndsWith,
    /// String containment, or membership when the target is a list.
    Contains,
    ToUpper,
    ToLower,
    Trim,
    Substring,
    Replace,
    Abs,
    Client(String),
}

impl Method {
    pub fn name(&self) -> &str {
        match self {
            Method::StartsWith => "StartsWith",
            Method::EndsWith => "EndsWith",
            Method::Contains => "Contains",
            Method::ToUpper => "ToUpper",
            Method::ToLower => "ToLower",
            Method::Trim => "Trim",
            Method::Substring => "Substring",
            Method::Replace => "Replace",
            Method::Abs => "Math.Abs",
            Method::Client(name) => name,
        }
    }
}

/// Node of a LINQ expression tree. Trees are immutable; passes build new trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Constant(Value),
    /// Closed-over variable, bound at execution time.
    Parameter(String),
    /// Reference to a lambda parameter.
    Variable(String),
    Member {
        target: Box<Expr>,
        member: String,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Convert {
        operand: Box<Expr>,
        to: ClrType,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Call {
        method: Method,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    /// Anonymous type / member-init construction.
    New(Vec<(String, Expr)>),
    /// A nested query used as a value (subquery, collection operator).
    Query(Box<QueryExpr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Expr,
}

pub fn lambda(param: &str, body: Expr) -> Lambda {
    Lambda {
        params: vec![param.to_string()],
        body,
    }
}

pub fn lambda2(first: &str, second: &str, body: Expr) -> Lambda {
    Lambda {
        params: vec![first.to_string(), second.to_string()],
        body,
    }
}

pub fn var(name: &str) -> Expr {
    Expr::Variable(name.to_string())
}

pub fn param(name: &str) -> Expr {
    Expr::Parameter(name.to_string())
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

pub fn null() -> Expr {
    Expr::Constant(Value::Null)
}

pub fn new_object(members: Vec<(&str, Expr)>) -> Expr {
    Expr::New(
        members
            .into_iter()
            .map(|(name, expr)| (name.to_string(), expr))
            .collect(),
    )
}

pub fn client_call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call {
        method: Method::Client(name.to_string()),
        target: None,
        args,
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Constant(v)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Constant(Value::from(s))
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Constant(Value::Int(v))
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Expr::Constant(Value::Bool(v))
    }
}

impl Expr {
    pub fn member(self, member: &str) -> Expr {
        Expr::Member {
            target: Box::new(self),
            member: member.to_string(),
        }
    }

    pub fn binary(self, op: BinaryOp, right: impl Into<Expr>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right.into()),
        }
    }

    pub fn eq(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Equal, right)
    }

    pub fn ne(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::NotEqual, right)
    }

    pub fn lt(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::LessThan, right)
    }

    pub fn le(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::LessThanOrEqual, right)
    }

    pub fn gt(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::GreaterThan, right)
    }

    pub fn ge(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::GreaterThanOrEqual, right)
    }

    pub fn and(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::AndAlso, right)
    }

    pub fn or(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::OrElse, right)
    }

    pub fn add(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Add, right)
    }

    pub fn sub(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Subtract, right)
    }

    pub fn mul(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Multiply, right)
    }

    pub fn div(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Divide, right)
    }

    pub fn coalesce(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Coalesce, right)
    }

    pub fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    pub fn negate(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(self),
        }
    }

    pub fn convert(self, to: ClrType) -> Expr {
        Expr::Convert {
            operand: Box::new(self),
            to,
        }
    }

    pub fn conditional(test: Expr, if_true: impl Into<Expr>, if_false: impl Into<Expr>) -> Expr {
        Expr::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true.into()),
            if_false: Box::new(if_false.into()),
        }
    }

    pub fn call(self, method: Method, args: Vec<Expr>) -> Expr {
        Expr::Call {
            method,
            target: Some(Box::new(self)),
            args,
        }
    }

    pub fn starts_with(self, prefix: impl Into<Expr>) -> Expr {
        self.call(Method::StartsWith, vec![prefix.into()])
    }

    pub fn ends_with(self, suffix: impl Into<Expr>) -> Expr {
        self.call(Method::EndsWith, vec![suffix.into()])
    }

    pub fn contains(self, item: impl Into<Expr>) -> Expr {
        self.call(Method::Contains, vec![item.into()])
    }

    pub fn to_upper(self) -> Expr {
        self.call(Method::ToUpper, vec![])
    }

    pub fn to_lower(self) -> Expr {
        self.call(Method::ToLower, vec![])
    }

    /// Treats this expression as a collection and starts a nested query over it.
    pub fn as_query(self) -> QueryExpr {
        QueryExpr::Collection(Box::new(self))
    }

    pub fn count(self) -> Expr {
        Expr::Query(Box::new(QueryExpr::Aggregate {
            source: Box::new(self.as_query()),
            function: AggregateFunction::Count,
            selector: None,
        }))
    }

    pub fn any(self) -> Expr {
        Expr::Query(Box::new(QueryExpr::Any {
            source: Box::new(self.as_query()),
            predicate: None,
        }))
    }

    pub fn any_where(self, predicate: Lambda) -> Expr {
        Expr::Query(Box::new(QueryExpr::Any {
            source: Box::new(self.as_query()),
            predicate: Some(predicate),
        }))
    }

    pub fn sum(self, selector: Lambda) -> Expr {
        Expr::Query(Box::new(QueryExpr::Aggregate {
            source: Box::new(self.as_query()),
            function: AggregateFunction::Sum,
            selector: Some(selector),
        }))
    }
}
