//! Query planning context.
//!
//! [`PlanCtx`] holds the per-translation state of the normalizer:
//! - row sources and whether they sit on the optional side of a join
//! - navigation joins already introduced, for reuse
//! - the stack of query scopes and the joins each still has to apply
//! - parameters lifted out of the query, in binding order
//!
//! # Scopes
//!
//! Every nested query (subquery, collection navigation) opens a scope. A
//! navigation expanded from a source is joined into the scope that owns the
//! source, which may be an enclosing one:
//! ```text
//! customers.Select(c => c.Orders.Count(o => o.Employee.City == c.City))
//! └─ scope0: Customers ──────────────────────────────────────────────┘
//!                       └─ scope1: Orders + join Employees ────┘
//! ```

pub mod errors;
mod source_ctx;

pub use source_ctx::SourceCtx;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::query::{TypeMapping, Value};
use crate::query_planner::{
    logical_expr::{LogicalExpr, ParameterRef, SourceId},
    logical_plan::{JoinType, LogicalPlan, ParameterSource, ParameterSpec},
    plan_ctx::errors::PlanCtxError,
};

/// A navigation join waiting to be attached to the plan of its scope.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingJoin {
    pub target: SourceId,
    pub right: Arc<LogicalPlan>,
    pub join_type: JoinType,
    pub condition: LogicalExpr,
}

#[derive(Debug, Clone, Default)]
struct QueryScope {
    id: usize,
    pending: Vec<PendingJoin>,
}

#[derive(Debug, Clone)]
pub struct PlanCtx {
    sources: HashMap<SourceId, SourceCtx>,
    next_source: u32,
    /// (source, navigation) -> joined target source
    nav_joins: HashMap<(SourceId, String), SourceId>,
    scopes: Vec<QueryScope>,
    next_scope: usize,
    parameters: Vec<ParameterSpec>,
    /// closure variable -> parameter name, so repeated use binds once
    closure_names: HashMap<String, String>,
    parameter_counter: usize,
    tracking: bool,
    ignore_query_filters: bool,
}

impl PlanCtx {
    pub fn new(tracking: bool) -> Self {
        PlanCtx {
            sources: HashMap::new(),
            next_source: 0,
            nav_joins: HashMap::new(),
            scopes: vec![QueryScope::default()],
            next_scope: 1,
            parameters: Vec::new(),
            closure_names: HashMap::new(),
            parameter_counter: 0,
            tracking,
            ignore_query_filters: false,
        }
    }

    pub fn add_source(&mut self, entity: &str, nullable: bool, nav_target: bool) -> SourceId {
        let id = SourceId(self.next_source);
        self.next_source += 1;
        let scope = self.scopes.last().map(|s| s.id).unwrap_or(0);
        log::trace!("PlanCtx: source {} for {} in scope {}", id, entity, scope);
        self.sources.insert(
            id,
            SourceCtx {
                entity: entity.to_string(),
                nullable,
                nav_target,
                scope,
            },
        );
        id
    }

    pub fn source(&self, id: SourceId) -> Result<&SourceCtx, PlanCtxError> {
        self.sources.get(&id).ok_or(PlanCtxError::Source { id })
    }

    pub fn is_nullable(&self, id: SourceId) -> bool {
        self.sources.get(&id).map(|s| s.nullable).unwrap_or(false)
    }

    pub fn is_nav_target(&self, id: SourceId) -> bool {
        self.sources.get(&id).map(|s| s.nav_target).unwrap_or(false)
    }

    pub fn mark_nullable(&mut self, id: SourceId) {
        if let Some(source) = self.sources.get_mut(&id) {
            source.nullable = true;
        }
    }

    pub fn nav_join(&self, source: SourceId, navigation: &str) -> Option<SourceId> {
        self.nav_joins
            .get(&(source, navigation.to_string()))
            .copied()
    }

    pub fn register_nav_join(&mut self, source: SourceId, navigation: &str, target: SourceId) {
        self.nav_joins
            .insert((source, navigation.to_string()), target);
    }

    pub fn push_scope(&mut self) {
        let id = self.next_scope;
        self.next_scope += 1;
        self.scopes.push(QueryScope {
            id,
            pending: Vec::new(),
        });
    }

    /// Closes the innermost scope, returning joins nobody applied.
    pub fn pop_scope(&mut self) -> Result<Vec<PendingJoin>, PlanCtxError> {
        if self.scopes.len() <= 1 {
            return Err(PlanCtxError::Scope);
        }
        self.scopes
            .pop()
            .map(|s| s.pending)
            .ok_or(PlanCtxError::Scope)
    }

    /// Queues a join in the scope that owns `owner`. Sources of a closed
    /// scope were merged into the enclosing query (join operands), so their
    /// joins go to the innermost open scope.
    pub fn add_pending_join(&mut self, owner: SourceId, join: PendingJoin) -> Result<(), PlanCtxError> {
        let owner_scope = self.source(owner)?.scope;
        let scope_id = if self.scopes.iter().any(|s| s.id == owner_scope) {
            owner_scope
        } else {
            self.scopes.last().map(|s| s.id).ok_or(PlanCtxError::Scope)?
        };
        if let Some(target) = self.sources.get_mut(&join.target) {
            target.scope = scope_id;
        }
        let scope = self
            .scopes
            .iter_mut()
            .rev()
            .find(|s| s.id == scope_id)
            .ok_or(PlanCtxError::Scope)?;
        scope.pending.push(join);
        Ok(())
    }

    /// Joins queued in the innermost scope, oldest first.
    pub fn take_pending_joins(&mut self) -> Vec<PendingJoin> {
        self.scopes
            .last_mut()
            .map(|s| std::mem::take(&mut s.pending))
            .unwrap_or_default()
    }

    /// Position in the innermost scope's queue, for [`Self::take_pending_joins_from`].
    pub fn pending_mark(&self) -> usize {
        self.scopes.last().map(|s| s.pending.len()).unwrap_or(0)
    }

    /// Joins queued in the innermost scope since `mark`.
    pub fn take_pending_joins_from(&mut self, mark: usize) -> Vec<PendingJoin> {
        match self.scopes.last_mut() {
            Some(scope) if mark < scope.pending.len() => scope.pending.split_off(mark),
            _ => Vec::new(),
        }
    }

    /// Parameter for a closed-over variable. Repeated references share one
    /// parameter.
    pub fn closure_parameter(&mut self, name: &str, type_mapping: TypeMapping) -> ParameterRef {
        if let Some(existing) = self.closure_names.get(name) {
            return ParameterRef {
                name: existing.clone(),
                type_mapping,
            };
        }
        let param_name = self.next_parameter_name(name);
        self.closure_names
            .insert(name.to_string(), param_name.clone());
        self.parameters.push(ParameterSpec {
            name: param_name.clone(),
            source: ParameterSource::Closure(name.to_string()),
            type_mapping,
        });
        ParameterRef {
            name: param_name,
            type_mapping,
        }
    }

    /// Parameter for one element of a closed-over list.
    pub fn list_element_parameter(
        &mut self,
        name: &str,
        index: usize,
        type_mapping: TypeMapping,
    ) -> ParameterRef {
        let param_name = self.next_parameter_name(name);
        self.parameters.push(ParameterSpec {
            name: param_name.clone(),
            source: ParameterSource::ListElement {
                name: name.to_string(),
                index,
            },
            type_mapping,
        });
        ParameterRef {
            name: param_name,
            type_mapping,
        }
    }

    /// Parameter for a constant lifted out of the query (paging counts).
    pub fn constant_parameter(&mut self, value: Value, type_mapping: TypeMapping) -> ParameterRef {
        let param_name = self.next_parameter_name("p");
        self.parameters.push(ParameterSpec {
            name: param_name.clone(),
            source: ParameterSource::Constant(value),
            type_mapping,
        });
        ParameterRef {
            name: param_name,
            type_mapping,
        }
    }

    fn next_parameter_name(&mut self, base: &str) -> String {
        let name = format!("__{}_{}", base, self.parameter_counter);
        self.parameter_counter += 1;
        name
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn into_parameters(self) -> Vec<ParameterSpec> {
        self.parameters
    }

    pub fn tracking(&self) -> bool {
        self.tracking
    }

    pub fn set_tracking(&mut self, tracking: bool) {
        self.tracking = tracking;
    }

    pub fn ignore_query_filters(&self) -> bool {
        self.ignore_query_filters
    }

    pub fn set_ignore_query_filters(&mut self, ignore: bool) {
        self.ignore_query_filters = ignore;
    }
}

impl fmt::Display for PlanCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PlanCtx:")?;
        let mut ids: Vec<&SourceId> = self.sources.keys().collect();
        ids.sort();
        for id in ids {
            if let Some(source) = self.sources.get(id) {
                writeln!(f, "  {}: {}", id, source)?;
            }
        }
        for p in &self.parameters {
            writeln!(f, "  @{} <- {:?}", p.name, p.source)?;
        }
        Ok(())
    }
}
