//! Operator table keyed by operator name

use crate::error::{GraphError, GraphResult};
use crate::ops::dispatch::OpDef;
use crate::ops::{activation, assert, pairwise, shape};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::Arc;

static BUILTIN: Lazy<Arc<OpRegistry>> = Lazy::new(|| {
    Arc::new(OpRegistry::builtin().unwrap_or_else(|e| {
        log::error!("Builtin operator table failed to register: {}", e);
        OpRegistry::new()
    }))
});

/// Name -> operator table.
///
/// Filled at process start with [`OpRegistry::register`], then shared behind
/// an `Arc` and never mutated again.
#[derive(Debug, Default)]
pub struct OpRegistry {
    ops: BTreeMap<String, Arc<OpDef>>,
}

impl OpRegistry {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding every builtin operator
    pub fn builtin() -> GraphResult<Self> {
        let mut registry = Self::new();
        activation::register(&mut registry)?;
        pairwise::register(&mut registry)?;
        shape::register(&mut registry)?;
        assert::register(&mut registry)?;
        Ok(registry)
    }

    /// Process-wide builtin table
    pub fn shared_builtin() -> Arc<OpRegistry> {
        BUILTIN.clone()
    }

    /// Add an operator; each name may be registered once
    pub fn register(&mut self, op: OpDef) -> GraphResult<()> {
        let name = op.name().to_string();
        if self.ops.contains_key(&name) {
            return Err(GraphError::config(format!(
                "operator '{}' is already registered",
                name
            )));
        }
        self.ops.insert(name, Arc::new(op));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<OpDef>> {
        self.ops.get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> GraphResult<Arc<OpDef>> {
        self.get(name)
            .ok_or_else(|| GraphError::UnknownOperator(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.ops.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
