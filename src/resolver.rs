//! Resolver engine: propagates property changes to a fixed point.
//!
//! A resolver declares the properties it reacts to (`inputs`) and the ones
//! it may write (`outputs`). When properties become dirty the engine runs, in
//! breadth-first waves, every resolver whose inputs intersect the dirty set,
//! in registration order. Writes made during a wave form the next wave.
//!
//! Resolvers never see the block itself, only a [`ResolveCtx`] over the
//! property store and the block state, so a resolver cannot start a nested
//! resolution pass. Its writes are queued as dirty flags and drained before
//! [`ResolverEngine::resolve`] returns.

use crate::error::{DdcError, DdcResult};
use crate::invariant_ppt::{assert_invariant, RESOLUTION_FIXED_POINT, RESOLVER_ACCESS_DECLARED};
use crate::property::{PropId, PropValue, PropertyStore};

/// Default bound on the number of resolution waves.
pub const DEFAULT_MAX_RESOLVE_ITERATIONS: usize = 32;

type ResolverFn<C> = Box<dyn Fn(&mut ResolveCtx<'_, C>) -> DdcResult<()> + Send>;

/// A registered resolver rule.
pub struct Resolver<C> {
    name: String,
    inputs: Vec<PropId>,
    outputs: Vec<PropId>,
    action: ResolverFn<C>,
}

impl<C> Resolver<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[PropId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PropId] {
        &self.outputs
    }
}

impl<C> std::fmt::Debug for Resolver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

/// What a resolver sees while it runs.
///
/// Reads are allowed on `inputs ∪ outputs`, writes only on `outputs`.
pub struct ResolveCtx<'a, C> {
    store: &'a mut PropertyStore,
    state: &'a mut C,
    name: &'a str,
    inputs: &'a [PropId],
    outputs: &'a [PropId],
}

impl<'a, C> ResolveCtx<'a, C> {
    /// Name of the running resolver.
    pub fn resolver(&self) -> &str {
        self.name
    }

    /// Block state passed to the resolution pass.
    pub fn state(&mut self) -> &mut C {
        self.state
    }

    fn check_read(&self, id: PropId) -> DdcResult<()> {
        if self.inputs.contains(&id) || self.outputs.contains(&id) {
            Ok(())
        } else {
            Err(self.undeclared(id))
        }
    }

    fn check_write(&self, id: PropId) -> DdcResult<()> {
        if self.outputs.contains(&id) {
            Ok(())
        } else {
            Err(self.undeclared(id))
        }
    }

    fn undeclared(&self, id: PropId) -> DdcError {
        let property = self
            .store
            .prop(id)
            .map(|p| p.label())
            .unwrap_or_else(|_| format!("#{}", id.0));
        DdcError::UndeclaredAccess {
            resolver: self.name.to_string(),
            property,
        }
    }

    pub fn get_f64(&self, id: PropId) -> DdcResult<f64> {
        self.check_read(id)?;
        self.store.get_f64(id)
    }

    pub fn get_i64(&self, id: PropId) -> DdcResult<i64> {
        self.check_read(id)?;
        self.store.get_i64(id)
    }

    pub fn get_str(&self, id: PropId) -> DdcResult<&str> {
        self.check_read(id)?;
        self.store.get_str(id)
    }

    pub fn is_dirty(&self, id: PropId) -> DdcResult<bool> {
        self.check_read(id)?;
        self.store.is_dirty(id)
    }

    /// Write an output. Marks it dirty only if the value changed.
    pub fn set(&mut self, id: PropId, value: impl Into<PropValue>) -> DdcResult<bool> {
        self.check_write(id)?;
        self.store.update(id, value.into())
    }

    /// Mark an output dirty without changing it.
    pub fn force_dirty(&mut self, id: PropId) -> DdcResult<()> {
        self.check_write(id)?;
        self.store.force_dirty(id)
    }
}

/// Statistics of one resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolveReport {
    /// Number of breadth-first waves executed.
    pub waves: usize,
    /// Number of resolver invocations.
    pub runs: usize,
}

/// Ordered set of resolvers over one property store.
pub struct ResolverEngine<C> {
    resolvers: Vec<Resolver<C>>,
    max_iterations: usize,
}

impl<C> ResolverEngine<C> {
    pub fn new() -> Self {
        Self::with_max_iterations(DEFAULT_MAX_RESOLVE_ITERATIONS)
    }

    pub fn with_max_iterations(max_iterations: usize) -> Self {
        Self {
            resolvers: Vec::new(),
            max_iterations,
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn resolvers(&self) -> &[Resolver<C>] {
        &self.resolvers
    }

    /// Register a resolver. All handles must exist in `store`.
    pub fn add_resolver<F>(
        &mut self,
        store: &PropertyStore,
        name: &str,
        inputs: &[PropId],
        outputs: &[PropId],
        action: F,
    ) -> DdcResult<usize>
    where
        F: Fn(&mut ResolveCtx<'_, C>) -> DdcResult<()> + Send + 'static,
    {
        if inputs.is_empty() {
            return Err(DdcError::InvalidArgument(format!(
                "resolver '{}' has no inputs",
                name
            )));
        }
        for &id in inputs.iter().chain(outputs) {
            store.prop(id)?;
        }
        self.resolvers.push(Resolver {
            name: name.to_string(),
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            action: Box::new(action),
        });
        Ok(self.resolvers.len() - 1)
    }

    /// Run resolvers until no property in `store` is dirty.
    ///
    /// On error the pass stops immediately; writes already made (to the
    /// store or through `state`) are kept and all dirty flags are cleared.
    pub fn resolve(&self, store: &mut PropertyStore, state: &mut C) -> DdcResult<ResolveReport> {
        let mut report = ResolveReport::default();
        loop {
            let dirty = store.dirty_ids();
            if dirty.is_empty() {
                break;
            }
            if report.waves >= self.max_iterations {
                let dirty = dirty
                    .iter()
                    .filter_map(|&id| store.prop(id).ok().map(|p| p.label()))
                    .collect();
                store.clear_dirty();
                tracing::error!(waves = report.waves, "property resolution diverged");
                return Err(DdcError::ResolutionDivergence {
                    iterations: report.waves,
                    dirty,
                });
            }
            report.waves += 1;

            let mut mask = vec![false; store.len()];
            for id in &dirty {
                mask[id.0] = true;
            }
            store.clear_dirty();

            for resolver in &self.resolvers {
                let triggered = resolver
                    .inputs
                    .iter()
                    .any(|id| mask.get(id.0).copied().unwrap_or(false));
                if !triggered {
                    continue;
                }
                tracing::trace!(resolver = %resolver.name, wave = report.waves, "running resolver");
                let mut ctx = ResolveCtx {
                    store: &mut *store,
                    state: &mut *state,
                    name: &resolver.name,
                    inputs: &resolver.inputs,
                    outputs: &resolver.outputs,
                };
                if let Err(err) = (resolver.action)(&mut ctx) {
                    store.clear_dirty();
                    tracing::debug!(resolver = %resolver.name, error = %err, "resolver failed");
                    return Err(err);
                }
                // An undeclared access fails the action, so none happened
                assert_invariant(
                    RESOLVER_ACCESS_DECLARED,
                    true,
                    "resolver touched only declared properties",
                    Some(&resolver.name),
                );
                report.runs += 1;
            }
        }
        assert_invariant(
            RESOLUTION_FIXED_POINT,
            store.dirty_ids().is_empty(),
            "no property left dirty",
            Some("resolve"),
        );
        Ok(report)
    }
}

impl<C> Default for ResolverEngine<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for ResolverEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverEngine")
            .field("resolvers", &self.resolvers)
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}
