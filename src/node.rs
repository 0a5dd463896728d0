//! Block node plumbing shared by all block controllers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::VecDeque;

use crate::action::ActionInfo;
use crate::error::{DdcError, DdcResult};
use crate::invariant_ppt::{assert_invariant, PORT_COUNT_MATCH};
use crate::property::{PropId, PropValue, PropertyStore, ResSourceInfo};
use crate::resolver::{ResolveCtx, ResolveReport, ResolverEngine, DEFAULT_MAX_RESOLVE_ITERATIONS};

/// Construction arguments handed to every block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockArgs {
    /// Block identifier, e.g. `0/DDC#0`.
    pub unique_id: String,
    /// Number of input ports.
    pub num_inputs: usize,
    /// Number of output ports; blocks here require it to equal `num_inputs`.
    pub num_outputs: usize,
    /// Bound on resolution waves before a pass is declared divergent.
    pub max_resolve_iterations: usize,
}

impl BlockArgs {
    /// Defaults (one port each way) for block `unique_id`.
    pub fn new(unique_id: &str) -> Self {
        Self {
            unique_id: unique_id.to_string(),
            ..Self::default()
        }
    }

    /// Same number of input and output ports.
    pub fn with_ports(mut self, num_ports: usize) -> Self {
        self.num_inputs = num_ports;
        self.num_outputs = num_ports;
        self
    }

    /// Set input and output port counts separately.
    pub fn with_port_counts(mut self, num_inputs: usize, num_outputs: usize) -> Self {
        self.num_inputs = num_inputs;
        self.num_outputs = num_outputs;
        self
    }

    /// Override the resolution wave bound.
    pub fn with_max_resolve_iterations(mut self, max: usize) -> Self {
        self.max_resolve_iterations = max;
        self
    }
}

impl Default for BlockArgs {
    fn default() -> Self {
        Self {
            unique_id: "0/Block#0".to_string(),
            num_inputs: 1,
            num_outputs: 1,
            max_resolve_iterations: DEFAULT_MAX_RESOLVE_ITERATIONS,
        }
    }
}

/// Object-safe interface the graph framework uses to drive a block.
pub trait BlockControl: Send {
    /// Block identifier, e.g. `0/DDC#0`.
    fn unique_id(&self) -> &str;
    /// Number of input ports.
    fn num_input_ports(&self) -> usize;
    /// Number of output ports.
    fn num_output_ports(&self) -> usize;

    /// Current value of a property.
    fn get_property(&self, name: &str, scope: ResSourceInfo) -> DdcResult<PropValue>;

    /// Write a property and resolve the block to a fixed point.
    fn set_property(
        &mut self,
        name: &str,
        scope: ResSourceInfo,
        value: PropValue,
    ) -> DdcResult<ResolveReport>;

    /// Inbound action arriving at edge `src` of this block.
    fn receive_action(&mut self, src: ResSourceInfo, action: ActionInfo) -> DdcResult<()>;

    /// Drain actions this block posted toward its neighbours, oldest first.
    fn take_outbound(&mut self) -> Vec<(ResSourceInfo, ActionInfo)>;
}

/// Properties, resolvers, block state and outbound action queue of one block.
pub struct NodeCore<C> {
    unique_id: String,
    num_ports: usize,
    store: PropertyStore,
    engine: ResolverEngine<C>,
    state: C,
    outbox: VecDeque<(ResSourceInfo, ActionInfo)>,
}

impl<C> NodeCore<C> {
    /// Create a node. Input and output port counts must match.
    pub fn new(
        unique_id: &str,
        num_inputs: usize,
        num_outputs: usize,
        state: C,
        max_resolve_iterations: usize,
    ) -> DdcResult<Self> {
        if num_inputs != num_outputs {
            return Err(DdcError::PortMismatch(format!(
                "{} has {} inputs but {} outputs",
                unique_id, num_inputs, num_outputs
            )));
        }
        assert_invariant(
            PORT_COUNT_MATCH,
            true,
            "input and output port counts match",
            Some(unique_id),
        );
        Ok(Self {
            unique_id: unique_id.to_string(),
            num_ports: num_inputs,
            store: PropertyStore::new(),
            engine: ResolverEngine::with_max_iterations(max_resolve_iterations),
            state,
            outbox: VecDeque::new(),
        })
    }

    /// Block identifier.
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Ports per direction.
    pub fn num_ports(&self) -> usize {
        self.num_ports
    }

    /// Read access to the property store.
    pub fn store(&self) -> &PropertyStore {
        &self.store
    }

    /// Registered resolvers.
    pub fn engine(&self) -> &ResolverEngine<C> {
        &self.engine
    }

    /// Block state shared with resolvers.
    pub fn state(&self) -> &C {
        &self.state
    }

    /// Mutable block state, outside a resolution pass.
    pub fn state_mut(&mut self) -> &mut C {
        &mut self.state
    }

    fn check_port(&self, scope: ResSourceInfo) -> DdcResult<()> {
        if scope.instance >= self.num_ports {
            return Err(DdcError::PortMismatch(format!(
                "{}: port {} out of range ({} ports)",
                self.unique_id, scope.instance, self.num_ports
            )));
        }
        Ok(())
    }

    /// Register a property on a port of this block.
    pub fn register_property(
        &mut self,
        name: &str,
        scope: ResSourceInfo,
        value: impl Into<PropValue>,
    ) -> DdcResult<PropId> {
        self.check_port(scope)?;
        self.store.register(name, scope, value)
    }

    /// Register a resolver; see [`ResolverEngine::add_resolver`].
    pub fn add_resolver<F>(
        &mut self,
        name: &str,
        inputs: &[PropId],
        outputs: &[PropId],
        action: F,
    ) -> DdcResult<usize>
    where
        F: Fn(&mut ResolveCtx<'_, C>) -> DdcResult<()> + Send + 'static,
    {
        self.engine.add_resolver(&self.store, name, inputs, outputs, action)
    }

    /// Handle of the property `name` at `scope`.
    pub fn prop_id(&self, name: &str, scope: ResSourceInfo) -> DdcResult<PropId> {
        self.store.id(name, scope)
    }

    /// Current value of the property `name` at `scope`.
    pub fn property(&self, name: &str, scope: ResSourceInfo) -> DdcResult<&PropValue> {
        self.store.get(self.store.id(name, scope)?)
    }

    /// Write a property by key and resolve.
    pub fn set_property(
        &mut self,
        name: &str,
        scope: ResSourceInfo,
        value: PropValue,
    ) -> DdcResult<ResolveReport> {
        let id = self.store.id(name, scope)?;
        self.set(id, value)
    }

    /// Write a property by handle and resolve.
    pub fn set(&mut self, id: PropId, value: PropValue) -> DdcResult<ResolveReport> {
        self.store.set(id, value)?;
        self.resolve()
    }

    /// Mark a property dirty without changing it, then resolve.
    pub fn force_dirty(&mut self, name: &str, scope: ResSourceInfo) -> DdcResult<ResolveReport> {
        let id = self.store.id(name, scope)?;
        self.store.force_dirty(id)?;
        self.resolve()
    }

    /// Whether the property `name` at `scope` is dirty.
    pub fn is_dirty(&self, name: &str, scope: ResSourceInfo) -> DdcResult<bool> {
        self.store.is_dirty(self.store.id(name, scope)?)
    }

    /// Run the resolver engine until nothing is dirty.
    pub fn resolve(&mut self) -> DdcResult<ResolveReport> {
        self.engine.resolve(&mut self.store, &mut self.state)
    }

    /// Mark every property dirty and resolve. Used once after construction
    /// so resolvers push initial values into hardware.
    pub fn resolve_all(&mut self) -> DdcResult<ResolveReport> {
        let ids: Vec<PropId> = self.store.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.store.force_dirty(id)?;
        }
        self.resolve()
    }

    /// Queue an action toward the neighbour attached at `dst`.
    pub fn post_action(&mut self, dst: ResSourceInfo, action: ActionInfo) {
        tracing::trace!(
            block = %self.unique_id,
            edge = %dst,
            id = action.id,
            key = action.key(),
            "posting action"
        );
        self.outbox.push_back((dst, action));
    }

    /// Drain queued actions, oldest first.
    pub fn take_outbound(&mut self) -> Vec<(ResSourceInfo, ActionInfo)> {
        self.outbox.drain(..).collect()
    }
}

impl<C> std::fmt::Debug for NodeCore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCore")
            .field("unique_id", &self.unique_id)
            .field("num_ports", &self.num_ports)
            .field("properties", &self.store.len())
            .field("resolvers", &self.engine.resolvers().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{StreamCmd, StreamMode};

    #[test]
    fn block_args_builder() {
        let args = BlockArgs::new("0/DDC#1").with_ports(4).with_max_resolve_iterations(8);
        assert_eq!(args.num_inputs, 4);
        assert_eq!(args.num_outputs, 4);
        assert_eq!(args.max_resolve_iterations, 8);
        assert_eq!(BlockArgs::default().max_resolve_iterations, DEFAULT_MAX_RESOLVE_ITERATIONS);
    }

    #[test]
    fn port_counts_must_match() {
        let err = NodeCore::new("0/Test#0", 2, 1, (), DEFAULT_MAX_RESOLVE_ITERATIONS).unwrap_err();
        assert!(matches!(err, DdcError::PortMismatch(_)));
    }

    #[test]
    fn property_scope_must_be_in_range() {
        let mut node = NodeCore::new("0/Test#0", 1, 1, (), DEFAULT_MAX_RESOLVE_ITERATIONS).unwrap();
        assert!(node.register_property("gain", ResSourceInfo::user(0), 1.0).is_ok());
        assert!(node.register_property("gain", ResSourceInfo::user(1), 1.0).is_err());
    }

    #[test]
    fn set_property_resolves() {
        let mut node =
            NodeCore::new("0/Test#0", 1, 1, 0usize, DEFAULT_MAX_RESOLVE_ITERATIONS).unwrap();
        let a = node.register_property("a", ResSourceInfo::user(0), 1.0).unwrap();
        let b = node.register_property("b", ResSourceInfo::output(0), 0.0).unwrap();
        node.add_resolver("double", &[a], &[b], move |ctx| {
            let v = ctx.get_f64(a)?;
            ctx.set(b, v * 2.0)?;
            *ctx.state() += 1;
            Ok(())
        })
        .unwrap();
        node.set_property("a", ResSourceInfo::user(0), PropValue::Double(4.0))
            .unwrap();
        assert_eq!(
            node.property("b", ResSourceInfo::output(0)).unwrap(),
            &PropValue::Double(8.0)
        );
        assert_eq!(*node.state(), 1);
        assert!(!node.is_dirty("a", ResSourceInfo::user(0)).unwrap());

        node.force_dirty("a", ResSourceInfo::user(0)).unwrap();
        assert_eq!(*node.state(), 2);
        assert!(matches!(
            node.set_property("missing", ResSourceInfo::user(0), PropValue::Int(1)),
            Err(DdcError::NotFound { .. })
        ));
    }

    #[test]
    fn outbox_is_fifo() {
        let mut node = NodeCore::new("0/Test#0", 1, 1, (), DEFAULT_MAX_RESOLVE_ITERATIONS).unwrap();
        let first = ActionInfo::stream_cmd(StreamCmd::new(StreamMode::StartContinuous));
        let second = ActionInfo::stream_cmd(StreamCmd::new(StreamMode::StopContinuous));
        node.post_action(ResSourceInfo::input(0), first.clone());
        node.post_action(ResSourceInfo::input(0), second.clone());
        let out = node.take_outbound();
        assert_eq!(out, vec![(ResSourceInfo::input(0), first), (ResSourceInfo::input(0), second)]);
        assert!(node.take_outbound().is_empty());
    }
}
