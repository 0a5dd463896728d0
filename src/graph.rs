//! Block graph: connects block ports and routes actions between neighbours.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::VecDeque;

use crate::action::ActionInfo;
use crate::error::{DdcError, DdcResult};
use crate::invariant_ppt::{assert_invariant, GRAPH_LEGALITY, GRAPH_REJECTS_INVALID};
use crate::node::BlockControl;
use crate::property::{PropValue, ResSourceInfo, SourceType};
use crate::resolver::ResolveReport;

/// Upper bound on block-to-block hops while routing one action.
pub const MAX_ACTION_HOPS: usize = 1024;

/// Unique identifier for a block in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Port index on a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub usize);

/// An edge from an output port to an input port. Data flows along it; actions
/// may travel either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Upstream block.
    pub from_node: NodeId,
    /// Output port on the upstream block.
    pub from_port: PortId,
    /// Downstream block.
    pub to_node: NodeId,
    /// Input port on the downstream block.
    pub to_port: PortId,
}

impl Edge {
    /// Edge from output `from_port` of `from_node` to input `to_port` of
    /// `to_node`.
    pub fn new(from_node: NodeId, from_port: usize, to_node: NodeId, to_port: usize) -> Self {
        Self {
            from_node,
            from_port: PortId(from_port),
            to_node,
            to_port: PortId(to_port),
        }
    }
}

/// An action that left the graph: posted toward an edge with no neighbour.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalAction {
    /// Block that posted it.
    pub node: NodeId,
    /// Edge of that block it was posted to.
    pub edge: ResSourceInfo,
    /// The action itself.
    pub action: ActionInfo,
}

/// A set of blocks and the edges between them. Edges form a DAG.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<Option<Box<dyn BlockControl>>>,
    edges: Vec<Edge>,
}

impl Graph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a block.
    pub fn add_block(&mut self, block: Box<dyn BlockControl>) -> NodeId {
        let id = NodeId(self.nodes.len());
        tracing::debug!(node = id.0, block = %block.unique_id(), "adding block");
        self.nodes.push(Some(block));
        id
    }

    /// Remove a block and every edge touching it.
    pub fn remove_block(&mut self, id: NodeId) -> DdcResult<Box<dyn BlockControl>> {
        let block = self
            .nodes
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or_else(|| DdcError::Graph(format!("no block with id {}", id.0)))?;
        self.edges.retain(|e| e.from_node != id && e.to_node != id);
        Ok(block)
    }

    /// Block with id `id`.
    pub fn block(&self, id: NodeId) -> DdcResult<&dyn BlockControl> {
        self.nodes
            .get(id.0)
            .and_then(|n| n.as_deref())
            .ok_or_else(|| DdcError::Graph(format!("no block with id {}", id.0)))
    }

    /// Mutable access to block `id`.
    pub fn block_mut(&mut self, id: NodeId) -> DdcResult<&mut (dyn BlockControl + 'static)> {
        self.nodes
            .get_mut(id.0)
            .and_then(|n| n.as_deref_mut())
            .ok_or_else(|| DdcError::Graph(format!("no block with id {}", id.0)))
    }

    /// Look up a block by its unique id.
    pub fn find(&self, unique_id: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.as_ref().map_or(false, |b| b.unique_id() == unique_id))
            .map(NodeId)
    }

    /// All edges, in connection order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Connect an output port to an input port.
    ///
    /// Both ports must exist and be unconnected, and the edge must not close
    /// a cycle.
    pub fn connect(&mut self, edge: Edge) -> DdcResult<()> {
        let reject = |msg: String| {
            assert_invariant(GRAPH_REJECTS_INVALID, true, "rejecting edge", Some(msg.as_str()));
            Err(DdcError::Graph(msg))
        };
        let from = self.block(edge.from_node)?;
        let to = self.block(edge.to_node)?;
        if edge.from_port.0 >= from.num_output_ports() {
            return reject(format!(
                "{} has no output port {}",
                from.unique_id(),
                edge.from_port.0
            ));
        }
        if edge.to_port.0 >= to.num_input_ports() {
            return reject(format!(
                "{} has no input port {}",
                to.unique_id(),
                edge.to_port.0
            ));
        }
        if self
            .edges
            .iter()
            .any(|e| e.from_node == edge.from_node && e.from_port == edge.from_port)
        {
            return reject(format!(
                "{} output port {} already connected",
                from.unique_id(),
                edge.from_port.0
            ));
        }
        if self
            .edges
            .iter()
            .any(|e| e.to_node == edge.to_node && e.to_port == edge.to_port)
        {
            return reject(format!(
                "{} input port {} already connected",
                to.unique_id(),
                edge.to_port.0
            ));
        }
        if self.would_create_cycle(&edge) {
            return reject(format!(
                "edge {} -> {} would create a cycle",
                from.unique_id(),
                to.unique_id()
            ));
        }
        tracing::debug!(
            from = %from.unique_id(),
            from_port = edge.from_port.0,
            to = %to.unique_id(),
            to_port = edge.to_port.0,
            "connecting"
        );
        self.edges.push(edge);
        assert_invariant(GRAPH_LEGALITY, true, "edge added, graph remains legal", Some("connect"));
        Ok(())
    }

    fn would_create_cycle(&self, edge: &Edge) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        self.dfs(edge.to_node, edge.from_node, &mut visited)
    }

    fn dfs(&self, current: NodeId, target: NodeId, visited: &mut [bool]) -> bool {
        if current == target {
            return true;
        }
        if visited[current.0] {
            return false;
        }
        visited[current.0] = true;
        for edge in &self.edges {
            if edge.from_node == current && self.dfs(edge.to_node, target, visited) {
                return true;
            }
        }
        false
    }

    /// Block and edge on the other side of edge `side` of block `node`.
    pub fn neighbour(&self, node: NodeId, side: ResSourceInfo) -> Option<(NodeId, ResSourceInfo)> {
        let port = PortId(side.instance);
        match side.kind {
            SourceType::OutputEdge => self
                .edges
                .iter()
                .find(|e| e.from_node == node && e.from_port == port)
                .map(|e| (e.to_node, ResSourceInfo::input(e.to_port.0))),
            SourceType::InputEdge => self
                .edges
                .iter()
                .find(|e| e.to_node == node && e.to_port == port)
                .map(|e| (e.from_node, ResSourceInfo::output(e.from_port.0))),
            SourceType::User => None,
        }
    }

    /// Set a property on one block.
    pub fn set_property(
        &mut self,
        node: NodeId,
        name: &str,
        scope: ResSourceInfo,
        value: PropValue,
    ) -> DdcResult<ResolveReport> {
        self.block_mut(node)?.set_property(name, scope, value)
    }

    /// Deliver `action` to edge `src` of `node`, then keep routing whatever
    /// blocks post until the graph is quiet.
    ///
    /// Actions posted toward unconnected edges are returned in posting order.
    pub fn post_action(
        &mut self,
        node: NodeId,
        src: ResSourceInfo,
        action: ActionInfo,
    ) -> DdcResult<Vec<TerminalAction>> {
        let mut pending = VecDeque::from([(node, src, action)]);
        let mut terminal = Vec::new();
        let mut hops = 0;
        while let Some((node, src, action)) = pending.pop_front() {
            hops += 1;
            if hops > MAX_ACTION_HOPS {
                return Err(DdcError::Graph(format!(
                    "action routing exceeded {} hops",
                    MAX_ACTION_HOPS
                )));
            }
            let block = self.block_mut(node)?;
            block.receive_action(src, action)?;
            for (edge, action) in block.take_outbound() {
                match self.neighbour(node, edge) {
                    Some((next, next_src)) => {
                        tracing::trace!(
                            from = node.0,
                            to = next.0,
                            id = action.id,
                            "routing action"
                        );
                        pending.push_back((next, next_src, action));
                    }
                    None => terminal.push(TerminalAction { node, edge, action }),
                }
            }
        }
        Ok(terminal)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let blocks: Vec<&str> = self
            .nodes
            .iter()
            .map(|n| n.as_ref().map_or("<removed>", |b| b.unique_id()))
            .collect();
        f.debug_struct("Graph")
            .field("blocks", &blocks)
            .field("edges", &self.edges)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionPayload, StreamCmd, StreamMode};
    use crate::ddc::DdcBlock;
    use crate::node::BlockArgs;
    use crate::regs::SimRegisters;
    use proptest::prelude::*;

    fn ddc(id: &str, decim: i64) -> Box<dyn BlockControl> {
        let mut block = DdcBlock::new(SimRegisters::ddc(8, 16), BlockArgs::new(id)).unwrap();
        block
            .set_property("decim", ResSourceInfo::user(0), PropValue::Int(decim))
            .unwrap();
        Box::new(block)
    }

    fn chain(len: usize) -> (Graph, Vec<NodeId>) {
        let mut graph = Graph::new();
        let ids: Vec<NodeId> = (0..len)
            .map(|i| graph.add_block(ddc(&format!("0/DDC#{}", i), 1)))
            .collect();
        for w in ids.windows(2) {
            graph.connect(Edge::new(w[0], 0, w[1], 0)).unwrap();
        }
        (graph, ids)
    }

    #[test]
    fn invalid_ports_rejected() {
        let (mut graph, ids) = chain(2);
        let err = graph.connect(Edge::new(ids[0], 1, ids[1], 0)).unwrap_err();
        assert!(matches!(err, DdcError::Graph(_)));
        assert!(graph.connect(Edge::new(ids[0], 0, NodeId(7), 0)).is_err());
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn port_connected_once() {
        let mut graph = Graph::new();
        let a = graph.add_block(ddc("0/DDC#0", 1));
        let b = graph.add_block(ddc("0/DDC#1", 1));
        let c = graph.add_block(ddc("0/DDC#2", 1));
        graph.connect(Edge::new(a, 0, b, 0)).unwrap();
        assert!(graph.connect(Edge::new(c, 0, b, 0)).is_err());
        assert!(graph.connect(Edge::new(a, 0, c, 0)).is_err());
    }

    #[test]
    fn cycle_detection() {
        let (mut graph, ids) = chain(3);
        let err = graph.connect(Edge::new(ids[2], 0, ids[0], 0));
        assert!(matches!(err, Err(DdcError::Graph(ref m)) if m.contains("cycle")));
    }

    #[test]
    fn chained_stream_cmd_multiplies() {
        let mut graph = Graph::new();
        let head = graph.add_block(ddc("0/DDC#0", 4));
        let tail = graph.add_block(ddc("0/DDC#1", 2));
        graph.connect(Edge::new(head, 0, tail, 0)).unwrap();

        let action = ActionInfo::stream_cmd(StreamCmd::num_samps(StreamMode::NumSampsAndDone, 100));
        let id = action.id;
        let out = graph
            .post_action(tail, ResSourceInfo::output(0), action)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].node, head);
        assert_eq!(out[0].edge, ResSourceInfo::input(0));
        assert_eq!(out[0].action.id, id);
        match out[0].action.payload {
            ActionPayload::StreamCmd(cmd) => assert_eq!(cmd.num_samps, 800),
            ref other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn remove_block_drops_edges() {
        let (mut graph, ids) = chain(3);
        graph.remove_block(ids[1]).unwrap();
        assert!(graph.edges().is_empty());
        assert!(graph.block(ids[1]).is_err());
        assert_eq!(graph.find("0/DDC#2"), Some(ids[2]));
        assert_eq!(graph.neighbour(ids[2], ResSourceInfo::input(0)), None);
    }

    proptest! {
        #[test]
        fn closing_any_chain_is_rejected(len in 2usize..6) {
            let (mut graph, ids) = chain(len);
            let res = graph.connect(Edge::new(ids[len - 1], 0, ids[0], 0));
            prop_assert!(res.is_err());
            prop_assert_eq!(graph.edges().len(), len - 1);
        }
    }
}
