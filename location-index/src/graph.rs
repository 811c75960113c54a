//! The road graph collaborator.
//!
//! The index never owns node coordinates, edge polylines, or adjacency; it
//! asks a [`Graph`] implementation for them. This lets the same index code
//! run against whatever graph storage a caller already has, as long as it
//! can answer the handful of questions below.

use geo::{Coord, Rect};

/// Opaque identifier for a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// Opaque identifier for a graph edge (undirected; the graph distinguishes
/// direction internally via [`EdgeIteratorState`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub i32);

/// Which part of an edge's geometry to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryMode {
    /// Interior vertices only (no tower nodes).
    PillarsOnly,
    /// Interior vertices plus the adjacent (end) tower node.
    PillarsAndAdj,
}

/// A detached, copyable view of one direction of travel along an edge.
///
/// "Detached" means it carries its own data rather than borrowing from an
/// iterator, so it survives being stashed in a seed set or a snap result
/// while the caller keeps iterating the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeIteratorState {
    pub edge_id: EdgeId,
    pub base_node: NodeId,
    pub adj_node: NodeId,
}

/// The road graph collaborator.
///
/// Implementations are free to back this with whatever storage they like;
/// the index only ever calls these methods and treats their results as
/// ground truth.
pub trait Graph {
    /// Total number of nodes in the graph.
    fn node_count(&self) -> u32;

    /// Total number of (undirected) edges in the graph.
    fn edge_count(&self) -> u32;

    /// The bounding rectangle `[minLat,maxLat] x [minLon,maxLon]`, fixed for
    /// the lifetime of the graph. `x` is longitude, `y` is latitude.
    fn bounds(&self) -> Rect<f64>;

    /// Latitude/longitude of a node, as `(x: lon, y: lat)`.
    fn node_coord(&self, node: NodeId) -> Coord<f64>;

    /// All edges in the graph, each yielded once as `(edge, base, adj)`.
    ///
    /// Iteration order must be deterministic for a given graph so that
    /// index construction is reproducible.
    fn edges(&self) -> Box<dyn Iterator<Item = (EdgeId, NodeId, NodeId)> + '_>;

    /// The interior/end vertices of an edge's polyline, in order from base
    /// to adjacent node. Does not include the base node's own coordinate.
    fn fetch_way_geometry(&self, edge: EdgeId, mode: GeometryMode) -> Vec<Coord<f64>>;

    /// Resolves a directed-edge key (`edge_id * 2 + direction`) to a
    /// detached iterator state, as used by edge filters.
    fn edge_iterator_state_for_key(&self, key: u64) -> EdgeIteratorState;

    /// All edges leaving `node`, in a deterministic order.
    fn outgoing_edges(&self, node: NodeId) -> Box<dyn Iterator<Item = EdgeIteratorState> + '_>;
}

impl EdgeIteratorState {
    /// The directed-edge key this state would resolve from, matching
    /// [`Graph::edge_iterator_state_for_key`]'s encoding.
    #[must_use]
    pub fn key(&self) -> u64 {
        // The low bit distinguishes direction; base == id*2 picks an
        // arbitrary canonical direction for a bare edge id.
        u64::from(self.edge_id.0.unsigned_abs()) * 2
    }
}
