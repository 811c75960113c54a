use geo::{Coord, Rect, coord};
use location_index::{EdgeId, EdgeIteratorState, Graph, GeometryMode, NodeId};

/// A minimal in-memory road graph for exercising the index end to end.
///
/// Edges are stored undirected; `base`/`adj` give one canonical direction,
/// and `outgoing_edges` reverses it when walked from the adjacent side.
pub struct TestGraph {
    nodes: Vec<Coord<f64>>,
    edges: Vec<(EdgeId, NodeId, NodeId)>,
    pillars: Vec<Vec<Coord<f64>>>,
}

impl TestGraph {
    pub fn new(nodes: Vec<(f64, f64)>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|(lat, lon)| coord! { x: lon, y: lat }).collect(),
            edges: Vec::new(),
            pillars: Vec::new(),
        }
    }

    pub fn with_edge(mut self, base: u32, adj: u32) -> Self {
        let id = EdgeId(i32::try_from(self.edges.len()).unwrap());
        self.edges.push((id, NodeId(base), NodeId(adj)));
        self.pillars.push(Vec::new());
        self
    }

    pub fn with_edge_pillars(mut self, base: u32, adj: u32, pillars: Vec<(f64, f64)>) -> Self {
        let id = EdgeId(i32::try_from(self.edges.len()).unwrap());
        self.edges.push((id, NodeId(base), NodeId(adj)));
        self.pillars
            .push(pillars.into_iter().map(|(lat, lon)| coord! { x: lon, y: lat }).collect());
        self
    }
}

impl Graph for TestGraph {
    fn node_count(&self) -> u32 {
        u32::try_from(self.nodes.len()).unwrap()
    }

    fn edge_count(&self) -> u32 {
        u32::try_from(self.edges.len()).unwrap()
    }

    fn bounds(&self) -> Rect<f64> {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for n in &self.nodes {
            min_x = min_x.min(n.x);
            min_y = min_y.min(n.y);
            max_x = max_x.max(n.x);
            max_y = max_y.max(n.y);
        }
        Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y })
    }

    fn node_coord(&self, node: NodeId) -> Coord<f64> {
        self.nodes[node.0 as usize]
    }

    fn edges(&self) -> Box<dyn Iterator<Item = (EdgeId, NodeId, NodeId)> + '_> {
        Box::new(self.edges.iter().copied())
    }

    fn fetch_way_geometry(&self, edge: EdgeId, mode: GeometryMode) -> Vec<Coord<f64>> {
        let (_, _, adj) = self.edges[edge.0 as usize];
        let mut points = self.pillars[edge.0 as usize].clone();
        if mode == GeometryMode::PillarsAndAdj {
            points.push(self.node_coord(adj));
        }
        points
    }

    fn edge_iterator_state_for_key(&self, key: u64) -> EdgeIteratorState {
        let (edge_id, base, adj) = self.edges[(key / 2) as usize];
        EdgeIteratorState { edge_id, base_node: base, adj_node: adj }
    }

    fn outgoing_edges(&self, node: NodeId) -> Box<dyn Iterator<Item = EdgeIteratorState> + '_> {
        Box::new(self.edges.iter().filter_map(move |&(edge_id, base, adj)| {
            if base == node {
                Some(EdgeIteratorState { edge_id, base_node: base, adj_node: adj })
            } else if adj == node {
                Some(EdgeIteratorState { edge_id, base_node: adj, adj_node: base })
            } else {
                None
            }
        }))
    }
}
