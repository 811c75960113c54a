//! Breadth-first refinement over seed edges.
//!
//! The tile index only guarantees that a seed edge passes *near* a tile,
//! not that it's the closest accepted edge overall - a closer edge might
//! have been excluded by the filter at seed time while a graph-adjacent
//! edge a few hops away would be accepted. A breadth-first walk from the
//! seeds' base nodes, sharing one visited set across every seed so no
//! node is examined twice, catches those.

use std::collections::{HashSet, VecDeque};

use geo::Coord;

use crate::distance::DistanceCalculator;
use crate::filter::EdgeFilter;
use crate::graph::{EdgeIteratorState, GeometryMode, Graph, NodeId};

/// Once the best candidate's normalized distance drops to (or below) this
/// threshold, the query point is considered to be sitting on the network,
/// and the walk stops expanding further rather than searching the rest of
/// a potentially large connected graph for an improvement that doesn't
/// matter.
const EQUAL_NORMED_DELTA: f64 = 1e-9;

/// What kind of point on the network a [`Snap`] landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapKind {
    /// An exact graph node (the base or adjacent node of an edge).
    Tower,
    /// An interior polyline vertex of an edge.
    Pillar,
    /// A point strictly between two polyline vertices.
    Edge,
}

/// A candidate snap: the closest accepted edge found, the normalized
/// distance to it, where along the edge the query point projects, and
/// what kind of point it landed on.
#[derive(Debug, Clone, Copy)]
pub struct Snap {
    pub edge: EdgeIteratorState,
    pub normalized_distance: f64,
    pub fraction: f64,
    pub kind: SnapKind,
}

impl Snap {
    /// The point on the edge's segment the query snaps to.
    #[must_use]
    pub fn snapped_coord(&self, graph: &impl Graph) -> Coord<f64> {
        let a = graph.node_coord(self.edge.base_node);
        let b = graph.node_coord(self.edge.adj_node);
        Coord {
            x: a.x + self.fraction.clamp(0.0, 1.0) * (b.x - a.x),
            y: a.y + self.fraction.clamp(0.0, 1.0) * (b.y - a.y),
        }
    }
}

/// Refines a set of seed edges into the single closest accepted edge,
/// widening the search through a breadth-first walk of the graph
/// starting from the seeds' base nodes. The walk's visited set is shared
/// across every seed, so a node reachable from more than one seed is
/// only ever examined once.
pub fn refine_nearest<G: Graph, F: EdgeFilter>(
    graph: &G,
    calc: &dyn DistanceCalculator,
    filter: &F,
    query: Coord<f64>,
    seeds: &[EdgeIteratorState],
) -> Option<Snap> {
    let mut visited_nodes: HashSet<NodeId> = HashSet::new();
    let mut frontier: VecDeque<NodeId> = VecDeque::new();
    let mut best: Option<Snap> = None;

    for &edge in seeds {
        if visited_nodes.insert(edge.base_node) {
            frontier.push_back(edge.base_node);
        }
    }

    while let Some(node) = frontier.pop_front() {
        consider_node(graph, calc, query, node, &mut best);

        for edge in graph.outgoing_edges(node) {
            if !filter.accept(&edge) {
                continue;
            }
            walk_polyline(graph, calc, query, edge, &mut best);
            if visited_nodes.insert(edge.adj_node) {
                frontier.push_back(edge.adj_node);
            }
        }

        if best.is_some_and(|b| b.normalized_distance <= EQUAL_NORMED_DELTA) {
            break;
        }
    }

    best
}

/// Considers snapping directly onto `node` itself (a TOWER candidate),
/// using any one of its outgoing edges as the reporting handle.
fn consider_node<G: Graph>(
    graph: &G,
    calc: &dyn DistanceCalculator,
    query: Coord<f64>,
    node: NodeId,
    best: &mut Option<Snap>,
) {
    let Some(representative) = graph.outgoing_edges(node).next() else {
        return;
    };
    let coord = graph.node_coord(node);
    let dist = calc.calc_dist(query.y, query.x, coord.y, coord.x);
    let normalized = calc.calc_normalized_dist(dist);

    let improves = best.is_none_or(|b| normalized < b.normalized_distance);
    if improves {
        let fraction = if representative.base_node == node { 0.0 } else { 1.0 };
        *best = Some(Snap {
            edge: representative,
            normalized_distance: normalized,
            fraction,
            kind: SnapKind::Tower,
        });
    }
}

/// Walks `edge`'s polyline segment by segment, recording an EDGE
/// candidate where the query's foot-of-perpendicular falls on the
/// segment, or a PILLAR/TOWER point-distance candidate at the segment's
/// far endpoint otherwise. A segment crossing the antimeridian is
/// skipped, matching the rasteriser's own antimeridian handling.
fn walk_polyline<G: Graph>(
    graph: &G,
    calc: &dyn DistanceCalculator,
    query: Coord<f64>,
    edge: EdgeIteratorState,
    best: &mut Option<Snap>,
) {
    let mut prev = graph.node_coord(edge.base_node);
    let polyline = graph.fetch_way_geometry(edge.edge_id, GeometryMode::PillarsAndAdj);
    let last_index = polyline.len().saturating_sub(1);

    for (i, next) in polyline.into_iter().enumerate() {
        if calc.is_cross_boundary(prev.x, next.x) {
            prev = next;
            continue;
        }

        if calc.valid_edge_distance(query, prev, next) {
            let result = calc.calc_normalized_edge_distance(query, prev, next);
            let improves = best.is_none_or(|b| result.normalized_distance < b.normalized_distance);
            if improves {
                *best = Some(Snap {
                    edge,
                    normalized_distance: result.normalized_distance,
                    fraction: result.fraction,
                    kind: SnapKind::Edge,
                });
            }
        } else {
            let dist = calc.calc_dist(query.y, query.x, next.y, next.x);
            let normalized = calc.calc_normalized_dist(dist);
            let improves = best.is_none_or(|b| normalized < b.normalized_distance);
            if improves {
                let kind = if i == last_index { SnapKind::Tower } else { SnapKind::Pillar };
                *best = Some(Snap {
                    edge,
                    normalized_distance: normalized,
                    fraction: 1.0,
                    kind,
                });
            }
        }

        prev = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::PlanarApproximateDistance;
    use crate::filter::ALL_EDGES;
    use crate::graph::{EdgeId, GeometryMode};
    use geo::{Rect, coord};

    struct TinyGraph {
        nodes: Vec<Coord<f64>>,
        edges: Vec<(EdgeId, NodeId, NodeId)>,
    }

    impl Graph for TinyGraph {
        fn node_count(&self) -> u32 {
            self.nodes.len() as u32
        }
        fn edge_count(&self) -> u32 {
            self.edges.len() as u32
        }
        fn bounds(&self) -> Rect<f64> {
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 })
        }
        fn node_coord(&self, node: NodeId) -> Coord<f64> {
            self.nodes[node.0 as usize]
        }
        fn edges(&self) -> Box<dyn Iterator<Item = (EdgeId, NodeId, NodeId)> + '_> {
            Box::new(self.edges.iter().copied())
        }
        fn fetch_way_geometry(&self, edge: EdgeId, mode: GeometryMode) -> Vec<Coord<f64>> {
            if mode != GeometryMode::PillarsAndAdj {
                return Vec::new();
            }
            let (_, _, adj) = self.edges.iter().find(|&&(id, _, _)| id == edge).unwrap();
            vec![self.node_coord(*adj)]
        }
        fn edge_iterator_state_for_key(&self, key: u64) -> EdgeIteratorState {
            let (edge_id, base, adj) = self.edges[(key / 2) as usize];
            EdgeIteratorState {
                edge_id,
                base_node: base,
                adj_node: adj,
            }
        }
        fn outgoing_edges(&self, node: NodeId) -> Box<dyn Iterator<Item = EdgeIteratorState> + '_> {
            Box::new(self.edges.iter().filter_map(move |&(edge_id, base, adj)| {
                if base == node {
                    Some(EdgeIteratorState {
                        edge_id,
                        base_node: base,
                        adj_node: adj,
                    })
                } else {
                    None
                }
            }))
        }
    }

    #[test]
    fn refine_finds_the_closest_of_two_seeds() {
        let graph = TinyGraph {
            nodes: vec![
                coord! { x: 0.0, y: 0.0 },
                coord! { x: 0.0, y: 0.001 },
                coord! { x: 0.0005, y: 0.0 },
                coord! { x: 0.0005, y: 0.001 },
            ],
            edges: vec![
                (EdgeId(0), NodeId(0), NodeId(1)),
                (EdgeId(1), NodeId(2), NodeId(3)),
            ],
        };
        let seeds = vec![
            EdgeIteratorState {
                edge_id: EdgeId(0),
                base_node: NodeId(0),
                adj_node: NodeId(1),
            },
            EdgeIteratorState {
                edge_id: EdgeId(1),
                base_node: NodeId(2),
                adj_node: NodeId(3),
            },
        ];

        let query = coord! { x: 0.0001, y: 0.0005 };
        let snap = refine_nearest(&graph, &PlanarApproximateDistance, &ALL_EDGES, query, &seeds)
            .expect("a snap should be found");
        assert_eq!(snap.edge.edge_id, EdgeId(0));
    }

    #[test]
    fn refine_returns_none_with_no_seeds() {
        let graph = TinyGraph {
            nodes: vec![],
            edges: vec![],
        };
        let query = coord! { x: 0.0, y: 0.0 };
        assert!(
            refine_nearest(&graph, &PlanarApproximateDistance, &ALL_EDGES, query, &[]).is_none()
        );
    }

    #[test]
    fn dead_end_node_snaps_to_the_tower_when_every_edge_projects_off_segment() {
        // A single dangling edge pointing east from the origin; the query
        // sits west of the origin, so the foot of the perpendicular onto
        // the edge falls behind its base node no matter which edge is
        // tried. Only a node-distance fallback at the base node itself
        // produces a snap.
        let graph = TinyGraph {
            nodes: vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 0.001, y: 0.0 }],
            edges: vec![(EdgeId(0), NodeId(0), NodeId(1))],
        };
        let seeds = vec![EdgeIteratorState {
            edge_id: EdgeId(0),
            base_node: NodeId(0),
            adj_node: NodeId(1),
        }];

        let query = coord! { x: -0.0005, y: 0.0 };
        let snap = refine_nearest(&graph, &PlanarApproximateDistance, &ALL_EDGES, query, &seeds)
            .expect("the dead-end node itself should be offered as a snap");
        assert_eq!(snap.kind, SnapKind::Tower);
        assert_eq!(snap.fraction, 0.0);
    }
}
