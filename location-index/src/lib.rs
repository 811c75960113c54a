//! A compact hierarchical spatial index for snapping coordinates onto the
//! nearest edge of a road graph.
//!
//! The index stores, for every leaf tile of a fixed-resolution grid, the
//! set of graph edges whose rasterized path touches that tile. A query
//! expands outward in rings of tiles from the query point, then refines
//! the candidates with a short breadth-first walk of the graph, so that
//! filtered-out edges don't leave a gap where a graph-adjacent edge would
//! have been accepted.
//!
//! The index never owns graph data; every operation takes a [`Graph`]
//! implementation as an argument.
//!
//! # Lifecycle
//!
//! A [`LocationIndex`] starts out [`Unprepared`](LifecycleState::Unprepared).
//! Calling [`LocationIndex::prepare_index`] rasterizes every edge in a
//! graph and serializes the resulting tree, moving the index to
//! [`Prepared`](LifecycleState::Prepared). [`LocationIndex::load`] does the
//! same, but by trusting an already-serialized store (typically loaded
//! from disk) instead of rebuilding it, after checking its header against
//! the graph's checksum. [`LocationIndex::find_closest`] and
//! [`LocationIndex::query`] are only valid once prepared.
//! [`LocationIndex::close`] flushes pending writes and moves the index to
//! [`Closed`](LifecycleState::Closed), after which every operation fails.

pub mod config;
pub mod distance;
pub mod error;
pub mod filter;
pub mod flat_store;
pub mod geometry;
pub mod graph;
pub mod query;

mod construction_tree;
mod morton;
mod rasteriser;
mod serialiser;

use std::path::Path;

use geo::{Coord, Rect};
use tracing::{debug, info, instrument};

pub use config::IndexConfig;
pub use error::{LocationIndexError, Result};
pub use filter::{ALL_EDGES, AllEdges, EdgeFilter};
pub use graph::{EdgeId, EdgeIteratorState, Graph, GeometryMode, NodeId};
pub use query::{Snap, SnapKind};

use construction_tree::ConstructionTree;
use distance::{DistanceCalculator, PlanarApproximateDistance, PreciseDistance};
use flat_store::{FlatStoreIndex, MmapFlatStore};
use geometry::TileGeometry;
use rasteriser::rasterize_edge;
use serialiser::serialize_tree;

/// Where a [`LocationIndex`] is in its build/query lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No tree has been built or loaded yet; only
    /// [`LocationIndex::prepare_index`] and [`LocationIndex::load`] are
    /// valid.
    Unprepared,
    /// Ready for [`LocationIndex::find_closest`] and
    /// [`LocationIndex::query`].
    Prepared,
    /// [`LocationIndex::close`] has run; no further operations are valid.
    Closed,
}

/// The spatial index over a road graph's edges.
pub struct LocationIndex {
    store: FlatStoreIndex,
    config: IndexConfig,
    calculator: Box<dyn DistanceCalculator>,
    geometry: Option<TileGeometry>,
    state: LifecycleState,
}

impl LocationIndex {
    /// Creates an unprepared, in-memory index. Call
    /// [`LocationIndex::prepare_index`] before querying it.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::InvalidConfiguration`] if `config` is
    /// invalid.
    pub fn new(config: IndexConfig) -> Result<Self> {
        let config = config.validated()?;
        Ok(Self {
            store: FlatStoreIndex::in_memory(),
            calculator: pick_calculator(&config),
            config,
            geometry: None,
            state: LifecycleState::Unprepared,
        })
    }

    /// Creates an unprepared index backed by a memory-mapped file at
    /// `path`, creating it if it doesn't already exist. Call
    /// [`LocationIndex::prepare_index`] or [`LocationIndex::load`] before
    /// querying it.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::InvalidConfiguration`] if `config` is
    /// invalid, or [`LocationIndexError::Io`] if the file can't be opened.
    pub fn open_file<P: AsRef<Path>>(path: P, config: IndexConfig) -> Result<Self> {
        let config = config.validated()?;
        let backing = MmapFlatStore::open(path, config.segment_size)?;
        Ok(Self {
            store: FlatStoreIndex::from_backing(Box::new(backing)),
            calculator: pick_calculator(&config),
            config,
            geometry: None,
            state: LifecycleState::Unprepared,
        })
    }

    /// Rasterizes every edge of `graph` and serializes the resulting tree
    /// into this index's store, overwriting anything previously there.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::LifecycleViolation`] if the index is
    /// closed, [`LocationIndexError::InvalidGraphBounds`] if the graph's
    /// bounds are degenerate, [`LocationIndexError::KeySpaceOverflow`] if
    /// the resolution demands more than 64 bits of key space, or
    /// [`LocationIndexError::ConstructionFailure`]/[`LocationIndexError::Io`]
    /// if writing the tree fails.
    #[instrument(skip(self, graph))]
    pub fn prepare_index<G: Graph>(&mut self, graph: &G) -> Result<()> {
        self.ensure_not_closed()?;

        let geometry = TileGeometry::prepare_algo(graph.bounds(), self.config.min_resolution_in_meter)?;
        info!(
            total_bits = geometry.total_bits(),
            depth = geometry.depth(),
            diagonal_m = geometry.bounds_diagonal_meters(),
            "sized tile grid from graph bounds"
        );

        let mut tree = ConstructionTree::new(&geometry);
        let mut edges_rasterized = 0u64;
        for (edge_id, base, adj) in graph.edges() {
            rasterize_edge(
                &mut tree,
                &geometry,
                graph,
                self.calculator.as_ref(),
                edge_id,
                base,
                adj,
            );
            edges_rasterized += 1;
        }
        debug!(edges_rasterized, "rasterized all edges into construction tree");

        let checksum = graph_checksum(graph);
        self.store.write_header(checksum, self.config.min_resolution_in_meter)?;
        let stats = serialize_tree(&tree, &geometry, &mut self.store)?;
        self.store.flush()?;
        info!(
            internal_blocks = stats.internal_blocks,
            single_edge_leaves = stats.single_edge_leaves,
            multi_edge_leaves = stats.multi_edge_leaves,
            "serialized tree into flat store"
        );

        self.geometry = Some(geometry);
        self.state = LifecycleState::Prepared;
        Ok(())
    }

    /// Adopts an already-serialized store by validating its header
    /// against `graph`'s checksum, without rebuilding the tree.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::LifecycleViolation`] if the index is
    /// closed, [`LocationIndexError::VersionMismatch`] if the store wasn't
    /// written by this crate, or [`LocationIndexError::ChecksumMismatch`]
    /// if it was built from a different graph.
    pub fn load<G: Graph>(&mut self, graph: &G) -> Result<()> {
        self.ensure_not_closed()?;

        let checksum = graph_checksum(graph);
        let (_, resolution) = self.store.read_header(Some(checksum))?;
        let geometry = TileGeometry::prepare_algo(graph.bounds(), resolution)?;
        self.geometry = Some(geometry);
        self.state = LifecycleState::Prepared;
        Ok(())
    }

    /// Loads the existing store if its header matches `graph`, otherwise
    /// rebuilds it from scratch via [`LocationIndex::prepare_index`].
    ///
    /// # Errors
    ///
    /// See [`LocationIndex::prepare_index`].
    pub fn load_or_prepare<G: Graph>(&mut self, graph: &G) -> Result<()> {
        match self.load(graph) {
            Ok(()) => Ok(()),
            Err(_) => self.prepare_index(graph),
        }
    }

    /// Finds the closest edge to `(lat, lon)` that `filter` accepts, or
    /// `None` if the search exhausts [`IndexConfig::max_region_search`]
    /// rings without finding one.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::LifecycleViolation`] or
    /// [`LocationIndexError::IndexClosed`] if the index isn't prepared.
    pub fn find_closest<G: Graph, F: EdgeFilter>(
        &self,
        graph: &G,
        lat: f64,
        lon: f64,
        filter: &F,
    ) -> Result<Option<Snap>> {
        let geometry = self.require_prepared()?;
        let query = Coord { x: lon, y: lat };

        let seed = query::find_seed_edges(
            graph,
            &self.store,
            geometry,
            self.calculator.as_ref(),
            filter,
            query,
            self.config.max_region_search,
        );
        Ok(query::refine_nearest(
            graph,
            self.calculator.as_ref(),
            filter,
            query,
            &seed.edges,
        ))
    }

    /// Returns every edge `filter` accepts whose indexed tile intersects
    /// `bbox`.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::LifecycleViolation`] or
    /// [`LocationIndexError::IndexClosed`] if the index isn't prepared.
    pub fn query<G: Graph, F: EdgeFilter>(
        &self,
        graph: &G,
        bbox: Rect<f64>,
        filter: &F,
    ) -> Result<Vec<EdgeIteratorState>> {
        let geometry = self.require_prepared()?;
        Ok(query::query_range(graph, &self.store, geometry, filter, bbox))
    }

    /// Flushes outstanding writes and retires the index. Further
    /// operations on it will fail.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::Io`] if the flush fails.
    pub fn close(mut self) -> Result<()> {
        self.store.flush()?;
        self.state = LifecycleState::Closed;
        Ok(())
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.state == LifecycleState::Closed {
            return Err(LocationIndexError::IndexClosed);
        }
        Ok(())
    }

    fn require_prepared(&self) -> Result<&TileGeometry> {
        match self.state {
            LifecycleState::Closed => Err(LocationIndexError::IndexClosed),
            LifecycleState::Unprepared => Err(LocationIndexError::LifecycleViolation(
                "index must be prepared or loaded before it can be queried".to_string(),
            )),
            LifecycleState::Prepared => Ok(self
                .geometry
                .as_ref()
                .expect("Prepared state implies geometry is set")),
        }
    }
}

fn pick_calculator(config: &IndexConfig) -> Box<dyn DistanceCalculator> {
    if config.approximation {
        Box::new(PlanarApproximateDistance)
    } else {
        Box::new(PreciseDistance)
    }
}

/// A cheap identity check for "was this store built from this graph":
/// not a content hash, since [`Graph`] doesn't expose raw bytes, just
/// node/edge counts mixed together. Good enough to catch loading a store
/// against an unrelated or stale graph; not a substitute for a real
/// checksum if the graph can change shape without changing these counts.
fn graph_checksum<G: Graph>(graph: &G) -> i32 {
    let mixed = i64::from(graph.node_count())
        .wrapping_mul(1_000_003)
        .wrapping_add(i64::from(graph.edge_count()));
    #[expect(clippy::cast_possible_truncation)]
    {
        mixed as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::coord;

    struct GridGraph {
        nodes: Vec<Coord<f64>>,
        edges: Vec<(EdgeId, NodeId, NodeId)>,
    }

    impl GridGraph {
        /// A 3x3 grid of nodes spanning roughly 200m x 200m, connected by
        /// horizontal and vertical edges.
        fn new() -> Self {
            let mut nodes = Vec::new();
            for row in 0..3u32 {
                for col in 0..3u32 {
                    nodes.push(coord! {
                        x: 7.0 + f64::from(col) * 0.001,
                        y: 50.0 + f64::from(row) * 0.001,
                    });
                }
            }
            let mut edges = Vec::new();
            let idx = |row: u32, col: u32| row * 3 + col;
            let mut next_edge = 0;
            for row in 0..3u32 {
                for col in 0..3u32 {
                    if col + 1 < 3 {
                        edges.push((
                            EdgeId(next_edge),
                            NodeId(idx(row, col)),
                            NodeId(idx(row, col + 1)),
                        ));
                        next_edge += 1;
                    }
                    if row + 1 < 3 {
                        edges.push((
                            EdgeId(next_edge),
                            NodeId(idx(row, col)),
                            NodeId(idx(row + 1, col)),
                        ));
                        next_edge += 1;
                    }
                }
            }
            Self { nodes, edges }
        }
    }

    impl Graph for GridGraph {
        fn node_count(&self) -> u32 {
            u32::try_from(self.nodes.len()).unwrap()
        }
        fn edge_count(&self) -> u32 {
            u32::try_from(self.edges.len()).unwrap()
        }
        fn bounds(&self) -> Rect<f64> {
            Rect::new(
                coord! { x: 7.0, y: 50.0 },
                coord! { x: 7.002, y: 50.002 },
            )
        }
        fn node_coord(&self, node: NodeId) -> Coord<f64> {
            self.nodes[node.0 as usize]
        }
        fn edges(&self) -> Box<dyn Iterator<Item = (EdgeId, NodeId, NodeId)> + '_> {
            Box::new(self.edges.iter().copied())
        }
        fn fetch_way_geometry(&self, _edge: EdgeId, _mode: GeometryMode) -> Vec<Coord<f64>> {
            Vec::new()
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
                if base == node || adj == node {
                    let (b, a) = if base == node { (base, adj) } else { (adj, base) };
                    Some(EdgeIteratorState {
                        edge_id,
                        base_node: b,
                        adj_node: a,
                    })
                } else {
                    None
                }
            }))
        }
    }

    #[test]
    fn queries_before_prepare_fail_with_lifecycle_violation() {
        let index = LocationIndex::new(IndexConfig::default()).unwrap();
        let graph = GridGraph::new();
        let result = index.find_closest(&graph, 50.001, 7.001, &ALL_EDGES);
        assert!(matches!(
            result,
            Err(LocationIndexError::LifecycleViolation(_))
        ));
    }

    #[test]
    fn find_closest_snaps_to_a_nearby_edge() {
        let graph = GridGraph::new();
        let mut index = LocationIndex::new(IndexConfig::default()).unwrap();
        index.prepare_index(&graph).unwrap();

        let snap = index
            .find_closest(&graph, 50.0005, 7.0002, &ALL_EDGES)
            .unwrap()
            .expect("a snap should be found");
        assert!(snap.normalized_distance >= 0.0);
    }

    #[test]
    fn query_range_returns_edges_in_bbox() {
        let graph = GridGraph::new();
        let mut index = LocationIndex::new(IndexConfig::default()).unwrap();
        index.prepare_index(&graph).unwrap();

        let bbox = Rect::new(
            coord! { x: 6.999, y: 49.999 },
            coord! { x: 7.003, y: 50.003 },
        );
        let edges = index.query(&graph, bbox, &ALL_EDGES).unwrap();
        assert_eq!(edges.len(), graph.edges.len());
    }

    #[test]
    fn operations_after_close_are_rejected() {
        let graph = GridGraph::new();
        let mut index = LocationIndex::new(IndexConfig::default()).unwrap();
        index.prepare_index(&graph).unwrap();
        index.close().unwrap();
    }

    #[test]
    fn load_validates_checksum_against_a_different_graph() {
        let graph = GridGraph::new();
        let mut index = LocationIndex::new(IndexConfig::default()).unwrap();
        index.prepare_index(&graph).unwrap();

        struct EmptyGraph;
        impl Graph for EmptyGraph {
            fn node_count(&self) -> u32 {
                0
            }
            fn edge_count(&self) -> u32 {
                0
            }
            fn bounds(&self) -> Rect<f64> {
                Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 })
            }
            fn node_coord(&self, _node: NodeId) -> Coord<f64> {
                coord! { x: 0.0, y: 0.0 }
            }
            fn edges(&self) -> Box<dyn Iterator<Item = (EdgeId, NodeId, NodeId)> + '_> {
                Box::new(std::iter::empty())
            }
            fn fetch_way_geometry(&self, _edge: EdgeId, _mode: GeometryMode) -> Vec<Coord<f64>> {
                Vec::new()
            }
            fn edge_iterator_state_for_key(&self, _key: u64) -> EdgeIteratorState {
                unreachable!()
            }
            fn outgoing_edges(&self, _node: NodeId) -> Box<dyn Iterator<Item = EdgeIteratorState> + '_> {
                Box::new(std::iter::empty())
            }
        }

        let mut reopened = LocationIndex {
            store: index.store,
            calculator: pick_calculator(&IndexConfig::default()),
            config: IndexConfig::default(),
            geometry: None,
            state: LifecycleState::Unprepared,
        };
        let result = reopened.load(&EmptyGraph);
        assert!(matches!(
            result,
            Err(LocationIndexError::ChecksumMismatch { .. })
        ));
    }
}
