//! The in-memory construction tree.
//!
//! While an index is being built, edges accumulate into a plain tree of
//! [`InternalNode`]s and [`LeafNode`]s, keyed by the reversed Morton path a
//! rasterized tile coordinate produces. Only once every edge has been
//! rasterized does the serializer walk this tree depth-first and pack it
//! into a [`crate::flat_store::FlatStoreIndex`]; nothing here is persisted
//! directly.

use crate::geometry::TileGeometry;
use crate::graph::EdgeId;

/// A node of the construction tree: either another fan-out level, or a
/// leaf holding the edges that pass through this tile.
pub enum ConstructionNode {
    Internal(InternalNode),
    Leaf(LeafNode),
}

/// An internal node with a fixed number of children, one per cell of this
/// level's fan-out (16, or 4 at a trailing odd-width level).
pub struct InternalNode {
    pub children: Vec<Option<ConstructionNode>>,
}

impl InternalNode {
    fn new(fanout: u32) -> Self {
        Self {
            children: (0..fanout).map(|_| None).collect(),
        }
    }

    fn insert(&mut self, geometry: &TileGeometry, reverse_key: u64, level: usize, edge: EdgeId) {
        let idx = geometry.path_cell_index(reverse_key, level);
        let next_level = level + 1;
        let is_leaf_level = next_level == geometry.depth();

        let slot = self.children[idx].get_or_insert_with(|| {
            if is_leaf_level {
                ConstructionNode::Leaf(LeafNode::default())
            } else {
                ConstructionNode::Internal(InternalNode::new(geometry.entries_at(next_level)))
            }
        });

        match slot {
            ConstructionNode::Leaf(leaf) => leaf.insert(edge),
            ConstructionNode::Internal(internal) => {
                internal.insert(geometry, reverse_key, next_level, edge);
            }
        }
    }
}

/// A leaf tile: the set of distinct edges whose rasterized path touches it.
#[derive(Default)]
pub struct LeafNode {
    pub edges: Vec<EdgeId>,
}

impl LeafNode {
    fn insert(&mut self, edge: EdgeId) {
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }
}

/// The root of a construction tree being built for one index.
pub struct ConstructionTree {
    root: InternalNode,
}

impl ConstructionTree {
    #[must_use]
    pub fn new(geometry: &TileGeometry) -> Self {
        Self {
            root: InternalNode::new(geometry.entries_at(0)),
        }
    }

    /// Adds `edge` to the leaf tile containing `(lat, lon)`, creating
    /// internal nodes along the path as needed. Inserting the same edge
    /// into the same tile twice (as rasterization of a self-intersecting
    /// polyline can do) is a no-op the second time.
    pub fn add_edge_to_one_tile(&mut self, geometry: &TileGeometry, lat: f64, lon: f64, edge: EdgeId) {
        let reverse_key = geometry.create_reverse_key(lat, lon);
        self.root.insert(geometry, reverse_key, 0, edge);
    }

    /// As [`ConstructionTree::add_edge_to_one_tile`], but addressing the
    /// tile by its (row, column) grid cell directly. Used by the
    /// rasterizer, which already computed the grid cell via Bresenham
    /// stepping and shouldn't re-derive it from a lat/lon.
    pub fn add_edge_to_one_tile_at_grid(
        &mut self,
        geometry: &TileGeometry,
        row: u64,
        col: u64,
        edge: EdgeId,
    ) {
        let reverse_key = geometry.create_reverse_key_for_grid(row, col);
        self.root.insert(geometry, reverse_key, 0, edge);
    }

    #[must_use]
    pub fn root(&self) -> &InternalNode {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Rect, coord};

    fn geometry() -> TileGeometry {
        TileGeometry::prepare_algo(
            Rect::new(coord! { x: 7.0, y: 50.0 }, coord! { x: 7.1, y: 50.1 }),
            300,
        )
        .unwrap()
    }

    #[test]
    fn inserting_same_edge_twice_in_same_tile_dedupes() {
        let geometry = geometry();
        let mut tree = ConstructionTree::new(&geometry);
        tree.add_edge_to_one_tile(&geometry, 50.05, 7.05, EdgeId(1));
        tree.add_edge_to_one_tile(&geometry, 50.05, 7.05, EdgeId(1));

        let reverse_key = geometry.create_reverse_key(50.05, 7.05);
        let mut node = tree.root();
        for level in 0..geometry.depth() {
            match &node.children[geometry.path_cell_index(reverse_key, level)] {
                Some(ConstructionNode::Leaf(leaf)) => {
                    assert_eq!(leaf.edges.len(), 1);
                    return;
                }
                Some(ConstructionNode::Internal(internal)) => node = internal,
                None => panic!("expected a populated path"),
            }
        }
        panic!("walked full depth without reaching a leaf");
    }

    #[test]
    fn distinct_tiles_produce_distinct_leaves() {
        let geometry = geometry();
        let mut tree = ConstructionTree::new(&geometry);
        tree.add_edge_to_one_tile(&geometry, 50.01, 7.01, EdgeId(1));
        tree.add_edge_to_one_tile(&geometry, 50.09, 7.09, EdgeId(2));

        let populated = count_leaves(tree.root());
        assert!(populated >= 2);
    }

    fn count_leaves(node: &InternalNode) -> usize {
        node.children
            .iter()
            .filter_map(|c| c.as_ref())
            .map(|c| match c {
                ConstructionNode::Leaf(_) => 1,
                ConstructionNode::Internal(internal) => count_leaves(internal),
            })
            .sum()
    }
}
