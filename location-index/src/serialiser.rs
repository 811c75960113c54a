//! Packs a [`ConstructionTree`] into a [`FlatStoreIndex`], depth-first.
//!
//! The root block is always written first, so it always lands at
//! payload-relative offset 0 - callers never need to track a separate
//! "root pointer" cell.
//!
//! Every payload cell is one of three things:
//!
//! - `0`: an empty child slot.
//! - a negative value `v`: a leaf holding exactly one edge, whose id is
//!   `-(v + 1)`.
//! - a positive value `v`: a pointer to another block at payload-relative
//!   offset `v`. Whether that block is an internal node's child array or a
//!   multi-edge leaf's header is implied by the tree level the pointer was
//!   read from (the caller always knows whether it's at the leaf level).
//!
//! A multi-edge leaf block is a header cell followed by that many raw
//! edge ids. The header cell does not hold the count directly - it holds
//! the *exclusive-end* int-offset of the ids that follow, so `header -
//! offset - 1` recovers the count. This keeps every on-disk integer
//! either a pointer or a sign-encoded id, never a bare count that could
//! be confused with one of the other two at a leaf position.

use crate::construction_tree::{ConstructionNode, ConstructionTree, InternalNode, LeafNode};
use crate::error::{LocationIndexError, Result};
use crate::flat_store::FlatStoreIndex;
use crate::geometry::TileGeometry;

/// Counters describing one serialization pass, useful for logging and
/// tests; not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializeStats {
    pub internal_blocks: usize,
    pub single_edge_leaves: usize,
    pub multi_edge_leaves: usize,
    pub edges_written: usize,
    pub max_leaf_fanout: usize,
}

/// Serializes `tree` into `store`, returning counters about what was
/// written. The root block's offset is always 0 by construction.
///
/// # Errors
///
/// Returns [`LocationIndexError::ConstructionFailure`] if an edge id or a
/// block offset doesn't fit in the flat store's signed 32-bit cells, or
/// [`LocationIndexError::Io`] if the store can't grow to fit the tree.
pub fn serialize_tree(
    tree: &ConstructionTree,
    geometry: &TileGeometry,
    store: &mut FlatStoreIndex,
) -> Result<SerializeStats> {
    let mut stats = SerializeStats::default();
    serialize_internal(tree.root(), geometry, 0, store, &mut stats)?;
    Ok(stats)
}

fn serialize_internal(
    node: &InternalNode,
    geometry: &TileGeometry,
    level: usize,
    store: &mut FlatStoreIndex,
    stats: &mut SerializeStats,
) -> Result<usize> {
    let fanout = node.children.len();
    let block_offset = store.payload_len();
    store.reserve_payload(block_offset + fanout)?;
    stats.internal_blocks += 1;

    for (i, child) in node.children.iter().enumerate() {
        let cell_value = match child {
            None => 0,
            Some(ConstructionNode::Leaf(leaf)) => {
                encode_leaf(leaf, geometry, level + 1, store, stats)?
            }
            Some(ConstructionNode::Internal(internal)) => {
                let child_offset = serialize_internal(internal, geometry, level + 1, store, stats)?;
                to_pointer(child_offset, None)?
            }
        };
        if cell_value != 0 {
            store.set_cell(block_offset + i, cell_value)?;
        }
    }

    Ok(block_offset)
}

fn encode_leaf(
    leaf: &LeafNode,
    _geometry: &TileGeometry,
    _level: usize,
    store: &mut FlatStoreIndex,
    stats: &mut SerializeStats,
) -> Result<i32> {
    stats.max_leaf_fanout = stats.max_leaf_fanout.max(leaf.edges.len());
    stats.edges_written += leaf.edges.len();

    if leaf.edges.is_empty() {
        return Ok(0);
    }

    if let [only] = leaf.edges.as_slice() {
        stats.single_edge_leaves += 1;
        let id = only.0;
        id.checked_add(1)
            .and_then(i32::checked_neg)
            .ok_or_else(|| LocationIndexError::ConstructionFailure {
                message: "edge id too large to sign-encode as a single-edge leaf".to_string(),
                last_edge: Some(*only),
                last_base: None,
                last_adj: None,
            })
    } else {
        stats.multi_edge_leaves += 1;
        let offset = store.payload_len();
        let header_len = 1 + leaf.edges.len();
        store.reserve_payload(offset + header_len)?;

        // Sorted so a leaf's stored ids are strictly increasing, never
        // just deduplicated-in-insertion-order.
        let mut sorted_edges = leaf.edges.clone();
        sorted_edges.sort_unstable();

        // The header holds the exclusive-end int-offset of the ids that
        // follow it, not the count, so a reader never mistakes a leaf
        // header for a raw count that happens to collide with a pointer.
        let header = i32::try_from(offset + header_len).map_err(|_| {
            LocationIndexError::ConstructionFailure {
                message: "leaf header offset overflowed a signed 32-bit cell".to_string(),
                last_edge: leaf.edges.first().copied(),
                last_base: None,
                last_adj: None,
            }
        })?;
        store.set_cell(offset, header)?;
        for (i, edge) in sorted_edges.iter().enumerate() {
            store.set_cell(offset + 1 + i, edge.0)?;
        }

        to_pointer(offset, leaf.edges.first().copied())
    }
}

fn to_pointer(
    offset: usize,
    context_edge: Option<crate::graph::EdgeId>,
) -> Result<i32> {
    i32::try_from(offset).map_err(|_| LocationIndexError::ConstructionFailure {
        message: format!("block offset {offset} overflowed a signed 32-bit pointer cell"),
        last_edge: context_edge,
        last_base: None,
        last_adj: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeId;
    use geo::{Rect, coord};
    use proptest::collection::vec as prop_vec;
    use proptest::{prop_assert, proptest};

    fn geometry() -> TileGeometry {
        TileGeometry::prepare_algo(
            Rect::new(coord! { x: 7.0, y: 50.0 }, coord! { x: 7.1, y: 50.1 }),
            300,
        )
        .unwrap()
    }

    #[test]
    fn root_block_always_lands_at_offset_zero() {
        let geometry = geometry();
        let mut tree = ConstructionTree::new(&geometry);
        tree.add_edge_to_one_tile(&geometry, 50.05, 7.05, EdgeId(1));

        let mut store = FlatStoreIndex::in_memory();
        store.write_header(0, 300).unwrap();
        let root_offset = serialize_internal(
            tree.root(),
            &geometry,
            0,
            &mut store,
            &mut SerializeStats::default(),
        )
        .unwrap();
        assert_eq!(root_offset, 0);
    }

    #[test]
    fn single_edge_leaf_round_trips_through_sign_encoding() {
        let geometry = geometry();
        let mut tree = ConstructionTree::new(&geometry);
        tree.add_edge_to_one_tile(&geometry, 50.05, 7.05, EdgeId(41));

        let mut store = FlatStoreIndex::in_memory();
        store.write_header(0, 300).unwrap();
        let stats = serialize_tree(&tree, &geometry, &mut store).unwrap();
        assert_eq!(stats.single_edge_leaves, 1);
        assert_eq!(stats.multi_edge_leaves, 0);

        // Somewhere in the payload there must be a cell encoding -(41+1).
        let found = (0..store.payload_len()).any(|i| store.cell(i) == -42);
        assert!(found);
    }

    #[test]
    fn multi_edge_leaf_header_encodes_exclusive_end_offset() {
        let geometry = geometry();
        let mut tree = ConstructionTree::new(&geometry);
        tree.add_edge_to_one_tile(&geometry, 50.05, 7.05, EdgeId(1));
        tree.add_edge_to_one_tile(&geometry, 50.05, 7.05, EdgeId(2));

        let mut store = FlatStoreIndex::in_memory();
        store.write_header(0, 300).unwrap();
        let stats = serialize_tree(&tree, &geometry, &mut store).unwrap();
        assert_eq!(stats.multi_edge_leaves, 1);
        assert_eq!(stats.edges_written, 2);

        // The leaf's pointer and header must decode back to both edges
        // through the real lookup path, proving the header cell holds
        // the exclusive-end offset the decoder expects, not a raw count.
        let lookup = crate::query::TileLookup::new(&store, &geometry);
        let (row, col) = geometry.to_grid(50.05, 7.05);
        let mut ids = lookup.edges_in_tile(row, col);
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    proptest! {
        #[test]
        fn leaf_ids_are_strictly_increasing_with_no_duplicates(
            raw_ids in prop_vec(0i32..200, 1..20),
        ) {
            let geometry = geometry();
            let mut tree = ConstructionTree::new(&geometry);
            for &id in &raw_ids {
                tree.add_edge_to_one_tile(&geometry, 50.05, 7.05, EdgeId(id));
            }

            let mut store = FlatStoreIndex::in_memory();
            store.write_header(0, 300).unwrap();
            serialize_tree(&tree, &geometry, &mut store).unwrap();

            let lookup = crate::query::TileLookup::new(&store, &geometry);
            let (row, col) = geometry.to_grid(50.05, 7.05);
            let ids = lookup.edges_in_tile(row, col);

            for window in ids.windows(2) {
                prop_assert!(window[0] < window[1], "leaf ids not strictly increasing: {ids:?}");
            }
        }
    }
}
