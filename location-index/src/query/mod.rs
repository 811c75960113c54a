//! Query-time collaborators: tile lookup, expanding-ring seeding, BFS
//! refinement, and bounding-box range queries.

mod range;
mod refine;
mod seed;

pub use range::query_range;
pub use refine::{Snap, SnapKind, refine_nearest};
pub use seed::{SeedResult, find_seed_edges};

use crate::graph::{EdgeIteratorState, Graph};

/// Resolves a bare, undirected edge id (as stored in a leaf) to a detached
/// iterator state by picking an arbitrary canonical direction for it.
fn edge_state_for_id<G: Graph + ?Sized>(graph: &G, id: i32) -> EdgeIteratorState {
    #[expect(clippy::cast_sign_loss)]
    let key = u64::from(id.unsigned_abs()) * 2;
    graph.edge_iterator_state_for_key(key)
}

/// Walks a single tile's path from the tree root, returning the raw edge
/// ids stored at that leaf (empty if the tile has no edges indexed).
pub(crate) struct TileLookup<'a> {
    store: &'a crate::flat_store::FlatStoreIndex,
    geometry: &'a crate::geometry::TileGeometry,
}

impl<'a> TileLookup<'a> {
    pub(crate) fn new(
        store: &'a crate::flat_store::FlatStoreIndex,
        geometry: &'a crate::geometry::TileGeometry,
    ) -> Self {
        Self { store, geometry }
    }

    pub(crate) fn edges_in_tile(&self, row: u64, col: u64) -> Vec<i32> {
        let reverse_key = self.geometry.create_reverse_key_for_grid(row, col);
        let mut offset = 0usize;
        let depth = self.geometry.depth();

        for level in 0..depth {
            let idx = self.geometry.path_cell_index(reverse_key, level);
            let cell = self.store.cell(offset + idx);
            if cell == 0 {
                return Vec::new();
            }

            let is_leaf_level = level + 1 == depth;
            if is_leaf_level {
                return decode_leaf_cell(self.store, cell);
            }

            if cell < 0 {
                // A single-edge leaf can't appear above the leaf level; a
                // well-formed store never produces this, but don't panic
                // on a corrupt one.
                return Vec::new();
            }
            #[expect(clippy::cast_sign_loss)]
            {
                offset = cell as usize;
            }
        }

        Vec::new()
    }
}

/// Decodes a leaf-position cell value into the edge ids it represents.
///
/// A negative cell sign-encodes a single edge id directly. A positive
/// cell is a pointer to a multi-edge leaf's header: the header cell
/// itself holds the *exclusive-end* int-offset `m` of the ids that
/// follow it, so the id count is `m - pointer - 1`, not the header
/// value itself.
pub(crate) fn decode_leaf_cell(store: &crate::flat_store::FlatStoreIndex, cell: i32) -> Vec<i32> {
    if cell < 0 {
        return vec![-(cell + 1)];
    }
    #[expect(clippy::cast_sign_loss)]
    let ptr = cell as usize;
    let header = store.cell(ptr);
    #[expect(clippy::cast_sign_loss)]
    let end = header as usize;
    let count = end.saturating_sub(ptr + 1);
    (0..count).map(|i| store.cell(ptr + 1 + i)).collect()
}
