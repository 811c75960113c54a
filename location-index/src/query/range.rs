//! Bounding-box range queries over the tile tree.
//!
//! Unlike the nearest-edge search, a range query doesn't care about
//! distance at all: it walks every tile whose bounds intersect the query
//! box, pruning subtrees whose bounds don't, and returns every edge found
//! in a surviving leaf.

use geo::Rect;

use crate::filter::EdgeFilter;
use crate::flat_store::FlatStoreIndex;
use crate::geometry::TileGeometry;
use crate::graph::{EdgeIteratorState, Graph};

use super::edge_state_for_id;

/// Returns every edge `filter` accepts whose indexed tile intersects
/// `bbox`.
pub fn query_range<G: Graph, F: EdgeFilter>(
    graph: &G,
    store: &FlatStoreIndex,
    geometry: &TileGeometry,
    filter: &F,
    bbox: Rect<f64>,
) -> Vec<EdgeIteratorState> {
    let mut results = Vec::new();
    let mut seen_ids = Vec::new();
    visit(
        store, geometry, graph, filter, bbox, 0, 0, 0, 0, 0, &mut seen_ids, &mut results,
    );
    results
}

#[expect(clippy::too_many_arguments)]
fn visit<G: Graph, F: EdgeFilter>(
    store: &FlatStoreIndex,
    geometry: &TileGeometry,
    graph: &G,
    filter: &F,
    bbox: Rect<f64>,
    block_offset: usize,
    level: usize,
    lat_prefix: u64,
    lon_prefix: u64,
    axis_bits: u32,
    seen_ids: &mut Vec<i32>,
    results: &mut Vec<EdgeIteratorState>,
) {
    let fanout = geometry.entries_at(level);
    let level_bits = geometry.level_bits_at(level);
    let pairs = level_bits / 2;
    let is_leaf_level = level + 1 == geometry.depth();

    for idx in 0..fanout as usize {
        let cell = store.cell(block_offset + idx);
        if cell == 0 {
            continue;
        }

        let (lat_component, lon_component) = split_axes(idx, pairs);
        let new_lat_prefix = (lat_prefix << pairs) | u64::from(lat_component);
        let new_lon_prefix = (lon_prefix << pairs) | u64::from(lon_component);
        let new_axis_bits = axis_bits + pairs;

        let tile_bounds =
            geometry.bounds_for_prefix(new_lat_prefix, new_axis_bits, new_lon_prefix, new_axis_bits);
        if !rects_intersect(tile_bounds, bbox) {
            continue;
        }

        if is_leaf_level {
            for id in super::decode_leaf_cell(store, cell) {
                if seen_ids.contains(&id) {
                    continue;
                }
                seen_ids.push(id);
                let state = edge_state_for_id(graph, id);
                if filter.accept(&state) {
                    results.push(state);
                }
            }
        } else if cell > 0 {
            #[expect(clippy::cast_sign_loss)]
            let child_offset = cell as usize;
            visit(
                store,
                geometry,
                graph,
                filter,
                bbox,
                child_offset,
                level + 1,
                new_lat_prefix,
                new_lon_prefix,
                new_axis_bits,
                seen_ids,
                results,
            );
        }
    }
}

/// Splits a `2*pairs`-bit child index into its lat/lon components: bit
/// `2i` belongs to latitude, bit `2i+1` to longitude, matching the Morton
/// interleaving used to build the key in the first place.
fn split_axes(idx: usize, pairs: u32) -> (u32, u32) {
    let mut lat = 0u32;
    let mut lon = 0u32;
    for p in 0..pairs {
        let lat_bit = (idx >> (2 * p)) & 1;
        let lon_bit = (idx >> (2 * p + 1)) & 1;
        lat |= u32::try_from(lat_bit).unwrap_or(0) << p;
        lon |= u32::try_from(lon_bit).unwrap_or(0) << p;
    }
    (lat, lon)
}

fn rects_intersect(a: Rect<f64>, b: Rect<f64>) -> bool {
    a.min().x <= b.max().x && a.max().x >= b.min().x && a.min().y <= b.max().y && a.max().y >= b.min().y
}
