//! Expanding-ring search for candidate edges near a query point.
//!
//! Starting from the leaf tile containing the query point, successively
//! wider square rings of tiles are scanned until either `max_region_search`
//! rings have been scanned, or the best candidate found so far is
//! provably closer than anything a wider ring could contain.

use geo::Coord;

use crate::distance::DistanceCalculator;
use crate::filter::EdgeFilter;
use crate::flat_store::FlatStoreIndex;
use crate::geometry::TileGeometry;
use crate::graph::{EdgeIteratorState, Graph};

use super::{TileLookup, edge_state_for_id};

/// Candidate edges gathered by the ring search, deduplicated and filtered,
/// along with how many rings were actually scanned.
#[derive(Debug, Default)]
pub struct SeedResult {
    pub edges: Vec<EdgeIteratorState>,
    pub rings_searched: u32,
}

/// Scans expanding rings of tiles around `query`, collecting edges a
/// filter accepts until the early-termination bound fires or
/// `max_region_search` rings have been scanned.
pub fn find_seed_edges<G: Graph, F: EdgeFilter>(
    graph: &G,
    store: &FlatStoreIndex,
    geometry: &TileGeometry,
    calc: &dyn DistanceCalculator,
    filter: &F,
    query: Coord<f64>,
    max_region_search: u32,
) -> SeedResult {
    let lookup = TileLookup::new(store, geometry);
    let (center_row, center_col) = geometry.to_grid(query.y, query.x);
    let max_index = geometry.max_grid_index();

    let mut found_ids: Vec<i32> = Vec::new();
    let mut best_normalized: Option<f64> = None;
    let mut rings_searched = 0;

    for radius in 0..=max_region_search {
        rings_searched = radius;
        let mut any_in_bounds = false;

        for (row, col) in ring_cells(center_row, center_col, radius, max_index) {
            any_in_bounds = true;
            for id in lookup.edges_in_tile(row, col) {
                if !found_ids.contains(&id) {
                    found_ids.push(id);
                }
            }
        }

        for &id in &found_ids {
            let state = edge_state_for_id(graph, id);
            if !filter.accept(&state) {
                continue;
            }
            let a = graph.node_coord(state.base_node);
            let b = graph.node_coord(state.adj_node);
            let d = calc.calc_normalized_edge_distance(query, a, b).normalized_distance;
            best_normalized = Some(best_normalized.map_or(d, |best: f64| best.min(d)));
        }

        if let Some(best) = best_normalized {
            // Anything outside the rings scanned so far is at least
            // `radius` tiles of slack away from the query's own tile
            // boundary; once that's provably farther than our best
            // candidate, a wider ring cannot improve on it.
            let tile_r_min = geometry.calculate_r_min(query, calc);
            #[expect(clippy::cast_precision_loss)]
            let slack = tile_r_min * f64::from(radius).max(1.0);
            if calc.calc_normalized_dist(slack) >= best {
                break;
            }
        }

        if !any_in_bounds && radius > 0 {
            break;
        }
    }

    let edges = found_ids
        .into_iter()
        .map(|id| edge_state_for_id(graph, id))
        .filter(|edge| filter.accept(edge))
        .collect();

    SeedResult {
        edges,
        rings_searched,
    }
}

/// The grid cells forming the border of the `(2*radius+1)`-wide square
/// centered at `(center_row, center_col)`, clipped to `[0, max_index]`.
/// Radius 0 is just the center cell.
fn ring_cells(center_row: u64, center_col: u64, radius: u32, max_index: u64) -> Vec<(u64, u64)> {
    if radius == 0 {
        return vec![(center_row, center_col)];
    }

    let r = u64::from(radius);
    let row_min = center_row.saturating_sub(r);
    let row_max = (center_row + r).min(max_index);
    let col_min = center_col.saturating_sub(r);
    let col_max = (center_col + r).min(max_index);

    let mut cells = Vec::new();
    for row in row_min..=row_max {
        for col in col_min..=col_max {
            let on_border = row == row_min || row == row_max || col == col_min || col == col_max;
            if on_border {
                cells.push((row, col));
            }
        }
    }
    cells
}
