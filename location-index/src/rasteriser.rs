//! Rasterizes an edge's polyline into the leaf tiles it passes through,
//! using Bresenham's line algorithm on the index's grid.
//!
//! Running Bresenham per polyline segment (rather than just indexing the
//! segment's two endpoints) is what lets the query engine find a query
//! point's nearest edge by looking at only a handful of tiles: a long
//! edge's middle is reachable even though no vertex of the polyline falls
//! near it.

use crate::construction_tree::ConstructionTree;
use crate::distance::DistanceCalculator;
use crate::geometry::TileGeometry;
use crate::graph::{EdgeId, Graph, GeometryMode, NodeId};

/// Rasterizes one edge's full polyline (base node, interior pillars, and
/// adjacent node) into `tree`, inserting `edge` into every leaf tile its
/// path touches. A segment that crosses the antimeridian is skipped
/// rather than rasterized, so a wraparound edge never gets a bogus
/// long run of tiles swept across the whole grid.
pub fn rasterize_edge<G: Graph>(
    tree: &mut ConstructionTree,
    geometry: &TileGeometry,
    graph: &G,
    calc: &dyn DistanceCalculator,
    edge: EdgeId,
    base: NodeId,
    adj: NodeId,
) {
    let base_coord = graph.node_coord(base);
    let mut points = Vec::with_capacity(2);
    points.push((base_coord.y, base_coord.x));
    for pillar in graph.fetch_way_geometry(edge, GeometryMode::PillarsAndAdj) {
        points.push((pillar.y, pillar.x));
    }
    if points.len() == 1 {
        let adj_coord = graph.node_coord(adj);
        points.push((adj_coord.y, adj_coord.x));
    }

    let mut visited_grid_cells: Vec<(u64, u64)> = Vec::new();
    for window in points.windows(2) {
        let (lat0, lon0) = window[0];
        let (lat1, lon1) = window[1];
        if calc.is_cross_boundary(lon0, lon1) {
            continue;
        }
        let (row0, col0) = geometry.to_grid(lat0, lon0);
        let (row1, col1) = geometry.to_grid(lat1, lon1);
        bresenham(row0, col0, row1, col1, &mut |row, col| {
            if !visited_grid_cells.contains(&(row, col)) {
                visited_grid_cells.push((row, col));
                tree.add_edge_to_one_tile_at_grid(geometry, row, col, edge);
            }
        });
    }
}

/// Integer Bresenham between two grid cells, calling `visit` once per
/// cell touched (inclusive of both endpoints). Coordinates are `u64`
/// grid indices, so the algorithm tracks signed deltas internally and
/// only ever emits non-negative cells.
fn bresenham(row0: u64, col0: u64, row1: u64, col1: u64, visit: &mut impl FnMut(u64, u64)) {
    #[expect(clippy::cast_possible_wrap)]
    let (mut row, mut col) = (row0 as i64, col0 as i64);
    #[expect(clippy::cast_possible_wrap)]
    let (row_end, col_end) = (row1 as i64, col1 as i64);

    let d_row = (row_end - row).abs();
    let d_col = -(col_end - col).abs();
    let step_row = if row < row_end { 1 } else { -1 };
    let step_col = if col < col_end { 1 } else { -1 };
    let mut err = d_row + d_col;

    loop {
        #[expect(clippy::cast_sign_loss)]
        visit(row as u64, col as u64);
        if row == row_end && col == col_end {
            break;
        }
        let e2 = 2 * err;
        if e2 >= d_col {
            err += d_col;
            row += step_row;
        }
        if e2 <= d_row {
            err += d_row;
            col += step_col;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::{prop_assert, proptest};

    proptest! {
        #[test]
        fn bresenham_always_covers_both_endpoints_and_stays_connected(
            row0 in 0u64..500, col0 in 0u64..500,
            row1 in 0u64..500, col1 in 0u64..500,
        ) {
            let mut visited = Vec::new();
            bresenham(row0, col0, row1, col1, &mut |r, c| visited.push((r, c)));

            prop_assert!(visited.first() == Some(&(row0, col0)));
            prop_assert!(visited.last() == Some(&(row1, col1)));
            for window in visited.windows(2) {
                let (r0, c0) = window[0];
                let (r1, c1) = window[1];
                prop_assert!(r0.abs_diff(r1) <= 1 && c0.abs_diff(c1) <= 1);
            }
        }
    }

    #[test]
    fn bresenham_visits_both_endpoints() {
        let mut visited = Vec::new();
        bresenham(0, 0, 5, 3, &mut |r, c| visited.push((r, c)));
        assert_eq!(visited.first(), Some(&(0, 0)));
        assert_eq!(visited.last(), Some(&(5, 3)));
    }

    #[test]
    fn bresenham_single_cell_for_identical_endpoints() {
        let mut visited = Vec::new();
        bresenham(4, 4, 4, 4, &mut |r, c| visited.push((r, c)));
        assert_eq!(visited, vec![(4, 4)]);
    }

    #[test]
    fn bresenham_is_symmetric_in_path_length() {
        let mut forward = Vec::new();
        bresenham(0, 0, 10, 4, &mut |r, c| forward.push((r, c)));
        let mut backward = Vec::new();
        bresenham(10, 4, 0, 0, &mut |r, c| backward.push((r, c)));
        assert_eq!(forward.len(), backward.len());
    }

    #[test]
    fn bresenham_stays_connected() {
        let mut visited = Vec::new();
        bresenham(2, 9, 8, 1, &mut |r, c| visited.push((r, c)));
        for window in visited.windows(2) {
            let (r0, c0) = window[0];
            let (r1, c1) = window[1];
            let dr = r0.abs_diff(r1);
            let dc = c0.abs_diff(c1);
            assert!(dr <= 1 && dc <= 1, "gap between {:?} and {:?}", window[0], window[1]);
        }
    }
}
