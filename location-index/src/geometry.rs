//! Tile geometry collaborator.
//!
//! Sizes the index for a given graph's bounding box and a target leaf tile
//! resolution, then answers the handful of questions every other
//! collaborator needs about the resulting tile grid: how many bits each
//! level of the tree consumes, what a level's cell index is within a key,
//! and how far a query point is guaranteed to be from anything outside its
//! own leaf tile.

use geo::{Coord, Rect};

use crate::distance::{DistanceCalculator, METERS_PER_DEGREE_LAT, PreciseDistance};
use crate::error::{LocationIndexError, Result};
use crate::morton::MortonEncoder;

/// Number of bits a tree level consumes once the schedule runs out of
/// fanout-16 (4 bit) levels: a single trailing fanout-4 level absorbs the
/// remaining 2 bits when the total bit count isn't a multiple of 4.
const TRAILING_LEVEL_BITS: u32 = 2;
const STANDARD_LEVEL_BITS: u32 = 4;

/// The maximum per-axis bits the grid can use; keys are packed two bits per
/// level-bit into a `u64`, so `2 * bits_per_axis` must not exceed 64.
const MAX_BITS_PER_AXIS: u32 = 32;

/// Describes the tile grid derived from a graph's bounds and a target
/// resolution, and the mixed fanout-16/fanout-4 tree built on top of it.
#[derive(Debug, Clone)]
pub struct TileGeometry {
    bounds: Rect<f64>,
    bits_per_axis: u32,
    level_bits: Vec<u32>,
    delta_lat: f64,
    delta_lon: f64,
    morton: MortonEncoder,
}

impl TileGeometry {
    /// Derives a tile grid and tree schedule from `bounds` such that a leaf
    /// tile's diagonal is no larger than `min_resolution_in_meter`.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::InvalidGraphBounds`] if `bounds` is
    /// degenerate (zero width or height), and
    /// [`LocationIndexError::KeySpaceOverflow`] if the requested resolution
    /// would need more than 64 bits of key space.
    pub fn prepare_algo(bounds: Rect<f64>, min_resolution_in_meter: u32) -> Result<Self> {
        if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
            return Err(LocationIndexError::InvalidGraphBounds(format!(
                "degenerate bounds: width={}, height={}",
                bounds.width(),
                bounds.height()
            )));
        }

        let mean_lat = (bounds.min().y + bounds.max().y) / 2.0;
        let lon_meters_per_degree =
            (mean_lat.to_radians().cos() * METERS_PER_DEGREE_LAT).max(1e-6);

        let height_m = bounds.height() * METERS_PER_DEGREE_LAT;
        let width_m = bounds.width() * lon_meters_per_degree;

        let resolution = f64::from(min_resolution_in_meter);
        let lat_divisions = (height_m / resolution).max(1.0);
        let lon_divisions = (width_m / resolution).max(1.0);

        let bits_lat = lat_divisions.log2().ceil().max(0.0);
        let bits_lon = lon_divisions.log2().ceil().max(0.0);
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bits_per_axis = bits_lat.max(bits_lon).max(1.0) as u32;

        if bits_per_axis > MAX_BITS_PER_AXIS {
            return Err(LocationIndexError::KeySpaceOverflow {
                total_bits: 2 * bits_per_axis,
            });
        }

        let level_bits = level_schedule(2 * bits_per_axis);
        #[expect(clippy::cast_precision_loss)]
        let divisions = f64::from(1u32 << bits_per_axis);
        let delta_lat = bounds.height() / divisions;
        let delta_lon = bounds.width() / divisions;
        let morton = MortonEncoder::new(bounds, bits_per_axis);

        Ok(Self {
            bounds,
            bits_per_axis,
            level_bits,
            delta_lat,
            delta_lon,
            morton,
        })
    }

    #[must_use]
    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }

    #[must_use]
    pub fn delta_lat(&self) -> f64 {
        self.delta_lat
    }

    #[must_use]
    pub fn delta_lon(&self) -> f64 {
        self.delta_lon
    }

    /// Total bits in a fully-qualified key (`2 * bits_per_axis`).
    #[must_use]
    pub fn total_bits(&self) -> u32 {
        self.morton.bits()
    }

    /// Number of levels in the constructed tree, root first.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.level_bits.len()
    }

    /// Number of children a node at `level` has (16, except possibly the
    /// deepest level, which may be 4).
    #[must_use]
    pub fn entries_at(&self, level: usize) -> u32 {
        1 << self.level_bits[level]
    }

    /// Right-shift that isolates `level`'s field from a fully-qualified,
    /// non-reversed key.
    #[must_use]
    pub fn get_shift(&self, level: usize) -> u32 {
        self.level_bits[level + 1..].iter().sum()
    }

    /// Mask (applied after shifting) that isolates `level`'s field.
    #[must_use]
    pub fn get_bitmask(&self, level: usize) -> u64 {
        u64::from(self.entries_at(level) - 1)
    }

    /// The child index `level` names within a non-reversed key.
    #[must_use]
    pub fn cell_index(&self, forward_key: u64, level: usize) -> usize {
        ((forward_key >> self.get_shift(level)) & self.get_bitmask(level)) as usize
    }

    /// Right-shift that isolates `level`'s field from a reversed
    /// (traversal-path) key: unlike [`TileGeometry::get_shift`], this grows
    /// with depth, since reversing the key moved the coarsest (root) field
    /// down to the low bits.
    #[must_use]
    pub fn path_shift(&self, level: usize) -> u32 {
        self.level_bits[..level].iter().sum()
    }

    /// The child index `level` names within a reversed traversal-path key
    /// (as produced by [`TileGeometry::create_reverse_key`]).
    #[must_use]
    pub fn path_cell_index(&self, reverse_key: u64, level: usize) -> usize {
        ((reverse_key >> self.path_shift(level)) & self.get_bitmask(level)) as usize
    }

    /// Encodes `(lat, lon)` into the grid's forward Morton key.
    #[must_use]
    pub fn forward_key(&self, lat: f64, lon: f64) -> u64 {
        self.morton.encode(lat, lon)
    }

    /// The largest valid per-axis grid coordinate.
    #[must_use]
    pub fn max_grid_index(&self) -> u64 {
        self.morton.max_grid_index()
    }

    /// Converts a coordinate to its (row, column) grid cell, clamped to the
    /// valid range. Row grows with latitude, column with longitude.
    #[must_use]
    pub fn to_grid(&self, lat: f64, lon: f64) -> (u64, u64) {
        let max_index = self.max_grid_index();
        let row_frac = (lat - self.bounds.min().y) / self.bounds.height();
        let col_frac = (lon - self.bounds.min().x) / self.bounds.width();
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let row = (row_frac.clamp(0.0, 1.0) * max_index as f64) as u64;
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let col = (col_frac.clamp(0.0, 1.0) * max_index as f64) as u64;
        (row.min(max_index), col.min(max_index))
    }

    /// Encodes a (row, column) grid cell into a bit-reversed traversal-path
    /// key, bypassing the lat/lon -> grid conversion `create_reverse_key`
    /// performs. Used by the rasterizer, which walks grid cells directly.
    #[must_use]
    pub fn create_reverse_key_for_grid(&self, row: u64, col: u64) -> u64 {
        self.morton.reverse_key(self.morton.encode_grid(row, col))
    }

    /// Encodes `(lat, lon)` into a bit-reversed key, used as a tree
    /// traversal path: each 4 (or, at the leaf, 2) bit group read from the
    /// low end names the child index at progressively deeper levels.
    #[must_use]
    pub fn create_reverse_key(&self, lat: f64, lon: f64) -> u64 {
        self.morton.reverse_key(self.forward_key(lat, lon))
    }

    /// Decodes a forward key back to the center of the cell it names at
    /// full depth.
    #[must_use]
    pub fn key_to_coord(&self, forward_key: u64) -> Coord<f64> {
        self.morton.decode(forward_key)
    }

    /// Number of bits consumed at `level`.
    #[must_use]
    pub fn level_bits_at(&self, level: usize) -> u32 {
        self.level_bits[level]
    }

    /// The sub-rectangle named by a partial lat/lon grid prefix, as
    /// accumulated while descending the tree. `lat_bits`/`lon_bits` is how
    /// many bits of each axis's grid coordinate the prefix fixes so far;
    /// zero bits means the full bounds.
    #[must_use]
    #[expect(clippy::similar_names)]
    pub fn bounds_for_prefix(&self, lat_prefix: u64, lat_bits: u32, lon_prefix: u64, lon_bits: u32) -> Rect<f64> {
        #[expect(clippy::cast_precision_loss)]
        let lat_divisions = (1u64 << lat_bits) as f64;
        #[expect(clippy::cast_precision_loss)]
        let lon_divisions = (1u64 << lon_bits) as f64;
        #[expect(clippy::cast_precision_loss)]
        let lat0 = self.bounds.min().y + (lat_prefix as f64 / lat_divisions) * self.bounds.height();
        #[expect(clippy::cast_precision_loss)]
        let lat1 =
            self.bounds.min().y + ((lat_prefix + 1) as f64 / lat_divisions) * self.bounds.height();
        #[expect(clippy::cast_precision_loss)]
        let lon0 = self.bounds.min().x + (lon_prefix as f64 / lon_divisions) * self.bounds.width();
        #[expect(clippy::cast_precision_loss)]
        let lon1 =
            self.bounds.min().x + ((lon_prefix + 1) as f64 / lon_divisions) * self.bounds.width();
        Rect::new(Coord { x: lon0, y: lat0 }, Coord { x: lon1, y: lat1 })
    }

    /// The bounding rectangle of the leaf tile containing `(lat, lon)`.
    #[must_use]
    pub fn leaf_bounds_for(&self, lat: f64, lon: f64) -> Rect<f64> {
        let key = self.forward_key(lat, lon);
        let center = self.key_to_coord(key);
        Rect::new(
            Coord {
                x: center.x - self.delta_lon / 2.0,
                y: center.y - self.delta_lat / 2.0,
            },
            Coord {
                x: center.x + self.delta_lon / 2.0,
                y: center.y + self.delta_lat / 2.0,
            },
        )
    }

    /// The minimum possible normalized distance from `q` to anything
    /// indexed outside `q`'s own leaf tile.
    ///
    /// Used to terminate the expanding-ring search early: once the best
    /// snap found so far is closer than this bound, widening the ring
    /// further cannot improve on it.
    #[must_use]
    pub fn calculate_r_min(&self, q: Coord<f64>, calc: &dyn DistanceCalculator) -> f64 {
        let tile = self.leaf_bounds_for(q.y, q.x);
        let dist_to_south = calc.calc_dist(q.y, q.x, tile.min().y, q.x);
        let dist_to_north = calc.calc_dist(q.y, q.x, tile.max().y, q.x);
        let dist_to_west = calc.calc_dist(q.y, q.x, q.y, tile.min().x);
        let dist_to_east = calc.calc_dist(q.y, q.x, q.y, tile.max().x);
        dist_to_south
            .min(dist_to_north)
            .min(dist_to_west)
            .min(dist_to_east)
    }

    /// Diagonal of the full graph bounds, in meters, computed precisely
    /// (used only at construction time, where cost doesn't matter).
    #[must_use]
    pub fn bounds_diagonal_meters(&self) -> f64 {
        PreciseDistance.calc_dist(
            self.bounds.min().y,
            self.bounds.min().x,
            self.bounds.max().y,
            self.bounds.max().x,
        )
    }
}

fn level_schedule(total_bits: u32) -> Vec<u32> {
    let mut levels = vec![STANDARD_LEVEL_BITS; (total_bits / STANDARD_LEVEL_BITS) as usize];
    if total_bits % STANDARD_LEVEL_BITS == TRAILING_LEVEL_BITS {
        levels.push(TRAILING_LEVEL_BITS);
    }
    levels
}
