//! Morton (Z-order) encoder collaborator.
//!
//! Bound to a fixed bounding rectangle and bit width, this maps a
//! lat/lon pair to an interleaved integer key whose prefix bits identify
//! coarse quadrants and whose suffix bits refine them - the usual
//! Z-order property of keeping spatially close points numerically close.

use geo::{Coord, Rect};

/// Interleaves the low `bits` bits of `lat_grid` and `lon_grid`, placing the
/// latitude bit at the even position and the longitude bit at the odd
/// position of each pair (bit `2i` = lat bit `i`, bit `2i+1` = lon bit `i`).
fn interleave(lat_grid: u64, lon_grid: u64, bits: u32) -> u64 {
    let mut key = 0u64;
    for i in 0..bits {
        key |= ((lat_grid >> i) & 1) << (2 * i);
        key |= ((lon_grid >> i) & 1) << (2 * i + 1);
    }
    key
}

fn deinterleave(key: u64, bits: u32) -> (u64, u64) {
    let mut lat_grid = 0u64;
    let mut lon_grid = 0u64;
    for i in 0..bits {
        lat_grid |= ((key >> (2 * i)) & 1) << i;
        lon_grid |= ((key >> (2 * i + 1)) & 1) << i;
    }
    (lat_grid, lon_grid)
}

/// A Morton encoder bound to a bounding box and a per-axis bit width.
#[derive(Debug, Clone, Copy)]
pub struct MortonEncoder {
    bounds: Rect<f64>,
    bits_per_axis: u32,
}

impl MortonEncoder {
    #[must_use]
    pub fn new(bounds: Rect<f64>, bits_per_axis: u32) -> Self {
        Self {
            bounds,
            bits_per_axis,
        }
    }

    /// Total bits occupied by an encoded key (`2 * bits_per_axis`).
    #[must_use]
    pub fn bits(&self) -> u32 {
        2 * self.bits_per_axis
    }

    fn grid_extent(&self) -> u64 {
        (1u64 << self.bits_per_axis) - 1
    }

    /// The largest valid per-axis grid coordinate (`2^bits_per_axis - 1`).
    #[must_use]
    pub fn max_grid_index(&self) -> u64 {
        self.grid_extent()
    }

    /// Encodes an already-computed grid coordinate pair directly, clamping
    /// each axis to the valid range. Used by the rasterizer, which derives
    /// grid coordinates itself via Bresenham stepping rather than through
    /// [`MortonEncoder::encode`].
    #[must_use]
    pub fn encode_grid(&self, lat_grid: u64, lon_grid: u64) -> u64 {
        let extent = self.grid_extent();
        interleave(lat_grid.min(extent), lon_grid.min(extent), self.bits_per_axis)
    }

    /// Encodes `(lat, lon)` into a forward Morton key.
    #[must_use]
    pub fn encode(&self, lat: f64, lon: f64) -> u64 {
        let extent = self.grid_extent();
        let lat_frac = (lat - self.bounds.min().y) / self.bounds.height();
        let lon_frac = (lon - self.bounds.min().x) / self.bounds.width();
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let lat_grid = ((lat_frac.clamp(0.0, 1.0)) * extent as f64) as u64;
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let lon_grid = ((lon_frac.clamp(0.0, 1.0)) * extent as f64) as u64;
        interleave(lat_grid.min(extent), lon_grid.min(extent), self.bits_per_axis)
    }

    /// Decodes a forward Morton key back to the center of the grid cell it
    /// names.
    #[must_use]
    pub fn decode(&self, key: u64) -> Coord<f64> {
        let extent = self.grid_extent();
        let (lat_grid, lon_grid) = deinterleave(key, self.bits_per_axis);
        #[expect(clippy::cast_precision_loss)]
        let lat_frac = (lat_grid as f64 + 0.5) / (extent as f64 + 1.0);
        #[expect(clippy::cast_precision_loss)]
        let lon_frac = (lon_grid as f64 + 0.5) / (extent as f64 + 1.0);
        Coord {
            x: self.bounds.min().x + lon_frac * self.bounds.width(),
            y: self.bounds.min().y + lat_frac * self.bounds.height(),
        }
    }

    /// Bit-reverses `key` across this encoder's configured bit width, so
    /// that the bits which were the coarsest (most-significant) occupy the
    /// least-significant position of the result.
    #[must_use]
    pub fn reverse_key(&self, key: u64) -> u64 {
        reverse_bits(key, self.bits())
    }
}

/// Reverses the low `width` bits of `value` (bits at or above `width` are
/// assumed to be zero and are discarded).
#[must_use]
pub fn reverse_bits(value: u64, width: u32) -> u64 {
    let mut reversed = 0u64;
    for i in 0..width {
        if value & (1 << i) != 0 {
            reversed |= 1 << (width - 1 - i);
        }
    }
    reversed
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Rect, coord};
    use proptest::{prop_assert, proptest};

    fn encoder() -> MortonEncoder {
        MortonEncoder::new(
            Rect::new(coord! { x: -1.0, y: -1.0 }, coord! { x: 1.0, y: 1.0 }),
            10,
        )
    }

    #[test]
    fn decode_of_encode_lands_in_same_cell() {
        let enc = encoder();
        for &(lat, lon) in &[(0.0, 0.0), (0.999, -0.999), (-0.5, 0.5), (0.1234, -0.8765)] {
            let key = enc.encode(lat, lon);
            let decoded = enc.decode(key);
            let re_key = enc.encode(decoded.y, decoded.x);
            assert_eq!(key, re_key, "round trip should stay in the same cell");
        }
    }

    #[test]
    fn reverse_bits_is_involution() {
        let width = 16;
        let value = 0b1010_1100_0011_0101u64 & ((1 << width) - 1);
        let once = reverse_bits(value, width);
        let twice = reverse_bits(once, width);
        assert_eq!(twice, value);
    }

    proptest! {
        #[test]
        fn decode_of_encode_always_lands_in_the_same_cell(
            lat in -1.0f64..1.0,
            lon in -1.0f64..1.0,
        ) {
            let enc = encoder();
            let key = enc.encode(lat, lon);
            let decoded = enc.decode(key);
            let re_key = enc.encode(decoded.y, decoded.x);
            prop_assert!(key == re_key, "round trip changed cell: {key} -> {re_key}");
        }
    }

    #[test]
    fn reversed_key_puts_coarsest_bits_at_low_end() {
        let enc = encoder();
        // The most-significant bit pair of a forward key comes from the top
        // bit of each axis's grid coordinate, i.e. which half of the bounds
        // the point falls in.
        let key_west = enc.encode(0.0, -0.9);
        let key_east = enc.encode(0.0, 0.9);
        let rev_west = enc.reverse_key(key_west);
        let rev_east = enc.reverse_key(key_east);
        // Bit 1 (lon) of the reversed key should differ between the halves.
        assert_ne!(rev_west & 0b10, rev_east & 0b10);
    }
}
