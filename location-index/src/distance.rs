//! Distance calculator collaborator.
//!
//! Two implementations are provided, mirroring the two the index needs: a
//! fast planar approximation (the default for queries) and a precise
//! earth-model calculator (used when sizing the index from graph bounds, and
//! swappable in for queries via [`crate::IndexConfig::approximation`]).
//!
//! All comparisons inside the query engine happen in "normalized" distance
//! space: a monotonic, order-preserving transform of the true distance that
//! avoids repeated trigonometry. Callers must never compare normalized
//! values produced by different calculators.

use geo::{Coord, Distance, Haversine};

/// Meters per degree of latitude; constant because meridians are
/// (approximately) equally spaced regardless of latitude.
pub(crate) const METERS_PER_DEGREE_LAT: f64 = 111_132.954;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// The result of projecting a query point onto a segment.
#[derive(Debug, Clone, Copy)]
pub struct NormalizedEdgeDistance {
    /// Normalized (order-preserving) distance from the query to the foot of
    /// the perpendicular, clamped onto the segment.
    pub normalized_distance: f64,
    /// Fraction along the segment `a -> b`, in `[0, 1]`, of the
    /// (unclamped) foot of the perpendicular. Used to decide validity and
    /// to compute the snapped point's coordinate afterwards.
    pub fraction: f64,
}

/// The distance calculator collaborator.
pub trait DistanceCalculator {
    /// Great-circle-ish distance between two lat/lon points, in meters.
    fn calc_dist(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64;

    /// Order-preserving transform of a physical distance (meters) used for
    /// internal comparisons.
    fn calc_normalized_dist(&self, dist_in_meter: f64) -> f64;

    /// Inverse of [`DistanceCalculator::calc_normalized_dist`].
    fn calc_denormalized_dist(&self, normalized_dist: f64) -> f64;

    /// Projects `q` onto the segment `a -> b` and returns the normalized
    /// distance to the (clamped) foot of the perpendicular, plus the
    /// unclamped fraction along the segment.
    fn calc_normalized_edge_distance(
        &self,
        q: Coord<f64>,
        a: Coord<f64>,
        b: Coord<f64>,
    ) -> NormalizedEdgeDistance;

    /// Whether the foot of the perpendicular from `q` onto `a -> b` actually
    /// lies on the segment (as opposed to off one of its ends).
    fn valid_edge_distance(&self, q: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> bool {
        let fraction = self.calc_normalized_edge_distance(q, a, b).fraction;
        (0.0..=1.0).contains(&fraction)
    }

    /// Whether a segment between the two longitudes crosses the
    /// antimeridian, in which case the index treats it as unindexable.
    fn is_cross_boundary(&self, lon1: f64, lon2: f64) -> bool {
        (lon1 - lon2).abs() > 180.0
    }

    /// Circumference of the circle of latitude at `lat`, in meters.
    fn calc_circumference(&self, lat: f64) -> f64 {
        2.0 * std::f64::consts::PI * EARTH_RADIUS_M * lat.to_radians().cos()
    }
}

fn project_planar(
    q: Coord<f64>,
    a: Coord<f64>,
    b: Coord<f64>,
    lon_scale: f64,
) -> (f64, Coord<f64>) {
    // Scale longitude by cos(lat) so that the projection happens in an
    // approximately-Euclidean local frame.
    let ax = a.x * lon_scale;
    let bx = b.x * lon_scale;
    let qx = q.x * lon_scale;

    let dx = bx - ax;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;

    let fraction = if len_sq == 0.0 {
        0.0
    } else {
        ((qx - ax) * dx + (q.y - a.y) * dy) / len_sq
    };

    let clamped = fraction.clamp(0.0, 1.0);
    let foot = Coord {
        x: a.x + clamped * (b.x - a.x),
        y: a.y + clamped * (b.y - a.y),
    };

    (fraction, foot)
}

/// Fast planar approximation, accurate over short distances (up to a few
/// kilometers); does not account for the antimeridian.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarApproximateDistance;

impl DistanceCalculator for PlanarApproximateDistance {
    fn calc_dist(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let lon_scale = ((lat1 + lat2) / 2.0).to_radians().cos() * METERS_PER_DEGREE_LAT;
        let dlat = (lat2 - lat1) * METERS_PER_DEGREE_LAT;
        let dlon = (lon2 - lon1) * lon_scale;
        dlat.hypot(dlon)
    }

    fn calc_normalized_dist(&self, dist_in_meter: f64) -> f64 {
        dist_in_meter * dist_in_meter
    }

    fn calc_denormalized_dist(&self, normalized_dist: f64) -> f64 {
        normalized_dist.max(0.0).sqrt()
    }

    fn calc_normalized_edge_distance(
        &self,
        q: Coord<f64>,
        a: Coord<f64>,
        b: Coord<f64>,
    ) -> NormalizedEdgeDistance {
        let lon_scale = q.y.to_radians().cos() * METERS_PER_DEGREE_LAT;
        let (fraction, foot) = project_planar(q, a, b, lon_scale / METERS_PER_DEGREE_LAT);
        let d = self.calc_dist(q.y, q.x, foot.y, foot.x);
        NormalizedEdgeDistance {
            normalized_distance: self.calc_normalized_dist(d),
            fraction,
        }
    }
}

/// Precise earth-model calculator (haversine), used when sizing the index
/// from graph bounds and optionally for queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreciseDistance;

impl DistanceCalculator for PreciseDistance {
    fn calc_dist(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        Haversine.distance(
            geo::Point::new(lon1, lat1),
            geo::Point::new(lon2, lat2),
        )
    }

    fn calc_normalized_dist(&self, dist_in_meter: f64) -> f64 {
        // No repeated-sqrt penalty to avoid here; the identity transform is
        // already order-preserving.
        dist_in_meter
    }

    fn calc_denormalized_dist(&self, normalized_dist: f64) -> f64 {
        normalized_dist
    }

    fn calc_normalized_edge_distance(
        &self,
        q: Coord<f64>,
        a: Coord<f64>,
        b: Coord<f64>,
    ) -> NormalizedEdgeDistance {
        // Edges are short relative to the earth's radius, so the planar
        // projection is an adequate way to locate the foot of the
        // perpendicular; only the final distance uses the precise model.
        let lon_scale = q.y.to_radians().cos();
        let (fraction, foot) = project_planar(q, a, b, lon_scale);
        NormalizedEdgeDistance {
            normalized_distance: self.calc_dist(q.y, q.x, foot.y, foot.x),
            fraction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::coord;

    #[test]
    fn planar_round_trip_normalization_preserves_order() {
        let calc = PlanarApproximateDistance;
        let near = calc.calc_dist(0.0, 0.0, 0.0001, 0.0001);
        let far = calc.calc_dist(0.0, 0.0, 0.01, 0.01);
        assert!(calc.calc_normalized_dist(near) < calc.calc_normalized_dist(far));
        let denorm = calc.calc_denormalized_dist(calc.calc_normalized_dist(near));
        assert!((denorm - near).abs() < 1e-6);
    }

    #[test]
    fn valid_edge_distance_detects_off_segment_projection() {
        let calc = PlanarApproximateDistance;
        let a = coord! { x: 0.0, y: 0.0 };
        let b = coord! { x: 0.001, y: 0.0 };

        // Well within the segment.
        assert!(calc.valid_edge_distance(coord! { x: 0.0005, y: 0.0001 }, a, b));

        // Past the far end.
        assert!(!calc.valid_edge_distance(coord! { x: 0.01, y: 0.0001 }, a, b));
    }

    #[test]
    fn cross_boundary_detects_antimeridian() {
        let calc = PlanarApproximateDistance;
        assert!(calc.is_cross_boundary(179.9, -179.9));
        assert!(!calc.is_cross_boundary(10.0, 10.5));
    }
}
