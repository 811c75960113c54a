use crate::error::{LocationIndexError, Result};

/// Tunable knobs for building and querying a [`crate::LocationIndex`].
///
/// Mirrors the defaults of the underlying algorithm: a 300m leaf tile
/// target and a search radius of two ring expansions.
#[derive(Debug, Clone, Copy)]
pub struct IndexConfig {
    /// Target width of a leaf tile, in meters. Must be positive.
    pub min_resolution_in_meter: u32,
    /// Number of expanding tile rings to search before giving up.
    /// Coerced up to an even number >= 2 (see [`IndexConfig::max_region_search`] docs
    /// on why evenness matters for early termination).
    pub max_region_search: u32,
    /// Use the fast planar distance approximation for queries (`true`, the default)
    /// or the precise earth-model calculator (`false`).
    pub approximation: bool,
    /// Initial capacity, in bytes, to reserve in the flat store backing file.
    pub segment_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            min_resolution_in_meter: 300,
            max_region_search: 4,
            approximation: true,
            segment_size: 1 << 20,
        }
    }
}

impl IndexConfig {
    /// Validates the configuration and normalizes `max_region_search` to an even
    /// number >= 2.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::InvalidConfiguration`] if the resolution is
    /// zero or the region search size is zero.
    pub fn validated(mut self) -> Result<Self> {
        if self.min_resolution_in_meter == 0 {
            return Err(LocationIndexError::InvalidConfiguration(
                "minResolutionInMeter must be positive".to_string(),
            ));
        }
        if self.max_region_search == 0 {
            return Err(LocationIndexError::InvalidConfiguration(
                "maxRegionSearch must be at least 1".to_string(),
            ));
        }
        self.max_region_search = self.max_region_search.max(2);
        if self.max_region_search % 2 != 0 {
            self.max_region_search += 1;
        }
        Ok(self)
    }
}
