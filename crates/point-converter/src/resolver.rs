//! Cell-centre coordinates in the output CRS.

use std::num::NonZeroUsize;
use std::sync::Arc;

use grid_source::GridGeometry;
use lru::LruCache;
use projection::{CoordinateTransform, Crs, ProjectionError, TransformProvider};
use tracing::debug;

/// Hit/miss counters of the transform cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Builds and memoises transform pipelines per `(from, to)` CRS pair.
///
/// One resolver belongs to one run; the cache is bounded and evicts the
/// least recently used pipeline.
pub struct CoordinateResolver {
    provider: Arc<dyn TransformProvider>,
    cache: LruCache<(String, String), Arc<dyn CoordinateTransform>>,
    hits: u64,
    misses: u64,
}

impl CoordinateResolver {
    pub fn new(provider: Arc<dyn TransformProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Transform pipeline from `from` to `to`, built on first use.
    pub fn transform_for(
        &mut self,
        from: &Crs,
        to: &Crs,
    ) -> Result<Arc<dyn CoordinateTransform>, ProjectionError> {
        let key = (from.cache_key(), to.cache_key());
        if let Some(transform) = self.cache.get(&key) {
            self.hits += 1;
            debug!(from = %from, to = %to, "Transform cache hit");
            return Ok(Arc::clone(transform));
        }

        self.misses += 1;
        let transform = self.provider.create(from, to)?;
        debug!(from = %from, to = %to, identity = transform.is_identity(), "Transform cache miss");
        self.cache.put(key, Arc::clone(&transform));
        Ok(transform)
    }

    /// Reproject one coordinate.
    pub fn reproject(
        &mut self,
        coord: (f64, f64),
        from: &Crs,
        to: &Crs,
    ) -> Result<(f64, f64), ProjectionError> {
        self.transform_for(from, to)?.transform(coord.0, coord.1)
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.cache.len(),
        }
    }
}

/// Centre of cell `(row, col)` in the grid's own CRS.
pub fn cell_center(geometry: &GridGeometry, row: usize, col: usize) -> (f64, f64) {
    geometry.cell_center(row, col)
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Pending,
    Resolved(f64, f64),
    Unprojectable,
}

/// Output coordinates of every cell of one grid.
///
/// When the grid is reprojected and small enough, results are kept so later
/// layers reuse them; otherwise each call recomputes.
pub struct CellLocator {
    geometry: GridGeometry,
    transform: Arc<dyn CoordinateTransform>,
    slots: Option<Vec<Slot>>,
}

impl CellLocator {
    pub fn new(
        geometry: GridGeometry,
        transform: Arc<dyn CoordinateTransform>,
        max_cached_cells: usize,
    ) -> Self {
        let cells = geometry.len();
        let slots = if !transform.is_identity() && cells <= max_cached_cells {
            Some(vec![Slot::Pending; cells])
        } else {
            None
        };
        debug!(cells, cached = slots.is_some(), "Prepared cell locator");
        Self {
            geometry,
            transform,
            slots,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.slots.is_some()
    }

    /// Output coordinate of a cell centre.
    pub fn locate(&mut self, row: usize, col: usize) -> Result<(f64, f64), ProjectionError> {
        let index = row * self.geometry.cols + col;
        let slot = self.slots.as_ref().and_then(|s| s.get(index).copied());
        match slot {
            Some(Slot::Resolved(x, y)) => Ok((x, y)),
            // Recompute to recover the error
            Some(Slot::Unprojectable) | None => self.compute(row, col),
            Some(Slot::Pending) => {
                let result = self.compute(row, col);
                if let Some(slots) = self.slots.as_mut() {
                    slots[index] = match result {
                        Ok((x, y)) => Slot::Resolved(x, y),
                        Err(_) => Slot::Unprojectable,
                    };
                }
                result
            }
        }
    }

    fn compute(&self, row: usize, col: usize) -> Result<(f64, f64), ProjectionError> {
        let (x, y) = self.geometry.cell_center(row, col);
        self.transform.transform(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use projection::{BuiltinTransforms, IdentityTransform};
    use test_utils::assert_coords_approx_eq;

    fn resolver() -> CoordinateResolver {
        CoordinateResolver::new(Arc::new(BuiltinTransforms), 2)
    }

    #[test]
    fn test_transform_cache_hits() {
        let mut resolver = resolver();
        let wgs84 = Crs::wgs84();
        let mercator = Crs::parse("EPSG:3857").unwrap();

        resolver.transform_for(&wgs84, &mercator).unwrap();
        resolver.transform_for(&wgs84, &mercator).unwrap();
        let stats = resolver.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_transform_cache_is_bounded() {
        let mut resolver = resolver();
        let codes = ["EPSG:4326", "EPSG:3857", "EPSG:5070"];
        for to in codes {
            resolver
                .transform_for(&Crs::wgs84(), &Crs::parse(to).unwrap())
                .unwrap();
        }
        assert_eq!(resolver.stats().entries, 2);
    }

    #[test]
    fn test_reproject_round_trip() {
        let mut resolver = resolver();
        let wgs84 = Crs::wgs84();
        let albers = Crs::parse("EPSG:5070").unwrap();
        let projected = resolver.reproject((-105.0, 40.0), &wgs84, &albers).unwrap();
        let back = resolver.reproject(projected, &albers, &wgs84).unwrap();
        assert_coords_approx_eq!(back, (-105.0, 40.0), 1e-6);
    }

    #[test]
    fn test_reproject_out_of_domain() {
        let mut resolver = resolver();
        let err = resolver
            .reproject((0.0, 91.0), &Crs::wgs84(), &Crs::parse("EPSG:3857").unwrap())
            .unwrap_err();
        assert!(matches!(err, ProjectionError::OutOfDomain { .. }));
    }

    #[test]
    fn test_locator_identity_is_uncached() {
        let geometry = GridGeometry::upper_left(0.0, 0.0, 1.0, 1.0, 2, 2);
        let mut locator = CellLocator::new(geometry, Arc::new(IdentityTransform), 100);
        assert!(!locator.is_cached());
        assert_eq!(locator.locate(1, 0).unwrap(), (0.5, -1.5));
    }

    #[test]
    fn test_locator_caches_reprojected_cells() {
        let geometry = GridGeometry::upper_left(-105.0, 41.0, 1.0, 1.0, 2, 2);
        let mut resolver = resolver();
        let transform = resolver
            .transform_for(&Crs::wgs84(), &Crs::parse("EPSG:3857").unwrap())
            .unwrap();
        let mut locator = CellLocator::new(geometry, transform, 4);
        assert!(locator.is_cached());
        let first = locator.locate(0, 1).unwrap();
        assert_eq!(locator.locate(0, 1).unwrap(), first);

        let transform = resolver
            .transform_for(&Crs::wgs84(), &Crs::parse("EPSG:3857").unwrap())
            .unwrap();
        let too_big = CellLocator::new(geometry, transform, 3);
        assert!(!too_big.is_cached());
    }

    #[test]
    fn test_locator_repeats_errors() {
        // Top row sits beyond the Web Mercator latitude limit
        let geometry = GridGeometry::upper_left(0.0, 86.0, 1.0, 1.0, 2, 1);
        let mut resolver = resolver();
        let transform = resolver
            .transform_for(&Crs::wgs84(), &Crs::parse("EPSG:3857").unwrap())
            .unwrap();
        let mut locator = CellLocator::new(geometry, transform, 10);
        assert!(locator.locate(0, 0).is_err());
        assert!(locator.locate(0, 0).is_err());
        assert!(locator.locate(1, 0).is_ok());
    }
}
