//! Region boundaries and the geometric queries the sampler relies on.

use std::path::PathBuf;

use geo::{
    Area, BooleanOps, BoundingRect, Contains, Coord, LineString, MapCoords, MultiPolygon, Point,
    Polygon, Rect,
};
use thiserror::Error;
use tracing::debug;

use crate::crs::{Crs, Transformer};

/// Errors raised while building, reprojecting or combining regions.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("Failed to read shapefile {path}: {source}")]
    ShapefileRead {
        path: PathBuf,
        source: shapefile::Error,
    },

    #[error("Failed to write shapefile {path}: {source}")]
    ShapefileWrite {
        path: PathBuf,
        source: shapefile::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid attribute table for {path}: {message}")]
    AttributeTable { path: PathBuf, message: String },

    #[error("No feature with {field} = {value:?} in {path}")]
    FeatureNotFound {
        path: PathBuf,
        field: String,
        value: String,
    },

    #[error("Unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    #[error("Reprojection failed: {0}")]
    Reprojection(String),

    #[error("Intersection of regions {left:?} and {right:?} is empty")]
    EmptyIntersection { left: String, right: String },

    #[error("Region {0:?} has no area")]
    EmptyRegion(String),

    #[error("Polygon {name:?} needs at least 3 vertices, got {vertices}")]
    DegeneratePolygon { name: String, vertices: usize },
}

/// What the sampler needs from a boundary: a box to draw from and a
/// point-in-region test. Implementors must be safe to share across workers.
pub trait ContainmentOracle: Send + Sync {
    /// Strict containment test.
    fn contains(&self, point: &Point<f64>) -> bool;

    /// Box that encloses every contained point.
    fn bounding_rect(&self) -> Rect<f64>;

    /// Reference the coordinates are expressed in.
    fn crs(&self) -> Crs;
}

/// An immutable sampling domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    name: String,
    geometry: MultiPolygon<f64>,
    crs: Crs,
    bounds: Rect<f64>,
}

impl Region {
    /// Wraps a multi-polygon. Fails if it has no extent.
    pub fn new(
        name: impl Into<String>,
        geometry: MultiPolygon<f64>,
        crs: Crs,
    ) -> Result<Self, GeometryError> {
        let name = name.into();
        let bounds = geometry
            .bounding_rect()
            .ok_or_else(|| GeometryError::EmptyRegion(name.clone()))?;

        Ok(Self {
            name,
            geometry,
            crs,
            bounds,
        })
    }

    /// Axis-aligned rectangle from its lower-left and upper-right corners, as (x, y).
    pub fn rectangle(
        name: impl Into<String>,
        lower_left: (f64, f64),
        upper_right: (f64, f64),
        crs: Crs,
    ) -> Result<Self, GeometryError> {
        let rect = Rect::new(
            Coord {
                x: lower_left.0,
                y: lower_left.1,
            },
            Coord {
                x: upper_right.0,
                y: upper_right.1,
            },
        );
        Self::new(name, MultiPolygon::new(vec![rect.to_polygon()]), crs)
    }

    /// Simple polygon from its exterior ring, as (x, y) vertices. The ring is
    /// closed automatically.
    pub fn from_coords(
        name: impl Into<String>,
        coords: &[(f64, f64)],
        crs: Crs,
    ) -> Result<Self, GeometryError> {
        let name = name.into();
        if coords.len() < 3 {
            return Err(GeometryError::DegeneratePolygon {
                name,
                vertices: coords.len(),
            });
        }

        let exterior = LineString::from(coords.to_vec());
        Self::new(
            name,
            MultiPolygon::new(vec![Polygon::new(exterior, vec![])]),
            crs,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn polygons(&self) -> &[Polygon<f64>] {
        &self.geometry.0
    }

    /// Strict containment: points on the boundary are outside.
    #[inline]
    pub fn contains(&self, point: &Point<f64>) -> bool {
        self.bounds.contains(point) && self.geometry.contains(point)
    }

    /// `(xmin, ymin, xmax, ymax)` in the region's CRS.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let min = self.bounds.min();
        let max = self.bounds.max();
        (min.x, min.y, max.x, max.y)
    }

    pub fn bounding_rect(&self) -> Rect<f64> {
        self.bounds
    }

    /// Planar area in squared CRS units.
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    /// Share of the bounding box covered by the region. Rejection sampling
    /// needs on average `1 / fill_ratio` draws per accepted point.
    pub fn fill_ratio(&self) -> f64 {
        let bbox_area = self.bounds.width() * self.bounds.height();
        if bbox_area <= 0.0 {
            return 0.0;
        }
        self.area() / bbox_area
    }

    /// Keeps only the polygon with the largest area, e.g. a mainland without
    /// its islands.
    pub fn largest_component(&self) -> Result<Region, GeometryError> {
        let largest = self
            .geometry
            .0
            .iter()
            .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
            .cloned()
            .ok_or_else(|| GeometryError::EmptyRegion(self.name.clone()))?;

        debug!(
            region = %self.name,
            components = self.geometry.0.len(),
            kept_area = largest.unsigned_area(),
            "Selected largest component"
        );

        Region::new(self.name.clone(), MultiPolygon::new(vec![largest]), self.crs)
    }

    /// Reprojects every vertex into `target`.
    pub fn to_crs(&self, target: Crs) -> Result<Region, GeometryError> {
        if target == self.crs {
            return Ok(self.clone());
        }

        let transformer = Transformer::new(self.crs, target)?;
        let transformer = &transformer;
        let geometry = self.geometry.try_map_coords(|coord: Coord<f64>| {
            let (x, y) = transformer.transform(coord.x, coord.y)?;
            Ok::<_, GeometryError>(Coord { x, y })
        })?;

        Region::new(self.name.clone(), geometry, target)
    }

    /// Intersection of `self` and `other`, computed in `crs`.
    pub fn intersect(&self, other: &Region, crs: Crs) -> Result<Region, GeometryError> {
        intersect(self, other, crs)
    }
}

impl ContainmentOracle for Region {
    #[inline]
    fn contains(&self, point: &Point<f64>) -> bool {
        Region::contains(self, point)
    }

    fn bounding_rect(&self) -> Rect<f64> {
        self.bounds
    }

    fn crs(&self) -> Crs {
        self.crs
    }
}

/// Reprojects both regions to `crs` and returns their intersection.
pub fn intersect(a: &Region, b: &Region, crs: Crs) -> Result<Region, GeometryError> {
    let a_projected = a.to_crs(crs)?;
    let b_projected = b.to_crs(crs)?;

    let empty = || GeometryError::EmptyIntersection {
        left: a.name.clone(),
        right: b.name.clone(),
    };

    let geometry = a_projected.geometry.intersection(&b_projected.geometry);
    if geometry.0.is_empty() || geometry.unsigned_area() <= 0.0 {
        return Err(empty());
    }

    Region::new(format!("{}&{}", a.name, b.name), geometry, crs).map_err(|_| empty())
}

/// Flips `(lat, lon)` literals into `(lon, lat)` vertex order.
pub fn swap_lat_lon(coords: &[(f64, f64)]) -> Vec<(f64, f64)> {
    coords.iter().map(|&(lat, lon)| (lon, lat)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Region {
        Region::rectangle("unit", (0.0, 0.0), (1.0, 1.0), Crs::Wgs84).unwrap()
    }

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        Rect::new(Coord { x, y }, Coord { x: x + size, y: y + size }).to_polygon()
    }

    #[test]
    fn test_contains_interior_point() {
        let region = unit_square();
        assert!(region.contains(&Point::new(0.5, 0.5)));
        assert!(!region.contains(&Point::new(1.5, 0.5)));
        assert!(!region.contains(&Point::new(-0.1, 0.5)));
    }

    #[test]
    fn test_boundary_is_not_contained() {
        let region = unit_square();
        assert!(!region.contains(&Point::new(0.0, 0.5)));
        assert!(!region.contains(&Point::new(1.0, 1.0)));
    }

    #[test]
    fn test_bounds_and_area() {
        let region = Region::rectangle("r", (-3.30, 55.88), (-3.08, 55.99), Crs::Wgs84).unwrap();
        let (xmin, ymin, xmax, ymax) = region.bounds();
        assert_eq!((xmin, ymin, xmax, ymax), (-3.30, 55.88, -3.08, 55.99));
        assert!((region.area() - 0.22 * 0.11).abs() < 1e-9);
        assert!((region.fill_ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_triangle_fill_ratio_is_half() {
        let region =
            Region::from_coords("tri", &[(0.0, 0.0), (2.0, 0.0), (0.0, 2.0)], Crs::Wgs84).unwrap();
        assert!((region.area() - 2.0).abs() < 1e-9);
        assert!((region.fill_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_polygon_rejected() {
        let result = Region::from_coords("line", &[(0.0, 0.0), (1.0, 1.0)], Crs::Wgs84);
        assert!(matches!(
            result,
            Err(GeometryError::DegeneratePolygon { vertices: 2, .. })
        ));
    }

    #[test]
    fn test_empty_geometry_rejected() {
        let result = Region::new("empty", MultiPolygon::new(vec![]), Crs::Wgs84);
        assert!(matches!(result, Err(GeometryError::EmptyRegion(_))));
    }

    #[test]
    fn test_largest_component_drops_islands() {
        let mainland = square(0.0, 0.0, 10.0);
        let island = square(20.0, 20.0, 1.0);
        let region = Region::new(
            "country",
            MultiPolygon::new(vec![island, mainland.clone()]),
            Crs::Wgs84,
        )
        .unwrap();

        let largest = region.largest_component().unwrap();
        assert_eq!(largest.polygons(), &[mainland]);
        assert_eq!(largest.bounds(), (0.0, 0.0, 10.0, 10.0));
        assert!(!largest.contains(&Point::new(20.5, 20.5)));
    }

    #[test]
    fn test_intersect_overlapping_squares() {
        let a = Region::rectangle("a", (0.0, 0.0), (2.0, 2.0), Crs::Wgs84).unwrap();
        let b = Region::rectangle("b", (1.0, 1.0), (3.0, 3.0), Crs::Wgs84).unwrap();

        let both = intersect(&a, &b, Crs::Wgs84).unwrap();
        let tol = 1e-6;
        assert!((both.area() - 1.0).abs() < tol);
        let (xmin, ymin, xmax, ymax) = both.bounds();
        assert!((xmin - 1.0).abs() < tol && (ymin - 1.0).abs() < tol);
        assert!((xmax - 2.0).abs() < tol && (ymax - 2.0).abs() < tol);
    }

    #[test]
    fn test_disjoint_intersection_is_an_error() {
        let a = Region::rectangle("a", (0.0, 0.0), (1.0, 1.0), Crs::Wgs84).unwrap();
        let b = Region::rectangle("b", (5.0, 5.0), (6.0, 6.0), Crs::Wgs84).unwrap();

        let result = a.intersect(&b, Crs::Wgs84);
        assert!(matches!(
            result,
            Err(GeometryError::EmptyIntersection { ref left, ref right }) if left == "a" && right == "b"
        ));
    }

    #[test]
    fn test_intersect_reprojects_inputs() {
        // A box around Edinburgh in British National Grid metres
        let bng = Region::rectangle(
            "bng",
            (300_000.0, 650_000.0),
            (350_000.0, 700_000.0),
            Crs::BritishNationalGrid,
        )
        .unwrap();
        let wgs = Region::rectangle("wgs", (-3.30, 55.88), (-3.08, 55.99), Crs::Wgs84).unwrap();

        let both = intersect(&wgs, &bng, Crs::Wgs84).unwrap();
        assert_eq!(both.crs(), Crs::Wgs84);
        assert!((both.area() - wgs.area()).abs() < 1e-6);
    }

    #[test]
    fn test_to_crs_round_trip() {
        let region = Region::rectangle("r", (-3.30, 55.88), (-3.08, 55.99), Crs::Wgs84).unwrap();
        let back = region
            .to_crs(Crs::WebMercator)
            .unwrap()
            .to_crs(Crs::Wgs84)
            .unwrap();

        let (a, b) = (region.bounds(), back.bounds());
        assert!((a.0 - b.0).abs() < 1e-7);
        assert!((a.1 - b.1).abs() < 1e-7);
        assert!((a.2 - b.2).abs() < 1e-7);
        assert!((a.3 - b.3).abs() < 1e-7);
    }

    #[test]
    fn test_swap_lat_lon() {
        let swapped = swap_lat_lon(&[(55.95, -2.38), (56.49, -2.80)]);
        assert_eq!(swapped, vec![(-2.38, 55.95), (-2.80, 56.49)]);
    }
}
