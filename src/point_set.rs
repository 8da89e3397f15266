use geo::Point;
use serde::Serialize;

use crate::crs::Crs;

/// An ordered, immutable collection of `(lon, lat)` points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointSet {
    points: Vec<Point<f64>>,
    crs: Crs,
    seed: Option<u64>,
}

impl PointSet {
    pub fn new(points: Vec<Point<f64>>, crs: Crs, seed: Option<u64>) -> Self {
        Self { points, crs, seed }
    }

    pub fn from_lon_lat(pairs: &[(f64, f64)], crs: Crs) -> Self {
        let points = pairs.iter().map(|&(lon, lat)| Point::new(lon, lat)).collect();
        Self::new(points, crs, None)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point<f64>] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point<f64>> {
        self.points.iter()
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn into_points(self) -> Vec<Point<f64>> {
        self.points
    }

    pub fn to_lon_lat(&self) -> Vec<(f64, f64)> {
        self.points.iter().map(|p| (p.x(), p.y())).collect()
    }
}

impl<'a> IntoIterator for &'a PointSet {
    type Item = &'a Point<f64>;
    type IntoIter = std::slice::Iter<'a, Point<f64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
