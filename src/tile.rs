use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Web Mercator latitude limit; beyond it tile rows fall outside the pyramid.
pub const MAX_LAT: f64 = 85.05112878;

/// Deepest zoom whose tile indices fit in a `u32`.
pub const MAX_ZOOM: u8 = 30;

/// One tile in the web tile pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileIndex {
    pub zoom: u8,
    /// Column, 0 at the antimeridian going east
    pub x: u32,
    /// Row, 0 at the north edge
    pub y: u32,
}

impl TileIndex {
    /// `{zoom}_{x}_{y}.{ext}`
    pub fn file_name(&self, ext: &str) -> String {
        format!("{}_{}_{}.{}", self.zoom, self.x, self.y, ext)
    }

    /// Number of tiles along one axis, `None` past zoom 63.
    pub fn tiles_per_axis(&self) -> Option<u64> {
        1u64.checked_shl(self.zoom as u32)
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Tile column and row containing `(lat, lon)` at `zoom`.
///
/// Latitudes must stay off the poles, where `tan` is undefined; anything
/// beyond [`MAX_LAT`] lands outside `[0, 2^zoom)`. `zoom` must not exceed
/// [`MAX_ZOOM`], above which the indices saturate at `u32::MAX`.
#[inline]
pub fn to_tile(lat: f64, lon: f64, zoom: u8) -> (u32, u32) {
    let n = 2.0_f64.powi(zoom as i32);
    let lat_rad = lat.to_radians();

    let x = ((lon + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();

    (x as u32, y as u32)
}

/// Same as [`to_tile`], returning a [`TileIndex`].
#[inline]
pub fn tile_index(lat: f64, lon: f64, zoom: u8) -> TileIndex {
    let (x, y) = to_tile(lat, lon, zoom);
    TileIndex { zoom, x, y }
}

/// Latitude and longitude of the tile's north-west corner.
pub fn tile_to_lat_lon(tile: &TileIndex) -> (f64, f64) {
    let n = 2.0_f64.powi(tile.zoom as i32);
    let lon = tile.x as f64 / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * tile.y as f64 / n)).sinh().atan().to_degrees();
    (lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_london_at_zoom_10() {
        assert_eq!(to_tile(51.5, -0.12, 10), (511, 340));
        assert_eq!(to_tile(51.5074, -0.1278, 10), (511, 340));
    }

    #[test]
    fn test_new_york_at_zoom_16() {
        let tile = tile_index(40.7128, -74.0060, 16);
        assert_eq!(tile, TileIndex { zoom: 16, x: 19295, y: 24640 });
    }

    #[test]
    fn test_equator_prime_meridian() {
        assert_eq!(to_tile(0.0, 0.0, 1), (1, 1));
        assert_eq!(to_tile(0.0, 0.0, 0), (0, 0));
    }

    #[test]
    fn test_edinburgh_at_zoom_17() {
        // Edinburgh castle
        assert_eq!(to_tile(55.9486, -3.2008, 17), (64370, 40848));
    }

    #[test]
    fn test_indices_stay_in_range() {
        for zoom in [0u8, 1, 5, 10, 17, 20] {
            let n = 1u64 << zoom;
            let mut lat = -84.9;
            while lat < 85.0 {
                let mut lon = -180.0;
                while lon < 180.0 {
                    let (x, y) = to_tile(lat, lon, zoom);
                    assert!((x as u64) < n, "x={} zoom={} lon={}", x, zoom, lon);
                    assert!((y as u64) < n, "y={} zoom={} lat={}", y, zoom, lat);
                    lon += 7.3;
                }
                lat += 4.7;
            }
        }
    }

    #[test]
    fn test_deepest_zoom_stays_in_range() {
        let (x, y) = to_tile(MAX_LAT - 1e-9, 180.0 - 1e-7, MAX_ZOOM);
        assert_eq!(x as u64, (1u64 << MAX_ZOOM) - 1);
        assert_eq!(y, 0);
    }

    #[test]
    fn test_corner_round_trip_within_one_tile() {
        let (lat, lon) = (55.95, -3.19);
        for zoom in [0u8, 5, 10, 15, 18] {
            let tile = tile_index(lat, lon, zoom);
            let (corner_lat, corner_lon) = tile_to_lat_lon(&tile);
            let tile_size = 360.0 / 2.0_f64.powi(zoom as i32);

            // The north-west corner is north and west of the point, within a tile
            assert!(corner_lat >= lat && corner_lat - lat < tile_size);
            assert!(corner_lon <= lon && lon - corner_lon < tile_size);
        }
    }

    #[test]
    fn test_file_name_and_display() {
        let tile = TileIndex { zoom: 17, x: 64370, y: 40848 };
        assert_eq!(tile.file_name("png"), "17_64370_40848.png");
        assert_eq!(tile.to_string(), "17/64370/40848");
        assert_eq!(tile.tiles_per_axis(), Some(131072));
        assert_eq!(TileIndex { zoom: 64, x: 0, y: 0 }.tiles_per_axis(), None);
    }
}
