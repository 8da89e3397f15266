//! Tile server URL templates and request planning.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crs::{Crs, Transformer};
use crate::fetch::{FetchError, TileRequest};
use crate::point_set::PointSet;
use crate::tile::{MAX_ZOOM, TileIndex, tile_index};

/// Name of the MapTiler historic OS layer, which needs an API key.
pub const MAPTILER_API: &str = "ukosgb1888";

const MAPTILER_TEMPLATE: &str =
    "https://api.maptiler.com/tiles/uk-osgb10k1888/{z}/{x}/{y}.jpg?key=";

/// Extension given to every downloaded tile, whatever the server returns.
pub const TILE_EXTENSION: &str = "png";

lazy_static! {
    static ref DEFAULT_APIS: BTreeMap<&'static str, &'static str> = BTreeMap::from([
        (
            "worldimagery",
            "https://services.arcgisonline.com/arcgis/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}",
        ),
        (
            "worldimagery-clarity",
            "https://clarity.maptiles.arcgis.com/arcgis/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}",
        ),
        ("openstreetmap", "https://tile.openstreetmap.org/{z}/{x}/{y}.png"),
    ]);
}

/// Immutable mapping from API name to URL template.
///
/// Templates use `{z}`, `{x}` and `{y}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileApiTable {
    apis: BTreeMap<String, String>,
}

impl TileApiTable {
    pub fn new(apis: BTreeMap<String, String>) -> Self {
        Self { apis }
    }

    /// The public imagery and map servers.
    pub fn defaults() -> Self {
        Self::new(
            DEFAULT_APIS
                .iter()
                .map(|(name, url)| (name.to_string(), url.to_string()))
                .collect(),
        )
    }

    /// Adds the MapTiler OS 1888 layer authenticated with `key`.
    pub fn with_maptiler_key(mut self, key: &str) -> Self {
        self.apis.insert(
            MAPTILER_API.to_string(),
            format!("{}{}", MAPTILER_TEMPLATE, key),
        );
        self
    }

    /// Entries of `other` are added, replacing same-named ones.
    pub fn merged(mut self, other: TileApiTable) -> Self {
        self.apis.extend(other.apis);
        self
    }

    /// Loads a `{"name": "template", ...}` JSON object.
    pub fn from_json_file(path: &Path) -> Result<Self, FetchError> {
        let raw = fs::read_to_string(path).map_err(|source| FetchError::ApiTableRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| FetchError::ApiTableParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn template(&self, name: &str) -> Result<&str, FetchError> {
        self.apis
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| FetchError::UnknownApi {
                name: name.to_string(),
                available: self.names().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.apis.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.apis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}

/// Substitutes the tile into a URL template.
pub fn format_url(template: &str, tile: &TileIndex) -> String {
    template
        .replace("{x}", &tile.x.to_string())
        .replace("{y}", &tile.y.to_string())
        .replace("{z}", &tile.zoom.to_string())
}

/// One request per point and API: `tiles_dir/<api>/{zoom}_{x}_{y}.png`.
///
/// Points not in WGS84 are reprojected first. Unknown API names and zooms
/// past [`MAX_ZOOM`] fail before anything is planned.
pub fn plan_requests(
    points: &PointSet,
    zoom: u8,
    api_names: &[String],
    table: &TileApiTable,
    tiles_dir: &Path,
) -> Result<Vec<TileRequest>, FetchError> {
    if zoom > MAX_ZOOM {
        return Err(FetchError::ZoomOutOfRange { zoom, max: MAX_ZOOM });
    }

    let templates = api_names
        .iter()
        .map(|name| Ok((name.as_str(), table.template(name)?)))
        .collect::<Result<Vec<_>, FetchError>>()?;

    let transformer = Transformer::new(points.crs(), Crs::Wgs84)?;
    let mut requests = Vec::with_capacity(points.len() * templates.len());

    for point in points {
        let (lon, lat) = transformer.transform(point.x(), point.y())?;
        let tile = tile_index(lat, lon, zoom);

        for (name, template) in &templates {
            requests.push(TileRequest {
                url: format_url(template, &tile),
                destination: api_dir(tiles_dir, name).join(tile.file_name(TILE_EXTENSION)),
            });
        }
    }

    debug!(
        points = points.len(),
        apis = templates.len(),
        requests = requests.len(),
        "Planned tile requests"
    );

    Ok(requests)
}

/// Per-API output directory.
pub fn api_dir(tiles_dir: &Path, api: &str) -> PathBuf {
    tiles_dir.join(api)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_url_substitutes_every_placeholder() {
        let tile = TileIndex { zoom: 17, x: 64370, y: 40848 };
        assert_eq!(
            format_url("https://tile.openstreetmap.org/{z}/{x}/{y}.png", &tile),
            "https://tile.openstreetmap.org/17/64370/40848.png"
        );
        // ArcGIS orders row before column
        assert_eq!(
            format_url("https://example.com/tile/{z}/{y}/{x}", &tile),
            "https://example.com/tile/17/40848/64370"
        );
    }

    #[test]
    fn test_default_table() {
        let table = TileApiTable::defaults();
        let names: Vec<&str> = table.names().collect();
        assert_eq!(names, vec!["openstreetmap", "worldimagery", "worldimagery-clarity"]);
        assert!(table.template(MAPTILER_API).is_err());
    }

    #[test]
    fn test_maptiler_needs_a_key() {
        let table = TileApiTable::defaults().with_maptiler_key("abc123");
        let template = table.template(MAPTILER_API).unwrap();
        assert!(template.ends_with("?key=abc123"));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_unknown_api_lists_alternatives() {
        let table = TileApiTable::defaults();
        let err = table.template("bing").unwrap_err();
        match err {
            FetchError::UnknownApi { name, available } => {
                assert_eq!(name, "bing");
                assert!(available.contains("openstreetmap"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_table_from_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("apis.json");
        fs::write(&path, r#"{"local": "http://localhost:8080/{z}/{x}/{y}.png"}"#).unwrap();

        let table = TileApiTable::from_json_file(&path).unwrap();
        assert_eq!(
            table.template("local").unwrap(),
            "http://localhost:8080/{z}/{x}/{y}.png"
        );

        let merged = TileApiTable::defaults().merged(table);
        assert_eq!(merged.len(), 4);
        assert!(merged.template("openstreetmap").is_ok());

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            TileApiTable::from_json_file(&path),
            Err(FetchError::ApiTableParse { .. })
        ));
    }

    #[test]
    fn test_plan_requests_per_point_and_api() {
        let points = PointSet::from_lon_lat(&[(-3.2008, 55.9486), (-0.12, 51.5)], Crs::Wgs84);
        let table = TileApiTable::defaults();
        let apis = vec!["openstreetmap".to_string(), "worldimagery".to_string()];

        let requests = plan_requests(&points, 10, &apis, &table, Path::new("tiles")).unwrap();
        assert_eq!(requests.len(), 4);

        assert_eq!(requests[2].url, "https://tile.openstreetmap.org/10/511/340.png");
        assert_eq!(
            requests[2].destination,
            Path::new("tiles/openstreetmap/10_511_340.png")
        );
        assert!(requests[3].url.ends_with("/tile/10/340/511"));
        assert_eq!(
            requests[3].destination,
            Path::new("tiles/worldimagery/10_511_340.png")
        );
    }

    #[test]
    fn test_plan_requests_rejects_unknown_api() {
        let points = PointSet::from_lon_lat(&[(-3.2, 55.9)], Crs::Wgs84);
        let result = plan_requests(
            &points,
            10,
            &["nope".to_string()],
            &TileApiTable::defaults(),
            Path::new("tiles"),
        );
        assert!(matches!(result, Err(FetchError::UnknownApi { .. })));
    }

    #[test]
    fn test_plan_requests_rejects_deep_zoom() {
        let points = PointSet::from_lon_lat(&[(-3.2, 55.9)], Crs::Wgs84);
        let apis = vec!["openstreetmap".to_string()];
        let table = TileApiTable::defaults();

        let result = plan_requests(&points, MAX_ZOOM + 1, &apis, &table, Path::new("tiles"));
        assert!(matches!(
            result,
            Err(FetchError::ZoomOutOfRange { zoom: 31, max: 30 })
        ));

        let requests = plan_requests(&points, MAX_ZOOM, &apis, &table, Path::new("tiles")).unwrap();
        assert!(requests[0].url.starts_with("https://tile.openstreetmap.org/30/"));
    }
}
