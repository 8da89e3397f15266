use std::fs;
use std::path::Path;

use geo::{LineString, MultiPolygon, Polygon};
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{PolygonRing, Reader, Shape, Writer};
use tracing::{debug, info, warn};

use crate::crs::Crs;
use crate::region::{GeometryError, Region};

/// Attribute column holding the feature name, as in the UK countries file.
pub const NAME_FIELD: &str = "NAME";

/// Reads the CRS from the `.prj` next to `shapefile_path`, if there is one we understand.
pub fn detect_crs(shapefile_path: &Path) -> Option<Crs> {
    let prj = fs::read_to_string(shapefile_path.with_extension("prj")).ok()?;
    Crs::from_wkt(&prj)
}

/// Loads every polygon in the file as one region.
///
/// `fallback_crs` is used when there is no readable `.prj`.
pub fn load_region(shapefile_path: &Path, fallback_crs: Crs) -> Result<Region, GeometryError> {
    load_matching(shapefile_path, fallback_crs, None)
}

/// Loads the polygons of the records whose `field` equals `value`.
pub fn load_feature(
    shapefile_path: &Path,
    field: &str,
    value: &str,
    fallback_crs: Crs,
) -> Result<Region, GeometryError> {
    load_matching(shapefile_path, fallback_crs, Some((field, value)))
}

fn load_matching(
    shapefile_path: &Path,
    fallback_crs: Crs,
    filter: Option<(&str, &str)>,
) -> Result<Region, GeometryError> {
    let read_err = |source| GeometryError::ShapefileRead {
        path: shapefile_path.to_path_buf(),
        source,
    };

    let mut reader = Reader::from_path(shapefile_path).map_err(read_err)?;
    let mut polygons = Vec::new();

    for record in reader.iter_shapes_and_records() {
        let (shape, record) = record.map_err(read_err)?;

        if let Some((field, value)) = filter {
            if !record_matches(&record, field, value) {
                continue;
            }
        }

        match shape {
            Shape::Polygon(p) => polygons.extend(polygons_from_rings(p.rings())),
            other => {
                warn!(
                    path = %shapefile_path.display(),
                    shape_type = ?other.shapetype(),
                    "Skipping non-polygon shape"
                );
            }
        }
    }

    if polygons.is_empty() {
        return Err(match filter {
            Some((field, value)) => GeometryError::FeatureNotFound {
                path: shapefile_path.to_path_buf(),
                field: field.to_string(),
                value: value.to_string(),
            },
            None => GeometryError::EmptyRegion(shapefile_path.display().to_string()),
        });
    }

    let crs = detect_crs(shapefile_path).unwrap_or(fallback_crs);
    let name = filter
        .map(|(_, value)| value.to_string())
        .or_else(|| {
            shapefile_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    debug!(
        path = %shapefile_path.display(),
        polygons = polygons.len(),
        crs = %crs,
        "Loaded boundary"
    );

    Region::new(name, MultiPolygon::new(polygons), crs)
}

fn record_matches(record: &Record, field: &str, value: &str) -> bool {
    match record.get(field) {
        Some(FieldValue::Character(Some(s))) => s.trim() == value,
        _ => false,
    }
}

/// Every outer ring starts a polygon; inner rings are holes of the outer ring before them.
fn polygons_from_rings(rings: &[PolygonRing<shapefile::Point>]) -> Vec<Polygon<f64>> {
    let mut polygons: Vec<Polygon<f64>> = Vec::new();

    for ring in rings {
        let line = LineString::from(
            ring.points()
                .iter()
                .map(|pt| (pt.x, pt.y))
                .collect::<Vec<_>>(),
        );

        match ring {
            PolygonRing::Outer(_) => polygons.push(Polygon::new(line, vec![])),
            PolygonRing::Inner(_) => match polygons.last_mut() {
                Some(outer) => outer.interiors_push(line),
                None => polygons.push(Polygon::new(line, vec![])),
            },
        }
    }

    polygons
}

fn shape_from_region(region: &Region) -> shapefile::Polygon {
    let to_points = |line: &LineString<f64>| {
        line.coords()
            .map(|c| shapefile::Point::new(c.x, c.y))
            .collect::<Vec<_>>()
    };

    let mut rings = Vec::new();
    for polygon in region.polygons() {
        rings.push(PolygonRing::Outer(to_points(polygon.exterior())));
        for interior in polygon.interiors() {
            rings.push(PolygonRing::Inner(to_points(interior)));
        }
    }

    shapefile::Polygon::with_rings(rings)
}

/// Writes regions as one record each, named by [`Region::name`], plus a `.prj`.
///
/// All regions must share a CRS; the first one's is written.
pub fn write_regions(shapefile_path: &Path, regions: &[&Region]) -> Result<(), GeometryError> {
    let write_err = |source| GeometryError::ShapefileWrite {
        path: shapefile_path.to_path_buf(),
        source,
    };

    if let Some(parent) = shapefile_path.parent() {
        fs::create_dir_all(parent).map_err(|source| GeometryError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let field_name = FieldName::try_from(NAME_FIELD).map_err(|e| GeometryError::AttributeTable {
        path: shapefile_path.to_path_buf(),
        message: format!("{:?}", e),
    })?;
    let table = TableWriterBuilder::new().add_character_field(field_name, 80);
    let mut writer = Writer::from_path(shapefile_path, table).map_err(write_err)?;

    for region in regions {
        let mut record = Record::default();
        record.insert(
            NAME_FIELD.to_string(),
            FieldValue::Character(Some(region.name().to_string())),
        );
        writer
            .write_shape_and_record(&shape_from_region(region), &record)
            .map_err(write_err)?;
    }
    drop(writer);

    if let Some(region) = regions.first() {
        let prj_path = shapefile_path.with_extension("prj");
        fs::write(&prj_path, region.crs().esri_wkt()).map_err(|source| GeometryError::Io {
            path: prj_path,
            source,
        })?;
    }

    Ok(())
}

pub fn write_region(shapefile_path: &Path, region: &Region) -> Result<(), GeometryError> {
    write_regions(shapefile_path, &[region])
}

/// Pulls one country out of a multi-country file and isolates its mainland.
///
/// Writes the full feature (mainland and islands) to `full_out`, then the
/// largest polygon reprojected to `target_crs` to `mainland_out`.
pub fn build_mainland_boundary(
    countries_path: &Path,
    country: &str,
    full_out: &Path,
    mainland_out: &Path,
    target_crs: Crs,
) -> Result<Region, GeometryError> {
    let full = load_feature(countries_path, NAME_FIELD, country, target_crs)?;
    write_region(full_out, &full)?;
    info!(
        country = country,
        polygons = full.polygons().len(),
        path = %full_out.display(),
        "Saved full boundary with islands"
    );

    let mainland = full.largest_component()?.to_crs(target_crs)?;
    write_region(mainland_out, &mainland)?;
    info!(
        country = country,
        crs = %target_crs,
        path = %mainland_out.display(),
        "Saved mainland boundary"
    );

    Ok(mainland)
}
