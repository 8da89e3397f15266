//! Coordinate reference systems and reprojection through `proj4rs`.

use std::fmt;
use std::str::FromStr;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};

use crate::region::GeometryError;

/// A supported coordinate reference system, identified by EPSG code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// WGS84 longitude/latitude in degrees
    #[default]
    Wgs84,
    /// Spherical Web Mercator in metres
    WebMercator,
    /// Ordnance Survey British National Grid in metres
    BritishNationalGrid,
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self, GeometryError> {
        match code {
            4326 => Ok(Crs::Wgs84),
            3857 => Ok(Crs::WebMercator),
            27700 => Ok(Crs::BritishNationalGrid),
            other => Err(GeometryError::UnsupportedCrs(format!("EPSG:{}", other))),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::BritishNationalGrid => 27700,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    fn proj_string(&self) -> &'static str {
        match self {
            Crs::Wgs84 => "+proj=longlat +datum=WGS84 +no_defs",
            Crs::WebMercator => {
                "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
            }
            Crs::BritishNationalGrid => {
                "+proj=tmerc +lat_0=49 +lon_0=-2 +k=0.9996012717 +x_0=400000 +y_0=-100000 \
                 +ellps=airy +towgs84=446.448,-125.157,542.06,0.15,0.247,0.842,-20.489 \
                 +units=m +no_defs"
            }
        }
    }

    /// ESRI flavoured WKT, as written to a shapefile's `.prj`.
    pub fn esri_wkt(&self) -> &'static str {
        match self {
            Crs::Wgs84 => {
                r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#
            }
            Crs::WebMercator => {
                r#"PROJCS["WGS_1984_Web_Mercator_Auxiliary_Sphere",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Mercator_Auxiliary_Sphere"],PARAMETER["False_Easting",0.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",0.0],PARAMETER["Standard_Parallel_1",0.0],PARAMETER["Auxiliary_Sphere_Type",0.0],UNIT["Meter",1.0]]"#
            }
            Crs::BritishNationalGrid => {
                r#"PROJCS["British_National_Grid",GEOGCS["GCS_OSGB_1936",DATUM["D_OSGB_1936",SPHEROID["Airy_1830",6377563.396,299.3249646]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",400000.0],PARAMETER["False_Northing",-100000.0],PARAMETER["Central_Meridian",-2.0],PARAMETER["Scale_Factor",0.9996012717],PARAMETER["Latitude_Of_Origin",49.0],UNIT["Meter",1.0]]"#
            }
        }
    }

    /// Guesses the reference from the WKT stored in a shapefile's `.prj`.
    ///
    /// Returns `None` when the WKT names something we do not handle.
    pub fn from_wkt(wkt: &str) -> Option<Self> {
        let wkt = wkt.to_ascii_lowercase();
        if wkt.contains("british_national_grid") || wkt.contains("osgb") {
            Some(Crs::BritishNationalGrid)
        } else if wkt.contains("pseudo_mercator")
            || wkt.contains("pseudo-mercator")
            || wkt.contains("mercator_auxiliary_sphere")
        {
            Some(Crs::WebMercator)
        } else if !wkt.contains("projcs") && wkt.contains("wgs_1984") {
            Some(Crs::Wgs84)
        } else {
            None
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = GeometryError;

    /// Accepts `EPSG:4326`, `epsg:4326` or a bare `4326`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        let code: u32 = code
            .parse()
            .map_err(|_| GeometryError::UnsupportedCrs(s.to_string()))?;
        Crs::from_epsg(code)
    }
}

/// Reusable point transformer between two references.
pub struct Transformer {
    source: Crs,
    target: Crs,
    projections: Option<(Proj, Proj)>,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Transformer {
    pub fn new(source: Crs, target: Crs) -> Result<Self, GeometryError> {
        if source == target {
            return Ok(Self {
                source,
                target,
                projections: None,
            });
        }

        let source_proj = Proj::from_proj_string(source.proj_string()).map_err(|e| {
            GeometryError::Reprojection(format!("invalid projection {}: {:?}", source, e))
        })?;
        let target_proj = Proj::from_proj_string(target.proj_string()).map_err(|e| {
            GeometryError::Reprojection(format!("invalid projection {}: {:?}", target, e))
        })?;

        Ok(Self {
            source,
            target,
            projections: Some((source_proj, target_proj)),
        })
    }

    pub fn source(&self) -> Crs {
        self.source
    }

    pub fn target(&self) -> Crs {
        self.target
    }

    /// Transforms one `(x, y)` pair. Geographic values are in degrees on both sides.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), GeometryError> {
        let Some((source_proj, target_proj)) = &self.projections else {
            return Ok((x, y));
        };

        let mut point = if self.source.is_geographic() {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(source_proj, target_proj, &mut point).map_err(|e| {
            GeometryError::Reprojection(format!(
                "({}, {}) from {} to {}: {:?}",
                x, y, self.source, self.target, e
            ))
        })?;

        if self.target.is_geographic() {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_epsg_strings() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::Wgs84);
        assert_eq!("epsg:3857".parse::<Crs>().unwrap(), Crs::WebMercator);
        assert_eq!("27700".parse::<Crs>().unwrap(), Crs::BritishNationalGrid);
    }

    #[test]
    fn test_unknown_epsg_is_rejected() {
        let result = "EPSG:32630".parse::<Crs>();
        assert!(matches!(result, Err(GeometryError::UnsupportedCrs(_))));

        let result = "not-a-crs".parse::<Crs>();
        assert!(matches!(result, Err(GeometryError::UnsupportedCrs(_))));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for crs in [Crs::Wgs84, Crs::WebMercator, Crs::BritishNationalGrid] {
            assert_eq!(crs.to_string().parse::<Crs>().unwrap(), crs);
        }
    }

    #[test]
    fn test_identity_transform() {
        let t = Transformer::new(Crs::Wgs84, Crs::Wgs84).unwrap();
        assert_eq!(t.transform(-3.19, 55.95).unwrap(), (-3.19, 55.95));
    }

    #[test]
    fn test_wgs84_to_web_mercator() {
        let t = Transformer::new(Crs::Wgs84, Crs::WebMercator).unwrap();
        let (x, y) = t.transform(0.0, 0.0).unwrap();
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);

        // 90 degrees of longitude is a quarter of the equatorial circumference
        let (x, _) = t.transform(90.0, 0.0).unwrap();
        assert!((x - 10_018_754.171_394_622).abs() < 1.0);
    }

    #[test]
    fn test_british_national_grid_round_trip() {
        let forward = Transformer::new(Crs::Wgs84, Crs::BritishNationalGrid).unwrap();
        let back = Transformer::new(Crs::BritishNationalGrid, Crs::Wgs84).unwrap();

        // Edinburgh castle
        let (e, n) = forward.transform(-3.2008, 55.9486).unwrap();
        assert!((e - 325_100.0).abs() < 500.0, "easting {}", e);
        assert!((n - 673_500.0).abs() < 500.0, "northing {}", n);

        let (lon, lat) = back.transform(e, n).unwrap();
        assert!((lon - -3.2008).abs() < 1e-5);
        assert!((lat - 55.9486).abs() < 1e-5);
    }

    #[test]
    fn test_crs_from_prj_wkt() {
        let bng = r#"PROJCS["British_National_Grid",GEOGCS["GCS_OSGB_1936"]]"#;
        assert_eq!(Crs::from_wkt(bng), Some(Crs::BritishNationalGrid));

        let wgs = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984"]]"#;
        assert_eq!(Crs::from_wkt(wgs), Some(Crs::Wgs84));

        let merc = r#"PROJCS["WGS_84_Pseudo_Mercator",GEOGCS["GCS_WGS_1984"]]"#;
        assert_eq!(Crs::from_wkt(merc), Some(Crs::WebMercator));

        assert_eq!(Crs::from_wkt(r#"PROJCS["UTM_Zone_30N"]"#), None);

        for crs in [Crs::Wgs84, Crs::WebMercator, Crs::BritishNationalGrid] {
            assert_eq!(Crs::from_wkt(crs.esri_wkt()), Some(crs));
        }
    }
}
