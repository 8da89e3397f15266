//! Named areas of interest inside the Scottish mainland.

use std::fmt;

use tracing::{info, warn};

use crate::crs::Crs;
use crate::region::{GeometryError, Region, intersect, swap_lat_lon};

/// Edinburgh bounding box, lower-left and upper-right as (lon, lat).
const EDINBURGH_BOX: ((f64, f64), (f64, f64)) = ((-3.30, 55.88), (-3.08, 55.99));

/// Central belt outline as (lat, lon), Dunbar round to Ayrshire.
const CENTRAL_BELT_LAT_LON: [(f64, f64); 6] = [
    (55.950010, -2.381500),
    (56.499314, -2.808075),
    (56.434390, -3.543699),
    (56.151770, -4.070388),
    (55.918314, -5.010594),
    (55.405161, -4.679781),
];

/// Where points are sampled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionPreset {
    /// The whole mainland, under whatever name the run was given
    Mainland(String),
    Edinburgh,
    CentralBelt,
}

impl RegionPreset {
    /// `edi` and `central-belt` select their areas; any other name samples
    /// the whole mainland.
    pub fn from_name(name: &str) -> Self {
        match name {
            "edi" => Self::Edinburgh,
            "central-belt" => Self::CentralBelt,
            other => Self::Mainland(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Mainland(name) => name,
            Self::Edinburgh => "edi",
            Self::CentralBelt => "central-belt",
        }
    }

    /// The preset's own outline in `crs`, or `None` for the whole mainland.
    ///
    /// The outlines are lon/lat literals, so `crs` should be geographic.
    pub fn area_of_interest(&self, crs: Crs) -> Result<Option<Region>, GeometryError> {
        if !crs.is_geographic() && !matches!(self, Self::Mainland(_)) {
            warn!(crs = %crs, preset = self.name(), "Preset outline is in degrees but the CRS is projected");
        }

        match self {
            Self::Mainland(_) => Ok(None),
            Self::Edinburgh => {
                let (lower_left, upper_right) = EDINBURGH_BOX;
                Region::rectangle(self.name(), lower_left, upper_right, crs).map(Some)
            }
            Self::CentralBelt => {
                Region::from_coords(self.name(), &swap_lat_lon(&CENTRAL_BELT_LAT_LON), crs).map(Some)
            }
        }
    }

    /// Clips `mainland` to the preset, intersecting in WGS84.
    pub fn resolve(&self, mainland: &Region, crs: Crs) -> Result<Region, GeometryError> {
        let Some(area) = self.area_of_interest(crs)? else {
            return Ok(mainland.clone());
        };

        let clipped = intersect(&area, mainland, Crs::Wgs84)?;
        info!(
            preset = self.name(),
            area = clipped.area(),
            fill_ratio = clipped.fill_ratio(),
            "Clipped mainland to area of interest"
        );
        Ok(clipped)
    }
}

impl fmt::Display for RegionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
