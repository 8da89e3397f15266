//! Sampling points inside a geographic region and fetching map tiles for them.
//!
//! The pipeline runs in stages: build a region boundary from a shapefile,
//! sample uniformly distributed points inside it, then either split the
//! points into train/validation/test sets or download the web map tiles
//! that cover them.

pub mod crs;
pub use crs::{Crs, Transformer};

pub mod region;
pub use region::{ContainmentOracle, GeometryError, Region, intersect, swap_lat_lon};

pub mod load_boundary;
pub use load_boundary::{build_mainland_boundary, load_feature, load_region, write_region};

pub mod presets;
pub use presets::RegionPreset;

pub mod point_set;
pub use point_set::PointSet;

pub mod generate_point;
pub use generate_point::{Draw, random_point_in_bounds, random_point_in_region};

pub mod sampler;
pub use sampler::{Sampler, SamplerConfig, SamplingError, sample};

pub mod split;
pub use split::{Split, SplitError, SplitMethod, Subset, split};

pub mod points_io;
pub use points_io::{PointsIoError, read_points, write_points, write_split};

pub mod tile;
pub use tile::{TileIndex, tile_index, to_tile};

pub mod tile_api;
pub use tile_api::{TileApiTable, format_url, plan_requests};

pub mod fetch;
pub use fetch::{
    Downloader, FetchConfig, FetchError, FetchReport, ReqwestDownloader, RetryPolicy,
    TileFetchError, TileFetcher, TileRequest,
};

pub mod logging;

/// Any error the library can return.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Sampling(#[from] SamplingError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    PointsIo(#[from] PointsIoError),
}
