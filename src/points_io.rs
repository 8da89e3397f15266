//! Point arrays on disk as `.npy` files of shape `(N, 2)`, columns lon and lat.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use ndarray_npy::{ReadNpyError, WriteNpyError, read_npy, write_npy};
use thiserror::Error;
use tracing::info;

use crate::crs::Crs;
use crate::point_set::PointSet;
use crate::split::Split;

#[derive(Debug, Error)]
pub enum PointsIoError {
    #[error("Failed to read points from {path}: {source}")]
    Read { path: PathBuf, source: ReadNpyError },

    #[error("Failed to write points to {path}: {source}")]
    Write { path: PathBuf, source: WriteNpyError },

    #[error("Expected an (N, 2) array in {path}, found {columns} columns")]
    Shape { path: PathBuf, columns: usize },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Writes `points` as an `(N, 2)` `f64` array, creating parent directories.
pub fn write_points(path: &Path, points: &PointSet) -> Result<(), PointsIoError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| PointsIoError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let coords = points.points();
    let array = Array2::from_shape_fn((coords.len(), 2), |(row, column)| match column {
        0 => coords[row].x(),
        _ => coords[row].y(),
    });

    write_npy(path, &array).map_err(|source| PointsIoError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = %path.display(), points = points.len(), "Points written");
    Ok(())
}

/// Reads an `(N, 2)` array written by [`write_points`] or numpy.
///
/// The file carries no CRS, so the caller says which one the columns are in.
pub fn read_points(path: &Path, crs: Crs) -> Result<PointSet, PointsIoError> {
    let array: Array2<f64> = read_npy(path).map_err(|source| PointsIoError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if array.ncols() != 2 {
        return Err(PointsIoError::Shape {
            path: path.to_path_buf(),
            columns: array.ncols(),
        });
    }

    let pairs: Vec<(f64, f64)> = array.rows().into_iter().map(|row| (row[0], row[1])).collect();
    Ok(PointSet::from_lon_lat(&pairs, crs))
}

/// `<dir>/<name>_<subset>.npy`
pub fn split_path(dir: &Path, name: &str, subset: &str) -> PathBuf {
    dir.join(format!("{}_{}.npy", name, subset))
}

/// Writes the three subsets next to each other, returning their paths in
/// train, val, test order.
pub fn write_split(dir: &Path, name: &str, split: &Split) -> Result<Vec<PathBuf>, PointsIoError> {
    split
        .subsets()
        .into_iter()
        .map(|(subset, points)| {
            let path = split_path(dir, name, subset.as_str());
            write_points(&path, points)?;
            Ok(path)
        })
        .collect()
}

/// `<root>/results/<name><count>/<name><count>.npy`
pub fn results_path(root: &Path, name: &str, count: usize) -> PathBuf {
    let stem = format!("{}{}", name, count);
    root.join("results").join(&stem).join(format!("{}.npy", stem))
}
