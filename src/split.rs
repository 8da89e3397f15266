//! Train / validation / test partitioning of sampled points.
//!
//! Two policies are available:
//!
//! - **checkerboard**: each point goes to a subset according to the parity of
//!   the grid cell it falls in, so nearby points usually share a subset.
//! - **random**: a seeded shuffle cut at the requested ratios.

use std::fmt;
use std::str::FromStr;

use geo::Point;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::point_set::PointSet;

#[derive(Debug, Error, PartialEq)]
pub enum SplitError {
    #[error("Invalid method {0:?}; supported methods: 'checkerboard', 'random'")]
    InvalidMethod(String),

    #[error("Invalid split ratios train={train}, val={val}: each must be in [0, 1] and their sum at most 1")]
    InvalidRatios { train: f64, val: f64 },

    #[error("Invalid checkerboard cell size {0}: must be a positive number of degrees")]
    InvalidCellSize(f64),
}

/// Which subset a point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Subset {
    Train,
    Validation,
    Test,
}

impl Subset {
    /// Suffix used for output file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Subset::Train => "train",
            Subset::Validation => "val",
            Subset::Test => "test",
        }
    }
}

/// A split policy with its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitMethod {
    /// Grid-cell parity on cells `degrees` wide
    Checkerboard { degrees: f64 },
    /// Seeded shuffle; `train` and `val` are fractions of the input, the rest is test
    Random { train: f64, val: f64 },
}

/// Name of a split policy, as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMethodKind {
    Checkerboard,
    Random,
}

impl FromStr for SplitMethodKind {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkerboard" => Ok(SplitMethodKind::Checkerboard),
            "random" => Ok(SplitMethodKind::Random),
            other => Err(SplitError::InvalidMethod(other.to_string())),
        }
    }
}

impl fmt::Display for SplitMethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitMethodKind::Checkerboard => write!(f, "checkerboard"),
            SplitMethodKind::Random => write!(f, "random"),
        }
    }
}

impl SplitMethod {
    /// Builds and validates a method from its name and the parameters both
    /// methods may use. Only the ones the named method needs are checked.
    pub fn from_name(name: &str, degrees: f64, ratios: (f64, f64)) -> Result<Self, SplitError> {
        let method = match name.parse::<SplitMethodKind>()? {
            SplitMethodKind::Checkerboard => SplitMethod::Checkerboard { degrees },
            SplitMethodKind::Random => SplitMethod::Random {
                train: ratios.0,
                val: ratios.1,
            },
        };
        method.validate()?;
        Ok(method)
    }

    pub fn kind(&self) -> SplitMethodKind {
        match self {
            SplitMethod::Checkerboard { .. } => SplitMethodKind::Checkerboard,
            SplitMethod::Random { .. } => SplitMethodKind::Random,
        }
    }

    pub fn validate(&self) -> Result<(), SplitError> {
        match *self {
            SplitMethod::Checkerboard { degrees } => {
                if !degrees.is_finite() || degrees <= 0.0 {
                    return Err(SplitError::InvalidCellSize(degrees));
                }
            }
            SplitMethod::Random { train, val } => {
                let valid = |r: f64| r.is_finite() && (0.0..=1.0).contains(&r);
                if !valid(train) || !valid(val) || train + val > 1.0 {
                    return Err(SplitError::InvalidRatios { train, val });
                }
            }
        }
        Ok(())
    }
}

/// Three subsets produced by [`split`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Split {
    pub train: PointSet,
    pub val: PointSet,
    pub test: PointSet,
}

impl Split {
    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.train.len(), self.val.len(), self.test.len())
    }

    pub fn total(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn subsets(&self) -> [(Subset, &PointSet); 3] {
        [
            (Subset::Train, &self.train),
            (Subset::Validation, &self.val),
            (Subset::Test, &self.test),
        ]
    }
}

/// Checkerboard assignment of a single `(lon, lat)` point.
///
/// Cells are `floor(coord / degrees)`; parity uses Euclidean remainders so
/// cells west of Greenwich or south of the equator follow the same pattern.
/// Rules, first match wins:
///
/// 1. latitude cell even, or longitude cell even: train
/// 2. latitude cell odd and longitude cell `mod 4 == 1`: validation
/// 3. otherwise: test
pub fn checkerboard_subset(point: &Point<f64>, degrees: f64) -> Subset {
    let lat_cell = (point.y() / degrees).floor() as i64;
    let lon_cell = (point.x() / degrees).floor() as i64;

    if lat_cell.rem_euclid(2) == 0 || lon_cell.rem_euclid(2) == 0 {
        Subset::Train
    } else if lat_cell.rem_euclid(2) == 1 && lon_cell.rem_euclid(4) == 1 {
        Subset::Validation
    } else {
        Subset::Test
    }
}

/// Partitions `points` with `method`. `seed` only affects the random method.
pub fn split(points: &PointSet, method: &SplitMethod, seed: u64) -> Result<Split, SplitError> {
    method.validate()?;
    let crs = points.crs();

    let (train, val, test) = match *method {
        SplitMethod::Checkerboard { degrees } => {
            let mut train = Vec::new();
            let mut val = Vec::new();
            let mut test = Vec::new();
            for point in points {
                match checkerboard_subset(point, degrees) {
                    Subset::Train => train.push(*point),
                    Subset::Validation => val.push(*point),
                    Subset::Test => test.push(*point),
                }
            }
            (train, val, test)
        }
        SplitMethod::Random {
            train: train_ratio,
            val: val_ratio,
        } => {
            let mut shuffled = points.points().to_vec();
            let mut rng = StdRng::seed_from_u64(seed);
            shuffled.shuffle(&mut rng);

            let total = shuffled.len();
            let train_size = (train_ratio * total as f64).floor() as usize;
            let val_size = ((val_ratio * total as f64).floor() as usize).min(total - train_size);

            let test = shuffled.split_off(train_size + val_size);
            let val = shuffled.split_off(train_size);
            (shuffled, val, test)
        }
    };

    let split = Split {
        train: PointSet::new(train, crs, Some(seed)),
        val: PointSet::new(val, crs, Some(seed)),
        test: PointSet::new(test, crs, Some(seed)),
    };

    let (n_train, n_val, n_test) = split.sizes();
    info!(
        method = %method.kind(),
        train = n_train,
        val = n_val,
        test = n_test,
        "Split points"
    );
    if !points.is_empty() && (n_val == 0 || n_test == 0) {
        warn!(
            method = %method.kind(),
            val = n_val,
            test = n_test,
            "Split left a subset empty"
        );
    }

    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;

    fn grid_points(n: usize) -> PointSet {
        let pairs: Vec<(f64, f64)> = (0..n)
            .map(|i| (-5.0 + 0.01 * i as f64, 55.0 + 0.003 * i as f64))
            .collect();
        PointSet::from_lon_lat(&pairs, Crs::Wgs84)
    }

    fn sorted(points: &[Point<f64>]) -> Vec<(f64, f64)> {
        let mut pairs: Vec<(f64, f64)> = points.iter().map(|p| (p.x(), p.y())).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        pairs
    }

    #[test]
    fn test_checkerboard_unit_corners() {
        let points =
            PointSet::from_lon_lat(&[(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)], Crs::Wgs84);
        let split = split(&points, &SplitMethod::Checkerboard { degrees: 1.0 }, 0).unwrap();

        assert_eq!(
            split.train.points(),
            &[Point::new(0.0, 0.0), Point::new(0.0, 1.0), Point::new(1.0, 0.0)]
        );
        // Both cells odd and lon_cell mod 4 == 1
        assert_eq!(split.val.points(), &[Point::new(1.0, 1.0)]);
        assert!(split.test.is_empty());
    }

    #[test]
    fn test_checkerboard_rules() {
        // lat cell even
        assert_eq!(checkerboard_subset(&Point::new(3.5, 2.5), 1.0), Subset::Train);
        // lon cell even
        assert_eq!(checkerboard_subset(&Point::new(2.5, 3.5), 1.0), Subset::Train);
        // both odd, lon cell 5 mod 4 == 1
        assert_eq!(checkerboard_subset(&Point::new(5.5, 1.5), 1.0), Subset::Validation);
        // both odd, lon cell 3 mod 4 == 3
        assert_eq!(checkerboard_subset(&Point::new(3.5, 1.5), 1.0), Subset::Test);
    }

    #[test]
    fn test_checkerboard_reads_latitude_from_y() {
        // lon cell 1, lat cell 3; with the axes swapped this would be Test
        assert_eq!(checkerboard_subset(&Point::new(1.5, 3.5), 1.0), Subset::Validation);
        assert_eq!(checkerboard_subset(&Point::new(3.5, 1.5), 1.0), Subset::Test);
    }

    #[test]
    fn test_checkerboard_negative_cells_use_floor() {
        // lat cell 559 (odd); lon cells -32 (even), -33 (3 mod 4), -35 (1 mod 4)
        assert_eq!(checkerboard_subset(&Point::new(-3.19, 55.95), 0.1), Subset::Train);
        assert_eq!(checkerboard_subset(&Point::new(-3.25, 55.95), 0.1), Subset::Test);
        assert_eq!(checkerboard_subset(&Point::new(-3.45, 55.95), 0.1), Subset::Validation);
    }

    #[test]
    fn test_checkerboard_is_pure() {
        let points = grid_points(500);
        let method = SplitMethod::Checkerboard { degrees: 0.05 };

        let a = split(&points, &method, 1).unwrap();
        let b = split(&points, &method, 999).unwrap();
        assert_eq!(a.train.points(), b.train.points());
        assert_eq!(a.val.points(), b.val.points());
        assert_eq!(a.test.points(), b.test.points());
        assert_eq!(a.total(), 500);
    }

    #[test]
    fn test_random_sizes_floor_ratios() {
        let points = grid_points(10);
        let split = split(&points, &SplitMethod::Random { train: 0.7, val: 0.15 }, 42).unwrap();
        assert_eq!(split.sizes(), (7, 1, 2));
    }

    #[test]
    fn test_random_split_is_a_partition() {
        let points = grid_points(257);
        let split = split(&points, &SplitMethod::Random { train: 0.6, val: 0.2 }, 7).unwrap();

        assert_eq!(split.total(), 257);

        let mut joined = Vec::new();
        joined.extend_from_slice(split.train.points());
        joined.extend_from_slice(split.val.points());
        joined.extend_from_slice(split.test.points());
        assert_eq!(sorted(&joined), sorted(points.points()));
    }

    #[test]
    fn test_random_split_is_deterministic_per_seed() {
        let points = grid_points(100);
        let method = SplitMethod::Random { train: 0.8, val: 0.1 };

        let a = split(&points, &method, 3).unwrap();
        let b = split(&points, &method, 3).unwrap();
        assert_eq!(a, b);

        let c = split(&points, &method, 4).unwrap();
        assert_ne!(a.train.points(), c.train.points());
    }

    #[test]
    fn test_random_split_of_nothing() {
        let points = PointSet::from_lon_lat(&[], Crs::Wgs84);
        let split = split(&points, &SplitMethod::Random { train: 0.7, val: 0.2 }, 1).unwrap();
        assert_eq!(split.sizes(), (0, 0, 0));
    }

    #[test]
    fn test_invalid_method_names_the_method() {
        let err = SplitMethod::from_name("kmeans", 0.1, (0.7, 0.2)).unwrap_err();
        assert_eq!(err, SplitError::InvalidMethod("kmeans".to_string()));
        assert!(err.to_string().contains("kmeans"));
    }

    #[test]
    fn test_from_name_validates_only_what_it_uses() {
        assert_eq!(
            SplitMethod::from_name("checkerboard", 0.5, (f64::NAN, 2.0)).unwrap(),
            SplitMethod::Checkerboard { degrees: 0.5 }
        );
        assert_eq!(
            SplitMethod::from_name("random", -1.0, (0.7, 0.2)).unwrap(),
            SplitMethod::Random { train: 0.7, val: 0.2 }
        );
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        assert!(matches!(
            SplitMethod::from_name("random", 0.1, (0.8, 0.3)),
            Err(SplitError::InvalidRatios { .. })
        ));
        assert!(matches!(
            SplitMethod::from_name("random", 0.1, (-0.1, 0.3)),
            Err(SplitError::InvalidRatios { .. })
        ));
        assert!(matches!(
            SplitMethod::from_name("checkerboard", 0.0, (0.7, 0.2)),
            Err(SplitError::InvalidCellSize(_))
        ));

        let points = grid_points(3);
        assert!(split(&points, &SplitMethod::Checkerboard { degrees: -1.0 }, 0).is_err());
    }
}
