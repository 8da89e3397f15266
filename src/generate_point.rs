use geo::{Point, Rect};
use rand::Rng;

use crate::region::ContainmentOracle;

/// Uniform point inside `bounds`, edges included.
pub fn random_point_in_bounds<R: Rng>(rng: &mut R, bounds: &Rect<f64>) -> Point<f64> {
    let x = rng.random_range(bounds.min().x..=bounds.max().x);
    let y = rng.random_range(bounds.min().y..=bounds.max().y);
    Point::new(x, y)
}

/// Draws between checks of the caller's stop condition.
pub const CHECK_INTERVAL: u64 = 32;

/// Outcome of [`random_point_in_region`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Draw {
    Accepted(Point<f64>),
    /// `max_draws` consecutive rejections
    Exhausted,
    /// `stop` returned true
    Interrupted,
}

/// Rejection-samples a point strictly inside `oracle`.
///
/// Gives up after `max_draws` consecutive rejections. `stop` is polled
/// before the first draw and every [`CHECK_INTERVAL`] draws after that.
/// Every draw, accepted or not, is added to `draws`.
pub fn random_point_in_region<R, O, S>(
    rng: &mut R,
    oracle: &O,
    max_draws: u64,
    draws: &mut u64,
    mut stop: S,
) -> Draw
where
    R: Rng,
    O: ContainmentOracle + ?Sized,
    S: FnMut() -> bool,
{
    let bounds = oracle.bounding_rect();
    for attempt in 0..max_draws {
        if attempt % CHECK_INTERVAL == 0 && stop() {
            return Draw::Interrupted;
        }
        *draws += 1;
        let candidate = random_point_in_bounds(rng, &bounds);
        if oracle.contains(&candidate) {
            return Draw::Accepted(candidate);
        }
    }
    Draw::Exhausted
}
