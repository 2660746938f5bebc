//! Helpers shared by the workspace's integration tests.
//!
//! [`MemoryFetcher`] serves synthetic tiles for any request and can be told
//! to fail chosen keys, so composition and export run without a network.
//! Elevation tiles sample [`plane_elevation`], which lets a test compute
//! the expected height at any point. [`sectors`] holds the selections the
//! tests share.
//!
//! Used as a dev-dependency from `tests/` directories only; the compositor
//! depends on it, so it cannot be pulled into the compositor's unit tests.

pub mod fixtures;
pub mod generators;

pub use fixtures::*;
pub use generators::*;

/// Assert two numbers are within `epsilon` of each other, comparing as `f64`.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "values differ by {:?} (> {:?}): left {:?}, right {:?}",
                diff, epsilon, left, right
            );
        }
    }};
}
