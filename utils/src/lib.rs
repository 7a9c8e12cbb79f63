// A set of helper structs for common operations
//
// These are shared between the windowing core and anything
// that embeds it: logging, fd watching, timing, and regions.
pub mod timing;
#[macro_use]
pub mod logging;
pub mod fdwatch;
pub mod log;
pub mod region;

extern crate anyhow;
pub use anyhow::{anyhow, Context, Error, Result};

/// Helper to perform max on PartialOrd types
///
/// We are using PartialOrd so that sizes and scales can handle
/// floating point types that do not support Ord
pub fn partial_max<T: PartialOrd>(a: T, b: T) -> T {
    if a >= b {
        return a;
    } else {
        return b;
    }
}

/// Helper to perform min on PartialOrd types
pub fn partial_min<T: PartialOrd>(a: T, b: T) -> T {
    if a <= b {
        return a;
    } else {
        return b;
    }
}
