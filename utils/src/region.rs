// Region tracking helpers

use std::cmp::PartialOrd;
use std::ops::{Add, Sub};

use crate::{partial_max, partial_min};

/// A rectangular region
///
/// This is used for viewports and other sub-areas of a
/// buffer. It is determinined by the corners of a rectangle:
///   r_pos:  the upper left corner's position in the buffer
///   r_size: the distance from the left to the lower right
#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct Rect<T: PartialOrd + Copy + Add + Add<Output = T>> {
    pub r_pos: (T, T),
    pub r_size: (T, T),
}

impl<T: PartialOrd + Copy + Add + Add<Output = T>> Rect<T> {
    pub fn new(x: T, y: T, width: T, height: T) -> Rect<T> {
        Rect {
            r_pos: (x, y),
            r_size: (width, height),
        }
    }

    /// Checks if the point (x,y) is contained within this
    /// Rectangle. The upper left edges are inclusive.
    pub fn contains(&self, x: T, y: T) -> bool {
        x >= self.r_pos.0
            && y >= self.r_pos.1
            && x < self.r_pos.0 + self.r_size.0
            && y < self.r_pos.1 + self.r_size.1
    }
}

impl<T> Rect<T>
where
    T: PartialOrd + Copy + Default + Add + Add<Output = T> + Sub<Output = T>,
{
    /// Clamp this rectangle so it lies entirely inside a
    /// `width` x `height` area anchored at the origin.
    ///
    /// A rectangle that falls completely outside ends up with
    /// a zero size at the nearest edge.
    pub fn clamp_to(&self, width: T, height: T) -> Rect<T> {
        let zero = T::default();
        let x = partial_min(partial_max(self.r_pos.0, zero), width);
        let y = partial_min(partial_max(self.r_pos.1, zero), height);
        let right = partial_min(partial_max(self.r_pos.0 + self.r_size.0, x), width);
        let bottom = partial_min(partial_max(self.r_pos.1 + self.r_size.1, y), height);

        Rect::new(x, y, right - x, bottom - y)
    }
}

#[cfg(test)]
mod tests {
    use super::Rect;

    #[test]
    fn clamp_inside_is_unchanged() {
        let r = Rect::new(10, 10, 100, 50);
        assert_eq!(r.clamp_to(1920, 1080), r);
    }

    #[test]
    fn clamp_shrinks_overhang() {
        let r = Rect::new(-10, 900, 300, 400);
        assert_eq!(r.clamp_to(200, 1000), Rect::new(0, 900, 200, 100));
    }

    #[test]
    fn clamp_outside_is_empty() {
        let r = Rect::new(500, 500, 10, 10);
        assert_eq!(r.clamp_to(100, 100), Rect::new(100, 100, 0, 0));
    }

    #[test]
    fn contains_edges() {
        let r = Rect::new(0, 0, 10, 10);
        assert!(r.contains(0, 0));
        assert!(!r.contains(10, 5));
    }
}
