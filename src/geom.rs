use serde::{Deserialize, Serialize};

/// A position or extent in row-major terminal space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Vec2 {
    pub r: i32,
    pub c: i32,
}

pub type Size = Vec2;

pub const DEFAULT_SIZE: Size = Size { r: 26, c: 80 };

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { r: 0, c: 0 };

    pub fn new(r: i32, c: i32) -> Self {
        Vec2 { r, c }
    }

    pub fn add(self, other: Vec2) -> Vec2 {
        Vec2 {
            r: self.r + other.r,
            c: self.c + other.c,
        }
    }

    pub fn sub(self, other: Vec2) -> Vec2 {
        Vec2 {
            r: self.r - other.r,
            c: self.c - other.c,
        }
    }

    pub fn is_zero(self) -> bool {
        self == Vec2::ZERO
    }

    /// The top-left offset that centers `inner` within `self`.
    pub fn center(self, inner: Size) -> Vec2 {
        Vec2 {
            r: (self.r - inner.r) / 2,
            c: (self.c - inner.c) / 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub pos: Vec2,
    pub size: Size,
}

impl Rect {
    pub fn contains(&self, point: Vec2) -> bool {
        point.r >= self.pos.r
            && point.r <= self.pos.r + self.size.r
            && point.c >= self.pos.c
            && point.c <= self.pos.c + self.size.c
    }
}

pub fn clamp(value: i32, min: i32, max: i32) -> i32 {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_offsets() {
        let outer = Size::new(10, 10);
        assert_eq!(outer.center(Size::new(4, 4)), Vec2::new(3, 3));
        assert_eq!(outer.center(Size::new(10, 10)), Vec2::ZERO);
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp(5, 0, 3), 3);
        assert_eq!(clamp(-1, 0, 3), 0);
        assert_eq!(clamp(2, 0, 3), 2);
    }
}
