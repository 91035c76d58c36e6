pub mod roi;

pub use roi::{RoiRequest, RoiSet, calculate_roi};

/// Axis-aligned rectangle in pixel units. `left`/`top` may be negative only
/// transiently while geometry is being reconciled; all published ROIs are
/// non-negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.left + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }

    pub fn is_degenerate(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Quarter-turn display rotations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Rotation {
    Rot0,
    Rot90,
    Rot180,
    Rot270,
}

impl Rotation {
    /// Whether this rotation exchanges the X and Y axes.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Rot90 | Rotation::Rot270)
    }

    fn quarter_turns(self) -> u32 {
        match self {
            Rotation::Rot0 => 0,
            Rotation::Rot90 => 1,
            Rotation::Rot180 => 2,
            Rotation::Rot270 => 3,
        }
    }

    fn from_quarter_turns(turns: u32) -> Self {
        match turns % 4 {
            0 => Rotation::Rot0,
            1 => Rotation::Rot90,
            2 => Rotation::Rot180,
            _ => Rotation::Rot270,
        }
    }

    /// Rotation equivalent to applying `self` then `other`.
    pub fn compose(self, other: Rotation) -> Self {
        Self::from_quarter_turns(self.quarter_turns() + other.quarter_turns())
    }

    /// Rotation that undoes `self`.
    pub fn inverse(self) -> Self {
        Self::from_quarter_turns(4 - self.quarter_turns())
    }
}

/// Layer transform applied by the blit engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transform {
    pub rotation: Rotation,
    pub flip_h: bool,
    pub flip_v: bool,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        rotation: Rotation::Rot0,
        flip_h: false,
        flip_v: false,
    };

    pub fn rotate(rotation: Rotation) -> Self {
        Self {
            rotation,
            flip_h: false,
            flip_v: false,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_composition_wraps() {
        assert_eq!(Rotation::Rot270.compose(Rotation::Rot180), Rotation::Rot90);
        assert_eq!(Rotation::Rot90.compose(Rotation::Rot270), Rotation::Rot0);
    }

    #[test]
    fn inverse_undoes() {
        for r in [
            Rotation::Rot0,
            Rotation::Rot90,
            Rotation::Rot180,
            Rotation::Rot270,
        ] {
            assert_eq!(r.compose(r.inverse()), Rotation::Rot0);
        }
    }

    #[test]
    fn only_quarter_turns_swap_axes() {
        assert!(!Rotation::Rot0.swaps_axes());
        assert!(Rotation::Rot90.swaps_axes());
        assert!(!Rotation::Rot180.swaps_axes());
        assert!(Rotation::Rot270.swaps_axes());
    }
}
