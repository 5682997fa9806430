//! `Real3`: three-component coordinate/vector value.

use bytemuck::{Pod, Zeroable};
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub, SubAssign};

/// Three `f64` components, laid out like `[f64; 3]`.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable, serde::Serialize, serde::Deserialize,
)]
#[repr(C)]
pub struct Real3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Real3 {
    pub const ZERO: Real3 = Real3::new(0.0, 0.0, 0.0);

    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn dot(self, other: Real3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }
}

impl From<[f64; 3]> for Real3 {
    #[inline]
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Real3> for [f64; 3] {
    #[inline]
    fn from(v: Real3) -> Self {
        [v.x, v.y, v.z]
    }
}

impl fmt::Display for Real3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{},{}}}", self.x, self.y, self.z)
    }
}

// Component-wise arithmetic, including `*` and `/`.
macro_rules! componentwise {
    ($tr:ident, $m:ident, $tra:ident, $ma:ident, $op:tt) => {
        impl $tr for Real3 {
            type Output = Real3;
            #[inline]
            fn $m(self, rhs: Real3) -> Real3 {
                Real3::new(self.x $op rhs.x, self.y $op rhs.y, self.z $op rhs.z)
            }
        }
        impl $tra for Real3 {
            #[inline]
            fn $ma(&mut self, rhs: Real3) {
                *self = *self $op rhs;
            }
        }
    };
}

componentwise!(Add, add, AddAssign, add_assign, +);
componentwise!(Sub, sub, SubAssign, sub_assign, -);
componentwise!(Mul, mul, MulAssign, mul_assign, *);
componentwise!(Div, div, DivAssign, div_assign, /);

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(Real3, [f64; 3]);

    #[test]
    fn arithmetic_is_componentwise() {
        let a = Real3::new(1.0, 2.0, 3.0);
        let b = Real3::new(2.0, 4.0, 6.0);
        assert_eq!(a + b, Real3::new(3.0, 6.0, 9.0));
        assert_eq!(b - a, a);
        assert_eq!(a * b, Real3::new(2.0, 8.0, 18.0));
        assert_eq!(b / a, Real3::new(2.0, 2.0, 2.0));
        let mut c = a;
        c += a;
        c -= Real3::new(1.0, 1.0, 1.0);
        assert_eq!(c, Real3::new(1.0, 3.0, 5.0));
    }

    #[test]
    fn display_matches_brace_format() {
        assert_eq!(Real3::new(0.0, 1.5, -1.0).to_string(), "{0,1.5,-1}");
    }

    #[test]
    fn json_roundtrip() {
        let p = Real3::new(0.0, 2.7, -1.0);
        let s = serde_json::to_string(&p).unwrap();
        let back: Real3 = serde_json::from_str(&s).unwrap();
        assert_eq!(back, p);
    }
}
