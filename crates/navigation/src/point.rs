// Point - 3-component world position used at the navigation boundary

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Per-axis tolerance for point equality and the zero test
pub const POINT_EPSILON: f32 = 0.001;

/// Divisors at or below this magnitude produce the zero point
const MIN_DIVISOR: f32 = 0.001;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Point {
    x: f32,
    y: f32,
    z: f32,
}

impl Point {
    pub const ZERO: Point = Point::new(0.0, 0.0, 0.0);
    pub const ONE: Point = Point::new(1.0, 1.0, 1.0);
    pub const UNIT_X: Point = Point::new(1.0, 0.0, 0.0);
    pub const UNIT_Y: Point = Point::new(0.0, 1.0, 0.0);
    pub const UNIT_Z: Point = Point::new(0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Point { x, y, z }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn z(&self) -> f32 {
        self.z
    }

    /// Same point with the height replaced
    pub fn with_y(self, y: f32) -> Self {
        Point { y, ..self }
    }

    pub fn magnitude_sqr(&self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn magnitude(&self) -> f32 {
        self.magnitude_sqr().sqrt()
    }

    /// Every axis lies strictly within `POINT_EPSILON` of zero
    pub fn is_zero(&self) -> bool {
        self.x.abs() < POINT_EPSILON && self.y.abs() < POINT_EPSILON && self.z.abs() < POINT_EPSILON
    }

    /// Unit vector in the same direction; near-zero vectors give the zero point
    pub fn normalized(&self) -> Point {
        if self.is_zero() {
            return Point::ZERO;
        }
        let inv = 1.0 / self.magnitude();
        Point::new(self.x * inv, self.y * inv, self.z * inv)
    }

    pub fn distance(&self, other: &Point) -> f32 {
        (*self - *other).magnitude()
    }

    /// Linear interpolation toward `other`
    pub fn lerp(&self, other: &Point, t: f32) -> Point {
        *self + (*other - *self) * t
    }

    /// Compare by magnitude
    pub fn cmp_magnitude(&self, other: &Point) -> Ordering {
        self.magnitude_sqr().total_cmp(&other.magnitude_sqr())
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        (self.x - other.x).abs() < POINT_EPSILON
            && (self.y - other.y).abs() < POINT_EPSILON
            && (self.z - other.z).abs() < POINT_EPSILON
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

impl From<[f32; 3]> for Point {
    fn from(v: [f32; 3]) -> Self {
        Point::new(v[0], v[1], v[2])
    }
}

impl From<Point> for [f32; 3] {
    fn from(p: Point) -> Self {
        [p.x, p.y, p.z]
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Point {
    type Output = Point;

    fn neg(self) -> Point {
        Point::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f32> for Point {
    type Output = Point;

    fn mul(self, s: f32) -> Point {
        Point::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Div<f32> for Point {
    type Output = Point;

    fn div(self, s: f32) -> Point {
        if s.abs() <= MIN_DIVISOR {
            return Point::ZERO;
        }
        Point::new(self.x / s, self.y / s, self.z / s)
    }
}

impl AddAssign for Point {
    fn add_assign(&mut self, rhs: Point) {
        *self = *self + rhs;
    }
}

impl SubAssign for Point {
    fn sub_assign(&mut self, rhs: Point) {
        *self = *self - rhs;
    }
}

impl MulAssign<f32> for Point {
    fn mul_assign(&mut self, s: f32) {
        *self = *self * s;
    }
}

impl DivAssign<f32> for Point {
    fn div_assign(&mut self, s: f32) {
        *self = *self / s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        let a = Point::new(1.0, 2.0, 3.0);
        let b = Point::new(0.5, -1.0, 2.0);
        assert_eq!(a + b, Point::new(1.5, 1.0, 5.0));
        assert_eq!(a - b, Point::new(0.5, 3.0, 1.0));
        assert_eq!(-a, Point::new(-1.0, -2.0, -3.0));
        assert_eq!(a * 2.0, Point::new(2.0, 4.0, 6.0));
        assert_eq!(a / 2.0, Point::new(0.5, 1.0, 1.5));

        let mut c = a;
        c += b;
        c -= b;
        c *= 4.0;
        c /= 2.0;
        assert_eq!(c, Point::new(2.0, 4.0, 6.0));
    }

    #[test]
    fn test_tiny_divisor_gives_zero() {
        let a = Point::new(3.0, 4.0, 5.0);
        assert_eq!(a / 0.0005, Point::ZERO);
        assert_eq!(a / -0.001, Point::ZERO);
        assert_eq!(Point::new(0.0001, 0.0, 0.0).normalized(), Point::ZERO);
    }

    #[test]
    fn test_zero_test_is_per_axis() {
        assert!(Point::new(0.0009, -0.0009, 0.0009).is_zero());
        assert!(!Point::new(0.001, 0.0, 0.0).is_zero());

        // One axis past the tolerance is enough to normalise
        let small = Point::new(0.0008, 0.0008, 0.002);
        assert!(!small.is_zero());
        assert!((small.normalized().magnitude() - 1.0).abs() < 1e-4);

        // Every axis tiny but magnitude above 0.001 still counts as zero
        assert_eq!(Point::new(0.0009, 0.0009, 0.0009).normalized(), Point::ZERO);
    }

    #[test]
    fn test_magnitude_and_distance() {
        let a = Point::new(3.0, 0.0, 4.0);
        assert_eq!(a.magnitude(), 5.0);
        assert_eq!(a.magnitude_sqr(), 25.0);
        assert_eq!(a.normalized(), Point::new(0.6, 0.0, 0.8));
        assert_eq!(a.distance(&Point::ZERO), 5.0);
        assert_eq!(Point::UNIT_X.cmp_magnitude(&a), Ordering::Less);
        assert_eq!(a.cmp_magnitude(&Point::new(0.0, 5.0, 0.0)), Ordering::Equal);
    }

    #[test]
    fn test_equality_tolerance() {
        let a = Point::new(1.0, 1.0, 1.0);
        assert_eq!(a, Point::new(1.0009, 0.9991, 1.0));
        assert_ne!(a, Point::new(1.002, 1.0, 1.0));
        assert_eq!(a, Point::ONE);

        // The tolerance itself is not equal
        assert_ne!(Point::ZERO, Point::new(0.0, 0.0, 0.001));
        assert_ne!(Point::new(0.0, 0.0, -0.001), Point::ZERO);
    }

    #[test]
    fn test_conversions() {
        let p: Point = [1.0, 2.0, 3.0].into();
        assert_eq!(p.x(), 1.0);
        assert_eq!(p.y(), 2.0);
        assert_eq!(p.z(), 3.0);
        let v: [f32; 3] = p.with_y(7.0).into();
        assert_eq!(v, [1.0, 7.0, 3.0]);
        assert_eq!(Point::ZERO.lerp(&Point::new(2.0, 0.0, 0.0), 0.25), Point::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn test_display() {
        assert_eq!(Point::UNIT_Z.to_string(), "(0.000, 0.000, 1.000)");
    }
}
