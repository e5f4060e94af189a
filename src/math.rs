//! Small value-semantics vector and quaternion kernel.
//!
//! Only what the skeleton decoder needs: composition, inversion, rotation of a
//! vector by a quaternion and conversion from a 3x3 orientation matrix.

use std::ops::{Add, Mul, Neg, Sub};

/// Below this the Euler extraction treats the matrix as gimbal locked.
const GIMBAL_EPSILON: f64 = 0.00016;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vector3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Unit vector in the same direction. A zero-length vector stays zero.
    pub fn normalize(self) -> Vector3 {
        let len = self.length();
        if len == 0.0 {
            return Vector3::ZERO;
        }
        self * (1.0 / len)
    }

    pub fn scale(self, factor: f32) -> Vector3 {
        Vector3::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f32; 3]> for Vector3 {
    fn from(v: [f32; 3]) -> Self {
        Vector3::new(v[0], v[1], v[2])
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;

    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f32> for Vector3 {
    type Output = Vector3;

    fn mul(self, rhs: f32) -> Vector3 {
        self.scale(rhs)
    }
}

impl Mul<Vector3> for f32 {
    type Output = Vector3;

    fn mul(self, rhs: Vector3) -> Vector3 {
        rhs.scale(self)
    }
}

/// A quaternion stored as scalar part `w` plus vector part `v`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quaternion {
    pub w: f32,
    pub v: Vector3,
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion::new(1.0, Vector3::ZERO);

    pub const fn new(w: f32, v: Vector3) -> Self {
        Self { w, v }
    }

    pub const fn from_xyzw(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self::new(w, Vector3::new(x, y, z))
    }

    /// A pure quaternion `(v, 0)` used to rotate points.
    pub const fn pure(v: Vector3) -> Self {
        Self::new(0.0, v)
    }

    pub fn length_squared(self) -> f32 {
        self.w * self.w + self.v.length_squared()
    }

    pub fn conjugate(self) -> Quaternion {
        Quaternion::new(self.w, -self.v)
    }

    /// Multiplicative inverse. A zero quaternion is returned unchanged.
    pub fn invert(self) -> Quaternion {
        let len_sq = self.length_squared();
        if len_sq == 0.0 {
            return self;
        }
        let inv = 1.0 / len_sq;
        Quaternion::new(self.w * inv, self.v * -inv)
    }

    /// Rotate `point` by this (unit) quaternion: `q * (p, 0) * conj(q)`.
    pub fn rotate(self, point: Vector3) -> Vector3 {
        (self * Quaternion::pure(point) * self.conjugate()).v
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    /// Hamilton product.
    fn mul(self, rhs: Quaternion) -> Quaternion {
        Quaternion::new(
            self.w * rhs.w - self.v.dot(rhs.v),
            rhs.w * self.v + self.w * rhs.v + self.v.cross(rhs.v),
        )
    }
}

/// A 3x3 matrix addressed as `m[row][col]`.
pub type Matrix3 = [[f32; 3]; 3];

/// Convert an orientation matrix into a quaternion.
///
/// Uses the trace when it is positive, otherwise pivots on the largest
/// diagonal element so the square root argument stays well away from zero.
pub fn matrix_to_quaternion(m: &Matrix3) -> Quaternion {
    const NEXT: [usize; 3] = [1, 2, 0];

    let trace = (m[0][0] + m[1][1] + m[2][2]) as f64;
    if trace > 0.0 {
        let root = (trace + 1.0).sqrt();
        let w = root / 2.0;
        let scale = 0.5 / root;
        return Quaternion::from_xyzw(
            ((m[1][2] - m[2][1]) as f64 * scale) as f32,
            ((m[2][0] - m[0][2]) as f64 * scale) as f32,
            ((m[0][1] - m[1][0]) as f64 * scale) as f32,
            w as f32,
        );
    }

    let mut i = 0;
    if m[1][1] > m[0][0] {
        i = 1;
    }
    if m[2][2] > m[i][i] {
        i = 2;
    }
    let j = NEXT[i];
    let k = NEXT[j];

    let mut q = [0f64; 4];
    let mut root = ((m[i][i] - (m[j][j] + m[k][k])) as f64 + 1.0).sqrt();
    q[i] = root * 0.5;
    if root != 0.0 {
        root = 0.5 / root;
    }
    q[3] = (m[j][k] - m[k][j]) as f64 * root;
    q[j] = (m[i][j] + m[j][i]) as f64 * root;
    q[k] = (m[i][k] + m[k][i]) as f64 * root;

    Quaternion::from_xyzw(q[0] as f32, q[1] as f32, q[2] as f32, q[3] as f32)
}

/// Static-frame XYZ Euler angles (radians) of a quaternion.
pub fn quaternion_to_euler(q: Quaternion) -> Vector3 {
    let (x, y, z, w) = (q.v.x as f64, q.v.y as f64, q.v.z as f64, q.w as f64);
    let norm = x * x + y * y + z * z + w * w;
    let s = if norm > 0.0 { 2.0 / norm } else { 0.0 };

    let (xs, ys, zs) = (x * s, y * s, z * s);
    let (wx, wy, wz) = (w * xs, w * ys, w * zs);
    let (xx, xy, xz) = (x * xs, x * ys, x * zs);
    let (yy, yz, zz) = (y * ys, y * zs, z * zs);

    let m00 = 1.0 - (yy + zz);
    let m10 = xy + wz;
    let m11 = 1.0 - (xx + zz);
    let m12 = yz - wx;
    let m20 = xz - wy;
    let m21 = yz + wx;
    let m22 = 1.0 - (xx + yy);

    let cy = (m00 * m00 + m10 * m10).sqrt();
    if cy > GIMBAL_EPSILON {
        Vector3::new(
            m21.atan2(m22) as f32,
            (-m20).atan2(cy) as f32,
            m10.atan2(m00) as f32,
        )
    } else {
        Vector3::new((-m12).atan2(m11) as f32, (-m20).atan2(cy) as f32, 0.0)
    }
}
