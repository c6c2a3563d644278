//! # Common Types
//!
//! Math types shared by every peer. Rotations travel as Euler angles in
//! degrees and are compared as quaternions.

use serde::{Serialize, Deserialize};

/// Three-component vector used for positions and scales
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0 }
    }

    pub fn one() -> Self {
        Self { x: 1.0, y: 1.0, z: 1.0 }
    }

    /// Squared distance between two points
    pub fn distance_squared(&self, other: &Vector3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Euclidean distance between two points
    pub fn distance(&self, other: &Vector3) -> f32 {
        self.distance_squared(other).sqrt()
    }
}

/// Euler rotation in degrees, one angle per axis
///
/// Composition order is Z, then X, then Y, the convention used by the
/// editors that produce these values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotator {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Rotator {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0 }
    }

    /// Convert to a unit quaternion
    pub fn to_quat(&self) -> Quat {
        let qx = Quat::from_axis_angle_degrees(Vector3::new(1.0, 0.0, 0.0), self.x);
        let qy = Quat::from_axis_angle_degrees(Vector3::new(0.0, 1.0, 0.0), self.y);
        let qz = Quat::from_axis_angle_degrees(Vector3::new(0.0, 0.0, 1.0), self.z);
        qy.mul(&qx).mul(&qz)
    }

    /// Smallest angle in degrees between the orientations of two rotators
    pub fn angle_to(&self, other: &Rotator) -> f32 {
        self.to_quat().angle_to(&other.to_quat())
    }

    /// Reinterpret as a vector, for the wire triple encoding
    pub fn as_vector(&self) -> Vector3 {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn from_vector(v: Vector3) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

/// Quaternion representation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn identity() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }

    /// Rotation of `degrees` around a unit `axis`
    pub fn from_axis_angle_degrees(axis: Vector3, degrees: f32) -> Self {
        let half = degrees.to_radians() * 0.5;
        let s = half.sin();
        Self {
            x: axis.x * s,
            y: axis.y * s,
            z: axis.z * s,
            w: half.cos(),
        }
    }

    /// Hamilton product `self * rhs`
    pub fn mul(&self, rhs: &Quat) -> Quat {
        Quat {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }

    pub fn dot(&self, other: &Quat) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    /// Angle in degrees needed to rotate one orientation onto the other
    pub fn angle_to(&self, other: &Quat) -> f32 {
        // q and -q are the same orientation
        let d = self.dot(other).abs().min(1.0);
        (2.0 * d.acos()).to_degrees()
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn distance_is_euclidean() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 3.0, 4.0);
        assert_relative_eq!(a.distance(&b), 5.0);
    }

    #[test]
    fn single_axis_angle_matches_delta() {
        let a = Rotator::new(0.0, 10.0, 0.0);
        let b = Rotator::new(0.0, 40.0, 0.0);
        assert_relative_eq!(a.angle_to(&b), 30.0, epsilon = 1e-3);
    }

    #[test]
    fn full_turn_is_same_orientation() {
        let a = Rotator::new(0.0, 0.0, 0.0);
        let b = Rotator::new(0.0, 360.0, 0.0);
        assert!(a.angle_to(&b) < 0.05);
    }

    #[test]
    fn zero_rotator_is_identity() {
        let q = Rotator::zero().to_quat();
        assert_relative_eq!(q.w, 1.0);
        assert_relative_eq!(q.x, 0.0);
    }
}
