//! Shared value types for the scattering pipeline.

use serde::{Deserialize, Serialize};

pub use num_complex::Complex64;

/// Cartesian 3-vector (coordinates or scattering vector components).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(&self, other: &Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }
}

/// One scattering vector assigned to a process group, keyed by its global index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QVector {
    pub id: u64,
    pub value: Vec3,
}

impl QVector {
    pub fn new(id: u64, value: Vec3) -> Self {
        Self { id, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_and_norm() {
        let a = Vec3::new(1.0, 2.0, 2.0);
        assert_eq!(a.dot(&Vec3::new(1.0, 0.0, 0.0)), 1.0);
        assert_eq!(a.norm(), 3.0);
    }
}
