//! Synthetic trajectory and plane-wave kernel
//!
//! A seeded, in-memory sample source so the binary and tests can drive the
//! pipeline end to end without reading trajectory files.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use thiserror::Error;
use tracing::debug;

use crate::pipeline::{FrameKernel, KernelError};
use crate::types::{Complex64, QVector, Vec3};

/// Edge length of the cubic box synthetic atoms are placed in.
pub const SYNTHETIC_BOX_LENGTH: f64 = 10.0;

/// Standard deviation of per-frame thermal displacement.
pub const SYNTHETIC_THERMAL_SIGMA: f64 = 0.1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrajectoryError {
    #[error("expected {expected} coordinates ({atoms} atoms x {frames} frames), got {got}")]
    Shape {
        atoms: usize,
        frames: usize,
        expected: usize,
        got: usize,
    },

    #[error("expected {atoms} scattering lengths, got {got}")]
    ScatteringLengths { atoms: usize, got: usize },
}

/// Atom coordinates for every frame, stored frame-major.
#[derive(Debug, Clone)]
pub struct Trajectory {
    atoms: usize,
    frames: usize,
    positions: Vec<Vec3>,
    scattering_lengths: Vec<f64>,
}

impl Trajectory {
    pub fn new(
        atoms: usize,
        frames: usize,
        positions: Vec<Vec3>,
        scattering_lengths: Vec<f64>,
    ) -> Result<Self, TrajectoryError> {
        if positions.len() != atoms * frames {
            return Err(TrajectoryError::Shape {
                atoms,
                frames,
                expected: atoms * frames,
                got: positions.len(),
            });
        }
        if scattering_lengths.len() != atoms {
            return Err(TrajectoryError::ScatteringLengths {
                atoms,
                got: scattering_lengths.len(),
            });
        }
        Ok(Self {
            atoms,
            frames,
            positions,
            scattering_lengths,
        })
    }

    /// Atoms at random sites in a cubic box, each jittered by Gaussian noise
    /// every frame. Same seed, same trajectory.
    pub fn synthetic(atoms: usize, frames: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let sites: Vec<Vec3> = (0..atoms)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(0.0..SYNTHETIC_BOX_LENGTH),
                    rng.gen_range(0.0..SYNTHETIC_BOX_LENGTH),
                    rng.gen_range(0.0..SYNTHETIC_BOX_LENGTH),
                )
            })
            .collect();
        let scattering_lengths = (0..atoms).map(|_| rng.gen_range(0.5..2.0)).collect();

        let mut positions = Vec::with_capacity(atoms * frames);
        for _ in 0..frames {
            for site in &sites {
                let mut jitter = || rng.sample::<f64, _>(StandardNormal) * SYNTHETIC_THERMAL_SIGMA;
                positions.push(Vec3::new(
                    site.x + jitter(),
                    site.y + jitter(),
                    site.z + jitter(),
                ));
            }
        }

        debug!(atoms, frames, seed, "Generated synthetic trajectory");
        Self {
            atoms,
            frames,
            positions,
            scattering_lengths,
        }
    }

    pub fn atoms(&self) -> usize {
        self.atoms
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Coordinates of every atom in `frame`.
    pub fn frame(&self, frame: usize) -> Option<&[Vec3]> {
        if frame >= self.frames {
            return None;
        }
        let start = frame * self.atoms;
        Some(&self.positions[start..start + self.atoms])
    }

    pub fn scattering_lengths(&self) -> &[f64] {
        &self.scattering_lengths
    }
}

/// `count` scattering vectors along z, evenly spaced up to `q_max`.
pub fn scan_along_z(count: u64, q_max: f64) -> Vec<QVector> {
    (0..count)
        .map(|id| {
            let q = q_max * (id + 1) as f64 / count as f64;
            QVector::new(id, Vec3::new(0.0, 0.0, q))
        })
        .collect()
}

/// Coherent scattering amplitude of one frame: `sum_j b_j * exp(i q.r_j)`.
#[derive(Debug, Clone)]
pub struct PlaneWaveKernel {
    trajectory: std::sync::Arc<Trajectory>,
}

impl PlaneWaveKernel {
    pub fn new(trajectory: std::sync::Arc<Trajectory>) -> Self {
        Self { trajectory }
    }
}

impl FrameKernel for PlaneWaveKernel {
    fn width(&self) -> usize {
        1
    }

    fn compute(
        &self,
        vector: &QVector,
        frame: usize,
        out: &mut [Complex64],
    ) -> Result<(), KernelError> {
        let positions = self.trajectory.frame(frame).ok_or_else(|| {
            KernelError::new(format!(
                "frame {frame} not in trajectory of {} frames",
                self.trajectory.frames()
            ))
        })?;
        let slot = out
            .first_mut()
            .ok_or_else(|| KernelError::new("empty output buffer"))?;

        *slot = positions
            .iter()
            .zip(self.trajectory.scattering_lengths())
            .map(|(r, &b)| Complex64::from_polar(b, vector.value.dot(r)))
            .sum();
        Ok(())
    }

    fn name(&self) -> &str {
        "plane-wave"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_synthetic_is_seeded() {
        let a = Trajectory::synthetic(5, 3, 42);
        let b = Trajectory::synthetic(5, 3, 42);
        let c = Trajectory::synthetic(5, 3, 43);
        assert_eq!(a.frame(2), b.frame(2));
        assert_ne!(a.frame(2), c.frame(2));
        assert_eq!(a.scattering_lengths().len(), 5);
        assert!(a.frame(3).is_none());
    }

    #[test]
    fn test_new_checks_shape() {
        let err = Trajectory::new(2, 2, vec![Vec3::default(); 3], vec![1.0; 2]).unwrap_err();
        assert!(matches!(err, TrajectoryError::Shape { expected: 4, got: 3, .. }));
        let err = Trajectory::new(2, 1, vec![Vec3::default(); 2], vec![1.0]).unwrap_err();
        assert_eq!(err, TrajectoryError::ScatteringLengths { atoms: 2, got: 1 });
    }

    #[test]
    fn test_plane_wave_at_zero_q_sums_lengths() {
        let traj = Arc::new(Trajectory::new(
            2,
            1,
            vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(-4.0, 0.5, 9.0)],
            vec![1.5, 0.25],
        )
        .unwrap());
        let kernel = PlaneWaveKernel::new(traj);
        let mut out = [Complex64::default()];
        kernel
            .compute(&QVector::new(0, Vec3::default()), 0, &mut out)
            .unwrap();
        assert!((out[0].re - 1.75).abs() < 1e-12);
        assert!(out[0].im.abs() < 1e-12);
    }

    #[test]
    fn test_plane_wave_phase() {
        let traj = Arc::new(
            Trajectory::new(1, 1, vec![Vec3::new(0.0, 0.0, 1.0)], vec![2.0]).unwrap(),
        );
        let kernel = PlaneWaveKernel::new(traj);
        let mut out = [Complex64::default()];
        let q = QVector::new(0, Vec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2));
        kernel.compute(&q, 0, &mut out).unwrap();
        assert!(out[0].re.abs() < 1e-12);
        assert!((out[0].im - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_plane_wave_unknown_frame() {
        let kernel = PlaneWaveKernel::new(Arc::new(Trajectory::synthetic(2, 2, 1)));
        let mut out = [Complex64::default()];
        assert!(kernel
            .compute(&QVector::new(0, Vec3::default()), 2, &mut out)
            .is_err());
    }

    #[test]
    fn test_scan_along_z() {
        let qs = scan_along_z(4, 2.0);
        assert_eq!(qs.len(), 4);
        assert_eq!(qs[0].id, 0);
        assert_eq!(qs[0].value, Vec3::new(0.0, 0.0, 0.5));
        assert_eq!(qs[3].value, Vec3::new(0.0, 0.0, 2.0));
    }
}
