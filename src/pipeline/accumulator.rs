//! Shared spectrum accumulator.
//!
//! The spectrum is a `frames x width` row-major table of complex samples.
//! Marshal workers fold each frame's partial result into the row named by its
//! frame index, so arrival order never matters. The mutex is the only
//! serialization point between marshal workers.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::Complex64;

#[derive(Debug)]
pub struct SpectrumAccumulator {
    frames: usize,
    width: usize,
    data: Mutex<Vec<Complex64>>,
}

impl SpectrumAccumulator {
    pub fn new(frames: usize, width: usize) -> Self {
        Self {
            frames,
            width,
            data: Mutex::new(vec![Complex64::default(); frames * width]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Complex64>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Samples per frame.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Total number of samples (`frames * width`).
    pub fn len(&self) -> usize {
        self.frames * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add `samples` element-wise into row `frame`.
    ///
    /// Returns `false` and leaves the spectrum untouched when the frame is out
    /// of range or the sample count does not match the row width.
    pub fn fold(&self, frame: usize, samples: &[Complex64]) -> bool {
        if frame >= self.frames || samples.len() != self.width {
            return false;
        }
        let start = frame * self.width;
        let mut data = self.lock();
        for (acc, s) in data[start..start + self.width].iter_mut().zip(samples) {
            *acc += *s;
        }
        true
    }

    /// Zero every sample before the next vector.
    pub fn reset(&self) {
        self.lock().fill(Complex64::default());
    }

    /// Copy of the current spectrum, taken under the lock.
    pub fn snapshot(&self) -> Vec<Complex64> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_fold_targets_frame_row() {
        let acc = SpectrumAccumulator::new(3, 2);
        assert!(acc.fold(1, &[c(1.0, 0.0), c(0.0, 1.0)]));
        assert!(acc.fold(1, &[c(1.0, 0.0), c(0.0, 1.0)]));
        let s = acc.snapshot();
        assert_eq!(s.len(), 6);
        assert_eq!(s[2], c(2.0, 0.0));
        assert_eq!(s[3], c(0.0, 2.0));
        assert_eq!(s[0], c(0.0, 0.0));
        assert_eq!(s[5], c(0.0, 0.0));
    }

    #[test]
    fn test_fold_rejects_bad_input() {
        let acc = SpectrumAccumulator::new(2, 1);
        assert!(!acc.fold(2, &[c(1.0, 1.0)]));
        assert!(!acc.fold(0, &[c(1.0, 1.0), c(1.0, 1.0)]));
        assert!(acc.snapshot().iter().all(|v| *v == c(0.0, 0.0)));
    }

    #[test]
    fn test_order_independent() {
        let forward = SpectrumAccumulator::new(4, 1);
        let backward = SpectrumAccumulator::new(4, 1);
        let parts: Vec<(usize, Complex64)> =
            (0..4).map(|f| (f, c(f as f64 + 0.5, -(f as f64)))).collect();
        for (f, v) in &parts {
            forward.fold(*f, &[*v]);
        }
        for (f, v) in parts.iter().rev() {
            backward.fold(*f, &[*v]);
        }
        assert_eq!(forward.snapshot(), backward.snapshot());
    }

    #[test]
    fn test_reset_zeroes() {
        let acc = SpectrumAccumulator::new(2, 1);
        acc.fold(0, &[c(3.0, 4.0)]);
        acc.reset();
        assert!(acc.snapshot().iter().all(|v| *v == c(0.0, 0.0)));
        assert_eq!(acc.len(), 2);
        assert!(!acc.is_empty());
    }
}
