use serde::{Deserialize, Serialize};

use crate::error::VelocityError;

/// What the per point error of a [`TrackedPointSet`] measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingErrorKind {
    /// Distance in pixels between the seed and its back-tracked position.
    Backtrack,
    /// Mean of the template correlation surface.
    Correlation,
}

/// Points seeded in a first image and their tracked positions in a second one.
///
/// Every array is index aligned: entry `i` of each one refers to the same point.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPointSet {
    seeds: Vec<[f64; 2]>,
    tracked: Vec<[f64; 2]>,
    backtracked: Option<Vec<[f64; 2]>>,
    errors: Vec<f64>,
    error_kind: TrackingErrorKind,
}

impl TrackedPointSet {
    /// Create a point set.
    ///
    /// # Arguments
    ///
    /// * `seeds` - Positions in the first image.
    /// * `tracked` - Positions in the second image.
    /// * `backtracked` - Positions tracked back from the second image into the first, if any.
    /// * `errors` - Per point error.
    /// * `error_kind` - What `errors` measures.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::MisalignedPointSets`] when the arrays have different lengths.
    pub fn new(
        seeds: Vec<[f64; 2]>,
        tracked: Vec<[f64; 2]>,
        backtracked: Option<Vec<[f64; 2]>>,
        errors: Vec<f64>,
        error_kind: TrackingErrorKind,
    ) -> Result<Self, VelocityError> {
        let n = seeds.len();
        let back = backtracked.as_ref().map_or(n, Vec::len);
        if tracked.len() != n || errors.len() != n || back != n {
            return Err(VelocityError::MisalignedPointSets(format!(
                "{n} seeds, {} tracked, {back} back-tracked, {} errors",
                tracked.len(),
                errors.len()
            )));
        }
        Ok(Self {
            seeds,
            tracked,
            backtracked,
            errors,
            error_kind,
        })
    }

    /// Positions in the first image.
    pub fn seeds(&self) -> &[[f64; 2]] {
        &self.seeds
    }

    /// Positions in the second image.
    pub fn tracked(&self) -> &[[f64; 2]] {
        &self.tracked
    }

    /// Positions tracked back into the first image, `None` for template matching.
    pub fn backtracked(&self) -> Option<&[[f64; 2]]> {
        self.backtracked.as_deref()
    }

    /// Per point error.
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// What [`Self::errors`] measures.
    pub fn error_kind(&self) -> TrackingErrorKind {
        self.error_kind
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    /// Whether the set holds no points.
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// Mean of the per point errors, NaN for an empty set.
    pub fn mean_error(&self) -> f64 {
        if self.errors.is_empty() {
            return f64::NAN;
        }
        self.errors.iter().sum::<f64>() / self.errors.len() as f64
    }

    /// Replace the point positions, keeping the errors.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::MisalignedPointSets`] when the new arrays do not match the
    /// number of points.
    pub fn with_points(
        self,
        seeds: Vec<[f64; 2]>,
        tracked: Vec<[f64; 2]>,
        backtracked: Option<Vec<[f64; 2]>>,
    ) -> Result<Self, VelocityError> {
        Self::new(seeds, tracked, backtracked, self.errors, self.error_kind)
    }

    /// Keep the points whose entry in `keep` is true, preserving their order.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::MisalignedPointSets`] when `keep` has the wrong length.
    pub fn retain(&self, keep: &[bool]) -> Result<Self, VelocityError> {
        if keep.len() != self.len() {
            return Err(VelocityError::MisalignedPointSets(format!(
                "selection of {} for {} points",
                keep.len(),
                self.len()
            )));
        }
        Ok(Self {
            seeds: select(&self.seeds, keep),
            tracked: select(&self.tracked, keep),
            backtracked: self.backtracked.as_ref().map(|b| select(b, keep)),
            errors: select(&self.errors, keep),
            error_kind: self.error_kind,
        })
    }
}

pub(crate) fn select<T: Copy>(values: &[T], keep: &[bool]) -> Vec<T> {
    values
        .iter()
        .zip(keep)
        .filter(|(_, k)| **k)
        .map(|(v, _)| *v)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_misaligned_sets() {
        let res = TrackedPointSet::new(
            vec![[0.0, 0.0]; 3],
            vec![[0.0, 0.0]; 2],
            None,
            vec![0.0; 3],
            TrackingErrorKind::Correlation,
        );
        assert!(matches!(res, Err(VelocityError::MisalignedPointSets(_))));

        let res = TrackedPointSet::new(
            vec![[0.0, 0.0]; 3],
            vec![[0.0, 0.0]; 3],
            Some(vec![[0.0, 0.0]; 4]),
            vec![0.0; 3],
            TrackingErrorKind::Backtrack,
        );
        assert!(matches!(res, Err(VelocityError::MisalignedPointSets(_))));
    }

    #[test]
    fn test_retain_keeps_order() -> Result<(), VelocityError> {
        let seeds = (0..5).map(|i| [i as f64, 0.0]).collect::<Vec<_>>();
        let set = TrackedPointSet::new(
            seeds.clone(),
            seeds.clone(),
            Some(seeds),
            vec![0.1, 0.2, 0.3, 0.4, 0.5],
            TrackingErrorKind::Backtrack,
        )?;

        let kept = set.retain(&[true, false, true, false, true])?;
        assert_eq!(kept.len(), 3);
        assert_eq!(kept.seeds(), &[[0.0, 0.0], [2.0, 0.0], [4.0, 0.0]]);
        assert_eq!(kept.errors(), &[0.1, 0.3, 0.5]);
        assert_eq!(kept.backtracked().map(<[_]>::len), Some(3));
        approx::assert_relative_eq!(kept.mean_error(), 0.3, epsilon = 1e-12);

        assert!(set.retain(&[true]).is_err());
        Ok(())
    }
}
