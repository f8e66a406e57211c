//! Iterative exclusion of strongly correlated pairs.
//!
//! The basis variance system assumes that most basis correlations are close
//! to zero. Pairs that clearly violate this are dropped from the system one
//! at a time: each round removes the remaining pair with the largest
//! absolute correlation, updates the system matrix and the working
//! variation matrix, and re-solves. A component that loses all but three of
//! its partners is excluded entirely and reported as `NaN`.
//!
//! Rounds depend on the state left by the previous round and always run
//! sequentially. The loop owns private copies of the variation matrix and
//! of the system matrix, so concurrent estimations never share state.

use super::assemble::correlation_from_variances;
use super::solver::{basis_variances, default_system_matrix};
use crate::error::{Result, SparccError};
use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Result of a refinement run that kept enough components.
#[derive(Debug, Clone)]
pub struct Refined {
    /// Basis correlations; rows/columns of excluded components are `NaN`.
    pub correlation: DMatrix<f64>,
    /// Basis covariances; rows/columns of excluded components are `NaN`.
    pub covariance: DMatrix<f64>,
    /// Basis variances; entries of excluded components are `NaN`.
    pub basis_variances: DVector<f64>,
    /// Excluded pairs `(i, j)` with `i < j`, in exclusion order.
    pub excluded_pairs: Vec<(usize, usize)>,
    /// Fully excluded components, ascending.
    pub excluded_components: Vec<usize>,
    /// Number of exclusion rounds performed.
    pub rounds: usize,
}

/// Terminal state of the refinement loop.
#[derive(Debug, Clone)]
pub enum RefinementOutcome {
    /// Threshold satisfied or round budget exhausted.
    Converged(Refined),
    /// Too few components remain (or the system became singular); the
    /// caller should use the CLR estimate instead.
    TooManyExclusions {
        excluded_pairs: Vec<(usize, usize)>,
        excluded_components: Vec<usize>,
    },
}

/// Outcome of scanning the current correlations for the next pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PairScan {
    /// Exclude this pair next.
    Exclude(usize, usize),
    /// Nothing above the threshold, or an excluded component was reached.
    Settled,
}

/// Find the strongest remaining pair in the upper triangle of `correlation`.
///
/// Cells are scanned row-major and the first maximum wins. Reaching a `NaN`
/// cell (a fully excluded component) settles the scan, as does a maximum
/// magnitude that is not above `threshold`.
pub fn strongest_pair(
    correlation: &DMatrix<f64>,
    excluded: &HashSet<(usize, usize)>,
    threshold: f64,
) -> PairScan {
    let k = correlation.nrows();
    let mut best: Option<(usize, usize, f64)> = None;

    for i in 0..k {
        for j in (i + 1)..k {
            if excluded.contains(&(i, j)) {
                continue;
            }
            let magnitude = correlation[(i, j)].abs();
            if magnitude.is_nan() {
                return PairScan::Settled;
            }
            if best.map_or(true, |(_, _, m)| magnitude > m) {
                best = Some((i, j, magnitude));
            }
        }
    }

    match best {
        Some((i, j, magnitude)) if magnitude > threshold => PairScan::Exclude(i, j),
        _ => PairScan::Settled,
    }
}

/// Run SparCC estimation with up to `max_rounds` exclusion rounds.
///
/// # Arguments
/// * `variation` - Variation matrix of the fractions (k × k, k >= 4)
/// * `threshold` - Pairs with |correlation| above this are excluded
/// * `max_rounds` - Maximum number of exclusion rounds
/// * `v_min` - Floor for basis variances
pub fn refine(
    variation: &DMatrix<f64>,
    threshold: f64,
    max_rounds: usize,
    v_min: f64,
) -> Result<RefinementOutcome> {
    let k = variation.nrows();
    if !variation.is_square() {
        return Err(SparccError::DimensionMismatch {
            expected: k,
            actual: variation.ncols(),
        });
    }
    if k < 4 {
        return Err(SparccError::InsufficientComponents { found: k });
    }

    let mut v_work = variation.clone();
    let mut system = default_system_matrix(k);

    let mut bv = match basis_variances(&v_work, &system, v_min) {
        Ok(bv) => bv,
        Err(SparccError::SingularMatrix(_)) => {
            return Ok(RefinementOutcome::TooManyExclusions {
                excluded_pairs: Vec::new(),
                excluded_components: Vec::new(),
            })
        }
        Err(e) => return Err(e),
    };
    let (mut correlation, mut covariance) = correlation_from_variances(variation, &bv);

    let mut excluded_pairs: Vec<(usize, usize)> = Vec::new();
    let mut excluded_lookup: HashSet<(usize, usize)> = HashSet::new();
    let mut excluded_components: BTreeSet<usize> = BTreeSet::new();
    let mut rounds = 0;

    while rounds < max_rounds {
        let (i, j) = match strongest_pair(&correlation, &excluded_lookup, threshold) {
            PairScan::Exclude(i, j) => (i, j),
            PairScan::Settled => break,
        };
        rounds += 1;
        debug!(round = rounds, i, j, corr = correlation[(i, j)], "excluding pair");

        excluded_pairs.push((i, j));
        excluded_lookup.insert((i, j));
        system[(i, j)] -= 1.0;
        system[(j, i)] -= 1.0;
        system[(i, i)] -= 1.0;
        system[(j, j)] -= 1.0;
        v_work[(i, j)] = 0.0;
        v_work[(j, i)] = 0.0;

        let mut touching = vec![0usize; k];
        for &(a, b) in &excluded_pairs {
            touching[a] += 1;
            touching[b] += 1;
        }
        let newly_excluded: Vec<usize> = (0..k)
            .filter(|&c| touching[c] >= k - 3 && !excluded_components.contains(&c))
            .collect();

        if !newly_excluded.is_empty() {
            excluded_components.extend(newly_excluded.iter().copied());
            if excluded_components.len() > k - 4 {
                debug!(
                    excluded = excluded_components.len(),
                    components = k,
                    "too many components excluded"
                );
                return Ok(RefinementOutcome::TooManyExclusions {
                    excluded_pairs,
                    excluded_components: excluded_components.into_iter().collect(),
                });
            }
            for &c in &newly_excluded {
                v_work.row_mut(c).fill(0.0);
                v_work.column_mut(c).fill(0.0);
                system.row_mut(c).fill(0.0);
                system.column_mut(c).fill(0.0);
                system[(c, c)] = 1.0;
            }
        }

        bv = match basis_variances(&v_work, &system, v_min) {
            Ok(bv) => bv,
            Err(SparccError::SingularMatrix(_)) => {
                return Ok(RefinementOutcome::TooManyExclusions {
                    excluded_pairs,
                    excluded_components: excluded_components.into_iter().collect(),
                })
            }
            Err(e) => return Err(e),
        };
        let assembled = correlation_from_variances(variation, &bv);
        correlation = assembled.0;
        covariance = assembled.1;

        for &c in &excluded_components {
            bv[c] = f64::NAN;
            correlation.row_mut(c).fill(f64::NAN);
            correlation.column_mut(c).fill(f64::NAN);
            covariance.row_mut(c).fill(f64::NAN);
            covariance.column_mut(c).fill(f64::NAN);
        }
    }

    Ok(RefinementOutcome::Converged(Refined {
        correlation,
        covariance,
        basis_variances: bv,
        excluded_pairs,
        excluded_components: excluded_components.into_iter().collect(),
        rounds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::variation::variation_matrix;

    fn refined(outcome: RefinementOutcome) -> Refined {
        match outcome {
            RefinementOutcome::Converged(r) => r,
            other => panic!("expected convergence, got {:?}", other),
        }
    }

    #[test]
    fn test_strongest_pair_on_zero_matrix() {
        let c = DMatrix::zeros(50, 50);
        assert_eq!(strongest_pair(&c, &HashSet::new(), 0.1), PairScan::Settled);
    }

    #[test]
    fn test_strongest_pair_first_maximum() {
        // rows -0.2, -0.1, 0.0, 0.1 repeated across columns
        let c = DMatrix::from_fn(4, 4, |i, _| -0.2 + 0.1 * i as f64);
        assert_eq!(strongest_pair(&c, &HashSet::new(), 0.1), PairScan::Exclude(0, 1));
    }

    #[test]
    fn test_strongest_pair_skips_excluded() {
        let mut c = DMatrix::from_element(4, 4, 0.5);
        c[(2, 3)] = 0.9;
        let mut excluded = HashSet::new();
        assert_eq!(strongest_pair(&c, &excluded, 0.1), PairScan::Exclude(2, 3));
        excluded.insert((2, 3));
        assert_eq!(strongest_pair(&c, &excluded, 0.1), PairScan::Exclude(0, 1));
    }

    #[test]
    fn test_constant_fractions_exclude_first_component() {
        let fractions = DMatrix::from_element(7, 7, 1.0 / 7.0);
        let v = variation_matrix(&fractions).unwrap();
        let r = refined(refine(&v, 0.1, 10, 1e-4).unwrap());

        assert_eq!(r.excluded_components, vec![0]);
        assert_eq!(r.excluded_pairs, vec![(0, 1), (0, 2), (0, 3), (0, 4)]);
        for i in 0..7 {
            assert!(r.correlation[(0, i)].is_nan());
            assert!(r.correlation[(i, 0)].is_nan());
            assert!(r.covariance[(0, i)].is_nan());
        }
        for i in 1..7 {
            for j in 1..7 {
                assert_eq!(r.correlation[(i, j)], 1.0);
                assert_eq!(r.covariance[(i, j)], 1e-4);
            }
        }
    }

    #[test]
    fn test_zero_rounds_is_unrefined() {
        let v = DMatrix::from_fn(5, 5, |i, j| if i == j { 0.0 } else { 0.1 * (1 + (i + j) % 4) as f64 });
        let r = refined(refine(&v, 0.1, 0, 1e-4).unwrap());

        let bv = basis_variances(&v, &default_system_matrix(5), 1e-4).unwrap();
        let (corr, cov) = correlation_from_variances(&v, &bv);
        assert_eq!(r.correlation, corr);
        assert_eq!(r.covariance, cov);
        assert_eq!(r.rounds, 0);
        assert!(r.excluded_pairs.is_empty());
    }

    #[test]
    fn test_exclusions_bounded_by_rounds() {
        let fractions = DMatrix::from_element(20, 50, 0.02);
        let v = variation_matrix(&fractions).unwrap();
        for rounds in [0, 1, 5, 10] {
            let r = refined(refine(&v, 0.1, rounds, 1e-4).unwrap());
            assert_eq!(r.excluded_pairs.len(), rounds);
            let unique: HashSet<_> = r.excluded_pairs.iter().collect();
            assert_eq!(unique.len(), rounds);
        }
    }

    #[test]
    fn test_too_many_exclusions() {
        // With k = 4 a single fully excluded component is already too many
        let fractions = DMatrix::from_element(5, 4, 0.25);
        let v = variation_matrix(&fractions).unwrap();
        match refine(&v, 0.1, 10, 1e-4).unwrap() {
            RefinementOutcome::TooManyExclusions { excluded_components, .. } => {
                assert_eq!(excluded_components, vec![0, 1]);
            }
            other => panic!("expected too many exclusions, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_small_systems() {
        let v = DMatrix::zeros(3, 3);
        assert!(matches!(
            refine(&v, 0.1, 10, 1e-4),
            Err(SparccError::InsufficientComponents { found: 3 })
        ));
    }
}
