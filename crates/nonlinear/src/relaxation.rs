//! Oscillation detection and relaxation of Newton increments.

use std::str::FromStr;

use nalgebra::DVector;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::Error;

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RelaxType {
    /// `Δx ← ω Δx`
    #[default]
    Dampen,
    /// `Δx ← ω Δx + (1 − ω) Δx_prev`
    Sor,
}

impl FromStr for RelaxType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dampen" => Ok(RelaxType::Dampen),
            "sor" => Ok(RelaxType::Sor),
            _ => Err(Error::IllegalInput(format!("unknown relaxation type '{s}'"))),
        }
    }
}

/// Looks at the last three entries of `history` (one residual norm per phase each).
///
/// A phase oscillates when its newest norm is close to the one two iterations back but far from
/// the previous one. Returns `(oscillate, stagnate)`; the iteration oscillates when more than one
/// phase does, and stagnates when no phase changed by more than `rel_tol` between the two older
/// entries.
pub fn detect_oscillations(history: &[Vec<f64>], rel_tol: f64) -> (bool, bool) {
    let it = history.len();
    if it < 3 {
        return (false, false);
    }
    let f0 = &history[it - 1];
    let f1 = &history[it - 2];
    let f2 = &history[it - 3];

    let mut oscillating_phases = 0;
    let mut stagnate = true;
    for p in 0..f0.len().min(f1.len()).min(f2.len()) {
        let d1 = ((f0[p] - f2[p]) / f0[p]).abs();
        let d2 = ((f0[p] - f1[p]) / f0[p]).abs();
        if d1 < rel_tol && rel_tol < d2 {
            oscillating_phases += 1;
        }
        let d = ((f1[p] - f2[p]) / f2[p]).abs();
        stagnate = stagnate && d <= rel_tol;
    }
    (oscillating_phases > 1, stagnate)
}

/// Relaxes `dx` in place. `dx_old` holds the previous (unrelaxed) increment and is replaced by
/// the current one.
pub fn stabilize(
    dx: &mut DVector<f64>,
    dx_old: &mut DVector<f64>,
    omega: f64,
    relax_type: RelaxType,
) {
    if omega == 1.0 {
        return;
    }
    match relax_type {
        RelaxType::Dampen => {
            *dx *= omega;
        }
        RelaxType::Sor => {
            if dx_old.len() != dx.len() {
                *dx_old = DVector::zeros(dx.len());
            }
            let previous = std::mem::replace(dx_old, dx.clone());
            *dx *= omega;
            dx.axpy(1.0 - omega, &previous, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_too_short_history() {
        let h = vec![vec![1.0, 1.0], vec![2.0, 2.0]];
        assert_eq!(detect_oscillations(&h, 0.2), (false, false));
    }

    #[test]
    fn test_two_phases_oscillating() {
        let h = vec![vec![1.0, 1.0, 1.0], vec![2.0, 2.0, 1.0], vec![1.05, 1.0, 1.0]];
        let (oscillate, stagnate) = detect_oscillations(&h, 0.2);
        assert!(oscillate);
        assert!(!stagnate);
    }

    #[test]
    fn test_single_phase_is_not_oscillation() {
        let h = vec![vec![1.0, 1.0], vec![2.0, 0.5], vec![1.0, 0.25]];
        assert!(!detect_oscillations(&h, 0.2).0);
    }

    #[test]
    fn test_stagnation() {
        let h = vec![vec![1.0, 1.0], vec![1.01, 0.99], vec![1.0, 1.0]];
        assert!(detect_oscillations(&h, 0.2).1);
    }

    #[test]
    fn test_dampen() {
        let mut dx = DVector::from_vec(vec![1.0, -2.0]);
        let mut old = DVector::zeros(2);
        stabilize(&mut dx, &mut old, 0.5, RelaxType::Dampen);
        assert_eq!(dx.as_slice(), &[0.5, -1.0]);
    }

    #[test]
    fn test_sor_blends_previous_increment() {
        let mut old = DVector::from_vec(vec![4.0, 0.0]);
        let mut dx = DVector::from_vec(vec![2.0, 2.0]);
        stabilize(&mut dx, &mut old, 0.75, RelaxType::Sor);
        assert_relative_eq!(dx[0], 0.75 * 2.0 + 0.25 * 4.0, max_relative = 1e-12);
        assert_relative_eq!(dx[1], 1.5, max_relative = 1e-12);
        assert_eq!(old.as_slice(), &[2.0, 2.0]);
    }

    #[test]
    fn test_parse() {
        assert_eq!("sor".parse::<RelaxType>().unwrap(), RelaxType::Sor);
        assert!("over".parse::<RelaxType>().is_err());
    }
}
